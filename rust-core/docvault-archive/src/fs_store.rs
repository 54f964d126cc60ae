// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Transactional document store on a local filesystem.
//
// Every mutation logs its undo before it creates any file:
//
//   overwrite:  undo = fs.restore, commit = fs.purge, copy target -> backup
//   create:     undo = fs.remove
//   delete:     undo = fs.restore, commit = fs.purge, rename target -> backup
//
// A restore whose backup does not exist is a no-op, and the actions also
// remove the scratch files their target or backup may have left behind
// (`.partial` backups, `.write-tmp` and `.restore-tmp` siblings), so a crash
// at any point leaves nothing unreferenced by the log.
//
// Backups live in `backup_dir` (default `<root>/.backup`) so a rename into
// it stays on the same filesystem.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use docvault_wal::{json_payload, Action, ActionError, ActionRegistry, TransactionWal, WalResult};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ArchiveError, ArchiveResult};
use crate::locks::ResourceLocks;

const BACKUP_DIR_NAME: &str = ".backup";
const RESTORE_TMP_SUFFIX: &str = ".restore-tmp";
const WRITE_TMP_SUFFIX: &str = ".write-tmp";
const PARTIAL_SUFFIX: &str = ".partial";

/// Documents stored as plain files under a root directory.
#[derive(Debug, Clone)]
pub struct TransactionalFileStore {
    root: PathBuf,
    backup_dir: PathBuf,
    locks: ResourceLocks,
}

impl TransactionalFileStore {
    /// Open a store rooted at `root`, creating it and its backup directory.
    pub async fn open(root: impl Into<PathBuf>) -> ArchiveResult<Self> {
        let root = root.into();
        let backup_dir = root.join(BACKUP_DIR_NAME);
        Self::with_backup_dir(root, backup_dir).await
    }

    /// Open a store with an explicit backup directory. It must be on the
    /// same filesystem as `root`.
    pub async fn with_backup_dir(
        root: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
    ) -> ArchiveResult<Self> {
        let root = root.into();
        let backup_dir = backup_dir.into();
        fs::create_dir_all(&root).await?;
        fs::create_dir_all(&backup_dir).await?;
        Ok(Self {
            root,
            backup_dir,
            locks: ResourceLocks::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Add the decoders for `fs.restore`, `fs.remove` and `fs.purge`.
    pub fn register_actions(registry: &mut ActionRegistry) {
        registry.register_json(RestoreFile::NAME, |a: RestoreFile| Arc::new(a) as Arc<dyn Action>);
        registry.register_json(RemoveFile::NAME, |a: RemoveFile| Arc::new(a) as Arc<dyn Action>);
        registry.register_json(PurgeFile::NAME, |a: PurgeFile| Arc::new(a) as Arc<dyn Action>);
    }

    fn resolve(&self, name: &str) -> ArchiveResult<PathBuf> {
        let invalid = |reason| ArchiveError::InvalidName {
            name: name.to_string(),
            reason,
        };

        if name.is_empty() {
            return Err(invalid("must not be empty"));
        }
        if name.ends_with(RESTORE_TMP_SUFFIX) || name.ends_with(WRITE_TMP_SUFFIX) {
            return Err(invalid("uses a reserved suffix"));
        }

        let mut path = self.root.clone();
        for component in Path::new(name).components() {
            match component {
                Component::Normal(part) => {
                    if part.to_string_lossy().starts_with('.') {
                        return Err(invalid("hidden path components are reserved"));
                    }
                    path.push(part);
                }
                _ => return Err(invalid("must stay inside the archive root")),
            }
        }
        Ok(path)
    }

    fn backup_path(&self, tx: &TransactionWal) -> PathBuf {
        self.backup_dir
            .join(format!("{}-{}.bak", tx.transaction_id(), Uuid::new_v4()))
    }

    /// Write `bytes` to `name` within the unit of work `tx`.
    pub async fn write(&self, tx: &mut TransactionWal, name: &str, bytes: &[u8]) -> ArchiveResult<()> {
        let target = self.resolve(name)?;
        let _guard = self.locks.write(name).await;

        if fs::try_exists(&target).await? {
            let backup = self.backup_path(tx);
            register_restore(tx, &target, &backup).await?;

            let partial = with_suffix(&backup, PARTIAL_SUFFIX);
            if let Err(e) = copy_durably(&target, &partial, &backup).await {
                let _ = fs::remove_file(&partial).await;
                return Err(e.into());
            }
            debug!(transaction_id = %tx.transaction_id(), document = name, backup = %backup.display(), "Backed up document");
        } else {
            tx.append_undo_action(&RemoveFile {
                target: target.clone(),
            })
            .await?;
        }

        self.write_atomically(&target, bytes).await
    }

    /// Delete `name` within the unit of work `tx`.
    pub async fn delete(&self, tx: &mut TransactionWal, name: &str) -> ArchiveResult<()> {
        let target = self.resolve(name)?;
        let _guard = self.locks.write(name).await;

        if !fs::try_exists(&target).await? {
            return Err(ArchiveError::NotFound(name.to_string()));
        }

        // Restoring a backup that does not exist yet is a no-op, so the undo
        // can be logged before the document is moved.
        let backup = self.backup_path(tx);
        register_restore(tx, &target, &backup).await?;
        fs::rename(&target, &backup).await?;

        debug!(transaction_id = %tx.transaction_id(), document = name, "Deleted document");
        Ok(())
    }

    /// Current contents of `name`.
    pub async fn read(&self, name: &str) -> ArchiveResult<Vec<u8>> {
        let target = self.resolve(name)?;
        let _guard = self.locks.read(name).await;
        match fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ArchiveError::NotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, name: &str) -> ArchiveResult<bool> {
        let target = self.resolve(name)?;
        let _guard = self.locks.read(name).await;
        Ok(fs::try_exists(&target).await?)
    }

    async fn write_atomically(&self, target: &Path, bytes: &[u8]) -> ArchiveResult<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = with_suffix(target, WRITE_TMP_SUFFIX);
        if let Err(e) = write_durably(&tmp, bytes, target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

async fn register_restore(tx: &mut TransactionWal, target: &Path, backup: &Path) -> ArchiveResult<()> {
    tx.append_undo_action(&RestoreFile {
        target: target.to_path_buf(),
        backup: backup.to_path_buf(),
    })
    .await?;
    tx.append_commit_action(&PurgeFile {
        backup: backup.to_path_buf(),
    })
    .await?;
    Ok(())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Copy `from` to `scratch`, fsync it, then rename it to `to`. `to` never
/// holds a partial copy.
async fn copy_durably(from: &Path, scratch: &Path, to: &Path) -> std::io::Result<()> {
    fs::copy(from, scratch).await?;
    fs::File::open(scratch).await?.sync_all().await?;
    fs::rename(scratch, to).await
}

async fn write_durably(scratch: &Path, bytes: &[u8], to: &Path) -> std::io::Result<()> {
    fs::write(scratch, bytes).await?;
    fs::File::open(scratch).await?.sync_all().await?;
    fs::rename(scratch, to).await
}

async fn remove_if_present(path: &Path) -> Result<bool, ActionError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Put the backup back over the target, then drop the backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreFile {
    pub target: PathBuf,
    pub backup: PathBuf,
}

impl RestoreFile {
    pub const NAME: &'static str = "fs.restore";

    fn tmp_path(&self) -> PathBuf {
        with_suffix(&self.target, RESTORE_TMP_SUFFIX)
    }
}

#[async_trait]
impl Action for RestoreFile {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn payload(&self) -> WalResult<Vec<u8>> {
        json_payload(self)
    }

    async fn run(&self) -> Result<(), ActionError> {
        let tmp = self.tmp_path();
        for leftover in [
            tmp.clone(),
            with_suffix(&self.target, WRITE_TMP_SUFFIX),
            with_suffix(&self.backup, PARTIAL_SUFFIX),
        ] {
            if remove_if_present(&leftover).await? {
                warn!(path = %leftover.display(), "Removed leftover from an interrupted write");
            }
        }

        if !fs::try_exists(&self.backup).await? {
            debug!(path = %self.target.display(), "Backup already gone, nothing to restore");
            return Ok(());
        }
        if let Some(parent) = self.target.parent() {
            fs::create_dir_all(parent).await?;
        }

        copy_durably(&self.backup, &tmp, &self.target).await?;
        remove_if_present(&self.backup).await?;

        debug!(path = %self.target.display(), "Restored document from backup");
        Ok(())
    }
}

/// Delete a document created by the transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveFile {
    pub target: PathBuf,
}

impl RemoveFile {
    pub const NAME: &'static str = "fs.remove";
}

#[async_trait]
impl Action for RemoveFile {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn payload(&self) -> WalResult<Vec<u8>> {
        json_payload(self)
    }

    async fn run(&self) -> Result<(), ActionError> {
        remove_if_present(&with_suffix(&self.target, WRITE_TMP_SUFFIX)).await?;
        remove_if_present(&self.target).await?;
        Ok(())
    }
}

/// Drop a backup once the transaction has committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeFile {
    pub backup: PathBuf,
}

impl PurgeFile {
    pub const NAME: &'static str = "fs.purge";
}

#[async_trait]
impl Action for PurgeFile {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn payload(&self) -> WalResult<Vec<u8>> {
        json_payload(self)
    }

    async fn run(&self) -> Result<(), ActionError> {
        remove_if_present(&with_suffix(&self.backup, PARTIAL_SUFFIX)).await?;
        remove_if_present(&self.backup).await?;
        Ok(())
    }
}
