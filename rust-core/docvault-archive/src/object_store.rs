// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Transactional document store over a key-value backend.
//
// Documents live under `object:<name>`; a backup taken by transaction `tx`
// lives under `backup:<tx>:<uuid>`. The actions carry only keys in their
// payload. The backend handle is captured by the decoders installed with
// `register_actions`.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use docvault_storage::StorageBackend;
use docvault_wal::{json_payload, Action, ActionError, ActionRegistry, TransactionWal, WalResult};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{ArchiveError, ArchiveResult};
use crate::locks::ResourceLocks;

const OBJECT_PREFIX: &str = "object:";
const BACKUP_PREFIX: &str = "backup:";

/// Documents stored as values in a [`StorageBackend`].
#[derive(Clone)]
pub struct TransactionalObjectStore {
    backend: Arc<dyn StorageBackend>,
    locks: ResourceLocks,
}

impl fmt::Debug for TransactionalObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionalObjectStore")
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}

impl TransactionalObjectStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            locks: ResourceLocks::new(),
        }
    }

    /// Add the decoders for `object.restore`, `object.remove` and
    /// `object.purge`, bound to this store's backend.
    pub fn register_actions(&self, registry: &mut ActionRegistry) {
        let backend = Arc::clone(&self.backend);
        registry.register_json(RestoreObject::NAME, move |payload: RestorePayload| {
            Arc::new(RestoreObject {
                payload,
                backend: Arc::clone(&backend),
            }) as Arc<dyn Action>
        });

        let backend = Arc::clone(&self.backend);
        registry.register_json(RemoveObject::NAME, move |payload: KeyPayload| {
            Arc::new(RemoveObject {
                payload,
                backend: Arc::clone(&backend),
            }) as Arc<dyn Action>
        });

        let backend = Arc::clone(&self.backend);
        registry.register_json(PurgeObject::NAME, move |payload: KeyPayload| {
            Arc::new(PurgeObject {
                payload,
                backend: Arc::clone(&backend),
            }) as Arc<dyn Action>
        });
    }

    fn object_key(name: &str) -> ArchiveResult<String> {
        if name.is_empty() {
            return Err(ArchiveError::InvalidName {
                name: name.to_string(),
                reason: "must not be empty",
            });
        }
        if name.chars().any(char::is_control) {
            return Err(ArchiveError::InvalidName {
                name: name.to_string(),
                reason: "must not contain control characters",
            });
        }
        Ok(format!("{OBJECT_PREFIX}{name}"))
    }

    fn backup_key(tx: &TransactionWal) -> String {
        format!("{BACKUP_PREFIX}{}:{}", tx.transaction_id(), Uuid::new_v4())
    }

    fn restore_action(&self, key: &str, backup: &str) -> RestoreObject {
        RestoreObject {
            payload: RestorePayload {
                key: key.to_string(),
                backup: backup.to_string(),
            },
            backend: Arc::clone(&self.backend),
        }
    }

    fn key_action<A>(&self, key: &str, build: impl FnOnce(KeyPayload, Arc<dyn StorageBackend>) -> A) -> A {
        build(KeyPayload { key: key.to_string() }, Arc::clone(&self.backend))
    }

    /// Store `bytes` under `name` within the unit of work `tx`.
    pub async fn put(&self, tx: &mut TransactionWal, name: &str, bytes: &[u8]) -> ArchiveResult<()> {
        let key = Self::object_key(name)?;
        let _guard = self.locks.write(name).await;

        match self.backend.get(key.as_bytes()).await? {
            Some(current) => {
                let backup = Self::backup_key(tx);
                self.register_restore(tx, &key, &backup).await?;
                self.backend.put(backup.as_bytes(), &current).await?;
                debug!(transaction_id = %tx.transaction_id(), object = name, %backup, "Backed up object");
            }
            None => {
                let remove = self.key_action(&key, |payload, backend| RemoveObject { payload, backend });
                tx.append_undo_action(&remove).await?;
            }
        }

        self.backend.put(key.as_bytes(), bytes).await?;
        Ok(())
    }

    /// Delete `name` within the unit of work `tx`.
    pub async fn delete(&self, tx: &mut TransactionWal, name: &str) -> ArchiveResult<()> {
        let key = Self::object_key(name)?;
        let _guard = self.locks.write(name).await;

        let current = self
            .backend
            .get(key.as_bytes())
            .await?
            .ok_or_else(|| ArchiveError::NotFound(name.to_string()))?;

        // The restore is a no-op until the backup is written.
        let backup = Self::backup_key(tx);
        self.register_restore(tx, &key, &backup).await?;
        self.backend.put(backup.as_bytes(), &current).await?;
        self.backend.delete(key.as_bytes()).await?;

        debug!(transaction_id = %tx.transaction_id(), object = name, "Deleted object");
        Ok(())
    }

    /// Current contents of `name`.
    pub async fn get(&self, name: &str) -> ArchiveResult<Vec<u8>> {
        let key = Self::object_key(name)?;
        let _guard = self.locks.read(name).await;
        self.backend
            .get(key.as_bytes())
            .await?
            .ok_or_else(|| ArchiveError::NotFound(name.to_string()))
    }

    pub async fn exists(&self, name: &str) -> ArchiveResult<bool> {
        let key = Self::object_key(name)?;
        let _guard = self.locks.read(name).await;
        Ok(self.backend.exists(key.as_bytes()).await?)
    }

    async fn register_restore(&self, tx: &mut TransactionWal, key: &str, backup: &str) -> ArchiveResult<()> {
        tx.append_undo_action(&self.restore_action(key, backup)).await?;
        let purge = self.key_action(backup, |payload, backend| PurgeObject { payload, backend });
        tx.append_commit_action(&purge).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestorePayload {
    pub key: String,
    pub backup: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPayload {
    pub key: String,
}

/// Copy the backup value back over the object, then drop the backup.
pub struct RestoreObject {
    payload: RestorePayload,
    backend: Arc<dyn StorageBackend>,
}

impl RestoreObject {
    pub const NAME: &'static str = "object.restore";
}

impl fmt::Debug for RestoreObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestoreObject")
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Action for RestoreObject {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn payload(&self) -> WalResult<Vec<u8>> {
        json_payload(&self.payload)
    }

    async fn run(&self) -> Result<(), ActionError> {
        let RestorePayload { key, backup } = &self.payload;
        match self.backend.get(backup.as_bytes()).await? {
            Some(original) => {
                self.backend.put(key.as_bytes(), &original).await?;
                self.backend.delete(backup.as_bytes()).await?;
                debug!(%key, "Restored object from backup");
            }
            None => debug!(%key, "Backup already gone, nothing to restore"),
        }
        Ok(())
    }
}

/// Delete an object created by the transaction.
pub struct RemoveObject {
    payload: KeyPayload,
    backend: Arc<dyn StorageBackend>,
}

impl RemoveObject {
    pub const NAME: &'static str = "object.remove";
}

impl fmt::Debug for RemoveObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoveObject")
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Action for RemoveObject {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn payload(&self) -> WalResult<Vec<u8>> {
        json_payload(&self.payload)
    }

    async fn run(&self) -> Result<(), ActionError> {
        self.backend.delete(self.payload.key.as_bytes()).await?;
        Ok(())
    }
}

/// Drop a backup once the transaction has committed.
pub struct PurgeObject {
    payload: KeyPayload,
    backend: Arc<dyn StorageBackend>,
}

impl PurgeObject {
    pub const NAME: &'static str = "object.purge";
}

impl fmt::Debug for PurgeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PurgeObject")
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Action for PurgeObject {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn payload(&self) -> WalResult<Vec<u8>> {
        json_payload(&self.payload)
    }

    async fn run(&self) -> Result<(), ActionError> {
        self.backend.delete(self.payload.key.as_bytes()).await?;
        Ok(())
    }
}
