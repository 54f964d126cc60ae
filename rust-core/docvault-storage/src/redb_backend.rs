// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// redb-backed persistent grid backend for DocVault.
//
// A single-node stand-in for a replicated grid: every write is its own redb
// write transaction, committed (and fsynced) before the call returns, which
// gives the same per-write durability the distributed log expects from a
// real grid. Compare-and-swap runs inside one write transaction, so it is
// atomic with respect to every other writer on the database.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use tracing::debug;

use crate::backend::StorageBackend;
use crate::error::StorageError;

const GRID_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("grid");

/// A persistent grid backend powered by redb.
pub struct RedbBackend {
    db: Arc<Database>,
    path: PathBuf,
}

impl RedbBackend {
    /// Open or create a redb database at the given path.
    ///
    /// Creates parent directories if they don't exist. The table is created
    /// on first write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(StorageError::Io)?;
        }

        let db = Database::create(&path).map_err(|e| {
            StorageError::BackendUnavailable(format!(
                "failed to open redb at {}: {}",
                path.display(),
                e
            ))
        })?;

        debug!(path = %path.display(), "opened redb grid backend");

        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    /// Return the filesystem path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `op` against the grid table on a blocking thread. A table that
    /// has never been written reads as `empty`.
    async fn read<T, F>(&self, empty: T, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&redb::ReadOnlyTable<&'static [u8], &'static [u8]>) -> Result<T, StorageError>
            + Send
            + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || -> Result<T, StorageError> {
            let txn = db
                .begin_read()
                .map_err(|e| StorageError::BackendUnavailable(format!("read txn: {e}")))?;
            match txn.open_table(GRID_TABLE) {
                Ok(table) => op(&table),
                Err(redb::TableError::TableDoesNotExist(_)) => Ok(empty),
                Err(e) => Err(StorageError::BackendUnavailable(format!("open table: {e}"))),
            }
        })
        .await
        .map_err(|e| StorageError::BackendUnavailable(format!("task join: {e}")))?
    }

    /// Run `op` inside a write transaction on a blocking thread, committing
    /// only if it succeeds.
    async fn write<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&WriteTransaction) -> Result<T, StorageError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || -> Result<T, StorageError> {
            let txn = db
                .begin_write()
                .map_err(|e| StorageError::BackendUnavailable(format!("write txn: {e}")))?;
            let out = op(&txn)?;
            txn.commit()
                .map_err(|e| StorageError::CorruptedData(format!("commit: {e}")))?;
            Ok(out)
        })
        .await
        .map_err(|e| StorageError::BackendUnavailable(format!("task join: {e}")))?
    }
}

impl std::fmt::Debug for RedbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbBackend")
            .field("path", &self.path)
            .finish()
    }
}

#[async_trait]
impl StorageBackend for RedbBackend {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let key = key.to_vec();
        self.read(None, move |table| {
            Ok(table
                .get(key.as_slice())
                .map_err(|e| StorageError::CorruptedData(format!("get: {e}")))?
                .map(|value| value.value().to_vec()))
        })
        .await
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let key = key.to_vec();
        let value = value.to_vec();
        self.write(move |txn| {
            let mut table = txn
                .open_table(GRID_TABLE)
                .map_err(|e| StorageError::BackendUnavailable(format!("open table: {e}")))?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(|e| StorageError::CorruptedData(format!("insert: {e}")))?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &[u8]) -> Result<bool, StorageError> {
        let key = key.to_vec();
        self.write(move |txn| {
            let mut table = txn
                .open_table(GRID_TABLE)
                .map_err(|e| StorageError::BackendUnavailable(format!("open table: {e}")))?;
            let existed = table
                .remove(key.as_slice())
                .map_err(|e| StorageError::CorruptedData(format!("remove: {e}")))?
                .is_some();
            Ok(existed)
        })
        .await
    }

    async fn exists(&self, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let prefix = prefix.to_vec();
        self.read(Vec::new(), move |table| {
            let mut found = Vec::new();
            let range = table
                .range(prefix.as_slice()..)
                .map_err(|e| StorageError::CorruptedData(format!("range scan: {e}")))?;
            for entry in range {
                let (k, v) =
                    entry.map_err(|e| StorageError::CorruptedData(format!("scan entry: {e}")))?;
                let k = k.value().to_vec();
                if found.len() >= limit || !k.starts_with(&prefix) {
                    break;
                }
                found.push((k, v.value().to_vec()));
            }
            Ok(found)
        })
        .await
    }

    async fn delete_prefix(&self, prefix: &[u8]) -> Result<usize, StorageError> {
        let prefix = prefix.to_vec();
        self.write(move |txn| {
            let mut table = txn
                .open_table(GRID_TABLE)
                .map_err(|e| StorageError::BackendUnavailable(format!("open table: {e}")))?;
            let mut doomed = Vec::new();
            {
                let iter = table
                    .range(prefix.as_slice()..)
                    .map_err(|e| StorageError::CorruptedData(format!("range scan: {e}")))?;
                for entry in iter {
                    let entry = entry
                        .map_err(|e| StorageError::CorruptedData(format!("scan entry: {e}")))?;
                    let k = entry.0.value().to_vec();
                    if !k.starts_with(&prefix) {
                        break;
                    }
                    doomed.push(k);
                }
            }
            for key in &doomed {
                table
                    .remove(key.as_slice())
                    .map_err(|e| StorageError::CorruptedData(format!("remove: {e}")))?;
            }
            Ok(doomed.len())
        })
        .await
    }

    async fn compare_and_swap(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> Result<bool, StorageError> {
        let key = key.to_vec();
        let expected = expected.map(<[u8]>::to_vec);
        let new = new.map(<[u8]>::to_vec);
        self.write(move |txn| {
            let mut table = txn
                .open_table(GRID_TABLE)
                .map_err(|e| StorageError::BackendUnavailable(format!("open table: {e}")))?;
            let current = table
                .get(key.as_slice())
                .map_err(|e| StorageError::CorruptedData(format!("get: {e}")))?
                .map(|v| v.value().to_vec());
            if current != expected {
                return Ok(false);
            }
            match &new {
                Some(value) => {
                    table
                        .insert(key.as_slice(), value.as_slice())
                        .map_err(|e| StorageError::CorruptedData(format!("insert: {e}")))?;
                }
                None => {
                    table
                        .remove(key.as_slice())
                        .map_err(|e| StorageError::CorruptedData(format!("remove: {e}")))?;
                }
            }
            Ok(true)
        })
        .await
    }

    async fn flush(&self) -> Result<(), StorageError> {
        // Each write transaction is fsynced on commit.
        Ok(())
    }

    fn name(&self) -> &str {
        "redb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn temp_backend() -> (RedbBackend, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let backend = RedbBackend::open(dir.path().join("grid.redb")).unwrap();
        (backend, dir)
    }

    #[tokio::test]
    async fn test_basic_crud() {
        let (backend, _dir) = temp_backend();

        assert_eq!(backend.get(b"key1").await.unwrap(), None);
        backend.put(b"key1", b"value1").await.unwrap();
        assert_eq!(backend.get(b"key1").await.unwrap(), Some(b"value1".to_vec()));
        assert!(backend.exists(b"key1").await.unwrap());
        assert!(backend.delete(b"key1").await.unwrap());
        assert!(!backend.delete(b"key1").await.unwrap());
    }

    #[tokio::test]
    async fn test_scan_and_delete_prefix() {
        let (backend, _dir) = temp_backend();
        backend.put(b"txlog:t1:2", b"b").await.unwrap();
        backend.put(b"txlog:t1:1", b"a").await.unwrap();
        backend.put(b"txlog:t2:1", b"c").await.unwrap();

        let results = backend.scan_prefix(b"txlog:t1:", 10).await.unwrap();
        assert_eq!(
            results,
            vec![
                (b"txlog:t1:1".to_vec(), b"a".to_vec()),
                (b"txlog:t1:2".to_vec(), b"b".to_vec()),
            ]
        );

        assert_eq!(backend.delete_prefix(b"txlog:t1:").await.unwrap(), 2);
        assert_eq!(backend.scan_prefix(b"txlog:", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let (backend, _dir) = temp_backend();
        assert!(backend.compare_and_swap(b"k", None, Some(b"1")).await.unwrap());
        assert!(!backend.compare_and_swap(b"k", None, Some(b"2")).await.unwrap());
        assert!(backend
            .compare_and_swap(b"k", Some(b"1"), Some(b"2"))
            .await
            .unwrap());
        assert!(backend.compare_and_swap(b"k", Some(b"2"), None).await.unwrap());
        assert_eq!(backend.get(b"k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persist.redb");

        {
            let backend = RedbBackend::open(&path).unwrap();
            backend.put(b"txmeta:t1", b"{}").await.unwrap();
        }

        let backend = RedbBackend::open(&path).unwrap();
        assert_eq!(backend.get(b"txmeta:t1").await.unwrap(), Some(b"{}".to_vec()));
        assert_eq!(backend.name(), "redb");
    }
}
