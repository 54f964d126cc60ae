// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core key-value backend trait for DocVault.
//
// The transactional layer needs very little from its medium: point reads and
// writes, ordered prefix scans (log entries are keyed so that a scan returns
// them in registration order), and one atomic primitive, compare-and-swap,
// from which the sweeper lease is built.

use async_trait::async_trait;

use crate::error::StorageError;

/// A pluggable key-value backend.
///
/// Keys and values are opaque bytes. [`crate::typed::TypedStore`] layers JSON
/// values and namespaces on top.
///
/// Implementations must be safe to share across threads and tokio tasks.
/// A replicated grid is expected to make each successful write durable on
/// return; `flush` exists for backends that buffer.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieve the value associated with `key`.
    ///
    /// Returns `Ok(None)` if the key does not exist, rather than an error.
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store a key-value pair, overwriting any previous value for `key`.
    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    /// Delete the value associated with `key`.
    ///
    /// Returns `Ok(true)` if the key existed and was removed.
    async fn delete(&self, key: &[u8]) -> Result<bool, StorageError>;

    /// Check whether `key` exists without retrieving its value.
    async fn exists(&self, key: &[u8]) -> Result<bool, StorageError>;

    /// Scan all keys that start with `prefix`, returning up to `limit`
    /// (key, value) pairs in lexicographic key order.
    async fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;

    /// Remove every key starting with `prefix`. Returns the number removed.
    async fn delete_prefix(&self, prefix: &[u8]) -> Result<usize, StorageError>;

    /// Atomically replace the value under `key` if it currently equals
    /// `expected` (`None` meaning "absent"). `new = None` deletes the key.
    ///
    /// Returns `Ok(true)` if the swap happened.
    async fn compare_and_swap(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> Result<bool, StorageError>;

    /// Flush any buffered writes to durable storage.
    async fn flush(&self) -> Result<(), StorageError>;

    /// A human-readable name for this backend, used in logging.
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: StorageBackend + ?Sized> StorageBackend for std::sync::Arc<T> {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).get(key).await
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        (**self).put(key, value).await
    }

    async fn delete(&self, key: &[u8]) -> Result<bool, StorageError> {
        (**self).delete(key).await
    }

    async fn exists(&self, key: &[u8]) -> Result<bool, StorageError> {
        (**self).exists(key).await
    }

    async fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        (**self).scan_prefix(prefix, limit).await
    }

    async fn delete_prefix(&self, prefix: &[u8]) -> Result<usize, StorageError> {
        (**self).delete_prefix(prefix).await
    }

    async fn compare_and_swap(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> Result<bool, StorageError> {
        (**self).compare_and_swap(key, expected, new).await
    }

    async fn flush(&self) -> Result<(), StorageError> {
        (**self).flush().await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
