// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Typed, namespaced view over a grid backend.
//
// The distributed log keeps two logical maps (transaction metadata and log
// entries) on one physical grid; each is a `TypedStore` with its own
// namespace. Values are JSON.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::backend::StorageBackend;
use crate::error::StorageError;

/// A typed wrapper around a [`StorageBackend`] that handles serialization
/// and namespace prefixing.
///
/// Keys are stored as `"{namespace}:{key}"`.
///
/// # Example
///
/// ```rust
/// use docvault_storage::memory::InMemoryBackend;
/// use docvault_storage::typed::TypedStore;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Serialize, Deserialize, PartialEq)]
/// struct Meta { attempts: u32 }
///
/// # tokio_test::block_on(async {
/// let store = TypedStore::new(InMemoryBackend::new(), "txmeta");
/// store.put("tx-1", &Meta { attempts: 2 }).await.unwrap();
///
/// let meta: Meta = store.get("tx-1").await.unwrap().unwrap();
/// assert_eq!(meta, Meta { attempts: 2 });
/// # });
/// ```
pub struct TypedStore<B: StorageBackend> {
    backend: B,
    namespace: String,
}

impl<B: StorageBackend> TypedStore<B> {
    /// Create a new typed store wrapping `backend` with the given namespace.
    pub fn new(backend: B, namespace: &str) -> Self {
        Self {
            backend,
            namespace: namespace.to_string(),
        }
    }

    /// Return a reference to the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Return the namespace prefix used by this store.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn prefixed_key(&self, key: &str) -> Vec<u8> {
        format!("{}:{}", self.namespace, key).into_bytes()
    }

    /// Retrieve and deserialize a value by its logical key.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.backend.get(&self.prefixed_key(key)).await? {
            Some(bytes) => decode(key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Serialize and store a value under the given logical key.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(value).map_err(|err| {
            StorageError::SerializationError(format!(
                "failed to serialize value for key '{key}': {err}"
            ))
        })?;
        self.backend.put(&self.prefixed_key(key), &bytes).await
    }

    /// Delete a value by its logical key.
    pub async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.backend.delete(&self.prefixed_key(key)).await
    }

    /// Delete every value whose logical key starts with `key_prefix`.
    pub async fn delete_prefix(&self, key_prefix: &str) -> Result<usize, StorageError> {
        self.backend.delete_prefix(&self.prefixed_key(key_prefix)).await
    }

    /// Scan all entries whose logical key starts with `key_prefix`, returning
    /// up to `limit` deserialized (logical key, value) pairs in key order.
    pub async fn scan_prefix<T: DeserializeOwned>(
        &self,
        key_prefix: &str,
        limit: usize,
    ) -> Result<Vec<(String, T)>, StorageError> {
        let ns_len = self.namespace.len() + 1;
        let raw = self
            .backend
            .scan_prefix(&self.prefixed_key(key_prefix), limit)
            .await?;

        let mut results = Vec::with_capacity(raw.len());
        for (raw_key, raw_value) in raw {
            let logical_key = String::from_utf8_lossy(&raw_key[ns_len.min(raw_key.len())..])
                .to_string();
            let value = decode(&logical_key, &raw_value)?;
            results.push((logical_key, value));
        }
        Ok(results)
    }
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, StorageError> {
    serde_json::from_slice(bytes).map_err(|err| {
        StorageError::SerializationError(format!(
            "failed to deserialize value for key '{key}': {err}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Record {
        owner: String,
        attempts: u32,
    }

    #[tokio::test]
    async fn test_typed_round_trip_and_delete() {
        let store = TypedStore::new(InMemoryBackend::new(), "txmeta");
        let record = Record {
            owner: "node-a".to_string(),
            attempts: 1,
        };

        store.put("t1", &record).await.unwrap();
        assert_eq!(store.get::<Record>("t1").await.unwrap(), Some(record));
        assert!(store.get::<Record>("missing").await.unwrap().is_none());

        assert!(store.delete("t1").await.unwrap());
        assert!(!store.delete("t1").await.unwrap());
    }

    #[tokio::test]
    async fn test_namespace_isolation() {
        let backend = InMemoryBackend::new();
        let meta = TypedStore::new(backend.clone(), "txmeta");
        let log = TypedStore::new(backend.clone(), "txlog");

        meta.put("t1", &1u32).await.unwrap();
        log.put("t1:00000000000000000001", &2u32).await.unwrap();

        let scanned: Vec<(String, u32)> = log.scan_prefix("t1:", 10).await.unwrap();
        assert_eq!(scanned, vec![("t1:00000000000000000001".to_string(), 2)]);

        assert_eq!(log.delete_prefix("t1:").await.unwrap(), 1);
        assert_eq!(meta.get::<u32>("t1").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_deserialization_error() {
        let backend = InMemoryBackend::new();
        let store = TypedStore::new(backend.clone(), "bad");
        backend.put(b"bad:broken", b"not-json").await.unwrap();

        match store.get::<Record>("broken").await {
            Err(StorageError::SerializationError(msg)) => {
                assert!(msg.contains("failed to deserialize"));
            }
            other => panic!("expected SerializationError, got: {other:?}"),
        }
    }
}
