// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Lease locks on the grid.
//
// A lease is a single key holding `{owner, expires_at_ms}`. Acquisition and
// release are compare-and-swap operations against the exact value read, so
// two nodes racing for the same lease cannot both win. A lease whose holder
// died expires and can be taken over.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::StorageBackend;
use crate::error::StorageError;

/// A named, time-bounded mutual exclusion lock shared by every node
/// attached to the same grid.
#[async_trait]
pub trait GridLock: Send + Sync {
    /// Try to take (or renew) the lease `name` for `owner`.
    ///
    /// Returns `Ok(false)` without waiting if another live owner holds it.
    async fn try_acquire(
        &self,
        name: &str,
        owner: &str,
        lease: Duration,
    ) -> Result<bool, StorageError>;

    /// Release the lease if `owner` still holds it.
    async fn release(&self, name: &str, owner: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct LeaseRecord {
    owner: String,
    expires_at_ms: i64,
}

/// [`GridLock`] implemented with [`StorageBackend::compare_and_swap`].
#[derive(Debug, Clone)]
pub struct StorageLeaseLock<B: StorageBackend> {
    backend: B,
}

impl<B: StorageBackend> StorageLeaseLock<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    fn key(name: &str) -> Vec<u8> {
        format!("lease:{name}").into_bytes()
    }
}

#[async_trait]
impl<B: StorageBackend> GridLock for StorageLeaseLock<B> {
    async fn try_acquire(
        &self,
        name: &str,
        owner: &str,
        lease: Duration,
    ) -> Result<bool, StorageError> {
        let key = Self::key(name);
        let now_ms = Utc::now().timestamp_millis();
        let current = self.backend.get(&key).await?;

        if let Some(bytes) = &current {
            let record: LeaseRecord = serde_json::from_slice(bytes)
                .map_err(|e| StorageError::CorruptedData(format!("lease {name}: {e}")))?;
            if record.owner != owner && record.expires_at_ms > now_ms {
                return Ok(false);
            }
        }

        let next = LeaseRecord {
            owner: owner.to_string(),
            expires_at_ms: now_ms + lease.as_millis() as i64,
        };
        let next_bytes = serde_json::to_vec(&next)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        let acquired = self
            .backend
            .compare_and_swap(&key, current.as_deref(), Some(&next_bytes))
            .await?;
        debug!(lease = name, owner, acquired, "Lease acquisition attempt");
        Ok(acquired)
    }

    async fn release(&self, name: &str, owner: &str) -> Result<(), StorageError> {
        let key = Self::key(name);
        let Some(bytes) = self.backend.get(&key).await? else {
            return Ok(());
        };
        let record: LeaseRecord = serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::CorruptedData(format!("lease {name}: {e}")))?;
        if record.owner == owner {
            // Losing this race means someone else took over an expired lease.
            self.backend.compare_and_swap(&key, Some(&bytes), None).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;

    #[tokio::test]
    async fn test_exclusive_until_released() {
        let grid = InMemoryBackend::new();
        let node_a = StorageLeaseLock::new(grid.clone());
        let node_b = StorageLeaseLock::new(grid.clone());
        let lease = Duration::from_secs(60);

        assert!(node_a.try_acquire("sweeper", "a", lease).await.unwrap());
        assert!(!node_b.try_acquire("sweeper", "b", lease).await.unwrap());

        // Renewal by the holder succeeds.
        assert!(node_a.try_acquire("sweeper", "a", lease).await.unwrap());

        // Release by a non-holder is ignored.
        node_b.release("sweeper", "b").await.unwrap();
        assert!(!node_b.try_acquire("sweeper", "b", lease).await.unwrap());

        node_a.release("sweeper", "a").await.unwrap();
        assert!(node_b.try_acquire("sweeper", "b", lease).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lease_is_taken_over() {
        let grid = InMemoryBackend::new();
        let lock = StorageLeaseLock::new(grid);

        assert!(lock
            .try_acquire("sweeper", "a", Duration::from_millis(0))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(lock
            .try_acquire("sweeper", "b", Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_independent_names() {
        let lock = StorageLeaseLock::new(InMemoryBackend::new());
        let lease = Duration::from_secs(60);
        assert!(lock.try_acquire("one", "a", lease).await.unwrap());
        assert!(lock.try_acquire("two", "b", lease).await.unwrap());
    }
}
