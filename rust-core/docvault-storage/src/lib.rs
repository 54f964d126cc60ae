// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// DocVault Key-Value Grid Abstraction
//
// This crate provides the key-value medium the transactional layer sits on.
// It plays two roles: the replicated grid behind the distributed write-ahead
// log (transaction metadata and log entries live in namespaced maps), and the
// byte store behind the transactional object store.
//
// # Modules
//
// - [`backend`] -- The `StorageBackend` trait, including compare-and-swap.
// - [`error`] -- The `StorageError` enum covering all backend failure modes.
// - [`memory`] -- An in-memory `BTreeMap`-based backend for tests and
//   single-node deployments.
// - [`typed`] -- A serde-based typed wrapper with namespace prefixing.
// - [`lease`] -- A lease lock built on compare-and-swap, used to elect the
//   single node that runs background sweeps.
//
// # Example
//
// ```rust
// use docvault_storage::backend::StorageBackend;
// use docvault_storage::memory::InMemoryBackend;
// use docvault_storage::typed::TypedStore;
//
// # tokio_test::block_on(async {
// let grid = InMemoryBackend::new();
// let store = TypedStore::new(grid, "txmeta");
// store.put("tx-1", &serde_json::json!({"attempts": 0})).await.unwrap();
//
// let val: serde_json::Value = store.get("tx-1").await.unwrap().unwrap();
// assert_eq!(val["attempts"], 0);
// # });
// ```

pub mod backend;
pub mod error;
pub mod lease;
pub mod memory;
pub mod typed;

// Optional persistent backends -- feature-gated to keep the default build lean.
#[cfg(feature = "redb-backend")]
pub mod redb_backend;

pub use backend::StorageBackend;
pub use error::StorageError;
pub use lease::{GridLock, StorageLeaseLock};
pub use memory::InMemoryBackend;
pub use typed::TypedStore;

#[cfg(feature = "redb-backend")]
pub use redb_backend::RedbBackend;
