// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// DocVault Transactional Archive Stores
//
// Storage backends that make non-transactional media follow the outcome of
// a logical transaction. Each mutating operation on a named document:
//
//   1. takes the document's write lock,
//   2. backs up the current contents (if any) and logs a ROLLBACK action
//      that restores them plus a COMMIT action that drops the backup,
//      or, for a new document, logs a ROLLBACK action that removes it,
//   3. performs the mutation.
//
// The actions are logged through a `docvault_wal::TransactionWal`, so they
// survive a crash and are replayed by recovery (file-backed log) or by the
// sweeper (distributed log).
//
// # Modules
//
// - [`fs_store`] -- `TransactionalFileStore`, documents as files.
// - [`object_store`] -- `TransactionalObjectStore`, documents as values in a
//   `docvault_storage::StorageBackend`.
// - [`locks`] -- `ResourceLocks`, the per-document read/write lock table.
// - [`error`] -- `ArchiveError`.
//
// Register each store's actions in the `ActionRegistry` before opening the
// log; a file-backed log needs the decoders during recovery.

pub mod error;
pub mod fs_store;
pub mod locks;
pub mod object_store;

pub use error::{ArchiveError, ArchiveResult};
pub use fs_store::{PurgeFile, RemoveFile, RestoreFile, TransactionalFileStore};
pub use locks::{ResourceGuard, ResourceLocks, ResourceReadGuard, ResourceWriteGuard};
pub use object_store::{PurgeObject, RemoveObject, RestoreObject, TransactionalObjectStore};
