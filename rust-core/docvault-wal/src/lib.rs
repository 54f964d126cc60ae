// SPDX-License-Identifier: PMPL-1.0-or-later
//
// DocVault Write-Ahead Log (WAL) crate
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Makes mutations of non-transactional media (files, object stores)
// atomic with the logical transaction that performs them. Before a storage
// backend changes anything it logs compensating actions: ROLLBACK actions
// that undo the change and COMMIT actions that finalize it (for example by
// deleting a backup). Once the outcome is known the log replays the right
// kind, in the right order, and marks the transaction completed.
//
// # Architecture
//
// - `entry`       -- transaction ids, action records, log entries, frame codec
// - `action`      -- the `Action` trait and the name -> decoder registry
// - `log`         -- the `WriteAheadLog` contract shared by both variants
// - `writer`/`reader` -- append and scan of the single `tx.log` file
// - `file`        -- file-backed log with restart recovery and pruning
// - `distributed` -- grid-backed log with a lease-elected timeout sweeper
// - `transaction` -- `TransactionWal`, the per-unit-of-work state machine
// - `config`      -- `WalConfig` / `DistributedWalConfig` with env overrides
//
// Actions are run at least once. Recovery of the file-backed log re-applies
// the COMMIT actions of every completed transaction still present in the
// file, and the sweeper retries rollbacks that partially failed, so every
// action MUST be idempotent.
//
// ## Usage
//
// ```no_run
// use std::sync::Arc;
// use docvault_wal::{ActionRegistry, FileWriteAheadLog, TransactionWal, WalConfig};
//
// # async fn demo() -> docvault_wal::WalResult<()> {
// let registry = ActionRegistry::new(); // backends register their actions here
// let log = Arc::new(FileWriteAheadLog::open(&WalConfig::default(), Arc::new(registry)).await?);
//
// let mut tx = TransactionWal::new(log);
// // ... backends call tx.append_undo_action / tx.append_commit_action ...
// tx.commit().await?;
// # Ok(())
// # }
// ```

pub mod action;
pub mod config;
pub mod distributed;
pub mod entry;
pub mod error;
pub mod file;
pub mod log;
pub mod reader;
pub mod transaction;
pub mod writer;

// Re-export the primary public API for ergonomic imports.
pub use action::{json_payload, Action, ActionDecoder, ActionRegistry};
pub use config::{DistributedWalConfig, WalConfig, LOG_FILE_NAME};
pub use distributed::{
    DistributedWriteAheadLog, SweepReport, SweeperHandle, TransactionRecord, SWEEPER_LEASE,
};
pub use entry::{ActionKind, ActionRecord, EntryBody, EventType, LogEntry, TransactionId};
pub use error::{ActionError, WalError, WalResult};
pub use file::{FileWriteAheadLog, RecoveryStats};
pub use log::{ReplayReport, WriteAheadLog};
pub use reader::{decode_frames, read_log_entries};
pub use transaction::{CompletionStatus, TransactionState, TransactionWal};
pub use writer::{LogWriter, SyncMode};
