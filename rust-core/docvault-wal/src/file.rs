// SPDX-License-Identifier: PMPL-1.0-or-later
//
// DocVault Write-Ahead Log - File-backed log
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// One append-only `tx.log` per process. Opening the log runs crash recovery
// before anything else can append:
//
//   1. forward scan   -> the set of transactions with a completion marker
//   2. reverse scan   -> ROLLBACK actions of every incomplete transaction
//   3. forward scan   -> COMMIT actions of every completed transaction
//   4. truncate the log to zero length and fsync
//
// Step 3 re-applies finalization steps of transactions that completed before
// the crash, which is why actions must be idempotent.
//
// Completed transactions accumulate in the file until more than
// `prune_after_completed` completions have been logged; the log is then
// compacted so only entries of undecided transactions remain.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::action::{Action, ActionRegistry};
use crate::config::WalConfig;
use crate::entry::{ActionKind, ActionRecord, LogEntry, TransactionId};
use crate::error::WalResult;
use crate::log::{run_records, ReplayReport, WriteAheadLog};
use crate::reader::read_log_entries;
use crate::writer::LogWriter;

/// What crash recovery did when the log was opened.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Valid entries found in the log.
    pub entries_scanned: usize,
    /// Incomplete transactions whose ROLLBACK actions were applied.
    pub transactions_rolled_back: usize,
    /// Completed transactions whose COMMIT actions were (re-)applied.
    pub transactions_finalized: usize,
    /// Actions that could not be rebuilt or whose `run()` failed.
    pub action_failures: usize,
}

struct LogState {
    writer: LogWriter,
    completed_since_prune: usize,
}

/// Write-ahead log stored in a single local file.
pub struct FileWriteAheadLog {
    state: RwLock<LogState>,
    registry: Arc<ActionRegistry>,
    log_path: PathBuf,
    prune_after_completed: usize,
    recovery: RecoveryStats,
}

impl FileWriteAheadLog {
    /// Open the log in `config.log_dir`, recovering from whatever a previous
    /// process left behind.
    ///
    /// `registry` must already hold a decoder for every action name that can
    /// appear in the log.
    pub async fn open(config: &WalConfig, registry: Arc<ActionRegistry>) -> WalResult<Self> {
        fs::create_dir_all(&config.log_dir)?;
        let log_path = config.log_path();

        let entries = scan_log(log_path.clone()).await?;
        let next_sequence = entries.iter().map(|e| e.sequence).max().unwrap_or(0) + 1;

        let mut writer = LogWriter::open(&log_path, config.sync_mode, next_sequence)?;
        let recovery = recover(&registry, &entries).await;
        writer.truncate()?;

        info!(
            path = %log_path.display(),
            entries = recovery.entries_scanned,
            rolled_back = recovery.transactions_rolled_back,
            finalized = recovery.transactions_finalized,
            failures = recovery.action_failures,
            next_sequence,
            "Transaction log recovered"
        );

        Ok(Self {
            state: RwLock::new(LogState {
                writer,
                completed_since_prune: 0,
            }),
            registry,
            log_path,
            prune_after_completed: config.prune_after_completed,
            recovery,
        })
    }

    /// Statistics of the recovery performed by [`FileWriteAheadLog::open`].
    pub fn recovery_stats(&self) -> RecoveryStats {
        self.recovery
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Compact the log now, keeping only entries of incomplete transactions.
    ///
    /// Returns the number of entries dropped.
    pub async fn prune(&self) -> WalResult<usize> {
        let mut state = self.state.write().await;
        prune_locked(&mut state).await
    }

    /// Read the log and collect the records of `kind` for `transaction_id`.
    async fn records_for(
        &self,
        transaction_id: &TransactionId,
        kind: ActionKind,
    ) -> WalResult<Vec<ActionRecord>> {
        let _state = self.state.read().await;
        let entries = scan_log(self.log_path.clone()).await?;
        Ok(entries
            .into_iter()
            .filter(|e| &e.transaction_id == transaction_id)
            .filter_map(|e| match e.as_action() {
                Some((k, record)) if k == kind => Some(record.clone()),
                _ => None,
            })
            .collect())
    }
}

#[async_trait]
impl WriteAheadLog for FileWriteAheadLog {
    async fn log_action(
        &self,
        transaction_id: &TransactionId,
        kind: ActionKind,
        action: &dyn Action,
    ) -> WalResult<u64> {
        let record = action.to_record()?;
        let entry = LogEntry::action(transaction_id.clone(), kind, record);

        let mut state = self.state.write().await;
        let sequence = state.writer.append(entry)?;
        debug!(transaction_id = %transaction_id, %kind, action = action.name(), sequence, "Logged action");
        Ok(sequence)
    }

    async fn log_completion(&self, transaction_id: &TransactionId) -> WalResult<u64> {
        let mut state = self.state.write().await;
        let sequence = state
            .writer
            .append(LogEntry::completion(transaction_id.clone()))?;
        state.completed_since_prune += 1;
        debug!(transaction_id = %transaction_id, sequence, "Logged completion");

        // The completion is durable at this point; a failed prune is retried
        // on the next completion since the counter is left as is.
        if state.completed_since_prune > self.prune_after_completed {
            if let Err(e) = prune_locked(&mut state).await {
                warn!(
                    path = %self.log_path.display(),
                    pending_completions = state.completed_since_prune,
                    error = %e,
                    "Transaction log prune failed"
                );
            }
        }
        Ok(sequence)
    }

    async fn apply_logged_actions(
        &self,
        transaction_id: &TransactionId,
        kind: ActionKind,
        reverse_order: bool,
    ) -> WalResult<ReplayReport> {
        let mut records = self.records_for(transaction_id, kind).await?;
        if reverse_order {
            records.reverse();
        }
        Ok(run_records(&self.registry, transaction_id, kind, &records).await)
    }

    async fn sync(&self) -> WalResult<()> {
        self.state.write().await.writer.sync()
    }

    async fn pending_transactions(&self) -> WalResult<Vec<TransactionId>> {
        let _state = self.state.read().await;
        let entries = scan_log(self.log_path.clone()).await?;
        Ok(incomplete_transactions(&entries))
    }
}

/// Undo undecided transactions and re-finalize completed ones.
async fn recover(registry: &ActionRegistry, entries: &[LogEntry]) -> RecoveryStats {
    let completed: HashSet<&TransactionId> = entries
        .iter()
        .filter(|e| e.is_completion())
        .map(|e| &e.transaction_id)
        .collect();

    let mut stats = RecoveryStats {
        entries_scanned: entries.len(),
        transactions_finalized: completed.len(),
        transactions_rolled_back: incomplete_transactions(entries).len(),
        ..RecoveryStats::default()
    };

    for entry in entries.iter().rev() {
        if let Some((ActionKind::Rollback, record)) = entry.as_action() {
            if !completed.contains(&entry.transaction_id) {
                let report =
                    run_records(registry, &entry.transaction_id, ActionKind::Rollback, [record]).await;
                stats.action_failures += report.failed;
            }
        }
    }

    for entry in entries {
        if let Some((ActionKind::Commit, record)) = entry.as_action() {
            if completed.contains(&entry.transaction_id) {
                let report =
                    run_records(registry, &entry.transaction_id, ActionKind::Commit, [record]).await;
                stats.action_failures += report.failed;
            }
        }
    }

    stats
}

/// Transactions with action entries and no completion marker, in order of
/// first appearance.
fn incomplete_transactions(entries: &[LogEntry]) -> Vec<TransactionId> {
    let completed: HashSet<&TransactionId> = entries
        .iter()
        .filter(|e| e.is_completion())
        .map(|e| &e.transaction_id)
        .collect();

    let mut seen = HashSet::new();
    entries
        .iter()
        .filter(|e| e.as_action().is_some() && !completed.contains(&e.transaction_id))
        .filter(|e| seen.insert(&e.transaction_id))
        .map(|e| e.transaction_id.clone())
        .collect()
}

/// Read the whole log on the blocking pool.
async fn scan_log(path: PathBuf) -> WalResult<Vec<LogEntry>> {
    tokio::task::spawn_blocking(move || read_log_entries(&path))
        .await
        .map_err(std::io::Error::other)?
}

async fn prune_locked(state: &mut LogState) -> WalResult<usize> {
    let log_path = state.writer.path().to_path_buf();
    let entries = scan_log(log_path.clone()).await?;
    let before = entries.len();

    let mut compact_name = log_path.clone().into_os_string();
    compact_name.push(".compact");
    let compact_path = PathBuf::from(compact_name);

    let target = compact_path.clone();
    let kept = tokio::task::spawn_blocking(move || write_compacted(&target, &entries))
        .await
        .map_err(std::io::Error::other)?;
    let kept = match kept {
        Ok(kept) => kept,
        Err(e) => {
            let _ = fs::remove_file(&compact_path);
            return Err(e);
        }
    };

    state.writer.replace_with(&compact_path)?;
    state.completed_since_prune = 0;

    let dropped = before - kept;
    info!(path = %log_path.display(), kept, dropped, "Pruned transaction log");
    Ok(dropped)
}

/// Write the entries of incomplete transactions to `path` and fsync it.
fn write_compacted(path: &Path, entries: &[LogEntry]) -> WalResult<usize> {
    let completed: HashSet<&TransactionId> = entries
        .iter()
        .filter(|e| e.is_completion())
        .map(|e| &e.transaction_id)
        .collect();

    let mut file = File::create(path)?;
    let mut kept = 0usize;
    for entry in entries
        .iter()
        .filter(|e| !completed.contains(&e.transaction_id))
    {
        file.write_all(&entry.serialize())?;
        kept += 1;
    }
    file.sync_all()?;
    Ok(kept)
}
