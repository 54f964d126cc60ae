// SPDX-License-Identifier: PMPL-1.0-or-later
//
// DocVault Write-Ahead Log - Distributed log over a shared grid
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Every node of a cluster writes its transactions into two namespaces of a
// replicated key-value grid:
//
//   txmeta:{transaction_id}              -> TransactionRecord (JSON)
//   txlog:{id_len}:{transaction_id}:{seq:020}  -> LogEntry (JSON)
//
// Zero-padded sequences make a prefix scan return entries in registration
// order. The id length in front keeps one id from being a key prefix of
// another (`a` vs `a:b`). Completion deletes both immediately, so anything still present in
// `txmeta` is undecided.
//
// There is no restart-time recovery here. Instead one node at a time (the
// holder of the "docvault-wal-sweeper" grid lease) periodically rolls back
// transactions that stayed undecided for longer than the configured timeout,
// retrying partial failures up to `max_recovery_attempts` times before it
// forces completion.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docvault_storage::{GridLock, StorageBackend, TypedStore};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::action::{Action, ActionRegistry};
use crate::config::DistributedWalConfig;
use crate::entry::{ActionKind, LogEntry, TransactionId};
use crate::error::WalResult;
use crate::log::{run_records, ReplayReport, WriteAheadLog};

/// Grid lease that elects the sweeping node.
pub const SWEEPER_LEASE: &str = "docvault-wal-sweeper";

const METADATA_NAMESPACE: &str = "txmeta";
const ENTRY_NAMESPACE: &str = "txlog";

/// Per-transaction bookkeeping kept in the `txmeta` namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: TransactionId,
    /// Time of the first logged entry; the auto-rollback timeout counts from here.
    pub started_at: DateTime<Utc>,
    /// Failed sweeper rollbacks so far.
    pub recovery_attempts: u32,
    /// Sequence the next entry of this transaction receives.
    pub next_sequence: u64,
}

impl TransactionRecord {
    fn new(transaction_id: TransactionId) -> Self {
        Self {
            transaction_id,
            started_at: Utc::now(),
            recovery_attempts: 0,
            next_sequence: 1,
        }
    }
}

/// Result of one sweeper pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Another node holds the sweeper lease; nothing was examined.
    pub skipped: bool,
    /// Overdue transactions processed.
    pub examined: usize,
    /// Rolled back cleanly and completed.
    pub rolled_back: usize,
    /// Partially failed; retry count bumped for the next pass.
    pub retried: usize,
    /// Gave up after `max_recovery_attempts` and forced completion.
    pub exhausted: usize,
    /// Transactions the sweeper could not process because the grid failed.
    pub errors: usize,
}

enum SweepOutcome {
    RolledBack,
    Retried,
    Exhausted,
}

/// Write-ahead log stored in a shared grid.
pub struct DistributedWriteAheadLog {
    metadata: TypedStore<Arc<dyn StorageBackend>>,
    entries: TypedStore<Arc<dyn StorageBackend>>,
    grid: Arc<dyn StorageBackend>,
    lock: Arc<dyn GridLock>,
    registry: Arc<ActionRegistry>,
    config: DistributedWalConfig,
    // Serializes read-modify-write of metadata records on this node.
    metadata_guard: Mutex<()>,
}

impl DistributedWriteAheadLog {
    pub fn new(
        grid: Arc<dyn StorageBackend>,
        lock: Arc<dyn GridLock>,
        registry: Arc<ActionRegistry>,
        config: DistributedWalConfig,
    ) -> Self {
        info!(
            node_id = %config.node_id,
            backend = grid.name(),
            timeout_secs = config.auto_rollback_timeout_secs,
            "Distributed transaction log attached"
        );
        Self {
            metadata: TypedStore::new(Arc::clone(&grid), METADATA_NAMESPACE),
            entries: TypedStore::new(Arc::clone(&grid), ENTRY_NAMESPACE),
            grid,
            lock,
            registry,
            config,
            metadata_guard: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &DistributedWalConfig {
        &self.config
    }

    /// Metadata of an undecided transaction, if any.
    pub async fn transaction_record(
        &self,
        transaction_id: &TransactionId,
    ) -> WalResult<Option<TransactionRecord>> {
        Ok(self.metadata.get(transaction_id.as_str()).await?)
    }

    fn entry_key(transaction_id: &TransactionId, sequence: u64) -> String {
        format!("{}{:020}", Self::entry_prefix(transaction_id), sequence)
    }

    fn entry_prefix(transaction_id: &TransactionId) -> String {
        let id = transaction_id.as_str();
        format!("{}:{}:", id.len(), id)
    }

    /// Append `entry` for its transaction, creating the metadata record on
    /// first use.
    async fn append(&self, mut entry: LogEntry) -> WalResult<u64> {
        let _guard = self.metadata_guard.lock().await;
        let key = entry.transaction_id.as_str().to_string();

        let mut record = match self.metadata.get::<TransactionRecord>(&key).await? {
            Some(record) => record,
            None => TransactionRecord::new(entry.transaction_id.clone()),
        };

        let sequence = record.next_sequence;
        record.next_sequence += 1;
        self.metadata.put(&key, &record).await?;

        entry.sequence = sequence;
        self.entries
            .put(&Self::entry_key(&entry.transaction_id, sequence), &entry)
            .await?;
        Ok(sequence)
    }

    /// Run one sweeper pass if this node holds (or can take) the lease.
    pub async fn sweep_once(&self) -> WalResult<SweepReport> {
        let lease = self.config.sweep_interval() * 2;
        if !self
            .lock
            .try_acquire(SWEEPER_LEASE, &self.config.node_id, lease)
            .await?
        {
            debug!(node_id = %self.config.node_id, "Sweeper lease held elsewhere, skipping");
            return Ok(SweepReport {
                skipped: true,
                ..SweepReport::default()
            });
        }

        let timeout = self.config.auto_rollback_timeout();
        let now = Utc::now();
        let records: Vec<(String, TransactionRecord)> =
            self.metadata.scan_prefix("", usize::MAX).await?;

        let mut report = SweepReport::default();
        for (_, record) in records {
            if !is_overdue(&record, now, timeout) {
                continue;
            }
            report.examined += 1;

            match self.sweep_transaction(&record).await {
                Ok(SweepOutcome::RolledBack) => report.rolled_back += 1,
                Ok(SweepOutcome::Retried) => report.retried += 1,
                Ok(SweepOutcome::Exhausted) => report.exhausted += 1,
                Err(e) => {
                    warn!(
                        transaction_id = %record.transaction_id,
                        error = %e,
                        "Sweeper could not process transaction"
                    );
                    report.errors += 1;
                }
            }
        }

        if report.examined > 0 {
            info!(
                node_id = %self.config.node_id,
                examined = report.examined,
                rolled_back = report.rolled_back,
                retried = report.retried,
                exhausted = report.exhausted,
                "Sweeper pass finished"
            );
        }
        Ok(report)
    }

    async fn sweep_transaction(&self, record: &TransactionRecord) -> WalResult<SweepOutcome> {
        let transaction_id = &record.transaction_id;
        let replay = self
            .apply_logged_actions(transaction_id, ActionKind::Rollback, true)
            .await?;

        if replay.is_clean() {
            self.log_completion(transaction_id).await?;
            info!(transaction_id = %transaction_id, actions = replay.executed, "Auto-rolled back overdue transaction");
            return Ok(SweepOutcome::RolledBack);
        }

        let attempts = record.recovery_attempts + 1;
        if attempts >= self.config.max_recovery_attempts {
            error!(
                transaction_id = %transaction_id,
                attempts,
                failed = replay.failed,
                "RecoveryRetryExhausted: forcing completion of transaction with failed rollback actions"
            );
            self.log_completion(transaction_id).await?;
            return Ok(SweepOutcome::Exhausted);
        }

        let _guard = self.metadata_guard.lock().await;
        if let Some(mut current) = self
            .metadata
            .get::<TransactionRecord>(transaction_id.as_str())
            .await?
        {
            current.recovery_attempts = attempts;
            self.metadata.put(transaction_id.as_str(), &current).await?;
        }
        warn!(
            transaction_id = %transaction_id,
            attempts,
            max_attempts = self.config.max_recovery_attempts,
            failed = replay.failed,
            "Rollback partially failed, will retry"
        );
        Ok(SweepOutcome::Retried)
    }

    /// Run [`Self::sweep_once`] every `sweep_interval` until the handle is
    /// shut down.
    pub fn spawn_sweeper(self: &Arc<Self>) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let wal = Arc::clone(self);
        let period = wal.config.sweep_interval().max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = wal.sweep_once().await {
                            warn!(node_id = %wal.config.node_id, error = %e, "Sweeper pass failed");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            if let Err(e) = wal.lock.release(SWEEPER_LEASE, &wal.config.node_id).await {
                warn!(node_id = %wal.config.node_id, error = %e, "Failed to release sweeper lease");
            }
            debug!(node_id = %wal.config.node_id, "Sweeper stopped");
        });

        info!(node_id = %self.config.node_id, interval_ms = period.as_millis() as u64, "Sweeper started");
        SweeperHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

fn is_overdue(record: &TransactionRecord, now: DateTime<Utc>, timeout: Duration) -> bool {
    (now - record.started_at)
        .to_std()
        .map(|age| age >= timeout)
        .unwrap_or(false)
}

/// Stops a background sweeper started by
/// [`DistributedWriteAheadLog::spawn_sweeper`].
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the sweeper to stop and wait for it to release its lease.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Sweeper task ended abnormally");
        }
    }
}

#[async_trait]
impl WriteAheadLog for DistributedWriteAheadLog {
    async fn log_action(
        &self,
        transaction_id: &TransactionId,
        kind: ActionKind,
        action: &dyn Action,
    ) -> WalResult<u64> {
        let record = action.to_record()?;
        let sequence = self
            .append(LogEntry::action(transaction_id.clone(), kind, record))
            .await?;
        debug!(transaction_id = %transaction_id, %kind, action = action.name(), sequence, "Logged action");
        Ok(sequence)
    }

    async fn log_completion(&self, transaction_id: &TransactionId) -> WalResult<u64> {
        let sequence = self
            .append(LogEntry::completion(transaction_id.clone()))
            .await?;

        let _guard = self.metadata_guard.lock().await;
        let removed = self
            .entries
            .delete_prefix(&Self::entry_prefix(transaction_id))
            .await?;
        self.metadata.delete(transaction_id.as_str()).await?;

        debug!(transaction_id = %transaction_id, sequence, removed, "Logged completion");
        Ok(sequence)
    }

    async fn apply_logged_actions(
        &self,
        transaction_id: &TransactionId,
        kind: ActionKind,
        reverse_order: bool,
    ) -> WalResult<ReplayReport> {
        let entries: Vec<(String, LogEntry)> = self
            .entries
            .scan_prefix(&Self::entry_prefix(transaction_id), usize::MAX)
            .await?;

        let mut records: Vec<_> = entries
            .iter()
            .filter(|(_, entry)| entry.transaction_id == *transaction_id)
            .filter_map(|(_, entry)| match entry.as_action() {
                Some((k, record)) if k == kind => Some(record),
                _ => None,
            })
            .collect();
        if reverse_order {
            records.reverse();
        }

        Ok(run_records(&self.registry, transaction_id, kind, records).await)
    }

    async fn sync(&self) -> WalResult<()> {
        Ok(self.grid.flush().await?)
    }

    async fn pending_transactions(&self) -> WalResult<Vec<TransactionId>> {
        let records: Vec<(String, TransactionRecord)> =
            self.metadata.scan_prefix("", usize::MAX).await?;
        Ok(records
            .into_iter()
            .map(|(_, record)| record.transaction_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::testing::{record, registry, Journal};
    use docvault_storage::{InMemoryBackend, StorageLeaseLock};

    fn grid() -> Arc<dyn StorageBackend> {
        Arc::new(InMemoryBackend::new())
    }

    fn node(
        grid: &Arc<dyn StorageBackend>,
        journal: &Arc<Journal>,
        node_id: &str,
        timeout_secs: u64,
        max_attempts: u32,
    ) -> DistributedWriteAheadLog {
        let lock: Arc<dyn GridLock> = Arc::new(StorageLeaseLock::new(Arc::clone(grid)));
        DistributedWriteAheadLog::new(
            Arc::clone(grid),
            lock,
            Arc::new(registry(journal)),
            DistributedWalConfig {
                node_id: node_id.to_string(),
                auto_rollback_timeout_secs: timeout_secs,
                sweep_interval_ms: 500,
                max_recovery_attempts: max_attempts,
            },
        )
    }

    #[tokio::test]
    async fn test_entries_replay_in_registration_order() {
        let grid = grid();
        let journal = Arc::new(Journal::default());
        let wal = node(&grid, &journal, "n1", 600, 10);
        let tx = TransactionId::from("T1");

        // More than nine entries so lexical and numeric order would differ
        // without zero padding.
        let labels: Vec<String> = (0..12).map(|i| format!("a{i}")).collect();
        for label in &labels {
            wal.log_action(&tx, ActionKind::Rollback, &record(label, &journal))
                .await
                .unwrap();
        }

        wal.apply_logged_actions(&tx, ActionKind::Rollback, true).await.unwrap();
        let mut expected = labels.clone();
        expected.reverse();
        assert_eq!(journal.ran(), expected);
    }

    #[tokio::test]
    async fn test_ids_sharing_a_prefix_stay_separate() {
        let grid = grid();
        let journal = Arc::new(Journal::default());
        let wal = node(&grid, &journal, "n1", 600, 10);
        let short = TransactionId::from("a");
        let long = TransactionId::from("a:b");

        wal.log_action(&short, ActionKind::Rollback, &record("mine", &journal)).await.unwrap();
        wal.log_action(&long, ActionKind::Rollback, &record("theirs", &journal)).await.unwrap();

        let report = wal.apply_logged_actions(&short, ActionKind::Rollback, true).await.unwrap();
        assert_eq!(report.executed, 1);
        assert_eq!(journal.ran(), vec!["mine"]);

        wal.log_completion(&short).await.unwrap();
        assert_eq!(wal.pending_transactions().await.unwrap(), vec![long.clone()]);

        wal.apply_logged_actions(&long, ActionKind::Rollback, true).await.unwrap();
        assert_eq!(journal.ran(), vec!["mine", "theirs"]);
    }

    #[tokio::test]
    async fn test_metadata_created_on_first_entry() {
        let grid = grid();
        let journal = Arc::new(Journal::default());
        let wal = node(&grid, &journal, "n1", 600, 10);
        let tx = TransactionId::generate();

        assert!(wal.transaction_record(&tx).await.unwrap().is_none());
        let before = Utc::now();
        let s1 = wal.log_action(&tx, ActionKind::Rollback, &record("A", &journal)).await.unwrap();
        let s2 = wal.log_action(&tx, ActionKind::Commit, &record("B", &journal)).await.unwrap();
        assert_eq!((s1, s2), (1, 2));

        let meta = wal.transaction_record(&tx).await.unwrap().unwrap();
        assert_eq!(meta.transaction_id, tx);
        assert_eq!(meta.recovery_attempts, 0);
        assert_eq!(meta.next_sequence, 3);
        assert!(meta.started_at >= before - chrono::Duration::seconds(1));
        assert_eq!(wal.pending_transactions().await.unwrap(), vec![tx]);
    }

    #[tokio::test]
    async fn test_completion_removes_entries_and_metadata() {
        let grid = grid();
        let journal = Arc::new(Journal::default());
        let wal = node(&grid, &journal, "n1", 600, 10);
        let tx = TransactionId::generate();

        wal.log_action(&tx, ActionKind::Commit, &record("A", &journal)).await.unwrap();
        wal.apply_logged_actions(&tx, ActionKind::Commit, false).await.unwrap();
        wal.log_completion(&tx).await.unwrap();

        assert!(wal.transaction_record(&tx).await.unwrap().is_none());
        assert!(grid.scan_prefix(b"txlog:", usize::MAX).await.unwrap().is_empty());
        assert!(wal.pending_transactions().await.unwrap().is_empty());
        wal.sync().await.unwrap();
    }

    #[tokio::test]
    async fn test_sweeper_rolls_back_overdue_transaction() {
        let grid = grid();
        let journal = Arc::new(Journal::default());
        let wal = node(&grid, &journal, "n1", 0, 10);
        let tx = TransactionId::generate();

        wal.log_action(&tx, ActionKind::Rollback, &record("A", &journal)).await.unwrap();
        wal.log_action(&tx, ActionKind::Commit, &record("purge", &journal)).await.unwrap();
        wal.log_action(&tx, ActionKind::Rollback, &record("B", &journal)).await.unwrap();

        let report = wal.sweep_once().await.unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.rolled_back, 1);
        assert_eq!(journal.ran(), vec!["B", "A"]);
        assert!(wal.pending_transactions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweeper_ignores_recent_transactions() {
        let grid = grid();
        let journal = Arc::new(Journal::default());
        let wal = node(&grid, &journal, "n1", 600, 10);
        let tx = TransactionId::generate();

        wal.log_action(&tx, ActionKind::Rollback, &record("A", &journal)).await.unwrap();
        let report = wal.sweep_once().await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert!(journal.ran().is_empty());
        assert_eq!(wal.pending_transactions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_retries_then_succeeds() {
        let grid = grid();
        let journal = Arc::new(Journal::default());
        let wal = node(&grid, &journal, "n1", 0, 3);
        let tx = TransactionId::generate();

        wal.log_action(&tx, ActionKind::Rollback, &record("A", &journal)).await.unwrap();
        journal.fail_next("A", 2);

        let first = wal.sweep_once().await.unwrap();
        assert_eq!(first.retried, 1);
        assert_eq!(wal.transaction_record(&tx).await.unwrap().unwrap().recovery_attempts, 1);

        let second = wal.sweep_once().await.unwrap();
        assert_eq!(second.retried, 1);
        assert_eq!(wal.transaction_record(&tx).await.unwrap().unwrap().recovery_attempts, 2);

        let third = wal.sweep_once().await.unwrap();
        assert_eq!(third.rolled_back, 1);
        assert_eq!(journal.ran(), vec!["A"]);
        assert!(wal.transaction_record(&tx).await.unwrap().is_none());

        // Completed once: nothing left to sweep.
        assert_eq!(wal.sweep_once().await.unwrap().examined, 0);
    }

    #[tokio::test]
    async fn test_sweeper_forces_completion_after_exhaustion() {
        let grid = grid();
        let journal = Arc::new(Journal::default());
        let wal = node(&grid, &journal, "n1", 0, 2);
        let tx = TransactionId::generate();

        wal.log_action(&tx, ActionKind::Rollback, &record("A", &journal)).await.unwrap();
        journal.fail_next("A", u32::MAX);

        assert_eq!(wal.sweep_once().await.unwrap().retried, 1);
        let report = wal.sweep_once().await.unwrap();
        assert_eq!(report.exhausted, 1);
        assert!(wal.pending_transactions().await.unwrap().is_empty());
        assert!(journal.ran().is_empty());
    }

    #[tokio::test]
    async fn test_only_lease_holder_sweeps() {
        let grid = grid();
        let journal = Arc::new(Journal::default());
        let leader = node(&grid, &journal, "leader", 600, 10);
        let follower = node(&grid, &journal, "follower", 0, 10);
        let tx = TransactionId::generate();

        assert!(!leader.sweep_once().await.unwrap().skipped);
        follower
            .log_action(&tx, ActionKind::Rollback, &record("A", &journal))
            .await
            .unwrap();

        let report = follower.sweep_once().await.unwrap();
        assert!(report.skipped);
        assert!(journal.ran().is_empty());
    }

    #[tokio::test]
    async fn test_background_sweeper_and_shutdown() {
        let grid = grid();
        let journal = Arc::new(Journal::default());
        let wal = Arc::new(node(&grid, &journal, "n1", 0, 10));
        let tx = TransactionId::generate();
        wal.log_action(&tx, ActionKind::Rollback, &record("A", &journal)).await.unwrap();

        let handle = wal.spawn_sweeper();
        for _ in 0..100 {
            if wal.pending_transactions().await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;

        assert_eq!(journal.ran(), vec!["A"]);
        // The lease was released, so another node can take over at once.
        let other = node(&grid, &journal, "n2", 600, 10);
        assert!(!other.sweep_once().await.unwrap().skipped);
    }
}
