// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! End-to-end crash recovery: stores, log, and restart.
//!
//! A "crash" is simulated by dropping the unit of work and the log without
//! completing, then opening a fresh log over the same directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use docvault_archive::{TransactionalFileStore, TransactionalObjectStore};
use docvault_storage::{GridLock, InMemoryBackend, StorageBackend, StorageLeaseLock};
use docvault_wal::{
    ActionRegistry, DistributedWalConfig, DistributedWriteAheadLog, FileWriteAheadLog, SyncMode,
    TransactionWal, WalConfig, WriteAheadLog,
};
use tempfile::TempDir;

async fn open_log(wal_dir: &Path) -> Arc<FileWriteAheadLog> {
    let mut registry = ActionRegistry::new();
    TransactionalFileStore::register_actions(&mut registry);
    let config = WalConfig {
        log_dir: wal_dir.to_path_buf(),
        prune_after_completed: 100,
        sync_mode: SyncMode::Fsync,
    };
    Arc::new(FileWriteAheadLog::open(&config, Arc::new(registry)).await.unwrap())
}

async fn seed(store: &TransactionalFileStore, log: &Arc<FileWriteAheadLog>, docs: &[(&str, &str)]) {
    let mut tx = TransactionWal::new(log.clone());
    for (name, bytes) in docs {
        store.write(&mut tx, name, bytes.as_bytes()).await.unwrap();
    }
    tx.commit().await.unwrap();
}

async fn backup_paths(store: &TransactionalFileStore) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    let mut entries = tokio::fs::read_dir(store.backup_dir()).await.unwrap();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        paths.push(entry.path());
    }
    paths
}

async fn backup_files(store: &TransactionalFileStore) -> usize {
    backup_paths(store).await.len()
}

#[tokio::test]
async fn crash_before_decision_restores_every_document() {
    let dir = TempDir::new().unwrap();
    let wal_dir = dir.path().join("wal");
    let store = TransactionalFileStore::open(dir.path().join("docs")).await.unwrap();

    {
        let log = open_log(&wal_dir).await;
        seed(&store, &log, &[("a.pdf", "alpha"), ("b.pdf", "bravo")]).await;

        let mut tx = TransactionWal::new(log.clone());
        store.write(&mut tx, "a.pdf", b"ALPHA v2").await.unwrap();
        store.delete(&mut tx, "b.pdf").await.unwrap();
        store.write(&mut tx, "c.pdf", b"charlie").await.unwrap();
        store.write(&mut tx, "a.pdf", b"ALPHA v3").await.unwrap();
        tx.before_commit(false).await.unwrap();
        // Process dies here: no after_completion, no completion marker.
    }

    let log = open_log(&wal_dir).await;
    let stats = log.recovery_stats();
    assert_eq!(stats.transactions_rolled_back, 1);
    assert_eq!(stats.action_failures, 0);

    assert_eq!(store.read("a.pdf").await.unwrap(), b"alpha");
    assert_eq!(store.read("b.pdf").await.unwrap(), b"bravo");
    assert!(!store.exists("c.pdf").await.unwrap());
    assert_eq!(backup_files(&store).await, 0);
    assert!(log.pending_transactions().await.unwrap().is_empty());
}

#[tokio::test]
async fn recovery_matches_live_rollback() {
    async fn run(crash: bool) -> Vec<Vec<u8>> {
        let dir = TempDir::new().unwrap();
        let wal_dir = dir.path().join("wal");
        let store = TransactionalFileStore::open(dir.path().join("docs")).await.unwrap();

        {
            let log = open_log(&wal_dir).await;
            seed(&store, &log, &[("x", "x0"), ("y", "y0")]).await;

            let mut tx = TransactionWal::new(log.clone());
            store.write(&mut tx, "x", b"x1").await.unwrap();
            store.write(&mut tx, "y", b"y1").await.unwrap();
            store.write(&mut tx, "x", b"x2").await.unwrap();
            if !crash {
                tx.rollback().await.unwrap();
            }
        }
        let _log = open_log(&wal_dir).await;

        vec![store.read("x").await.unwrap(), store.read("y").await.unwrap()]
    }

    let live = run(false).await;
    let recovered = run(true).await;
    assert_eq!(live, vec![b"x0".to_vec(), b"y0".to_vec()]);
    assert_eq!(live, recovered);
}

#[tokio::test]
async fn crash_after_completion_reapplies_commit_actions() {
    let dir = TempDir::new().unwrap();
    let wal_dir = dir.path().join("wal");
    let store = TransactionalFileStore::open(dir.path().join("docs")).await.unwrap();

    {
        let log = open_log(&wal_dir).await;
        seed(&store, &log, &[("doc", "v1")]).await;

        let mut tx = TransactionWal::new(log.clone());
        store.write(&mut tx, "doc", b"v2").await.unwrap();
        tx.commit().await.unwrap();
    }

    // Both transactions are completed; their purges run again without error.
    let log = open_log(&wal_dir).await;
    let stats = log.recovery_stats();
    assert_eq!(stats.transactions_finalized, 2);
    assert_eq!(stats.transactions_rolled_back, 0);
    assert_eq!(stats.action_failures, 0);
    assert_eq!(store.read("doc").await.unwrap(), b"v2");

    // Recovery truncated the log; a second restart has nothing to do.
    drop(log);
    let log = open_log(&wal_dir).await;
    assert_eq!(log.recovery_stats().entries_scanned, 0);
}

#[tokio::test]
async fn interrupted_backup_leaves_no_files_behind() {
    let dir = TempDir::new().unwrap();
    let wal_dir = dir.path().join("wal");
    let store = TransactionalFileStore::open(dir.path().join("docs")).await.unwrap();
    let target = store.root().join("a.pdf");

    {
        let log = open_log(&wal_dir).await;
        seed(&store, &log, &[("a.pdf", "alpha")]).await;

        let mut tx = TransactionWal::new(log.clone());
        store.write(&mut tx, "a.pdf", b"ALPHA v2").await.unwrap();

        // Rewind to the moment the process died: undo logged, backup copy
        // still under its scratch name, new contents not yet in place.
        let backups = backup_paths(&store).await;
        assert_eq!(backups.len(), 1);
        let mut partial = backups[0].clone().into_os_string();
        partial.push(".partial");
        tokio::fs::rename(&backups[0], &partial).await.unwrap();
        tokio::fs::write(&target, b"alpha").await.unwrap();
        tokio::fs::write(store.root().join("a.pdf.write-tmp"), b"ALPHA").await.unwrap();
    }

    let log = open_log(&wal_dir).await;
    assert_eq!(log.recovery_stats().transactions_rolled_back, 1);
    assert_eq!(log.recovery_stats().action_failures, 0);
    assert_eq!(store.read("a.pdf").await.unwrap(), b"alpha");
    assert_eq!(backup_files(&store).await, 0);
    assert!(!tokio::fs::try_exists(store.root().join("a.pdf.write-tmp")).await.unwrap());
}

#[tokio::test]
async fn independent_transactions_recover_independently() {
    let dir = TempDir::new().unwrap();
    let wal_dir = dir.path().join("wal");
    let store = TransactionalFileStore::open(dir.path().join("docs")).await.unwrap();

    {
        let log = open_log(&wal_dir).await;
        seed(&store, &log, &[("left", "L0"), ("right", "R0")]).await;

        let mut committed = TransactionWal::new(log.clone());
        let mut in_flight = TransactionWal::new(log.clone());
        store.write(&mut committed, "left", b"L1").await.unwrap();
        store.write(&mut in_flight, "right", b"R1").await.unwrap();
        committed.commit().await.unwrap();
    }

    let _log = open_log(&wal_dir).await;
    assert_eq!(store.read("left").await.unwrap(), b"L1");
    assert_eq!(store.read("right").await.unwrap(), b"R0");
    assert_eq!(backup_files(&store).await, 0);
}

#[tokio::test]
async fn abandoned_object_transaction_is_swept() {
    let grid: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
    let objects = TransactionalObjectStore::new(Arc::clone(&grid));

    let node = |node_id: &str, timeout_secs: u64| {
        let mut registry = ActionRegistry::new();
        objects.register_actions(&mut registry);
        let lock: Arc<dyn GridLock> = Arc::new(StorageLeaseLock::new(Arc::clone(&grid)));
        Arc::new(DistributedWriteAheadLog::new(
            Arc::clone(&grid),
            lock,
            Arc::new(registry),
            DistributedWalConfig {
                node_id: node_id.to_string(),
                auto_rollback_timeout_secs: timeout_secs,
                sweep_interval_ms: 1_000,
                max_recovery_attempts: 3,
            },
        ))
    };

    // Node one writes and disappears without deciding.
    {
        let log = node("node-1", 600);
        let mut setup = TransactionWal::new(log.clone());
        objects.put(&mut setup, "ledger", b"balanced").await.unwrap();
        setup.commit().await.unwrap();

        let mut tx = TransactionWal::new(log.clone());
        objects.put(&mut tx, "ledger", b"half-posted").await.unwrap();
        objects.put(&mut tx, "receipt", b"orphan").await.unwrap();
    }

    // Node two sweeps with an expired timeout.
    let sweeper = node("node-2", 0);
    assert_eq!(sweeper.pending_transactions().await.unwrap().len(), 1);

    let report = sweeper.sweep_once().await.unwrap();
    assert_eq!(report.rolled_back, 1);
    assert_eq!(objects.get("ledger").await.unwrap(), b"balanced");
    assert!(!objects.exists("receipt").await.unwrap());
    assert!(sweeper.pending_transactions().await.unwrap().is_empty());
    assert!(grid.scan_prefix(b"backup:", usize::MAX).await.unwrap().is_empty());
}
