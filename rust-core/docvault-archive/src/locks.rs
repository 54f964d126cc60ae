// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-resource read/write locks.
//
// A store holds the write lock of a document for the whole
// backup -> log -> mutate sequence, so two units of work can never
// interleave their backups of the same document. Entries are created on
// first use and dropped again when the last guard or waiter for a name
// goes away, so the table only holds names in use.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

type LockTable = Arc<Mutex<HashMap<String, Slot>>>;

/// A named lock and the number of guards and waiters using it.
#[derive(Debug, Default)]
struct Slot {
    lock: Arc<RwLock<()>>,
    users: usize,
}

/// Lazily populated table of named locks.
#[derive(Debug, Default, Clone)]
pub struct ResourceLocks {
    table: LockTable,
}

/// Exclusive access to one name.
pub type ResourceWriteGuard = ResourceGuard<OwnedRwLockWriteGuard<()>>;

/// Shared access to one name.
pub type ResourceReadGuard = ResourceGuard<OwnedRwLockReadGuard<()>>;

/// Holds a lock from [`ResourceLocks`]; releases it on drop.
#[derive(Debug)]
pub struct ResourceGuard<G> {
    _guard: G,
    _release: Release,
}

#[derive(Debug)]
struct Release {
    table: LockTable,
    name: String,
}

impl Drop for Release {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = table.get_mut(&self.name) {
            slot.users -= 1;
            if slot.users == 0 {
                table.remove(&self.name);
            }
        }
    }
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, name: &str) -> (Arc<RwLock<()>>, Release) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = table.entry(name.to_string()).or_default();
        slot.users += 1;
        let lock = Arc::clone(&slot.lock);
        let release = Release {
            table: Arc::clone(&self.table),
            name: name.to_string(),
        };
        (lock, release)
    }

    /// Exclusive access to `name`, held until the guard is dropped.
    pub async fn write(&self, name: &str) -> ResourceWriteGuard {
        let (lock, release) = self.lock_for(name);
        ResourceGuard {
            _guard: lock.write_owned().await,
            _release: release,
        }
    }

    /// Shared access to `name`, held until the guard is dropped.
    pub async fn read(&self, name: &str) -> ResourceReadGuard {
        let (lock, release) = self.lock_for(name);
        ResourceGuard {
            _guard: lock.read_owned().await,
            _release: release,
        }
    }

    /// Number of names currently locked or waited on.
    pub fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
