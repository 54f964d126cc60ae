// SPDX-License-Identifier: PMPL-1.0-or-later
//
// DocVault Write-Ahead Log - The log contract
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::action::{Action, ActionRegistry};
use crate::entry::{ActionKind, ActionRecord, TransactionId};
use crate::error::WalResult;

/// Outcome of replaying the actions of one kind for one transaction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayReport {
    /// Actions whose `run()` returned successfully.
    pub executed: usize,
    /// Actions that failed to decode or whose `run()` returned an error.
    pub failed: usize,
}

impl ReplayReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// The durable action log shared by every unit of work in a process (file
/// variant) or a cluster (distributed variant).
///
/// Callers never execute actions themselves; they log them, and the log
/// replays the right kind in the right order once the outcome is known.
#[async_trait]
pub trait WriteAheadLog: Send + Sync {
    /// Durably append an action entry. Does not run the action.
    ///
    /// Returns the sequence number assigned to the entry.
    async fn log_action(
        &self,
        transaction_id: &TransactionId,
        kind: ActionKind,
        action: &dyn Action,
    ) -> WalResult<u64>;

    /// Durably append the completion marker for `transaction_id`. After this
    /// the transaction is never rolled back again. May compact the log.
    async fn log_completion(&self, transaction_id: &TransactionId) -> WalResult<u64>;

    /// Rebuild and run every logged action matching `transaction_id` and
    /// `kind`, in registration order or its reverse.
    ///
    /// A failing action is logged and counted; the remaining actions still
    /// run. Only a failure to read the log itself is returned as an error.
    async fn apply_logged_actions(
        &self,
        transaction_id: &TransactionId,
        kind: ActionKind,
        reverse_order: bool,
    ) -> WalResult<ReplayReport>;

    /// Force every previously appended entry to durable storage.
    async fn sync(&self) -> WalResult<()>;

    /// Transactions that have logged actions but no completion marker.
    async fn pending_transactions(&self) -> WalResult<Vec<TransactionId>>;
}

/// Decode and run `records` in the order given, isolating failures.
pub(crate) async fn run_records<'a, I>(
    registry: &ActionRegistry,
    transaction_id: &TransactionId,
    kind: ActionKind,
    records: I,
) -> ReplayReport
where
    I: IntoIterator<Item = &'a ActionRecord>,
{
    let mut report = ReplayReport::default();

    for record in records {
        let action = match registry.decode(record) {
            Ok(action) => action,
            Err(error) => {
                warn!(
                    transaction_id = %transaction_id,
                    %kind,
                    action = %record.name,
                    %error,
                    "Cannot rebuild logged action, skipping"
                );
                report.failed += 1;
                continue;
            }
        };

        match action.run().await {
            Ok(()) => {
                debug!(transaction_id = %transaction_id, %kind, action = %record.name, "Applied action");
                report.executed += 1;
            }
            Err(error) => {
                warn!(
                    transaction_id = %transaction_id,
                    %kind,
                    action = %record.name,
                    %error,
                    "Action failed, continuing with remaining actions"
                );
                report.failed += 1;
            }
        }
    }

    report
}
