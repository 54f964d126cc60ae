// SPDX-License-Identifier: PMPL-1.0-or-later
//
// DocVault Write-Ahead Log - Per-unit-of-work facade
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// A `TransactionWal` belongs to one logical unit of work. Storage backends
// register undo and commit actions through it; the code that owns the unit
// of work drives the decision with two explicit calls:
//
//   before_commit(read_only)      make the log durable before success is reported
//   after_completion(status)      replay COMMIT forward or ROLLBACK in reverse,
//                                 log completion, mint a fresh id
//
//   Idle --append--> Active --before_commit--> Deciding
//                      |                          |
//                      +------ after_completion --+--> Committing | RollingBack
//                                                            |
//                                              Completed --> Idle (new id)

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::action::Action;
use crate::entry::{ActionKind, TransactionId};
use crate::error::{WalError, WalResult};
use crate::log::{ReplayReport, WriteAheadLog};

/// Where a unit of work is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Nothing registered under the current id.
    Idle,
    /// At least one action registered; outcome not yet decided.
    Active,
    /// `before_commit` succeeded; waiting for the outcome.
    Deciding,
    Committing,
    RollingBack,
    /// Completion logged. Transient: the facade immediately returns to `Idle`.
    Completed,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Deciding => "deciding",
            Self::Committing => "committing",
            Self::RollingBack => "rolling back",
            Self::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Outcome reported by whoever owns the unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Committed,
    RolledBack,
    /// The outcome is ambiguous. Treated as a rollback.
    Unknown,
}

/// Lifecycle facade over a shared [`WriteAheadLog`].
pub struct TransactionWal {
    log: Arc<dyn WriteAheadLog>,
    transaction_id: TransactionId,
    state: TransactionState,
    rollback_only: bool,
}

impl fmt::Debug for TransactionWal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionWal")
            .field("transaction_id", &self.transaction_id)
            .field("state", &self.state)
            .field("rollback_only", &self.rollback_only)
            .finish()
    }
}

impl TransactionWal {
    pub fn new(log: Arc<dyn WriteAheadLog>) -> Self {
        Self {
            log,
            transaction_id: TransactionId::generate(),
            state: TransactionState::Idle,
            rollback_only: false,
        }
    }

    /// Id under which actions are currently being logged.
    pub fn transaction_id(&self) -> &TransactionId {
        &self.transaction_id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// True once an append failed; the unit of work can then only roll back.
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    /// Log an action to run if the unit of work rolls back.
    pub async fn append_undo_action(&mut self, action: &dyn Action) -> WalResult<u64> {
        self.append(ActionKind::Rollback, action).await
    }

    /// Log an action to run once the unit of work has committed.
    pub async fn append_commit_action(&mut self, action: &dyn Action) -> WalResult<u64> {
        self.append(ActionKind::Commit, action).await
    }

    async fn append(&mut self, kind: ActionKind, action: &dyn Action) -> WalResult<u64> {
        match self.state {
            TransactionState::Idle => {
                self.state = TransactionState::Active;
                debug!(transaction_id = %self.transaction_id, "Transaction started");
            }
            TransactionState::Active => {}
            other => return Err(self.invalid_state(other, "register an action")),
        }

        match self.log.log_action(&self.transaction_id, kind, action).await {
            Ok(sequence) => Ok(sequence),
            Err(e) => {
                warn!(
                    transaction_id = %self.transaction_id,
                    %kind,
                    action = action.name(),
                    error = %e,
                    "Failed to log action, transaction is now rollback-only"
                );
                self.rollback_only = true;
                Err(e)
            }
        }
    }

    /// Make every logged action durable before the commit is reported.
    ///
    /// Fails with [`WalError::RollbackOnly`] if an earlier append failed;
    /// the caller must then complete with a rollback.
    pub async fn before_commit(&mut self, read_only: bool) -> WalResult<()> {
        match self.state {
            TransactionState::Idle => return Ok(()),
            TransactionState::Active | TransactionState::Deciding => {}
            other => return Err(self.invalid_state(other, "prepare to commit")),
        }

        if self.rollback_only {
            return Err(WalError::RollbackOnly(self.transaction_id.to_string()));
        }

        self.state = TransactionState::Deciding;
        if let Err(e) = self.log.sync().await {
            self.rollback_only = true;
            return Err(e);
        }
        debug!(transaction_id = %self.transaction_id, read_only, "Transaction log synced before commit");
        Ok(())
    }

    /// Apply the outcome, log completion, and start over with a fresh id.
    ///
    /// A `Committed` status on a rollback-only unit of work is rolled back.
    pub async fn after_completion(&mut self, status: CompletionStatus) -> WalResult<ReplayReport> {
        match self.state {
            TransactionState::Idle => {
                self.reset();
                return Ok(ReplayReport::default());
            }
            TransactionState::Completed => {
                return Err(self.invalid_state(self.state, "complete"));
            }
            _ => {}
        }

        let commit = match status {
            CompletionStatus::Committed if self.rollback_only => {
                warn!(transaction_id = %self.transaction_id, "Commit reported for rollback-only transaction, rolling back");
                false
            }
            CompletionStatus::Committed => true,
            CompletionStatus::RolledBack => false,
            CompletionStatus::Unknown => {
                warn!(transaction_id = %self.transaction_id, "Transaction outcome unknown, rolling back");
                false
            }
        };

        let report = if commit {
            self.state = TransactionState::Committing;
            self.log
                .apply_logged_actions(&self.transaction_id, ActionKind::Commit, false)
                .await?
        } else {
            self.state = TransactionState::RollingBack;
            self.log
                .apply_logged_actions(&self.transaction_id, ActionKind::Rollback, true)
                .await?
        };

        self.log.log_completion(&self.transaction_id).await?;
        self.state = TransactionState::Completed;

        info!(
            transaction_id = %self.transaction_id,
            outcome = if commit { "committed" } else { "rolled back" },
            executed = report.executed,
            failed = report.failed,
            "Transaction completed"
        );

        self.reset();
        Ok(report)
    }

    /// `before_commit(false)` then `after_completion(Committed)`.
    ///
    /// If the log cannot be made durable the unit of work is rolled back
    /// and the original error returned.
    pub async fn commit(&mut self) -> WalResult<ReplayReport> {
        if let Err(e) = self.before_commit(false).await {
            if let Err(rollback_error) = self.after_completion(CompletionStatus::RolledBack).await {
                warn!(
                    transaction_id = %self.transaction_id,
                    error = %rollback_error,
                    "Rollback after failed commit preparation also failed"
                );
            }
            return Err(e);
        }
        self.after_completion(CompletionStatus::Committed).await
    }

    pub async fn rollback(&mut self) -> WalResult<ReplayReport> {
        self.after_completion(CompletionStatus::RolledBack).await
    }

    fn reset(&mut self) {
        self.transaction_id = TransactionId::generate();
        self.state = TransactionState::Idle;
        self.rollback_only = false;
    }

    fn invalid_state(&self, state: TransactionState, operation: &'static str) -> WalError {
        WalError::InvalidState {
            transaction_id: self.transaction_id.to_string(),
            state: state.to_string(),
            operation,
        }
    }
}
