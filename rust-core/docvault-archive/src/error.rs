// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Error types for the transactional archive stores.

use docvault_storage::StorageError;
use docvault_wal::WalError;
use thiserror::Error;

/// Errors returned by the archive stores.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// A filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The object backend failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The transaction log refused an action. The unit of work must roll back.
    #[error("transaction log error: {0}")]
    Wal(#[from] WalError),

    /// The named document does not exist.
    #[error("document not found: {0}")]
    NotFound(String),

    /// The document name cannot be mapped to a storage location.
    #[error("invalid document name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wal_error_converts() {
        let err: ArchiveError = WalError::RollbackOnly("tx-1".to_string()).into();
        assert!(matches!(err, ArchiveError::Wal(_)));
        assert!(err.to_string().contains("rollback-only"));
    }

    #[test]
    fn test_invalid_name_display() {
        let err = ArchiveError::InvalidName {
            name: "../etc".to_string(),
            reason: "must stay inside the archive root",
        };
        assert_eq!(
            err.to_string(),
            "invalid document name '../etc': must stay inside the archive root"
        );
    }
}
