// SPDX-License-Identifier: PMPL-1.0-or-later
//
// DocVault Write-Ahead Log - Error types
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Two families of failure live here. `WalError` covers the log itself
// (appending, scanning, decoding, lifecycle misuse) and propagates to the
// caller. `ActionError` covers a compensating action's `run()`; it never
// leaves the replay loop, which logs and counts it instead.

use thiserror::Error;

use docvault_storage::StorageError;

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// The log file could not be read, appended to, or synced.
    #[error("WAL I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CRC32 checksum mismatch detected during frame validation.
    #[error("CRC mismatch at sequence {sequence}: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        /// The sequence number of the corrupted entry, if readable.
        sequence: u64,
        /// The CRC32 value stored in the frame header.
        expected: u32,
        /// The CRC32 value computed from the frame contents.
        actual: u32,
    },

    /// The frame header declares a length beyond the maximum frame size.
    #[error("Frame declares length {length} bytes, exceeding maximum {max_length}")]
    EntryTooLarge {
        /// The declared length in the frame header.
        length: u32,
        /// The maximum allowed frame length.
        max_length: u32,
    },

    /// An unknown entry type byte was encountered while decoding.
    #[error("Invalid entry type byte: {0}")]
    InvalidEntryType(u8),

    /// An unknown action kind byte was encountered while decoding.
    #[error("Invalid action kind byte: {0}")]
    InvalidActionKind(u8),

    /// An unknown event type byte was encountered while decoding.
    #[error("Invalid event type byte: {0}")]
    InvalidEventType(u8),

    /// A frame ended before all of its fields were read.
    #[error("Unexpected end of frame at offset {0}")]
    UnexpectedEof(u64),

    /// A string field in a frame is not valid UTF-8.
    #[error("Invalid UTF-8 in frame: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// An action payload could not be encoded or decoded.
    #[error("JSON error in action payload: {0}")]
    Json(#[from] serde_json::Error),

    /// The grid behind the distributed log failed.
    #[error("Grid storage error: {0}")]
    Storage(#[from] StorageError),

    /// No decoder is registered for an action name found in the log.
    #[error("No decoder registered for action '{0}'")]
    UnknownAction(String),

    /// A decoder exists but does not understand this payload version.
    #[error("Action '{name}' has unsupported payload version {version}")]
    UnsupportedActionVersion {
        /// The action name.
        name: String,
        /// The version found in the log.
        version: u16,
    },

    /// A lifecycle call arrived in a state that does not accept it.
    #[error("Transaction {transaction_id}: cannot {operation} while {state}")]
    InvalidState {
        /// The transaction the call was made against.
        transaction_id: String,
        /// The state the unit of work was in.
        state: String,
        /// The attempted operation.
        operation: &'static str,
    },

    /// An earlier append failed, so the unit of work may only roll back.
    #[error("Transaction {0} is marked rollback-only")]
    RollbackOnly(String),

    /// A configuration value could not be parsed.
    #[error("Invalid configuration {key}: {message}")]
    Config {
        /// The configuration key (environment variable name).
        key: String,
        /// What was wrong with the value.
        message: String,
    },
}

/// Convenience type alias for WAL results.
pub type WalResult<T> = Result<T, WalError>;

/// A compensating action failed while running.
#[derive(Debug, Error)]
pub enum ActionError {
    /// A filesystem side effect failed.
    #[error("action I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A storage backend rejected the side effect.
    #[error("action backend error: {0}")]
    Backend(String),

    /// The action could not be reconstructed from its logged record.
    #[error("action could not be decoded: {0}")]
    Decode(String),
}

impl From<StorageError> for ActionError {
    fn from(err: StorageError) -> Self {
        Self::Backend(err.to_string())
    }
}
