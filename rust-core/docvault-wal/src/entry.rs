// SPDX-License-Identifier: PMPL-1.0-or-later
//
// DocVault Write-Ahead Log - Entry model and frame codec
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// A log entry is either an action entry (an undo or finalization step for a
// transaction) or an event entry (the transaction's completion marker).
// Both carry the transaction id and a sequence number assigned at append
// time.
//
// On-disk frame (all integers little-endian):
//   [4 bytes: entry_length (u32)]   -- length of everything after this field
//   [4 bytes: crc32 checksum]       -- CRC32 of all bytes after this field
//   [8 bytes: sequence (u64)]
//   [8 bytes: timestamp (i64)]      -- Unix milliseconds UTC
//   [1 byte:  entry_type]           -- 0=Action, 1=Event
//   [1 byte:  tag]                  -- ActionKind or EventType byte
//   [4 bytes: tx_id_len (u32)] [N bytes: transaction id]
//   action entries only:
//   [4 bytes: name_len (u32)]  [N bytes: action name]
//   [2 bytes: action version (u16)]
//   [4 bytes: payload_len (u32)] [M bytes: payload]

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use crc32fast::Hasher as Crc32Hasher;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{WalError, WalResult};

/// Maximum allowed frame size: 64 MiB. Larger declared sizes are corruption.
pub const MAX_ENTRY_SIZE: u32 = 64 * 1024 * 1024;

/// Size of the length prefix that precedes every frame.
pub const LENGTH_PREFIX_SIZE: usize = 4;

const ENTRY_TYPE_ACTION: u8 = 0;
const ENTRY_TYPE_EVENT: u8 = 1;

// ---------------------------------------------------------------------------
// TransactionId
// ---------------------------------------------------------------------------

/// Opaque correlation key shared by every entry of one logical transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    /// Mint a fresh, globally unique id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TransactionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TransactionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ---------------------------------------------------------------------------
// ActionKind / EventType
// ---------------------------------------------------------------------------

/// Whether an action finalizes a change or undoes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    /// Applied in registration order once the transaction commits.
    Commit = 0,
    /// Applied in reverse registration order when the transaction rolls back.
    Rollback = 1,
}

impl ActionKind {
    pub fn from_byte(byte: u8) -> WalResult<Self> {
        match byte {
            0 => Ok(Self::Commit),
            1 => Ok(Self::Rollback),
            other => Err(WalError::InvalidActionKind(other)),
        }
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Commit => f.write_str("COMMIT"),
            Self::Rollback => f.write_str("ROLLBACK"),
        }
    }
}

/// Lifecycle events recorded against a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// The transaction must never be rolled back again.
    Completed = 0,
}

impl EventType {
    pub fn from_byte(byte: u8) -> WalResult<Self> {
        match byte {
            0 => Ok(Self::Completed),
            other => Err(WalError::InvalidEventType(other)),
        }
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

// ---------------------------------------------------------------------------
// ActionRecord
// ---------------------------------------------------------------------------

/// The persisted form of an action: a registry name, a payload version, and
/// the payload bytes the action produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub name: String,
    pub version: u16,
    pub payload: Vec<u8>,
}

// ---------------------------------------------------------------------------
// LogEntry
// ---------------------------------------------------------------------------

/// What a log entry records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryBody {
    Action {
        kind: ActionKind,
        action: ActionRecord,
    },
    Event(EventType),
}

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Monotonically increasing sequence number assigned at append time.
    pub sequence: u64,

    /// UTC timestamp of when the entry was created.
    pub timestamp: DateTime<Utc>,

    /// The transaction this entry belongs to.
    pub transaction_id: TransactionId,

    pub body: EntryBody,
}

impl LogEntry {
    /// Build an action entry. The sequence is assigned by the log on append.
    pub fn action(transaction_id: TransactionId, kind: ActionKind, action: ActionRecord) -> Self {
        Self {
            sequence: 0,
            timestamp: Utc::now(),
            transaction_id,
            body: EntryBody::Action { kind, action },
        }
    }

    /// Build a completion marker. The sequence is assigned by the log on append.
    pub fn completion(transaction_id: TransactionId) -> Self {
        Self {
            sequence: 0,
            timestamp: Utc::now(),
            transaction_id,
            body: EntryBody::Event(EventType::Completed),
        }
    }

    /// Returns the action kind and record if this is an action entry.
    pub fn as_action(&self) -> Option<(ActionKind, &ActionRecord)> {
        match &self.body {
            EntryBody::Action { kind, action } => Some((*kind, action)),
            EntryBody::Event(_) => None,
        }
    }

    pub fn is_completion(&self) -> bool {
        matches!(self.body, EntryBody::Event(EventType::Completed))
    }

    /// Serialize this entry to the on-disk frame, including the length
    /// prefix and CRC.
    pub fn serialize(&self) -> Vec<u8> {
        let mut inner = Vec::with_capacity(64);

        inner.extend_from_slice(&self.sequence.to_le_bytes());
        inner.extend_from_slice(&self.timestamp.timestamp_millis().to_le_bytes());

        match &self.body {
            EntryBody::Action { kind, action } => {
                inner.push(ENTRY_TYPE_ACTION);
                inner.push(kind.to_byte());
                put_bytes(&mut inner, self.transaction_id.as_str().as_bytes());
                put_bytes(&mut inner, action.name.as_bytes());
                inner.extend_from_slice(&action.version.to_le_bytes());
                put_bytes(&mut inner, &action.payload);
            }
            EntryBody::Event(event) => {
                inner.push(ENTRY_TYPE_EVENT);
                inner.push(event.to_byte());
                put_bytes(&mut inner, self.transaction_id.as_str().as_bytes());
            }
        }

        let crc = compute_crc32(&inner);

        // [entry_length][crc32][inner...]
        let entry_length = (4 + inner.len()) as u32;
        let mut buffer = Vec::with_capacity(LENGTH_PREFIX_SIZE + entry_length as usize);
        buffer.extend_from_slice(&entry_length.to_le_bytes());
        buffer.extend_from_slice(&crc.to_le_bytes());
        buffer.extend_from_slice(&inner);
        buffer
    }

    /// Deserialize an entry from the bytes that follow the length prefix
    /// (i.e. starting at the CRC field).
    pub fn deserialize(data: &[u8], entry_length: u32) -> WalResult<Self> {
        if entry_length > MAX_ENTRY_SIZE {
            return Err(WalError::EntryTooLarge {
                length: entry_length,
                max_length: MAX_ENTRY_SIZE,
            });
        }
        if (data.len() as u64) < entry_length as u64 || entry_length < 4 {
            return Err(WalError::UnexpectedEof(data.len() as u64));
        }

        let data = &data[..entry_length as usize];
        let stored_crc = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let inner = &data[4..];

        let computed_crc = compute_crc32(inner);
        if stored_crc != computed_crc {
            let sequence = inner
                .get(0..8)
                .map(|b| u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                .unwrap_or(0);
            return Err(WalError::CrcMismatch {
                sequence,
                expected: stored_crc,
                actual: computed_crc,
            });
        }

        Self::parse_inner(inner)
    }

    fn parse_inner(inner: &[u8]) -> WalResult<Self> {
        let mut cursor = FrameCursor { data: inner, offset: 0 };

        let sequence = cursor.u64()?;
        let timestamp_millis = cursor.u64()? as i64;
        let timestamp = Utc
            .timestamp_millis_opt(timestamp_millis)
            .single()
            .unwrap_or_else(Utc::now);
        let entry_type = cursor.u8()?;
        let tag = cursor.u8()?;
        let transaction_id = TransactionId(String::from_utf8(cursor.bytes()?.to_vec())?);

        let body = match entry_type {
            ENTRY_TYPE_ACTION => {
                let kind = ActionKind::from_byte(tag)?;
                let name = String::from_utf8(cursor.bytes()?.to_vec())?;
                let version = cursor.u16()?;
                let payload = cursor.bytes()?.to_vec();
                EntryBody::Action {
                    kind,
                    action: ActionRecord {
                        name,
                        version,
                        payload,
                    },
                }
            }
            ENTRY_TYPE_EVENT => EntryBody::Event(EventType::from_byte(tag)?),
            other => return Err(WalError::InvalidEntryType(other)),
        };

        Ok(Self {
            sequence,
            timestamp,
            transaction_id,
            body,
        })
    }
}

fn put_bytes(buffer: &mut Vec<u8>, bytes: &[u8]) {
    buffer.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buffer.extend_from_slice(bytes);
}

/// Bounds-checked little-endian reader over a frame's inner bytes.
struct FrameCursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> FrameCursor<'a> {
    fn take(&mut self, len: usize) -> WalResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(WalError::UnexpectedEof(self.offset as u64))?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u8(&mut self) -> WalResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> WalResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> WalResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> WalResult<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    /// A u32 length followed by that many bytes.
    fn bytes(&mut self) -> WalResult<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }
}

/// Compute a CRC32 checksum (IEEE polynomial) over the given bytes.
pub fn compute_crc32(data: &[u8]) -> u32 {
    let mut hasher = Crc32Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
