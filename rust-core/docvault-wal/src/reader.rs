// SPDX-License-Identifier: PMPL-1.0-or-later
//
// DocVault Write-Ahead Log - Reader for crash recovery
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Reads the log file front to back. It verifies the CRC32 checksum of each
// frame and tolerates the damage a crash leaves behind: a truncated frame
// at the end of the file means "no more entries", a frame whose checksum
// fails is skipped with a warning.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::{debug, warn};

use crate::entry::{LogEntry, LENGTH_PREFIX_SIZE, MAX_ENTRY_SIZE};
use crate::error::{WalError, WalResult};

/// Read every valid entry from the log file at `path`, in file order.
///
/// A missing file reads as an empty log.
pub fn read_log_entries(path: &Path) -> WalResult<Vec<LogEntry>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let entries = decode_frames(&data);
    debug!(path = %path.display(), count = entries.len(), "Read WAL entries");
    Ok(entries)
}

/// Decode back-to-back frames from an in-memory copy of the log.
///
/// Never fails: unreadable frames are skipped and decoding stops at the
/// first frame that runs past the end of `data`.
pub fn decode_frames(data: &[u8]) -> Vec<LogEntry> {
    let mut entries = Vec::new();
    let mut offset = 0usize;

    while offset + LENGTH_PREFIX_SIZE <= data.len() {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&data[offset..offset + LENGTH_PREFIX_SIZE]);
        let entry_length = u32::from_le_bytes(prefix);

        if entry_length == 0 {
            // Zero-filled tail from a preallocated or torn write.
            break;
        }

        if entry_length > MAX_ENTRY_SIZE {
            warn!(
                offset,
                entry_length,
                "Entry declares unreasonable length, stopping log read"
            );
            break;
        }

        let entry_end = offset + LENGTH_PREFIX_SIZE + entry_length as usize;
        if entry_end > data.len() {
            debug!(
                offset,
                entry_length,
                available = data.len() - offset - LENGTH_PREFIX_SIZE,
                "Truncated entry at end of log (expected after crash)"
            );
            break;
        }

        let frame = &data[offset + LENGTH_PREFIX_SIZE..entry_end];
        match LogEntry::deserialize(frame, entry_length) {
            Ok(entry) => entries.push(entry),
            Err(WalError::CrcMismatch {
                sequence,
                expected,
                actual,
            }) => {
                warn!(
                    sequence,
                    expected = format!("{expected:#010x}"),
                    actual = format!("{actual:#010x}"),
                    offset,
                    "Skipping corrupted WAL entry (CRC mismatch)"
                );
            }
            Err(other) => {
                warn!(error = %other, offset, "Skipping unreadable WAL entry");
            }
        }

        offset = entry_end;
    }

    entries
}
