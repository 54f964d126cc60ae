// SPDX-License-Identifier: PMPL-1.0-or-later
//
// DocVault Write-Ahead Log - Append-only writer
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The `LogWriter` owns the append handle of the single log file. It assigns
// sequence numbers, writes frames back to back, and applies the configured
// `SyncMode`. Truncation after recovery and replacement by a compacted copy
// after pruning also go through here, so the handle is never stale.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::entry::LogEntry;
use crate::error::WalResult;

// ---------------------------------------------------------------------------
// SyncMode
// ---------------------------------------------------------------------------

/// Controls how aggressively the writer calls `fsync`.
///
/// Whatever the mode, [`LogWriter::sync`] always fsyncs; the transaction
/// facade calls it before reporting a commit decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Call `fsync` after every append. Acknowledged appends survive a crash.
    Fsync,

    /// Call `fsync` at most once per the specified duration.
    Periodic(Duration),

    /// Never fsync on append; rely on explicit `sync()` calls.
    Async,
}

// ---------------------------------------------------------------------------
// LogWriter
// ---------------------------------------------------------------------------

/// Append handle for the log file.
pub struct LogWriter {
    path: PathBuf,
    file: File,
    next_sequence: u64,
    sync_mode: SyncMode,
    last_sync: Instant,
    bytes_written: u64,
}

impl LogWriter {
    /// Open (creating if needed) the log file at `path` for appending.
    ///
    /// `next_sequence` is the sequence the first appended entry receives;
    /// the caller derives it from the entries it scanned at startup.
    pub fn open(path: impl AsRef<Path>, sync_mode: SyncMode, next_sequence: u64) -> WalResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                info!(dir = %parent.display(), "Created WAL directory");
            }
        }

        let file = Self::open_append(&path)?;
        let bytes_written = file.metadata()?.len();

        Ok(Self {
            path,
            file,
            next_sequence: next_sequence.max(1),
            sync_mode,
            last_sync: Instant::now(),
            bytes_written,
        })
    }

    fn open_append(path: &Path) -> WalResult<File> {
        Ok(OpenOptions::new().create(true).append(true).open(path)?)
    }

    /// Append `entry`, overwriting its sequence with the next one.
    ///
    /// Returns the assigned sequence number. A failed write or sync cuts the
    /// file back to the last complete frame before the error is returned, so
    /// a torn frame never sits in front of later entries.
    pub fn append(&mut self, mut entry: LogEntry) -> WalResult<u64> {
        self.repair_tail()?;

        let sequence = self.next_sequence;
        entry.sequence = sequence;

        let bytes = entry.serialize();
        if let Err(e) = self.write_frame(&bytes) {
            self.cut_back();
            return Err(e);
        }
        self.next_sequence += 1;
        self.bytes_written += bytes.len() as u64;

        debug!(sequence, transaction_id = %entry.transaction_id, "Appended WAL entry");
        Ok(sequence)
    }

    fn write_frame(&mut self, bytes: &[u8]) -> WalResult<()> {
        self.file.write_all(bytes)?;
        self.maybe_sync()
    }

    /// Best effort: the next append retries through `repair_tail`.
    fn cut_back(&mut self) {
        if let Err(e) = self.file.set_len(self.bytes_written).and_then(|()| self.file.sync_all()) {
            warn!(path = %self.path.display(), error = %e, "Could not cut torn WAL frame");
        }
    }

    /// Drop anything past the last frame this writer completed.
    fn repair_tail(&mut self) -> WalResult<()> {
        let on_disk = self.file.metadata()?.len();
        if on_disk > self.bytes_written {
            warn!(
                path = %self.path.display(),
                torn_bytes = on_disk - self.bytes_written,
                "Cutting partial WAL frame before append"
            );
            self.file.set_len(self.bytes_written)?;
            self.sync()?;
        }
        Ok(())
    }

    /// Force an immediate `fsync`, regardless of the configured `SyncMode`.
    pub fn sync(&mut self) -> WalResult<()> {
        self.file.sync_all()?;
        self.last_sync = Instant::now();
        Ok(())
    }

    /// Drop every entry. Sequence numbering continues where it was.
    pub fn truncate(&mut self) -> WalResult<()> {
        self.file.set_len(0)?;
        self.sync()?;
        self.bytes_written = 0;
        Ok(())
    }

    /// Atomically replace the log with `compacted` (a fully written and
    /// synced file in the same directory) and reopen the append handle.
    pub fn replace_with(&mut self, compacted: &Path) -> WalResult<()> {
        fs::rename(compacted, &self.path)?;
        if let Some(parent) = self.path.parent() {
            // Persist the rename itself where the platform allows it.
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        self.file = Self::open_append(&self.path)?;
        self.bytes_written = self.file.metadata()?.len();
        self.last_sync = Instant::now();
        Ok(())
    }

    /// The sequence number the next append will receive.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the log file in bytes.
    pub fn len(&self) -> u64 {
        self.bytes_written
    }

    pub fn is_empty(&self) -> bool {
        self.bytes_written == 0
    }

    fn maybe_sync(&mut self) -> WalResult<()> {
        match self.sync_mode {
            SyncMode::Fsync => self.sync()?,
            SyncMode::Periodic(interval) => {
                if self.last_sync.elapsed() >= interval {
                    self.sync()?;
                }
            }
            SyncMode::Async => {}
        }
        Ok(())
    }
}
