// SPDX-License-Identifier: PMPL-1.0-or-later
//
// DocVault Write-Ahead Log - Configuration
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Settings are read once at startup. Each struct has defaults, serde support
// for embedding in a larger config file, and `from_env()` overrides:
//
//   DOCVAULT_WAL_DIR                   log directory           (./data)
//   DOCVAULT_WAL_PRUNE_AFTER           completions before prune (100)
//   DOCVAULT_WAL_SYNC                  fsync | async | periodic:<ms>
//   DOCVAULT_NODE_ID                   sweeper lease owner     (random)
//   DOCVAULT_WAL_TIMEOUT_SECS          auto-rollback timeout   (600)
//   DOCVAULT_WAL_SWEEP_INTERVAL_MS     sweeper period          (10000)
//   DOCVAULT_WAL_MAX_RECOVERY_ATTEMPTS rollback retries        (10)

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{WalError, WalResult};
use crate::writer::SyncMode;

/// File name of the log inside the log directory.
pub const LOG_FILE_NAME: &str = "tx.log";

/// Settings for the file-backed log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalConfig {
    /// Directory holding `tx.log`.
    pub log_dir: PathBuf,
    /// Compact the log once more than this many completions accumulate.
    pub prune_after_completed: usize,
    /// How appends reach stable storage.
    pub sync_mode: SyncMode,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("./data"),
            prune_after_completed: 100,
            sync_mode: SyncMode::Fsync,
        }
    }
}

impl WalConfig {
    /// Defaults overridden by any `DOCVAULT_WAL_*` variables that are set.
    pub fn from_env() -> WalResult<Self> {
        let mut config = Self::default();
        if let Some(dir) = env_value("DOCVAULT_WAL_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(n) = env_parse("DOCVAULT_WAL_PRUNE_AFTER")? {
            config.prune_after_completed = n;
        }
        if let Some(mode) = env_value("DOCVAULT_WAL_SYNC") {
            config.sync_mode = parse_sync_mode(&mode)?;
        }
        Ok(config)
    }

    /// Full path of the log file.
    pub fn log_path(&self) -> PathBuf {
        self.log_dir.join(LOG_FILE_NAME)
    }
}

/// Settings for the distributed log and its sweeper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributedWalConfig {
    /// Identity of this node as a sweeper lease owner.
    pub node_id: String,
    /// Undecided transactions older than this are rolled back by the sweeper.
    pub auto_rollback_timeout_secs: u64,
    /// How often the sweeper runs.
    pub sweep_interval_ms: u64,
    /// Rollback attempts per overdue transaction before giving up.
    pub max_recovery_attempts: u32,
}

impl Default for DistributedWalConfig {
    fn default() -> Self {
        Self {
            node_id: format!("node-{}", Uuid::new_v4()),
            auto_rollback_timeout_secs: 600,
            sweep_interval_ms: 10_000,
            max_recovery_attempts: 10,
        }
    }
}

impl DistributedWalConfig {
    /// Defaults overridden by any `DOCVAULT_*` variables that are set.
    pub fn from_env() -> WalResult<Self> {
        let mut config = Self::default();
        if let Some(node_id) = env_value("DOCVAULT_NODE_ID") {
            config.node_id = node_id;
        }
        if let Some(secs) = env_parse("DOCVAULT_WAL_TIMEOUT_SECS")? {
            config.auto_rollback_timeout_secs = secs;
        }
        if let Some(ms) = env_parse("DOCVAULT_WAL_SWEEP_INTERVAL_MS")? {
            config.sweep_interval_ms = ms;
        }
        if let Some(attempts) = env_parse("DOCVAULT_WAL_MAX_RECOVERY_ATTEMPTS")? {
            config.max_recovery_attempts = attempts;
        }
        Ok(config)
    }

    pub fn auto_rollback_timeout(&self) -> Duration {
        Duration::from_secs(self.auto_rollback_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Parse `fsync`, `async`, or `periodic:<millis>`.
pub fn parse_sync_mode(value: &str) -> WalResult<SyncMode> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "fsync" => Ok(SyncMode::Fsync),
        "async" => Ok(SyncMode::Async),
        other => other
            .strip_prefix("periodic:")
            .and_then(|ms| ms.parse::<u64>().ok())
            .map(|ms| SyncMode::Periodic(Duration::from_millis(ms)))
            .ok_or_else(|| WalError::Config {
                key: "DOCVAULT_WAL_SYNC".to_string(),
                message: format!("expected fsync, async or periodic:<ms>, got '{other}'"),
            }),
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(key: &str) -> WalResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_value(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| WalError::Config {
                key: key.to_string(),
                message: format!("'{raw}': {e}"),
            })
        })
        .transpose()
}
