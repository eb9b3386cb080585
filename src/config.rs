//! Configuration structures
//!
//! All timing knobs live here with the defaults from `constants`. Configs
//! load from TOML and every field falls back to its default when omitted.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::region::RegionLayout;

/// Orchestrator timing and queue sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Per-unit init handshake timeout in milliseconds
    pub init_timeout_ms: u64,
    /// Per-unit stats query timeout in milliseconds
    pub stats_timeout_ms: u64,
    /// Receiver poll interval in microseconds
    pub poll_interval_us: u64,
    /// Grace period for unit shutdown in milliseconds
    pub shutdown_grace_ms: u64,
    /// Event broadcast buffer capacity
    pub event_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            init_timeout_ms: DEFAULT_INIT_TIMEOUT_MS,
            stats_timeout_ms: DEFAULT_STATS_TIMEOUT_MS,
            poll_interval_us: DEFAULT_POLL_INTERVAL_US,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl DispatchConfig {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn stats_timeout(&self) -> Duration {
        Duration::from_millis(self.stats_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Time-sync bridge tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Fixed compensation for downstream processing latency, milliseconds
    pub latency_budget_ms: u64,
    /// How long to wait for the clock to first report running before
    /// falling back to an on-demand offset, milliseconds
    pub offset_wait_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            latency_budget_ms: DEFAULT_LATENCY_BUDGET_MS,
            offset_wait_ms: DEFAULT_OFFSET_WAIT_MS,
        }
    }
}

impl SyncConfig {
    pub fn latency_budget(&self) -> Duration {
        Duration::from_millis(self.latency_budget_ms)
    }

    pub fn offset_wait(&self) -> Duration {
        Duration::from_millis(self.offset_wait_ms)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub dispatch: DispatchConfig,
    pub sync: SyncConfig,
    pub region: RegionLayout,
}

impl LinkConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Platform config file location (`osc-link/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "osc-link")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from the platform location, falling back to defaults when the
    /// file does not exist
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }
}
