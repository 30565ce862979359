//! Typed configuration: environment variables for the process, a TOML
//! profile for the operator binary.
//!
//! Env config loads once at startup. In local dev, call
//! `dotenvy::dotenv().ok()` first.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::worker::WorkerOptions;

/// Process-level configuration from environment variables.
#[derive(Debug)]
pub struct Config {
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// Operator profile
// ---------------------------------------------------------------------------

/// TOML profile for the flowq binary: which queue to serve, worker tuning,
/// and the command hooks handling each job name.
///
/// ```toml
/// [queue]
/// name = "mail"
///
/// [worker]
/// concurrency = 8
/// lock_duration_ms = 30000
///
/// [[handler]]
/// name = "send-welcome"
/// command = "hooks/send-welcome.sh"
/// ```
#[derive(Debug, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub queue: QueueProfile,
    #[serde(default)]
    pub worker: WorkerProfile,
    #[serde(default, rename = "handler")]
    pub handlers: Vec<HandlerProfile>,
}

#[derive(Debug, Deserialize)]
pub struct QueueProfile {
    #[serde(default = "default_queue_name")]
    pub name: String,
}

impl Default for QueueProfile {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerProfile {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_lock_duration_ms")]
    pub lock_duration_ms: u64,
    #[serde(default = "default_lock_renew_interval_ms")]
    pub lock_renew_interval_ms: u64,
    #[serde(default = "default_max_stalled_count")]
    pub max_stalled_count: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for WorkerProfile {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            lock_duration_ms: default_lock_duration_ms(),
            lock_renew_interval_ms: default_lock_renew_interval_ms(),
            max_stalled_count: default_max_stalled_count(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl WorkerProfile {
    pub fn to_options(&self) -> WorkerOptions {
        WorkerOptions {
            concurrency: self.concurrency,
            lock_duration: Duration::from_millis(self.lock_duration_ms),
            lock_renew_interval: Duration::from_millis(self.lock_renew_interval_ms),
            max_stalled_count: self.max_stalled_count,
            // Stalled scans on the lease TTL cadence.
            stalled_check_interval: Duration::from_millis(self.lock_duration_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

/// One job name mapped to an executable hook.
#[derive(Debug, Clone, Deserialize)]
pub struct HandlerProfile {
    pub name: String,
    pub command: PathBuf,
}

impl Profile {
    /// Load and parse a profile file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read profile {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad profile {}: {e}", path.display())))
    }
}

fn default_queue_name() -> String {
    "default".to_string()
}

fn default_concurrency() -> usize {
    4
}

fn default_lock_duration_ms() -> u64 {
    30_000
}

fn default_lock_renew_interval_ms() -> u64 {
    15_000
}

fn default_max_stalled_count() -> u32 {
    1
}

fn default_poll_interval_ms() -> u64 {
    1_000
}
