//! Node configuration
//!
//! Loaded from TOML and overridden from the environment. Sections:
//!
//! ```toml
//! known_users = ["U1", "U2"]
//!
//! [thresholds]
//! high_amount_threshold = "100000"
//!
//! [ledger]
//! data_dir = "./data/ledger"
//!
//! [queue]
//! data_dir = "./data/queue"
//!
//! [sync]
//! max_attempts = 3
//! ```

use fraud_engine::FraudThresholds;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

/// Offline queue storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Data directory for the queue database
    pub data_dir: PathBuf,

    /// fsync every write
    pub sync_writes: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/queue"),
            sync_writes: true,
        }
    }
}

/// Reconciliation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Replay attempts before an entry stays FAILED
    pub max_attempts: u32,

    /// Background poll interval while online (seconds)
    pub poll_interval_secs: u64,

    /// Re-authentication timeout for CHALLENGE on replay (seconds)
    pub auth_timeout_secs: u64,

    /// First retry delay after a failed replay (seconds)
    pub retry_base_secs: u64,

    /// Upper bound on the retry delay (seconds)
    pub retry_max_secs: u64,

    /// Budget for in-run ledger retries (milliseconds)
    pub apply_max_elapsed_ms: u64,

    /// Sync reports kept in the sync log
    pub sync_log_retention: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            poll_interval_secs: 30,
            auth_timeout_secs: 60,
            retry_base_secs: 30,
            retry_max_secs: 3600,
            apply_max_elapsed_ms: 5_000,
            sync_log_retention: 1000,
        }
    }
}

impl SyncConfig {
    /// Poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Re-authentication timeout
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    /// Delay before the next retry after `attempts` failures
    pub fn retry_delay(&self, attempts: u32) -> chrono::Duration {
        let exp = attempts.saturating_sub(1).min(20);
        let secs = self
            .retry_base_secs
            .saturating_mul(1u64 << exp)
            .min(self.retry_max_secs);
        chrono::Duration::seconds(secs as i64)
    }

    /// Reject unusable settings
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".to_string()));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::Config("poll_interval_secs must be positive".to_string()));
        }
        if self.retry_base_secs > self.retry_max_secs {
            return Err(Error::Config(
                "retry_base_secs must not exceed retry_max_secs".to_string(),
            ));
        }
        Ok(())
    }
}

/// Complete node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Fraud thresholds
    pub thresholds: FraudThresholds,

    /// Authoritative ledger
    pub ledger: ledger_core::Config,

    /// Offline queue
    pub queue: QueueConfig,

    /// Reconciliation
    pub sync: SyncConfig,

    /// Users enrolled in the directory at startup
    pub known_users: Vec<String>,

    /// Start with connectivity up
    pub start_online: bool,

    /// Emit JSON logs
    pub log_json: bool,
}

impl NodeConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = NodeConfig::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from the environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.thresholds.apply_env()?;
        self.ledger.apply_env()?;

        if let Ok(dir) = std::env::var("FRAUD_QUEUE_DIR") {
            self.queue.data_dir = PathBuf::from(dir);
        }
        if let Ok(v) = std::env::var("FRAUD_SYNC_MAX_ATTEMPTS") {
            self.sync.max_attempts = parse_env("FRAUD_SYNC_MAX_ATTEMPTS", &v)?;
        }
        if let Ok(v) = std::env::var("FRAUD_SYNC_POLL_SECS") {
            self.sync.poll_interval_secs = parse_env("FRAUD_SYNC_POLL_SECS", &v)?;
        }
        if let Ok(v) = std::env::var("FRAUD_AUTH_TIMEOUT_SECS") {
            self.sync.auth_timeout_secs = parse_env("FRAUD_AUTH_TIMEOUT_SECS", &v)?;
        }
        if let Ok(v) = std::env::var("FRAUD_KNOWN_USERS") {
            self.known_users = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(v) = std::env::var("FRAUD_START_ONLINE") {
            self.start_online = parse_env("FRAUD_START_ONLINE", &v)?;
        }
        if let Ok(v) = std::env::var("FRAUD_LOG_JSON") {
            self.log_json = v == "1" || v.eq_ignore_ascii_case("true");
        }

        self.validate()
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.thresholds.validate()?;
        self.ledger.validate()?;
        self.sync.validate()?;
        if self.queue.data_dir == self.ledger.data_dir {
            return Err(Error::Config(
                "queue and ledger must use different data directories".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::Config(format!("{}: {}", name, e)))
}
