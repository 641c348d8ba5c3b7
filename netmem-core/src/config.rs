use crate::error::{NetMemError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;
const HOUR_MS: i64 = 60 * 60 * 1000;

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Number of key shards; each shard is one sequential worker.
    #[serde(default = "default_shards")]
    pub shards: usize,
    /// Number of lanes coordinating cluster-wide fan-out.
    #[serde(default = "default_cluster_lanes")]
    pub cluster_lanes: usize,
    /// Lease applied when a write carries no expiry.
    #[serde(default = "default_lease_ms")]
    pub default_lease_ms: i64,
    /// How long a soft-deleted record stays recoverable.
    #[serde(default = "default_tombstone_retention_ms")]
    pub tombstone_retention_ms: i64,
    /// Background sweep period; 0 disables the sweeper.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Deadline for one storage call, SQLite lock waits included.
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("netmem.db")
}

fn default_shards() -> usize {
    4
}

fn default_cluster_lanes() -> usize {
    2
}

fn default_lease_ms() -> i64 {
    7 * DAY_MS
}

fn default_tombstone_retention_ms() -> i64 {
    HOUR_MS
}

fn default_sweep_interval_ms() -> u64 {
    HOUR_MS as u64
}

fn default_io_timeout_ms() -> u64 {
    5_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            shards: default_shards(),
            cluster_lanes: default_cluster_lanes(),
            default_lease_ms: default_lease_ms(),
            tombstone_retention_ms: default_tombstone_retention_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            io_timeout_ms: default_io_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.shards == 0 {
            return Err(NetMemError::Config("shards must be at least 1".to_string()));
        }
        if self.cluster_lanes == 0 {
            return Err(NetMemError::Config(
                "cluster_lanes must be at least 1".to_string(),
            ));
        }
        if self.default_lease_ms <= 0 {
            return Err(NetMemError::Config(
                "default_lease_ms must be positive".to_string(),
            ));
        }
        if self.tombstone_retention_ms < 0 {
            return Err(NetMemError::Config(
                "tombstone_retention_ms cannot be negative".to_string(),
            ));
        }
        if self.io_timeout_ms == 0 {
            return Err(NetMemError::Config(
                "io_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_ms > 0).then(|| Duration::from_millis(self.sweep_interval_ms))
    }
}
