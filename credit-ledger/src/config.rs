//! Configuration for the credit ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Reservation configuration
    pub reservation: ReservationConfig,

    /// Quarantine configuration
    pub quarantine: QuarantineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/credit-ledger"),
            service_name: "credit-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDBConfig::default(),
            reservation: ReservationConfig::default(),
            quarantine: QuarantineConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Target file size (MB)
    pub target_file_size_mb: u64,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 128,
            max_write_buffer_number: 4,
            target_file_size_mb: 128,
            max_background_jobs: 4,
            enable_statistics: false,
        }
    }
}

/// Reservation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationConfig {
    /// Default pending-hold lifetime (seconds)
    pub default_ttl_secs: u64,

    /// Expiry sweep interval (seconds)
    pub sweep_interval_secs: u64,

    /// Extra grace before a pending hold counts as a liveness violation (seconds)
    pub liveness_grace_secs: u64,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 900,      // 15 minutes
            sweep_interval_secs: 60,
            liveness_grace_secs: 300,
        }
    }
}

/// Quarantine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineConfig {
    /// Retention window for replayed rows (days)
    pub retention_days: i64,
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self { retention_days: 30 }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(ttl) = std::env::var("LEDGER_RESERVATION_TTL_SECS") {
            config.reservation.default_ttl_secs = ttl
                .parse()
                .map_err(|_| crate::Error::Config(format!("Bad TTL: {}", ttl)))?;
        }

        if let Ok(days) = std::env::var("LEDGER_QUARANTINE_RETENTION_DAYS") {
            config.quarantine.retention_days = days
                .parse()
                .map_err(|_| crate::Error::Config(format!("Bad retention: {}", days)))?;
        }

        Ok(config)
    }
}
