//! Application configuration
//!
//! Centralized configuration management with environment variable support
//! and sensible defaults.

use crate::logging::DEFAULT_LOG_CAPACITY;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Simulated round-trip time for a send, in milliseconds
pub const DEFAULT_SEND_DELAY_MS: u64 = 800;

/// Probability that a simulated send fails
pub const DEFAULT_FAILURE_RATE: f64 = 0.1;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Storage configuration
    pub storage: StorageConfig,
    /// Simulated delivery configuration
    pub delivery: DeliveryConfig,
    /// Number of log entries kept in memory
    pub log_capacity: usize,
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding the persisted store
    pub data_dir: PathBuf,
}

/// Simulated delivery configuration
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Latency applied to every send
    pub send_delay: Duration,
    /// Probability in `0.0..=1.0` that a send fails
    pub failure_rate: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                data_dir: default_data_dir(),
            },
            delivery: DeliveryConfig {
                send_delay: Duration::from_millis(DEFAULT_SEND_DELAY_MS),
                failure_rate: DEFAULT_FAILURE_RATE,
            },
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

impl Config {
    /// Load configuration from environment variables with defaults
    ///
    /// Unparseable values fall back to their defaults; the failure rate is
    /// clamped into `0.0..=1.0`.
    pub fn from_env() -> Self {
        Self {
            storage: StorageConfig {
                data_dir: env::var_os("CHAT_DATA_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(default_data_dir),
            },
            delivery: DeliveryConfig {
                send_delay: Duration::from_millis(
                    env::var("CHAT_SEND_DELAY_MS")
                        .ok()
                        .and_then(|d| d.parse().ok())
                        .unwrap_or(DEFAULT_SEND_DELAY_MS),
                ),
                failure_rate: env::var("CHAT_FAILURE_RATE")
                    .ok()
                    .and_then(|r| r.parse::<f64>().ok())
                    .filter(|r| !r.is_nan())
                    .map(|r| r.clamp(0.0, 1.0))
                    .unwrap_or(DEFAULT_FAILURE_RATE),
            },
            log_capacity: env::var("CHAT_LOG_CAPACITY")
                .ok()
                .and_then(|c| c.parse().ok())
                .unwrap_or(DEFAULT_LOG_CAPACITY),
        }
    }

    /// Path of the JSON store file inside the data directory
    pub fn store_path(&self) -> PathBuf {
        self.storage.data_dir.join("storage.json")
    }
}

/// `~/.local-chat`, or `.local-chat` when there is no home directory
fn default_data_dir() -> PathBuf {
    if let Some(home) = env::var_os("HOME") {
        PathBuf::from(home).join(".local-chat")
    } else {
        PathBuf::from(".local-chat")
    }
}
