//! Signaling server configuration.
//!
//! Configuration is loaded from environment variables. Under `wasmtime
//! serve` these are passed with `--env`.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default path of the relay state snapshot.
pub const DEFAULT_STATE_FILE: &str = "duet_state.json";

/// Default idle timeout in seconds before a silent connection is reaped.
pub const DEFAULT_IDLE_TIMEOUT_SECONDS: u64 = 30;

/// Log filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "duet_signaling=info";

/// Signaling server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Where the relay state is persisted between requests.
    /// `None` keeps it in memory only.
    pub state_file: Option<PathBuf>,

    /// Connections with no poll or signal for this long are treated as
    /// disconnected. `None` disables reaping.
    pub idle_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_file: Some(PathBuf::from(DEFAULT_STATE_FILE)),
            idle_timeout: Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECONDS)),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let state_file = match vars.get("DUET_STATE_FILE").map(|s| s.trim()) {
            None => Some(PathBuf::from(DEFAULT_STATE_FILE)),
            Some("") | Some("none") => None,
            Some(path) => Some(PathBuf::from(path)),
        };

        let idle_timeout_seconds = match vars.get("DUET_IDLE_TIMEOUT_SECONDS") {
            Some(value_str) => value_str.trim().parse::<u64>().map_err(|e| {
                ConfigError::Invalid(format!(
                    "DUET_IDLE_TIMEOUT_SECONDS must be a non-negative integer, got '{}': {}",
                    value_str, e
                ))
            })?,
            None => DEFAULT_IDLE_TIMEOUT_SECONDS,
        };
        let idle_timeout = (idle_timeout_seconds > 0).then(|| Duration::from_secs(idle_timeout_seconds));

        Ok(Self {
            state_file,
            idle_timeout,
        })
    }

    /// In-memory state with reaping disabled
    pub fn in_memory() -> Self {
        Self {
            state_file: None,
            idle_timeout: None,
        }
    }
}
