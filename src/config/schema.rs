//! Configuration schema for cairn
//!
//! Configuration is stored at `~/.config/cairn/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Remote service settings
    pub remote: RemoteConfig,

    /// Mount synchronization settings
    pub sync: SyncConfig,

    /// Build join polling settings
    pub join: JoinConfig,

    /// Slim image defaults
    pub image: ImageConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Remote service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Backend name. Only "local" is built in.
    pub backend: String,

    /// Store directory for the local backend
    pub store_dir: Option<PathBuf>,

    /// Client identifier sent with create requests (generated when absent)
    pub client_id: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            backend: "local".to_string(),
            store_dir: None,
            client_id: None,
        }
    }
}

/// Mount synchronization configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Concurrent hashing workers (defaults to available parallelism)
    pub hash_workers: Option<usize>,
}

impl SyncConfig {
    /// Resolve the worker count, falling back to available parallelism
    pub fn workers(&self) -> usize {
        self.hash_workers
            .filter(|n| *n > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4)
            })
    }
}

/// Join polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinConfig {
    /// How long the remote may block a single join call waiting for a state change
    pub blocking_timeout_secs: u64,

    /// Client-side deadline for one join attempt
    pub request_timeout_secs: u64,

    /// Attempts per join call before a transport error surfaces
    pub max_attempts: u32,

    /// First retry delay in milliseconds (doubles per attempt)
    pub retry_base_delay_ms: u64,

    /// Upper bound on the retry delay in milliseconds
    pub retry_max_delay_ms: u64,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            blocking_timeout_secs: 20,
            request_timeout_secs: 10,
            max_attempts: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 2000,
        }
    }
}

impl JoinConfig {
    pub fn blocking_timeout(&self) -> Duration {
        Duration::from_secs(self.blocking_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Slim image defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Python version used for the slim base image tags
    pub python_version: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            python_version: "3.11.9".to_string(),
        }
    }
}

impl Config {
    /// Check cross-field constraints that serde defaults cannot express.
    ///
    /// Returns the reason of the first violation.
    pub fn validate(&self) -> Result<(), String> {
        if self.join.max_attempts == 0 {
            return Err("join.max_attempts must be at least 1".to_string());
        }
        if self.join.request_timeout_secs == 0 {
            return Err("join.request_timeout_secs must be at least 1".to_string());
        }
        if self.join.request_timeout_secs >= self.join.blocking_timeout_secs {
            return Err(format!(
                "join.request_timeout_secs ({}) must be shorter than join.blocking_timeout_secs ({})",
                self.join.request_timeout_secs, self.join.blocking_timeout_secs
            ));
        }
        match self.general.log_format.as_str() {
            "text" | "json" => Ok(()),
            other => Err(format!("general.log_format must be \"text\" or \"json\", got \"{other}\"")),
        }
    }
}
