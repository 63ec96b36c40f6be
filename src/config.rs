//! probe-sync configuration management.
//!
//! Handles the client configuration file at:
//! - Linux: ~/.config/probe-sync/config.toml
//! - macOS: ~/Library/Application Support/probe-sync/config.toml
//! - Windows: %APPDATA%\probe-sync\config.toml

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::rpc::HttpOptions;

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientConfig {
    /// Analysis server location
    #[serde(default)]
    pub server: ServerConfig,

    /// Request correlation settings
    #[serde(default)]
    pub rpc: RpcConfig,

    /// HTTP emulation settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Probe re-evaluation settings
    #[serde(default)]
    pub probes: ProbeConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the analysis server (discovery runs against it)
    #[serde(default = "default_server_url")]
    pub url: String,
}

fn default_server_url() -> String {
    "http://localhost:8000/".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_server_url(),
        }
    }
}

/// RPC configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Default per-call deadline in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// HTTP emulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Consecutive long-poll failures before the connection counts as lost
    #[serde(default = "default_failure_budget")]
    pub longpoll_failure_budget: u32,

    #[serde(default = "default_longpoll_timeout_ms")]
    pub longpoll_timeout_ms: u64,
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_failure_budget() -> u32 {
    3
}

fn default_longpoll_timeout_ms() -> u64 {
    60_000
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            longpoll_failure_budget: default_failure_budget(),
            longpoll_timeout_ms: default_longpoll_timeout_ms(),
        }
    }
}

/// Probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Debounce window used until the server announces its own
    #[serde(default = "default_change_buffer_ms")]
    pub change_buffer_ms: u64,
}

fn default_change_buffer_ms() -> u64 {
    200
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            change_buffer_ms: default_change_buffer_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

impl ClientConfig {
    /// Default configuration file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("probe-sync").join("config.toml"))
    }

    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| SyncError::ConfigError {
            message: format!("Failed to serialize config: {}", e),
        })?;
        fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(SyncError::ConfigError {
                message: format!(
                    "Invalid log level: {}. Must be one of: {}",
                    self.logging.level,
                    LOG_LEVELS.join(", ")
                ),
            });
        }
        if self.http.retry_attempts == 0 {
            return Err(SyncError::ConfigError {
                message: "http.retry_attempts must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Get a configuration value by key path (e.g., "rpc.timeout_ms")
    pub fn get(&self, key: &str) -> Option<String> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["server", "url"] => Some(self.server.url.clone()),
            ["rpc", "timeout_ms"] => Some(self.rpc.timeout_ms.to_string()),
            ["http", "retry_attempts"] => Some(self.http.retry_attempts.to_string()),
            ["http", "retry_delay_ms"] => Some(self.http.retry_delay_ms.to_string()),
            ["http", "longpoll_failure_budget"] => {
                Some(self.http.longpoll_failure_budget.to_string())
            }
            ["http", "longpoll_timeout_ms"] => Some(self.http.longpoll_timeout_ms.to_string()),
            ["probes", "change_buffer_ms"] => Some(self.probes.change_buffer_ms.to_string()),
            ["logging", "level"] => Some(self.logging.level.clone()),
            _ => None,
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc.timeout_ms)
    }

    pub fn change_buffer(&self) -> Duration {
        Duration::from_millis(self.probes.change_buffer_ms)
    }

    pub fn http_options(&self) -> HttpOptions {
        HttpOptions {
            retry_attempts: self.http.retry_attempts,
            retry_delay: Duration::from_millis(self.http.retry_delay_ms),
            longpoll_failure_budget: self.http.longpoll_failure_budget,
            longpoll_timeout: Duration::from_millis(self.http.longpoll_timeout_ms),
        }
    }
}
