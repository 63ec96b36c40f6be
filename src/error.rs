//! Error types and exit codes for probe-sync

use std::process::ExitCode;
use std::time::Duration;
use thiserror::Error;

/// Main error type for probe-sync operations
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Request {id} timed out after {}ms", .elapsed.as_millis())]
    Timeout { id: u64, elapsed: Duration },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection lost ({})", lost_reason(.ever_received))]
    ConnectionLost { ever_received: bool },

    #[error("Server reported failure: {0}")]
    Remote(String),

    #[error("HTTP request failed after {attempts} attempts: {message}")]
    Http { attempts: u32, message: String },

    #[error("Transport discovery failed: {message}")]
    Discovery { message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Job {job} failed:\n{}", .lines.join("\n"))]
    JobFailed { job: u64, lines: Vec<String> },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Shorthand for a protocol violation with a formatted message
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Convert error to an exit code for the CLI:
    /// - 1: IO / configuration error
    /// - 2: Discovery or connection failure
    /// - 3: Timeout
    /// - 4: Server-side failure (remote or job error)
    /// - 5: Protocol violation
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Io(_) | Self::ConfigError { .. } => ExitCode::from(1),
            Self::Discovery { .. }
            | Self::ConnectionClosed
            | Self::ConnectionLost { .. }
            | Self::Http { .. }
            | Self::WebSocket(_) => ExitCode::from(2),
            Self::Timeout { .. } => ExitCode::from(3),
            Self::Remote(_) | Self::JobFailed { .. } => ExitCode::from(4),
            Self::Protocol { .. } | Self::Json(_) => ExitCode::from(5),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http {
            attempts: 1,
            message: e.to_string(),
        }
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(e: toml::de::Error) -> Self {
        Self::ConfigError {
            message: format!("Failed to parse config: {}", e),
        }
    }
}

fn lost_reason(ever_received: &bool) -> &'static str {
    if *ever_received {
        "after receiving messages"
    } else {
        "never connected"
    }
}

/// Result type alias for probe-sync operations
pub type Result<T> = std::result::Result<T, SyncError>;
