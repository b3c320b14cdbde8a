//! Typed error hierarchy for the dashboard client.
//!
//! Four top-level enums cover the four subsystems:
//! - `ApiError`: REST calls against the backend
//! - `RealtimeError`: realtime socket connect and framing failures
//! - `ChatError`: chat history and streaming turn failures
//! - `ConfigError`: configuration loading and validation

use thiserror::Error;

/// Errors from the REST API client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Non-2xx response. The body is carried verbatim.
    #[error("API {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("No session token available")]
    Unauthenticated,

    #[error("Invalid base URL '{url}'")]
    InvalidUrl { url: String },
}

impl ApiError {
    /// HTTP status of the failed response, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Errors from the realtime connection layer.
#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("Failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("Session token cannot be used as a handshake credential")]
    InvalidToken,

    #[error("Connect timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Socket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Malformed frame: {0}")]
    Protocol(String),

    #[error("Connection closed")]
    Closed,
}

/// Errors from the chat streaming engine.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Chat request failed: {0}")]
    Api(#[from] ApiError),

    #[error("Chat stream interrupted: {0}")]
    Stream(#[source] reqwest::Error),
}

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
