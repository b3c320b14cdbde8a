//! Layered configuration for the dashboard client.
//!
//! Settings are merged from:
//! 1. `config.toml` (`$XDG_CONFIG_HOME/masdash/config.toml` or `--config`)
//! 2. Environment variables (`MASDASH_*`, `.env` honoured via `dotenvy`)
//! 3. CLI arguments
//!
//! # Configuration File Format
//!
//! ```toml
//! [api]
//! base_url = "https://api.example.com"
//! request_timeout_secs = 30
//!
//! [realtime]
//! url = "wss://api.example.com/ws"
//! reconnect_attempts = 5
//! reconnect_delay_ms = 1000
//! reconnect_delay_max_ms = 10000
//!
//! [polling]
//! task_ms = 10000
//! agent_status_ms = 10000
//! agent_status_merging_ms = 3000
//!
//! [events]
//! max_events_per_task = 500
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ConfigError;
use crate::realtime::RetryPolicy;

pub const ENV_API_BASE_URL: &str = "MASDASH_API_BASE_URL";
pub const ENV_WS_URL: &str = "MASDASH_WS_URL";
pub const ENV_TOKEN: &str = "MASDASH_TOKEN";

/// REST endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Realtime socket settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeSection {
    /// Socket URL. Empty means "derive from `api.base_url`".
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_reconnect_delay_max_ms")]
    pub reconnect_delay_max_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_delay_max_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    20_000
}

impl Default for RealtimeSection {
    fn default() -> Self {
        Self {
            url: String::new(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            reconnect_delay_max_ms: default_reconnect_delay_max_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Revalidation cadence for the resource hooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingSection {
    #[serde(default = "default_task_ms")]
    pub task_ms: u64,
    #[serde(default = "default_task_list_ms")]
    pub task_list_ms: u64,
    #[serde(default = "default_agent_status_ms")]
    pub agent_status_ms: u64,
    #[serde(default = "default_agent_status_merging_ms")]
    pub agent_status_merging_ms: u64,
    #[serde(default = "default_deployment_ms")]
    pub deployment_ms: u64,
}

fn default_task_ms() -> u64 {
    10_000
}

fn default_task_list_ms() -> u64 {
    15_000
}

fn default_agent_status_ms() -> u64 {
    10_000
}

fn default_agent_status_merging_ms() -> u64 {
    3_000
}

fn default_deployment_ms() -> u64 {
    60_000
}

impl Default for PollingSection {
    fn default() -> Self {
        Self {
            task_ms: default_task_ms(),
            task_list_ms: default_task_list_ms(),
            agent_status_ms: default_agent_status_ms(),
            agent_status_merging_ms: default_agent_status_merging_ms(),
            deployment_ms: default_deployment_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsSection {
    #[serde(default = "default_max_events_per_task")]
    pub max_events_per_task: usize,
}

fn default_max_events_per_task() -> usize {
    crate::events::MAX_EVENTS_PER_TASK
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            max_events_per_task: default_max_events_per_task(),
        }
    }
}

/// The complete config.toml structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DashConfig {
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub realtime: RealtimeSection,
    #[serde(default)]
    pub polling: PollingSection,
    #[serde(default)]
    pub events: EventsSection,
    /// Token from the environment or CLI. Never read from or written to the file.
    #[serde(skip)]
    pub token: Option<String>,
}

/// CLI-level overrides, applied last.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub api_url: Option<String>,
    pub ws_url: Option<String>,
    pub token: Option<String>,
}

impl DashConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })
    }

    /// Default config file location, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("masdash").join("config.toml"))
    }

    /// The file `resolve` reads: the explicit path, else the default one.
    pub fn effective_path(config_path: Option<&Path>) -> Option<PathBuf> {
        config_path.map(Path::to_path_buf).or_else(Self::default_path)
    }

    /// Load from `path` if it exists, otherwise return defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) if p.exists() => Self::load(p),
            _ => Ok(Self::default()),
        }
    }

    /// Resolve the full layered configuration: file → env → CLI.
    pub fn resolve(config_path: Option<&Path>, cli: &CliOverrides) -> Result<Self, ConfigError> {
        // A missing .env is the common case.
        let _ = dotenvy::dotenv();

        let path = Self::effective_path(config_path);
        let mut config = Self::load_or_default(path.as_deref())?;
        config.apply_env(|key| std::env::var(key).ok());
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_BASE_URL).filter(|v| !v.is_empty()) {
            self.api.base_url = url;
        }
        if let Some(url) = lookup(ENV_WS_URL).filter(|v| !v.is_empty()) {
            self.realtime.url = url;
        }
        if let Some(token) = lookup(ENV_TOKEN).filter(|v| !v.is_empty()) {
            self.token = Some(token);
        }
    }

    pub fn apply_cli(&mut self, cli: &CliOverrides) {
        if let Some(ref url) = cli.api_url {
            self.api.base_url = url.clone();
        }
        if let Some(ref url) = cli.ws_url {
            self.realtime.url = url.clone();
        }
        if let Some(ref token) = cli.token {
            self.token = Some(token.clone());
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("api.base_url must not be empty".into()));
        }
        if self.realtime.reconnect_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "realtime.reconnect_delay_ms must be greater than zero".into(),
            ));
        }
        if self.realtime.reconnect_delay_max_ms < self.realtime.reconnect_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "realtime.reconnect_delay_max_ms ({}) is below reconnect_delay_ms ({})",
                self.realtime.reconnect_delay_max_ms, self.realtime.reconnect_delay_ms
            )));
        }
        if self.events.max_events_per_task == 0 {
            return Err(ConfigError::Invalid(
                "events.max_events_per_task must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Socket URL: explicit setting, or the API base with `http`→`ws` and path `/ws`.
    pub fn realtime_url(&self) -> String {
        if !self.realtime.url.is_empty() {
            return self.realtime.url.clone();
        }
        let base = self.api.base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}/ws", ws_base)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.realtime.reconnect_attempts,
            Duration::from_millis(self.realtime.reconnect_delay_ms),
            Duration::from_millis(self.realtime.reconnect_delay_max_ms),
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.realtime.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }
}
