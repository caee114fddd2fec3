//! Configuration management for osfleet.
//!
//! Configuration is read from an optional TOML file and then overridden by
//! environment variables, so container deployments can run without a file.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the TOML config file.
pub const CONFIG_PATH_ENV: &str = "OSFLEET_CONFIG";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub osquery: OsqueryConfig,
    pub campaign: CampaignConfig,
    pub broker: BrokerConfig,
    pub datastore: DatastoreConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_address: String,
    /// Largest accepted request body, after decompression
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OsqueryConfig {
    /// Fleet-wide shared secret gating enrollment
    pub enroll_secret: String,
    /// Random bytes per node key, before base64 encoding
    pub node_key_size: usize,
    /// A host seen within this window counts as online
    pub online_interval_secs: u64,
    /// How often label queries are re-sent to each host
    pub label_update_interval_secs: u64,
    /// How often detail queries are re-sent to each host
    pub detail_update_interval_secs: u64,
    /// `accelerate_seconds` handed out while campaign queries are pending
    pub accelerate_secs: u64,
    /// JSON osquery config document served on config polls
    pub config_file: Option<PathBuf>,
    /// Append status logs here instead of the tracing output
    pub status_log_file: Option<PathBuf>,
    /// Append result logs here instead of the tracing output
    pub result_log_file: Option<PathBuf>,
}

impl Default for OsqueryConfig {
    fn default() -> Self {
        Self {
            enroll_secret: String::new(),
            node_key_size: 24,
            online_interval_secs: 90,
            label_update_interval_secs: 3600,
            detail_update_interval_secs: 3600,
            accelerate_secs: 60,
            config_file: None,
            status_log_file: None,
            result_log_file: None,
        }
    }
}

impl OsqueryConfig {
    pub fn online_interval(&self) -> Duration {
        Duration::from_secs(self.online_interval_secs)
    }

    pub fn label_update_interval(&self) -> Duration {
        Duration::from_secs(self.label_update_interval_secs)
    }

    pub fn detail_update_interval(&self) -> Duration {
        Duration::from_secs(self.detail_update_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignConfig {
    /// Streamer status tick
    pub status_interval_ms: u64,
    /// Lifetime of a campaign unless the operator closes it earlier
    pub default_max_duration_secs: u64,
    /// How often the server closes expired campaigns
    pub expiry_sweep_secs: u64,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            status_interval_ms: 250,
            default_max_duration_secs: 600,
            expiry_sweep_secs: 30,
        }
    }
}

impl CampaignConfig {
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    pub fn default_max_duration(&self) -> Duration {
        Duration::from_secs(self.default_max_duration_secs)
    }

    pub fn expiry_sweep(&self) -> Duration {
        Duration::from_secs(self.expiry_sweep_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerBackend {
    #[default]
    Memory,
    Redis,
    Nats,
}

impl std::str::FromStr for BrokerBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            "nats" => Ok(Self::Nats),
            other => Err(format!("unknown broker backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub backend: BrokerBackend,
    pub redis_url: String,
    pub nats_url: String,
    /// Upper bound on a single publish
    pub write_timeout_ms: u64,
    /// Buffered results per subscriber
    pub channel_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backend: BrokerBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            nats_url: "nats://127.0.0.1:4222".to_string(),
            write_timeout_ms: 1000,
            channel_capacity: 256,
        }
    }
}

impl BrokerConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatastoreBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatastoreConfig {
    pub backend: DatastoreBackend,
    /// SQLite database file
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
}

impl AppConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Load the file named by `OSFLEET_CONFIG` (if any), apply environment
    /// overrides, and validate.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => Self::from_file(path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup. Taking the lookup as a
    /// closure keeps tests off the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("OSFLEET_LISTEN_ADDRESS") {
            self.server.listen_address = addr;
        }
        if let Some(secret) = lookup("OSFLEET_ENROLL_SECRET") {
            self.osquery.enroll_secret = secret;
        }
        if let Some(backend) = lookup("OSFLEET_BROKER") {
            self.broker.backend = backend.parse().map_err(|_| ConfigError::InvalidEnv {
                key: "OSFLEET_BROKER",
                value: backend.clone(),
            })?;
        }
        if let Some(url) = lookup("REDIS_URL") {
            self.broker.redis_url = url;
        }
        if let Some(url) = lookup("NATS_URL") {
            self.broker.nats_url = url;
        }
        if let Some(path) = lookup("OSFLEET_DATASTORE_PATH") {
            self.datastore.backend = DatastoreBackend::Sqlite;
            self.datastore.path = Some(PathBuf::from(path));
        }
        if let Some(json) = lookup("OSFLEET_LOG_JSON") {
            self.logging.json = matches!(json.as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.osquery.enroll_secret.is_empty() {
            return Err(ConfigError::Validation(
                "osquery.enroll_secret must be set".to_string(),
            ));
        }
        if self.osquery.node_key_size == 0 {
            return Err(ConfigError::Validation(
                "osquery.node_key_size must be positive".to_string(),
            ));
        }
        if !(100..=500).contains(&self.campaign.status_interval_ms) {
            return Err(ConfigError::Validation(format!(
                "campaign.status_interval_ms must be within 100..=500, got {}",
                self.campaign.status_interval_ms
            )));
        }
        if self.datastore.backend == DatastoreBackend::Sqlite && self.datastore.path.is_none() {
            return Err(ConfigError::Validation(
                "datastore.path is required for the sqlite backend".to_string(),
            ));
        }
        Ok(())
    }
}
