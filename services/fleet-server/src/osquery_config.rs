//! Configuration documents served to agents on config polls.

use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use osfleet_core::{ConfigError, FleetResult, Host};

/// Supplies the osquery config document for a host.
pub trait OsqueryConfigProvider: Send + Sync {
    fn config_for_host(&self, host: &Host) -> FleetResult<Value>;
}

/// Serves the same document to every host.
#[derive(Debug, Clone)]
pub struct StaticConfigProvider {
    document: Value,
}

impl StaticConfigProvider {
    pub fn new(document: Value) -> Self {
        Self { document }
    }

    /// Load a JSON document; it must be an object.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: PathBuf::from(path),
            source,
        })?;
        let document: Value = serde_json::from_str(&content)
            .map_err(|e| ConfigError::Validation(format!("{}: {e}", path.display())))?;
        if !document.is_object() {
            return Err(ConfigError::Validation(format!(
                "{}: osquery config must be a JSON object",
                path.display()
            )));
        }
        Ok(Self::new(document))
    }

    pub fn from_optional_file(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }
}

impl Default for StaticConfigProvider {
    fn default() -> Self {
        Self::new(json!({
            "options": {
                "distributed_plugin": "tls",
                "distributed_tls_read_endpoint": "/api/v1/osquery/distributed/read",
                "distributed_tls_write_endpoint": "/api/v1/osquery/distributed/write",
                "distributed_interval": 10,
                "disable_distributed": false,
                "logger_plugin": "tls",
                "logger_tls_endpoint": "/api/v1/osquery/log",
                "logger_tls_period": 10
            },
            "schedule": {}
        }))
    }
}

impl OsqueryConfigProvider for StaticConfigProvider {
    fn config_for_host(&self, _host: &Host) -> FleetResult<Value> {
        Ok(self.document.clone())
    }
}
