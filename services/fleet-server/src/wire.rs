//! osquery TLS remote API bodies.
//!
//! Decoding is lenient where agents are known to vary: result rows may be
//! `""` instead of a list, statuses may be numbers or numeric strings, and
//! row values are stringified.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use osfleet_core::Row;

use crate::logs::LogType;

/// Authenticated request bodies expose the node key they carry.
pub trait HasNodeKey {
    fn node_key(&self) -> &str;
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EnrollRequest {
    #[serde(default)]
    pub enroll_secret: String,
    #[serde(default)]
    pub host_identifier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollResponse {
    pub node_key: String,
}

/// Body of config polls and distributed reads.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NodeKeyRequest {
    #[serde(default)]
    pub node_key: String,
}

impl HasNodeKey for NodeKeyRequest {
    fn node_key(&self) -> &str {
        &self.node_key
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistributedReadResponse {
    pub queries: BTreeMap<String, String>,
    pub accelerate_seconds: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DistributedWriteRequest {
    #[serde(default)]
    pub node_key: String,
    #[serde(default)]
    pub queries: HashMap<String, Value>,
    #[serde(default)]
    pub statuses: HashMap<String, Value>,
    #[serde(default)]
    pub messages: HashMap<String, String>,
}

impl HasNodeKey for DistributedWriteRequest {
    fn node_key(&self) -> &str {
        &self.node_key
    }
}

/// One query's answer from a distributed write.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportedResult {
    pub name: String,
    pub status: i64,
    pub rows: Vec<Row>,
    pub message: Option<String>,
}

impl DistributedWriteRequest {
    /// Every reported query, each decoded independently. Names that only
    /// appear in `statuses` get an empty row list.
    pub fn results(&self) -> Vec<Result<ReportedResult, (String, String)>> {
        let names: BTreeSet<&String> = self.queries.keys().chain(self.statuses.keys()).collect();

        names
            .into_iter()
            .map(|name| -> Result<ReportedResult, (String, String)> {
                let rows = match self.queries.get(name) {
                    Some(value) => decode_rows(value).map_err(|e| (name.clone(), e))?,
                    None => Vec::new(),
                };
                let status = match self.statuses.get(name) {
                    Some(value) => decode_status(value).map_err(|e| (name.clone(), e))?,
                    None => 0,
                };
                Ok(ReportedResult {
                    name: name.clone(),
                    status,
                    rows,
                    message: self
                        .messages
                        .get(name)
                        .filter(|m| !m.is_empty())
                        .cloned(),
                })
            })
            .collect()
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Decode one query's rows. `""` and `null` mean no rows.
pub fn decode_rows(value: &Value) -> Result<Vec<Row>, String> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::String(s) if s.is_empty() => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Object(columns) => Ok(columns
                    .iter()
                    .map(|(k, v)| (k.clone(), stringify(v)))
                    .collect()),
                other => Err(format!("row is not an object: {other}")),
            })
            .collect(),
        other => Err(format!("rows must be a list, got {other}")),
    }
}

/// Decode an osquery status code.
pub fn decode_status(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| format!("status is not an integer: {n}")),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| format!("status is not numeric: {s}")),
        other => Err(format!("status must be a number, got {other}")),
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogRequest {
    #[serde(default)]
    pub node_key: String,
    pub log_type: LogType,
    #[serde(default)]
    pub data: Vec<Value>,
}

impl HasNodeKey for LogRequest {
    fn node_key(&self) -> &str {
        &self.node_key
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeInvalidResponse {
    pub node_invalid: bool,
}
