//! Destinations for osquery status and result logs.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;

use osfleet_core::Host;

/// Failure to persist a log batch. Never surfaced to the agent.
#[derive(Debug, Error)]
pub enum LogSinkError {
    #[error("Failed to encode log entry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to write log file: {0}")]
    Io(#[from] std::io::Error),
}

pub type LogSinkResult<T> = Result<T, LogSinkError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    Status,
    Result,
}

impl LogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogType::Status => "status",
            LogType::Result => "result",
        }
    }
}

/// Receives log batches submitted by agents.
///
/// `write` may block; callers on the async runtime run it on the blocking
/// pool.
pub trait OsqueryLogSink: Send + Sync {
    fn write(&self, log_type: LogType, host: &Host, entries: &[Value]) -> LogSinkResult<()>;
}

/// Emits every entry as a structured tracing event.
#[derive(Debug, Default)]
pub struct TracingLogSink;

impl OsqueryLogSink for TracingLogSink {
    fn write(&self, log_type: LogType, host: &Host, entries: &[Value]) -> LogSinkResult<()> {
        for entry in entries {
            info!(
                target: "osquery",
                log_type = log_type.as_str(),
                host_id = host.id,
                hostname = %host.hostname,
                entry = %entry,
                "osquery log"
            );
        }
        Ok(())
    }
}

/// Appends JSON lines to one file per log type.
pub struct FileLogSink {
    status: Mutex<File>,
    result: Mutex<File>,
}

fn append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

impl FileLogSink {
    pub fn open(status_path: &Path, result_path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            status: Mutex::new(append(status_path)?),
            result: Mutex::new(append(result_path)?),
        })
    }
}

impl OsqueryLogSink for FileLogSink {
    fn write(&self, log_type: LogType, host: &Host, entries: &[Value]) -> LogSinkResult<()> {
        let file = match log_type {
            LogType::Status => &self.status,
            LogType::Result => &self.result,
        };

        let mut buf = Vec::new();
        for entry in entries {
            let line = json!({
                "host_id": host.id,
                "host_identifier": host.osquery_host_id,
                "entry": entry,
            });
            serde_json::to_writer(&mut buf, &line)?;
            buf.push(b'\n');
        }

        let mut file = file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        file.write_all(&buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_file_sink_appends_lines_per_type() {
        let dir = std::env::temp_dir().join(format!("osfleet_logs_{}", uuid::Uuid::new_v4()));
        let status = dir.join("status.log");
        let result = dir.join("result.log");
        let sink = FileLogSink::open(&status, &result).unwrap();

        let mut host = Host::new("uuid-1", Utc::now());
        host.id = 4;

        let entries = [json!({"name": "pack/uptime"}), json!({"name": "pack/users"})];
        sink.write(LogType::Result, &host, &entries).unwrap();
        sink.write(LogType::Status, &host, &[json!({"severity": "0"})]).unwrap();

        let result_lines = std::fs::read_to_string(&result).unwrap();
        assert_eq!(result_lines.lines().count(), 2);
        let first_line = result_lines.lines().next().unwrap();
        let first: Value = serde_json::from_str(first_line).unwrap();
        assert_eq!(first["host_id"], 4);
        assert_eq!(first["entry"]["name"], "pack/uptime");

        let status_lines = std::fs::read_to_string(&status).unwrap();
        assert_eq!(status_lines.lines().count(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[cfg(unix)]
    #[test]
    fn test_write_failure_is_an_io_error() {
        let sink = FileLogSink {
            status: Mutex::new(File::open("/dev/null").unwrap()),
            result: Mutex::new(File::open("/dev/null").unwrap()),
        };
        let host = Host::new("uuid-1", Utc::now());

        // Files opened read-only reject writes
        let err = sink
            .write(LogType::Status, &host, &[json!({"severity": "0"})])
            .unwrap_err();
        assert!(matches!(err, LogSinkError::Io(_)));
    }

    #[test]
    fn test_log_type_wire_names() {
        assert_eq!(serde_json::to_value(LogType::Status).unwrap(), "status");
        let parsed: LogType = serde_json::from_str("\"result\"").unwrap();
        assert_eq!(parsed, LogType::Result);
    }
}
