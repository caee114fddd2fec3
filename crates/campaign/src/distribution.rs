//! Label and detail queries handed to agents alongside campaign queries,
//! plus the wire names that tell the three kinds apart.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use osfleet_core::{
    AppConfig, Datastore, FleetError, FleetResult, Host, HostDetails, LabelQueryExecution, Row,
};

pub const CAMPAIGN_QUERY_PREFIX: &str = "osfleet_distributed_query_";
pub const LABEL_QUERY_PREFIX: &str = "osfleet_label_query_";
pub const DETAIL_QUERY_PREFIX: &str = "osfleet_detail_query_";

/// A distributed query name as sent to and reported by agents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryName {
    /// Campaign execution id
    Campaign(u64),
    /// Label id
    Label(u64),
    /// Detail query name
    Detail(String),
}

impl QueryName {
    pub fn parse(name: &str) -> Option<Self> {
        if let Some(id) = name.strip_prefix(CAMPAIGN_QUERY_PREFIX) {
            return id.parse().ok().map(QueryName::Campaign);
        }
        if let Some(id) = name.strip_prefix(LABEL_QUERY_PREFIX) {
            return id.parse().ok().map(QueryName::Label);
        }
        name.strip_prefix(DETAIL_QUERY_PREFIX)
            .filter(|detail| !detail.is_empty())
            .map(|detail| QueryName::Detail(detail.to_string()))
    }
}

impl fmt::Display for QueryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryName::Campaign(id) => write!(f, "{CAMPAIGN_QUERY_PREFIX}{id}"),
            QueryName::Label(id) => write!(f, "{LABEL_QUERY_PREFIX}{id}"),
            QueryName::Detail(name) => write!(f, "{DETAIL_QUERY_PREFIX}{name}"),
        }
    }
}

/// Fixed host inventory query.
pub struct DetailQuery {
    pub name: &'static str,
    pub sql: &'static str,
    ingest: fn(&Row, &mut HostDetails),
}

fn column(row: &Row, key: &str) -> Option<String> {
    row.get(key).filter(|v| !v.is_empty()).cloned()
}

fn ingest_osquery_info(row: &Row, details: &mut HostDetails) {
    details.osquery_version = column(row, "version");
}

fn ingest_system_info(row: &Row, details: &mut HostDetails) {
    details.hostname = column(row, "hostname");
}

fn ingest_os_version(row: &Row, details: &mut HostDetails) {
    details.platform = column(row, "platform");
    details.os_version = match (column(row, "name"), column(row, "version")) {
        (Some(name), Some(version)) => Some(format!("{name} {version}")),
        (name, version) => name.or(version),
    };
}

pub const DETAIL_QUERIES: &[DetailQuery] = &[
    DetailQuery {
        name: "osquery_info",
        sql: "select version from osquery_info limit 1",
        ingest: ingest_osquery_info,
    },
    DetailQuery {
        name: "system_info",
        sql: "select hostname from system_info limit 1",
        ingest: ingest_system_info,
    },
    DetailQuery {
        name: "os_version",
        sql: "select name, version, platform from os_version limit 1",
        ingest: ingest_os_version,
    },
];

pub fn detail_query(name: &str) -> Option<&'static DetailQuery> {
    DETAIL_QUERIES.iter().find(|q| q.name == name)
}

fn stale(last: Option<DateTime<Utc>>, now: DateTime<Utc>, interval: std::time::Duration) -> bool {
    let interval = Duration::from_std(interval).unwrap_or_else(|_| Duration::zero());
    last.map_or(true, |at| now - at > interval)
}

/// Decides which label and detail queries a host should run and applies
/// their results.
#[derive(Clone)]
pub struct QueryDistributor {
    datastore: Arc<dyn Datastore>,
    label_update_interval: std::time::Duration,
    detail_update_interval: std::time::Duration,
}

impl QueryDistributor {
    pub fn new(datastore: Arc<dyn Datastore>) -> Self {
        Self {
            datastore,
            label_update_interval: std::time::Duration::from_secs(3600),
            detail_update_interval: std::time::Duration::from_secs(3600),
        }
    }

    pub fn from_config(datastore: Arc<dyn Datastore>, config: &AppConfig) -> Self {
        Self {
            datastore,
            label_update_interval: config.osquery.label_update_interval(),
            detail_update_interval: config.osquery.detail_update_interval(),
        }
    }

    pub fn with_intervals(
        mut self,
        label_update_interval: std::time::Duration,
        detail_update_interval: std::time::Duration,
    ) -> Self {
        self.label_update_interval = label_update_interval;
        self.detail_update_interval = detail_update_interval;
        self
    }

    /// Label queries whose last evaluation on `host` is missing or stale,
    /// keyed by wire name.
    pub fn label_queries_for_host(
        &self,
        host: &Host,
        now: DateTime<Utc>,
    ) -> FleetResult<BTreeMap<String, String>> {
        let mut last_run: HashMap<u64, DateTime<Utc>> = HashMap::new();
        for row in self.datastore.label_query_executions_for_host(host.id)? {
            let entry = last_run.entry(row.label_id).or_insert(row.updated_at);
            if row.updated_at > *entry {
                *entry = row.updated_at;
            }
        }

        Ok(self
            .datastore
            .labels()?
            .into_iter()
            .filter(|label| {
                stale(
                    last_run.get(&label.id).copied(),
                    now,
                    self.label_update_interval,
                )
            })
            .map(|label| (QueryName::Label(label.id).to_string(), label.query))
            .collect())
    }

    /// Detail queries when the host's inventory is missing or stale.
    pub fn detail_queries_for_host(
        &self,
        host: &Host,
        now: DateTime<Utc>,
    ) -> BTreeMap<String, String> {
        if !stale(host.detail_updated_at, now, self.detail_update_interval) {
            return BTreeMap::new();
        }
        DETAIL_QUERIES
            .iter()
            .map(|q| (QueryName::Detail(q.name.to_string()).to_string(), q.sql.to_string()))
            .collect()
    }

    /// Record a label evaluation. A failed query records nothing.
    pub fn record_label_result(
        &self,
        host: &Host,
        label_id: u64,
        status_code: i64,
        rows: &[Row],
        now: DateTime<Utc>,
    ) -> FleetResult<()> {
        if status_code != 0 {
            debug!(host_id = host.id, label_id, status_code, "Label query failed on host");
            return Ok(());
        }
        self.datastore.record_label_query_execution(LabelQueryExecution {
            host_id: host.id,
            label_id,
            matches: !rows.is_empty(),
            updated_at: now,
        })?;
        Ok(())
    }

    /// Apply a detail query result to the host record.
    pub fn record_detail_result(
        &self,
        host: &Host,
        name: &str,
        status_code: i64,
        rows: &[Row],
        now: DateTime<Utc>,
    ) -> FleetResult<()> {
        let query = detail_query(name)
            .ok_or_else(|| FleetError::InvalidInput(format!("unknown detail query {name}")))?;
        if status_code != 0 {
            debug!(host_id = host.id, detail = name, status_code, "Detail query failed on host");
            return Ok(());
        }

        let mut details = HostDetails::default();
        if let Some(row) = rows.first() {
            (query.ingest)(row, &mut details);
        }
        self.datastore.update_host_details(host.id, &details, now)?;
        Ok(())
    }
}
