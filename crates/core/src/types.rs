//! Fleet data model
//!
//! Records owned by the datastore plus the transient result payload carried
//! over the result broker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// A single osquery result row. osquery reports every column as a string.
pub type Row = HashMap<String, String>;

/// Enrolled osquery agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    /// Datastore-issued identifier
    pub id: u64,
    /// Identifier the agent presented at enrollment (usually the hardware UUID)
    pub osquery_host_id: String,
    /// Current node key; rotated on every enrollment
    #[serde(skip_serializing)]
    pub node_key: Option<String>,
    pub hostname: String,
    pub platform: String,
    pub os_version: String,
    pub osquery_version: String,
    pub created_at: DateTime<Utc>,
    /// Last successful authenticated check-in
    pub seen_time: DateTime<Utc>,
    /// Last time detail query results were applied
    pub detail_updated_at: Option<DateTime<Utc>>,
}

impl Host {
    /// A freshly enrolled host that has not reported any details yet.
    pub fn new(osquery_host_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            osquery_host_id: osquery_host_id.into(),
            node_key: None,
            hostname: String::new(),
            platform: String::new(),
            os_version: String::new(),
            osquery_version: String::new(),
            created_at: now,
            seen_time: now,
            detail_updated_at: None,
        }
    }

    pub fn summary(&self) -> HostSummary {
        HostSummary {
            id: self.id,
            osquery_host_id: self.osquery_host_id.clone(),
            hostname: self.hostname.clone(),
        }
    }
}

/// Host fields carried alongside live results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSummary {
    pub id: u64,
    pub osquery_host_id: String,
    pub hostname: String,
}

/// Host fields reported by detail queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDetails {
    pub hostname: Option<String>,
    pub platform: Option<String>,
    pub os_version: Option<String>,
    pub osquery_version: Option<String>,
}

impl HostDetails {
    pub fn is_empty(&self) -> bool {
        self.hostname.is_none()
            && self.platform.is_none()
            && self.os_version.is_none()
            && self.osquery_version.is_none()
    }

    /// Overlay the reported fields onto a host.
    pub fn apply_to(&self, host: &mut Host) {
        if let Some(hostname) = &self.hostname {
            host.hostname = hostname.clone();
        }
        if let Some(platform) = &self.platform {
            host.platform = platform.clone();
        }
        if let Some(os_version) = &self.os_version {
            host.os_version = os_version.clone();
        }
        if let Some(osquery_version) = &self.osquery_version {
            host.osquery_version = osquery_version.clone();
        }
    }
}

/// Named dynamic host group backed by a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: u64,
    pub name: String,
    pub query: String,
    pub created_at: DateTime<Utc>,
}

/// One evaluation of a label query on a host. Rows accumulate; the newest
/// row for a (host, label) pair decides membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelQueryExecution {
    pub host_id: u64,
    pub label_id: u64,
    pub matches: bool,
    pub updated_at: DateTime<Utc>,
}

/// Stored query text referenced by campaigns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub id: u64,
    pub name: String,
    pub query: String,
    /// Ad-hoc campaign queries are stored unsaved
    pub saved: bool,
    pub created_at: DateTime<Utc>,
}

/// Discriminator for [`Target`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Host,
    Label,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Host => "host",
            TargetType::Label => "label",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "host" => Some(TargetType::Host),
            "label" => Some(TargetType::Label),
            _ => None,
        }
    }
}

/// Reference to either a specific host or a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    #[serde(rename = "type")]
    pub target_type: TargetType,
    pub target_id: u64,
}

impl Target {
    pub fn host(id: u64) -> Self {
        Self {
            target_type: TargetType::Host,
            target_id: id,
        }
    }

    pub fn label(id: u64) -> Self {
        Self {
            target_type: TargetType::Label,
            target_id: id,
        }
    }
}

/// Host and label ids split out of a target list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSelection {
    #[serde(default)]
    pub hosts: Vec<u64>,
    #[serde(default)]
    pub labels: Vec<u64>,
}

impl TargetSelection {
    pub fn new(hosts: Vec<u64>, labels: Vec<u64>) -> Self {
        Self { hosts, labels }
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.labels.is_empty()
    }

    pub fn from_targets(targets: &[Target]) -> Self {
        let mut selection = Self::default();
        for target in targets {
            match target.target_type {
                TargetType::Host => selection.hosts.push(target.target_id),
                TargetType::Label => selection.labels.push(target.target_id),
            }
        }
        selection
    }

    /// Targets with duplicates removed, hosts first.
    pub fn to_targets(&self) -> Vec<Target> {
        let mut targets: Vec<Target> = Vec::new();
        let candidates = self
            .hosts
            .iter()
            .map(|id| Target::host(*id))
            .chain(self.labels.iter().map(|id| Target::label(*id)));
        for target in candidates {
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
        targets
    }
}

/// Lifecycle of a distributed query campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Running,
    Complete,
    Error,
}

impl CampaignStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CampaignStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Running => "running",
            CampaignStatus::Complete => "complete",
            CampaignStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(CampaignStatus::Running),
            "complete" => Some(CampaignStatus::Complete),
            "error" => Some(CampaignStatus::Error),
            _ => None,
        }
    }
}

/// One live query run across a resolved target set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: u64,
    pub query_id: u64,
    pub status: CampaignStatus,
    pub user_id: u64,
    #[serde(with = "duration_secs")]
    pub max_duration: Duration,
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    /// Instant after which the campaign is considered expired.
    pub fn deadline(&self) -> DateTime<Utc> {
        let max = chrono::Duration::from_std(self.max_duration)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        self.created_at + max
    }
}

/// Fields needed to persist a new campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCampaign {
    pub query_id: u64,
    pub user_id: u64,
    pub max_duration: Duration,
    pub created_at: DateTime<Utc>,
}

/// Per-host progress of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Waiting,
    Requested,
    Succeeded,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Succeeded | ExecutionStatus::Failed)
    }

    /// osquery reports 0 for success and any other code for failure.
    pub fn from_osquery_status(code: i64) -> Self {
        if code == 0 {
            ExecutionStatus::Succeeded
        } else {
            ExecutionStatus::Failed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Waiting => "waiting",
            ExecutionStatus::Requested => "requested",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(ExecutionStatus::Waiting),
            "requested" => Some(ExecutionStatus::Requested),
            "succeeded" => Some(ExecutionStatus::Succeeded),
            "failed" => Some(ExecutionStatus::Failed),
            _ => None,
        }
    }
}

/// Execution record for a (campaign, host) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    pub id: u64,
    pub campaign_id: u64,
    pub host_id: u64,
    pub status: ExecutionStatus,
    pub error: Option<String>,
    #[serde(with = "duration_secs")]
    pub execution_duration: Duration,
    pub created_at: DateTime<Utc>,
}

/// Live result payload published from an agent check-in to the operator
/// stream. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedQueryResult {
    pub campaign_id: u64,
    pub host: HostSummary,
    pub rows: Vec<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Liveness counts over a resolved target set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetMetrics {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    pub mia: usize,
    #[serde(rename = "new")]
    pub new_hosts: usize,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
