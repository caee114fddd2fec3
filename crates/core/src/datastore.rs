//! Persistence interface consumed by the campaign engine.
//!
//! Implementations must be safe for concurrent use from many request
//! handlers; any locking is internal to the implementation.

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

use crate::types::{
    Campaign, CampaignStatus, Execution, ExecutionStatus, Host, HostDetails, Label,
    LabelQueryExecution, NewCampaign, Query, Target,
};

/// Errors raised by datastore implementations.
#[derive(Debug, Error)]
pub enum DatastoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Duplicate {kind}: {id}")]
    Duplicate { kind: &'static str, id: String },

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DatastoreError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        DatastoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Result type for datastore operations.
pub type DatastoreResult<T> = Result<T, DatastoreError>;

/// Outcome of [`Datastore::update_execution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionUpdate {
    Updated,
    /// The row was already terminal and was left alone.
    AlreadyTerminal,
    /// The owning campaign is no longer running; the row was left alone.
    CampaignFinished,
}

impl ExecutionUpdate {
    pub fn is_updated(self) -> bool {
        self == ExecutionUpdate::Updated
    }
}

/// Host, label, query, campaign and execution persistence.
pub trait Datastore: Send + Sync {
    // Hosts

    /// Find the host enrolled under `osquery_host_id` or create it, then
    /// store `node_key` as its only valid key.
    fn enroll_host(
        &self,
        osquery_host_id: &str,
        node_key: &str,
        now: DateTime<Utc>,
    ) -> DatastoreResult<Host>;

    /// Insert (`id == 0`) or overwrite a host record.
    fn save_host(&self, host: Host) -> DatastoreResult<Host>;

    fn host(&self, id: u64) -> DatastoreResult<Option<Host>>;

    fn host_by_node_key(&self, node_key: &str) -> DatastoreResult<Option<Host>>;

    /// Hosts with the given ids; unknown ids are skipped.
    fn hosts_by_ids(&self, ids: &[u64]) -> DatastoreResult<Vec<Host>>;

    fn mark_host_seen(&self, host_id: u64, now: DateTime<Utc>) -> DatastoreResult<()>;

    fn update_host_details(
        &self,
        host_id: u64,
        details: &HostDetails,
        now: DateTime<Utc>,
    ) -> DatastoreResult<()>;

    // Labels

    fn new_label(&self, name: &str, query: &str, now: DateTime<Utc>) -> DatastoreResult<Label>;

    fn labels(&self) -> DatastoreResult<Vec<Label>>;

    /// Append a label evaluation row.
    fn record_label_query_execution(&self, row: LabelQueryExecution) -> DatastoreResult<()>;

    /// Every evaluation row recorded for a label, across all hosts.
    fn label_query_executions(&self, label_id: u64) -> DatastoreResult<Vec<LabelQueryExecution>>;

    /// Every evaluation row recorded for a host, across all labels.
    fn label_query_executions_for_host(
        &self,
        host_id: u64,
    ) -> DatastoreResult<Vec<LabelQueryExecution>>;

    // Queries

    fn new_query(
        &self,
        name: &str,
        query: &str,
        saved: bool,
        now: DateTime<Utc>,
    ) -> DatastoreResult<Query>;

    fn query(&self, id: u64) -> DatastoreResult<Option<Query>>;

    // Campaigns

    fn new_campaign(&self, campaign: NewCampaign) -> DatastoreResult<Campaign>;

    fn campaign(&self, id: u64) -> DatastoreResult<Option<Campaign>>;

    fn running_campaigns(&self) -> DatastoreResult<Vec<Campaign>>;

    fn set_campaign_status(&self, id: u64, status: CampaignStatus) -> DatastoreResult<()>;

    fn new_campaign_target(&self, campaign_id: u64, target: Target) -> DatastoreResult<()>;

    fn campaign_targets(&self, campaign_id: u64) -> DatastoreResult<Vec<Target>>;

    // Executions

    /// Return the execution for (campaign, host), creating it with
    /// `status` if none exists. Never creates a second row for a pair.
    fn get_or_create_execution(
        &self,
        campaign_id: u64,
        host_id: u64,
        status: ExecutionStatus,
        now: DateTime<Utc>,
    ) -> DatastoreResult<Execution>;

    fn execution(&self, id: u64) -> DatastoreResult<Option<Execution>>;

    /// Move a non-terminal execution to `status` while its campaign is
    /// still running. Non-terminal to non-terminal moves are allowed; a
    /// terminal row is never touched. The campaign check and the write
    /// happen atomically, so a close racing this call either lands before
    /// it (`CampaignFinished`) or after it.
    fn update_execution(
        &self,
        id: u64,
        status: ExecutionStatus,
        error: Option<String>,
        duration: Duration,
    ) -> DatastoreResult<ExecutionUpdate>;

    fn executions_for_campaign(&self, campaign_id: u64) -> DatastoreResult<Vec<Execution>>;
}
