//! Fault injection for tests of code that sits on top of a [`Datastore`].
//!
//! [`FaultyDatastore`] delegates to a [`MemoryDatastore`] and can be told to
//! fail selected operations, or to close a campaign right after handing out
//! a running snapshot of it.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::datastore::{Datastore, DatastoreError, DatastoreResult, ExecutionUpdate};
use crate::memory::MemoryDatastore;
use crate::types::{
    Campaign, CampaignStatus, Execution, ExecutionStatus, Host, HostDetails, Label,
    LabelQueryExecution, NewCampaign, Query, Target,
};

#[derive(Debug, Default)]
pub struct FaultyDatastore {
    inner: MemoryDatastore,
    fail_update_execution: AtomicBool,
    fail_campaign_targets: AtomicBool,
    close_on_campaign_read: AtomicBool,
}

fn injected(operation: &str) -> DatastoreError {
    DatastoreError::Corrupt(format!("injected {operation} failure"))
}

impl FaultyDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryDatastore {
        &self.inner
    }

    pub fn fail_update_execution(&self, fail: bool) {
        self.fail_update_execution.store(fail, Ordering::SeqCst);
    }

    pub fn fail_campaign_targets(&self, fail: bool) {
        self.fail_campaign_targets.store(fail, Ordering::SeqCst);
    }

    /// The next `campaign()` read of a running campaign returns it as
    /// running and then marks it complete.
    pub fn close_on_next_campaign_read(&self) {
        self.close_on_campaign_read.store(true, Ordering::SeqCst);
    }
}

impl Datastore for FaultyDatastore {
    fn enroll_host(
        &self,
        osquery_host_id: &str,
        node_key: &str,
        now: DateTime<Utc>,
    ) -> DatastoreResult<Host> {
        self.inner.enroll_host(osquery_host_id, node_key, now)
    }

    fn save_host(&self, host: Host) -> DatastoreResult<Host> {
        self.inner.save_host(host)
    }

    fn host(&self, id: u64) -> DatastoreResult<Option<Host>> {
        self.inner.host(id)
    }

    fn host_by_node_key(&self, node_key: &str) -> DatastoreResult<Option<Host>> {
        self.inner.host_by_node_key(node_key)
    }

    fn hosts_by_ids(&self, ids: &[u64]) -> DatastoreResult<Vec<Host>> {
        self.inner.hosts_by_ids(ids)
    }

    fn mark_host_seen(&self, host_id: u64, now: DateTime<Utc>) -> DatastoreResult<()> {
        self.inner.mark_host_seen(host_id, now)
    }

    fn update_host_details(
        &self,
        host_id: u64,
        details: &HostDetails,
        now: DateTime<Utc>,
    ) -> DatastoreResult<()> {
        self.inner.update_host_details(host_id, details, now)
    }

    fn new_label(&self, name: &str, query: &str, now: DateTime<Utc>) -> DatastoreResult<Label> {
        self.inner.new_label(name, query, now)
    }

    fn labels(&self) -> DatastoreResult<Vec<Label>> {
        self.inner.labels()
    }

    fn record_label_query_execution(&self, row: LabelQueryExecution) -> DatastoreResult<()> {
        self.inner.record_label_query_execution(row)
    }

    fn label_query_executions(&self, label_id: u64) -> DatastoreResult<Vec<LabelQueryExecution>> {
        self.inner.label_query_executions(label_id)
    }

    fn label_query_executions_for_host(
        &self,
        host_id: u64,
    ) -> DatastoreResult<Vec<LabelQueryExecution>> {
        self.inner.label_query_executions_for_host(host_id)
    }

    fn new_query(
        &self,
        name: &str,
        query: &str,
        saved: bool,
        now: DateTime<Utc>,
    ) -> DatastoreResult<Query> {
        self.inner.new_query(name, query, saved, now)
    }

    fn query(&self, id: u64) -> DatastoreResult<Option<Query>> {
        self.inner.query(id)
    }

    fn new_campaign(&self, campaign: NewCampaign) -> DatastoreResult<Campaign> {
        self.inner.new_campaign(campaign)
    }

    fn campaign(&self, id: u64) -> DatastoreResult<Option<Campaign>> {
        let campaign = self.inner.campaign(id)?;
        if let Some(c) = &campaign {
            if c.status == CampaignStatus::Running
                && self.close_on_campaign_read.swap(false, Ordering::SeqCst)
            {
                self.inner
                    .set_campaign_status(id, CampaignStatus::Complete)?;
            }
        }
        Ok(campaign)
    }

    fn running_campaigns(&self) -> DatastoreResult<Vec<Campaign>> {
        self.inner.running_campaigns()
    }

    fn set_campaign_status(&self, id: u64, status: CampaignStatus) -> DatastoreResult<()> {
        self.inner.set_campaign_status(id, status)
    }

    fn new_campaign_target(&self, campaign_id: u64, target: Target) -> DatastoreResult<()> {
        self.inner.new_campaign_target(campaign_id, target)
    }

    fn campaign_targets(&self, campaign_id: u64) -> DatastoreResult<Vec<Target>> {
        if self.fail_campaign_targets.load(Ordering::SeqCst) {
            return Err(injected("campaign_targets"));
        }
        self.inner.campaign_targets(campaign_id)
    }

    fn get_or_create_execution(
        &self,
        campaign_id: u64,
        host_id: u64,
        status: ExecutionStatus,
        now: DateTime<Utc>,
    ) -> DatastoreResult<Execution> {
        self.inner
            .get_or_create_execution(campaign_id, host_id, status, now)
    }

    fn execution(&self, id: u64) -> DatastoreResult<Option<Execution>> {
        self.inner.execution(id)
    }

    fn update_execution(
        &self,
        id: u64,
        status: ExecutionStatus,
        error: Option<String>,
        duration: Duration,
    ) -> DatastoreResult<ExecutionUpdate> {
        if self.fail_update_execution.load(Ordering::SeqCst) {
            return Err(injected("update_execution"));
        }
        self.inner.update_execution(id, status, error, duration)
    }

    fn executions_for_campaign(&self, campaign_id: u64) -> DatastoreResult<Vec<Execution>> {
        self.inner.executions_for_campaign(campaign_id)
    }
}
