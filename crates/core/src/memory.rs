//! In-memory datastore.
//!
//! All tables live in one [`State`] struct behind a single mutex, so every
//! operation is atomic with respect to every other. Used by tests and by
//! single-process deployments that do not need persistence.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::datastore::{Datastore, DatastoreError, DatastoreResult, ExecutionUpdate};
use crate::types::{
    Campaign, CampaignStatus, Execution, ExecutionStatus, Host, HostDetails, Label,
    LabelQueryExecution, NewCampaign, Query, Target,
};

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    hosts: BTreeMap<u64, Host>,
    labels: BTreeMap<u64, Label>,
    label_executions: Vec<LabelQueryExecution>,
    queries: BTreeMap<u64, Query>,
    campaigns: BTreeMap<u64, Campaign>,
    campaign_targets: BTreeMap<u64, Vec<Target>>,
    executions: BTreeMap<u64, Execution>,
    execution_index: HashMap<(u64, u64), u64>,
}

impl State {
    fn issue_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn host_mut(&mut self, id: u64) -> DatastoreResult<&mut Host> {
        self.hosts
            .get_mut(&id)
            .ok_or_else(|| DatastoreError::not_found("host", id))
    }
}

/// Mutex-guarded in-process datastore.
#[derive(Debug, Default)]
pub struct MemoryDatastore {
    state: Mutex<State>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock leaves plain data behind; keep serving.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Datastore for MemoryDatastore {
    fn enroll_host(
        &self,
        osquery_host_id: &str,
        node_key: &str,
        now: DateTime<Utc>,
    ) -> DatastoreResult<Host> {
        let mut state = self.lock();
        let existing = state
            .hosts
            .values()
            .find(|h| h.osquery_host_id == osquery_host_id)
            .map(|h| h.id);

        let id = match existing {
            Some(id) => id,
            None => {
                let id = state.issue_id();
                let mut host = Host::new(osquery_host_id, now);
                host.id = id;
                state.hosts.insert(id, host);
                id
            }
        };

        let host = state.host_mut(id)?;
        host.node_key = Some(node_key.to_string());
        Ok(host.clone())
    }

    fn save_host(&self, mut host: Host) -> DatastoreResult<Host> {
        let mut state = self.lock();
        if host.id == 0 {
            host.id = state.issue_id();
        }
        state.hosts.insert(host.id, host.clone());
        Ok(host)
    }

    fn host(&self, id: u64) -> DatastoreResult<Option<Host>> {
        Ok(self.lock().hosts.get(&id).cloned())
    }

    fn host_by_node_key(&self, node_key: &str) -> DatastoreResult<Option<Host>> {
        Ok(self
            .lock()
            .hosts
            .values()
            .find(|h| h.node_key.as_deref() == Some(node_key))
            .cloned())
    }

    fn hosts_by_ids(&self, ids: &[u64]) -> DatastoreResult<Vec<Host>> {
        let state = self.lock();
        Ok(ids
            .iter()
            .filter_map(|id| state.hosts.get(id).cloned())
            .collect())
    }

    fn mark_host_seen(&self, host_id: u64, now: DateTime<Utc>) -> DatastoreResult<()> {
        self.lock().host_mut(host_id)?.seen_time = now;
        Ok(())
    }

    fn update_host_details(
        &self,
        host_id: u64,
        details: &HostDetails,
        now: DateTime<Utc>,
    ) -> DatastoreResult<()> {
        let mut state = self.lock();
        let host = state.host_mut(host_id)?;
        details.apply_to(host);
        host.detail_updated_at = Some(now);
        Ok(())
    }

    fn new_label(&self, name: &str, query: &str, now: DateTime<Utc>) -> DatastoreResult<Label> {
        let mut state = self.lock();
        if state.labels.values().any(|l| l.name == name) {
            return Err(DatastoreError::Duplicate {
                kind: "label",
                id: name.to_string(),
            });
        }
        let label = Label {
            id: state.issue_id(),
            name: name.to_string(),
            query: query.to_string(),
            created_at: now,
        };
        state.labels.insert(label.id, label.clone());
        Ok(label)
    }

    fn labels(&self) -> DatastoreResult<Vec<Label>> {
        Ok(self.lock().labels.values().cloned().collect())
    }

    fn record_label_query_execution(&self, row: LabelQueryExecution) -> DatastoreResult<()> {
        self.lock().label_executions.push(row);
        Ok(())
    }

    fn label_query_executions(&self, label_id: u64) -> DatastoreResult<Vec<LabelQueryExecution>> {
        Ok(self
            .lock()
            .label_executions
            .iter()
            .filter(|row| row.label_id == label_id)
            .cloned()
            .collect())
    }

    fn label_query_executions_for_host(
        &self,
        host_id: u64,
    ) -> DatastoreResult<Vec<LabelQueryExecution>> {
        Ok(self
            .lock()
            .label_executions
            .iter()
            .filter(|row| row.host_id == host_id)
            .cloned()
            .collect())
    }

    fn new_query(
        &self,
        name: &str,
        query: &str,
        saved: bool,
        now: DateTime<Utc>,
    ) -> DatastoreResult<Query> {
        let mut state = self.lock();
        let record = Query {
            id: state.issue_id(),
            name: name.to_string(),
            query: query.to_string(),
            saved,
            created_at: now,
        };
        state.queries.insert(record.id, record.clone());
        Ok(record)
    }

    fn query(&self, id: u64) -> DatastoreResult<Option<Query>> {
        Ok(self.lock().queries.get(&id).cloned())
    }

    fn new_campaign(&self, campaign: NewCampaign) -> DatastoreResult<Campaign> {
        let mut state = self.lock();
        let record = Campaign {
            id: state.issue_id(),
            query_id: campaign.query_id,
            status: CampaignStatus::Running,
            user_id: campaign.user_id,
            max_duration: campaign.max_duration,
            created_at: campaign.created_at,
        };
        state.campaigns.insert(record.id, record.clone());
        Ok(record)
    }

    fn campaign(&self, id: u64) -> DatastoreResult<Option<Campaign>> {
        Ok(self.lock().campaigns.get(&id).cloned())
    }

    fn running_campaigns(&self) -> DatastoreResult<Vec<Campaign>> {
        Ok(self
            .lock()
            .campaigns
            .values()
            .filter(|c| c.status == CampaignStatus::Running)
            .cloned()
            .collect())
    }

    fn set_campaign_status(&self, id: u64, status: CampaignStatus) -> DatastoreResult<()> {
        let mut state = self.lock();
        let campaign = state
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| DatastoreError::not_found("campaign", id))?;
        campaign.status = status;
        Ok(())
    }

    fn new_campaign_target(&self, campaign_id: u64, target: Target) -> DatastoreResult<()> {
        let mut state = self.lock();
        if !state.campaigns.contains_key(&campaign_id) {
            return Err(DatastoreError::not_found("campaign", campaign_id));
        }
        state
            .campaign_targets
            .entry(campaign_id)
            .or_default()
            .push(target);
        Ok(())
    }

    fn campaign_targets(&self, campaign_id: u64) -> DatastoreResult<Vec<Target>> {
        Ok(self
            .lock()
            .campaign_targets
            .get(&campaign_id)
            .cloned()
            .unwrap_or_default())
    }

    fn get_or_create_execution(
        &self,
        campaign_id: u64,
        host_id: u64,
        status: ExecutionStatus,
        now: DateTime<Utc>,
    ) -> DatastoreResult<Execution> {
        let mut state = self.lock();
        if let Some(id) = state.execution_index.get(&(campaign_id, host_id)) {
            if let Some(existing) = state.executions.get(id) {
                return Ok(existing.clone());
            }
        }

        let execution = Execution {
            id: state.issue_id(),
            campaign_id,
            host_id,
            status,
            error: None,
            execution_duration: Duration::ZERO,
            created_at: now,
        };
        state
            .execution_index
            .insert((campaign_id, host_id), execution.id);
        state.executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    fn execution(&self, id: u64) -> DatastoreResult<Option<Execution>> {
        Ok(self.lock().executions.get(&id).cloned())
    }

    fn update_execution(
        &self,
        id: u64,
        status: ExecutionStatus,
        error: Option<String>,
        duration: Duration,
    ) -> DatastoreResult<ExecutionUpdate> {
        let mut state = self.lock();
        let State {
            campaigns,
            executions,
            ..
        } = &mut *state;
        let execution = executions
            .get_mut(&id)
            .ok_or_else(|| DatastoreError::not_found("execution", id))?;
        if execution.status.is_terminal() {
            return Ok(ExecutionUpdate::AlreadyTerminal);
        }
        let running = campaigns
            .get(&execution.campaign_id)
            .is_some_and(|c| c.status == CampaignStatus::Running);
        if !running {
            return Ok(ExecutionUpdate::CampaignFinished);
        }
        execution.status = status;
        execution.error = error;
        execution.execution_duration = duration;
        Ok(ExecutionUpdate::Updated)
    }

    fn executions_for_campaign(&self, campaign_id: u64) -> DatastoreResult<Vec<Execution>> {
        Ok(self
            .lock()
            .executions
            .values()
            .filter(|e| e.campaign_id == campaign_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn campaign_request() -> NewCampaign {
        NewCampaign {
            query_id: 1,
            user_id: 0,
            max_duration: Duration::from_secs(60),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_enroll_reuses_host_and_replaces_key() {
        let ds = MemoryDatastore::new();
        let now = Utc::now();

        let first = ds.enroll_host("uuid-1", "key-a", now).unwrap();
        let second = ds.enroll_host("uuid-1", "key-b", now).unwrap();

        assert_eq!(first.id, second.id);
        assert!(ds.host_by_node_key("key-a").unwrap().is_none());
        assert_eq!(ds.host_by_node_key("key-b").unwrap().unwrap().id, first.id);
    }

    #[test]
    fn test_ids_are_monotonic() {
        let ds = MemoryDatastore::new();
        let a = ds.new_campaign(campaign_request()).unwrap();
        let b = ds.new_campaign(campaign_request()).unwrap();
        assert!(b.id > a.id);
    }

    #[test]
    fn test_execution_created_once_per_pair() {
        let ds = MemoryDatastore::new();
        let now = Utc::now();
        let first = ds
            .get_or_create_execution(1, 2, ExecutionStatus::Requested, now)
            .unwrap();
        let again = ds
            .get_or_create_execution(1, 2, ExecutionStatus::Requested, now)
            .unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(ds.executions_for_campaign(1).unwrap().len(), 1);
    }

    #[test]
    fn test_terminal_execution_not_overwritten() {
        let ds = MemoryDatastore::new();
        let campaign = ds.new_campaign(campaign_request()).unwrap();
        let exec = ds
            .get_or_create_execution(campaign.id, 2, ExecutionStatus::Requested, Utc::now())
            .unwrap();

        assert_eq!(
            ds.update_execution(exec.id, ExecutionStatus::Succeeded, None, Duration::ZERO)
                .unwrap(),
            ExecutionUpdate::Updated
        );
        assert_eq!(
            ds.update_execution(
                exec.id,
                ExecutionStatus::Failed,
                Some("late".to_string()),
                Duration::ZERO
            )
            .unwrap(),
            ExecutionUpdate::AlreadyTerminal
        );

        let stored = ds.execution(exec.id).unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Succeeded);
        assert!(stored.error.is_none());
    }

    #[test]
    fn test_execution_frozen_once_campaign_closes() {
        let ds = MemoryDatastore::new();
        let campaign = ds.new_campaign(campaign_request()).unwrap();
        let exec = ds
            .get_or_create_execution(campaign.id, 2, ExecutionStatus::Requested, Utc::now())
            .unwrap();
        ds.set_campaign_status(campaign.id, CampaignStatus::Complete)
            .unwrap();

        assert_eq!(
            ds.update_execution(exec.id, ExecutionStatus::Succeeded, None, Duration::ZERO)
                .unwrap(),
            ExecutionUpdate::CampaignFinished
        );
        assert_eq!(
            ds.execution(exec.id).unwrap().unwrap().status,
            ExecutionStatus::Requested
        );
    }

    #[test]
    fn test_campaign_target_requires_campaign() {
        let ds = MemoryDatastore::new();
        let err = ds.new_campaign_target(99, Target::host(1)).unwrap_err();
        assert!(matches!(err, DatastoreError::NotFound { .. }));
    }

    #[test]
    fn test_running_campaigns_filters_terminal() {
        let ds = MemoryDatastore::new();
        let a = ds.new_campaign(campaign_request()).unwrap();
        let b = ds.new_campaign(campaign_request()).unwrap();
        ds.set_campaign_status(a.id, CampaignStatus::Complete).unwrap();

        let running = ds.running_campaigns().unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, b.id);
    }
}
