//! Campaign lifecycle
//!
//! A campaign moves `Running -> Complete` or `Running -> Error`; both are
//! terminal. Agents pull work, so creating a campaign only persists it and
//! its targets. Executions are created lazily on the first poll from each
//! targeted host.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use osfleet_core::{
    AppConfig, Campaign, CampaignStatus, Datastore, DistributedQueryResult, Execution,
    ExecutionStatus, ExecutionUpdate, FleetError, FleetResult, Host, NewCampaign, Row,
    TargetMetrics, TargetSelection,
};
use osfleet_stream::ResultBroker;

use crate::targets::TargetResolver;

/// Aggregate progress of a campaign at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub campaign_id: u64,
    pub status: CampaignStatus,
    /// Executions that reached a terminal state
    pub actual_results: usize,
    /// Hosts in the live target set
    pub expected_results: usize,
    pub online_hosts: usize,
    pub percent_responded: f64,
    pub percent_online_responded: f64,
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64) * 100.0
}

/// Creates campaigns, hands work to polling hosts and records their results.
pub struct CampaignManager {
    datastore: Arc<dyn Datastore>,
    broker: Arc<dyn ResultBroker>,
    resolver: TargetResolver,
    online_interval: Duration,
    default_max_duration: Duration,
}

impl CampaignManager {
    pub fn new(datastore: Arc<dyn Datastore>, broker: Arc<dyn ResultBroker>) -> Self {
        Self {
            resolver: TargetResolver::new(datastore.clone()),
            datastore,
            broker,
            online_interval: Duration::from_secs(90),
            default_max_duration: Duration::from_secs(600),
        }
    }

    pub fn from_config(
        datastore: Arc<dyn Datastore>,
        broker: Arc<dyn ResultBroker>,
        config: &AppConfig,
    ) -> Self {
        Self::new(datastore, broker)
            .with_online_interval(config.osquery.online_interval())
            .with_max_duration(config.campaign.default_max_duration())
    }

    pub fn with_online_interval(mut self, interval: Duration) -> Self {
        self.online_interval = interval;
        self
    }

    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.default_max_duration = max_duration;
        self
    }

    pub fn broker(&self) -> &Arc<dyn ResultBroker> {
        &self.broker
    }

    pub fn resolver(&self) -> &TargetResolver {
        &self.resolver
    }

    pub fn online_interval(&self) -> Duration {
        self.online_interval
    }

    pub fn campaign(&self, campaign_id: u64) -> FleetResult<Campaign> {
        self.datastore
            .campaign(campaign_id)?
            .ok_or_else(|| FleetError::not_found("campaign", campaign_id))
    }

    /// Start a campaign for a stored query.
    pub fn new_campaign(
        &self,
        query_id: u64,
        selection: &TargetSelection,
        user_id: u64,
    ) -> FleetResult<Campaign> {
        if selection.is_empty() {
            return Err(FleetError::InvalidInput(
                "campaign needs at least one host or label target".to_string(),
            ));
        }

        let query = self
            .datastore
            .query(query_id)?
            .ok_or_else(|| FleetError::InvalidInput(format!("query {query_id} does not exist")))?;
        if query.query.trim().is_empty() {
            return Err(FleetError::InvalidInput(format!(
                "query {query_id} has no SQL text"
            )));
        }

        let campaign = self.datastore.new_campaign(NewCampaign {
            query_id,
            user_id,
            max_duration: self.default_max_duration,
            created_at: Utc::now(),
        })?;

        let targets = selection.to_targets();
        for target in &targets {
            self.datastore.new_campaign_target(campaign.id, *target)?;
        }

        info!(
            campaign_id = campaign.id,
            query_id,
            user_id,
            targets = targets.len(),
            "Campaign started"
        );
        Ok(campaign)
    }

    /// Store `sql` as an unsaved query and start a campaign for it.
    pub fn new_adhoc_campaign(
        &self,
        sql: &str,
        selection: &TargetSelection,
        user_id: u64,
    ) -> FleetResult<Campaign> {
        if sql.trim().is_empty() {
            return Err(FleetError::InvalidInput("query text is empty".to_string()));
        }
        if selection.is_empty() {
            return Err(FleetError::InvalidInput(
                "campaign needs at least one host or label target".to_string(),
            ));
        }

        let now = Utc::now();
        let name = format!("adhoc-{}", now.timestamp_millis());
        let query = self.datastore.new_query(&name, sql, false, now)?;
        self.new_campaign(query.id, selection, user_id)
    }

    /// Queries `host` should run now, keyed by execution id.
    ///
    /// Creates the (campaign, host) execution on first sight; later polls
    /// return the same execution until it reaches a terminal state.
    pub fn pending_queries_for_host(
        &self,
        host: &Host,
        now: DateTime<Utc>,
    ) -> FleetResult<BTreeMap<u64, String>> {
        let mut pending = BTreeMap::new();

        for campaign in self.datastore.running_campaigns()? {
            if now >= campaign.deadline() {
                continue;
            }

            let targets = self.datastore.campaign_targets(campaign.id)?;
            let selection = TargetSelection::from_targets(&targets);
            if !self.resolver.host_in_targets(host, &selection)? {
                continue;
            }

            let Some(query) = self.datastore.query(campaign.query_id)? else {
                warn!(
                    campaign_id = campaign.id,
                    query_id = campaign.query_id,
                    "Campaign query missing, failing campaign"
                );
                self.datastore
                    .set_campaign_status(campaign.id, CampaignStatus::Error)?;
                continue;
            };

            let execution = self.datastore.get_or_create_execution(
                campaign.id,
                host.id,
                ExecutionStatus::Requested,
                now,
            )?;
            if execution.status.is_terminal() {
                continue;
            }
            if execution.status == ExecutionStatus::Waiting {
                let update = self.datastore.update_execution(
                    execution.id,
                    ExecutionStatus::Requested,
                    None,
                    Duration::ZERO,
                )?;
                if update == ExecutionUpdate::CampaignFinished {
                    continue;
                }
            }

            debug!(
                campaign_id = campaign.id,
                execution_id = execution.id,
                host_id = host.id,
                "Campaign query handed to host"
            );
            pending.insert(execution.id, query.query);
        }

        Ok(pending)
    }

    /// Record a host's answer for an execution and publish it to live
    /// subscribers.
    ///
    /// The first terminal write wins: later writes are accepted and ignored.
    pub async fn record_result(
        &self,
        execution_id: u64,
        host: &Host,
        status_code: i64,
        rows: Vec<Row>,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> FleetResult<()> {
        let execution = self
            .datastore
            .execution(execution_id)?
            .ok_or_else(|| FleetError::not_found("execution", execution_id))?;

        if execution.host_id != host.id {
            return Err(FleetError::InvalidInput(format!(
                "execution {execution_id} belongs to another host"
            )));
        }

        if execution.status.is_terminal() {
            debug!(execution_id, host_id = host.id, "Duplicate result ignored");
            return Ok(());
        }

        let campaign = self.campaign(execution.campaign_id)?;
        if campaign.status.is_terminal() {
            return Err(FleetError::InvalidState(format!(
                "campaign {} is {}",
                campaign.id,
                campaign.status.as_str()
            )));
        }

        let status = ExecutionStatus::from_osquery_status(status_code);
        let error = match status {
            ExecutionStatus::Failed => {
                Some(error.unwrap_or_else(|| format!("osquery status {status_code}")))
            }
            _ => None,
        };
        let duration = (now - execution.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO);

        match self
            .datastore
            .update_execution(execution_id, status, error.clone(), duration)?
        {
            ExecutionUpdate::Updated => {}
            ExecutionUpdate::AlreadyTerminal => {
                debug!(execution_id, "Execution completed concurrently, result ignored");
                return Ok(());
            }
            ExecutionUpdate::CampaignFinished => {
                return Err(FleetError::InvalidState(format!(
                    "campaign {} closed before the result was recorded",
                    campaign.id
                )));
            }
        }

        info!(
            campaign_id = campaign.id,
            execution_id,
            host_id = host.id,
            status = status.as_str(),
            rows = rows.len(),
            "Execution completed"
        );

        let result = DistributedQueryResult {
            campaign_id: campaign.id,
            host: host.summary(),
            rows,
            error,
        };
        if let Err(e) = self.broker.write_result(&result).await {
            warn!(campaign_id = campaign.id, error = %e, "Failed to publish result");
        }
        Ok(())
    }

    async fn finish(&self, campaign_id: u64, status: CampaignStatus) -> FleetResult<Campaign> {
        let mut campaign = self.campaign(campaign_id)?;
        if campaign.status.is_terminal() {
            return Ok(campaign);
        }

        self.datastore.set_campaign_status(campaign_id, status)?;
        campaign.status = status;
        self.broker.close(campaign_id).await;
        Ok(campaign)
    }

    /// Mark a campaign complete and end its live streams.
    pub async fn close_campaign(&self, campaign_id: u64) -> FleetResult<Campaign> {
        let campaign = self.finish(campaign_id, CampaignStatus::Complete).await?;
        info!(campaign_id, status = campaign.status.as_str(), "Campaign closed");
        Ok(campaign)
    }

    /// Mark a campaign failed and end its live streams.
    pub async fn fail_campaign(&self, campaign_id: u64, reason: &str) -> FleetResult<Campaign> {
        let campaign = self.finish(campaign_id, CampaignStatus::Error).await?;
        warn!(campaign_id, reason, "Campaign failed");
        Ok(campaign)
    }

    /// Close every running campaign past its deadline.
    pub async fn close_expired_campaigns(&self, now: DateTime<Utc>) -> FleetResult<Vec<u64>> {
        let mut closed = Vec::new();
        for campaign in self.datastore.running_campaigns()? {
            if now >= campaign.deadline() {
                self.close_campaign(campaign.id).await?;
                closed.push(campaign.id);
            }
        }
        if !closed.is_empty() {
            info!(count = closed.len(), "Closed expired campaigns");
        }
        Ok(closed)
    }

    /// Liveness metrics over the campaign's current target set.
    pub fn campaign_metrics(
        &self,
        campaign_id: u64,
        now: DateTime<Utc>,
    ) -> FleetResult<TargetMetrics> {
        let targets = self.datastore.campaign_targets(campaign_id)?;
        let (_, metrics) = self.resolver.resolve(
            &TargetSelection::from_targets(&targets),
            now,
            self.online_interval,
        )?;
        Ok(metrics)
    }

    pub fn campaign_executions(&self, campaign_id: u64) -> FleetResult<Vec<Execution>> {
        Ok(self.datastore.executions_for_campaign(campaign_id)?)
    }

    /// Aggregate progress report.
    pub fn campaign_status(
        &self,
        campaign_id: u64,
        now: DateTime<Utc>,
    ) -> FleetResult<StatusReport> {
        let campaign = self.campaign(campaign_id)?;
        let metrics = self.campaign_metrics(campaign_id, now)?;
        let actual_results = self
            .campaign_executions(campaign_id)?
            .iter()
            .filter(|e| e.status.is_terminal())
            .count();

        Ok(StatusReport {
            campaign_id,
            status: campaign.status,
            actual_results,
            expected_results: metrics.total,
            online_hosts: metrics.online,
            percent_responded: percent(actual_results, metrics.total),
            percent_online_responded: percent(actual_results, metrics.online),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osfleet_core::testing::FaultyDatastore;
    use osfleet_core::{LabelQueryExecution, MemoryDatastore};
    use osfleet_stream::MemoryBroker;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        ds: Arc<MemoryDatastore>,
        broker: Arc<MemoryBroker>,
        manager: CampaignManager,
    }

    impl Fixture {
        fn pending(&self, host: &Host) -> BTreeMap<u64, String> {
            self.manager
                .pending_queries_for_host(host, Utc::now())
                .unwrap()
        }
    }

    fn fixture() -> Fixture {
        let ds = Arc::new(MemoryDatastore::new());
        let broker = Arc::new(MemoryBroker::default());
        let manager = CampaignManager::new(ds.clone(), broker.clone());
        Fixture { ds, broker, manager }
    }

    fn enroll(ds: &MemoryDatastore, name: &str) -> Host {
        ds.enroll_host(name, &format!("key-{name}"), Utc::now()).unwrap()
    }

    fn row(key: &str, value: &str) -> Row {
        let mut row = Row::new();
        row.insert(key.to_string(), value.to_string());
        row
    }

    #[test]
    fn test_new_campaign_validation() {
        let f = fixture();
        let host = enroll(&f.ds, "h1");
        let hosts = TargetSelection::new(vec![host.id], vec![]);

        assert!(matches!(
            f.manager.new_campaign(404, &hosts, 1),
            Err(FleetError::InvalidInput(_))
        ));

        let blank = f.ds.new_query("blank", "   ", true, Utc::now()).unwrap();
        assert!(matches!(
            f.manager.new_campaign(blank.id, &hosts, 1),
            Err(FleetError::InvalidInput(_))
        ));

        let query = f.ds.new_query("q", "select 1", true, Utc::now()).unwrap();
        assert!(matches!(
            f.manager.new_campaign(query.id, &TargetSelection::default(), 1),
            Err(FleetError::InvalidInput(_))
        ));

        let campaign = f.manager.new_campaign(query.id, &hosts, 1).unwrap();
        assert_eq!(campaign.status, CampaignStatus::Running);
        let executions = f.ds.executions_for_campaign(campaign.id).unwrap();
        assert!(executions.is_empty());
    }

    #[test]
    fn test_duplicate_targets_collapse() {
        let f = fixture();
        let host = enroll(&f.ds, "h1");
        let selection = TargetSelection::new(vec![host.id, host.id], vec![]);
        let campaign = f
            .manager
            .new_adhoc_campaign("select 1", &selection, 1)
            .unwrap();
        assert_eq!(f.ds.campaign_targets(campaign.id).unwrap().len(), 1);
        assert!(!f.ds.query(campaign.query_id).unwrap().unwrap().saved);
    }

    #[test]
    fn test_pending_queries_are_idempotent() {
        let f = fixture();
        let host = enroll(&f.ds, "h1");
        let other = enroll(&f.ds, "h2");
        let selection = TargetSelection::new(vec![host.id], vec![]);
        let campaign = f
            .manager
            .new_adhoc_campaign("select * from uptime", &selection, 1)
            .unwrap();

        let now = Utc::now();
        let first = f.manager.pending_queries_for_host(&host, now).unwrap();
        let second = f.manager.pending_queries_for_host(&host, now).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first, second);
        assert_eq!(first.values().next().unwrap(), "select * from uptime");

        let executions = f.ds.executions_for_campaign(campaign.id).unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].status, ExecutionStatus::Requested);

        assert!(f.pending(&other).is_empty());
    }

    #[test]
    fn test_waiting_execution_promoted() {
        let f = fixture();
        let host = enroll(&f.ds, "h1");
        let campaign = f
            .manager
            .new_adhoc_campaign("select 1", &TargetSelection::new(vec![host.id], vec![]), 1)
            .unwrap();
        let waiting = f
            .ds
            .get_or_create_execution(campaign.id, host.id, ExecutionStatus::Waiting, Utc::now())
            .unwrap();

        let pending = f.pending(&host);
        assert!(pending.contains_key(&waiting.id));
        assert_eq!(
            f.ds.execution(waiting.id).unwrap().unwrap().status,
            ExecutionStatus::Requested
        );
    }

    #[test]
    fn test_label_targets_follow_latest_row() {
        let f = fixture();
        let host = enroll(&f.ds, "h1");
        let label = f.ds.new_label("linux", "select 1", Utc::now()).unwrap();
        f.manager
            .new_adhoc_campaign("select 1", &TargetSelection::new(vec![], vec![label.id]), 1)
            .unwrap();

        assert!(f.pending(&host).is_empty());

        f.ds.record_label_query_execution(LabelQueryExecution {
            host_id: host.id,
            label_id: label.id,
            matches: true,
            updated_at: Utc::now(),
        })
        .unwrap();
        assert_eq!(f.pending(&host).len(), 1);
    }

    #[tokio::test]
    async fn test_first_terminal_write_wins() {
        let f = fixture();
        let host = enroll(&f.ds, "h1");
        f.manager
            .new_adhoc_campaign("select 1", &TargetSelection::new(vec![host.id], vec![]), 1)
            .unwrap();
        let pending = f.pending(&host);
        let execution_id = *pending.keys().next().unwrap();

        f.manager
            .record_result(execution_id, &host, 0, vec![row("a", "b")], None, Utc::now())
            .await
            .unwrap();
        f.manager
            .record_result(execution_id, &host, 1, vec![], Some("late".into()), Utc::now())
            .await
            .unwrap();

        let execution = f.ds.execution(execution_id).unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Succeeded);
        assert!(execution.error.is_none());
        assert!(f.pending(&host).is_empty());
    }

    #[tokio::test]
    async fn test_failed_status_records_error() {
        let f = fixture();
        let host = enroll(&f.ds, "h1");
        f.manager
            .new_adhoc_campaign("select bogus", &TargetSelection::new(vec![host.id], vec![]), 1)
            .unwrap();
        let execution_id = *f
            .manager
            .pending_queries_for_host(&host, Utc::now())
            .unwrap()
            .keys()
            .next()
            .unwrap();

        f.manager
            .record_result(execution_id, &host, 1, vec![], None, Utc::now())
            .await
            .unwrap();

        let execution = f.ds.execution(execution_id).unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error.as_deref(), Some("osquery status 1"));
    }

    #[tokio::test]
    async fn test_closed_campaign_rejects_results() {
        let f = fixture();
        let host = enroll(&f.ds, "h1");
        let campaign = f
            .manager
            .new_adhoc_campaign("select 1", &TargetSelection::new(vec![host.id], vec![]), 1)
            .unwrap();
        let execution_id = *f
            .manager
            .pending_queries_for_host(&host, Utc::now())
            .unwrap()
            .keys()
            .next()
            .unwrap();

        let mut stream = f
            .broker
            .read_channel(CancellationToken::new(), campaign.id)
            .await
            .unwrap();

        let closed = f.manager.close_campaign(campaign.id).await.unwrap();
        assert_eq!(closed.status, CampaignStatus::Complete);
        assert!(stream.recv().await.is_none());

        assert!(f.pending(&host).is_empty());
        assert!(matches!(
            f.manager
                .record_result(execution_id, &host, 0, vec![], None, Utc::now())
                .await,
            Err(FleetError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_close_between_check_and_write_rejects_result() {
        let ds = Arc::new(FaultyDatastore::new());
        let broker = Arc::new(MemoryBroker::default());
        let manager = CampaignManager::new(ds.clone(), broker.clone());
        let host = enroll(ds.inner(), "h1");
        let campaign = manager
            .new_adhoc_campaign("select 1", &TargetSelection::new(vec![host.id], vec![]), 1)
            .unwrap();
        let execution_id = *manager
            .pending_queries_for_host(&host, Utc::now())
            .unwrap()
            .keys()
            .next()
            .unwrap();
        let mut stream = broker
            .read_channel(CancellationToken::new(), campaign.id)
            .await
            .unwrap();

        // The manager sees a running campaign, then it closes underneath it
        ds.close_on_next_campaign_read();
        let result = manager
            .record_result(execution_id, &host, 0, vec![row("a", "1")], None, Utc::now())
            .await;

        assert!(matches!(result, Err(FleetError::InvalidState(_))));
        assert_eq!(
            ds.execution(execution_id).unwrap().unwrap().status,
            ExecutionStatus::Requested
        );
        assert_eq!(
            manager.campaign(campaign.id).unwrap().status,
            CampaignStatus::Complete
        );
        assert!(stream.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_result_published_to_subscribers() {
        let f = fixture();
        let host = enroll(&f.ds, "h1");
        let campaign = f
            .manager
            .new_adhoc_campaign("select 1", &TargetSelection::new(vec![host.id], vec![]), 1)
            .unwrap();
        let mut stream = f
            .broker
            .read_channel(CancellationToken::new(), campaign.id)
            .await
            .unwrap();

        let execution_id = *f
            .manager
            .pending_queries_for_host(&host, Utc::now())
            .unwrap()
            .keys()
            .next()
            .unwrap();
        f.manager
            .record_result(execution_id, &host, 0, vec![row("version", "5.10")], None, Utc::now())
            .await
            .unwrap();

        let result = stream.recv().await.unwrap();
        assert_eq!(result.campaign_id, campaign.id);
        assert_eq!(result.host.id, host.id);
        assert_eq!(result.rows, vec![row("version", "5.10")]);
    }

    #[tokio::test]
    async fn test_result_for_other_host_rejected() {
        let f = fixture();
        let host = enroll(&f.ds, "h1");
        let intruder = enroll(&f.ds, "h2");
        f.manager
            .new_adhoc_campaign("select 1", &TargetSelection::new(vec![host.id], vec![]), 1)
            .unwrap();
        let execution_id = *f
            .manager
            .pending_queries_for_host(&host, Utc::now())
            .unwrap()
            .keys()
            .next()
            .unwrap();

        assert!(matches!(
            f.manager
                .record_result(execution_id, &intruder, 0, vec![], None, Utc::now())
                .await,
            Err(FleetError::InvalidInput(_))
        ));
        assert!(matches!(
            f.manager
                .record_result(9999, &host, 0, vec![], None, Utc::now())
                .await,
            Err(FleetError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_close_expired_campaigns() {
        let f = fixture();
        let host = enroll(&f.ds, "h1");
        let manager = CampaignManager::new(f.ds.clone(), f.broker.clone())
            .with_max_duration(Duration::from_secs(60));
        let campaign = manager
            .new_adhoc_campaign("select 1", &TargetSelection::new(vec![host.id], vec![]), 1)
            .unwrap();

        let closed = manager.close_expired_campaigns(Utc::now()).await.unwrap();
        assert!(closed.is_empty());

        let later = Utc::now() + chrono::Duration::seconds(61);
        let pending = manager.pending_queries_for_host(&host, later).unwrap();
        assert!(pending.is_empty());
        assert_eq!(
            manager.close_expired_campaigns(later).await.unwrap(),
            vec![campaign.id]
        );
        assert_eq!(
            manager.campaign(campaign.id).unwrap().status,
            CampaignStatus::Complete
        );
    }

    #[tokio::test]
    async fn test_fail_campaign_is_terminal() {
        let f = fixture();
        let host = enroll(&f.ds, "h1");
        let campaign = f
            .manager
            .new_adhoc_campaign("select 1", &TargetSelection::new(vec![host.id], vec![]), 1)
            .unwrap();

        let failed = f.manager.fail_campaign(campaign.id, "query vanished").await.unwrap();
        assert_eq!(failed.status, CampaignStatus::Error);

        // Closing a finished campaign leaves its status alone
        let closed = f.manager.close_campaign(campaign.id).await.unwrap();
        assert_eq!(closed.status, CampaignStatus::Error);
    }

    #[tokio::test]
    async fn test_campaign_status_counts_terminal_executions() {
        let f = fixture();
        let h1 = enroll(&f.ds, "h1");
        let h2 = enroll(&f.ds, "h2");
        let campaign = f
            .manager
            .new_adhoc_campaign("select 1", &TargetSelection::new(vec![h1.id, h2.id], vec![]), 1)
            .unwrap();

        let now = Utc::now();
        let execution_id = *f
            .manager
            .pending_queries_for_host(&h1, now)
            .unwrap()
            .keys()
            .next()
            .unwrap();
        f.manager.pending_queries_for_host(&h2, now).unwrap();
        f.manager
            .record_result(execution_id, &h1, 0, vec![], None, now)
            .await
            .unwrap();

        let report = f.manager.campaign_status(campaign.id, now).unwrap();
        assert_eq!(report.actual_results, 1);
        assert_eq!(report.expected_results, 2);
        assert_eq!(report.online_hosts, 2);
        assert!((report.percent_responded - 50.0).abs() < f64::EPSILON);
        assert_eq!(report.status, CampaignStatus::Running);
    }
}
