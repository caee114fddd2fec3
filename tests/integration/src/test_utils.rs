//! Test utilities for cross-crate integration tests

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use osfleet_campaign::{CampaignEvent, CampaignManager, CampaignStreamer, QueryDistributor};
use osfleet_core::{Datastore, Host, LabelQueryExecution, MemoryDatastore, SqliteDatastore};
use osfleet_identity::HostAuth;
use osfleet_stream::MemoryBroker;

pub const ENROLL_SECRET: &str = "integration-secret";

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("osfleet=debug")
        .try_init();
}

/// A wired set of fleet services over one datastore.
pub struct TestFleet {
    pub datastore: Arc<dyn Datastore>,
    pub auth: HostAuth,
    pub manager: Arc<CampaignManager>,
    pub distributor: QueryDistributor,
    pub streamer: CampaignStreamer,
}

impl TestFleet {
    pub fn new(datastore: Arc<dyn Datastore>) -> Self {
        init_tracing();
        let broker = Arc::new(MemoryBroker::default());
        let manager = Arc::new(
            CampaignManager::new(datastore.clone(), broker)
                .with_online_interval(Duration::from_secs(90)),
        );
        Self {
            auth: HostAuth::new(datastore.clone(), ENROLL_SECRET),
            distributor: QueryDistributor::new(datastore.clone()),
            streamer: CampaignStreamer::new(manager.clone(), Duration::from_millis(100)),
            manager,
            datastore,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryDatastore::new()))
    }

    pub fn sqlite() -> Self {
        let datastore = SqliteDatastore::open_in_memory().expect("open in-memory sqlite");
        Self::new(Arc::new(datastore))
    }

    /// Enroll a host and return it with its node key.
    pub fn enroll(&self, identifier: &str) -> (Host, String) {
        let node_key = self
            .auth
            .enroll_agent(ENROLL_SECRET, identifier)
            .expect("enroll host");
        let host = self
            .auth
            .authenticate_host(&node_key)
            .expect("authenticate fresh key");
        (host, node_key)
    }

    /// Campaign queries `host` would receive on a check-in now.
    pub fn pending(&self, host: &Host) -> BTreeMap<u64, String> {
        self.manager
            .pending_queries_for_host(host, Utc::now())
            .expect("pending queries")
    }

    /// Create a label whose latest result matches exactly `members`.
    pub fn label_matching(&self, name: &str, members: &[&Host], now: DateTime<Utc>) -> u64 {
        let label = self
            .datastore
            .new_label(name, "select 1", now)
            .expect("create label");
        for host in members {
            self.datastore
                .record_label_query_execution(LabelQueryExecution {
                    host_id: host.id,
                    label_id: label.id,
                    matches: true,
                    updated_at: now,
                })
                .expect("record label membership");
        }
        label.id
    }
}

/// Drain events until `count` results arrived or `timeout` passed.
pub async fn collect_results(
    events: &mut tokio::sync::mpsc::Receiver<CampaignEvent>,
    count: usize,
    timeout: Duration,
) -> Vec<CampaignEvent> {
    let mut results = Vec::new();
    let _ = tokio::time::timeout(timeout, async {
        while results.len() < count {
            match events.recv().await {
                Some(event @ CampaignEvent::Result(_)) => results.push(event),
                Some(_) => {}
                None => break,
            }
        }
    })
    .await;
    results
}
