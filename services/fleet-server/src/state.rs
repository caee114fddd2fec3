use anyhow::Context;
use std::sync::Arc;
use tracing::info;

use osfleet_campaign::{CampaignManager, CampaignStreamer, QueryDistributor};
use osfleet_core::{AppConfig, Datastore, DatastoreBackend, MemoryDatastore, SqliteDatastore};
use osfleet_identity::HostAuth;
use osfleet_stream::ResultBroker;

use crate::logs::{FileLogSink, OsqueryLogSink, TracingLogSink};
use crate::osquery_config::{OsqueryConfigProvider, StaticConfigProvider};

pub struct AppState {
    pub config: AppConfig,
    pub datastore: Arc<dyn Datastore>,
    pub broker: Arc<dyn ResultBroker>,
    pub host_auth: HostAuth,
    pub manager: Arc<CampaignManager>,
    pub distributor: QueryDistributor,
    pub streamer: CampaignStreamer,
    pub config_provider: Arc<dyn OsqueryConfigProvider>,
    pub log_sink: Arc<dyn OsqueryLogSink>,
}

impl AppState {
    /// Build every service the configuration asks for.
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let datastore: Arc<dyn Datastore> =
            match (&config.datastore.backend, &config.datastore.path) {
                (DatastoreBackend::Sqlite, Some(path)) => Arc::new(
                    SqliteDatastore::open(path).with_context(|| {
                        format!("Failed to open datastore at {}", path.display())
                    })?,
                ),
                (DatastoreBackend::Sqlite, None) => {
                    anyhow::bail!("datastore.path is required for the sqlite backend")
                }
                (DatastoreBackend::Memory, _) => Arc::new(MemoryDatastore::new()),
            };

        let broker = osfleet_stream::connect(&config.broker)
            .await
            .context("Failed to connect result broker")?;

        let config_provider =
            StaticConfigProvider::from_optional_file(config.osquery.config_file.as_deref())
                .context("Failed to load osquery config document")?;

        let log_sink: Arc<dyn OsqueryLogSink> =
            match (&config.osquery.status_log_file, &config.osquery.result_log_file) {
                (Some(status), Some(result)) => Arc::new(
                    FileLogSink::open(status, result).context("Failed to open osquery log files")?,
                ),
                _ => Arc::new(TracingLogSink),
            };

        info!(
            datastore = ?config.datastore.backend,
            broker = ?config.broker.backend,
            "Fleet services initialized"
        );

        Ok(Self::from_parts(config, datastore, broker)
            .with_config_provider(Arc::new(config_provider))
            .with_log_sink(log_sink))
    }

    /// Wire services around an existing datastore and broker.
    pub fn from_parts(
        config: AppConfig,
        datastore: Arc<dyn Datastore>,
        broker: Arc<dyn ResultBroker>,
    ) -> Self {
        let host_auth = HostAuth::from_config(datastore.clone(), &config.osquery);
        let manager = Arc::new(CampaignManager::from_config(
            datastore.clone(),
            broker.clone(),
            &config,
        ));
        let distributor = QueryDistributor::from_config(datastore.clone(), &config);
        let streamer = CampaignStreamer::new(manager.clone(), config.campaign.status_interval());

        Self {
            config,
            datastore,
            broker,
            host_auth,
            manager,
            distributor,
            streamer,
            config_provider: Arc::new(StaticConfigProvider::default()),
            log_sink: Arc::new(TracingLogSink),
        }
    }

    pub fn with_config_provider(mut self, provider: Arc<dyn OsqueryConfigProvider>) -> Self {
        self.config_provider = provider;
        self
    }

    pub fn with_log_sink(mut self, sink: Arc<dyn OsqueryLogSink>) -> Self {
        self.log_sink = sink;
        self
    }
}
