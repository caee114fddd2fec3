//! In-process result broker.
//!
//! Campaign id maps to the senders of its current subscribers. Suitable for
//! a single server process and for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use osfleet_core::DistributedQueryResult;

use crate::broker::ResultBroker;
use crate::error::BrokerResult;
use crate::registry::SubscriptionRegistry;

type Senders = HashMap<u64, Vec<(u64, mpsc::Sender<DistributedQueryResult>)>>;

/// Broker that fans results out over tokio channels.
pub struct MemoryBroker {
    senders: Arc<Mutex<Senders>>,
    registry: Arc<SubscriptionRegistry>,
    capacity: usize,
    write_timeout: Duration,
}

impl MemoryBroker {
    /// Create a broker with per-subscriber buffer `capacity`.
    pub fn new(capacity: usize, write_timeout: Duration) -> Self {
        Self {
            senders: Arc::new(Mutex::new(HashMap::new())),
            registry: Arc::new(SubscriptionRegistry::new()),
            capacity: capacity.max(1),
            write_timeout,
        }
    }

    fn lock(senders: &Mutex<Senders>) -> MutexGuard<'_, Senders> {
        senders.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn drop_sender(senders: &Mutex<Senders>, campaign_id: u64, subscription_id: u64) {
        let mut senders = Self::lock(senders);
        if let Some(subs) = senders.get_mut(&campaign_id) {
            subs.retain(|(id, _)| *id != subscription_id);
            if subs.is_empty() {
                senders.remove(&campaign_id);
            }
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(256, Duration::from_secs(1))
    }
}

#[async_trait]
impl ResultBroker for MemoryBroker {
    async fn write_result(&self, result: &DistributedQueryResult) -> BrokerResult<()> {
        let targets: Vec<_> = Self::lock(&self.senders)
            .get(&result.campaign_id)
            .map(|subs| subs.iter().map(|(_, tx)| tx.clone()).collect())
            .unwrap_or_default();

        if targets.is_empty() {
            debug!(campaign_id = result.campaign_id, "No subscribers, result dropped");
            return Ok(());
        }

        for tx in targets {
            match tx.send_timeout(result.clone(), self.write_timeout).await {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(_)) => {
                    warn!(
                        campaign_id = result.campaign_id,
                        host_id = result.host.id,
                        "Subscriber too slow, result dropped"
                    );
                }
                Err(SendTimeoutError::Closed(_)) => {
                    debug!(campaign_id = result.campaign_id, "Subscriber gone");
                }
            }
        }
        Ok(())
    }

    async fn read_channel(
        &self,
        cancel: CancellationToken,
        campaign_id: u64,
    ) -> BrokerResult<mpsc::Receiver<DistributedQueryResult>> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let subscription = self.registry.register(campaign_id, &cancel);
        Self::lock(&self.senders)
            .entry(campaign_id)
            .or_default()
            .push((subscription.id, tx));

        let senders = self.senders.clone();
        let registry = self.registry.clone();
        tokio::spawn(async move {
            subscription.token.cancelled().await;
            registry.remove(&subscription);
            Self::drop_sender(&senders, subscription.campaign_id, subscription.id);
            debug!(
                campaign_id = subscription.campaign_id,
                subscription_id = subscription.id,
                "Subscription released"
            );
        });

        Ok(rx)
    }

    async fn close(&self, campaign_id: u64) {
        let closed = self.registry.close(campaign_id);
        Self::lock(&self.senders).remove(&campaign_id);
        debug!(campaign_id, subscriptions = closed, "Campaign channel closed");
    }

    fn active_subscriptions(&self, campaign_id: u64) -> usize {
        self.registry.active(campaign_id)
    }
}
