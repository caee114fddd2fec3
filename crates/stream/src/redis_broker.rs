//! Redis pub/sub result broker.
//!
//! Publishes go through one shared `ConnectionManager`. Each subscription
//! opens its own pub/sub connection, which is dropped when the subscription
//! task exits.

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use osfleet_core::DistributedQueryResult;

use crate::broker::ResultBroker;
use crate::error::{BrokerError, BrokerResult};
use crate::registry::SubscriptionRegistry;
use crate::topic::redis_channel;

/// Broker backed by Redis `PUBLISH`/`SUBSCRIBE`.
pub struct RedisBroker {
    client: redis::Client,
    publisher: ConnectionManager,
    registry: Arc<SubscriptionRegistry>,
    capacity: usize,
    write_timeout: Duration,
}

impl RedisBroker {
    /// Connect to `url` and set up the shared publishing connection.
    pub async fn connect(
        url: &str,
        capacity: usize,
        write_timeout: Duration,
    ) -> BrokerResult<Self> {
        let client =
            redis::Client::open(url).map_err(|e| BrokerError::Connection(e.to_string()))?;
        let publisher = client
            .get_connection_manager()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        info!(url, "Connected to Redis result broker");

        Ok(Self {
            client,
            publisher,
            registry: Arc::new(SubscriptionRegistry::new()),
            capacity: capacity.max(1),
            write_timeout,
        })
    }
}

#[async_trait]
impl ResultBroker for RedisBroker {
    async fn write_result(&self, result: &DistributedQueryResult) -> BrokerResult<()> {
        let channel = redis_channel(result.campaign_id);
        let payload = serde_json::to_string(result)?;
        let mut conn = self.publisher.clone();

        let receivers: i64 =
            tokio::time::timeout(self.write_timeout, conn.publish(&channel, payload))
                .await
                .map_err(|_| BrokerError::Timeout(format!("publish to {channel}")))?
                .map_err(|e| BrokerError::Publish(e.to_string()))?;

        debug!(channel = %channel, receivers, "Result published");
        Ok(())
    }

    async fn read_channel(
        &self,
        cancel: CancellationToken,
        campaign_id: u64,
    ) -> BrokerResult<mpsc::Receiver<DistributedQueryResult>> {
        let channel = redis_channel(campaign_id);
        let conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;
        let mut pubsub = conn.into_pubsub();
        pubsub
            .subscribe(&channel)
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        let (tx, rx) = mpsc::channel(self.capacity);
        let subscription = self.registry.register(campaign_id, &cancel);
        let registry = self.registry.clone();

        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            loop {
                let msg = tokio::select! {
                    _ = subscription.token.cancelled() => break,
                    msg = messages.next() => match msg {
                        Some(msg) => msg,
                        None => break,
                    },
                };

                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "Unreadable pub/sub payload");
                        continue;
                    }
                };
                let result: DistributedQueryResult = match serde_json::from_str(&payload) {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "Malformed result on channel");
                        continue;
                    }
                };

                tokio::select! {
                    _ = subscription.token.cancelled() => break,
                    sent = tx.send(result) => if sent.is_err() { break },
                }
            }

            registry.remove(&subscription);
            debug!(channel = %channel, subscription_id = subscription.id, "Subscription released");
        });

        Ok(rx)
    }

    async fn close(&self, campaign_id: u64) {
        let closed = self.registry.close(campaign_id);
        debug!(campaign_id, subscriptions = closed, "Campaign channel closed");
    }

    fn active_subscriptions(&self, campaign_id: u64) -> usize {
        self.registry.active(campaign_id)
    }
}

impl Drop for RedisBroker {
    fn drop(&mut self) {
        self.registry.close_all();
    }
}
