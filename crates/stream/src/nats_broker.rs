//! NATS result broker.
//!
//! One shared client publishes; each subscription is a core NATS
//! subscriber that is explicitly unsubscribed when it ends.

use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use osfleet_core::DistributedQueryResult;

use crate::broker::ResultBroker;
use crate::error::{BrokerError, BrokerResult};
use crate::registry::SubscriptionRegistry;
use crate::topic::nats_subject;

/// Broker backed by core NATS subjects.
pub struct NatsBroker {
    client: async_nats::Client,
    registry: Arc<SubscriptionRegistry>,
    capacity: usize,
    write_timeout: Duration,
}

impl NatsBroker {
    /// Connect to the NATS server at `url`.
    pub async fn connect(
        url: &str,
        capacity: usize,
        write_timeout: Duration,
    ) -> BrokerResult<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        info!(url, "Connected to NATS result broker");

        Ok(Self {
            client,
            registry: Arc::new(SubscriptionRegistry::new()),
            capacity: capacity.max(1),
            write_timeout,
        })
    }
}

#[async_trait]
impl ResultBroker for NatsBroker {
    async fn write_result(&self, result: &DistributedQueryResult) -> BrokerResult<()> {
        let subject = nats_subject(result.campaign_id);
        let payload = serde_json::to_vec(result)?;

        tokio::time::timeout(
            self.write_timeout,
            self.client.publish(subject.clone(), payload.into()),
        )
        .await
        .map_err(|_| BrokerError::Timeout(format!("publish to {subject}")))?
        .map_err(|e| BrokerError::Publish(e.to_string()))?;

        debug!(subject = %subject, "Result published");
        Ok(())
    }

    async fn read_channel(
        &self,
        cancel: CancellationToken,
        campaign_id: u64,
    ) -> BrokerResult<mpsc::Receiver<DistributedQueryResult>> {
        let subject = nats_subject(campaign_id);
        let mut subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        let (tx, rx) = mpsc::channel(self.capacity);
        let subscription = self.registry.register(campaign_id, &cancel);
        let registry = self.registry.clone();

        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = subscription.token.cancelled() => break,
                    message = subscriber.next() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };

                let result: DistributedQueryResult =
                    match serde_json::from_slice(&message.payload) {
                        Ok(result) => result,
                        Err(e) => {
                            warn!(subject = %subject, error = %e, "Malformed result on subject");
                            continue;
                        }
                    };

                tokio::select! {
                    _ = subscription.token.cancelled() => break,
                    sent = tx.send(result) => if sent.is_err() { break },
                }
            }

            if let Err(e) = subscriber.unsubscribe().await {
                debug!(subject = %subject, error = %e, "Unsubscribe failed");
            }
            registry.remove(&subscription);
            debug!(subject = %subject, subscription_id = subscription.id, "Subscription released");
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

impl Drop for NatsBroker {
    fn drop(&mut self) {
        self.registry.close_all();
    }
}
