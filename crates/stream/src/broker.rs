//! Result broker interface.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use osfleet_core::DistributedQueryResult;

use crate::error::BrokerResult;

/// Per-campaign publish/subscribe channel for query results.
///
/// Delivery is best-effort and at-most-once. A result written while no one
/// is subscribed is dropped.
#[async_trait]
pub trait ResultBroker: Send + Sync {
    /// Publish a result to every current subscriber of its campaign.
    ///
    /// Bounded by the configured write timeout; never blocks indefinitely.
    async fn write_result(&self, result: &DistributedQueryResult) -> BrokerResult<()>;

    /// Open a subscription for `campaign_id`.
    ///
    /// The returned channel closes when `cancel` fires or the campaign is
    /// closed; the backing subscription is released either way.
    async fn read_channel(
        &self,
        cancel: CancellationToken,
        campaign_id: u64,
    ) -> BrokerResult<mpsc::Receiver<DistributedQueryResult>>;

    /// End every local subscription for `campaign_id`.
    async fn close(&self, campaign_id: u64);

    /// Number of live local subscriptions for `campaign_id`.
    fn active_subscriptions(&self, campaign_id: u64) -> usize;
}
