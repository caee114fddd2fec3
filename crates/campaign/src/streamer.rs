//! Live campaign streams
//!
//! Merges results from the broker with periodic status reports into one
//! event channel per viewer. A stream ends when the viewer cancels or goes
//! away, when the campaign is closed, or when the campaign's maximum
//! duration elapses (the streamer then closes the campaign itself).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use osfleet_core::{DistributedQueryResult, FleetError, FleetResult};

use crate::manager::{CampaignManager, StatusReport};

/// Buffered events per viewer.
const EVENT_BUFFER: usize = 64;

/// One item on a campaign stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CampaignEvent {
    Result(DistributedQueryResult),
    Status(StatusReport),
    Error { error: String },
}

/// Produces per-viewer campaign event streams.
#[derive(Clone)]
pub struct CampaignStreamer {
    manager: Arc<CampaignManager>,
    status_interval: Duration,
}

impl CampaignStreamer {
    pub fn new(manager: Arc<CampaignManager>, status_interval: Duration) -> Self {
        Self {
            manager,
            status_interval,
        }
    }

    /// Open a stream for a running campaign.
    pub async fn stream(
        &self,
        campaign_id: u64,
        cancel: CancellationToken,
    ) -> FleetResult<mpsc::Receiver<CampaignEvent>> {
        let campaign = self.manager.campaign(campaign_id)?;
        if campaign.status.is_terminal() {
            return Err(FleetError::InvalidState(format!(
                "campaign {campaign_id} is {}",
                campaign.status.as_str()
            )));
        }

        let subscription = cancel.child_token();
        let mut results = self
            .manager
            .broker()
            .read_channel(subscription.clone(), campaign_id)
            .await?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let manager = self.manager.clone();
        let status_interval = self.status_interval;
        let remaining = (campaign.deadline() - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(status_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let expiry = tokio::time::sleep(remaining);
            tokio::pin!(expiry);

            info!(campaign_id, "Campaign stream opened");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(campaign_id, "Campaign stream cancelled");
                        break;
                    }
                    _ = &mut expiry => {
                        info!(campaign_id, "Campaign reached its maximum duration");
                        if let Err(e) = manager.close_campaign(campaign_id).await {
                            warn!(campaign_id, error = %e, "Failed to close expired campaign");
                        }
                        break;
                    }
                    result = results.recv() => match result {
                        Some(result) => {
                            if tx.send(CampaignEvent::Result(result)).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            // Broker ended the subscription: the campaign was closed.
                            if let Ok(report) = manager.campaign_status(campaign_id, Utc::now()) {
                                let _ = tx.send(CampaignEvent::Status(report)).await;
                            }
                            break;
                        }
                    },
                    _ = ticker.tick() => {
                        let event = match manager.campaign_status(campaign_id, Utc::now()) {
                            Ok(report) => CampaignEvent::Status(report),
                            Err(e) => CampaignEvent::Error { error: e.to_string() },
                        };
                        let finished =
                            matches!(&event, CampaignEvent::Status(r) if r.status.is_terminal());
                        if tx.send(event).await.is_err() || finished {
                            break;
                        }
                    }
                }
            }

            subscription.cancel();
            info!(campaign_id, "Campaign stream closed");
        });

        Ok(rx)
    }
}
