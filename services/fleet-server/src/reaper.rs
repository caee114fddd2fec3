//! Periodic closing of campaigns past their maximum duration.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use osfleet_campaign::CampaignManager;

pub fn spawn(
    manager: Arc<CampaignManager>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = manager.close_expired_campaigns(Utc::now()).await {
                        warn!(error = %e, "Expired campaign sweep failed");
                    }
                }
            }
        }

        info!("Campaign reaper stopped");
    })
}
