//! Distributed query campaigns for osfleet.
//!
//! Target resolution, the campaign lifecycle, the label and detail queries
//! that ride along with campaign work, and live result streams.

pub mod distribution;
pub mod manager;
pub mod streamer;
pub mod targets;

pub use distribution::{QueryDistributor, QueryName, DETAIL_QUERIES};
pub use manager::{CampaignManager, StatusReport};
pub use streamer::{CampaignEvent, CampaignStreamer};
pub use targets::{latest_label_memberships, target_metrics, HostLiveness, TargetResolver};
