//! Topic names for per-campaign result channels.

/// Redis pub/sub channel for a campaign.
pub fn redis_channel(campaign_id: u64) -> String {
    format!("results_{campaign_id}")
}

/// NATS subject for a campaign.
pub fn nats_subject(campaign_id: u64) -> String {
    format!("osfleet.results.{campaign_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_names() {
        assert_eq!(redis_channel(42), "results_42");
        assert_eq!(nats_subject(42), "osfleet.results.42");
        assert_ne!(redis_channel(4), redis_channel(42));
    }
}
