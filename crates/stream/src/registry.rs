//! Bookkeeping of live subscriptions.
//!
//! Every subscription owns a child of the caller's cancellation token. The
//! registry holds the token until the subscription's task deregisters, so
//! `close` can cancel all of a campaign's subscriptions at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Handle for one registered subscription.
#[derive(Debug, Clone)]
pub struct Subscription {
    /// Registry-unique subscription id
    pub id: u64,
    /// Campaign the subscription listens to
    pub campaign_id: u64,
    /// Fires on caller cancellation or campaign close
    pub token: CancellationToken,
}

/// Live subscriptions grouped by campaign.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    campaigns: Mutex<HashMap<u64, HashMap<u64, CancellationToken>>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, HashMap<u64, CancellationToken>>> {
        self.campaigns
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a subscription whose token is a child of `parent`.
    pub fn register(&self, campaign_id: u64, parent: &CancellationToken) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let token = parent.child_token();
        self.lock()
            .entry(campaign_id)
            .or_default()
            .insert(id, token.clone());
        Subscription {
            id,
            campaign_id,
            token,
        }
    }

    /// Forget a subscription. Called by its task on exit.
    pub fn remove(&self, subscription: &Subscription) {
        let mut campaigns = self.lock();
        if let Some(subs) = campaigns.get_mut(&subscription.campaign_id) {
            subs.remove(&subscription.id);
            if subs.is_empty() {
                campaigns.remove(&subscription.campaign_id);
            }
        }
    }

    /// Cancel every subscription of a campaign; returns how many were live.
    pub fn close(&self, campaign_id: u64) -> usize {
        let subs = self.lock().remove(&campaign_id).unwrap_or_default();
        for token in subs.values() {
            token.cancel();
        }
        subs.len()
    }

    /// Cancel every subscription of every campaign.
    pub fn close_all(&self) {
        let campaigns = std::mem::take(&mut *self.lock());
        for token in campaigns.values().flat_map(|subs| subs.values()) {
            token.cancel();
        }
    }

    /// Live subscriptions for a campaign.
    pub fn active(&self, campaign_id: u64) -> usize {
        self.lock().get(&campaign_id).map_or(0, HashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_remove() {
        let registry = SubscriptionRegistry::new();
        let parent = CancellationToken::new();

        let a = registry.register(1, &parent);
        let b = registry.register(1, &parent);
        assert_ne!(a.id, b.id);
        assert_eq!(registry.active(1), 2);

        registry.remove(&a);
        assert_eq!(registry.active(1), 1);
        registry.remove(&b);
        assert_eq!(registry.active(1), 0);
    }

    #[test]
    fn test_close_cancels_only_that_campaign() {
        let registry = SubscriptionRegistry::new();
        let parent = CancellationToken::new();

        let a = registry.register(1, &parent);
        let b = registry.register(2, &parent);

        assert_eq!(registry.close(1), 1);
        assert!(a.token.is_cancelled());
        assert!(!b.token.is_cancelled());
        assert!(!parent.is_cancelled());
        assert_eq!(registry.active(2), 1);
    }

    #[test]
    fn test_parent_cancel_reaches_child() {
        let registry = SubscriptionRegistry::new();
        let parent = CancellationToken::new();
        let sub = registry.register(3, &parent);

        parent.cancel();
        assert!(sub.token.is_cancelled());
    }
}
