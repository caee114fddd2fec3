//! Target resolution
//!
//! Expands a campaign's host and label targets into a concrete host set and
//! classifies every host by liveness. Recomputed from datastore state on
//! every call.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::sync::Arc;

use osfleet_core::{
    Datastore, FleetResult, Host, LabelQueryExecution, TargetMetrics, TargetSelection,
};

/// Hosts silent for longer than this are missing in action.
pub const MIA_THRESHOLD_DAYS: i64 = 30;

/// Hosts enrolled within this window count as new.
pub const NEW_HOST_WINDOW_HOURS: i64 = 24;

/// Liveness class of a host relative to a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostLiveness {
    Online,
    Offline,
    Mia,
}

impl HostLiveness {
    /// MIA takes priority over the online window.
    pub fn classify(host: &Host, now: DateTime<Utc>, online_interval: std::time::Duration) -> Self {
        let silent_for = now - host.seen_time;
        if silent_for > Duration::days(MIA_THRESHOLD_DAYS) {
            return HostLiveness::Mia;
        }
        let online_window =
            Duration::from_std(online_interval).unwrap_or_else(|_| Duration::zero());
        if silent_for <= online_window {
            HostLiveness::Online
        } else {
            HostLiveness::Offline
        }
    }
}

fn is_new(host: &Host, now: DateTime<Utc>) -> bool {
    now - host.created_at <= Duration::hours(NEW_HOST_WINDOW_HOURS)
}

/// Liveness counts over a host set.
pub fn target_metrics(
    hosts: &[Host],
    now: DateTime<Utc>,
    online_interval: std::time::Duration,
) -> TargetMetrics {
    let mut metrics = TargetMetrics {
        total: hosts.len(),
        ..TargetMetrics::default()
    };
    for host in hosts {
        match HostLiveness::classify(host, now, online_interval) {
            HostLiveness::Online => metrics.online += 1,
            HostLiveness::Offline => metrics.offline += 1,
            HostLiveness::Mia => metrics.mia += 1,
        }
        if is_new(host, now) {
            metrics.new_hosts += 1;
        }
    }
    metrics
}

// Newest row per key decides; on equal timestamps the later row wins.
fn latest_matches<K, F>(rows: &[LabelQueryExecution], key: F) -> HashMap<K, bool>
where
    K: Hash + Eq,
    F: Fn(&LabelQueryExecution) -> K,
{
    let mut latest: HashMap<K, (DateTime<Utc>, bool)> = HashMap::new();
    for row in rows {
        let entry = latest.entry(key(row)).or_insert((row.updated_at, row.matches));
        if row.updated_at >= entry.0 {
            *entry = (row.updated_at, row.matches);
        }
    }
    latest
        .into_iter()
        .map(|(k, (_, matches))| (k, matches))
        .collect()
}

/// Reduce one host's label evaluation rows to its current membership per
/// label.
pub fn latest_label_memberships(rows: &[LabelQueryExecution]) -> HashMap<u64, bool> {
    latest_matches(rows, |row| row.label_id)
}

/// Resolves target selections against the datastore.
#[derive(Clone)]
pub struct TargetResolver {
    datastore: Arc<dyn Datastore>,
}

impl TargetResolver {
    pub fn new(datastore: Arc<dyn Datastore>) -> Self {
        Self { datastore }
    }

    /// Hosts currently matched by a label.
    pub fn label_members(&self, label_id: u64) -> FleetResult<Vec<u64>> {
        let rows = self.datastore.label_query_executions(label_id)?;
        let mut members: Vec<u64> = latest_matches(&rows, |row| row.host_id)
            .into_iter()
            .filter_map(|(host_id, matches)| matches.then_some(host_id))
            .collect();
        members.sort_unstable();
        Ok(members)
    }

    /// Union of explicit hosts and current label members, with metrics.
    ///
    /// Explicit host ids that do not exist are ignored.
    pub fn resolve(
        &self,
        selection: &TargetSelection,
        now: DateTime<Utc>,
        online_interval: std::time::Duration,
    ) -> FleetResult<(Vec<Host>, TargetMetrics)> {
        let mut ids: BTreeSet<u64> = selection.hosts.iter().copied().collect();
        for label_id in &selection.labels {
            ids.extend(self.label_members(*label_id)?);
        }

        let ids: Vec<u64> = ids.into_iter().collect();
        let hosts = self.datastore.hosts_by_ids(&ids)?;
        let metrics = target_metrics(&hosts, now, online_interval);
        Ok((hosts, metrics))
    }

    /// Whether `host` belongs to the selection right now.
    pub fn host_in_targets(&self, host: &Host, selection: &TargetSelection) -> FleetResult<bool> {
        if selection.hosts.contains(&host.id) {
            return Ok(true);
        }
        if selection.labels.is_empty() {
            return Ok(false);
        }

        let rows = self.datastore.label_query_executions_for_host(host.id)?;
        let memberships = latest_label_memberships(&rows);
        Ok(selection
            .labels
            .iter()
            .any(|label_id| memberships.get(label_id).copied().unwrap_or(false)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osfleet_core::MemoryDatastore;

    const ONLINE: std::time::Duration = std::time::Duration::from_secs(90);

    fn host_seen(
        ds: &MemoryDatastore,
        name: &str,
        created: DateTime<Utc>,
        seen: DateTime<Utc>,
    ) -> Host {
        let mut host = Host::new(name, created);
        host.seen_time = seen;
        ds.save_host(host).unwrap()
    }

    fn label_row(
        ds: &MemoryDatastore,
        host_id: u64,
        label_id: u64,
        matches: bool,
        at: DateTime<Utc>,
    ) {
        ds.record_label_query_execution(LabelQueryExecution {
            host_id,
            label_id,
            matches,
            updated_at: at,
        })
        .unwrap();
    }

    #[test]
    fn test_classification_priority() {
        let now = Utc::now();
        let old = now - Duration::days(60);

        let mut host = Host::new("h", old);
        host.seen_time = now - Duration::seconds(30);
        assert_eq!(HostLiveness::classify(&host, now, ONLINE), HostLiveness::Online);

        host.seen_time = now - Duration::seconds(90);
        assert_eq!(HostLiveness::classify(&host, now, ONLINE), HostLiveness::Online);

        host.seen_time = now - Duration::hours(3);
        assert_eq!(HostLiveness::classify(&host, now, ONLINE), HostLiveness::Offline);

        host.seen_time = now - Duration::days(31);
        assert_eq!(HostLiveness::classify(&host, now, ONLINE), HostLiveness::Mia);
    }

    #[test]
    fn test_metrics_counts() {
        let now = Utc::now();
        let hosts = vec![
            {
                let mut h = Host::new("fresh", now - Duration::hours(1));
                h.seen_time = now;
                h
            },
            {
                let mut h = Host::new("idle", now - Duration::days(5));
                h.seen_time = now - Duration::hours(2);
                h
            },
            {
                let mut h = Host::new("gone", now - Duration::days(90));
                h.seen_time = now - Duration::days(45);
                h
            },
        ];

        let metrics = target_metrics(&hosts, now, ONLINE);
        assert_eq!(
            metrics,
            TargetMetrics {
                total: 3,
                online: 1,
                offline: 1,
                mia: 1,
                new_hosts: 1,
            }
        );
    }

    #[test]
    fn test_latest_row_wins() {
        let ds = Arc::new(MemoryDatastore::new());
        let now = Utc::now();
        let host = host_seen(&ds, "h1", now, now);
        let label = ds.new_label("linux", "select 1", now).unwrap();

        label_row(&ds, host.id, label.id, true, now - Duration::minutes(10));
        label_row(&ds, host.id, label.id, false, now - Duration::minutes(1));

        let resolver = TargetResolver::new(ds.clone());
        let selection = TargetSelection::new(vec![], vec![label.id]);
        let (hosts, metrics) = resolver.resolve(&selection, now, ONLINE).unwrap();
        assert!(hosts.is_empty());
        assert_eq!(metrics.total, 0);
        assert!(!resolver.host_in_targets(&host, &selection).unwrap());
    }

    #[test]
    fn test_union_is_deduplicated() {
        let ds = Arc::new(MemoryDatastore::new());
        let now = Utc::now();
        let h1 = host_seen(&ds, "h1", now, now);
        let h2 = host_seen(&ds, "h2", now, now - Duration::hours(1));
        let label = ds.new_label("web", "select 1", now).unwrap();
        label_row(&ds, h1.id, label.id, true, now);
        label_row(&ds, h2.id, label.id, true, now);

        let resolver = TargetResolver::new(ds.clone());
        let selection = TargetSelection::new(vec![h1.id, 9999], vec![label.id]);
        let (hosts, metrics) = resolver.resolve(&selection, now, ONLINE).unwrap();

        assert_eq!(hosts.len(), 2);
        assert_eq!(metrics.total, 2);
        assert_eq!(metrics.online, 1);
        assert_eq!(metrics.offline, 1);
    }

    #[test]
    fn test_host_without_label_rows_is_not_member() {
        let ds = Arc::new(MemoryDatastore::new());
        let now = Utc::now();
        let host = host_seen(&ds, "h1", now, now);
        let label = ds.new_label("mac", "select 1", now).unwrap();

        let resolver = TargetResolver::new(ds.clone());
        let selection = TargetSelection::new(vec![], vec![label.id]);
        assert!(!resolver.host_in_targets(&host, &selection).unwrap());

        let explicit = TargetSelection::new(vec![host.id], vec![]);
        assert!(resolver.host_in_targets(&host, &explicit).unwrap());
    }

    #[test]
    fn test_latest_label_memberships_reduces_per_label() {
        let now = Utc::now();
        let rows = vec![
            LabelQueryExecution {
                host_id: 1,
                label_id: 1,
                matches: false,
                updated_at: now - Duration::minutes(5),
            },
            LabelQueryExecution {
                host_id: 1,
                label_id: 1,
                matches: true,
                updated_at: now,
            },
            LabelQueryExecution {
                host_id: 1,
                label_id: 2,
                matches: false,
                updated_at: now,
            },
        ];
        let memberships = latest_label_memberships(&rows);
        assert_eq!(memberships.get(&1), Some(&true));
        assert_eq!(memberships.get(&2), Some(&false));
        assert_eq!(memberships.get(&3), None);
    }
}
