//! Campaign lifecycle across enrollment, targeting, check-ins and streaming.

use crate::test_utils::*;
use chrono::Utc;
use osfleet_campaign::{CampaignEvent, QueryName};
use osfleet_core::{CampaignStatus, ExecutionStatus, FleetError, Row, TargetSelection};
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn row(k: &str, v: &str) -> Row {
    [(k.to_string(), v.to_string())].into_iter().collect()
}

#[tokio::test]
async fn test_mixed_targets_partial_check_in() {
    let fleet = TestFleet::in_memory();
    let now = Utc::now();

    let (h1, _) = fleet.enroll("host-1");
    let (h2, _) = fleet.enroll("host-2");
    let (h3, _) = fleet.enroll("host-3");
    let label = fleet.label_matching("linux", &[&h3], now);

    let campaign = fleet
        .manager
        .new_adhoc_campaign(
            "select * from uptime",
            &TargetSelection::new(vec![h1.id, h2.id], vec![label]),
            1,
        )
        .unwrap();
    let metrics = fleet.manager.campaign_metrics(campaign.id, now).unwrap();
    assert_eq!(metrics.total, 3);

    let cancel = CancellationToken::new();
    let mut events = fleet
        .streamer
        .stream(campaign.id, cancel.clone())
        .await
        .unwrap();

    // host-2 never checks in
    for host in [&h1, &h3] {
        let pending = fleet.pending(host);
        assert_eq!(pending.len(), 1);
        let (&execution_id, sql) = pending.iter().next().unwrap();
        assert_eq!(sql, "select * from uptime");
        fleet
            .manager
            .record_result(
                execution_id,
                host,
                0,
                vec![row("seconds", "42")],
                None,
                Utc::now(),
            )
            .await
            .unwrap();
    }

    let results = collect_results(&mut events, 2, Duration::from_secs(5)).await;
    assert_eq!(results.len(), 2);
    let reporters: HashSet<u64> = results
        .iter()
        .filter_map(|event| match event {
            CampaignEvent::Result(result) => Some(result.host.id),
            _ => None,
        })
        .collect();
    assert_eq!(reporters, HashSet::from([h1.id, h3.id]));

    // No third result shows up while host-2 stays silent
    let extra = collect_results(&mut events, 1, Duration::from_millis(300)).await;
    assert!(extra.is_empty());

    let report = fleet
        .manager
        .campaign_status(campaign.id, Utc::now())
        .unwrap();
    assert_eq!(report.status, CampaignStatus::Running);
    assert_eq!(report.actual_results, 2);
    assert_eq!(report.expected_results, 3);

    cancel.cancel();
}

#[tokio::test]
async fn test_reenrolled_host_keeps_its_execution() {
    let fleet = TestFleet::in_memory();
    let (host, old_key) = fleet.enroll("host-1");

    let campaign = fleet
        .manager
        .new_adhoc_campaign("select 1", &TargetSelection::new(vec![host.id], vec![]), 1)
        .unwrap();
    let first = fleet.pending(&host);

    let (again, new_key) = fleet.enroll("host-1");
    assert_eq!(again.id, host.id);
    assert!(matches!(
        fleet.auth.authenticate_host(&old_key),
        Err(FleetError::Authentication(_))
    ));
    let host = fleet.auth.authenticate_host(&new_key).unwrap();

    let second = fleet.pending(&host);
    assert_eq!(
        first.keys().collect::<Vec<_>>(),
        second.keys().collect::<Vec<_>>()
    );

    let executions = fleet.manager.campaign_executions(campaign.id).unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status, ExecutionStatus::Requested);
}

#[tokio::test]
async fn test_closed_campaign_ends_stream_and_stops_work() {
    let fleet = TestFleet::in_memory();
    let (host, _) = fleet.enroll("host-1");

    let campaign = fleet
        .manager
        .new_adhoc_campaign("select 1", &TargetSelection::new(vec![host.id], vec![]), 1)
        .unwrap();
    let mut events = fleet
        .streamer
        .stream(campaign.id, CancellationToken::new())
        .await
        .unwrap();

    let pending = fleet.pending(&host);
    let execution_id = *pending.keys().next().unwrap();

    fleet.manager.close_campaign(campaign.id).await.unwrap();

    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        while events.recv().await.is_some() {}
    })
    .await;
    assert!(drained.is_ok(), "stream did not end after close");

    assert!(fleet
        .manager
        .pending_queries_for_host(&host, Utc::now())
        .unwrap()
        .is_empty());
    let late = fleet
        .manager
        .record_result(execution_id, &host, 0, vec![], None, Utc::now())
        .await;
    assert!(matches!(late, Err(FleetError::InvalidState(_))));
}

#[tokio::test]
async fn test_distribution_names_round_trip_through_check_in() {
    let fleet = TestFleet::in_memory();
    let now = Utc::now();
    let (host, _) = fleet.enroll("host-1");
    fleet.label_matching("all", &[], now);

    let mut names: Vec<String> = fleet
        .distributor
        .label_queries_for_host(&host, now)
        .unwrap()
        .into_keys()
        .collect();
    names.extend(
        fleet
            .distributor
            .detail_queries_for_host(&host, now)
            .into_keys(),
    );

    assert!(!names.is_empty());
    for name in &names {
        assert!(
            matches!(
                QueryName::parse(name),
                Some(QueryName::Label(_)) | Some(QueryName::Detail(_))
            ),
            "{name}"
        );
    }

    fleet
        .distributor
        .record_detail_result(&host, "system_info", 0, &[row("hostname", "db-01")], now)
        .unwrap();
    let stored = fleet.datastore.host(host.id).unwrap().unwrap();
    assert_eq!(stored.hostname, "db-01");
}
