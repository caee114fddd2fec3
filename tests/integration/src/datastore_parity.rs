//! The same workload against both datastores must give the same answers.

use crate::test_utils::*;
use chrono::{Duration as ChronoDuration, Utc};
use osfleet_core::{CampaignStatus, ExecutionStatus, TargetSelection};

/// Terminal execution count, expected total and campaign status after a
/// fixed sequence of check-ins.
async fn run_workload(fleet: &TestFleet) -> (usize, usize, CampaignStatus, Vec<ExecutionStatus>) {
    let now = Utc::now();
    let (h1, _) = fleet.enroll("host-1");
    let (h2, _) = fleet.enroll("host-2");
    let (h3, _) = fleet.enroll("host-3");

    let label = fleet.label_matching("web", &[&h2, &h3], now - ChronoDuration::minutes(5));
    // Newer result for host-3 takes it out of the label
    fleet
        .datastore
        .record_label_query_execution(osfleet_core::LabelQueryExecution {
            host_id: h3.id,
            label_id: label,
            matches: false,
            updated_at: now,
        })
        .unwrap();

    let campaign = fleet
        .manager
        .new_adhoc_campaign(
            "select * from processes",
            &TargetSelection::new(vec![h1.id], vec![label]),
            7,
        )
        .unwrap();

    assert!(fleet
        .manager
        .pending_queries_for_host(&h3, Utc::now())
        .unwrap()
        .is_empty());

    for (host, code) in [(&h1, 0), (&h2, 1)] {
        let pending = fleet.pending(host);
        let execution_id = *pending.keys().next().unwrap();
        fleet
            .manager
            .record_result(execution_id, host, code, vec![], None, Utc::now())
            .await
            .unwrap();
        // Duplicate terminal write is ignored
        fleet
            .manager
            .record_result(execution_id, host, 0, vec![], None, Utc::now())
            .await
            .unwrap();
    }

    let report = fleet
        .manager
        .campaign_status(campaign.id, Utc::now())
        .unwrap();
    let mut statuses: Vec<ExecutionStatus> = fleet
        .manager
        .campaign_executions(campaign.id)
        .unwrap()
        .into_iter()
        .map(|e| e.status)
        .collect();
    statuses.sort_by_key(|s| s.as_str());

    (report.actual_results, report.expected_results, report.status, statuses)
}

#[tokio::test]
async fn test_memory_and_sqlite_agree() {
    let memory = run_workload(&TestFleet::in_memory()).await;
    let sqlite = run_workload(&TestFleet::sqlite()).await;

    assert_eq!(memory, sqlite);
    assert_eq!(memory.0, 2);
    assert_eq!(memory.1, 2);
    assert_eq!(memory.2, CampaignStatus::Running);
    assert_eq!(memory.3, vec![ExecutionStatus::Failed, ExecutionStatus::Succeeded]);
}
