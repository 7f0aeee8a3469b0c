//! Integration tests for the crawler
//!
//! These tests use wiremock to stand in for the Complot backend and run the
//! real phase handlers through every phase, ending in exported files.

use crate::common::*;
use complot_crawler::crawler::RunOptions;
use complot_crawler::models::{BuildingDetail, Street};
use complot_crawler::state::{ErrorCategory, SkipReason};
use complot_crawler::{ComplotError, Phase, PhaseState};
use wiremock::MockServer;

#[tokio::test]
async fn test_full_crawl_single_tenant() {
    let mock_server = MockServer::start().await;
    mount_backend(&mock_server).await;

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = create_test_config(&mock_server.uri(), temp_dir.path());
    let tenant = ofaqim();

    let mut orchestrator = open_orchestrator(&config);
    let report = orchestrator
        .run_tenant(&tenant, &RunOptions::default())
        .await
        .expect("Crawl failed");

    assert!(!report.interrupted);
    for phase in Phase::ALL {
        assert_eq!(
            report.phase(phase).expect("phase reported").state,
            PhaseState::Completed,
            "{} did not complete",
            phase
        );
    }

    let discovery = report.phase(Phase::StreetDiscovery).unwrap();
    assert_eq!(discovery.expected, 4);
    assert_eq!(discovery.succeeded, 4);
    assert_eq!(report.phase(Phase::RecordSearch).unwrap().expected, 1);
    assert_eq!(report.phase(Phase::DetailFetch).unwrap().expected, 1);
    assert_eq!(report.phase(Phase::RequestEnrichment).unwrap().expected, 1);

    let delta = report.delta.expect("discovery ran");
    assert_eq!(delta.new.len(), 1);
    assert!(delta.new.contains(&2));

    let streets: Vec<Street> = orchestrator
        .store()
        .load(&tenant.key, Phase::StreetDiscovery)
        .expect("discovery checkpoint")
        .decode_payloads::<Option<Street>>()
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(streets.len(), 1);
    assert_eq!(streets[0].name, "הרצל");

    let details: Vec<BuildingDetail> = orchestrator
        .store()
        .load(&tenant.key, Phase::DetailFetch)
        .expect("detail checkpoint")
        .decode_payloads();
    assert_eq!(details[0].neighborhood, "מרכז");
    assert_eq!(details[0].requests[0].request_number, "20230045");

    let export = report.export.expect("export ran");
    assert_eq!(export.rows("streets.csv"), Some(1));
    assert_eq!(export.rows("buildings.csv"), Some(1));
    assert_eq!(export.rows("permits.csv"), Some(1));
    assert_eq!(export.rows("requests.csv"), Some(1));
    assert_eq!(export.rows("stakeholders.csv"), Some(1));
    assert_eq!(export.rows("permit_events.csv"), Some(1));

    let buildings = std::fs::read_to_string(export.dir.join("buildings.csv"))
        .expect("buildings.csv written");
    assert!(buildings.contains(TIK));
    let summary =
        std::fs::read_to_string(export.dir.join("summary.md")).expect("summary.md written");
    assert!(summary.contains("# Crawl Summary: אופקים (ofaqim)"));
}

#[tokio::test]
async fn test_blocked_tenant_stops_after_record_search() {
    let mock_server = MockServer::start().await;
    mount_backend(&mock_server).await;

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = create_test_config(&mock_server.uri(), temp_dir.path());
    let mut tenant = ofaqim();
    tenant.enrichment_blocked = true;

    let mut orchestrator = open_orchestrator(&config);
    let report = orchestrator
        .run_tenant(&tenant, &RunOptions::default())
        .await
        .expect("Crawl failed");

    let policy = PhaseState::SkippedByPolicy(SkipReason::TenantPolicy);
    assert_eq!(report.phase(Phase::DetailFetch).unwrap().state, policy);
    assert_eq!(report.phase(Phase::RequestEnrichment).unwrap().state, policy);
    assert_eq!(
        report.phase(Phase::RecordSearch).unwrap().state,
        PhaseState::Completed
    );
    assert_eq!(requests_for(&mock_server, "GetTikFile").await, 0);
    assert_eq!(requests_for(&mock_server, "GetBakashaFile").await, 0);

    // buildings fall back to search records; request tables are left out
    let export = report.export.expect("export ran");
    assert_eq!(export.rows("buildings.csv"), Some(1));
    assert_eq!(export.rows("requests.csv"), None);
    let summary =
        std::fs::read_to_string(export.dir.join("summary.md")).expect("summary.md written");
    assert!(summary.contains("enrichment is disabled"));
}

#[tokio::test]
async fn test_unreachable_backend_aborts_tenant() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    // nothing listens on port 1
    let config = create_test_config("http://127.0.0.1:1", temp_dir.path());
    let tenant = ofaqim();

    let mut orchestrator = open_orchestrator(&config);
    let err = orchestrator
        .run_tenant(&tenant, &RunOptions::default())
        .await
        .expect_err("crawl should abort");

    match err {
        ComplotError::PhaseAborted { phase, .. } => assert_eq!(phase, Phase::StreetDiscovery),
        other => panic!("unexpected error {:?}", other),
    }
    assert!(orchestrator
        .store()
        .load(&tenant.key, Phase::StreetDiscovery)
        .is_none());
}

#[tokio::test]
async fn test_missing_file_is_recorded_not_fatal() {
    let mock_server = MockServer::start().await;
    mount_search(&mock_server).await;
    // the building file is gone; mounted ahead of the catch-all reachability mock
    wiremock::Mock::given(wiremock::matchers::query_param("prgname", "GetTikFile"))
        .respond_with(wiremock::ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;
    mount_reachability(&mock_server).await;

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = create_test_config(&mock_server.uri(), temp_dir.path());
    let tenant = ofaqim();

    let mut orchestrator = open_orchestrator(&config);
    let report = orchestrator
        .run_tenant(&tenant, &RunOptions::default())
        .await
        .expect("Crawl failed");

    let details = report.phase(Phase::DetailFetch).unwrap();
    assert_eq!(details.state, PhaseState::Completed);
    assert_eq!(details.failed, 1);
    assert_eq!(details.failures.get(&ErrorCategory::NotFound), Some(&1));
    assert_eq!(report.phase(Phase::RequestEnrichment).unwrap().expected, 0);
    assert!(orchestrator
        .store()
        .exists_and_complete(&tenant.key, Phase::DetailFetch));
}
