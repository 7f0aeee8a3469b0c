//! Resume behavior across orchestrator instances sharing one checkpoint dir

use crate::common::*;
use complot_crawler::crawler::RunOptions;
use complot_crawler::state::ErrorCategory;
use complot_crawler::{Phase, PhaseState};
use std::collections::BTreeSet;
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn only(phase: Phase) -> RunOptions {
    RunOptions {
        skip: Phase::ALL.into_iter().filter(|p| *p != phase).collect(),
        ..RunOptions::default()
    }
}

#[tokio::test]
async fn test_finished_crawl_sends_no_requests() {
    let mock_server = MockServer::start().await;
    mount_backend(&mock_server).await;

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = create_test_config(&mock_server.uri(), temp_dir.path());
    let tenant = ofaqim();

    open_orchestrator(&config)
        .run_tenant(&tenant, &RunOptions::default())
        .await
        .expect("First crawl failed");
    let seen = mock_server.received_requests().await.unwrap_or_default().len();

    // a new process sees the same checkpoints
    let report = open_orchestrator(&config)
        .run_tenant(&tenant, &RunOptions::default())
        .await
        .expect("Second crawl failed");

    assert_eq!(
        mock_server.received_requests().await.unwrap_or_default().len(),
        seen
    );
    for phase in report.phases.iter().filter(|p| p.phase.is_network()) {
        assert_eq!(phase.dispatched, 0, "{} dispatched work", phase.phase);
        assert_eq!(phase.state, PhaseState::Completed);
    }
    assert!(report.delta.is_none());
    assert_eq!(report.export.unwrap().rows("requests.csv"), Some(1));
}

#[tokio::test]
async fn test_phases_resume_one_at_a_time() {
    let mock_server = MockServer::start().await;
    mount_backend(&mock_server).await;

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = create_test_config(&mock_server.uri(), temp_dir.path());
    let tenant = ofaqim();

    let report = open_orchestrator(&config)
        .run_tenant(&tenant, &only(Phase::StreetDiscovery))
        .await
        .expect("Discovery failed");
    assert_eq!(report.phase(Phase::StreetDiscovery).unwrap().dispatched, 4);
    assert_eq!(requests_for(&mock_server, "GetTikFile").await, 0);

    let report = open_orchestrator(&config)
        .run_tenant(&tenant, &only(Phase::DetailFetch))
        .await
        .expect("Detail fetch failed");
    // records were never searched, so there is nothing to fetch yet
    assert_eq!(report.phase(Phase::DetailFetch).unwrap().expected, 0);

    let report = open_orchestrator(&config)
        .run_tenant(&tenant, &RunOptions::default())
        .await
        .expect("Crawl failed");
    assert_eq!(report.phase(Phase::StreetDiscovery).unwrap().dispatched, 0);
    assert_eq!(report.phase(Phase::RecordSearch).unwrap().dispatched, 1);
    assert_eq!(report.phase(Phase::DetailFetch).unwrap().dispatched, 1);
    assert_eq!(requests_for(&mock_server, "GetTikFile").await, 1);
}

#[tokio::test]
async fn test_retry_errors_redispatches_failed_items_only() {
    let mock_server = MockServer::start().await;
    mount_search(&mock_server).await;
    Mock::given(method("GET"))
        .and(query_param("prgname", "GetTikFile"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;
    mount_reachability(&mock_server).await;

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = create_test_config(&mock_server.uri(), temp_dir.path());
    let tenant = ofaqim();

    let report = open_orchestrator(&config)
        .run_tenant(&tenant, &RunOptions::default())
        .await
        .expect("First crawl failed");
    let details = report.phase(Phase::DetailFetch).unwrap();
    assert_eq!(details.failures.get(&ErrorCategory::ServerError), Some(&1));
    assert_eq!(details.state, PhaseState::Completed);

    // the backend recovers
    mock_server.reset().await;
    mount_backend(&mock_server).await;

    let report = open_orchestrator(&config)
        .run_tenant(&tenant, &RunOptions::default())
        .await
        .expect("Plain rerun failed");
    assert_eq!(report.phase(Phase::DetailFetch).unwrap().dispatched, 0);
    assert_eq!(requests_for(&mock_server, "GetTikFile").await, 0);

    let opts = RunOptions {
        retry_errors: true,
        ..RunOptions::default()
    };
    let mut orchestrator = open_orchestrator(&config);
    let report = orchestrator
        .run_tenant(&tenant, &opts)
        .await
        .expect("Retry crawl failed");

    let details = report.phase(Phase::DetailFetch).unwrap();
    assert_eq!(details.dispatched, 1);
    assert_eq!(details.succeeded, 1);
    assert_eq!(report.phase(Phase::StreetDiscovery).unwrap().dispatched, 0);
    assert_eq!(report.phase(Phase::RequestEnrichment).unwrap().expected, 1);

    let checkpoint = orchestrator
        .store()
        .load(&tenant.key, Phase::DetailFetch)
        .expect("detail checkpoint");
    assert_eq!(checkpoint.items.len(), 1);
    assert!(checkpoint.items[0].is_success());
    // one failed attempt, then the one that succeeded
    assert_eq!(checkpoint.items[0].attempt_count, 2);
}

#[tokio::test]
async fn test_rediscover_reports_street_changes() {
    let mock_server = MockServer::start().await;
    mount_backend(&mock_server).await;

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = create_test_config(&mock_server.uri(), temp_dir.path());
    let tenant = ofaqim();

    open_orchestrator(&config)
        .run_tenant(&tenant, &only(Phase::StreetDiscovery))
        .await
        .expect("Discovery failed");

    // street 2 disappears and street 3 shows up
    mock_server.reset().await;
    Mock::given(method("GET"))
        .and(query_param("prgname", "GetTikimByAddress"))
        .and(query_param("s", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_string(STREET_PAGE))
        .mount(&mock_server)
        .await;
    mount_reachability(&mock_server).await;

    let opts = RunOptions {
        rediscover: true,
        ..only(Phase::StreetDiscovery)
    };
    let report = open_orchestrator(&config)
        .run_tenant(&tenant, &opts)
        .await
        .expect("Rediscovery failed");

    let discovery = report.phase(Phase::StreetDiscovery).unwrap();
    assert_eq!(discovery.dispatched, 4);
    assert_eq!(discovery.state, PhaseState::Completed);

    let delta = report.delta.expect("discovery ran");
    assert_eq!(delta.new, BTreeSet::from([3]));
    assert_eq!(delta.removed, BTreeSet::from([2]));
}
