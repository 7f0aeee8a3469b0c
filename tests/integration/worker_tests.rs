//! Worker pool behavior with real phase handlers: lost workers and
//! out-of-process workers

use crate::common::*;
use complot_crawler::crawler::{
    InProcessLauncher, ProcessLauncher, RunOptions, WorkerExit, WorkerHandle, WorkerJob,
    WorkerLauncher,
};
use complot_crawler::state::ErrorCategory;
use complot_crawler::{ComplotError, Phase, PhaseState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wiremock::MockServer;

/// Launches real workers, except that worker `doomed` dies without
/// reporting anything
struct CrashingLauncher {
    inner: InProcessLauncher,
    doomed: usize,
}

impl WorkerLauncher for CrashingLauncher {
    fn launch(
        &self,
        job: WorkerJob,
        cancel: CancellationToken,
    ) -> Result<WorkerHandle, ComplotError> {
        if job.worker_id != self.doomed {
            return self.inner.launch(job, cancel);
        }
        let (_tx, rx) = mpsc::unbounded_channel();
        let exit = tokio::spawn(async { WorkerExit::Failed("killed by signal 9".to_string()) });
        Ok(WorkerHandle { results: rx, exit })
    }
}

#[tokio::test]
async fn test_lost_worker_does_not_stop_siblings() {
    let mock_server = MockServer::start().await;
    mount_backend(&mock_server).await;

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut config = create_test_config(&mock_server.uri(), temp_dir.path());
    config.crawler.workers = 2;
    let tenant = ofaqim();

    let launcher = CrashingLauncher {
        inner: InProcessLauncher::for_phase_tasks(),
        doomed: 1,
    };
    let mut orchestrator = open_orchestrator(&config).with_launcher(Arc::new(launcher));
    let report = orchestrator
        .run_tenant(&tenant, &RunOptions::default())
        .await
        .expect("Crawl failed");

    // codes 1-2 went to worker 0, codes 3-4 to the lost worker
    let discovery = report.phase(Phase::StreetDiscovery).unwrap();
    assert_eq!(discovery.state, PhaseState::Completed);
    assert_eq!(discovery.succeeded, 2);
    assert_eq!(discovery.worker_lost(), 2);

    let checkpoint = orchestrator
        .store()
        .load(&tenant.key, Phase::StreetDiscovery)
        .expect("discovery checkpoint");
    let lost: Vec<&str> = checkpoint.failed_ids();
    assert_eq!(lost.len(), 2);
    assert!(lost.contains(&"3") && lost.contains(&"4"));
    for result in checkpoint.items.iter().filter(|r| !r.is_success()) {
        let failure = result.failure().unwrap();
        assert_eq!(failure.category, ErrorCategory::WorkerLost);
        assert!(failure.detail.contains("killed by signal 9"));
    }

    // street 2 was owned by the surviving worker, so downstream went ahead
    assert_eq!(report.phase(Phase::DetailFetch).unwrap().succeeded, 1);
}

#[tokio::test]
async fn test_process_workers_match_in_process_results() {
    let mock_server = MockServer::start().await;
    mount_backend(&mock_server).await;

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut config = create_test_config(&mock_server.uri(), temp_dir.path());
    config.crawler.workers = 2;
    let tenant = ofaqim();

    let launcher = ProcessLauncher::new(
        env!("CARGO_BIN_EXE_complot-crawler"),
        vec!["--worker".to_string(), "--quiet".to_string()],
    );
    let mut orchestrator = open_orchestrator(&config).with_launcher(Arc::new(launcher));
    // a worker that outlives its chunk would hang the phase
    let report = tokio::time::timeout(
        Duration::from_secs(60),
        orchestrator.run_tenant(&tenant, &RunOptions::default()),
    )
    .await
    .expect("process workers did not exit")
    .expect("Crawl failed");

    for phase in report.phases.iter() {
        assert_eq!(phase.state, PhaseState::Completed, "{}", phase.phase);
        assert_eq!(phase.failed, 0, "{} had failures", phase.phase);
    }
    assert_eq!(report.phase(Phase::StreetDiscovery).unwrap().succeeded, 4);
    assert_eq!(report.phase(Phase::RequestEnrichment).unwrap().succeeded, 1);
    assert_eq!(report.export.unwrap().rows("buildings.csv"), Some(1));
}
