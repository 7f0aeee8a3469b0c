//! Phase orchestrator
//!
//! Walks one tenant through the pipeline in order. For every network phase:
//! - Expected work items are derived from the upstream phase's output
//! - Items already present in the checkpoint are not dispatched again
//! - The rest go through the worker pool, with a `complete=false` checkpoint
//!   saved every `save-interval` results
//! - A final checkpoint is saved, `complete=true` once every expected item
//!   has a terminal result
//!
//! Street discovery reconciles its fresh scan against the stored baseline so
//! that record search only sees active streets.

use crate::config::{validate_crawler_config, Config, CrawlerConfig};
use crate::crawler::executor::{ProgressFn, RunHooks};
use crate::crawler::fetcher::FetchClient;
use crate::crawler::phases::{
    detail_items, discovery_items, record_items, request_items, PhaseTask,
};
use crate::crawler::pool::{InProcessLauncher, WorkerLauncher, WorkerPool};
use crate::crawler::reconcile::{reconcile, Delta};
use crate::models::{BuildingDetail, BuildingRecord, Street};
use crate::output::{export_tenant, ExportSummary};
use crate::state::{ErrorCategory, FetchResult, Phase, PhaseState, SkipReason, WorkItem};
use crate::storage::{decode_payloads, CheckpointData, CheckpointStore};
use crate::tenant::{Credential, Tenant};
use crate::{ComplotError, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const BASELINE: &str = "baseline";
const NEW: &str = "new";
const REMOVED: &str = "removed";
const OBSERVED: &str = "observed";

/// Operator directives for one run
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Phases whose checkpoint is discarded before running
    pub force: BTreeSet<Phase>,

    /// Re-dispatch previously failed items of every phase
    pub retry_errors: bool,

    /// Phases marked skipped; their existing checkpoint output still feeds downstream
    pub skip: BTreeSet<Phase>,

    /// Re-scan streets even when discovery is complete, keeping the baseline
    pub rediscover: bool,

    pub workers: Option<usize>,
    pub concurrency: Option<usize>,
    pub credential: Option<Credential>,
    pub progress: Option<ProgressFn>,
}

impl RunOptions {
    /// Skips every network phase, so only export runs
    pub fn export_only() -> Self {
        Self {
            skip: Phase::ALL.into_iter().filter(Phase::is_network).collect(),
            ..Self::default()
        }
    }
}

/// Outcome of one phase within a run
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseReport {
    pub phase: Phase,
    pub state: PhaseState,

    /// Items the upstream output called for
    pub expected: usize,

    /// Items sent to workers this run
    pub dispatched: usize,

    pub succeeded: usize,
    pub failed: usize,

    /// Failed items by category
    pub failures: BTreeMap<ErrorCategory, usize>,

    pub saved_at: Option<DateTime<Utc>>,
}

impl PhaseReport {
    fn new(phase: Phase, expected: usize) -> Self {
        Self {
            phase,
            state: PhaseState::NotStarted,
            expected,
            dispatched: 0,
            succeeded: 0,
            failed: 0,
            failures: BTreeMap::new(),
            saved_at: None,
        }
    }

    fn tally(&mut self, items: &[FetchResult]) {
        self.succeeded = 0;
        self.failed = 0;
        self.failures.clear();
        for result in items {
            match result.failure() {
                None => self.succeeded += 1,
                Some(failure) => {
                    self.failed += 1;
                    *self.failures.entry(failure.category).or_insert(0) += 1;
                }
            }
        }
    }

    /// Items recorded as lost with their worker
    pub fn worker_lost(&self) -> usize {
        self.failures
            .get(&ErrorCategory::WorkerLost)
            .copied()
            .unwrap_or(0)
    }
}

/// Outcome of one tenant's run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlReport {
    pub tenant: String,
    pub phases: Vec<PhaseReport>,

    /// Street changes, when discovery scanned this run
    pub delta: Option<Delta<u32>>,

    /// Cancellation stopped the pipeline
    pub interrupted: bool,

    pub export: Option<ExportSummary>,
}

impl CrawlReport {
    pub fn phase(&self, phase: Phase) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.phase == phase)
    }
}

/// What a dry run would do with one phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedAction {
    Skip(SkipReason),
    UpToDate,
    Run,
    Export,
}

impl fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip(SkipReason::Operator) => f.write_str("skip (operator)"),
            Self::Skip(SkipReason::TenantPolicy) => f.write_str("skip (tenant policy)"),
            Self::UpToDate => f.write_str("up to date"),
            Self::Run => f.write_str("run"),
            Self::Export => f.write_str("export"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPhase {
    pub phase: Phase,
    pub action: PlannedAction,
    pub expected: usize,
    pub present: usize,
    pub dispatch: usize,
}

/// Checkpointed results of one phase, indexed by item id
struct PhaseResults {
    data: CheckpointData,
    index: HashMap<String, usize>,
}

impl PhaseResults {
    fn new(data: CheckpointData) -> Self {
        let index = data
            .items
            .iter()
            .enumerate()
            .map(|(i, r)| (r.item_id.clone(), i))
            .collect();
        Self { data, index }
    }

    fn get(&self, id: &str) -> Option<&FetchResult> {
        self.index.get(id).map(|&i| &self.data.items[i])
    }

    fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Inserts a result, replacing any earlier one for the same item in place
    fn upsert(&mut self, result: FetchResult) {
        match self.index.get(&result.item_id) {
            Some(&i) => self.data.items[i] = result,
            None => {
                self.index
                    .insert(result.item_id.clone(), self.data.items.len());
                self.data.items.push(result);
            }
        }
    }

    /// Results of the expected items, in expected order
    fn output(&self, expected: &[WorkItem]) -> Vec<FetchResult> {
        expected
            .iter()
            .filter_map(|item| self.get(&item.id).cloned())
            .collect()
    }
}

struct PhaseOutcome {
    report: PhaseReport,
    output: Vec<FetchResult>,
    delta: Option<Delta<u32>>,
    interrupted: bool,
}

impl PhaseOutcome {
    fn skipped(mut report: PhaseReport, output: Vec<FetchResult>) -> Self {
        report.tally(&output);
        Self {
            report,
            output,
            delta: None,
            interrupted: false,
        }
    }
}

struct TenantRun<'a> {
    tenant: &'a Tenant,
    opts: &'a RunOptions,
    crawler: CrawlerConfig,
    reachability_checked: bool,
}

/// Drives tenants through the pipeline against one checkpoint store
pub struct Orchestrator {
    config: Config,
    store: Box<dyn CheckpointStore>,
    launcher: Arc<dyn WorkerLauncher>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Creates an orchestrator running workers in-process
    pub fn new(config: Config, store: Box<dyn CheckpointStore>) -> Self {
        Self {
            config,
            store,
            launcher: Arc::new(InProcessLauncher::for_phase_tasks()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn WorkerLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Token that cooperatively cancels the current and all later phases
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &dyn CheckpointStore {
        &*self.store
    }

    fn effective_crawler(&self, opts: &RunOptions) -> Result<CrawlerConfig> {
        let mut crawler = self.config.crawler.clone();
        if let Some(workers) = opts.workers {
            crawler.workers = workers;
        }
        if let Some(concurrency) = opts.concurrency {
            crawler.max_concurrent = concurrency;
        }
        validate_crawler_config(&crawler)?;
        Ok(crawler)
    }

    /// Runs every phase of `tenant` in order
    ///
    /// Per-item failures are recorded in the checkpoints and the report.
    /// Structural failures abort with [`ComplotError::PhaseAborted`]; the last
    /// saved checkpoint stays valid for resume.
    pub async fn run_tenant(&mut self, tenant: &Tenant, opts: &RunOptions) -> Result<CrawlReport> {
        tenant.check_required()?;
        let mut run = TenantRun {
            tenant,
            opts,
            crawler: self.effective_crawler(opts)?,
            reachability_checked: false,
        };
        let mut report = CrawlReport {
            tenant: tenant.key.clone(),
            ..CrawlReport::default()
        };

        tracing::info!(
            tenant = %tenant.key,
            workers = run.crawler.workers,
            concurrency = run.crawler.max_concurrent,
            "Starting crawl"
        );

        let mut upstream: Vec<FetchResult> = Vec::new();
        for phase in Phase::ALL {
            if self.cancel.is_cancelled() {
                report.interrupted = true;
                tracing::warn!(tenant = %tenant.key, next = %phase, "Crawl interrupted; remaining phases not started");
                break;
            }

            if phase == Phase::Export {
                let phase_report = self
                    .run_export(tenant, opts, &mut report)
                    .map_err(|e| aborted(tenant, phase, e))?;
                report.phases.push(phase_report);
                continue;
            }

            let expected = expected_items(phase, tenant, &upstream);
            let outcome = self
                .run_phase(&mut run, phase, expected)
                .await
                .map_err(|e| aborted(tenant, phase, e))?;

            log_phase(&tenant.key, &outcome.report);
            if outcome.delta.is_some() {
                report.delta = outcome.delta;
            }
            upstream = outcome.output;
            report.phases.push(outcome.report);

            if outcome.interrupted {
                report.interrupted = true;
                tracing::warn!(
                    tenant = %tenant.key,
                    phase = %phase,
                    "Phase interrupted; partial checkpoint saved for resume"
                );
                break;
            }
        }

        Ok(report)
    }

    async fn run_phase(
        &mut self,
        run: &mut TenantRun<'_>,
        phase: Phase,
        expected: Vec<WorkItem>,
    ) -> Result<PhaseOutcome> {
        let tenant = run.tenant;
        let mut report = PhaseReport::new(phase, expected.len());

        if run.opts.skip.contains(&phase) {
            report.state = report
                .state
                .transition(PhaseState::SkippedByPolicy(SkipReason::Operator))?;
            let output = self
                .store
                .load(&tenant.key, phase)
                .map(|cp| PhaseResults::new(cp.into_data()).output(&expected))
                .unwrap_or_default();
            return Ok(PhaseOutcome::skipped(report, output));
        }

        if tenant.enrichment_blocked && phase.is_enrichment() {
            report.state = report
                .state
                .transition(PhaseState::SkippedByPolicy(SkipReason::TenantPolicy))?;
            return Ok(PhaseOutcome::skipped(report, Vec::new()));
        }

        // a forced phase starts empty; its first save replaces the old record
        let mut state = PhaseState::NotStarted;
        let mut data = CheckpointData::default();
        if run.opts.force.contains(&phase) {
            tracing::info!(tenant = %tenant.key, phase = %phase, "Ignoring existing checkpoint");
        } else if let Some(checkpoint) = self.store.load(&tenant.key, phase) {
            if checkpoint.complete {
                state = state.transition(PhaseState::Completed)?;
            }
            report.saved_at = Some(checkpoint.saved_at);
            data = checkpoint.into_data();
        }

        if phase == Phase::StreetDiscovery && state == PhaseState::Completed && run.opts.rediscover {
            data = restart_discovery(data);
        }

        let mut results = PhaseResults::new(data);
        let dispatch = dispatch_set(&expected, &results, run.opts.retry_errors);
        report.dispatched = dispatch.len();

        if dispatch.is_empty() && state == PhaseState::Completed {
            let output = results.output(&expected);
            report.state = state;
            report.tally(&output);
            return Ok(PhaseOutcome {
                report,
                output,
                delta: None,
                interrupted: false,
            });
        }

        state = state.transition(PhaseState::Running)?;
        tracing::info!(
            tenant = %tenant.key,
            phase = %phase,
            expected = expected.len(),
            present = results.data.items.len(),
            dispatch = dispatch.len(),
            "Phase running"
        );

        if !dispatch.is_empty() {
            self.ensure_reachable(run).await?;
            self.dispatch(run, phase, dispatch, &mut results).await?;
        }

        let complete = expected.iter().all(|item| results.contains(&item.id));
        let mut delta = None;
        if complete && phase == Phase::StreetDiscovery {
            delta = Some(finalize_discovery(&mut results.data));
        }

        report.saved_at = Some(self.store.save(&tenant.key, phase, &results.data, complete)?);
        if complete {
            state = state.transition(PhaseState::Completed)?;
        }

        let output = results.output(&expected);
        report.state = state;
        report.tally(&output);

        Ok(PhaseOutcome {
            report,
            output,
            delta,
            interrupted: self.cancel.is_cancelled(),
        })
    }

    async fn ensure_reachable(&self, run: &mut TenantRun<'_>) -> Result<()> {
        if run.reachability_checked {
            return Ok(());
        }
        let client = FetchClient::new(&self.config.api, &run.crawler)?;
        client.check_reachable(&self.config.api.base_url).await?;
        run.reachability_checked = true;
        Ok(())
    }

    /// Runs `items` through the pool, folding results into `results` as they land
    async fn dispatch(
        &mut self,
        run: &TenantRun<'_>,
        phase: Phase,
        items: Vec<WorkItem>,
        results: &mut PhaseResults,
    ) -> Result<()> {
        let task = PhaseTask {
            phase,
            tenant: run.tenant.clone(),
            crawler: run.crawler.clone(),
            api: self.config.api.clone(),
            credential: run.opts.credential.clone(),
        };
        let pool = WorkerPool::new(
            Arc::clone(&self.launcher),
            run.crawler.workers,
            run.crawler.max_concurrent,
        );

        let phase_cancel = self.cancel.child_token();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let hooks = RunHooks {
            cancel: phase_cancel.clone(),
            progress: run.opts.progress.clone(),
            observer: Some(tx),
        };

        let run_pool = async move {
            let merged = pool.run(&task, items, &hooks).await;
            drop(hooks);
            merged
        };

        let store = &mut self.store;
        let tenant_key = run.tenant.key.as_str();
        let save_interval = run.crawler.save_interval.max(1);
        let collect = async {
            let mut since_save = 0usize;
            let mut save_error = None;
            while let Some(result) = rx.recv().await {
                results.upsert(result);
                if save_error.is_some() {
                    continue;
                }
                since_save += 1;
                if since_save < save_interval {
                    continue;
                }
                since_save = 0;
                match store.save(tenant_key, phase, &results.data, false) {
                    Ok(saved_at) => tracing::debug!(
                        tenant = tenant_key,
                        phase = %phase,
                        items = results.data.items.len(),
                        %saved_at,
                        "Saved partial checkpoint"
                    ),
                    Err(e) => {
                        tracing::error!(tenant = tenant_key, phase = %phase, error = %e, "Checkpoint save failed; stopping phase");
                        phase_cancel.cancel();
                        save_error = Some(e);
                    }
                }
            }
            save_error
        };

        let (merged, save_error) = tokio::join!(run_pool, collect);
        if let Some(e) = save_error {
            return Err(e.into());
        }
        for result in merged? {
            results.upsert(result);
        }
        Ok(())
    }

    fn run_export(
        &self,
        tenant: &Tenant,
        opts: &RunOptions,
        report: &mut CrawlReport,
    ) -> Result<PhaseReport> {
        let mut phase_report = PhaseReport::new(Phase::Export, 0);
        if opts.skip.contains(&Phase::Export) {
            phase_report.state = phase_report
                .state
                .transition(PhaseState::SkippedByPolicy(SkipReason::Operator))?;
            return Ok(phase_report);
        }

        phase_report.state = phase_report.state.transition(PhaseState::Running)?;
        let summary = export_tenant(&self.config.output, tenant, &*self.store)?;
        phase_report.state = phase_report.state.transition(PhaseState::Completed)?;
        report.export = Some(summary);
        Ok(phase_report)
    }

    /// Describes what `run_tenant` would do, from the current checkpoints
    ///
    /// Downstream counts assume upstream phases keep their current output.
    pub fn plan(&self, tenant: &Tenant, opts: &RunOptions) -> Vec<PlannedPhase> {
        let mut planned = Vec::new();
        let mut upstream: Vec<FetchResult> = Vec::new();

        for phase in Phase::ALL {
            if phase == Phase::Export {
                let action = if opts.skip.contains(&phase) {
                    PlannedAction::Skip(SkipReason::Operator)
                } else {
                    PlannedAction::Export
                };
                planned.push(PlannedPhase {
                    phase,
                    action,
                    expected: 0,
                    present: 0,
                    dispatch: 0,
                });
                continue;
            }

            let expected = expected_items(phase, tenant, &upstream);
            let blocked = tenant.enrichment_blocked && phase.is_enrichment();
            let checkpoint = if opts.force.contains(&phase) || blocked {
                None
            } else {
                self.store.load(&tenant.key, phase)
            };
            let complete = checkpoint.as_ref().is_some_and(|c| c.complete);
            let mut data = checkpoint.map(|c| c.into_data()).unwrap_or_default();
            if phase == Phase::StreetDiscovery && complete && opts.rediscover {
                data = restart_discovery(data);
            }
            let results = PhaseResults::new(data);
            let dispatch = dispatch_set(&expected, &results, opts.retry_errors);

            let action = if opts.skip.contains(&phase) {
                PlannedAction::Skip(SkipReason::Operator)
            } else if blocked {
                PlannedAction::Skip(SkipReason::TenantPolicy)
            } else if complete && dispatch.is_empty() {
                PlannedAction::UpToDate
            } else {
                PlannedAction::Run
            };

            planned.push(PlannedPhase {
                phase,
                action,
                expected: expected.len(),
                present: expected.iter().filter(|i| results.contains(&i.id)).count(),
                dispatch: if matches!(action, PlannedAction::Run) {
                    dispatch.len()
                } else {
                    0
                },
            });
            upstream = if blocked {
                Vec::new()
            } else {
                results.output(&expected)
            };
        }

        planned
    }
}

fn aborted(tenant: &Tenant, phase: Phase, source: ComplotError) -> ComplotError {
    ComplotError::PhaseAborted {
        tenant: tenant.key.clone(),
        phase,
        source: Box::new(source),
    }
}

fn log_phase(tenant: &str, report: &PhaseReport) {
    tracing::info!(
        tenant,
        phase = %report.phase,
        state = %report.state,
        dispatched = report.dispatched,
        succeeded = report.succeeded,
        failed = report.failed,
        "Phase finished"
    );
    for (category, count) in &report.failures {
        if *category == ErrorCategory::WorkerLost {
            tracing::warn!(tenant, phase = %report.phase, count, "Items lost with their worker");
        } else {
            tracing::info!(tenant, phase = %report.phase, category = %category, count, "Failed items");
        }
    }
}

/// Work items the phase must cover, derived from the upstream output
fn expected_items(phase: Phase, tenant: &Tenant, upstream: &[FetchResult]) -> Vec<WorkItem> {
    match phase {
        Phase::StreetDiscovery => discovery_items(tenant),
        Phase::RecordSearch => {
            let streets: Vec<Street> = decode_payloads::<Option<Street>, _>(upstream)
                .into_iter()
                .flatten()
                .collect();
            record_items(&streets)
        }
        Phase::DetailFetch => {
            let records: Vec<BuildingRecord> = decode_payloads::<Vec<BuildingRecord>, _>(upstream)
                .into_iter()
                .flatten()
                .collect();
            detail_items(&records)
        }
        Phase::RequestEnrichment => {
            let details: Vec<BuildingDetail> = decode_payloads(upstream);
            request_items(&details)
        }
        Phase::Export => Vec::new(),
    }
}

/// Expected items without a result, plus failed ones under retry-errors
///
/// A retried item carries its previous attempt count.
fn dispatch_set(expected: &[WorkItem], results: &PhaseResults, retry_errors: bool) -> Vec<WorkItem> {
    expected
        .iter()
        .filter_map(|item| match results.get(&item.id) {
            None => Some(item.clone()),
            Some(previous) if retry_errors && !previous.is_success() => {
                let mut item = item.clone();
                item.attempt_count = previous.attempt_count;
                Some(item)
            }
            Some(_) => None,
        })
        .collect()
}

/// Fresh scan state that keeps only the stored baseline
fn restart_discovery(data: CheckpointData) -> CheckpointData {
    let mut fresh = CheckpointData::default();
    if let Some(baseline) = data.metadata.get(BASELINE) {
        fresh.metadata.insert(BASELINE.to_string(), baseline.clone());
    }
    fresh
}

/// Reconciles a completed scan against the baseline and records the result
///
/// The baseline becomes every street ever observed. Codes whose lookup failed
/// are neither new nor removed.
fn finalize_discovery(data: &mut CheckpointData) -> Delta<u32> {
    let previous: Vec<Street> = data
        .metadata
        .get(BASELINE)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    let observed: Vec<Street> = decode_payloads::<Option<Street>, _>(&data.items)
        .into_iter()
        .flatten()
        .collect();
    let unknown: HashSet<u32> = data
        .items
        .iter()
        .filter(|r| !r.is_success())
        .filter_map(|r| r.item_id.parse().ok())
        .collect();

    let previous_codes: BTreeSet<u32> = previous
        .iter()
        .map(|s| s.code)
        .filter(|code| !unknown.contains(code))
        .collect();
    let fresh_codes: BTreeSet<u32> = observed.iter().map(|s| s.code).collect();
    let delta = reconcile(&previous_codes, &fresh_codes);

    let mut baseline: BTreeMap<u32, Street> = previous.into_iter().map(|s| (s.code, s)).collect();
    for street in observed {
        baseline.insert(street.code, street);
    }
    let baseline: Vec<Street> = baseline.into_values().collect();

    data.metadata.insert(BASELINE.to_string(), json!(baseline));
    data.metadata.insert(NEW.to_string(), json!(delta.new));
    data.metadata.insert(REMOVED.to_string(), json!(delta.removed));
    data.metadata.insert(OBSERVED.to_string(), json!(fresh_codes.len()));

    tracing::info!(
        new = delta.new.len(),
        removed = delta.removed.len(),
        unchanged = delta.unchanged.len(),
        baseline = baseline.len(),
        "Street discovery reconciled"
    );

    delta
}
