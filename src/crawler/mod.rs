//! Crawler module: fetching, bounded execution and phase orchestration
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching with retry and backoff
//! - The rate-bounded executor and the worker pool around it
//! - Per-phase fetch-and-parse handlers
//! - Baseline reconciliation and the phase orchestrator

mod executor;
mod fetcher;
mod orchestrator;
mod phases;
mod pool;
mod reconcile;
mod retry;
pub mod worker;

pub use executor::{Executor, Progress, ProgressFn, RunHooks};
pub use fetcher::{build_http_client, classify_status, FailedFetch, FetchClient, FetchResponse};
pub use orchestrator::{
    CrawlReport, Orchestrator, PhaseReport, PlannedAction, PlannedPhase, RunOptions,
};
pub use phases::{build_handler, build_handler_with_client, ItemHandler, PhaseTask};
pub use pool::{
    partition, InProcessLauncher, ProcessLauncher, WorkerExit, WorkerHandle, WorkerJob,
    WorkerLauncher, WorkerPool,
};
pub use reconcile::{reconcile, Delta};
pub use retry::{RetryDecision, RetryPolicy};
