//! Worker pool
//!
//! Splits a phase's items into contiguous blocks, runs each block in its own
//! worker, and merges the results:
//! - Workers only exchange messages with the pool: a job in, result lines out
//! - A worker that dies has its unclaimed items recorded as `worker_lost`
//! - One worker failing never stops its siblings
//!
//! Workers are either OS processes (the binary re-executed in `--worker` mode)
//! or tasks inside the current process.

use crate::crawler::executor::{Executor, RunHooks};
use crate::crawler::phases::{build_handler, ItemHandler, PhaseTask};
use crate::state::{FetchResult, WorkItem};
use crate::ComplotError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The message a worker receives: one contiguous block of a phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerJob {
    pub worker_id: usize,
    pub concurrency: usize,
    pub task: PhaseTask,
    pub items: Vec<WorkItem>,
}

/// How a worker ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    Clean,
    Failed(String),
}

/// A running worker: its result stream and its eventual exit
pub struct WorkerHandle {
    pub results: mpsc::UnboundedReceiver<FetchResult>,
    pub exit: JoinHandle<WorkerExit>,
}

/// Starts workers
///
/// `launch` failing means the worker never started; the pool decides whether
/// that is fatal.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, job: WorkerJob, cancel: CancellationToken)
        -> Result<WorkerHandle, ComplotError>;
}

type HandlerFactory = dyn Fn(&WorkerJob) -> Result<ItemHandler, ComplotError> + Send + Sync;

/// Runs each worker as a task of the current process
pub struct InProcessLauncher {
    factory: Arc<HandlerFactory>,
}

impl InProcessLauncher {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&WorkerJob) -> Result<ItemHandler, ComplotError> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
        }
    }

    /// Launcher that builds the real phase handler for each job
    pub fn for_phase_tasks() -> Self {
        Self::new(|job| build_handler(&job.task))
    }
}

impl WorkerLauncher for InProcessLauncher {
    fn launch(
        &self,
        job: WorkerJob,
        cancel: CancellationToken,
    ) -> Result<WorkerHandle, ComplotError> {
        let handler = (self.factory)(&job)?;
        let (tx, rx) = mpsc::unbounded_channel();

        let exit = tokio::spawn(async move {
            let hooks = RunHooks {
                cancel,
                progress: None,
                observer: Some(tx),
            };
            Executor::new(job.concurrency)
                .run(job.items, move |item| handler(item), &hooks)
                .await;
            WorkerExit::Clean
        });

        Ok(WorkerHandle { results: rx, exit })
    }
}

/// Runs each worker as a child process speaking newline-delimited JSON
///
/// The job is written as the first stdin line and stdin stays open; closing
/// it is the child's cancel signal. Each stdout line is one `FetchResult`.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// The running binary re-executed in worker mode
    pub fn current_exe() -> Result<Self, ComplotError> {
        Ok(Self::new(
            std::env::current_exe()?,
            vec!["--worker".to_string()],
        ))
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(
        &self,
        job: WorkerJob,
        cancel: CancellationToken,
    ) -> Result<WorkerHandle, ComplotError> {
        let worker_id = job.worker_id;
        let mut outstanding: HashSet<String> = job.items.iter().map(|i| i.id.clone()).collect();
        let mut line = serde_json::to_string(&job)?;
        line.push('\n');

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ComplotError::WorkerSpawn { worker_id, source })?;

        let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(ComplotError::WorkerProtocol(format!(
                "worker {} has no stdio pipes",
                worker_id
            )));
        };

        let (tx, rx) = mpsc::unbounded_channel();

        let exit = tokio::spawn(async move {
            let mut problem = None;
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                problem = Some(format!("cannot send job: {}", e));
            } else if let Err(e) = stdin.flush().await {
                problem = Some(format!("cannot send job: {}", e));
            }

            let mut stdin = Some(stdin);
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = cancel.cancelled(), if stdin.is_some() => {
                        // EOF on its stdin tells the child to stop dispatching
                        stdin = None;
                    }
                    next = lines.next_line() => match next {
                        Ok(Some(text)) => match serde_json::from_str::<FetchResult>(&text) {
                            Ok(result) => {
                                outstanding.remove(&result.item_id);
                                let _ = tx.send(result);
                                if outstanding.is_empty() {
                                    // every item has reported; EOF lets the child exit
                                    stdin = None;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(worker = worker_id, error = %e, "Unreadable result line");
                            }
                        },
                        Ok(None) => break,
                        Err(e) => {
                            problem = Some(format!("result channel lost: {}", e));
                            break;
                        }
                    }
                }
            }
            drop(stdin);

            match child.wait().await {
                Ok(status) if status.success() => match problem {
                    Some(problem) => WorkerExit::Failed(problem),
                    None => WorkerExit::Clean,
                },
                Ok(status) => WorkerExit::Failed(format!("exited with {}", status)),
                Err(e) => WorkerExit::Failed(format!("cannot wait for worker: {}", e)),
            }
        });

        Ok(WorkerHandle { results: rx, exit })
    }
}

/// Deterministic block split into at most `workers` contiguous chunks
///
/// The first `len % workers` chunks carry one extra item. Empty chunks are
/// dropped, so fewer items than workers yields one chunk per item.
pub fn partition(items: Vec<WorkItem>, workers: usize) -> Vec<Vec<WorkItem>> {
    let workers = workers.max(1);
    let base = items.len() / workers;
    let extra = items.len() % workers;

    let mut chunks = Vec::with_capacity(workers);
    let mut iter = items.into_iter();
    for index in 0..workers {
        let size = base + usize::from(index < extra);
        if size == 0 {
            break;
        }
        chunks.push(iter.by_ref().take(size).collect());
    }
    chunks
}

enum PoolEvent {
    Result(usize, FetchResult),
    Exit(usize, WorkerExit),
}

/// Distributes a phase across workers and merges their results
pub struct WorkerPool {
    launcher: Arc<dyn WorkerLauncher>,
    workers: usize,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(launcher: Arc<dyn WorkerLauncher>, workers: usize, concurrency: usize) -> Self {
        Self {
            launcher,
            workers: workers.max(1),
            concurrency: concurrency.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `items` to completion or cancellation
    ///
    /// Every item yields exactly one result unless the run was cancelled, in
    /// which case items nobody reached are absent. Fails only when no worker
    /// could be started at all.
    pub async fn run(
        &self,
        task: &PhaseTask,
        items: Vec<WorkItem>,
        hooks: &RunHooks,
    ) -> Result<Vec<FetchResult>, ComplotError> {
        let total = items.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let chunks = partition(items, self.workers);
        let chunk_count = chunks.len();
        let mut results = Vec::with_capacity(total);
        let mut pending: HashMap<usize, Vec<WorkItem>> = HashMap::new();
        let mut handles = Vec::new();
        let mut launch_errors = Vec::new();

        for (worker_id, chunk) in chunks.into_iter().enumerate() {
            let job = WorkerJob {
                worker_id,
                concurrency: self.concurrency,
                task: task.clone(),
                items: chunk.clone(),
            };
            match self.launcher.launch(job, hooks.cancel.clone()) {
                Ok(handle) => {
                    pending.insert(worker_id, chunk);
                    handles.push((worker_id, handle));
                }
                Err(e) => {
                    tracing::warn!(worker = worker_id, error = %e, "Worker failed to start");
                    launch_errors.push((worker_id, e.to_string(), chunk));
                }
            }
        }

        if handles.is_empty() {
            let detail = launch_errors
                .iter()
                .map(|(id, e, _)| format!("worker {}: {}", id, e))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ComplotError::NoWorkers(detail));
        }

        tracing::debug!(
            workers = handles.len(),
            chunks = chunk_count,
            total,
            "Worker pool started"
        );

        for (worker_id, detail, chunk) in launch_errors {
            record_lost(worker_id, &detail, &chunk, &mut results, hooks, total);
        }

        let (events_tx, mut events) = mpsc::unbounded_channel();
        for (worker_id, mut handle) in handles {
            let events_tx = events_tx.clone();
            tokio::spawn(async move {
                while let Some(result) = handle.results.recv().await {
                    let _ = events_tx.send(PoolEvent::Result(worker_id, result));
                }
                let exit = handle
                    .exit
                    .await
                    .unwrap_or_else(|e| WorkerExit::Failed(format!("worker task failed: {}", e)));
                let _ = events_tx.send(PoolEvent::Exit(worker_id, exit));
            });
        }
        drop(events_tx);

        let owned: HashMap<usize, HashSet<String>> = pending
            .iter()
            .map(|(worker_id, chunk)| (*worker_id, chunk.iter().map(|i| i.id.clone()).collect()))
            .collect();
        let mut claimed: HashMap<usize, HashSet<String>> = HashMap::new();
        while let Some(event) = events.recv().await {
            match event {
                PoolEvent::Result(worker_id, result) => {
                    let owns = owned
                        .get(&worker_id)
                        .is_some_and(|ids| ids.contains(&result.item_id));
                    let first = claimed
                        .entry(worker_id)
                        .or_default()
                        .insert(result.item_id.clone());
                    if !owns || !first {
                        tracing::warn!(
                            worker = worker_id,
                            item = %result.item_id,
                            "Ignoring unexpected or duplicate result"
                        );
                        continue;
                    }
                    results.push(result);
                    hooks.report(&results[results.len() - 1], results.len(), total);
                }
                PoolEvent::Exit(worker_id, exit) => {
                    let Some(chunk) = pending.remove(&worker_id) else {
                        continue;
                    };
                    let seen = claimed.remove(&worker_id).unwrap_or_default();
                    let unclaimed: Vec<WorkItem> = chunk
                        .into_iter()
                        .filter(|item| !seen.contains(&item.id))
                        .collect();
                    if unclaimed.is_empty() {
                        continue;
                    }

                    let detail = match exit {
                        WorkerExit::Failed(detail) => detail,
                        WorkerExit::Clean if hooks.cancel.is_cancelled() => continue,
                        WorkerExit::Clean => "exited without reporting every item".to_string(),
                    };
                    record_lost(worker_id, &detail, &unclaimed, &mut results, hooks, total);
                }
            }
        }

        Ok(results)
    }
}

fn record_lost(
    worker_id: usize,
    detail: &str,
    items: &[WorkItem],
    results: &mut Vec<FetchResult>,
    hooks: &RunHooks,
    total: usize,
) {
    tracing::warn!(
        worker = worker_id,
        lost = items.len(),
        detail = detail,
        "Worker lost; recording its unclaimed items as worker_lost"
    );
    for item in items {
        let lost = FetchResult::worker_lost(item, worker_id, detail);
        results.push(lost);
        hooks.report(&results[results.len() - 1], results.len(), total);
    }
}
