//! Rate-bounded executor
//!
//! Runs one handler per work item with a fixed ceiling on in-flight calls:
//! - A semaphore permit is acquired before a call is spawned and released when it returns
//! - Results are collected as they finish, in no particular order
//! - Cancellation stops dispatch; in-flight calls finish and their results are kept

use crate::state::{ErrorCategory, FetchFailure, FetchResult, WorkItem};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Completed-count snapshot passed to progress callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

/// Progress callback; must be cheap, it runs on the collecting task
pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

/// Side channels shared by the executor and the worker pool
#[derive(Clone, Default)]
pub struct RunHooks {
    /// Cooperative cancellation; checked before every dispatch
    pub cancel: CancellationToken,

    pub progress: Option<ProgressFn>,

    /// Receives a copy of every result as soon as it lands
    pub observer: Option<mpsc::UnboundedSender<FetchResult>>,
}

impl RunHooks {
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..Self::default()
        }
    }

    pub(crate) fn report(&self, result: &FetchResult, completed: usize, total: usize) {
        if let Some(progress) = &self.progress {
            progress(Progress { completed, total });
        }
        if let Some(observer) = &self.observer {
            // a closed observer only loses the live copy
            let _ = observer.send(result.clone());
        }
    }
}

/// Runs work items with at most `concurrency` handler calls in flight
#[derive(Debug, Clone, Copy)]
pub struct Executor {
    concurrency: usize,
}

impl Executor {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs `handler` over `items`
    ///
    /// Returns one result per dispatched item. Without cancellation every item
    /// is dispatched; after cancellation the undispatched tail is simply absent.
    pub async fn run<F, Fut>(
        &self,
        items: Vec<WorkItem>,
        handler: F,
        hooks: &RunHooks,
    ) -> Vec<FetchResult>
    where
        F: Fn(WorkItem) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FetchResult> + Send + 'static,
    {
        let total = items.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let handler = Arc::new(handler);
        let mut tasks: JoinSet<FetchResult> = JoinSet::new();
        let mut results = Vec::with_capacity(total);

        for item in items {
            let permit = loop {
                tokio::select! {
                    biased;
                    _ = hooks.cancel.cancelled() => break None,
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        collect(joined, &mut results, hooks, total);
                    }
                    permit = semaphore.clone().acquire_owned() => break permit.ok(),
                }
            };

            let Some(permit) = permit else {
                tracing::debug!(
                    dispatched = results.len() + tasks.len(),
                    total,
                    "Dispatch stopped by cancellation"
                );
                break;
            };

            let handler = Arc::clone(&handler);
            tasks.spawn(async move {
                let _permit = permit;
                let id = item.id.clone();
                let attempts = item.attempt_count;
                match AssertUnwindSafe(handler(item)).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        tracing::error!(item = %id, panic = %message, "Handler panicked");
                        FetchResult::failed(
                            id,
                            FetchFailure::new(
                                ErrorCategory::HandlerPanic,
                                format!("handler panicked: {}", message),
                            ),
                            attempts,
                        )
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            collect(joined, &mut results, hooks, total);
        }

        results
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string payload"
    }
}

fn collect(
    joined: Result<FetchResult, tokio::task::JoinError>,
    results: &mut Vec<FetchResult>,
    hooks: &RunHooks,
    total: usize,
) {
    match joined {
        Ok(result) => {
            results.push(result);
            hooks.report(&results[results.len() - 1], results.len(), total);
        }
        Err(e) => tracing::error!("Executor task failed to join: {}", e),
    }
}
