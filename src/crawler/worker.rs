//! Worker process side of the pool protocol
//!
//! A worker reads one [`WorkerJob`] line, runs it through its own executor and
//! writes one JSON `FetchResult` line per finished item. End of input after
//! the job line means the pool wants it to stop dispatching.

use crate::crawler::executor::{Executor, RunHooks};
use crate::crawler::phases::{build_handler, ItemHandler};
use crate::crawler::pool::WorkerJob;
use crate::ComplotError;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Serves one job with the real phase handler
pub async fn serve<R, W>(input: R, output: W, cancel: CancellationToken) -> Result<usize, ComplotError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    serve_with(input, output, cancel, |job| build_handler(&job.task)).await
}

/// Serves one job with a handler chosen by `factory`
///
/// Returns the number of results written.
pub async fn serve_with<R, W, F>(
    input: R,
    mut output: W,
    cancel: CancellationToken,
    factory: F,
) -> Result<usize, ComplotError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
    F: FnOnce(&WorkerJob) -> Result<ItemHandler, ComplotError>,
{
    let mut reader = BufReader::new(input);
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(ComplotError::WorkerProtocol(
            "input closed before a job arrived".to_string(),
        ));
    }
    let job: WorkerJob = serde_json::from_str(line.trim_end())?;
    let handler = factory(&job)?;

    tracing::debug!(
        worker = job.worker_id,
        phase = %job.task.phase,
        tenant = %job.task.tenant.key,
        items = job.items.len(),
        "Worker received job"
    );

    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut rest = String::new();
            loop {
                rest.clear();
                match reader.read_line(&mut rest).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
            cancel.cancel();
        })
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let executor = Executor::new(job.concurrency);
    let hooks = RunHooks {
        cancel: cancel.clone(),
        progress: None,
        observer: Some(tx),
    };

    let run = async move {
        let results = executor
            .run(job.items, move |item| handler(item), &hooks)
            .await;
        results.len()
    };

    let write = async {
        let mut written = 0usize;
        while let Some(result) = rx.recv().await {
            let mut text = serde_json::to_string(&result)?;
            text.push('\n');
            if let Err(e) = output.write_all(text.as_bytes()).await {
                cancel.cancel();
                return Err(ComplotError::Io(e));
            }
            output.flush().await?;
            written += 1;
        }
        Ok::<usize, ComplotError>(written)
    };

    let (finished, written) = tokio::join!(run, write);
    watcher.abort();

    let written = written?;
    tracing::debug!(finished, written, "Worker done");
    Ok(written)
}
