use crate::progress::ProgressBatcher;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::error;

/// Runs one independent task per item on a bounded worker pool.
///
/// Guarantees:
/// - `result[i]` corresponds to `items[i]` no matter in which order tasks
///   finish;
/// - a panicking task fills its slot with `fallback()` and never disturbs the
///   other tasks;
/// - the shared progress counter ticks once per completed task (batched by
///   the caller's `ProgressBatcher`) and is flushed before returning.
///
/// Workers receive their item by value: all context a task needs travels in
/// the closure's own captures, not through shared mutable state.
pub async fn run_phase<T, R, F, Fut, D>(
    items: Vec<T>,
    max_workers: usize,
    progress: Arc<ProgressBatcher>,
    worker: F,
    fallback: D,
) -> Vec<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    D: Fn() -> R,
{
    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
    let mut handles = Vec::with_capacity(items.len());

    for item in items {
        let semaphore = semaphore.clone();
        let progress = progress.clone();
        let worker = worker.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("phase semaphore closed");
            let result = worker(item).await;
            progress.tick();
            result
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for (index, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(result) => results.push(result),
            Err(err) => {
                error!(
                    target = "vitrina.runner",
                    index = index,
                    error = %err,
                    "phase task aborted"
                );
                // The panicked task never ticked; keep the counter honest.
                progress.tick();
                results.push(fallback());
            }
        }
    }

    progress.flush();
    results
}
