//! Bounded batched fan-out
//!
//! Chain nodes and the ledger database both throttle aggressive clients, so
//! per-account reads are issued in fixed-size batches: start up to `limit`
//! tasks, wait for all of them, then start the next batch.

use futures::future::join_all;
use std::future::Future;
use tracing::trace;

/// Default number of tasks in flight
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Batched executor with a fixed concurrency cap
#[derive(Debug, Clone, Copy)]
pub struct BatchExecutor {
    limit: usize,
}

impl Default for BatchExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl BatchExecutor {
    /// Create an executor running at most `limit` tasks at once (minimum 1)
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    /// Concurrency cap
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run `task` over every item.
    ///
    /// Any failure is fatal to the whole run: the batch in flight is drained
    /// and the first error is returned. Result order is unspecified.
    pub async fn run<I, T, R, E, F, Fut>(&self, items: I, mut task: F) -> Result<Vec<R>, E>
    where
        I: IntoIterator<Item = T>,
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let mut items = items.into_iter();
        let mut results = Vec::new();
        let mut batch_index = 0usize;

        loop {
            let batch: Vec<Fut> = items.by_ref().take(self.limit).map(&mut task).collect();
            if batch.is_empty() {
                break;
            }
            trace!(batch = batch_index, size = batch.len(), "Running batch");

            let mut first_error = None;
            for outcome in join_all(batch).await {
                match outcome {
                    Ok(value) => results.push(value),
                    Err(e) => {
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                }
            }
            if let Some(e) = first_error {
                return Err(e);
            }
            batch_index += 1;
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_runs_every_item() {
        let executor = BatchExecutor::new(3);
        let mut out: Vec<u32> = executor
            .run(1..=10u32, |i| async move { Ok::<_, String>(i * 2) })
            .await
            .unwrap();
        out.sort();
        assert_eq!(out, (1..=10u32).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_never_exceeds_limit() {
        let executor = BatchExecutor::new(5);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        executor
            .run(0..23, |_| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, String>(())
                }
            })
            .await
            .unwrap();

        assert_eq!(peak.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_first_error_stops_later_batches() {
        let executor = BatchExecutor::new(2);
        let started = Arc::new(AtomicUsize::new(0));

        let result = executor
            .run(0..10, |i| {
                let started = started.clone();
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    if i == 1 || i == 2 {
                        Err(format!("failed {}", i))
                    } else {
                        Ok(i)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap_err(), "failed 1");
        // Batch [0, 1] drains, nothing after it starts
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_zero_limit_is_clamped() {
        assert_eq!(BatchExecutor::new(0).limit(), 1);
        assert_eq!(BatchExecutor::default().limit(), DEFAULT_CONCURRENCY);
    }
}
