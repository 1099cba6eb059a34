//! Bounded fan-out / fan-in over sub-query workers
//!
//! Runs N workers under a pool of at most W concurrent tasks and joins the
//! results in submission order, so the final synthesis is deterministic
//! given deterministic oracle output even though completion order is not.
//! Worker traces are merged only here, in the single-threaded join phase.

use crate::worker::{SubQueryWorker, WorkerOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, warn};

/// Result of one dispatch round: completed outcomes in submission order.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub outcomes: Vec<WorkerOutcome>,
    pub trace: Vec<String>,
    pub timed_out: bool,
}

impl DispatchOutcome {
    /// Zero successful workers is an empty-result condition for the caller,
    /// not an error.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

pub struct ParallelDispatcher {
    max_workers: usize,
}

impl ParallelDispatcher {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
        }
    }

    /// Resolve every sub-query. `deadline` bounds the whole round; when it
    /// fires the completed subset is returned instead of blocking on
    /// stragglers.
    pub async fn dispatch(
        &self,
        worker: Arc<SubQueryWorker>,
        sub_queries: Vec<String>,
        deadline: Option<Duration>,
    ) -> DispatchOutcome {
        let n = sub_queries.len();

        if n == 0 {
            return DispatchOutcome {
                outcomes: vec![],
                trace: vec!["dispatch: no sub-queries".to_string()],
                timed_out: false,
            };
        }

        // Single sub-query: run inline, no pooling overhead.
        if n == 1 {
            let sub_query = &sub_queries[0];
            let outcome = worker.run(sub_query).await;
            let mut trace = vec!["dispatch: single sub-query resolved inline".to_string()];
            trace.extend(outcome.trace.iter().map(|t| format!("  Q1: {}", t)));

            return DispatchOutcome {
                outcomes: vec![outcome],
                trace,
                timed_out: false,
            };
        }

        let pool_size = n.min(self.max_workers);
        info!(sub_queries = n, pool_size, "Dispatching sub-query workers");

        let semaphore = Arc::new(Semaphore::new(pool_size));
        let (tx, mut rx) = mpsc::channel::<(usize, WorkerOutcome)>(n);

        for (idx, sub_query) in sub_queries.iter().cloned().enumerate() {
            let worker = worker.clone();
            let semaphore = semaphore.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                let outcome = worker.run(&sub_query).await;
                let _ = tx.send((idx, outcome)).await;
            });
        }
        drop(tx);

        // Join phase: slots keep submission order regardless of when each
        // worker finishes. A worker that dies simply leaves its slot empty.
        let mut slots: Vec<Option<WorkerOutcome>> = (0..n).map(|_| None).collect();
        let mut completed = 0usize;
        let mut timed_out = false;

        let wait = async {
            match deadline {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(wait);

        while completed < n {
            tokio::select! {
                _ = &mut wait => {
                    warn!(completed, total = n, "Dispatch deadline hit, abandoning stragglers");
                    timed_out = true;
                    break;
                }
                msg = rx.recv() => {
                    match msg {
                        Some((idx, outcome)) => {
                            slots[idx] = Some(outcome);
                            completed += 1;
                        }
                        None => break,
                    }
                }
            }
        }

        let mut trace = vec![format!(
            "dispatch: {} of {} workers completed{}",
            completed,
            n,
            if timed_out { " (deadline)" } else { "" }
        )];

        let mut outcomes = Vec::with_capacity(completed);
        for (idx, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(outcome) => {
                    if let Some(last) = outcome.trace.last() {
                        trace.push(format!("  Q{}: {}", idx + 1, last));
                    }
                    outcomes.push(outcome);
                }
                None => {
                    warn!(index = idx, "Worker produced no result");
                    trace.push(format!("  Q{}: no result", idx + 1));
                }
            }
        }

        DispatchOutcome {
            outcomes,
            trace,
            timed_out,
        }
    }
}
