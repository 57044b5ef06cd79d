//! Orchestrator running one transform over a work set.
//!
//! The work set is queued up front on an unbounded channel whose sender is
//! then dropped, so workers exit once the queue is drained. Each worker pulls
//! one derivative at a time and materializes it on the blocking pool. A
//! failed or panicking item is recorded and the worker moves on. Workers keep
//! their own [`RunReport`]; reports are merged after every worker finished.

use crate::concurrency::WorkerPlan;
use crate::derivative::Derivative;
use crate::extract::panic_message;
use crate::transform::Transform;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info};

/// A derivative that could not be built.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedItem {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of one orchestration run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    /// Derivatives taken off the queue.
    pub attempted: usize,
    pub created: Vec<PathBuf>,
    pub failed: Vec<FailedItem>,
}

impl RunReport {
    fn merge(&mut self, other: RunReport) {
        self.attempted += other.attempted;
        self.created.extend(other.created);
        self.failed.extend(other.failed);
    }

    /// True when no item failed.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} attempted, {} created, {} failed",
            self.attempted,
            self.created.len(),
            self.failed.len()
        )
    }
}

type SharedQueue = Arc<Mutex<mpsc::UnboundedReceiver<Derivative>>>;

/// Fixed-size worker pool.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    workers: usize,
}

impl Orchestrator {
    /// Pool with `workers` workers (at least one).
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn from_plan(plan: &WorkerPlan) -> Self {
        Self::new(plan.workers as usize)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Materialize every derivative in `work` and return once all of them
    /// have been attempted.
    ///
    /// # Arguments
    /// * `transform` - Profile whose materialization is run per item
    /// * `work` - Stale derivatives with absolute output paths
    ///
    /// # Returns
    /// The merged report of all workers.
    pub async fn run(&self, transform: Arc<dyn Transform>, work: Vec<Derivative>) -> RunReport {
        let (tx, rx) = mpsc::unbounded_channel();
        for d in work {
            // receiver is alive, cannot fail
            let _ = tx.send(d);
        }
        drop(tx);

        let queue: SharedQueue = Arc::new(Mutex::new(rx));
        let handles: Vec<_> = (0..self.workers)
            .map(|id| tokio::spawn(worker(id, queue.clone(), transform.clone())))
            .collect();

        let mut report = RunReport::default();
        for handle in handles {
            match handle.await {
                Ok(partial) => report.merge(partial),
                Err(e) => error!(error = %e, "worker task aborted"),
            }
        }
        report
    }
}

async fn worker(id: usize, queue: SharedQueue, transform: Arc<dyn Transform>) -> RunReport {
    let mut report = RunReport::default();

    loop {
        let next = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };
        let Some(derivative) = next else {
            break;
        };

        report.attempted += 1;
        let path = derivative.output_path.clone();
        let t = transform.clone();
        let outcome = tokio::task::spawn_blocking(move || t.materialize(&derivative)).await;

        let failure = match outcome {
            Ok(Ok(())) => {
                info!(worker = id, path = %path.display(), "created");
                report.created.push(path);
                continue;
            }
            Ok(Err(e)) => {
                let stage = e
                    .stage()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "prepare".to_string());
                error!(worker = id, path = %path.display(), %stage, error = %e, "failed");
                e.to_string()
            }
            Err(e) if e.is_panic() => {
                let message = format!("panicked: {}", panic_message(e.into_panic().as_ref()));
                error!(worker = id, path = %path.display(), error = %message, "failed");
                message
            }
            Err(e) => {
                error!(worker = id, path = %path.display(), error = %e, "failed");
                e.to_string()
            }
        };
        report.failed.push(FailedItem {
            path,
            error: failure,
        });
    }

    report
}
