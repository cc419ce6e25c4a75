//! Run worker pool
//!
//! Queued runs travel through a bounded in-process channel to a fixed pool of
//! workers, so handler latency stays flat and run concurrency is capped.
//! Ordering across runs is FIFO per the channel; step ordering within a run is
//! the orchestrator's concern. On startup, runs left queued or running by a
//! previous process are re-enqueued.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::errors::{Result, ServiceError};
use crate::services::runs::AgentRunsService;

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_WORKERS: usize = 4;

/// Sending half of the run queue, shared with the HTTP handlers.
#[derive(Clone)]
pub struct RunQueue {
    tx: mpsc::Sender<Uuid>,
}

impl RunQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Uuid>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Hand a run id to the worker pool. A full or closed channel surfaces as
    /// `QueueUnavailable`; the run row stays queued and is picked up on the
    /// next restart.
    pub async fn enqueue(&self, run_id: Uuid) -> Result<()> {
        self.tx
            .try_send(run_id)
            .map_err(|_| ServiceError::QueueUnavailable)
    }
}

/// Spawn `workers` tasks draining the queue. Each worker takes one run at a
/// time and drives it to a terminal state before taking the next.
pub fn start_run_workers(
    runs: AgentRunsService,
    rx: mpsc::Receiver<Uuid>,
    workers: usize,
) {
    let rx = Arc::new(Mutex::new(rx));

    for worker_id in 0..workers {
        let runs = runs.clone();
        let rx = Arc::clone(&rx);

        tokio::spawn(async move {
            tracing::info!(worker_id, "Run worker started");
            loop {
                let run_id = { rx.lock().await.recv().await };
                let Some(run_id) = run_id else {
                    tracing::info!(worker_id, "Run queue closed, worker exiting");
                    break;
                };
                tracing::debug!(worker_id, run_id = %run_id, "Worker picked up run");
                runs.process_run(run_id).await;
            }
        });
    }
}

/// Re-enqueue runs that never reached a terminal state, oldest first.
pub async fn resume_unfinished_runs(runs: &AgentRunsService, queue: &RunQueue) -> Result<()> {
    let run_ids = runs.unfinished_run_ids().await?;
    if run_ids.is_empty() {
        return Ok(());
    }

    tracing::info!(count = run_ids.len(), "Resuming unfinished runs");
    for run_id in run_ids {
        if let Err(err) = queue.enqueue(run_id).await {
            tracing::warn!(run_id = %run_id, error = %err, "Could not re-enqueue run");
        }
    }
    Ok(())
}
