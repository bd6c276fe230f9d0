// SPDX-License-Identifier: AGPL-3.0-or-later

//! A single worker's poll loop (§4.9): wakes on a fixed 100 ms cadence
//! rather than blocking on the queue, so it can also notice cancellation
//! without anything needing to wake the queue itself.

use std::{
    sync::{Arc, atomic::AtomicUsize},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{error::CoreError, tasks::queue::{Task, TaskQueue}};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task) -> Result<(), CoreError>;
}

pub struct Worker {
    pub id: usize,
}

impl Worker {
    pub fn new(id: usize) -> Self {
        Self { id }
    }

    pub async fn run(
        self,
        queue: Arc<TaskQueue>,
        executor: Arc<dyn TaskExecutor>,
        running_workers: Arc<AtomicUsize>,
        cancel: CancellationToken,
    ) {
        running_workers.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(POLL_INTERVAL) => {},
            }

            let Some(task) = queue.dequeue() else {
                continue;
            };

            let started = Instant::now();
            let task_id = task.id.clone();
            let executor = executor.clone();
            let outcome = tokio::spawn(async move { executor.execute(&task).await }).await;

            match outcome {
                Ok(Ok(())) => {
                    debug!(worker = self.id, task_id, elapsed_ms = started.elapsed().as_millis(), "task completed");
                },
                Ok(Err(e)) => {
                    warn!(worker = self.id, task_id, error = %e, "task execution failed");
                },
                Err(join_error) if join_error.is_panic() => {
                    warn!(worker = self.id, task_id, "task panicked, dropped");
                },
                Err(_) => {},
            }
        }
        running_workers.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
    }
}
