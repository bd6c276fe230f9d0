// SPDX-License-Identifier: AGPL-3.0-or-later

//! Periodic scheduler health reporting (§4.9): warns on a deep backlog or
//! on a worker pool that looks half-dead.

use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::tasks::scheduler::Scheduler;

const DEFAULT_HIGH_WATERMARK: usize = 1000;

pub struct Monitor {
    scheduler: Arc<Scheduler>,
    interval: Duration,
    high_watermark: usize,
}

impl Monitor {
    pub fn new(scheduler: Arc<Scheduler>, interval: Duration) -> Self {
        Self {
            scheduler,
            interval,
            high_watermark: DEFAULT_HIGH_WATERMARK,
        }
    }

    pub fn with_high_watermark(mut self, high_watermark: usize) -> Self {
        self.high_watermark = high_watermark;
        self
    }

    pub fn spawn(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.interval) => {},
                }
                let stats = self.scheduler.stats();
                info!(
                    running = stats.running,
                    worker_count = stats.worker_count,
                    running_workers = stats.running_workers,
                    queue_size = stats.queue_size,
                    "scheduler stats"
                );
                if stats.queue_size > self.high_watermark {
                    warn!(queue_size = stats.queue_size, watermark = self.high_watermark, "task queue backlog is high");
                }
                if stats.running && stats.running_workers < stats.worker_count / 2 {
                    warn!(
                        running_workers = stats.running_workers,
                        worker_count = stats.worker_count,
                        "fewer than half the worker pool is alive"
                    );
                }
            }
        })
    }
}
