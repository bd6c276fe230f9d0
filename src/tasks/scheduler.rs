// SPDX-License-Identifier: AGPL-3.0-or-later

//! Owns the worker pool and the queue (C9, §4.9): `start`/`stop` are
//! idempotent, `stop` lets in-flight tasks finish but does not drain the
//! backlog.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::tasks::{
    queue::{QueueError, Task, TaskQueue},
    worker::{TaskExecutor, Worker},
};

#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerStats {
    pub running: bool,
    pub worker_count: usize,
    pub running_workers: usize,
    pub queue_size: usize,
}

pub struct Scheduler {
    queue: Arc<TaskQueue>,
    executor: Arc<dyn TaskExecutor>,
    worker_count: usize,
    running: AtomicBool,
    running_workers: Arc<AtomicUsize>,
    cancel: Mutex<CancellationToken>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(queue_size: usize, worker_count: usize, executor: Arc<dyn TaskExecutor>) -> Arc<Self> {
        Arc::new(Self {
            queue: Arc::new(TaskQueue::new(queue_size)),
            executor,
            worker_count,
            running: AtomicBool::new(false),
            running_workers: Arc::new(AtomicUsize::new(0)),
            cancel: Mutex::new(CancellationToken::new()),
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Idempotent: a second `start()` call while already running is a
    /// no-op.
    pub async fn start(self: &Arc<Self>) {
        if self.running.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return;
        }
        let cancel = CancellationToken::new();
        *self.cancel.lock().await = cancel.clone();

        let mut handles = Vec::with_capacity(self.worker_count);
        for id in 0..self.worker_count {
            let queue = self.queue.clone();
            let executor = self.executor.clone();
            let running_workers = self.running_workers.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(Worker::new(id).run(queue, executor, running_workers, cancel)));
        }
        *self.handles.lock().await = handles;
    }

    /// Idempotent: signals every worker to exit after its in-flight task
    /// completes. The queue backlog is left untouched.
    pub async fn stop(&self) {
        if self.running.compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return;
        }
        self.cancel.lock().await.cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
    }

    pub fn submit(&self, task: Task) -> Result<(), QueueError> {
        self.queue.enqueue(task)
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            running: self.running.load(Ordering::Relaxed),
            worker_count: self.worker_count,
            running_workers: self.running_workers.load(Ordering::Relaxed),
            queue_size: self.queue.size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::CoreError;

    struct NoopExecutor;

    #[async_trait]
    impl TaskExecutor for NoopExecutor {
        async fn execute(&self, _task: &Task) -> Result<(), CoreError> {
            Ok(())
        }
    }

    fn task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            task_type: "test".to_string(),
            priority: 1,
            data: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let scheduler = Scheduler::new(10, 2, Arc::new(NoopExecutor));
        scheduler.start().await;
        scheduler.start().await;
        assert!(scheduler.stats().running);
        scheduler.stop().await;
        scheduler.stop().await;
        assert!(!scheduler.stats().running);
    }

    #[tokio::test]
    async fn submitted_tasks_are_drained_by_workers() {
        let scheduler = Scheduler::new(10, 2, Arc::new(NoopExecutor));
        scheduler.start().await;
        for i in 0..5 {
            scheduler.submit(task(&format!("t{i}"))).expect("submit");
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(scheduler.stats().queue_size, 0);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn submit_respects_queue_capacity() {
        let scheduler = Scheduler::new(1, 0, Arc::new(NoopExecutor));
        scheduler.submit(task("a")).expect("first fits");
        assert_eq!(scheduler.submit(task("b")), Err(QueueError::Full));
    }
}
