// SPDX-License-Identifier: AGPL-3.0-or-later

//! Background task queue, worker pool, scheduler and health monitor (C9,
//! §4.9).

pub mod monitor;
pub mod queue;
pub mod scheduler;
pub mod worker;

pub use monitor::Monitor;
pub use queue::{QueueError, Task, TaskQueue};
pub use scheduler::{Scheduler, SchedulerStats};
pub use worker::{TaskExecutor, Worker};
