// SPDX-License-Identifier: AGPL-3.0-or-later

//! Bounded priority queue behind a single mutex (C9, §4.9): dequeue always
//! returns the highest-priority task, ties broken FIFO by insertion order.

use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering as AtomicOrdering},
    },
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub task_type: String,
    pub priority: i64,
    pub data: serde_json::Value,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("task queue is full")]
    Full,
}

struct HeapEntry {
    priority: i64,
    seq: u64,
    task: Task,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // `BinaryHeap` is a max-heap; a lower `seq` must sort as "greater"
        // so that, among equal priorities, the earliest-enqueued task pops
        // first (FIFO).
        self.priority.cmp(&other.priority).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct TaskQueue {
    heap: Mutex<BinaryHeap<HeapEntry>>,
    max_size: usize,
    next_seq: AtomicU64,
}

impl TaskQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            max_size,
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn enqueue(&self, task: Task) -> Result<(), QueueError> {
        let mut heap = self.heap.lock().unwrap_or_else(|p| p.into_inner());
        if heap.len() >= self.max_size {
            return Err(QueueError::Full);
        }
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        heap.push(HeapEntry {
            priority: task.priority,
            seq,
            task,
        });
        Ok(())
    }

    pub fn dequeue(&self) -> Option<Task> {
        self.heap.lock().unwrap_or_else(|p| p.into_inner()).pop().map(|e| e.task)
    }

    pub fn size(&self) -> usize {
        self.heap.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}
