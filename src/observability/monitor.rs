// SPDX-License-Identifier: AGPL-3.0-or-later

//! Process-wide counters (C12, §2): request volume, byte counts, live
//! connections and cache hit ratio, exposed as an immutable snapshot the
//! same way `tasks::scheduler::Scheduler::stats()` does for the worker
//! pool. No export format is produced here; a collaborator renders the
//! snapshot as Prometheus text or anything else.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    pub requests_total: u64,
    pub bytes_in_total: u64,
    pub bytes_out_total: u64,
    pub active_connections: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_ratio: f64,
    pub uptime_secs: u64,
}

pub struct Monitor {
    requests_total: AtomicU64,
    bytes_in_total: AtomicU64,
    bytes_out_total: AtomicU64,
    active_connections: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    started_at: Instant,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            bytes_in_total: AtomicU64::new(0),
            bytes_out_total: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn record_request(&self, bytes_in: u64, bytes_out: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.bytes_in_total.fetch_add(bytes_in, Ordering::Relaxed);
        self.bytes_out_total.fetch_add(bytes_out, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let cache_hit_ratio = if total == 0 { 0.0 } else { hits as f64 / total as f64 };

        MonitorSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            bytes_in_total: self.bytes_in_total.load(Ordering::Relaxed),
            bytes_out_total: self.bytes_out_total.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            cache_hits: hits,
            cache_misses: misses,
            cache_hit_ratio,
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_across_calls() {
        let monitor = Monitor::new();
        monitor.record_request(100, 50);
        monitor.record_request(20, 10);
        monitor.connection_opened();
        monitor.connection_opened();
        monitor.connection_closed();

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.requests_total, 2);
        assert_eq!(snapshot.bytes_in_total, 120);
        assert_eq!(snapshot.bytes_out_total, 60);
        assert_eq!(snapshot.active_connections, 1);
    }

    #[test]
    fn cache_hit_ratio_is_zero_with_no_samples() {
        let monitor = Monitor::new();
        assert_eq!(monitor.snapshot().cache_hit_ratio, 0.0);
    }

    #[test]
    fn cache_hit_ratio_reflects_hits_and_misses() {
        let monitor = Monitor::new();
        monitor.record_cache_hit();
        monitor.record_cache_hit();
        monitor.record_cache_hit();
        monitor.record_cache_miss();
        assert_eq!(monitor.snapshot().cache_hit_ratio, 0.75);
    }
}
