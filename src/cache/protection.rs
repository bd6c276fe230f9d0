// SPDX-License-Identifier: AGPL-3.0-or-later

//! Protection wrapper around `CacheManager::get`/`set` (§4.6): a
//! negative-result shield (a bounded "don't bother, this key just missed"
//! set) plus a circuit breaker that short-circuits reads when recent
//! failures exceed a threshold.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicI64, AtomicU64, Ordering},
    },
    time::Duration,
};

use crate::utils::now_epoch_secs;

#[derive(Debug, Clone, Copy)]
pub struct ProtectionConfig {
    pub max_blocked_keys: usize,
    pub block_duration: Duration,
    pub min_requests: u64,
    pub failure_threshold: f64,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            max_blocked_keys: 10_000,
            block_duration: Duration::from_secs(60),
            min_requests: 20,
            failure_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProtectionStats {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub blocked_keys: usize,
}

pub struct Protection {
    cfg: ProtectionConfig,
    blocked_keys: Mutex<HashMap<String, i64>>,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    last_failure_time: AtomicI64,
}

impl Protection {
    pub fn new(cfg: ProtectionConfig) -> Self {
        Self {
            cfg,
            blocked_keys: Mutex::new(HashMap::new()),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            last_failure_time: AtomicI64::new(0),
        }
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Negative-result shield: true if `key` was recently a genuine miss
    /// and its block window hasn't elapsed yet. Culls the entry lazily if
    /// the window has elapsed.
    pub fn is_shielded(&self, key: &str) -> bool {
        let mut blocked = self.blocked_keys.lock().unwrap_or_else(|p| p.into_inner());
        let Some(&start) = blocked.get(key) else {
            return false;
        };
        if now_epoch_secs() - start >= self.cfg.block_duration.as_secs() as i64 {
            blocked.remove(key);
            return false;
        }
        true
    }

    /// Records a genuine miss, shielding the key unless the bounded set is
    /// already at capacity.
    pub fn record_miss_key(&self, key: &str) {
        let mut blocked = self.blocked_keys.lock().unwrap_or_else(|p| p.into_inner());
        if blocked.len() >= self.cfg.max_blocked_keys && !blocked.contains_key(key) {
            return;
        }
        blocked.insert(key.to_string(), now_epoch_secs());
    }

    /// A successful `set` clears any shield on that key.
    pub fn clear_shield(&self, key: &str) {
        self.blocked_keys.lock().unwrap_or_else(|p| p.into_inner()).remove(key);
    }

    pub fn record_success(&self) {
        self.failed_requests.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
        self.last_failure_time.store(now_epoch_secs(), Ordering::Relaxed);
    }

    /// Circuit breaker: short-circuit reads if still within the block
    /// window of the last failure, or if the rolling failure rate exceeds
    /// the configured threshold.
    pub fn should_block(&self) -> bool {
        let last_failure = self.last_failure_time.load(Ordering::Relaxed);
        if last_failure != 0 && now_epoch_secs() - last_failure < self.cfg.block_duration.as_secs() as i64 {
            return true;
        }
        let total = self.total_requests.load(Ordering::Relaxed);
        let failed = self.failed_requests.load(Ordering::Relaxed);
        if total >= self.cfg.min_requests {
            let ratio = failed as f64 / total as f64;
            if ratio > self.cfg.failure_threshold {
                return true;
            }
        }
        false
    }

    pub fn stats(&self) -> ProtectionStats {
        ProtectionStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            blocked_keys: self.blocked_keys.lock().unwrap_or_else(|p| p.into_inner()).len(),
        }
    }
}
