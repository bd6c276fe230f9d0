// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-process sharded bounded cache with lazy-TTL LRU eviction (C6, §4.7).
//!
//! Each shard owns its own lock, entry map and LRU clock, so contention is
//! bounded by `shard_count` rather than a single global lock, with keys
//! routed to shards by hash.

use std::{
    collections::HashMap,
    hash::{Hash, Hasher},
    sync::Mutex,
};

use bytes::Bytes;

use crate::utils::now_epoch_secs;

const DEFAULT_SHARDS: usize = 16;

struct Entry {
    value: Bytes,
    expires_at: Option<i64>,
    last_access: u64,
}

impl Entry {
    fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

struct Shard {
    entries: HashMap<String, Entry>,
    bytes_used: usize,
    clock: u64,
}

impl Shard {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            bytes_used: 0,
            clock: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict_one(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_access)
            .map(|(k, _)| k.clone());
        if let Some(key) = victim {
            if let Some(entry) = self.entries.remove(&key) {
                self.bytes_used = self.bytes_used.saturating_sub(entry.value.len());
            }
        }
    }
}

pub struct L1Cache {
    shards: Vec<Mutex<Shard>>,
    max_entries_per_shard: usize,
    max_bytes_per_shard: usize,
}

impl L1Cache {
    pub fn new(shard_count: usize, max_entries_total: usize, max_bytes_total: usize) -> Self {
        let shard_count = shard_count.clamp(1, 1024).max(1);
        let shards = (0..shard_count).map(|_| Mutex::new(Shard::new())).collect();
        Self {
            shards,
            max_entries_per_shard: (max_entries_total / shard_count).max(1),
            max_bytes_per_shard: (max_bytes_total / shard_count).max(1),
        }
    }

    pub fn with_default_shards(max_entries_total: usize, max_bytes_total: usize) -> Self {
        Self::new(DEFAULT_SHARDS, max_entries_total, max_bytes_total)
    }

    fn shard_for(&self, key: &str) -> &Mutex<Shard> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        let mut shard = self.shard_for(key).lock().unwrap_or_else(|p| p.into_inner());
        let now = now_epoch_secs();
        let expired = shard.entries.get(key).map(|e| e.is_expired(now)).unwrap_or(false);
        if expired {
            if let Some(entry) = shard.entries.remove(key) {
                shard.bytes_used = shard.bytes_used.saturating_sub(entry.value.len());
            }
            return None;
        }
        let tick = shard.tick();
        shard.entries.get_mut(key).map(|e| {
            e.last_access = tick;
            e.value.clone()
        })
    }

    pub fn set(&self, key: &str, value: Bytes, ttl_secs: Option<i64>) {
        let mut shard = self.shard_for(key).lock().unwrap_or_else(|p| p.into_inner());
        if let Some(old) = shard.entries.remove(key) {
            shard.bytes_used = shard.bytes_used.saturating_sub(old.value.len());
        }
        while shard.entries.len() >= self.max_entries_per_shard
            || shard.bytes_used + value.len() > self.max_bytes_per_shard
        {
            if shard.entries.is_empty() {
                break;
            }
            shard.evict_one();
        }
        let tick = shard.tick();
        let expires_at = ttl_secs.map(|ttl| now_epoch_secs() + ttl);
        shard.bytes_used += value.len();
        shard.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at,
                last_access: tick,
            },
        );
    }

    pub fn delete(&self, key: &str) -> bool {
        let mut shard = self.shard_for(key).lock().unwrap_or_else(|p| p.into_inner());
        if let Some(entry) = shard.entries.remove(key) {
            shard.bytes_used = shard.bytes_used.saturating_sub(entry.value.len());
            true
        } else {
            false
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(|p| p.into_inner()).entries.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every currently-held key starting with `prefix`, across all shards.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut out = Vec::new();
        for shard_lock in &self.shards {
            let shard = shard_lock.lock().unwrap_or_else(|p| p.into_inner());
            out.extend(shard.entries.keys().filter(|k| k.starts_with(prefix)).cloned());
        }
        out
    }

    /// Aggressively drops every expired entry, independent of reads.
    pub fn purge_expired(&self) -> usize {
        let now = now_epoch_secs();
        let mut purged = 0;
        for shard_lock in &self.shards {
            let mut shard = shard_lock.lock().unwrap_or_else(|p| p.into_inner());
            let expired_keys: Vec<String> = shard
                .entries
                .iter()
                .filter(|(_, e)| e.is_expired(now))
                .map(|(k, _)| k.clone())
                .collect();
            for key in expired_keys {
                if let Some(entry) = shard.entries.remove(&key) {
                    shard.bytes_used = shard.bytes_used.saturating_sub(entry.value.len());
                    purged += 1;
                }
            }
        }
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let cache = L1Cache::new(4, 100, 1_000_000);
        cache.set("k", Bytes::from_static(b"v"), None);
        assert_eq!(cache.get("k"), Some(Bytes::from_static(b"v")));
    }

    #[test]
    fn expired_entry_is_not_returned() {
        let cache = L1Cache::new(4, 100, 1_000_000);
        cache.set("k", Bytes::from_static(b"v"), Some(-1));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn eviction_keeps_shard_within_entry_cap() {
        let cache = L1Cache::new(1, 4, 1_000_000);
        for i in 0..16 {
            cache.set(&format!("k{i}"), Bytes::from(i.to_string()), None);
        }
        assert!(cache.len() <= 4);
    }

    #[test]
    fn delete_removes_entry() {
        let cache = L1Cache::new(4, 100, 1_000_000);
        cache.set("k", Bytes::from_static(b"v"), None);
        assert!(cache.delete("k"));
        assert_eq!(cache.get("k"), None);
        assert!(!cache.delete("k"));
    }
}
