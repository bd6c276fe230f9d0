// SPDX-License-Identifier: AGPL-3.0-or-later

//! Composes L1 + L2 into the single cache surface handlers and the HTTP
//! contract use (C8, §4.6): read-through with L2→L1 promotion,
//! write-through to both tiers, and the protection wrapper around both.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use tracing::warn;

use crate::{
    cache::{
        error::CacheError,
        invalidator::Invalidator,
        l1::L1Cache,
        l2::{L2Backend, L2Error},
        protection::{Protection, ProtectionConfig, ProtectionStats},
    },
    observability::Monitor,
};

pub struct CacheManagerConfig {
    pub l1_enabled: bool,
    pub l2_enabled: bool,
    pub protection: ProtectionConfig,
}

pub struct CacheManager {
    l1_enabled: bool,
    l2_enabled: bool,
    l1: Arc<L1Cache>,
    l2: Arc<dyn L2Backend>,
    protection: Protection,
    invalidator: Invalidator,
    monitor: Arc<Monitor>,
}

impl CacheManager {
    pub fn new(l1: Arc<L1Cache>, l2: Arc<dyn L2Backend>, cfg: CacheManagerConfig) -> Self {
        Self::with_monitor(l1, l2, cfg, Arc::new(Monitor::new()))
    }

    /// Same as `new`, but shares the process-wide `Monitor` the binary
    /// already exposes at `/metrics` instead of allocating a private one
    /// whose counters nobody reads.
    pub fn with_monitor(l1: Arc<L1Cache>, l2: Arc<dyn L2Backend>, cfg: CacheManagerConfig, monitor: Arc<Monitor>) -> Self {
        let invalidator = Invalidator::new(l1.clone(), l2.clone());
        Self {
            l1_enabled: cfg.l1_enabled,
            l2_enabled: cfg.l2_enabled,
            l1,
            l2,
            protection: Protection::new(cfg.protection),
            invalidator,
            monitor,
        }
    }

    /// L1 first; on miss, fall through to L2 and promote the value back
    /// into L1 on hit. Both tiers missing returns `None`.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.protection.record_request();
        if self.protection.is_shielded(key) {
            return None;
        }

        if self.l1_enabled {
            if let Some(value) = self.l1.get(key) {
                self.monitor.record_cache_hit();
                return Some(value);
            }
        }

        if !self.l2_enabled || self.protection.should_block() {
            self.protection.record_miss_key(key);
            self.monitor.record_cache_miss();
            return None;
        }

        match self.l2.get(key).await {
            Ok(Some(value)) => {
                self.protection.record_success();
                self.protection.clear_shield(key);
                self.monitor.record_cache_hit();
                if self.l1_enabled {
                    self.l1.set(key, value.clone(), None);
                }
                Some(value)
            },
            Ok(None) => {
                self.protection.record_success();
                self.protection.record_miss_key(key);
                self.monitor.record_cache_miss();
                None
            },
            Err(L2Error::Disabled) => {
                self.protection.record_miss_key(key);
                self.monitor.record_cache_miss();
                None
            },
            Err(e @ L2Error::Unavailable(_)) => {
                warn!(%key, error = %e, "L2 get failed, treating as miss");
                self.protection.record_failure();
                self.protection.record_miss_key(key);
                self.monitor.record_cache_miss();
                None
            },
        }
    }

    /// Writes to every enabled tier; a failure at either tier is logged and
    /// swallowed. Returns true if at least one enabled tier accepted it.
    pub async fn set(&self, key: &str, value: Bytes, ttl_secs: Option<i64>) -> bool {
        let mut accepted = false;

        if self.l1_enabled {
            self.l1.set(key, value.clone(), ttl_secs);
            accepted = true;
        }

        if self.l2_enabled {
            match self.l2.set(key, value.clone(), ttl_secs).await {
                Ok(()) => accepted = true,
                Err(L2Error::Disabled) => {},
                Err(e @ L2Error::Unavailable(_)) => {
                    warn!(%key, error = %e, "L2 set failed, tier swallowed");
                    self.protection.record_failure();
                },
            }
        }

        if accepted {
            self.protection.clear_shield(key);
        }
        accepted
    }

    pub async fn delete(&self, key: &str) -> bool {
        let l1_deleted = self.l1_enabled && self.l1.delete(key);
        let l2_deleted = self.l2_enabled && self.l2.del(key).await.is_ok();
        self.protection.clear_shield(key);
        l1_deleted || l2_deleted
    }

    pub async fn exists(&self, key: &str) -> bool {
        if self.l1_enabled && self.l1.exists(key) {
            return true;
        }
        if self.l2_enabled {
            return self.l2.exists(key).await.unwrap_or(false);
        }
        false
    }

    pub async fn set_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: Option<i64>,
    ) -> Result<bool, CacheError> {
        let bytes = Bytes::from(serde_json::to_vec(value)?);
        Ok(self.set(key, bytes, ttl_secs).await)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.get(key).await {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn invalidate_by_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        self.invalidator.invalidate_by_prefix(prefix).await
    }

    pub fn invalidate_by_pattern(&self, pattern: &str) -> Result<usize, CacheError> {
        self.invalidator.invalidate_by_pattern(pattern)
    }

    pub async fn batch_invalidate(&self, keys: &[String]) -> usize {
        self.invalidator.batch_invalidate(keys).await
    }

    /// Bulk-populates both tiers from an already-loaded hotspot set; the
    /// domain-specific loader that decides *which* keys are hot lives in a
    /// collaborator, outside this core.
    pub async fn warmup(&self, entries: Vec<(String, Bytes)>) -> usize {
        let mut loaded = 0;
        for (key, value) in entries {
            if self.set(&key, value, None).await {
                loaded += 1;
            }
        }
        loaded
    }

    pub fn protection_stats(&self) -> ProtectionStats {
        self.protection.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::l2::{DisabledL2, InMemoryL2};

    fn manager() -> CacheManager {
        let l1 = Arc::new(L1Cache::new(4, 1000, 10_000_000));
        let l2: Arc<dyn L2Backend> = Arc::new(InMemoryL2::new());
        CacheManager::new(
            l1,
            l2,
            CacheManagerConfig {
                l1_enabled: true,
                l2_enabled: true,
                protection: ProtectionConfig::default(),
            },
        )
    }

    #[tokio::test]
    async fn read_through_promotes_l2_value_to_l1() {
        let manager = manager();
        manager.l2.set("k", Bytes::from_static(b"v"), None).await.expect("seed l2");

        let value = manager.get("k").await;
        assert_eq!(value, Some(Bytes::from_static(b"v")));
        assert_eq!(manager.l1.get("k"), Some(Bytes::from_static(b"v")));
    }

    #[tokio::test]
    async fn set_writes_both_tiers_and_agrees() {
        let manager = manager();
        assert!(manager.set("k", Bytes::from_static(b"v1"), None).await);
        assert_eq!(manager.l1.get("k"), manager.l2.get("k").await.expect("l2 get"));
    }

    #[tokio::test]
    async fn delete_removes_from_both_tiers() {
        let manager = manager();
        manager.set("k", Bytes::from_static(b"v"), None).await;
        assert!(manager.delete("k").await);
        assert_eq!(manager.get("k").await, None);
    }

    #[tokio::test]
    async fn disabled_l2_falls_through_silently_without_tripping_breaker() {
        let l1 = Arc::new(L1Cache::new(4, 1000, 10_000_000));
        let l2: Arc<dyn L2Backend> = Arc::new(DisabledL2);
        let manager = CacheManager::new(
            l1,
            l2,
            CacheManagerConfig {
                l1_enabled: true,
                l2_enabled: true,
                protection: ProtectionConfig { min_requests: 1, ..Default::default() },
            },
        );

        for _ in 0..5 {
            assert_eq!(manager.get("missing").await, None);
        }
        // L1 alone still accepts the write; L2 is absent, not failing.
        assert!(manager.set("k", Bytes::from_static(b"v"), None).await);

        assert_eq!(manager.protection_stats().failed_requests, 0);
    }

    #[tokio::test]
    async fn hits_and_misses_feed_the_shared_monitor() {
        let l1 = Arc::new(L1Cache::new(4, 1000, 10_000_000));
        let l2: Arc<dyn L2Backend> = Arc::new(InMemoryL2::new());
        let monitor = Arc::new(Monitor::new());
        let manager = CacheManager::with_monitor(
            l1,
            l2,
            CacheManagerConfig {
                l1_enabled: true,
                l2_enabled: true,
                protection: ProtectionConfig::default(),
            },
            monitor.clone(),
        );

        manager.set("k", Bytes::from_static(b"v"), None).await;
        manager.get("k").await;
        manager.get("missing").await;

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 1);
    }

    #[tokio::test]
    async fn json_round_trips() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Item {
            name: String,
        }
        let manager = manager();
        manager
            .set_json("item:1", &Item { name: "sword".into() }, None)
            .await
            .expect("set_json");
        let loaded: Option<Item> = manager.get_json("item:1").await.expect("get_json");
        assert_eq!(loaded, Some(Item { name: "sword".into() }));
    }
}
