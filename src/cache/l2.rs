// SPDX-License-Identifier: AGPL-3.0-or-later

//! Remote KV tier (C7, §4.8): a thin adapter contract over `get/set/del/
//! exists/flush/ping`, TTL passed through verbatim. No concrete remote KV
//! client (e.g. a Redis driver) appears anywhere in the retrieved example
//! pack, so this module defines the trait boundary plus an in-memory
//! adapter that implements the same contract for tests and for
//! deployments that haven't wired a real backend yet.

use std::{
    collections::HashMap,
    sync::Mutex,
};

use async_trait::async_trait;
use bytes::Bytes;

use crate::utils::now_epoch_secs;

/// `Disabled` is the expected, spec-sanctioned shape of "no backend
/// configured": callers fall through to the next tier silently, no
/// warning logged, no circuit-breaker failure recorded. `Unavailable`
/// covers an actually configured backend failing (connection reset,
/// timeout, protocol error) and does drive the breaker.
#[derive(Debug, thiserror::Error)]
pub enum L2Error {
    #[error("L2 backend not configured")]
    Disabled,
    #[error("L2 backend unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait L2Backend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, L2Error>;
    async fn set(&self, key: &str, value: Bytes, ttl_secs: Option<i64>) -> Result<(), L2Error>;
    async fn del(&self, key: &str) -> Result<(), L2Error>;
    async fn exists(&self, key: &str) -> Result<bool, L2Error>;
    async fn flush(&self) -> Result<(), L2Error>;
    async fn ping(&self) -> Result<(), L2Error>;
}

struct Record {
    value: Bytes,
    expires_at: Option<i64>,
}

/// In-memory stand-in for a remote KV service, used when `cache.l2.enabled`
/// is false or in tests. TTL semantics match what a real backend would
/// provide: lazy expiry checked on read.
#[derive(Default)]
pub struct InMemoryL2 {
    store: Mutex<HashMap<String, Record>>,
}

impl InMemoryL2 {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl L2Backend for InMemoryL2 {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, L2Error> {
        let mut store = self.store.lock().unwrap_or_else(|p| p.into_inner());
        let now = now_epoch_secs();
        if let Some(record) = store.get(key) {
            if record.expires_at.is_some_and(|exp| now >= exp) {
                store.remove(key);
                return Ok(None);
            }
            return Ok(Some(record.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl_secs: Option<i64>) -> Result<(), L2Error> {
        let mut store = self.store.lock().unwrap_or_else(|p| p.into_inner());
        let expires_at = ttl_secs.map(|ttl| now_epoch_secs() + ttl);
        store.insert(key.to_string(), Record { value, expires_at });
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), L2Error> {
        self.store.lock().unwrap_or_else(|p| p.into_inner()).remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, L2Error> {
        Ok(self.get(key).await?.is_some())
    }

    async fn flush(&self) -> Result<(), L2Error> {
        self.store.lock().unwrap_or_else(|p| p.into_inner()).clear();
        Ok(())
    }

    async fn ping(&self) -> Result<(), L2Error> {
        Ok(())
    }
}

/// Disabled tier: every operation reports `Disabled`, so `CacheManager`
/// treats L2 as absent without special-casing a `None` backend.
pub struct DisabledL2;

#[async_trait]
impl L2Backend for DisabledL2 {
    async fn get(&self, _key: &str) -> Result<Option<Bytes>, L2Error> {
        Err(L2Error::Disabled)
    }

    async fn set(&self, _key: &str, _value: Bytes, _ttl_secs: Option<i64>) -> Result<(), L2Error> {
        Err(L2Error::Disabled)
    }

    async fn del(&self, _key: &str) -> Result<(), L2Error> {
        Err(L2Error::Disabled)
    }

    async fn exists(&self, _key: &str) -> Result<bool, L2Error> {
        Err(L2Error::Disabled)
    }

    async fn flush(&self) -> Result<(), L2Error> {
        Err(L2Error::Disabled)
    }

    async fn ping(&self) -> Result<(), L2Error> {
        Err(L2Error::Disabled)
    }
}
