// SPDX-License-Identifier: AGPL-3.0-or-later

//! Bulk invalidation collaborator for `CacheManager` (§4.6). Pattern-mode
//! invalidation is a declared-but-optional capability per the
//! design-notes guidance on the source's pattern/prefix stub: this build
//! supports exact-key batch invalidation and prefix invalidation, and
//! reports `Unsupported` for glob-style patterns rather than faking a
//! matcher.

use std::sync::Arc;

use crate::cache::{error::CacheError, l1::L1Cache, l2::L2Backend};

pub struct Invalidator {
    l1: Arc<L1Cache>,
    l2: Arc<dyn L2Backend>,
}

impl Invalidator {
    pub fn new(l1: Arc<L1Cache>, l2: Arc<dyn L2Backend>) -> Self {
        Self { l1, l2 }
    }

    pub async fn invalidate_by_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let keys = self.l1.keys_with_prefix(prefix);
        for key in &keys {
            self.l1.delete(key);
            let _ = self.l2.del(key).await;
        }
        Ok(keys.len())
    }

    pub fn invalidate_by_pattern(&self, _pattern: &str) -> Result<usize, CacheError> {
        Err(CacheError::Unsupported)
    }

    pub async fn batch_invalidate(&self, keys: &[String]) -> usize {
        let mut removed = 0;
        for key in keys {
            if self.l1.delete(key) {
                removed += 1;
            }
            let _ = self.l2.del(key).await;
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::cache::l2::InMemoryL2;

    #[tokio::test]
    async fn prefix_invalidation_removes_matching_keys() {
        let l1 = Arc::new(L1Cache::new(4, 100, 1_000_000));
        let l2: Arc<dyn L2Backend> = Arc::new(InMemoryL2::new());
        l1.set("user:1:name", Bytes::from_static(b"a"), None);
        l1.set("user:1:age", Bytes::from_static(b"b"), None);
        l1.set("user:2:name", Bytes::from_static(b"c"), None);

        let invalidator = Invalidator::new(l1.clone(), l2);
        let removed = invalidator.invalidate_by_prefix("user:1:").await.expect("invalidate");
        assert_eq!(removed, 2);
        assert!(l1.get("user:2:name").is_some());
    }

    #[test]
    fn pattern_invalidation_is_unsupported() {
        let l1 = Arc::new(L1Cache::new(4, 100, 1_000_000));
        let l2: Arc<dyn L2Backend> = Arc::new(InMemoryL2::new());
        let invalidator = Invalidator::new(l1, l2);
        assert!(matches!(invalidator.invalidate_by_pattern("user:*"), Err(CacheError::Unsupported)));
    }
}
