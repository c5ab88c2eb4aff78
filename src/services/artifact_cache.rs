//! 产物缓存
//!
//! 按规范化后的输入缓存已生成的载荷，容量有限，满了淘汰最久未使用的一项。
//! 只缓存成功的产物。

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use lru::LruCache;

use crate::models::ArtifactPayload;

/// 有界的产物缓存
pub struct ArtifactCache {
    /// 容量为 0 时为 None，不缓存任何内容
    inner: Option<Mutex<LruCache<String, ArtifactPayload>>>,
}

impl ArtifactCache {
    /// 创建缓存，`capacity` 为 0 时不缓存任何内容
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    pub fn get(&self, key: &str) -> Option<ArtifactPayload> {
        self.lock()?.get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, payload: ArtifactPayload) {
        if let Some(mut cache) = self.lock() {
            cache.put(key.into(), payload);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map(|cache| cache.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Option<MutexGuard<'_, LruCache<String, ArtifactPayload>>> {
        // 缓存内容在任何时刻都是完整的，锁中毒时继续使用
        self.inner
            .as_ref()
            .map(|inner| inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }
}

/// 规范化缓存键：去掉每行行尾空白以及首尾空行
pub fn normalize_key(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim_matches('\n')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> ArtifactPayload {
        ArtifactPayload::Uri { uri: s.to_string() }
    }

    #[test]
    fn test_least_recently_used_evicted() {
        let cache = ArtifactCache::new(2);
        cache.insert("a", uri("1"));
        cache.insert("b", uri("2"));
        cache.insert("c", uri("3"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("c"), Some(uri("3")));

        // 读取 b 之后，最久未使用的是 c
        assert!(cache.get("b").is_some());
        cache.insert("d", uri("4"));
        assert!(cache.get("c").is_none());
        assert!(cache.get("b").is_some());
    }

    #[test]
    fn test_overwrite_replaces_payload() {
        let cache = ArtifactCache::new(2);
        cache.insert("a", uri("1"));
        cache.insert("a", uri("1b"));
        cache.insert("b", uri("2"));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(uri("1b")));
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let cache = ArtifactCache::new(0);
        cache.insert("a", uri("1"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("\nprint(1)   \n\n"), "print(1)");
        assert_eq!(normalize_key("a \nb"), normalize_key("a\nb\n"));
    }
}
