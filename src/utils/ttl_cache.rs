//! 带过期时间的键值容器
//!
//! 结果缓存、Prompt 缓存和仓库克隆缓存共用的通用实现。
//! 容器本身不加锁，由持有者决定同步方式。

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// 过期计时方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryPolicy {
    /// 从写入时开始计时
    SinceInsert,
    /// 从最后一次访问开始计时（每次命中都会续期）
    SinceAccess,
}

/// 单个缓存条目
#[derive(Debug, Clone)]
struct TtlEntry<V> {
    value: V,
    inserted_at: Instant,
    last_accessed_at: Instant,
}

impl<V> TtlEntry<V> {
    fn new(value: V, now: Instant) -> Self {
        Self {
            value,
            inserted_at: now,
            last_accessed_at: now,
        }
    }
}

/// 带 TTL 和容量上限的缓存
///
/// 容量满时淘汰写入时间最早的条目。
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: HashMap<K, TtlEntry<V>>,
    ttl: Duration,
    max_entries: usize,
    policy: ExpiryPolicy,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// 创建新缓存
    pub fn new(ttl: Duration, max_entries: usize, policy: ExpiryPolicy) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
            policy,
        }
    }

    fn is_expired(&self, entry: &TtlEntry<V>, now: Instant) -> bool {
        let since = match self.policy {
            ExpiryPolicy::SinceInsert => entry.inserted_at,
            ExpiryPolicy::SinceAccess => entry.last_accessed_at,
        };
        now.saturating_duration_since(since) >= self.ttl
    }

    /// 读取未过期的值；命中时刷新访问时间，过期条目会被顺带移除
    pub fn get(&mut self, key: &K) -> Option<V> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) => self.is_expired(entry, now),
            None => return None,
        };

        if expired {
            self.entries.remove(key);
            return None;
        }

        let entry = self.entries.get_mut(key)?;
        entry.last_accessed_at = now;
        Some(entry.value.clone())
    }

    /// 只检查是否存在未过期条目，不刷新访问时间
    pub fn contains(&self, key: &K) -> bool {
        self.entries
            .get(key)
            .map(|entry| !self.is_expired(entry, Instant::now()))
            .unwrap_or(false)
    }

    /// 写入值，返回因容量不足被淘汰的条目
    pub fn set(&mut self, key: K, value: V) -> Option<(K, V)> {
        let now = Instant::now();
        let mut evicted = None;

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(k, _)| k.clone());

            if let Some(oldest) = oldest {
                evicted = self.entries.remove(&oldest).map(|entry| (oldest, entry.value));
            }
        }

        self.entries.insert(key, TtlEntry::new(value, now));
        evicted
    }

    /// 移除指定条目
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|entry| entry.value)
    }

    /// 清除所有过期条目，返回被清除的键值对
    pub fn sweep(&mut self) -> Vec<(K, V)> {
        let now = Instant::now();
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| self.is_expired(entry, now))
            .map(|(k, _)| k.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|k| self.entries.remove(&k).map(|entry| (k, entry.value)))
            .collect()
    }

    /// 清空缓存，返回所有条目
    pub fn drain(&mut self) -> Vec<(K, V)> {
        self.entries
            .drain()
            .map(|(k, entry)| (k, entry.value))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_get_and_set() {
        let mut cache = TtlCache::new(Duration::from_secs(60), 10, ExpiryPolicy::SinceInsert);
        assert!(cache.get(&"a".to_string()).is_none());

        cache.set("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let mut cache = TtlCache::new(Duration::from_millis(20), 10, ExpiryPolicy::SinceInsert);
        cache.set("a", 1);
        sleep(Duration::from_millis(40));

        assert!(!cache.contains(&"a"));
        assert!(cache.get(&"a").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_access_refreshes_sliding_expiry() {
        let mut cache = TtlCache::new(Duration::from_millis(80), 10, ExpiryPolicy::SinceAccess);
        cache.set("a", 1);

        for _ in 0..4 {
            sleep(Duration::from_millis(30));
            assert_eq!(cache.get(&"a"), Some(1));
        }

        sleep(Duration::from_millis(100));
        assert!(cache.get(&"a").is_none());
    }

    #[test]
    fn test_full_cache_evicts_oldest() {
        let mut cache = TtlCache::new(Duration::from_secs(60), 2, ExpiryPolicy::SinceInsert);
        assert!(cache.set("first", 1).is_none());
        sleep(Duration::from_millis(2));
        assert!(cache.set("second", 2).is_none());
        sleep(Duration::from_millis(2));

        let evicted = cache.set("third", 3);
        assert_eq!(evicted, Some(("first", 1)));
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&"second"));
        assert!(cache.contains(&"third"));
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let mut cache = TtlCache::new(Duration::from_secs(60), 2, ExpiryPolicy::SinceInsert);
        cache.set("a", 1);
        cache.set("b", 2);
        assert!(cache.set("a", 10).is_none());
        assert_eq!(cache.get(&"a"), Some(10));
    }

    #[test]
    fn test_sweep_returns_expired_entries() {
        let mut cache = TtlCache::new(Duration::from_millis(20), 10, ExpiryPolicy::SinceInsert);
        cache.set("old", 1);
        sleep(Duration::from_millis(40));
        cache.set("new", 2);

        let removed = cache.sweep();
        assert_eq!(removed, vec![("old", 1)]);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&"new"));
    }
}
