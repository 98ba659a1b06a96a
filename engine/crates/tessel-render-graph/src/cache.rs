//! 以结构化描述为 key 的对象缓存
//!
//! render pass、framebuffer、sampler 这类原生对象在不同 recording 之间复用。
//! 查找只需要读锁；条目带有引用计数和最后使用的帧号，
//! 没有引用并且超过一定帧数没有使用的条目会在 `garbage_collect` 时销毁。

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::error::RgResult;

struct RgCacheEntry<V> {
    value: V,
    refs: AtomicUsize,
    last_used: AtomicU64,
}

pub struct RgObjectCache<K, V> {
    name: &'static str,
    entries: RwLock<HashMap<K, RgCacheEntry<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

// new & init
impl<K: Hash + Eq + Clone, V: Copy> RgObjectCache<K, V> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

// lookup
impl<K: Hash + Eq + Clone, V: Copy> RgObjectCache<K, V> {
    /// 查找或创建，不改变引用计数
    pub fn get_or_create(&self, key: &K, frame_id: u64, create: impl FnOnce(&K) -> RgResult<V>) -> RgResult<V> {
        self.lookup(key, frame_id, false, create)
    }

    /// 查找或创建，并持有一个引用，之后需要 `release`
    pub fn acquire(&self, key: &K, frame_id: u64, create: impl FnOnce(&K) -> RgResult<V>) -> RgResult<V> {
        self.lookup(key, frame_id, true, create)
    }

    fn lookup(&self, key: &K, frame_id: u64, add_ref: bool, create: impl FnOnce(&K) -> RgResult<V>) -> RgResult<V> {
        if let Some(value) = self.touch(&self.entries.read(), key, frame_id, add_ref) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }

        let mut entries = self.entries.write();
        // 其他线程可能在等待写锁期间已经创建
        if let Some(value) = self.touch(&entries, key, frame_id, add_ref) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }
        let value = create(key)?;
        self.misses.fetch_add(1, Ordering::Relaxed);
        entries.insert(
            key.clone(),
            RgCacheEntry {
                value,
                refs: AtomicUsize::new(usize::from(add_ref)),
                last_used: AtomicU64::new(frame_id),
            },
        );
        Ok(value)
    }

    fn touch(&self, entries: &HashMap<K, RgCacheEntry<V>>, key: &K, frame_id: u64, add_ref: bool) -> Option<V> {
        let entry = entries.get(key)?;
        entry.last_used.fetch_max(frame_id, Ordering::Relaxed);
        if add_ref {
            entry.refs.fetch_add(1, Ordering::AcqRel);
        }
        Some(entry.value)
    }

    pub fn release(&self, key: &K) {
        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) => {
                if entry.refs.fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| r.checked_sub(1)).is_err() {
                    log::warn!("{} cache: release of an entry without references", self.name);
                }
            }
            None => log::warn!("{} cache: release of an unknown entry", self.name),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.read().get(key).map(|e| e.value)
    }
}

// lifecycle
impl<K: Hash + Eq + Clone, V: Copy> RgObjectCache<K, V> {
    /// 销毁没有引用并且 `max_unused_frames` 帧内没有被使用的条目，返回销毁数量
    pub fn garbage_collect(&self, frame_id: u64, max_unused_frames: u64, mut destroy: impl FnMut(&K, V)) -> usize {
        let mut entries = self.entries.write();
        let expired: Vec<K> = entries
            .iter()
            .filter(|(_, e)| {
                e.refs.load(Ordering::Acquire) == 0
                    && e.last_used.load(Ordering::Relaxed) + max_unused_frames < frame_id
            })
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            if let Some(entry) = entries.remove(key) {
                destroy(key, entry.value);
            }
        }
        if !expired.is_empty() {
            log::debug!("{} cache: collected {} entries at frame {}", self.name, expired.len(), frame_id);
        }
        expired.len()
    }

    /// 销毁满足条件的条目，不考虑引用计数，返回销毁数量
    pub fn remove_where(&self, mut pred: impl FnMut(&K) -> bool, mut destroy: impl FnMut(&K, V)) -> usize {
        let mut entries = self.entries.write();
        let stale: Vec<K> = entries.keys().filter(|k| pred(k)).cloned().collect();
        for key in &stale {
            if let Some(entry) = entries.remove(key) {
                destroy(key, entry.value);
            }
        }
        stale.len()
    }

    /// 销毁所有条目
    pub fn drain(&self, mut destroy: impl FnMut(&K, V)) {
        for (key, entry) in self.entries.write().drain() {
            destroy(&key, entry.value);
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (命中次数, 未命中次数)
    pub fn hit_stats(&self) -> (u64, u64) {
        (self.hits.load(Ordering::Relaxed), self.misses.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_or_insert_deduplicates() {
        let cache: RgObjectCache<u32, u64> = RgObjectCache::new("test");
        let mut created = 0;
        let a = cache
            .get_or_create(&7, 0, |k| {
                created += 1;
                Ok(*k as u64 * 10)
            })
            .unwrap();
        let b = cache.get_or_create(&7, 1, |_| panic!("must hit the cache")).unwrap();
        assert_eq!(a, 70);
        assert_eq!(a, b);
        assert_eq!(created, 1);
        assert_eq!(cache.hit_stats(), (1, 1));
    }

    #[test]
    fn test_garbage_collect_respects_refs_and_age() {
        let cache: RgObjectCache<&'static str, u32> = RgObjectCache::new("test");
        cache.acquire(&"held", 0, |_| Ok(1)).unwrap();
        cache.get_or_create(&"old", 0, |_| Ok(2)).unwrap();
        cache.get_or_create(&"fresh", 9, |_| Ok(3)).unwrap();

        let mut destroyed = vec![];
        assert_eq!(cache.garbage_collect(10, 4, |k, _| destroyed.push(*k)), 1);
        assert_eq!(destroyed, vec!["old"]);

        cache.release(&"held");
        assert_eq!(cache.garbage_collect(10, 4, |_, _| {}), 1);
        assert_eq!(cache.len(), 1);
    }
}
