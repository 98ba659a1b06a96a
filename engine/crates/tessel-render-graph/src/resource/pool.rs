use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use slotmap::{Key, SlotMap};

struct RgPoolEntry<T> {
    value: T,
    /// 强引用数量，降为 0 之后资源只对已经解析过它的 recording 可见
    refs: AtomicU32,
}

/// 带引用计数的资源池
///
/// 查询和引用计数只需要读锁，只有插入和移除需要写锁。
pub(crate) struct RgPool<K: Key, T> {
    slots: RwLock<SlotMap<K, RgPoolEntry<T>>>,
}

impl<K: Key, T> Default for RgPool<K, T> {
    fn default() -> Self {
        Self {
            slots: RwLock::new(SlotMap::with_key()),
        }
    }
}

impl<K: Key, T> RgPool<K, T> {
    /// 插入一个资源，调用者持有它的第一个引用
    pub fn insert(&self, value: T) -> K {
        self.slots.write().insert(RgPoolEntry {
            value,
            refs: AtomicU32::new(1),
        })
    }

    /// 只对仍然存活（引用数大于 0）的资源调用 `f`
    pub fn with_live<R>(&self, id: K, f: impl FnOnce(&T) -> R) -> Option<R> {
        let slots = self.slots.read();
        let entry = slots.get(id)?;
        (entry.refs.load(Ordering::Acquire) > 0).then(|| f(&entry.value))
    }

    /// 不检查引用数，用于已经被 recording 解析过的资源
    pub fn with<R>(&self, id: K, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.slots.read().get(id).map(|entry| f(&entry.value))
    }

    pub fn with_mut<R>(&self, id: K, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.slots.write().get_mut(id).map(|entry| f(&mut entry.value))
    }

    pub fn add_ref(&self, id: K) -> bool {
        let slots = self.slots.read();
        let Some(entry) = slots.get(id) else {
            return false;
        };
        entry
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| (refs > 0).then_some(refs + 1))
            .is_ok()
    }

    /// 减少引用计数，降为 0 时返回 true
    pub fn release(&self, id: K) -> bool {
        let slots = self.slots.read();
        let Some(entry) = slots.get(id) else {
            return false;
        };
        match entry.refs.fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| refs.checked_sub(1)) {
            Ok(previous) => previous == 1,
            Err(_) => {
                log::warn!("release of {:?} which has no strong references left", id.data());
                false
            }
        }
    }

    pub fn remove(&self, id: K) -> Option<T> {
        self.slots.write().remove(id).map(|entry| entry.value)
    }

    pub fn is_live(&self, id: K) -> bool {
        self.with_live(id, |_| ()).is_some()
    }

    /// 存活的资源数量
    pub fn live_count(&self) -> usize {
        self.slots.read().values().filter(|e| e.refs.load(Ordering::Acquire) > 0).count()
    }

    pub fn drain(&self) -> Vec<(K, T, u32)> {
        self.slots.write().drain().map(|(id, entry)| (id, entry.value, entry.refs.into_inner())).collect()
    }
}
