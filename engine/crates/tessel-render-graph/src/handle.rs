//! 资源句柄
//!
//! - raw 句柄（`RgImageId` 等）是 slotmap 的 key：可复制、可比较、可哈希，不持有所有权。
//!   资源被销毁后，generation 检查会让旧句柄失效，而不是指向新的资源。
//! - [`RgStrong`] 持有一个引用计数，drop 即 release。最后一个强引用释放后，资源进入延迟销毁队列。

use std::fmt;
use std::sync::Arc;

use slotmap::new_key_type;

use crate::resource::manager::RgResourceManager;

new_key_type! { pub struct RgImageId; }
new_key_type! { pub struct RgBufferId; }
new_key_type! { pub struct RgSamplerId; }
new_key_type! { pub struct RgPipelineId; }
new_key_type! { pub struct RgRtGeometryId; }
new_key_type! { pub struct RgRtSceneId; }
new_key_type! { pub struct RgSwapchainId; }

/// 会被 state tracker 跟踪的资源
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RgRawResource {
    Image(RgImageId),
    Buffer(RgBufferId),
    RtGeometry(RgRtGeometryId),
    RtScene(RgRtSceneId),
}

impl RgRawResource {
    #[inline]
    pub fn is_image(&self) -> bool {
        matches!(self, Self::Image(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Image(_) => "image",
            Self::Buffer(_) => "buffer",
            Self::RtGeometry(_) => "rt-geometry",
            Self::RtScene(_) => "rt-scene",
        }
    }
}

impl From<RgImageId> for RgRawResource {
    fn from(id: RgImageId) -> Self {
        Self::Image(id)
    }
}

impl From<RgBufferId> for RgRawResource {
    fn from(id: RgBufferId) -> Self {
        Self::Buffer(id)
    }
}

impl From<RgRtGeometryId> for RgRawResource {
    fn from(id: RgRtGeometryId) -> Self {
        Self::RtGeometry(id)
    }
}

impl From<RgRtSceneId> for RgRawResource {
    fn from(id: RgRtSceneId) -> Self {
        Self::RtScene(id)
    }
}

/// 可以被 [`RgStrong`] 持有的 key
pub trait RgResourceKey: slotmap::Key + fmt::Debug + Send + Sync + 'static {
    const KIND: &'static str;

    /// 增加引用计数，资源已经失效时返回 false
    fn add_ref(manager: &RgResourceManager, id: Self) -> bool;

    fn release(manager: &RgResourceManager, id: Self);
}

/// 持有引用计数的资源句柄
///
/// `Clone` 会增加引用计数，drop 会释放。`release` 把强句柄变回 raw 句柄。
pub struct RgStrong<K: RgResourceKey> {
    id: K,
    manager: Arc<RgResourceManager>,
}

impl<K: RgResourceKey> RgStrong<K> {
    /// 调用者需要已经为 `id` 持有一个引用
    #[inline]
    pub(crate) fn from_owned(id: K, manager: Arc<RgResourceManager>) -> Self {
        Self { id, manager }
    }

    /// 在已有的 raw 句柄上重新获得一个强引用
    pub fn upgrade(manager: &Arc<RgResourceManager>, id: K) -> Option<Self> {
        K::add_ref(manager, id).then(|| Self {
            id,
            manager: manager.clone(),
        })
    }

    #[inline]
    pub fn id(&self) -> K {
        self.id
    }

    /// 释放引用，返回 raw 句柄
    pub fn release(self) -> K {
        self.id
    }
}

impl<K: RgResourceKey> Clone for RgStrong<K> {
    fn clone(&self) -> Self {
        let alive = K::add_ref(&self.manager, self.id);
        debug_assert!(alive, "cloning a strong handle of a destroyed {}", K::KIND);
        Self {
            id: self.id,
            manager: self.manager.clone(),
        }
    }
}

impl<K: RgResourceKey> Drop for RgStrong<K> {
    fn drop(&mut self) {
        K::release(&self.manager, self.id);
    }
}

impl<K: RgResourceKey> fmt::Debug for RgStrong<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Strong({:?})", self.id)
    }
}

impl<K: RgResourceKey> PartialEq for RgStrong<K> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<K: RgResourceKey> Eq for RgStrong<K> {}
