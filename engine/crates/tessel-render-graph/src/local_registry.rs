//! recording 内的资源表
//!
//! 每个被 task 引用的资源在 recording 中有且只有一个 [`RgLocalResource`]，
//! 它持有原生对象的快照和这个 recording 独占的 [`RgResourceTracker`]。

use std::collections::HashSet;

use ash::vk;
use indexmap::IndexMap;

use crate::error::{RgError, RgResult};
use crate::handle::{RgBufferId, RgImageId, RgRawResource};
use crate::resource::manager::RgResourceManager;
use crate::resource::{RgNativeResource, RgResourceSnapshot};
use crate::resource_state::RgUsage;
use crate::state_tracker::RgResourceTracker;

pub struct RgLocalResource {
    pub raw: RgRawResource,
    pub name: String,
    pub native: RgNativeResource,
    /// recording 结束时需要回到的状态
    pub default: RgUsage,
    pub tracker: RgResourceTracker,
}

impl RgLocalResource {
    fn new(raw: RgRawResource, snapshot: RgResourceSnapshot, immutable: bool) -> Self {
        let mut tracker = RgResourceTracker::new(raw.is_image(), snapshot.current);
        tracker.set_immutable(immutable);
        Self {
            raw,
            name: snapshot.name,
            native: snapshot.native,
            default: snapshot.default,
            tracker,
        }
    }

    /// recording 结束时是否需要回到默认状态
    ///
    /// 默认 layout 为 `UNDEFINED` 的 image 内容只在 recording 内有效，不需要回到默认状态。
    pub fn needs_drain(&self) -> bool {
        if self.tracker.is_immutable() {
            return false;
        }
        match self.native {
            RgNativeResource::Image { .. } => self.default.layout != vk::ImageLayout::UNDEFINED,
            _ => self.default != RgUsage::NONE,
        }
    }
}

#[derive(Default)]
pub struct RgLocalRegistry {
    /// 按第一次引用的顺序保存，drain 的顺序因此是确定的
    locals: IndexMap<RgRawResource, RgLocalResource>,
    immutable: HashSet<RgRawResource>,
}

// new & init
impl RgLocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

// resolve
impl RgLocalRegistry {
    /// 找到资源对应的 local，第一次引用时创建
    pub fn resolve(&mut self, manager: &RgResourceManager, raw: RgRawResource) -> RgResult<&mut RgLocalResource> {
        if !self.locals.contains_key(&raw) {
            let snapshot = manager.snapshot(raw).ok_or_else(|| RgError::invalid_handle(raw.kind(), raw))?;
            let local = RgLocalResource::new(raw, snapshot, self.immutable.contains(&raw));
            self.locals.insert(raw, local);
        }
        self.locals.get_mut(&raw).ok_or_else(|| RgError::invalid_handle(raw.kind(), raw))
    }

    pub fn mark_immutable(&mut self, manager: &RgResourceManager, raw: RgRawResource) -> RgResult<()> {
        self.immutable.insert(raw);
        self.resolve(manager, raw)?.tracker.set_immutable(true);
        Ok(())
    }

    #[inline]
    pub fn is_immutable(&self, raw: RgRawResource) -> bool {
        self.immutable.contains(&raw)
    }
}

// getters
impl RgLocalRegistry {
    #[inline]
    pub fn get(&self, raw: RgRawResource) -> Option<&RgLocalResource> {
        self.locals.get(&raw)
    }

    #[inline]
    pub fn get_mut(&mut self, raw: RgRawResource) -> Option<&mut RgLocalResource> {
        self.locals.get_mut(&raw)
    }

    pub fn name(&self, raw: RgRawResource) -> &str {
        self.locals.get(&raw).map(|l| l.name.as_str()).unwrap_or("<unknown>")
    }

    /// image 的原生对象和当前 layout
    pub fn image(&self, id: RgImageId) -> Option<(vk::Image, vk::ImageView, vk::ImageLayout)> {
        let local = self.locals.get(&RgRawResource::Image(id))?;
        match local.native {
            RgNativeResource::Image { image, view, .. } => Some((image, view, local.tracker.layout())),
            _ => None,
        }
    }

    pub fn image_range(&self, id: RgImageId) -> Option<vk::ImageSubresourceRange> {
        match self.locals.get(&RgRawResource::Image(id))?.native {
            RgNativeResource::Image { range, .. } => Some(range),
            _ => None,
        }
    }

    pub fn buffer(&self, id: RgBufferId) -> Option<vk::Buffer> {
        match self.locals.get(&RgRawResource::Buffer(id))?.native {
            RgNativeResource::Buffer { buffer, .. } => Some(buffer),
            _ => None,
        }
    }

    pub fn device_address(&self, raw: RgRawResource) -> Option<vk::DeviceAddress> {
        self.locals.get(&raw).map(|l| l.native.device_address())
    }

    pub fn accel_struct(&self, raw: RgRawResource) -> Option<vk::AccelerationStructureKHR> {
        match self.locals.get(&raw)?.native {
            RgNativeResource::AccelStruct { handle, .. } => Some(handle),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &RgLocalResource> {
        self.locals.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RgLocalResource> {
        self.locals.values_mut()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.locals.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.locals.is_empty()
    }
}
