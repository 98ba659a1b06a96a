//! 资源的所有者
//!
//! - 所有资源放在带 generation 的 [`RgPool`] 中，句柄失效后不会误指向新资源
//! - 最后一个强引用释放后，资源进入延迟销毁队列，等 GPU 不再使用后（`frames_in_flight` 帧之后）才真正销毁
//! - 每个资源保存跨 recording 的已提交状态，recording 结束时写回

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use ash::vk;
use parking_lot::Mutex;
use tessel_gfx::device::GfxDevice;
use tessel_gfx::format::full_subresource_range;
use tessel_gfx::resources::buffer::{GfxAccelStructAllocation, GfxBufferAllocation, GfxBufferDesc};
use tessel_gfx::resources::image::{GfxImageAllocation, GfxImageDesc};
use tessel_gfx::resources::sampler::GfxSamplerDesc;

use crate::cache::RgObjectCache;
use crate::error::RgResult;
use crate::handle::{
    RgBufferId, RgImageId, RgPipelineId, RgRawResource, RgResourceKey, RgRtGeometryId, RgRtSceneId, RgSamplerId,
    RgStrong, RgSwapchainId,
};
use crate::pipeline::RgPipelineDesc;
use crate::resource::pool::RgPool;
use crate::resource::{RgNativeResource, RgResourceSnapshot};
use crate::resource_state::{RgBufferState, RgImageState, RgUsage};
use crate::stats::RgResourceStats;

struct RgImageEntry {
    name: String,
    allocation: GfxImageAllocation,
    desc: GfxImageDesc,
    /// 外部导入的 image 不由 manager 销毁
    owned: bool,
    current: RgUsage,
    default: RgUsage,
}

struct RgBufferEntry {
    name: String,
    allocation: GfxBufferAllocation,
    owned: bool,
    current: RgUsage,
    default: RgUsage,
}

struct RgAccelEntry {
    name: String,
    allocation: GfxAccelStructAllocation,
    size: vk::DeviceSize,
    current: RgUsage,
    default: RgUsage,
}

struct RgSamplerEntry {
    desc: GfxSamplerDesc,
    sampler: vk::Sampler,
}

/// 导入的 swapchain
#[derive(Clone, Debug)]
pub struct RgSwapchain {
    pub name: String,
    pub handle: vk::SwapchainKHR,
    /// 按 swapchain image index 排列
    pub images: Vec<RgImageId>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

#[derive(Clone, Copy, Debug)]
enum RgPendingDestroy {
    Image(RgImageId),
    Buffer(RgBufferId),
    RtGeometry(RgRtGeometryId),
    RtScene(RgRtSceneId),
    Sampler(RgSamplerId),
    Pipeline(RgPipelineId),
    Swapchain(RgSwapchainId),
}

pub struct RgResourceManager {
    device: Arc<dyn GfxDevice>,
    frames_in_flight: u64,
    /// 最近一次 `cleanup` 时的帧号，新的延迟销毁请求以它为起点
    frame_id: AtomicU64,

    images: RgPool<RgImageId, RgImageEntry>,
    buffers: RgPool<RgBufferId, RgBufferEntry>,
    rt_geometries: RgPool<RgRtGeometryId, RgAccelEntry>,
    rt_scenes: RgPool<RgRtSceneId, RgAccelEntry>,
    samplers: RgPool<RgSamplerId, RgSamplerEntry>,
    pipelines: RgPool<RgPipelineId, Arc<RgPipelineDesc>>,
    swapchains: RgPool<RgSwapchainId, RgSwapchain>,

    sampler_cache: RgObjectCache<GfxSamplerDesc, vk::Sampler>,

    pending_destroy: Mutex<Vec<(RgPendingDestroy, u64)>>,
    /// 已销毁的 image view，引用它们的 framebuffer 需要失效
    destroyed_views: Mutex<Vec<vk::ImageView>>,
    destroyed: AtomicBool,
}

// new & init
impl RgResourceManager {
    pub fn new(device: Arc<dyn GfxDevice>, frames_in_flight: usize) -> Arc<Self> {
        Arc::new(Self {
            device,
            frames_in_flight: frames_in_flight as u64,
            frame_id: AtomicU64::new(0),
            images: RgPool::default(),
            buffers: RgPool::default(),
            rt_geometries: RgPool::default(),
            rt_scenes: RgPool::default(),
            samplers: RgPool::default(),
            pipelines: RgPool::default(),
            swapchains: RgPool::default(),
            sampler_cache: RgObjectCache::new("sampler"),
            pending_destroy: Mutex::new(Vec::new()),
            destroyed_views: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn device(&self) -> &Arc<dyn GfxDevice> {
        &self.device
    }

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id.load(Ordering::Acquire)
    }
}

// image
impl RgResourceManager {
    /// 创建一个由 manager 持有的 image
    ///
    /// 内容在第一次使用前是未定义的，`default` 是每个 recording 结束时 image 需要回到的状态。
    /// `default` 的 layout 为 `UNDEFINED` 时 image 被视为 transient，recording 结束后内容不保留。
    pub fn create_image(
        self: &Arc<Self>,
        name: impl Into<String>,
        desc: &GfxImageDesc,
        default: RgImageState,
    ) -> RgResult<RgStrong<RgImageId>> {
        let name = name.into();
        let allocation = self.device.create_image(desc, &name)?;
        log::debug!("create image \"{}\" {:?} {}x{}", name, desc.format, desc.extent.width, desc.extent.height);
        let id = self.images.insert(RgImageEntry {
            name,
            allocation,
            desc: *desc,
            owned: true,
            current: RgUsage::NONE,
            default: default.into(),
        });
        Ok(RgStrong::from_owned(id, self.clone()))
    }

    /// 导入外部创建的 image，manager 不负责销毁它
    pub fn import_image(
        self: &Arc<Self>,
        name: impl Into<String>,
        allocation: GfxImageAllocation,
        desc: &GfxImageDesc,
        initial: RgImageState,
        default: RgImageState,
    ) -> RgStrong<RgImageId> {
        let id = self.images.insert(RgImageEntry {
            name: name.into(),
            allocation,
            desc: *desc,
            owned: false,
            current: initial.into(),
            default: default.into(),
        });
        RgStrong::from_owned(id, self.clone())
    }

    pub fn image_desc(&self, id: RgImageId) -> Option<GfxImageDesc> {
        self.images.with_live(id, |e| e.desc)
    }
}

// buffer
impl RgResourceManager {
    /// 创建一个由 manager 持有的 buffer，第一次使用不需要同步
    pub fn create_buffer(
        self: &Arc<Self>,
        name: impl Into<String>,
        desc: &GfxBufferDesc,
        default: RgBufferState,
    ) -> RgResult<RgStrong<RgBufferId>> {
        let name = name.into();
        let allocation = self.device.create_buffer(desc, &name)?;
        log::debug!("create buffer \"{}\" size {}", name, desc.size);
        let id = self.buffers.insert(RgBufferEntry {
            name,
            allocation,
            owned: true,
            current: RgUsage::NONE,
            default: default.into(),
        });
        Ok(RgStrong::from_owned(id, self.clone()))
    }

    pub fn import_buffer(
        self: &Arc<Self>,
        name: impl Into<String>,
        allocation: GfxBufferAllocation,
        initial: RgBufferState,
        default: RgBufferState,
    ) -> RgStrong<RgBufferId> {
        let id = self.buffers.insert(RgBufferEntry {
            name: name.into(),
            allocation,
            owned: false,
            current: initial.into(),
            default: default.into(),
        });
        RgStrong::from_owned(id, self.clone())
    }

    pub fn buffer_size(&self, id: RgBufferId) -> Option<vk::DeviceSize> {
        self.buffers.with_live(id, |e| e.allocation.size)
    }
}

// 加速结构
impl RgResourceManager {
    fn create_accel(&self, name: String, ty: vk::AccelerationStructureTypeKHR, size: vk::DeviceSize) -> RgResult<RgAccelEntry> {
        let allocation = self.device.create_acceleration_structure(ty, size, &name)?;
        log::debug!("create acceleration structure \"{}\" {:?} size {}", name, ty, size);
        Ok(RgAccelEntry {
            name,
            allocation,
            size,
            current: RgUsage::NONE,
            default: RgBufferState::ACCELERATION_STRUCTURE_READ.into(),
        })
    }

    /// 创建一个 bottom level 加速结构（几何体）
    pub fn create_rt_geometry(
        self: &Arc<Self>,
        name: impl Into<String>,
        size: vk::DeviceSize,
    ) -> RgResult<RgStrong<RgRtGeometryId>> {
        let entry = self.create_accel(name.into(), vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL, size)?;
        Ok(RgStrong::from_owned(self.rt_geometries.insert(entry), self.clone()))
    }

    /// 创建一个 top level 加速结构（场景）
    pub fn create_rt_scene(self: &Arc<Self>, name: impl Into<String>, size: vk::DeviceSize) -> RgResult<RgStrong<RgRtSceneId>> {
        let entry = self.create_accel(name.into(), vk::AccelerationStructureTypeKHR::TOP_LEVEL, size)?;
        Ok(RgStrong::from_owned(self.rt_scenes.insert(entry), self.clone()))
    }
}

// sampler & pipeline
impl RgResourceManager {
    /// 相同描述的 sampler 共享同一个原生对象
    pub fn create_sampler(self: &Arc<Self>, desc: &GfxSamplerDesc) -> RgResult<RgStrong<RgSamplerId>> {
        let sampler = self
            .sampler_cache
            .acquire(desc, self.frame_id(), |desc| Ok(self.device.create_sampler(desc)?))?;
        let id = self.samplers.insert(RgSamplerEntry { desc: *desc, sampler });
        Ok(RgStrong::from_owned(id, self.clone()))
    }

    pub fn sampler(&self, id: RgSamplerId) -> Option<vk::Sampler> {
        self.samplers.with_live(id, |e| e.sampler)
    }

    /// 导入一个外部创建的 pipeline 以及它的反射信息
    pub fn import_pipeline(self: &Arc<Self>, desc: RgPipelineDesc) -> RgStrong<RgPipelineId> {
        log::debug!("import pipeline \"{}\"", desc.name);
        let id = self.pipelines.insert(Arc::new(desc));
        RgStrong::from_owned(id, self.clone())
    }

    pub fn pipeline(&self, id: RgPipelineId) -> Option<Arc<RgPipelineDesc>> {
        self.pipelines.with_live(id, |p| p.clone())
    }
}

// swapchain
impl RgResourceManager {
    /// 导入 swapchain 以及它的全部 image
    ///
    /// swapchain image 每次 acquire 之后内容都是未定义的，所以初始和默认状态都是 `UNDEFINED`。
    pub fn import_swapchain(
        self: &Arc<Self>,
        name: impl Into<String>,
        handle: vk::SwapchainKHR,
        images: &[(vk::Image, vk::ImageView)],
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> RgStrong<RgSwapchainId> {
        let name = name.into();
        let desc = GfxImageDesc::new_2d(extent.width, extent.height, format, vk::ImageUsageFlags::COLOR_ATTACHMENT);
        // image 的引用由 swapchain 条目持有，swapchain 销毁时一起释放
        let image_ids = images
            .iter()
            .enumerate()
            .map(|(index, &(image, view))| {
                self.images.insert(RgImageEntry {
                    name: format!("{}[{}]", name, index),
                    allocation: GfxImageAllocation {
                        image,
                        view,
                        memory: None,
                    },
                    desc,
                    owned: false,
                    current: RgUsage::NONE,
                    default: RgUsage::NONE,
                })
            })
            .collect();
        let id = self.swapchains.insert(RgSwapchain {
            name,
            handle,
            images: image_ids,
            format,
            extent,
        });
        RgStrong::from_owned(id, self.clone())
    }

    pub fn swapchain(&self, id: RgSwapchainId) -> Option<RgSwapchain> {
        self.swapchains.with_live(id, |s| s.clone())
    }

    pub fn swapchain_image(&self, id: RgSwapchainId, image_index: u32) -> Option<RgImageId> {
        self.swapchains.with_live(id, |s| s.images.get(image_index as usize).copied())?
    }
}

// recording 使用的状态接口
impl RgResourceManager {
    /// 取得资源当前的原生对象和已提交状态，失效的句柄返回 `None`
    pub fn snapshot(&self, raw: RgRawResource) -> Option<RgResourceSnapshot> {
        match raw {
            RgRawResource::Image(id) => self.images.with_live(id, |e| RgResourceSnapshot {
                name: e.name.clone(),
                native: RgNativeResource::Image {
                    image: e.allocation.image,
                    view: e.allocation.view,
                    format: e.desc.format,
                    extent: e.desc.extent,
                    samples: e.desc.samples,
                    range: full_subresource_range(e.desc.format),
                },
                current: e.current,
                default: e.default,
            }),
            RgRawResource::Buffer(id) => self.buffers.with_live(id, |e| RgResourceSnapshot {
                name: e.name.clone(),
                native: RgNativeResource::Buffer {
                    buffer: e.allocation.buffer,
                    size: e.allocation.size,
                    device_address: e.allocation.device_address,
                },
                current: e.current,
                default: e.default,
            }),
            RgRawResource::RtGeometry(id) => self.rt_geometries.with_live(id, Self::accel_snapshot),
            RgRawResource::RtScene(id) => self.rt_scenes.with_live(id, Self::accel_snapshot),
        }
    }

    fn accel_snapshot(e: &RgAccelEntry) -> RgResourceSnapshot {
        RgResourceSnapshot {
            name: e.name.clone(),
            native: RgNativeResource::AccelStruct {
                handle: e.allocation.handle,
                buffer: e.allocation.buffer.buffer,
                size: e.size,
                device_address: e.allocation.device_address,
            },
            current: e.current,
            default: e.default,
        }
    }

    /// recording 结束时写回资源状态
    ///
    /// 资源可能已经在 recording 期间被释放，此时写回没有意义，直接忽略。
    pub fn commit_state(&self, raw: RgRawResource, state: RgUsage) {
        let committed = match raw {
            RgRawResource::Image(id) => self.images.with_mut(id, |e| e.current = state),
            RgRawResource::Buffer(id) => self.buffers.with_mut(id, |e| e.current = state),
            RgRawResource::RtGeometry(id) => self.rt_geometries.with_mut(id, |e| e.current = state),
            RgRawResource::RtScene(id) => self.rt_scenes.with_mut(id, |e| e.current = state),
        };
        if committed.is_none() {
            log::trace!("skip committing state of destroyed {} {:?}", raw.kind(), raw);
        }
    }

    /// 资源是否仍然可以被新的 recording 引用
    pub fn contains(&self, raw: RgRawResource) -> bool {
        match raw {
            RgRawResource::Image(id) => self.images.is_live(id),
            RgRawResource::Buffer(id) => self.buffers.is_live(id),
            RgRawResource::RtGeometry(id) => self.rt_geometries.is_live(id),
            RgRawResource::RtScene(id) => self.rt_scenes.is_live(id),
        }
    }

    pub fn name(&self, raw: RgRawResource) -> Option<String> {
        self.snapshot(raw).map(|s| s.name)
    }
}

// 生命周期
impl RgResourceManager {
    fn defer_destroy(&self, resource: RgPendingDestroy) {
        let frame_id = self.frame_id();
        log::trace!("defer destroy {:?} at frame {}", resource, frame_id);
        self.pending_destroy.lock().push((resource, frame_id));
    }

    /// 在每帧开始时调用，销毁 GPU 已经不再使用的资源
    ///
    /// 资源在第 f 帧被释放，第 f + frames_in_flight 帧开始时，引用它的提交一定已经完成。
    pub fn cleanup(&self, frame_id: u64) -> usize {
        let _span = tessel_crate_tools::profile_span!("RgResourceManager::cleanup");
        self.frame_id.store(frame_id, Ordering::Release);

        let ready: Vec<RgPendingDestroy> = {
            let mut pending = self.pending_destroy.lock();
            let mut ready = Vec::new();
            pending.retain(|&(resource, released_at)| {
                if released_at + self.frames_in_flight <= frame_id {
                    ready.push(resource);
                    false
                } else {
                    true
                }
            });
            ready
        };

        for resource in &ready {
            self.destroy_now(*resource);
        }
        ready.len()
    }

    fn destroy_now(&self, resource: RgPendingDestroy) {
        match resource {
            RgPendingDestroy::Image(id) => {
                if let Some(entry) = self.images.remove(id) {
                    log::debug!("destroy image \"{}\"", entry.name);
                    self.destroyed_views.lock().push(entry.allocation.view);
                    if entry.owned {
                        self.device.destroy_image(entry.allocation);
                    }
                }
            }
            RgPendingDestroy::Buffer(id) => {
                if let Some(entry) = self.buffers.remove(id) {
                    log::debug!("destroy buffer \"{}\"", entry.name);
                    if entry.owned {
                        self.device.destroy_buffer(entry.allocation);
                    }
                }
            }
            RgPendingDestroy::RtGeometry(id) => {
                if let Some(entry) = self.rt_geometries.remove(id) {
                    log::debug!("destroy rt geometry \"{}\"", entry.name);
                    self.device.destroy_acceleration_structure(entry.allocation);
                }
            }
            RgPendingDestroy::RtScene(id) => {
                if let Some(entry) = self.rt_scenes.remove(id) {
                    log::debug!("destroy rt scene \"{}\"", entry.name);
                    self.device.destroy_acceleration_structure(entry.allocation);
                }
            }
            RgPendingDestroy::Sampler(id) => {
                // 原生 sampler 归缓存所有，引用归零后由缓存的 GC 销毁
                if let Some(entry) = self.samplers.remove(id) {
                    self.sampler_cache.release(&entry.desc);
                }
            }
            RgPendingDestroy::Pipeline(id) => {
                self.pipelines.remove(id);
            }
            RgPendingDestroy::Swapchain(id) => {
                if let Some(swapchain) = self.swapchains.remove(id) {
                    log::debug!("destroy swapchain \"{}\"", swapchain.name);
                    for image in swapchain.images {
                        RgImageId::release(self, image);
                    }
                }
            }
        }
    }

    /// 取出上次调用之后销毁的 image view
    pub fn take_destroyed_views(&self) -> Vec<vk::ImageView> {
        std::mem::take(&mut *self.destroyed_views.lock())
    }

    /// 销毁长期没有使用的 sampler
    pub fn garbage_collect_samplers(&self, frame_id: u64, max_unused_frames: u64) -> usize {
        self.sampler_cache
            .garbage_collect(frame_id, max_unused_frames, |_, sampler| self.device.destroy_sampler(sampler))
    }

    pub fn resource_stats(&self) -> RgResourceStats {
        RgResourceStats {
            images: self.images.live_count(),
            buffers: self.buffers.live_count(),
            rt_geometries: self.rt_geometries.live_count(),
            rt_scenes: self.rt_scenes.live_count(),
            samplers: self.samplers.live_count(),
            pipelines: self.pipelines.live_count(),
            swapchains: self.swapchains.live_count(),
            pending_destroy: self.pending_destroy.lock().len(),
            cached_samplers: self.sampler_cache.len(),
        }
    }

    /// 立即销毁全部资源，调用前需要保证 GPU 已经空闲
    pub fn destroy_all(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _span = tessel_crate_tools::profile_span!("RgResourceManager::destroy_all");

        // swapchain 持有 image 的引用，先处理
        for (_, swapchain, refs) in self.swapchains.drain() {
            if refs > 0 {
                log::warn!("swapchain \"{}\" still has {} strong references at shutdown", swapchain.name, refs);
            }
        }
        for (_, entry, refs) in self.images.drain() {
            if refs > 0 && entry.owned {
                log::warn!("image \"{}\" leaked with {} strong references", entry.name, refs);
            }
            if entry.owned {
                self.device.destroy_image(entry.allocation);
            }
        }
        for (_, entry, refs) in self.buffers.drain() {
            if refs > 0 {
                log::warn!("buffer \"{}\" leaked with {} strong references", entry.name, refs);
            }
            if entry.owned {
                self.device.destroy_buffer(entry.allocation);
            }
        }
        let accels = self.rt_geometries.drain().into_iter().map(|(_, entry, refs)| (entry, refs));
        let accels = accels.chain(self.rt_scenes.drain().into_iter().map(|(_, entry, refs)| (entry, refs)));
        for (entry, refs) in accels {
            if refs > 0 {
                log::warn!("acceleration structure \"{}\" leaked with {} strong references", entry.name, refs);
            }
            self.device.destroy_acceleration_structure(entry.allocation);
        }
        self.samplers.drain();
        self.pipelines.drain();
        self.sampler_cache.drain(|_, sampler| self.device.destroy_sampler(sampler));
        self.pending_destroy.lock().clear();
        log::info!("resource manager destroyed");
    }
}

impl Drop for RgResourceManager {
    fn drop(&mut self) {
        self.destroy_all();
    }
}

macro_rules! impl_resource_key {
    ($key:ty, $kind:literal, $pool:ident, $pending:ident) => {
        impl RgResourceKey for $key {
            const KIND: &'static str = $kind;

            fn add_ref(manager: &RgResourceManager, id: Self) -> bool {
                manager.$pool.add_ref(id)
            }

            fn release(manager: &RgResourceManager, id: Self) {
                if manager.destroyed.load(Ordering::Acquire) {
                    return;
                }
                if manager.$pool.release(id) {
                    manager.defer_destroy(RgPendingDestroy::$pending(id));
                }
            }
        }
    };
}

impl_resource_key!(RgImageId, "image", images, Image);
impl_resource_key!(RgBufferId, "buffer", buffers, Buffer);
impl_resource_key!(RgRtGeometryId, "rt-geometry", rt_geometries, RtGeometry);
impl_resource_key!(RgRtSceneId, "rt-scene", rt_scenes, RtScene);
impl_resource_key!(RgSamplerId, "sampler", samplers, Sampler);
impl_resource_key!(RgPipelineId, "pipeline", pipelines, Pipeline);
impl_resource_key!(RgSwapchainId, "swapchain", swapchains, Swapchain);

#[cfg(test)]
mod tests {
    use ash::vk::Handle;
    use tessel_gfx::headless::HeadlessDevice;

    use super::*;

    fn manager() -> (Arc<HeadlessDevice>, Arc<RgResourceManager>) {
        let device = Arc::new(HeadlessDevice::new());
        let manager = RgResourceManager::new(device.clone(), 2);
        (device, manager)
    }

    fn color_desc() -> GfxImageDesc {
        GfxImageDesc::new_2d(64, 64, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::COLOR_ATTACHMENT)
    }

    #[test]
    fn test_destruction_is_deferred_by_frames_in_flight() {
        let (device, manager) = manager();
        let image = manager.create_image("color", &color_desc(), RgImageState::SHADER_READ_FRAGMENT).unwrap();
        let id = image.id();
        assert_eq!(device.live_image_count(), 1);

        manager.cleanup(5);
        drop(image);
        // 句柄立即失效，原生对象还活着
        assert!(!manager.contains(id.into()));
        assert_eq!(device.live_image_count(), 1);

        assert_eq!(manager.cleanup(6), 0);
        assert_eq!(device.live_image_count(), 1);
        assert_eq!(manager.cleanup(7), 1);
        assert_eq!(device.live_image_count(), 0);
    }

    #[test]
    fn test_clone_keeps_resource_alive() {
        let (device, manager) = manager();
        let buffer = manager
            .create_buffer("b", &GfxBufferDesc::new(256, vk::BufferUsageFlags::STORAGE_BUFFER), RgBufferState::GENERAL_READ)
            .unwrap();
        let copy = buffer.clone();
        drop(buffer);
        manager.cleanup(10);
        assert!(manager.contains(copy.id().into()));
        assert_eq!(device.live_buffer_count(), 1);

        let id = copy.release();
        // release 之后没有强引用
        assert!(!manager.contains(id.into()));
        assert!(RgStrong::upgrade(&manager, id).is_none());
    }

    #[test]
    fn test_imported_image_is_not_destroyed() {
        let (device, manager) = manager();
        let allocation = device.create_image(&color_desc(), "external").unwrap();
        let image = manager.import_image(
            "external",
            allocation,
            &color_desc(),
            RgImageState::SHADER_READ_FRAGMENT,
            RgImageState::SHADER_READ_FRAGMENT,
        );
        let snapshot = manager.snapshot(image.id().into()).unwrap();
        assert_eq!(snapshot.current.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        drop(image);
        manager.cleanup(100);
        assert_eq!(device.live_image_count(), 1);
    }

    #[test]
    fn test_samplers_share_native_object() {
        let (device, manager) = manager();
        let a = manager.create_sampler(&GfxSamplerDesc::nearest_clamp()).unwrap();
        let b = manager.create_sampler(&GfxSamplerDesc::nearest_clamp()).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(manager.sampler(a.id()), manager.sampler(b.id()));
        assert_eq!(device.live_sampler_count(), 1);

        drop(a);
        drop(b);
        manager.cleanup(2);
        assert_eq!(manager.garbage_collect_samplers(20, 4), 1);
        assert_eq!(device.live_sampler_count(), 0);
    }

    #[test]
    fn test_commit_state_is_visible_to_next_snapshot() {
        let (_device, manager) = manager();
        let image = manager.create_image("c", &color_desc(), RgImageState::SHADER_READ_FRAGMENT).unwrap();
        manager.commit_state(image.id().into(), RgImageState::SHADER_READ_FRAGMENT.into());
        let snapshot = manager.snapshot(image.id().into()).unwrap();
        assert_eq!(snapshot.current, RgImageState::SHADER_READ_FRAGMENT.into());
        assert_eq!(snapshot.default, snapshot.current);
    }

    #[test]
    fn test_swapchain_images_released_with_swapchain() {
        let (_device, manager) = manager();
        let images = [
            (vk::Image::from_raw(0x100), vk::ImageView::from_raw(0x101)),
            (vk::Image::from_raw(0x200), vk::ImageView::from_raw(0x201)),
        ];
        let swapchain = manager.import_swapchain(
            "main",
            vk::SwapchainKHR::from_raw(0x1),
            &images,
            vk::Format::B8G8R8A8_SRGB,
            vk::Extent2D { width: 8, height: 8 },
        );
        let image = manager.swapchain_image(swapchain.id(), 1).unwrap();
        assert!(manager.contains(image.into()));
        assert!(manager.swapchain_image(swapchain.id(), 2).is_none());

        drop(swapchain);
        manager.cleanup(2);
        assert!(!manager.contains(image.into()));
        assert_eq!(manager.resource_stats().images, 0);
    }
}
