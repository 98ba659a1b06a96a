//! Barrier 的累积与批量发出
//!
//! task 处理过程中产生的 barrier 先放在 [`RgBarrierManager`] 中，
//! 在 task 的命令之前用一次 `vkCmdPipelineBarrier2` 全部发出。

use std::sync::Arc;

use ash::vk;
use tessel_gfx::commands::barrier::{
    GfxBarrierMask, GfxBufferBarrier, GfxDependencyInfo, GfxImageBarrier, GfxMemoryBarrier,
};
use tessel_gfx::commands::encoder::GfxCommandEncoder;

use crate::handle::RgRawResource;

/// barrier 的来源：哪个资源，在哪两个 task 之间
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgBarrierOrigin {
    /// 全局 barrier 没有对应的资源
    pub resource: Option<RgRawResource>,
    /// `None` 表示上一次访问发生在之前的 recording
    pub src_order: Option<u32>,
    /// `None` 表示 recording 结束时回到默认状态
    pub dst_order: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RgBarrierKind {
    Buffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    },
    Image {
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    },
    Global,
}

/// 一条被加入的 barrier，用于调试和导出
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgBarrierEvent {
    pub origin: RgBarrierOrigin,
    pub mask: GfxBarrierMask,
    pub kind: RgBarrierKind,
}

/// 观察每一条 barrier，不影响调度
pub trait RgBarrierObserver: Send + Sync {
    fn on_barrier(&self, event: &RgBarrierEvent);
}

/// 一次 flush 发出的 barrier 数量
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RgFlushStats {
    pub buffer_barriers: usize,
    pub image_barriers: usize,
    pub global_barriers: usize,
}

impl RgFlushStats {
    #[inline]
    pub fn total(&self) -> usize {
        self.buffer_barriers + self.image_barriers + self.global_barriers
    }
}

pub struct RgBarrierManager {
    pending: GfxDependencyInfo,
    capacity: usize,
    observer: Option<Arc<dyn RgBarrierObserver>>,
    /// 为导出记录下来的全部 barrier
    events: Option<Vec<RgBarrierEvent>>,
}

// new & init
impl RgBarrierManager {
    /// `capacity` 是一次 flush 最多携带的 barrier 数量
    pub fn new(capacity: usize, record_events: bool) -> Self {
        Self {
            pending: GfxDependencyInfo::default(),
            capacity,
            observer: None,
            events: record_events.then(Vec::new),
        }
    }

    pub fn set_observer(&mut self, observer: Option<Arc<dyn RgBarrierObserver>>) {
        self.observer = observer;
    }
}

// 累积
impl RgBarrierManager {
    /// 已满时返回 false，调用者需要先 flush
    pub fn add_buffer_barrier(
        &mut self,
        origin: RgBarrierOrigin,
        buffer: vk::Buffer,
        mask: GfxBarrierMask,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> bool {
        if self.is_full() {
            return false;
        }
        self.pending.buffer_barriers.push(GfxBufferBarrier::new().buffer(buffer, offset, size).mask(mask));
        self.notify(origin, mask, RgBarrierKind::Buffer { buffer, offset, size });
        true
    }

    /// 已满时返回 false，调用者需要先 flush
    pub fn add_image_barrier(
        &mut self,
        origin: RgBarrierOrigin,
        image: vk::Image,
        mask: GfxBarrierMask,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        range: vk::ImageSubresourceRange,
    ) -> bool {
        if self.is_full() {
            return false;
        }
        self.pending.image_barriers.push(
            GfxImageBarrier::new()
                .image(image)
                .src_mask(mask.src_stage, mask.src_access)
                .dst_mask(mask.dst_stage, mask.dst_access)
                .layout_transfer(old_layout, new_layout)
                .subresource_range(range),
        );
        self.notify(
            origin,
            mask,
            RgBarrierKind::Image {
                image,
                old_layout,
                new_layout,
            },
        );
        true
    }

    pub fn add_global_memory_barrier(&mut self, origin: RgBarrierOrigin, mask: GfxBarrierMask) -> bool {
        if self.is_full() {
            return false;
        }
        self.pending.memory_barriers.push(GfxMemoryBarrier::new(mask));
        self.notify(origin, mask, RgBarrierKind::Global);
        true
    }

    fn notify(&mut self, origin: RgBarrierOrigin, mask: GfxBarrierMask, kind: RgBarrierKind) {
        let event = RgBarrierEvent { origin, mask, kind };
        log::trace!(
            "barrier {:?}: {:?} -> {:?}, {:?} -> {:?}",
            origin.resource,
            mask.src_stage,
            mask.dst_stage,
            mask.src_access,
            mask.dst_access
        );
        if let Some(observer) = &self.observer {
            observer.on_barrier(&event);
        }
        if let Some(events) = &mut self.events {
            events.push(event);
        }
    }
}

// flush
impl RgBarrierManager {
    #[inline]
    pub fn is_full(&self) -> bool {
        self.pending.barrier_count() >= self.capacity
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.barrier_count()
    }

    /// 用一次 pipeline barrier 调用发出全部累积的 barrier
    ///
    /// 没有累积的 barrier 时不发出任何命令，返回 `None`
    pub fn flush(&mut self, encoder: &mut dyn GfxCommandEncoder) -> Option<RgFlushStats> {
        if self.pending.is_empty() {
            return None;
        }
        let dependency = std::mem::take(&mut self.pending);
        encoder.pipeline_barrier(&dependency);
        Some(RgFlushStats {
            buffer_barriers: dependency.buffer_barriers.len(),
            image_barriers: dependency.image_barriers.len(),
            global_barriers: dependency.memory_barriers.len(),
        })
    }

    /// 记录下来的全部 barrier
    pub fn events(&self) -> &[RgBarrierEvent] {
        self.events.as_deref().unwrap_or_default()
    }

    pub fn take_events(&mut self) -> Vec<RgBarrierEvent> {
        self.events.as_mut().map(std::mem::take).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;
    use parking_lot::Mutex;
    use tessel_gfx::device::{GfxDevice, GfxQueueType};
    use tessel_gfx::headless::{GfxCommand, HeadlessDevice};

    use super::*;

    fn origin(dst: u32) -> RgBarrierOrigin {
        RgBarrierOrigin {
            resource: None,
            src_order: None,
            dst_order: Some(dst),
        }
    }

    fn mask() -> GfxBarrierMask {
        GfxBarrierMask {
            src_stage: vk::PipelineStageFlags2::TRANSFER,
            dst_stage: vk::PipelineStageFlags2::COMPUTE_SHADER,
            src_access: vk::AccessFlags2::TRANSFER_WRITE,
            dst_access: vk::AccessFlags2::SHADER_STORAGE_READ,
        }
    }

    #[test]
    fn test_flush_batches_into_one_call() {
        let device = HeadlessDevice::new();
        let mut encoder = device.begin_commands(GfxQueueType::Graphics, "t").unwrap();
        let mut barriers = RgBarrierManager::new(64, true);

        for i in 0..5u64 {
            assert!(barriers.add_buffer_barrier(origin(0), vk::Buffer::from_raw(100 + i), mask(), 0, vk::WHOLE_SIZE));
        }
        assert!(barriers.add_image_barrier(
            origin(0),
            vk::Image::from_raw(7),
            mask(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
            tessel_gfx::format::full_subresource_range(vk::Format::R8G8B8A8_UNORM),
        ));
        let stats = barriers.flush(encoder.as_mut()).unwrap();
        assert_eq!(stats.total(), 6);
        // 第二次 flush 没有任何 barrier，不产生调用
        assert!(barriers.flush(encoder.as_mut()).is_none());

        let cmd = encoder.finish().unwrap();
        let log = device.command_log(cmd).unwrap();
        let calls: Vec<_> = log.iter().filter_map(GfxCommand::as_pipeline_barrier).collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].barrier_count(), 6);
        assert_eq!(barriers.events().len(), 6);
    }

    #[test]
    fn test_capacity_limit() {
        let mut barriers = RgBarrierManager::new(2, false);
        assert!(barriers.add_global_memory_barrier(origin(0), mask()));
        assert!(barriers.add_global_memory_barrier(origin(0), mask()));
        assert!(!barriers.add_global_memory_barrier(origin(0), mask()));
        assert_eq!(barriers.pending_count(), 2);
        assert!(barriers.events().is_empty());
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<RgBarrierEvent>>);

    impl RgBarrierObserver for Collect {
        fn on_barrier(&self, event: &RgBarrierEvent) {
            self.0.lock().push(*event);
        }
    }

    #[test]
    fn test_observer_sees_every_barrier() {
        let observer = Arc::new(Collect::default());
        let mut barriers = RgBarrierManager::new(8, false);
        barriers.set_observer(Some(observer.clone() as Arc<dyn RgBarrierObserver>));
        barriers.add_global_memory_barrier(origin(3), mask());
        assert_eq!(observer.0.lock().len(), 1);
        assert_eq!(observer.0.lock()[0].origin.dst_order, Some(3));
    }
}
