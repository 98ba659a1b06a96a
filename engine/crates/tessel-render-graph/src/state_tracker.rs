//! 单个资源的状态跟踪
//!
//! 记录最后一次写入，以及这次写入之后发生的所有读取。新的访问与这些记录比较，
//! 得到需要的同步（如果有的话），然后更新记录。

use ash::vk;

use crate::resource_state::RgUsage;

/// 最后一次写入
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct RgWriteMark {
    stage: vk::PipelineStageFlags2,
    access: vk::AccessFlags2,
    /// 执行序号，`None` 表示写入发生在本次 recording 之前
    order: Option<u32>,
}

/// 对外可见的当前状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgStateSnapshot {
    /// 最后一次写入以及之后所有读取的 access 并集
    pub access: vk::AccessFlags2,
    pub stage: vk::PipelineStageFlags2,
    pub layout: vk::ImageLayout,
    /// 仅供参考，资源在各个队列族之间以 CONCURRENT 方式共享
    pub queue_family: u32,
}

/// 一次访问需要的同步
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgStateTransition {
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_access: vk::AccessFlags2,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    /// 产生冲突的上一个 task 的执行序号，`None` 表示来自之前的 recording
    pub src_order: Option<u32>,
    pub dst_order: u32,
}

impl RgStateTransition {
    #[inline]
    pub fn is_layout_transition(&self) -> bool {
        self.old_layout != self.new_layout
    }
}

#[derive(Clone, Debug)]
pub struct RgResourceTracker {
    is_image: bool,
    immutable: bool,
    layout: vk::ImageLayout,
    last_write: Option<RgWriteMark>,
    read_stages: vk::PipelineStageFlags2,
    read_access: vk::AccessFlags2,
    last_read_order: Option<u32>,
}

// new & init
impl RgResourceTracker {
    /// 以资源在 recording 开始时的状态初始化
    ///
    /// `UNDEFINED` layout 的 image 内容视为无效，第一次使用会做完整的 layout 转换。
    pub fn new(is_image: bool, initial: RgUsage) -> Self {
        let mut tracker = Self {
            is_image,
            immutable: false,
            layout: if is_image { initial.layout } else { vk::ImageLayout::UNDEFINED },
            last_write: None,
            read_stages: vk::PipelineStageFlags2::NONE,
            read_access: vk::AccessFlags2::NONE,
            last_read_order: None,
        };
        if initial.is_write() {
            tracker.last_write = Some(RgWriteMark {
                stage: initial.stage,
                access: initial.write_access(),
                order: None,
            });
        } else if !(is_image && initial.layout == vk::ImageLayout::UNDEFINED) {
            tracker.read_stages = initial.stage;
            tracker.read_access = initial.access;
        }
        tracker
    }

    /// 标记为本次 recording 中不可变：不会再产生任何 barrier
    #[inline]
    pub fn set_immutable(&mut self, immutable: bool) {
        self.immutable = immutable;
    }
}

// getters
impl RgResourceTracker {
    #[inline]
    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    #[inline]
    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }

    pub fn state(&self) -> RgStateSnapshot {
        let (write_stage, write_access) = self.last_write.map(|w| (w.stage, w.access)).unwrap_or_default();
        RgStateSnapshot {
            access: write_access | self.read_access,
            stage: write_stage | self.read_stages,
            layout: self.layout,
            queue_family: vk::QUEUE_FAMILY_IGNORED,
        }
    }
}

// tracking
impl RgResourceTracker {
    /// 请求以 `usage` 访问资源
    ///
    /// 需要同步时返回转换描述。无论是否需要同步，这次访问都会被记录，后续的写入会等待它。
    pub fn request_usage(&mut self, usage: RgUsage, order: u32) -> Option<RgStateTransition> {
        if self.immutable {
            self.record_read(usage, order);
            return None;
        }

        let layout_change = self.is_image && usage.layout != self.layout;
        let transition = if layout_change || usage.is_write() {
            self.sync_with_all(usage, order)
        } else {
            self.sync_with_write(usage, order)
        };

        if layout_change {
            // layout 转换本身就是一次写入，之后的读取需要等待它
            self.layout = usage.layout;
            self.last_write = Some(RgWriteMark {
                stage: usage.stage,
                access: usage.write_access(),
                order: Some(order),
            });
            self.read_stages = vk::PipelineStageFlags2::NONE;
            self.read_access = vk::AccessFlags2::NONE;
            self.last_read_order = None;
            if !usage.read_access().is_empty() {
                self.record_read(usage, order);
            }
        } else if usage.is_write() {
            self.last_write = Some(RgWriteMark {
                stage: usage.stage,
                access: usage.write_access(),
                order: Some(order),
            });
            self.read_stages = vk::PipelineStageFlags2::NONE;
            self.read_access = vk::AccessFlags2::NONE;
            self.last_read_order = None;
        } else {
            self.record_read(usage, order);
        }

        transition
    }

    fn record_read(&mut self, usage: RgUsage, order: u32) {
        self.read_stages |= usage.stage;
        self.read_access |= usage.read_access();
        self.last_read_order = Some(order);
    }

    /// 写入或 layout 转换：等待之前的写入和读取
    fn sync_with_all(&self, usage: RgUsage, order: u32) -> Option<RgStateTransition> {
        let layout_change = self.is_image && usage.layout != self.layout;
        let has_pending = self.last_write.is_some() || !self.read_stages.is_empty();
        if !layout_change && !has_pending {
            return None;
        }
        let (write_stage, write_access, write_order) =
            self.last_write.map(|w| (w.stage, w.access, w.order)).unwrap_or((
                vk::PipelineStageFlags2::NONE,
                vk::AccessFlags2::NONE,
                None,
            ));
        Some(RgStateTransition {
            src_stage: write_stage | self.read_stages,
            dst_stage: usage.stage,
            // WAR 只需要执行依赖
            src_access: write_access,
            dst_access: usage.access,
            old_layout: self.layout,
            new_layout: if self.is_image { usage.layout } else { self.layout },
            src_order: write_order.max(self.last_read_order),
            dst_order: order,
        })
    }

    /// 读取：只有在最后一次写入还没有对这个 stage 可见时才需要同步
    fn sync_with_write(&self, usage: RgUsage, order: u32) -> Option<RgStateTransition> {
        let write = self.last_write?;
        let covered = self.read_stages.contains(usage.stage) && self.read_access.contains(usage.read_access());
        if covered {
            return None;
        }
        Some(RgStateTransition {
            src_stage: write.stage,
            dst_stage: usage.stage,
            src_access: write.access,
            dst_access: usage.access,
            old_layout: self.layout,
            new_layout: self.layout,
            src_order: write.order,
            dst_order: order,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource_state::{RgBufferState, RgImageState};

    #[test]
    fn test_read_after_read_is_free() {
        let mut tracker = RgResourceTracker::new(false, RgBufferState::GENERAL_READ.into());
        assert!(tracker.request_usage(RgBufferState::TRANSFER_SRC.into(), 0).is_none());
        assert!(tracker.request_usage(RgBufferState::TRANSFER_SRC.into(), 1).is_none());
        assert!(tracker.request_usage(RgBufferState::UNIFORM_COMPUTE.into(), 2).is_none());
    }

    #[test]
    fn test_write_after_read_waits_for_all_readers() {
        let mut tracker = RgResourceTracker::new(false, RgBufferState::UNDEFINED.into());
        assert!(tracker.request_usage(RgBufferState::TRANSFER_SRC.into(), 0).is_none());
        assert!(tracker.request_usage(RgBufferState::UNIFORM_COMPUTE.into(), 1).is_none());

        let t = tracker.request_usage(RgBufferState::TRANSFER_DST.into(), 2).unwrap();
        assert_eq!(t.src_stage, vk::PipelineStageFlags2::TRANSFER | vk::PipelineStageFlags2::COMPUTE_SHADER);
        assert_eq!(t.src_access, vk::AccessFlags2::NONE);
        assert_eq!(t.dst_access, vk::AccessFlags2::TRANSFER_WRITE);
        assert_eq!(t.src_order, Some(1));
    }

    #[test]
    fn test_read_after_write_once_per_stage() {
        let mut tracker = RgResourceTracker::new(false, RgBufferState::UNDEFINED.into());
        assert!(tracker.request_usage(RgBufferState::TRANSFER_DST.into(), 0).is_none());

        let t = tracker.request_usage(RgBufferState::UNIFORM_COMPUTE.into(), 1).unwrap();
        assert_eq!(t.src_access, vk::AccessFlags2::TRANSFER_WRITE);
        assert_eq!(t.src_order, Some(0));
        // 同样的读取已经可见
        assert!(tracker.request_usage(RgBufferState::UNIFORM_COMPUTE.into(), 2).is_none());
        // 新的 stage 需要新的同步
        assert!(tracker.request_usage(RgBufferState::UNIFORM_FRAGMENT.into(), 3).is_some());
    }

    #[test]
    fn test_undefined_image_needs_full_transition() {
        let mut tracker = RgResourceTracker::new(true, RgImageState::UNDEFINED.into());
        let t = tracker.request_usage(RgImageState::SHADER_READ_FRAGMENT.into(), 0).unwrap();
        assert_eq!(t.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(t.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(tracker.layout(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        assert!(tracker.request_usage(RgImageState::SHADER_READ_FRAGMENT.into(), 1).is_none());
        // 另一个 stage 需要等待 layout 转换
        let t = tracker.request_usage(RgImageState::SHADER_READ_COMPUTE.into(), 2).unwrap();
        assert!(!t.is_layout_transition());
    }

    #[test]
    fn test_immutable_never_synchronizes() {
        let mut tracker = RgResourceTracker::new(true, RgImageState::SHADER_READ_ANY.into());
        tracker.set_immutable(true);
        assert!(tracker.request_usage(RgImageState::TRANSFER_SRC.into(), 0).is_none());
        assert_eq!(tracker.layout(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert!(tracker.state().access.contains(vk::AccessFlags2::TRANSFER_READ));
    }

    #[test]
    fn test_imported_write_state_is_pending() {
        let mut tracker = RgResourceTracker::new(false, RgBufferState::TRANSFER_DST.into());
        let t = tracker.request_usage(RgBufferState::TRANSFER_SRC.into(), 0).unwrap();
        assert_eq!(t.src_order, None);
        assert_eq!(t.src_access, vk::AccessFlags2::TRANSFER_WRITE);
    }
}
