//! 一次 command buffer 的录制
//!
//! 状态机：`Idle -> Recording -> Compiling -> Pending | Failed`。
//! `RgFrameGraph::begin` 返回处于 `Recording` 的 [`RgCommandBuffer`]，之后添加 task 和逻辑 pass，
//! `RgFrameGraph::execute` 完成排序、barrier 插入和命令录制。

use std::sync::Arc;

use ash::vk;
use tessel_gfx::device::GfxQueueType;

use crate::barrier::RgBarrierObserver;
use crate::compiled::RgCompiledGraph;
use crate::error::{RgError, RgResult};
use crate::handle::RgRawResource;
use crate::local_registry::RgLocalRegistry;
use crate::processor::RgTaskProcessor;
use crate::render_pass::cache::RgRenderPassCache;
use crate::render_pass::{RgDrawTask, RgLogicalPass, RgLogicalPassId, RgRenderPassDesc};
use crate::resource::manager::RgResourceManager;
use crate::resource_state::RgUsage;
use crate::settings::RgSettings;
use crate::submission::RgBatchSlot;
use crate::task::RgTaskDesc;
use crate::task::graph::{RgTaskGraph, RgTaskId};
use crate::task::kinds::{RgPresentRequest, RgTask, RgTaskKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RgRecordingState {
    Idle,
    Recording,
    Compiling,
    Pending,
    Failed,
}

/// 在一帧内唯一标识一个 command buffer，用于 `wait`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RgCommandBufferId(pub(crate) u64);

#[derive(Clone, Debug)]
pub struct RgCommandBufferDesc {
    pub name: String,
    pub queue: GfxQueueType,
    /// 通过 `acquire` 得到的 batch 位置；为 `None` 时创建一个只含这个 command buffer 的 batch
    pub slot: Option<RgBatchSlot>,
}

impl RgCommandBufferDesc {
    pub fn new(name: impl Into<String>, queue: GfxQueueType) -> Self {
        Self {
            name: name.into(),
            queue,
            slot: None,
        }
    }

    #[inline]
    pub fn slot(mut self, slot: RgBatchSlot) -> Self {
        self.slot = Some(slot);
        self
    }
}

/// 录制完成的结果，交给 submission graph
pub(crate) struct RgRecordedCommands {
    pub(crate) id: RgCommandBufferId,
    pub(crate) slot: RgBatchSlot,
    pub(crate) command_buffer: vk::CommandBuffer,
    pub(crate) presents: Vec<RgPresentRequest>,
    pub(crate) compiled: RgCompiledGraph,
}

pub struct RgCommandBuffer {
    id: RgCommandBufferId,
    desc: RgCommandBufferDesc,
    slot: RgBatchSlot,
    state: RgRecordingState,

    manager: Arc<RgResourceManager>,
    settings: Arc<RgSettings>,

    graph: RgTaskGraph<RgTask>,
    passes: Vec<RgLogicalPass>,
    registry: RgLocalRegistry,
}

// new & init
impl RgCommandBuffer {
    pub(crate) fn new(
        id: RgCommandBufferId,
        desc: RgCommandBufferDesc,
        slot: RgBatchSlot,
        manager: Arc<RgResourceManager>,
        settings: Arc<RgSettings>,
    ) -> Self {
        let graph = RgTaskGraph::new(settings.max_tasks_per_recording).with_contract_asserts(settings.assert_contracts);
        Self {
            id,
            desc,
            slot,
            state: RgRecordingState::Idle,
            manager,
            settings,
            graph,
            passes: Vec::new(),
            registry: RgLocalRegistry::new(),
        }
    }

    pub(crate) fn begin(&mut self) -> RgResult<()> {
        self.transition(RgRecordingState::Idle, RgRecordingState::Recording)
    }
}

// getters
impl RgCommandBuffer {
    #[inline]
    pub fn id(&self) -> RgCommandBufferId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.desc.name
    }

    #[inline]
    pub fn queue(&self) -> GfxQueueType {
        self.desc.queue
    }

    #[inline]
    pub fn slot(&self) -> RgBatchSlot {
        self.slot
    }

    #[inline]
    pub fn state(&self) -> RgRecordingState {
        self.state
    }

    #[inline]
    pub fn task_count(&self) -> usize {
        self.graph.len()
    }
}

// 构建
impl RgCommandBuffer {
    /// 添加一个 task，资源句柄和写入权限在这里检查
    pub fn add_task(&mut self, desc: RgTaskDesc) -> RgResult<RgTaskId> {
        self.expect_state(RgRecordingState::Recording)?;
        let RgTaskDesc {
            name,
            color,
            depends_on,
            kind,
        } = desc;
        if matches!(kind, RgTaskKind::RenderPass(_)) {
            return Err(RgError::IncompatibleDrawTask {
                task: name,
                pass: String::new(),
                reason: "render passes are created with create_render_pass".to_string(),
            });
        }

        let task = RgTask::prepare(kind, &self.manager, &name)?;
        self.check_accesses(&name, task.accesses())?;
        self.graph.add(name, color, task, &depends_on)
    }

    /// 添加一条显式依赖，`task` 在 `depends_on` 之后执行
    pub fn add_dependency(&mut self, task: RgTaskId, depends_on: RgTaskId) -> RgResult<()> {
        self.expect_state(RgRecordingState::Recording)?;
        self.graph.add_dependency(task, depends_on)
    }

    /// 创建一个逻辑 render pass，之后通过 [`Self::add_draw_task`] 填充
    pub fn create_render_pass(&mut self, desc: RgRenderPassDesc) -> RgResult<RgLogicalPassId> {
        self.expect_state(RgRecordingState::Recording)?;
        let pass = RgLogicalPass::new(desc, &self.manager)?;
        self.check_accesses(pass.name(), &pass.attachment_accesses())?;

        let index = self.passes.len() as u32;
        let task = RgTask::prepare(RgTaskKind::RenderPass(index), &self.manager, pass.name())?;
        let task = self.graph.add(pass.name().to_string(), pass.desc.color, task, &pass.desc.depends_on)?;
        self.passes.push(pass);
        Ok(RgLogicalPassId { task, index })
    }

    /// 向逻辑 pass 添加一个 draw task
    pub fn add_draw_task(&mut self, pass: RgLogicalPassId, task: RgDrawTask) -> RgResult<()> {
        self.expect_state(RgRecordingState::Recording)?;
        let index = self.logical_pass_index(pass)?;
        self.passes[index].add_draw(task, &self.manager)?;

        let Some(entry) = self.passes[index].draws.last() else {
            return Ok(());
        };
        if let Err(err) = self.check_accesses(&entry.task.name, &entry.accesses) {
            self.passes[index].draws.pop();
            return Err(err);
        }
        Ok(())
    }

    /// 这个 recording 内资源只读，不会产生 layout 转换，后续的写入 task 会被拒绝
    pub fn mark_immutable(&mut self, resource: impl Into<RgRawResource>) -> RgResult<()> {
        self.expect_state(RgRecordingState::Recording)?;
        let raw = resource.into();

        let already_written = self
            .graph
            .iter()
            .find(|(_, node)| node.payload.accesses().iter().any(|(r, usage)| *r == raw && usage.is_write()))
            .map(|(_, node)| node.name.clone())
            .or_else(|| {
                self.passes
                    .iter()
                    .find(|pass| pass.accesses().iter().any(|(r, usage)| *r == raw && usage.is_write()))
                    .map(|pass| pass.name().to_string())
            });
        if let Some(task) = already_written {
            return Err(self.immutable_violation(task, raw));
        }

        self.registry.mark_immutable(&self.manager, raw)
    }

    fn logical_pass_index(&self, pass: RgLogicalPassId) -> RgResult<usize> {
        match self.graph.get(pass.task).map(|node| &node.payload.kind) {
            Some(RgTaskKind::RenderPass(index)) if *index == pass.index => Ok(pass.index as usize),
            _ => {
                debug_assert!(!self.settings.assert_contracts, "unknown logical pass {:?}", pass);
                Err(RgError::UnknownTask(format!("{:?}", pass)))
            }
        }
    }

    fn check_accesses(&self, task: &str, accesses: &[(RgRawResource, RgUsage)]) -> RgResult<()> {
        for &(raw, usage) in accesses {
            if !self.manager.contains(raw) {
                debug_assert!(!self.settings.assert_contracts, "task {} references dead resource {:?}", task, raw);
                return Err(RgError::invalid_handle(raw.kind(), raw));
            }
            if usage.is_write() && self.registry.is_immutable(raw) {
                return Err(self.immutable_violation(task.to_string(), raw));
            }
        }
        Ok(())
    }

    fn immutable_violation(&self, task: String, raw: RgRawResource) -> RgError {
        debug_assert!(!self.settings.assert_contracts, "task {} writes immutable {:?}", task, raw);
        RgError::WriteToImmutable {
            task,
            resource: self.manager.name(raw).unwrap_or_default(),
        }
    }
}

// 状态
impl RgCommandBuffer {
    fn expect_state(&self, expected: RgRecordingState) -> RgResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(RgError::InvalidState {
                name: self.desc.name.clone(),
                expected,
                found: self.state,
            })
        }
    }

    fn transition(&mut self, from: RgRecordingState, to: RgRecordingState) -> RgResult<()> {
        self.expect_state(from)?;
        self.state = to;
        Ok(())
    }
}

// 执行
impl RgCommandBuffer {
    /// 排序、插入 barrier 并录制原生命令
    ///
    /// 失败时 recording 进入 `Failed`，录制了一半的 command buffer 会被释放。
    pub(crate) fn execute(
        &mut self,
        cache: &RgRenderPassCache,
        observer: Option<Arc<dyn RgBarrierObserver>>,
    ) -> RgResult<RgRecordedCommands> {
        let _span = tessel_crate_tools::profile_span!("RgCommandBuffer::execute");
        self.transition(RgRecordingState::Recording, RgRecordingState::Compiling)?;

        match self.compile(cache, observer) {
            Ok(recorded) => {
                self.state = RgRecordingState::Pending;
                Ok(recorded)
            }
            Err(err) => {
                log::error!("recording \"{}\" failed: {}", self.desc.name, err);
                self.state = RgRecordingState::Failed;
                Err(err)
            }
        }
    }

    fn compile(
        &mut self,
        cache: &RgRenderPassCache,
        observer: Option<Arc<dyn RgBarrierObserver>>,
    ) -> RgResult<RgRecordedCommands> {
        let device = self.manager.device().clone();
        let mut encoder = device.begin_commands(self.desc.queue, &self.desc.name)?;

        let processor = RgTaskProcessor::new(&self.manager, cache, &self.settings, self.manager.frame_id(), observer);
        let compiled =
            match processor.run(&self.desc.name, &mut self.graph, &self.passes, &mut self.registry, encoder.as_mut()) {
                Ok(compiled) => compiled,
                Err(err) => {
                    if let Ok(command_buffer) = encoder.finish() {
                        device.free_commands(&[command_buffer]);
                    }
                    return Err(err);
                }
            };
        let command_buffer = encoder.finish()?;

        let mut presents: Vec<(u32, RgPresentRequest)> = self
            .graph
            .iter()
            .filter_map(|(_, node)| Some((node.order()?, node.payload.present()?)))
            .collect();
        presents.sort_by_key(|(order, _)| *order);

        Ok(RgRecordedCommands {
            id: self.id,
            slot: self.slot,
            command_buffer,
            presents: presents.into_iter().map(|(_, present)| present).collect(),
            compiled,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tessel_gfx::headless::HeadlessDevice;
    use tessel_gfx::resources::buffer::GfxBufferDesc;

    use super::*;
    use crate::resource_state::RgBufferState;
    use crate::task::kinds::{RgCopyBuffer, RgFillBuffer};

    fn fixture() -> (Arc<RgResourceManager>, RgCommandBuffer) {
        let settings = Arc::new(RgSettings::default());
        let manager = RgResourceManager::new(Arc::new(HeadlessDevice::new()), settings.frames_in_flight);
        let mut cmd = RgCommandBuffer::new(
            RgCommandBufferId(1),
            RgCommandBufferDesc::new("test", GfxQueueType::Graphics),
            RgBatchSlot::default(),
            manager.clone(),
            settings,
        );
        cmd.begin().unwrap();
        (manager, cmd)
    }

    #[test]
    fn test_write_to_immutable_is_rejected() {
        let (manager, mut cmd) = fixture();
        let desc = GfxBufferDesc::new(256, vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC);
        let src = manager.create_buffer("src", &desc, RgBufferState::GENERAL_READ).unwrap();
        let dst = manager.create_buffer("dst", &desc, RgBufferState::GENERAL_READ).unwrap();

        cmd.mark_immutable(src.id()).unwrap();
        let copy = RgCopyBuffer {
            src: src.id(),
            dst: dst.id(),
            regions: vec![vk::BufferCopy::default().size(256)],
        };
        assert!(cmd.add_task(RgTaskDesc::new("copy", copy)).is_ok());

        let fill = RgFillBuffer {
            buffer: src.id(),
            offset: 0,
            size: vk::WHOLE_SIZE,
            data: 0,
        };
        let err = cmd.add_task(RgTaskDesc::new("fill", fill)).unwrap_err();
        assert!(matches!(err, RgError::WriteToImmutable { .. }));
        assert_eq!(cmd.task_count(), 1);

        // 已经被写入的资源不能再标记为只读
        assert!(matches!(cmd.mark_immutable(dst.id()), Err(RgError::WriteToImmutable { .. })));
    }

    #[test]
    fn test_add_task_requires_recording_state() {
        let (manager, mut cmd) = fixture();
        let desc = GfxBufferDesc::new(64, vk::BufferUsageFlags::TRANSFER_DST);
        let buffer = manager.create_buffer("b", &desc, RgBufferState::UNDEFINED).unwrap();

        cmd.state = RgRecordingState::Pending;
        let fill = RgFillBuffer {
            buffer: buffer.id(),
            offset: 0,
            size: vk::WHOLE_SIZE,
            data: 7,
        };
        let err = cmd.add_task(RgTaskDesc::new("fill", fill)).unwrap_err();
        assert!(matches!(
            err,
            RgError::InvalidState {
                found: RgRecordingState::Pending,
                ..
            }
        ));
    }
}
