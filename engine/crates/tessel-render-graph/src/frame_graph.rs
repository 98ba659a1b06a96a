//! Frame graph 的对外入口
//!
//! 一帧的流程：
//! 1. `begin_frame`：等待复用的 frames-in-flight 槽位，销毁到期的资源，回收缓存
//! 2. `add_batch` / `acquire` 声明提交结构（可选）
//! 3. `begin` -> 添加 task -> `execute`，可以在多个线程上同时进行
//! 4. `flush` 按 batch 依赖提交，`wait` / `wait_idle` 等待完成

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tessel_gfx::device::GfxDevice;

use crate::barrier::RgBarrierObserver;
use crate::command_buffer::{RgCommandBuffer, RgCommandBufferDesc, RgCommandBufferId};
use crate::compiled::RgCompiledGraph;
use crate::debug::dump::{frame_dump_to_graphviz, frame_dump_to_string};
use crate::error::{RgError, RgResult};
use crate::render_pass::cache::RgRenderPassCache;
use crate::resource::manager::RgResourceManager;
use crate::settings::RgSettings;
use crate::stats::{RgRenderingStats, RgStatistics};
use crate::submission::ring::RgWaitStatus;
use crate::submission::{RgBatchDesc, RgBatchId, RgBatchSlot, RgFlushReport, RgQueueMask, RgSubmissionGraph};

pub struct RgFrameGraph {
    device: Arc<dyn GfxDevice>,
    settings: Arc<RgSettings>,
    resources: Arc<RgResourceManager>,
    render_passes: RgRenderPassCache,
    submission: RgSubmissionGraph,
    observer: RwLock<Option<Arc<dyn RgBarrierObserver>>>,

    frame_id: AtomicU64,
    next_command_buffer: AtomicU64,

    /// 本帧已经执行的 recording
    compiled: Mutex<Vec<RgCompiledGraph>>,
    frame_stats: Mutex<RgRenderingStats>,
}

// new & init
impl RgFrameGraph {
    pub fn new(device: Arc<dyn GfxDevice>, settings: RgSettings) -> RgResult<Self> {
        settings.validate()?;
        let resources = RgResourceManager::new(device.clone(), settings.frames_in_flight);
        let submission = RgSubmissionGraph::new(device.clone(), &settings);
        log::info!(
            "frame graph created: {} frames in flight, {} barriers per flush",
            settings.frames_in_flight,
            settings.max_barriers_per_flush
        );
        Ok(Self {
            device,
            settings: Arc::new(settings),
            resources,
            render_passes: RgRenderPassCache::new(),
            submission,
            observer: RwLock::new(None),
            frame_id: AtomicU64::new(0),
            next_command_buffer: AtomicU64::new(1),
            compiled: Mutex::new(Vec::new()),
            frame_stats: Mutex::new(RgRenderingStats::default()),
        })
    }

    /// 每个 barrier 加入时通知 observer，只用于调试
    pub fn set_barrier_observer(&self, observer: Option<Arc<dyn RgBarrierObserver>>) {
        *self.observer.write() = observer;
    }
}

// getters
impl RgFrameGraph {
    #[inline]
    pub fn resources(&self) -> &Arc<RgResourceManager> {
        &self.resources
    }

    #[inline]
    pub fn settings(&self) -> &RgSettings {
        &self.settings
    }

    #[inline]
    pub fn submission(&self) -> &RgSubmissionGraph {
        &self.submission
    }

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id.load(Ordering::Acquire)
    }

    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}]", self.frame_id())
    }
}

// 帧
impl RgFrameGraph {
    /// 开始新的一帧，返回帧序号
    ///
    /// 必须在所有 recording 之外调用。
    pub fn begin_frame(&self) -> RgResult<u64> {
        let _span = tessel_crate_tools::profile_span!("RgFrameGraph::begin_frame");
        let frame_id = self.frame_id.fetch_add(1, Ordering::AcqRel) + 1;

        self.submission.begin_frame(frame_id)?;

        let destroyed = self.resources.cleanup(frame_id);
        let views = self.resources.take_destroyed_views();
        let invalidated = self.render_passes.invalidate_views(self.device.as_ref(), &views);
        let max_unused = self.settings.cache_max_unused_frames;
        let collected = self.render_passes.garbage_collect(self.device.as_ref(), frame_id, max_unused)
            + self.resources.garbage_collect_samplers(frame_id, max_unused);
        if destroyed + invalidated + collected > 0 {
            log::debug!(
                "{} destroyed {} resources, invalidated {} framebuffers, collected {} cached objects",
                self.frame_name(),
                destroyed,
                invalidated,
                collected
            );
        }

        self.compiled.lock().clear();
        *self.frame_stats.lock() = RgRenderingStats::default();
        Ok(frame_id)
    }
}

// 提交结构
impl RgFrameGraph {
    #[inline]
    pub fn add_batch(&self, desc: RgBatchDesc) -> RgResult<RgBatchId> {
        self.submission.add_batch(desc)
    }

    /// 领取一个与 `mask` 兼容的 batch 槽位，可以在任意线程调用
    #[inline]
    pub fn acquire(&self, mask: RgQueueMask) -> Option<RgBatchSlot> {
        self.submission.acquire(mask)
    }

    #[inline]
    pub fn skip_batch(&self, name: &str) -> RgResult<()> {
        self.submission.skip_batch(name)
    }
}

// recording
impl RgFrameGraph {
    /// 开始一个 recording
    ///
    /// `depends_on` 是之前声明的 batch 名字，recording 所在的 batch 会等待它们。
    /// `desc.slot` 为空时为这个 recording 单独创建一个 batch。
    pub fn begin(&self, mut desc: RgCommandBufferDesc, depends_on: &[&str]) -> RgResult<RgCommandBuffer> {
        let id = RgCommandBufferId(self.next_command_buffer.fetch_add(1, Ordering::Relaxed));
        let slot = match desc.slot {
            Some(slot) => {
                self.submission.add_dependencies(slot.batch(), depends_on)?;
                slot
            }
            None => {
                let batch_desc =
                    RgBatchDesc::new(format!("{}#{}", desc.name, id.0), desc.queue.into()).depends_on(depends_on);
                let batch = self.submission.add_batch(batch_desc)?;
                self.submission.acquire_in(batch).ok_or_else(|| RgError::UnknownBatch(desc.name.clone()))?
            }
        };
        if let Some(queue) = self.submission.batch_queue(slot.batch()) {
            desc.queue = queue;
        }

        let mut cmd = RgCommandBuffer::new(id, desc, slot, self.resources.clone(), self.settings.clone());
        cmd.begin()?;
        Ok(cmd)
    }

    /// 编译并录制 recording，结果放进它的 batch 槽位
    ///
    /// 失败的 recording 不会被提交，它的槽位被跳过，依赖这个 batch 的其他 batch 不受影响。
    pub fn execute(&self, cmd: &mut RgCommandBuffer) -> RgResult<RgCommandBufferId> {
        let observer = self.observer.read().clone();
        let recorded = match cmd.execute(&self.render_passes, observer) {
            Ok(recorded) => recorded,
            Err(err) => {
                self.submission.skip_slot(cmd.slot());
                self.submission.abandon(cmd.id());
                return Err(err);
            }
        };

        if let Err(err) = self.submission.fill(&recorded) {
            self.device.free_commands(&[recorded.command_buffer]);
            self.submission.abandon(recorded.id);
            return Err(err);
        }

        *self.frame_stats.lock() += recorded.compiled.stats;
        self.compiled.lock().push(recorded.compiled);
        Ok(recorded.id)
    }

    #[inline]
    pub fn flush(&self, queue_mask: RgQueueMask) -> RgResult<RgFlushReport> {
        self.submission.flush(queue_mask)
    }

    /// 等待指定的 command buffer 完成
    pub fn wait(&self, command_buffers: &[RgCommandBufferId], timeout: Duration) -> RgResult<RgWaitStatus> {
        self.submission.wait(command_buffers, timeout.as_nanos().min(u64::MAX as u128) as u64)
    }

    /// 等待所有提交的工作完成
    pub fn wait_idle(&self, timeout: Duration) -> RgResult<RgWaitStatus> {
        self.submission.wait_idle(timeout.as_nanos().min(u64::MAX as u128) as u64)
    }
}

// 统计与调试
impl RgFrameGraph {
    /// 本帧的渲染统计以及当前的资源统计
    pub fn statistics(&self) -> RgStatistics {
        RgStatistics {
            rendering: *self.frame_stats.lock(),
            resources: self.resources.resource_stats(),
            cached_render_passes: self.render_passes.render_pass_count(),
            cached_framebuffers: self.render_passes.framebuffer_count(),
        }
    }

    /// 本帧已经执行的 recording 的编译结果，按执行顺序
    pub fn compiled_graphs(&self) -> Vec<RgCompiledGraph> {
        self.compiled.lock().clone()
    }

    pub fn compiled_graph(&self, name: &str) -> Option<RgCompiledGraph> {
        self.compiled.lock().iter().find(|graph| graph.name == name).cloned()
    }

    pub fn dump_to_string(&self) -> String {
        frame_dump_to_string(&self.compiled.lock())
    }

    pub fn dump_to_graphviz(&self) -> String {
        frame_dump_to_graphviz(&self.compiled.lock())
    }

    pub fn print_execution_plan(&self) {
        self.compiled.lock().iter().for_each(RgCompiledGraph::print_execution_plan);
    }
}

impl Drop for RgFrameGraph {
    fn drop(&mut self) {
        let _span = tessel_crate_tools::profile_span!("RgFrameGraph::drop");
        if let Err(err) = self.device.wait_idle() {
            log::error!("wait idle failed while destroying frame graph: {}", err);
        }
        self.submission.destroy_all();
        self.render_passes.destroy_all(self.device.as_ref());
        self.resources.destroy_all();
        log::info!("frame graph destroyed");
    }
}
