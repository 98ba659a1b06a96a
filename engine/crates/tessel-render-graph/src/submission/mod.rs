//! Submission graph：batch 之间的顺序和同步
//!
//! 一个 batch 绑定一个硬件队列，包含一个或多个 command buffer 槽位（每个录制线程一个）。
//! batch 之间的依赖在提交时变成 binary semaphore 的 signal / wait，每条边一个 semaphore。
//!
//! - `add_batch` 只能依赖已经声明的 batch，因此不会出现环
//! - `acquire` 无锁地领取一个空槽位
//! - `flush` 按声明顺序提交，依赖没有提交的 batch 留到之后的 flush
//! - 被跳过的 batch 仍然提交一个空的 submission，保证下游的等待能够完成

pub mod ring;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use ash::vk;
use bitflags::bitflags;
use crossbeam_utils::CachePadded;
use indexmap::IndexMap;
use itertools::Itertools;
use parking_lot::{Mutex, RwLock};
use tessel_gfx::commands::submit_info::{GfxPresentInfo, GfxSubmitInfo};
use tessel_gfx::device::{GfxDevice, GfxQueueType, GfxWaitResult};

use crate::command_buffer::{RgCommandBufferId, RgRecordedCommands};
use crate::error::{RgError, RgResult};
use crate::settings::RgSettings;
use crate::submission::ring::{RgFrameRing, RgWaitStatus};
use crate::task::kinds::RgPresentRequest;

bitflags! {
    /// 队列能力
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct RgQueueMask: u32 {
        const GRAPHICS = 1 << 0;
        const COMPUTE = 1 << 1;
        const TRANSFER = 1 << 2;
    }
}

impl RgQueueMask {
    /// 满足这些能力的硬件队列，graphics 队列可以执行所有命令
    pub fn native_queue(self) -> GfxQueueType {
        if self.contains(Self::GRAPHICS) || self.is_empty() {
            GfxQueueType::Graphics
        } else if self.contains(Self::COMPUTE) {
            GfxQueueType::Compute
        } else {
            GfxQueueType::Transfer
        }
    }
}

impl From<GfxQueueType> for RgQueueMask {
    fn from(queue: GfxQueueType) -> Self {
        match queue {
            GfxQueueType::Graphics => Self::GRAPHICS,
            GfxQueueType::Compute => Self::COMPUTE,
            GfxQueueType::Transfer => Self::TRANSFER,
        }
    }
}

/// batch 在本帧中的序号
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RgBatchId(pub(crate) u32);

/// `acquire` 领取到的位置
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RgBatchSlot {
    pub(crate) batch: RgBatchId,
    pub(crate) index: u32,
}

impl RgBatchSlot {
    #[inline]
    pub fn batch(&self) -> RgBatchId {
        self.batch
    }

    /// 在 batch 中的位置，提交时按它拼接 command buffer
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }
}

#[derive(Clone, Debug)]
pub struct RgBatchDesc {
    pub name: String,
    pub thread_count: u32,
    pub usage: RgQueueMask,
    pub depends_on: Vec<String>,
}

impl RgBatchDesc {
    pub fn new(name: impl Into<String>, usage: RgQueueMask) -> Self {
        Self {
            name: name.into(),
            thread_count: 1,
            usage,
            depends_on: Vec::new(),
        }
    }

    #[inline]
    pub fn threads(mut self, thread_count: u32) -> Self {
        self.thread_count = thread_count;
        self
    }

    #[inline]
    pub fn depends_on(mut self, batches: &[&str]) -> Self {
        self.depends_on.extend(batches.iter().map(|name| name.to_string()));
        self
    }
}

enum RgSlot {
    Empty,
    Filled {
        id: RgCommandBufferId,
        command_buffer: vk::CommandBuffer,
        presents: Vec<RgPresentRequest>,
    },
    Skipped,
}

struct RgBatch {
    usage: RgQueueMask,
    queue: GfxQueueType,
    thread_count: u32,
    next_slot: CachePadded<AtomicU32>,
    slots: Mutex<Vec<RgSlot>>,
    skipped: AtomicBool,

    /// 等待的 (上游 batch, semaphore)
    waits: Vec<(usize, vk::Semaphore)>,
    /// signal 的 (下游 batch, semaphore)
    signals: Vec<(usize, vk::Semaphore)>,
    fence: Option<vk::Fence>,
}

impl RgBatch {
    #[inline]
    fn is_submitted(&self) -> bool {
        self.fence.is_some()
    }
}

/// 一次 flush 的结果
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RgFlushReport {
    /// 按提交顺序
    pub submitted: Vec<String>,
    /// 因为依赖没有提交而推迟
    pub deferred: Vec<String>,
    pub presents: usize,
}

pub struct RgSubmissionGraph {
    device: Arc<dyn GfxDevice>,
    ring: RgFrameRing,
    frame_id: AtomicU64,
    max_batches: usize,
    max_threads_per_batch: u32,

    batches: RwLock<IndexMap<String, RgBatch>>,
    /// 已经提交的 command buffer 和它所在提交的 fence
    submitted: Mutex<HashMap<RgCommandBufferId, (u64, vk::Fence)>>,
    /// 永远不会提交的 command buffer：录制失败、所在 batch 被跳过或丢弃
    abandoned: Mutex<HashSet<RgCommandBufferId>>,
    /// 回收过的帧中最大的 command buffer 编号，更早且不在 `abandoned` 中的 command buffer 一定已经完成
    retired_id: AtomicU64,
}

// new & init
impl RgSubmissionGraph {
    pub fn new(device: Arc<dyn GfxDevice>, settings: &RgSettings) -> Self {
        Self {
            ring: RgFrameRing::new(device.clone(), settings.frames_in_flight),
            device,
            frame_id: AtomicU64::new(0),
            max_batches: settings.max_batches,
            max_threads_per_batch: settings.max_threads_per_batch as u32,
            batches: RwLock::new(IndexMap::new()),
            submitted: Mutex::new(HashMap::new()),
            abandoned: Mutex::new(HashSet::new()),
            retired_id: AtomicU64::new(0),
        }
    }
}

// 帧
impl RgSubmissionGraph {
    /// 开始新的一帧：丢弃上一帧没有提交的 batch，等待并回收复用的槽位
    pub fn begin_frame(&self, frame_id: u64) -> RgResult<()> {
        let _span = tessel_crate_tools::profile_span!("RgSubmissionGraph::begin_frame");
        self.discard_batches();
        self.frame_id.store(frame_id, Ordering::Release);

        let (_, retired) = self.ring.wait_slot(frame_id, u64::MAX)?;
        if let Some(retired) = retired {
            self.forget_frame(retired);
        }
        Ok(())
    }

    fn discard_batches(&self) {
        let frame_id = self.frame_id.load(Ordering::Acquire);
        let mut batches = self.batches.write();
        let mut stale = Vec::new();
        let mut unsubmitted = Vec::new();
        let mut abandoned = self.abandoned.lock();
        for (name, batch) in batches.iter_mut() {
            if batch.is_submitted() {
                continue;
            }
            for slot in batch.slots.get_mut().drain(..) {
                if let RgSlot::Filled { id, command_buffer, .. } = slot {
                    unsubmitted.push(command_buffer);
                    abandoned.insert(id);
                }
            }
            log::warn!("batch \"{}\" was never submitted, its command buffers are dropped", name);
            stale.extend(batch.waits.iter().map(|(_, semaphore)| *semaphore));
        }
        if !unsubmitted.is_empty() {
            self.device.free_commands(&unsubmitted);
        }
        // 上游已经 signal 但下游没有等待的 semaphore 不能复用
        self.ring.track_stale_semaphores(frame_id, &stale);
        batches.clear();
    }

    fn forget_frame(&self, frame_id: u64) {
        let mut submitted = self.submitted.lock();
        let mut max_id = 0;
        submitted.retain(|id, (frame, _)| {
            let keep = *frame != frame_id;
            if !keep {
                max_id = max_id.max(id.0);
            }
            keep
        });
        self.retired_id.fetch_max(max_id, Ordering::AcqRel);
    }
}

// 构建
impl RgSubmissionGraph {
    /// 声明一个 batch，依赖必须已经声明
    pub fn add_batch(&self, desc: RgBatchDesc) -> RgResult<RgBatchId> {
        if desc.thread_count == 0 || desc.thread_count > self.max_threads_per_batch {
            return Err(RgError::CapacityExceeded {
                what: "threads per batch",
                limit: self.max_threads_per_batch as usize,
            });
        }

        let mut batches = self.batches.write();
        if batches.contains_key(&desc.name) {
            return Err(RgError::DuplicateBatch(desc.name));
        }
        if batches.len() >= self.max_batches {
            return Err(RgError::CapacityExceeded {
                what: "submission batches",
                limit: self.max_batches,
            });
        }
        let deps = desc
            .depends_on
            .iter()
            .unique()
            .map(|dep| batches.get_index_of(dep).ok_or_else(|| RgError::UnknownBatch(dep.clone())))
            .collect::<RgResult<Vec<_>>>()?;

        let index = batches.len();
        batches.insert(
            desc.name.clone(),
            RgBatch {
                usage: desc.usage,
                queue: desc.usage.native_queue(),
                thread_count: desc.thread_count,
                next_slot: CachePadded::new(AtomicU32::new(0)),
                slots: Mutex::new((0..desc.thread_count).map(|_| RgSlot::Empty).collect()),
                skipped: AtomicBool::new(false),
                waits: Vec::new(),
                signals: Vec::new(),
                fence: None,
            },
        );
        for dep in deps {
            self.link(&mut batches, dep, index)?;
        }
        log::debug!("add batch \"{}\" ({} threads, {:?})", desc.name, desc.thread_count, desc.usage);
        Ok(RgBatchId(index as u32))
    }

    /// 给一个还没有提交的 batch 追加依赖，依赖必须在它之前声明
    pub fn add_dependencies(&self, batch: RgBatchId, depends_on: &[&str]) -> RgResult<()> {
        let mut batches = self.batches.write();
        let index = batch.0 as usize;
        let name = batches
            .get_index(index)
            .map(|(name, _)| name.clone())
            .ok_or_else(|| RgError::UnknownBatch(format!("{:?}", batch)))?;
        for dep in depends_on {
            let dep_index = batches.get_index_of(*dep).ok_or_else(|| RgError::UnknownBatch(dep.to_string()))?;
            if dep_index >= index {
                return Err(RgError::CyclicDependency(format!("{} -> {}", dep, name)));
            }
            if batches[index].waits.iter().any(|(src, _)| *src == dep_index) {
                continue;
            }
            self.link(&mut batches, dep_index, index)?;
        }
        Ok(())
    }

    fn link(&self, batches: &mut IndexMap<String, RgBatch>, src: usize, dst: usize) -> RgResult<()> {
        if batches[dst].is_submitted() {
            let name = batches.get_index(dst).map(|(name, _)| name.clone()).unwrap_or_default();
            return Err(RgError::BatchSubmitted(name));
        }
        if batches[src].is_submitted() {
            // 上游已经提交，只能依靠提交顺序
            log::debug!(
                "batch dependency {} -> {} added after submission",
                batches.get_index(src).map(|(n, _)| n.as_str()).unwrap_or_default(),
                batches.get_index(dst).map(|(n, _)| n.as_str()).unwrap_or_default()
            );
            return Ok(());
        }
        let semaphore = self.ring.acquire_semaphore("batch-dependency")?;
        batches[src].signals.push((dst, semaphore));
        batches[dst].waits.push((src, semaphore));
        Ok(())
    }

    pub fn batch_id(&self, name: &str) -> Option<RgBatchId> {
        self.batches.read().get_index_of(name).map(|index| RgBatchId(index as u32))
    }

    pub fn batch_name(&self, batch: RgBatchId) -> Option<String> {
        self.batches.read().get_index(batch.0 as usize).map(|(name, _)| name.clone())
    }

    pub fn batch_queue(&self, batch: RgBatchId) -> Option<GfxQueueType> {
        self.batches.read().get_index(batch.0 as usize).map(|(_, batch)| batch.queue)
    }

    #[inline]
    pub fn batch_count(&self) -> usize {
        self.batches.read().len()
    }
}

// 领取与填充
impl RgSubmissionGraph {
    /// 领取第一个能力匹配的 batch 中的下一个空槽位
    ///
    /// `mask` 是调用线程能录制的队列能力，batch 需要的能力必须都被覆盖。
    pub fn acquire(&self, mask: RgQueueMask) -> Option<RgBatchSlot> {
        let batches = self.batches.read();
        batches
            .values()
            .enumerate()
            .filter(|(_, batch)| !batch.is_submitted() && mask.contains(batch.usage))
            .find_map(|(index, batch)| Self::claim(batch, index))
    }

    /// 在指定的 batch 中领取下一个空槽位
    pub fn acquire_in(&self, batch: RgBatchId) -> Option<RgBatchSlot> {
        let batches = self.batches.read();
        let (_, entry) = batches.get_index(batch.0 as usize)?;
        if entry.is_submitted() {
            return None;
        }
        Self::claim(entry, batch.0 as usize)
    }

    fn claim(batch: &RgBatch, index: usize) -> Option<RgBatchSlot> {
        let slot = batch
            .next_slot
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |next| (next < batch.thread_count).then_some(next + 1))
            .ok()?;
        Some(RgBatchSlot {
            batch: RgBatchId(index as u32),
            index: slot,
        })
    }

    /// 把录制好的 command buffer 放进它的槽位
    pub(crate) fn fill(&self, recorded: &RgRecordedCommands) -> RgResult<()> {
        let batches = self.batches.read();
        let (name, batch) = batches
            .get_index(recorded.slot.batch.0 as usize)
            .ok_or_else(|| RgError::UnknownBatch(format!("{:?}", recorded.slot.batch)))?;
        if batch.is_submitted() {
            return Err(RgError::BatchSubmitted(name.clone()));
        }
        let mut slots = batch.slots.lock();
        let slot = slots
            .get_mut(recorded.slot.index as usize)
            .ok_or_else(|| RgError::UnknownBatch(format!("{}[{}]", name, recorded.slot.index)))?;
        *slot = RgSlot::Filled {
            id: recorded.id,
            command_buffer: recorded.command_buffer,
            presents: recorded.presents.clone(),
        };
        Ok(())
    }

    /// 槽位不会产生 command buffer，例如录制失败
    pub fn skip_slot(&self, slot: RgBatchSlot) {
        let batches = self.batches.read();
        if let Some((_, batch)) = batches.get_index(slot.batch.0 as usize)
            && let Some(entry) = batch.slots.lock().get_mut(slot.index as usize)
        {
            *entry = RgSlot::Skipped;
        }
    }

    /// 这个 command buffer 不会被提交，等待它只会超时
    pub(crate) fn abandon(&self, id: RgCommandBufferId) {
        self.abandoned.lock().insert(id);
    }

    /// 本帧不使用这个 batch，依赖它的 batch 仍然可以正常提交
    pub fn skip_batch(&self, name: &str) -> RgResult<()> {
        let batches = self.batches.read();
        let batch = batches.get(name).ok_or_else(|| RgError::UnknownBatch(name.to_string()))?;
        if batch.is_submitted() {
            return Err(RgError::BatchSubmitted(name.to_string()));
        }
        batch.skipped.store(true, Ordering::Release);
        log::debug!("skip batch \"{}\"", name);
        Ok(())
    }
}

// 提交
impl RgSubmissionGraph {
    /// 按声明顺序提交所有在 `queue_mask` 中、依赖都已经提交的 batch
    ///
    /// present 失败（例如 swapchain out of date）时 batch 仍然算作已提交，
    /// 其余的 batch 照常提交，最后返回第一个 present 错误。
    pub fn flush(&self, queue_mask: RgQueueMask) -> RgResult<RgFlushReport> {
        let _span = tessel_crate_tools::profile_span!("RgSubmissionGraph::flush");
        let frame_id = self.frame_id.load(Ordering::Acquire);
        let mut batches = self.batches.write();
        let mut report = RgFlushReport::default();
        let mut present_error = None;

        for index in 0..batches.len() {
            let (name, batch) = match batches.get_index(index) {
                Some((name, batch)) => (name.clone(), batch),
                None => continue,
            };
            if batch.is_submitted() || !queue_mask.intersects(RgQueueMask::from(batch.queue)) {
                continue;
            }
            if batch.waits.iter().any(|(src, _)| !batches[*src].is_submitted()) {
                report.deferred.push(name);
                continue;
            }

            let queue = batches[index].queue;
            let presents = self.submit_batch(frame_id, &name, &mut batches[index])?;
            report.submitted.push(name);

            for (request, semaphore) in presents {
                let info = GfxPresentInfo {
                    swapchain: request.swapchain,
                    image_index: request.image_index,
                    wait_semaphores: vec![semaphore],
                };
                match self.device.present(queue, &info) {
                    Ok(()) => report.presents += 1,
                    Err(err) => {
                        log::error!("present of swapchain {:?} failed: {}", request.swapchain, err);
                        present_error.get_or_insert(err);
                    }
                }
            }
        }

        if !report.submitted.is_empty() {
            log::debug!("flush {:?}: submitted [{}]", queue_mask, report.submitted.join(", "));
        }
        match present_error {
            Some(err) => Err(err.into()),
            None => Ok(report),
        }
    }

    /// 提交一个 batch，成功后立即登记 fence 和 command buffer
    ///
    /// 返回还需要 present 的请求和它们等待的 semaphore。
    fn submit_batch(
        &self,
        frame_id: u64,
        name: &str,
        batch: &mut RgBatch,
    ) -> RgResult<Vec<(RgPresentRequest, vk::Semaphore)>> {
        let skipped = batch.skipped.load(Ordering::Acquire);
        let mut command_buffers = Vec::new();
        let mut presents = Vec::new();
        let mut ids = Vec::new();
        let mut dropped = Vec::new();
        let mut dropped_ids = Vec::new();
        for (index, slot) in batch.slots.get_mut().iter().enumerate() {
            match slot {
                RgSlot::Filled {
                    id,
                    command_buffer,
                    presents: requests,
                } if !skipped => {
                    command_buffers.push(*command_buffer);
                    presents.extend_from_slice(requests);
                    ids.push(*id);
                }
                RgSlot::Filled { id, command_buffer, .. } => {
                    dropped.push(*command_buffer);
                    dropped_ids.push(*id);
                }
                RgSlot::Empty if !skipped => {
                    log::warn!("batch \"{}\" slot {} was never recorded", name, index);
                }
                RgSlot::Empty | RgSlot::Skipped => {}
            }
        }

        let stage = vk::PipelineStageFlags2::ALL_COMMANDS;
        let mut info = GfxSubmitInfo::new(&command_buffers);
        for (_, semaphore) in &batch.waits {
            info = info.wait(*semaphore, stage, None);
        }
        for (_, semaphore) in &batch.signals {
            info = info.signal(*semaphore, stage, None);
        }
        let mut present_semaphores = Vec::with_capacity(presents.len());
        for _ in &presents {
            let semaphore = self.ring.acquire_semaphore("present")?;
            info = info.signal(semaphore, stage, None);
            present_semaphores.push(semaphore);
        }

        let fence = self.ring.acquire_fence(name)?;
        if let Err(err) = self.device.submit(batch.queue, &[info], fence) {
            // 没有提交成功，fence 和 semaphore 都没有被使用
            self.ring.release(&[fence], &present_semaphores);
            return Err(err.into());
        }
        log::info!(
            "submit batch \"{}\" to {} queue: {} command buffers{}",
            name,
            batch.queue.name(),
            command_buffers.len(),
            if skipped { " (skipped)" } else { "" }
        );

        batch.fence = Some(fence);
        // 等待过的 semaphore 在本次提交完成后可以复用
        let consumed = batch.waits.iter().map(|(_, semaphore)| *semaphore).chain(present_semaphores.iter().copied());
        let consumed = consumed.collect_vec();
        command_buffers.extend(dropped);
        self.ring.track(frame_id, &[fence], &command_buffers, &consumed);

        let mut submitted = self.submitted.lock();
        for id in ids {
            submitted.insert(id, (frame_id, fence));
        }
        self.abandoned.lock().extend(dropped_ids);
        Ok(presents.into_iter().zip(present_semaphores).collect())
    }
}

// 等待
impl RgSubmissionGraph {
    /// 等待指定的 command buffer 执行完成
    ///
    /// 还没有提交或者永远不会提交的 command buffer 不会完成，直接返回 `Timeout`。
    pub fn wait(&self, ids: &[RgCommandBufferId], timeout_ns: u64) -> RgResult<RgWaitStatus> {
        let retired = self.retired_id.load(Ordering::Acquire);
        let mut fences = Vec::with_capacity(ids.len());
        {
            let submitted = self.submitted.lock();
            let abandoned = self.abandoned.lock();
            for id in ids {
                if abandoned.contains(id) {
                    log::warn!("waiting on command buffer {:?}, which will never be submitted", id);
                    return Ok(RgWaitStatus::Timeout);
                }
                match submitted.get(id) {
                    Some((_, fence)) => fences.push(*fence),
                    None if id.0 <= retired => {}
                    None => {
                        log::warn!("waiting on command buffer {:?}, which was never submitted", id);
                        return Ok(RgWaitStatus::Timeout);
                    }
                }
            }
        }
        if fences.is_empty() {
            return Ok(RgWaitStatus::Complete);
        }
        fences.sort_unstable();
        fences.dedup();
        Ok(self.device.wait_fences(&fences, timeout_ns)?.into())
    }

    /// 等待所有已经提交的工作完成，之后回收所有帧
    pub fn wait_idle(&self, timeout_ns: u64) -> RgResult<RgWaitStatus> {
        let mut fences: Vec<vk::Fence> = self.submitted.lock().values().map(|(_, fence)| *fence).collect();
        fences.sort_unstable();
        fences.dedup();
        if !fences.is_empty() && self.device.wait_fences(&fences, timeout_ns)? == GfxWaitResult::Timeout {
            return Ok(RgWaitStatus::Timeout);
        }

        self.device.wait_idle()?;
        for frame_id in self.ring.reclaim_all()? {
            self.forget_frame(frame_id);
        }
        Ok(RgWaitStatus::Complete)
    }

    /// 设备空闲之后调用
    pub(crate) fn destroy_all(&self) {
        self.discard_batches();
        self.ring.destroy_all();
        self.submitted.lock().clear();
        self.abandoned.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use tessel_gfx::headless::HeadlessDevice;

    use super::*;

    fn graph(device: &Arc<HeadlessDevice>) -> RgSubmissionGraph {
        RgSubmissionGraph::new(device.clone(), &RgSettings::default())
    }

    #[test]
    fn test_dependency_must_be_declared_first() {
        let device = Arc::new(HeadlessDevice::new());
        let graph = graph(&device);
        graph.add_batch(RgBatchDesc::new("a", RgQueueMask::GRAPHICS)).unwrap();

        let err = graph.add_batch(RgBatchDesc::new("b", RgQueueMask::GRAPHICS).depends_on(&["c"])).unwrap_err();
        assert!(matches!(err, RgError::UnknownBatch(name) if name == "c"));

        let err = graph.add_batch(RgBatchDesc::new("a", RgQueueMask::COMPUTE)).unwrap_err();
        assert!(matches!(err, RgError::DuplicateBatch(_)));
        assert_eq!(graph.batch_count(), 1);
    }

    #[test]
    fn test_acquire_respects_thread_count_and_mask() {
        let device = Arc::new(HeadlessDevice::new());
        let graph = graph(&device);
        let compute = graph.add_batch(RgBatchDesc::new("compute", RgQueueMask::COMPUTE).threads(2)).unwrap();
        let gfx = graph.add_batch(RgBatchDesc::new("gfx", RgQueueMask::GRAPHICS)).unwrap();

        let first = graph.acquire(RgQueueMask::GRAPHICS).unwrap();
        assert_eq!(first.batch(), gfx);
        assert!(graph.acquire(RgQueueMask::GRAPHICS).is_none());

        let all = RgQueueMask::all();
        assert_eq!(graph.acquire(all).unwrap(), RgBatchSlot { batch: compute, index: 0 });
        assert_eq!(graph.acquire(all).unwrap(), RgBatchSlot { batch: compute, index: 1 });
        assert!(graph.acquire(all).is_none());
    }

    #[test]
    fn test_concurrent_acquire_hands_out_unique_slots() {
        use rayon::prelude::*;

        let device = Arc::new(HeadlessDevice::new());
        let graph = graph(&device);
        graph.add_batch(RgBatchDesc::new("workers", RgQueueMask::GRAPHICS).threads(8)).unwrap();

        let mut slots: Vec<u32> =
            (0..32).into_par_iter().filter_map(|_| graph.acquire(RgQueueMask::GRAPHICS)).map(|s| s.index()).collect();
        slots.sort_unstable();
        assert_eq!(slots, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_native_queue_selection() {
        assert_eq!(RgQueueMask::GRAPHICS.union(RgQueueMask::COMPUTE).native_queue(), GfxQueueType::Graphics);
        assert_eq!(RgQueueMask::COMPUTE.native_queue(), GfxQueueType::Compute);
        assert_eq!(RgQueueMask::TRANSFER.native_queue(), GfxQueueType::Transfer);
    }
}
