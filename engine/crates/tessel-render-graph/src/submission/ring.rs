//! frames in flight 的环形缓冲
//!
//! 每个槽位保存一帧提交时用到的 fence、semaphore 和 command buffer，
//! 同一个槽位再次被使用之前必须等待它上一次的 fence。

use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;
use tessel_gfx::device::{GfxDevice, GfxWaitResult};

use crate::error::RgResult;

/// 等待的结果，超时不是错误
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RgWaitStatus {
    Complete,
    Timeout,
}

impl From<GfxWaitResult> for RgWaitStatus {
    fn from(result: GfxWaitResult) -> Self {
        match result {
            GfxWaitResult::Signaled => Self::Complete,
            GfxWaitResult::Timeout => Self::Timeout,
        }
    }
}

#[derive(Default)]
struct RgFrameSlot {
    frame_id: Option<u64>,
    fences: Vec<vk::Fence>,
    command_buffers: Vec<vk::CommandBuffer>,
    /// 已经被等待过，可以重新使用
    semaphores: Vec<vk::Semaphore>,
    /// 可能处于 signal 状态，只能销毁
    stale_semaphores: Vec<vk::Semaphore>,
}

impl RgFrameSlot {
    fn is_empty(&self) -> bool {
        self.fences.is_empty()
            && self.command_buffers.is_empty()
            && self.semaphores.is_empty()
            && self.stale_semaphores.is_empty()
    }
}

pub(crate) struct RgFrameRing {
    device: Arc<dyn GfxDevice>,
    slots: Vec<Mutex<RgFrameSlot>>,
    free_fences: Mutex<Vec<vk::Fence>>,
    free_semaphores: Mutex<Vec<vk::Semaphore>>,
}

// new & init
impl RgFrameRing {
    pub(crate) fn new(device: Arc<dyn GfxDevice>, frames_in_flight: usize) -> Self {
        Self {
            device,
            slots: (0..frames_in_flight.max(1)).map(|_| Mutex::new(RgFrameSlot::default())).collect(),
            free_fences: Mutex::new(Vec::new()),
            free_semaphores: Mutex::new(Vec::new()),
        }
    }
}

// 同步对象
impl RgFrameRing {
    /// 取一个未 signal 的 fence
    pub(crate) fn acquire_fence(&self, name: &str) -> RgResult<vk::Fence> {
        if let Some(fence) = self.free_fences.lock().pop() {
            return Ok(fence);
        }
        Ok(self.device.create_fence(false, name)?)
    }

    /// 取一个未 signal 的 binary semaphore
    pub(crate) fn acquire_semaphore(&self, name: &str) -> RgResult<vk::Semaphore> {
        if let Some(semaphore) = self.free_semaphores.lock().pop() {
            return Ok(semaphore);
        }
        Ok(self.device.create_semaphore(name)?)
    }

    /// 没有被任何提交使用过的对象直接放回空闲列表
    pub(crate) fn release(&self, fences: &[vk::Fence], semaphores: &[vk::Semaphore]) {
        self.free_fences.lock().extend_from_slice(fences);
        self.free_semaphores.lock().extend_from_slice(semaphores);
    }

    /// 把一帧用到的对象挂到对应的槽位上，等到槽位下次被使用时回收
    pub(crate) fn track(
        &self,
        frame_id: u64,
        fences: &[vk::Fence],
        command_buffers: &[vk::CommandBuffer],
        semaphores: &[vk::Semaphore],
    ) {
        let mut slot = self.slot(frame_id).lock();
        slot.frame_id = Some(frame_id);
        slot.fences.extend_from_slice(fences);
        slot.command_buffers.extend_from_slice(command_buffers);
        slot.semaphores.extend_from_slice(semaphores);
    }

    pub(crate) fn track_stale_semaphores(&self, frame_id: u64, semaphores: &[vk::Semaphore]) {
        let mut slot = self.slot(frame_id).lock();
        slot.frame_id = Some(frame_id);
        slot.stale_semaphores.extend_from_slice(semaphores);
    }

    #[inline]
    fn slot(&self, frame_id: u64) -> &Mutex<RgFrameSlot> {
        &self.slots[(frame_id % self.slots.len() as u64) as usize]
    }
}

// 等待与回收
impl RgFrameRing {
    /// 等待槽位上一次使用的 fence，完成后回收其中的对象
    ///
    /// 返回被回收的帧序号
    pub(crate) fn wait_slot(&self, frame_id: u64, timeout_ns: u64) -> RgResult<(RgWaitStatus, Option<u64>)> {
        let _span = tessel_crate_tools::profile_span!("RgFrameRing::wait_slot");
        let mut slot = self.slot(frame_id).lock();
        if slot.is_empty() {
            return Ok((RgWaitStatus::Complete, slot.frame_id.take()));
        }
        if !slot.fences.is_empty() {
            let status = RgWaitStatus::from(self.device.wait_fences(&slot.fences, timeout_ns)?);
            if status == RgWaitStatus::Timeout {
                return Ok((status, None));
            }
        }
        let retired = slot.frame_id.take();
        self.reclaim(&mut slot)?;
        Ok((RgWaitStatus::Complete, retired))
    }

    /// 只在设备空闲之后调用
    pub(crate) fn reclaim_all(&self) -> RgResult<Vec<u64>> {
        let mut retired = Vec::new();
        for slot in &self.slots {
            let mut slot = slot.lock();
            retired.extend(slot.frame_id.take());
            self.reclaim(&mut slot)?;
        }
        Ok(retired)
    }

    fn reclaim(&self, slot: &mut RgFrameSlot) -> RgResult<()> {
        if !slot.command_buffers.is_empty() {
            self.device.free_commands(&slot.command_buffers);
            slot.command_buffers.clear();
        }
        if !slot.fences.is_empty() {
            self.device.reset_fences(&slot.fences)?;
            self.free_fences.lock().append(&mut slot.fences);
        }
        self.free_semaphores.lock().append(&mut slot.semaphores);
        for semaphore in slot.stale_semaphores.drain(..) {
            self.device.destroy_semaphore(semaphore);
        }
        Ok(())
    }

    /// 设备空闲之后销毁全部同步对象
    pub(crate) fn destroy_all(&self) {
        for slot in &self.slots {
            let mut slot = slot.lock();
            self.device.free_commands(&slot.command_buffers);
            slot.fences.drain(..).for_each(|fence| self.device.destroy_fence(fence));
            slot.semaphores.drain(..).for_each(|semaphore| self.device.destroy_semaphore(semaphore));
            slot.stale_semaphores.drain(..).for_each(|semaphore| self.device.destroy_semaphore(semaphore));
            *slot = RgFrameSlot::default();
        }
        self.free_fences.lock().drain(..).for_each(|fence| self.device.destroy_fence(fence));
        self.free_semaphores.lock().drain(..).for_each(|semaphore| self.device.destroy_semaphore(semaphore));
    }
}
