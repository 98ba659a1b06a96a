//! 无 GPU 的设备实现
//!
//! 所有原生调用都被记录为 [`GfxCommand`]，队列提交、binary / timeline semaphore 与 fence 在 CPU 上模拟：
//! 一次提交只有在它等待的 semaphore 全部 signal 之后才算完成。用于测试和离线导出 frame graph。

mod command;

pub use command::{GfxCommand, HeadlessCommandEncoder};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use ash::vk;
use ash::vk::Handle;
use parking_lot::{Condvar, Mutex};

use crate::commands::encoder::GfxCommandEncoder;
use crate::commands::render_pass::{GfxFramebufferDesc, GfxRenderPassDesc};
use crate::commands::submit_info::{GfxPresentInfo, GfxSubmitInfo};
use crate::device::{GfxDevice, GfxQueueType, GfxWaitResult};
use crate::resources::buffer::{GfxAccelStructAllocation, GfxBufferAllocation, GfxBufferDesc};
use crate::resources::image::{GfxImageAllocation, GfxImageDesc};
use crate::resources::sampler::GfxSamplerDesc;
use crate::{GfxError, GfxResult};

/// 一次队列提交的记录
#[derive(Clone, Debug)]
pub struct HeadlessSubmission {
    pub queue: GfxQueueType,
    pub info: GfxSubmitInfo,
    pub fence: vk::Fence,
    pub completed: bool,
}

#[derive(Default)]
pub(crate) struct HeadlessState {
    pub(crate) command_logs: HashMap<vk::CommandBuffer, Vec<GfxCommand>>,
    render_passes: HashMap<vk::RenderPass, GfxRenderPassDesc>,
    framebuffers: HashMap<vk::Framebuffer, GfxFramebufferDesc>,
    images: HashSet<vk::Image>,
    buffers: HashSet<vk::Buffer>,
    samplers: HashSet<vk::Sampler>,
    accels: HashSet<vk::AccelerationStructureKHR>,
    /// binary semaphore 的值只有 0 / 1
    semaphores: HashMap<vk::Semaphore, u64>,
    fences: HashMap<vk::Fence, bool>,
    submissions: Vec<HeadlessSubmission>,
    pending: Vec<usize>,
    presents: Vec<(GfxQueueType, GfxPresentInfo)>,
    render_pass_create_count: usize,
    /// 接下来这么多次 submit / present 返回错误
    failing_submits: usize,
    failing_presents: usize,
}

impl HeadlessState {
    fn waits_satisfied(&self, info: &GfxSubmitInfo) -> bool {
        info.wait_infos.iter().all(|wait| {
            let value = self.semaphores.get(&wait.semaphore).copied().unwrap_or(0);
            value >= wait.value.unwrap_or(1)
        })
    }

    /// 完成所有等待条件已经满足的提交，直到没有新的进展
    fn retire(&mut self) -> bool {
        let mut any = false;
        loop {
            let ready = self.pending.iter().position(|&idx| self.waits_satisfied(&self.submissions[idx].info));
            let Some(pos) = ready else {
                break;
            };
            let idx = self.pending.remove(pos);
            let info = self.submissions[idx].info.clone();
            for wait in info.wait_infos.iter().filter(|w| w.value.is_none()) {
                self.semaphores.insert(wait.semaphore, 0);
            }
            for signal in &info.signal_infos {
                let value = self.semaphores.entry(signal.semaphore).or_insert(0);
                *value = match signal.value {
                    None => 1,
                    Some(v) => (*value).max(v),
                };
            }
            let fence = self.submissions[idx].fence;
            if fence != vk::Fence::null() {
                self.fences.insert(fence, true);
            }
            self.submissions[idx].completed = true;
            any = true;
        }
        any
    }
}

pub struct HeadlessDevice {
    next_handle: AtomicU64,
    state: Arc<Mutex<HeadlessState>>,
    completion: Condvar,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl HeadlessDevice {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            state: Arc::new(Mutex::new(HeadlessState::default())),
            completion: Condvar::new(),
        }
    }

    #[inline]
    fn next_handle<H: Handle>(&self) -> H {
        H::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }
}

// 故障注入
impl HeadlessDevice {
    /// 下一次 `submit` 返回 `DeviceLost`，不记录任何提交
    pub fn fail_next_submit(&self) {
        self.state.lock().failing_submits += 1;
    }

    /// 下一次 `present` 返回 `ERROR_OUT_OF_DATE_KHR`
    ///
    /// 与真实设备一样，present 等待的 semaphore 仍然被消耗。
    pub fn fail_next_present(&self) {
        self.state.lock().failing_presents += 1;
    }
}

// 检查录制结果
impl HeadlessDevice {
    /// 某个 command buffer 录制的全部命令
    pub fn command_log(&self, command_buffer: vk::CommandBuffer) -> Option<Vec<GfxCommand>> {
        self.state.lock().command_logs.get(&command_buffer).cloned()
    }

    pub fn render_pass_desc(&self, render_pass: vk::RenderPass) -> Option<GfxRenderPassDesc> {
        self.state.lock().render_passes.get(&render_pass).cloned()
    }

    pub fn framebuffer_desc(&self, framebuffer: vk::Framebuffer) -> Option<GfxFramebufferDesc> {
        self.state.lock().framebuffers.get(&framebuffer).cloned()
    }

    /// 按提交顺序返回全部提交记录
    pub fn submissions(&self) -> Vec<HeadlessSubmission> {
        self.state.lock().submissions.clone()
    }

    pub fn presents(&self) -> Vec<(GfxQueueType, GfxPresentInfo)> {
        self.state.lock().presents.clone()
    }

    /// 一共创建过多少个原生 render pass
    pub fn render_pass_create_count(&self) -> usize {
        self.state.lock().render_pass_create_count
    }

    pub fn live_image_count(&self) -> usize {
        self.state.lock().images.len()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.state.lock().buffers.len()
    }

    pub fn live_sampler_count(&self) -> usize {
        self.state.lock().samplers.len()
    }

    pub fn live_semaphore_count(&self) -> usize {
        self.state.lock().semaphores.len()
    }
}

impl GfxDevice for HeadlessDevice {
    fn queue_family_index(&self, queue: GfxQueueType) -> u32 {
        queue as u32
    }

    fn create_image(&self, desc: &GfxImageDesc, name: &str) -> GfxResult<GfxImageAllocation> {
        log::trace!("headless: create image \"{}\" {:?}", name, desc.format);
        let allocation = GfxImageAllocation {
            image: self.next_handle(),
            view: self.next_handle(),
            memory: None,
        };
        self.state.lock().images.insert(allocation.image);
        Ok(allocation)
    }

    fn destroy_image(&self, image: GfxImageAllocation) {
        self.state.lock().images.remove(&image.image);
    }

    fn create_buffer(&self, desc: &GfxBufferDesc, name: &str) -> GfxResult<GfxBufferAllocation> {
        log::trace!("headless: create buffer \"{}\" size {}", name, desc.size);
        let buffer: vk::Buffer = self.next_handle();
        let device_address = if desc.needs_device_address() { buffer.as_raw() << 16 } else { 0 };
        self.state.lock().buffers.insert(buffer);
        Ok(GfxBufferAllocation {
            buffer,
            size: desc.size,
            device_address,
            memory: None,
        })
    }

    fn destroy_buffer(&self, buffer: GfxBufferAllocation) {
        self.state.lock().buffers.remove(&buffer.buffer);
    }

    fn create_sampler(&self, _desc: &GfxSamplerDesc) -> GfxResult<vk::Sampler> {
        let sampler = self.next_handle();
        self.state.lock().samplers.insert(sampler);
        Ok(sampler)
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.state.lock().samplers.remove(&sampler);
    }

    fn create_acceleration_structure(
        &self,
        ty: vk::AccelerationStructureTypeKHR,
        size: vk::DeviceSize,
        name: &str,
    ) -> GfxResult<GfxAccelStructAllocation> {
        let buffer_desc = GfxBufferDesc::new(
            size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        );
        let buffer = self.create_buffer(&buffer_desc, name)?;
        let handle: vk::AccelerationStructureKHR = self.next_handle();
        self.state.lock().accels.insert(handle);
        Ok(GfxAccelStructAllocation {
            handle,
            ty,
            device_address: buffer.device_address,
            buffer,
        })
    }

    fn destroy_acceleration_structure(&self, accel: GfxAccelStructAllocation) {
        self.state.lock().accels.remove(&accel.handle);
        self.destroy_buffer(accel.buffer);
    }

    fn create_render_pass(&self, desc: &GfxRenderPassDesc) -> GfxResult<vk::RenderPass> {
        let render_pass = self.next_handle();
        let mut state = self.state.lock();
        state.render_passes.insert(render_pass, desc.clone());
        state.render_pass_create_count += 1;
        Ok(render_pass)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.state.lock().render_passes.remove(&render_pass);
    }

    fn create_framebuffer(&self, desc: &GfxFramebufferDesc) -> GfxResult<vk::Framebuffer> {
        let mut state = self.state.lock();
        if !state.render_passes.contains_key(&desc.render_pass) {
            return Err(GfxError::InvalidHandle(format!("{:?}", desc.render_pass)));
        }
        let framebuffer = self.next_handle();
        state.framebuffers.insert(framebuffer, desc.clone());
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.state.lock().framebuffers.remove(&framebuffer);
    }

    fn begin_commands(&self, _queue: GfxQueueType, _name: &str) -> GfxResult<Box<dyn GfxCommandEncoder>> {
        Ok(Box::new(HeadlessCommandEncoder::new(self.next_handle(), self.state.clone())))
    }

    fn free_commands(&self, command_buffers: &[vk::CommandBuffer]) {
        let mut state = self.state.lock();
        for cmd in command_buffers {
            state.command_logs.remove(cmd);
        }
    }

    fn create_semaphore(&self, _name: &str) -> GfxResult<vk::Semaphore> {
        let semaphore = self.next_handle();
        self.state.lock().semaphores.insert(semaphore, 0);
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state.lock().semaphores.remove(&semaphore);
    }

    fn create_fence(&self, signaled: bool, _name: &str) -> GfxResult<vk::Fence> {
        let fence = self.next_handle();
        self.state.lock().fences.insert(fence, signaled);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.state.lock().fences.remove(&fence);
    }

    fn wait_fences(&self, fences: &[vk::Fence], timeout_ns: u64) -> GfxResult<GfxWaitResult> {
        let deadline = Instant::now().checked_add(Duration::from_nanos(timeout_ns));
        let mut state = self.state.lock();
        loop {
            let mut all_signaled = true;
            for fence in fences {
                match state.fences.get(fence) {
                    Some(true) => {}
                    Some(false) => all_signaled = false,
                    None => return Err(GfxError::InvalidHandle(format!("{:?}", fence))),
                }
            }
            if all_signaled {
                return Ok(GfxWaitResult::Signaled);
            }
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Ok(GfxWaitResult::Timeout);
                    }
                    self.completion.wait_until(&mut state, deadline);
                }
                None => self.completion.wait(&mut state),
            }
        }
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> GfxResult<()> {
        let mut state = self.state.lock();
        for fence in fences {
            match state.fences.get_mut(fence) {
                Some(signaled) => *signaled = false,
                None => return Err(GfxError::InvalidHandle(format!("{:?}", fence))),
            }
        }
        Ok(())
    }

    fn submit(&self, queue: GfxQueueType, submits: &[GfxSubmitInfo], fence: vk::Fence) -> GfxResult<()> {
        let mut state = self.state.lock();
        if state.failing_submits > 0 {
            state.failing_submits -= 1;
            return Err(GfxError::DeviceLost);
        }
        for cmd in submits.iter().flat_map(|s| s.command_buffers.iter()) {
            if !state.command_logs.contains_key(cmd) {
                return Err(GfxError::InvalidHandle(format!("{:?} was not recorded", cmd)));
            }
        }
        // 一次提交多个 SubmitInfo 时，fence 挂在最后一个上
        let last = submits.len().saturating_sub(1);
        for (i, info) in submits.iter().enumerate() {
            let idx = state.submissions.len();
            state.submissions.push(HeadlessSubmission {
                queue,
                info: info.clone(),
                fence: if i == last { fence } else { vk::Fence::null() },
                completed: false,
            });
            state.pending.push(idx);
        }
        if submits.is_empty() && fence != vk::Fence::null() {
            state.fences.insert(fence, true);
        }
        if state.retire() || submits.is_empty() {
            self.completion.notify_all();
        }
        Ok(())
    }

    fn present(&self, queue: GfxQueueType, present: &GfxPresentInfo) -> GfxResult<()> {
        let mut state = self.state.lock();
        for semaphore in &present.wait_semaphores {
            state.semaphores.insert(*semaphore, 0);
        }
        if state.failing_presents > 0 {
            state.failing_presents -= 1;
            return Err(GfxError::from_vk(vk::Result::ERROR_OUT_OF_DATE_KHR));
        }
        state.presents.push((queue, present.clone()));
        if state.retire() {
            self.completion.notify_all();
        }
        Ok(())
    }

    fn wait_idle(&self) -> GfxResult<()> {
        let state = self.state.lock();
        if state.pending.is_empty() {
            Ok(())
        } else {
            // 剩下的提交永远等不到 semaphore，真实设备上这会是死锁
            log::error!("headless: {} submissions can never complete", state.pending.len());
            Err(GfxError::DeviceLost)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_waits_for_semaphore() {
        let device = HeadlessDevice::new();
        let semaphore = device.create_semaphore("s").unwrap();
        let fence_a = device.create_fence(false, "a").unwrap();
        let fence_b = device.create_fence(false, "b").unwrap();

        let cmd_a = device.begin_commands(GfxQueueType::Graphics, "a").unwrap().finish().unwrap();
        let cmd_b = device.begin_commands(GfxQueueType::Compute, "b").unwrap().finish().unwrap();

        // b 先提交，但要等 a signal
        let wait = GfxSubmitInfo::new(&[cmd_b]).wait(semaphore, vk::PipelineStageFlags2::ALL_COMMANDS, None);
        device.submit(GfxQueueType::Compute, &[wait], fence_b).unwrap();
        assert_eq!(device.wait_fences(&[fence_b], 0).unwrap(), GfxWaitResult::Timeout);

        let signal = GfxSubmitInfo::new(&[cmd_a]).signal(semaphore, vk::PipelineStageFlags2::ALL_COMMANDS, None);
        device.submit(GfxQueueType::Graphics, &[signal], fence_a).unwrap();
        assert_eq!(device.wait_fences(&[fence_a, fence_b], 0).unwrap(), GfxWaitResult::Signaled);
        assert!(device.wait_idle().is_ok());
    }

    #[test]
    fn test_wait_times_out_without_signal() {
        let device = HeadlessDevice::new();
        let semaphore = device.create_semaphore("never").unwrap();
        let fence = device.create_fence(false, "f").unwrap();
        let cmd = device.begin_commands(GfxQueueType::Graphics, "c").unwrap().finish().unwrap();

        let submit = GfxSubmitInfo::new(&[cmd]).wait(semaphore, vk::PipelineStageFlags2::ALL_COMMANDS, None);
        device.submit(GfxQueueType::Graphics, &[submit], fence).unwrap();

        let result = device.wait_fences(&[fence], Duration::from_millis(5).as_nanos() as u64).unwrap();
        assert_eq!(result, GfxWaitResult::Timeout);
        assert!(device.wait_idle().is_err());
    }

    #[test]
    fn test_injected_failures_are_one_shot() {
        let device = HeadlessDevice::new();
        let cmd = device.begin_commands(GfxQueueType::Graphics, "c").unwrap().finish().unwrap();
        let fence = device.create_fence(false, "f").unwrap();

        device.fail_next_submit();
        assert!(matches!(
            device.submit(GfxQueueType::Graphics, &[GfxSubmitInfo::new(&[cmd])], fence),
            Err(GfxError::DeviceLost)
        ));
        assert!(device.submissions().is_empty());
        device.submit(GfxQueueType::Graphics, &[GfxSubmitInfo::new(&[cmd])], fence).unwrap();

        let present = GfxPresentInfo {
            swapchain: vk::SwapchainKHR::from_raw(0x51),
            image_index: 0,
            wait_semaphores: Vec::new(),
        };
        device.fail_next_present();
        assert!(matches!(
            device.present(GfxQueueType::Graphics, &present),
            Err(GfxError::Vk(vk::Result::ERROR_OUT_OF_DATE_KHR))
        ));
        assert!(device.presents().is_empty());
        device.present(GfxQueueType::Graphics, &present).unwrap();
        assert_eq!(device.presents().len(), 1);
    }

    #[test]
    fn test_submit_unrecorded_command_buffer_fails() {
        let device = HeadlessDevice::new();
        let bogus = vk::CommandBuffer::from_raw(0xdead);
        let result = device.submit(GfxQueueType::Graphics, &[GfxSubmitInfo::new(&[bogus])], vk::Fence::null());
        assert!(result.is_err());
    }
}
