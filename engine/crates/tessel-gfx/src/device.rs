//! 设备接口：资源创建、同步对象、队列提交

use ash::vk;

use crate::GfxResult;
use crate::commands::encoder::GfxCommandEncoder;
use crate::commands::render_pass::{GfxFramebufferDesc, GfxRenderPassDesc};
use crate::commands::submit_info::{GfxPresentInfo, GfxSubmitInfo};
use crate::resources::buffer::{GfxAccelStructAllocation, GfxBufferAllocation, GfxBufferDesc};
use crate::resources::image::{GfxImageAllocation, GfxImageDesc};
use crate::resources::sampler::GfxSamplerDesc;

/// 硬件队列的类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GfxQueueType {
    Graphics,
    Compute,
    Transfer,
}

impl GfxQueueType {
    pub const ALL: [GfxQueueType; 3] = [GfxQueueType::Graphics, GfxQueueType::Compute, GfxQueueType::Transfer];

    pub fn name(self) -> &'static str {
        match self {
            Self::Graphics => "graphics",
            Self::Compute => "compute",
            Self::Transfer => "transfer",
        }
    }
}

/// 等待类操作的结果，超时不是错误
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GfxWaitResult {
    Signaled,
    Timeout,
}

/// frame graph 需要的全部设备能力
///
/// 所有方法都可以被多个线程同时调用，实现内部负责对队列等对象加锁。
pub trait GfxDevice: Send + Sync {
    fn queue_family_index(&self, queue: GfxQueueType) -> u32;

    // 资源
    fn create_image(&self, desc: &GfxImageDesc, name: &str) -> GfxResult<GfxImageAllocation>;
    fn destroy_image(&self, image: GfxImageAllocation);
    fn create_buffer(&self, desc: &GfxBufferDesc, name: &str) -> GfxResult<GfxBufferAllocation>;
    fn destroy_buffer(&self, buffer: GfxBufferAllocation);
    fn create_sampler(&self, desc: &GfxSamplerDesc) -> GfxResult<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);
    fn create_acceleration_structure(
        &self,
        ty: vk::AccelerationStructureTypeKHR,
        size: vk::DeviceSize,
        name: &str,
    ) -> GfxResult<GfxAccelStructAllocation>;
    fn destroy_acceleration_structure(&self, accel: GfxAccelStructAllocation);

    // render pass 对象
    fn create_render_pass(&self, desc: &GfxRenderPassDesc) -> GfxResult<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_framebuffer(&self, desc: &GfxFramebufferDesc) -> GfxResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // 命令
    /// 分配一个 primary command buffer 并开始录制
    fn begin_commands(&self, queue: GfxQueueType, name: &str) -> GfxResult<Box<dyn GfxCommandEncoder>>;
    /// GPU 执行完成后释放 command buffer
    fn free_commands(&self, command_buffers: &[vk::CommandBuffer]);

    // 同步对象
    fn create_semaphore(&self, name: &str) -> GfxResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn create_fence(&self, signaled: bool, name: &str) -> GfxResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn wait_fences(&self, fences: &[vk::Fence], timeout_ns: u64) -> GfxResult<GfxWaitResult>;
    fn reset_fences(&self, fences: &[vk::Fence]) -> GfxResult<()>;

    // 队列
    fn submit(&self, queue: GfxQueueType, submits: &[GfxSubmitInfo], fence: vk::Fence) -> GfxResult<()>;
    fn present(&self, queue: GfxQueueType, present: &GfxPresentInfo) -> GfxResult<()>;
    fn wait_idle(&self) -> GfxResult<()>;
}
