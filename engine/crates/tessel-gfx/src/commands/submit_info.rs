use ash::vk;

/// 一个 semaphore 的等待或 signal 信息
///
/// `value` 为 `None` 表示 binary semaphore，`Some` 表示 timeline semaphore 的目标值。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxSemaphoreInfo {
    pub semaphore: vk::Semaphore,
    pub stage: vk::PipelineStageFlags2,
    pub value: Option<u64>,
}

impl GfxSemaphoreInfo {
    #[inline]
    pub fn binary(semaphore: vk::Semaphore, stage: vk::PipelineStageFlags2) -> Self {
        Self {
            semaphore,
            stage,
            value: None,
        }
    }

    #[inline]
    pub fn timeline(semaphore: vk::Semaphore, stage: vk::PipelineStageFlags2, value: u64) -> Self {
        Self {
            semaphore,
            stage,
            value: Some(value),
        }
    }

    pub fn to_vk(&self) -> vk::SemaphoreSubmitInfo<'static> {
        vk::SemaphoreSubmitInfo::default()
            .semaphore(self.semaphore)
            .stage_mask(self.stage)
            .value(self.value.unwrap_or_default())
    }
}

/// Gfx 关于 submitInfo 的封装，更易用
///
/// 只保存 handle，真正提交时再组装 `vk::SubmitInfo2`。
#[derive(Clone, Debug, Default)]
pub struct GfxSubmitInfo {
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub wait_infos: Vec<GfxSemaphoreInfo>,
    pub signal_infos: Vec<GfxSemaphoreInfo>,
}

impl GfxSubmitInfo {
    pub fn new(commands: &[vk::CommandBuffer]) -> Self {
        Self {
            command_buffers: commands.to_vec(),
            wait_infos: vec![],
            signal_infos: vec![],
        }
    }

    #[inline]
    pub fn wait(mut self, semaphore: vk::Semaphore, stage: vk::PipelineStageFlags2, value: Option<u64>) -> Self {
        self.wait_infos.push(GfxSemaphoreInfo {
            semaphore,
            stage,
            value,
        });
        self
    }

    #[inline]
    pub fn signal(mut self, semaphore: vk::Semaphore, stage: vk::PipelineStageFlags2, value: Option<u64>) -> Self {
        self.signal_infos.push(GfxSemaphoreInfo {
            semaphore,
            stage,
            value,
        });
        self
    }
}

/// 呈现请求
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GfxPresentInfo {
    pub swapchain: vk::SwapchainKHR,
    pub image_index: u32,
    pub wait_semaphores: Vec<vk::Semaphore>,
}
