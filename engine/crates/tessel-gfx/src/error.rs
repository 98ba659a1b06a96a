use ash::vk;

/// 原生 API 调用失败
#[derive(Debug, thiserror::Error)]
pub enum GfxError {
    #[error("vulkan call failed: {0}")]
    Vk(#[from] vk::Result),

    #[error("device lost")]
    DeviceLost,

    #[error("out of device memory")]
    OutOfMemory,

    #[error("feature not supported by this device: {0}")]
    Unsupported(&'static str),

    #[error("invalid native handle: {0}")]
    InvalidHandle(String),
}

impl GfxError {
    /// 把 vk::Result 归类到更具体的错误
    pub fn from_vk(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => Self::OutOfMemory,
            other => Self::Vk(other),
        }
    }
}

pub type GfxResult<T> = Result<T, GfxError>;
