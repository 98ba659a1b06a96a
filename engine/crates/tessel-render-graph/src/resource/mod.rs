//! 跨 recording 共享的资源
//!
//! [`manager::RgResourceManager`] 保存所有 image / buffer / sampler / pipeline / 加速结构 / swapchain，
//! 以及每个资源在 recording 之间传递的已提交状态。

pub mod manager;
mod pool;

use ash::vk;

use crate::resource_state::RgUsage;

/// recording 解析资源时得到的原生对象
#[derive(Clone, Copy, Debug)]
pub enum RgNativeResource {
    Image {
        image: vk::Image,
        view: vk::ImageView,
        format: vk::Format,
        extent: vk::Extent3D,
        samples: vk::SampleCountFlags,
        range: vk::ImageSubresourceRange,
    },
    Buffer {
        buffer: vk::Buffer,
        size: vk::DeviceSize,
        device_address: vk::DeviceAddress,
    },
    AccelStruct {
        handle: vk::AccelerationStructureKHR,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
        device_address: vk::DeviceAddress,
    },
}

impl RgNativeResource {
    /// 用于 buffer barrier 的 buffer，加速结构使用承载它的 buffer
    pub fn barrier_buffer(&self) -> Option<(vk::Buffer, vk::DeviceSize)> {
        match *self {
            Self::Buffer { buffer, size, .. } | Self::AccelStruct { buffer, size, .. } => Some((buffer, size)),
            Self::Image { .. } => None,
        }
    }

    pub fn device_address(&self) -> vk::DeviceAddress {
        match *self {
            Self::Buffer { device_address, .. } | Self::AccelStruct { device_address, .. } => device_address,
            Self::Image { .. } => 0,
        }
    }
}

/// recording 第一次引用资源时从 manager 取得的快照
#[derive(Clone, Debug)]
pub struct RgResourceSnapshot {
    pub name: String,
    pub native: RgNativeResource,
    /// 上一个 recording 提交的状态
    pub current: RgUsage,
    /// recording 结束时资源需要回到的状态
    pub default: RgUsage,
}
