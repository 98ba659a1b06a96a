use ash::vk;

use crate::resources::memory::GfxMemoryBlock;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxBufferDesc {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub host_visible: bool,
}

impl GfxBufferDesc {
    #[inline]
    pub fn new(size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Self {
        Self {
            size,
            usage,
            host_visible: false,
        }
    }

    #[inline]
    pub fn host_visible(mut self) -> Self {
        self.host_visible = true;
        self
    }

    #[inline]
    pub fn needs_device_address(&self) -> bool {
        self.usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GfxBufferAllocation {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    /// 0 表示没有 device address
    pub device_address: vk::DeviceAddress,
    pub memory: Option<GfxMemoryBlock>,
}

/// 加速结构以及承载它的 buffer
#[derive(Clone, Copy, Debug)]
pub struct GfxAccelStructAllocation {
    pub handle: vk::AccelerationStructureKHR,
    pub ty: vk::AccelerationStructureTypeKHR,
    pub device_address: vk::DeviceAddress,
    pub buffer: GfxBufferAllocation,
}
