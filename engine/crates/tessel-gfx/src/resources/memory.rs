//! 可插拔的显存分配器接口
//!
//! 分配策略不属于这一层，`GfxDevice` 只负责向分配器要一块 memory 并绑定。

use ash::vk;

use crate::GfxResult;

#[derive(Clone, Copy, Debug)]
pub struct GfxMemoryRequest {
    pub requirements: vk::MemoryRequirements,
    /// 是否需要 CPU 可见
    pub host_visible: bool,
    /// buffer 需要 device address 时，分配的 memory 也需要对应的 flag
    pub device_address: bool,
}

/// 分配器返回的不透明 memory 句柄
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxMemoryBlock {
    pub memory: vk::DeviceMemory,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
    /// 分配器内部使用的标识
    pub allocation_id: u64,
}

pub trait GfxMemoryAllocator: Send + Sync {
    fn allocate(&self, request: &GfxMemoryRequest) -> GfxResult<GfxMemoryBlock>;
    fn free(&self, block: GfxMemoryBlock);
}
