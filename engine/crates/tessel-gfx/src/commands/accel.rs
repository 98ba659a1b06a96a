//! 加速结构构建与光追派发的参数

use ash::vk;

/// 加速结构的几何输入，地址都是 buffer device address
#[derive(Clone, Copy, Debug)]
pub enum GfxAccelGeometry {
    Triangles {
        vertex_address: vk::DeviceAddress,
        vertex_stride: vk::DeviceSize,
        vertex_format: vk::Format,
        max_vertex: u32,
        index_address: vk::DeviceAddress,
        index_type: vk::IndexType,
        transform_address: vk::DeviceAddress,
        primitive_count: u32,
        opaque: bool,
    },
    Aabbs {
        data_address: vk::DeviceAddress,
        stride: vk::DeviceSize,
        primitive_count: u32,
        opaque: bool,
    },
    Instances {
        data_address: vk::DeviceAddress,
        instance_count: u32,
    },
}

impl GfxAccelGeometry {
    #[inline]
    pub fn primitive_count(&self) -> u32 {
        match *self {
            Self::Triangles { primitive_count, .. } | Self::Aabbs { primitive_count, .. } => primitive_count,
            Self::Instances { instance_count, .. } => instance_count,
        }
    }
}

/// 一次加速结构构建
#[derive(Clone, Debug)]
pub struct GfxAccelStructBuild {
    pub ty: vk::AccelerationStructureTypeKHR,
    pub flags: vk::BuildAccelerationStructureFlagsKHR,
    /// `Some` 表示基于已有结构做 update
    pub src: Option<vk::AccelerationStructureKHR>,
    pub dst: vk::AccelerationStructureKHR,
    pub scratch_address: vk::DeviceAddress,
    pub geometries: Vec<GfxAccelGeometry>,
}

/// `vkCmdTraceRaysKHR` 的参数
#[derive(Clone, Copy, Debug, Default)]
pub struct GfxTraceRays {
    pub raygen: vk::StridedDeviceAddressRegionKHR,
    pub miss: vk::StridedDeviceAddressRegionKHR,
    pub hit: vk::StridedDeviceAddressRegionKHR,
    pub callable: vk::StridedDeviceAddressRegionKHR,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}
