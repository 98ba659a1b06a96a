use ash::vk;

use crate::resources::memory::GfxMemoryBlock;

#[derive(Clone, Copy, Debug)]
pub struct GfxImageDesc {
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub usage: vk::ImageUsageFlags,
    pub flags: vk::ImageCreateFlags,
}

impl GfxImageDesc {
    /// 常用的 2D image
    pub fn new_2d(width: u32, height: u32, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            usage,
            flags: vk::ImageCreateFlags::empty(),
        }
    }

    #[inline]
    pub fn with_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    #[inline]
    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    #[inline]
    pub fn with_array_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }

    /// 默认 view 的类型
    pub fn default_view_type(&self) -> vk::ImageViewType {
        match (self.image_type, self.array_layers > 1) {
            (vk::ImageType::TYPE_1D, false) => vk::ImageViewType::TYPE_1D,
            (vk::ImageType::TYPE_1D, true) => vk::ImageViewType::TYPE_1D_ARRAY,
            (vk::ImageType::TYPE_3D, _) => vk::ImageViewType::TYPE_3D,
            (_, true) if self.flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE) => vk::ImageViewType::CUBE,
            (_, true) => vk::ImageViewType::TYPE_2D_ARRAY,
            _ => vk::ImageViewType::TYPE_2D,
        }
    }
}

/// 创建好的 image 以及它的默认 view
#[derive(Clone, Copy, Debug)]
pub struct GfxImageAllocation {
    pub image: vk::Image,
    pub view: vk::ImageView,
    /// 外部导入的 image 没有 memory
    pub memory: Option<GfxMemoryBlock>,
}
