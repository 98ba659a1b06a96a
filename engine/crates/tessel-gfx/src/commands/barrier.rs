use ash::vk;

/// 一条依赖两侧的 stage 与 access
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct GfxBarrierMask {
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_access: vk::AccessFlags2,
}

/// image memory barrier 的 builder
///
/// 只保存 handle 和 flags，录制时再转换为 `vk::ImageMemoryBarrier2`，因此可以跨线程传递。
#[derive(Copy, Clone, Debug)]
pub struct GfxImageBarrier {
    pub image: vk::Image,
    pub mask: GfxBarrierMask,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_queue_family_index: u32,
    pub dst_queue_family_index: u32,
    pub subresource_range: vk::ImageSubresourceRange,
}

impl Default for GfxImageBarrier {
    fn default() -> Self {
        Self {
            image: vk::Image::null(),
            mask: GfxBarrierMask::default(),
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::UNDEFINED,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::empty(),
                base_array_layer: 0,
                layer_count: 1,
                base_mip_level: 0,
                level_count: 1,
            },
        }
    }
}

impl GfxImageBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// builder
    #[inline]
    pub fn layout_transfer(mut self, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        self.old_layout = old_layout;
        self.new_layout = new_layout;
        self
    }

    /// builder
    #[inline]
    pub fn src_mask(mut self, src_stage_mask: vk::PipelineStageFlags2, src_access_mask: vk::AccessFlags2) -> Self {
        self.mask.src_stage = src_stage_mask;
        self.mask.src_access = src_access_mask;
        self
    }

    /// builder
    #[inline]
    pub fn dst_mask(mut self, dst_stage_mask: vk::PipelineStageFlags2, dst_access_mask: vk::AccessFlags2) -> Self {
        self.mask.dst_stage = dst_stage_mask;
        self.mask.dst_access = dst_access_mask;
        self
    }

    /// 覆盖全部 mip level 和 array layer，只指定 aspect
    #[inline]
    pub fn image_aspect_flag(mut self, aspect_mask: vk::ImageAspectFlags) -> Self {
        self.subresource_range.aspect_mask = aspect_mask;
        self
    }

    /// builder
    #[inline]
    pub fn subresource_range(mut self, range: vk::ImageSubresourceRange) -> Self {
        self.subresource_range = range;
        self
    }

    /// builder
    #[inline]
    pub fn image(mut self, image: vk::Image) -> Self {
        self.image = image;
        self
    }

    pub fn to_vk(&self) -> vk::ImageMemoryBarrier2<'static> {
        vk::ImageMemoryBarrier2::default()
            .image(self.image)
            .src_stage_mask(self.mask.src_stage)
            .src_access_mask(self.mask.src_access)
            .dst_stage_mask(self.mask.dst_stage)
            .dst_access_mask(self.mask.dst_access)
            .old_layout(self.old_layout)
            .new_layout(self.new_layout)
            .src_queue_family_index(self.src_queue_family_index)
            .dst_queue_family_index(self.dst_queue_family_index)
            .subresource_range(self.subresource_range)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxBufferBarrier {
    pub buffer: vk::Buffer,
    pub mask: GfxBarrierMask,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
    pub src_queue_family_index: u32,
    pub dst_queue_family_index: u32,
}

impl Default for GfxBufferBarrier {
    fn default() -> Self {
        Self {
            buffer: vk::Buffer::null(),
            mask: GfxBarrierMask::default(),
            offset: 0,
            size: vk::WHOLE_SIZE,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        }
    }
}

impl GfxBufferBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn src_mask(mut self, src_stage_mask: vk::PipelineStageFlags2, src_access_mask: vk::AccessFlags2) -> Self {
        self.mask.src_stage = src_stage_mask;
        self.mask.src_access = src_access_mask;
        self
    }

    #[inline]
    pub fn dst_mask(mut self, dst_stage_mask: vk::PipelineStageFlags2, dst_access_mask: vk::AccessFlags2) -> Self {
        self.mask.dst_stage = dst_stage_mask;
        self.mask.dst_access = dst_access_mask;
        self
    }

    #[inline]
    pub fn mask(mut self, mask: GfxBarrierMask) -> Self {
        self.mask = mask;
        self
    }

    #[inline]
    pub fn buffer(mut self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize) -> Self {
        self.buffer = buffer;
        self.offset = offset;
        self.size = size;
        self
    }

    pub fn to_vk(&self) -> vk::BufferMemoryBarrier2<'static> {
        vk::BufferMemoryBarrier2::default()
            .buffer(self.buffer)
            .offset(self.offset)
            .size(self.size)
            .src_stage_mask(self.mask.src_stage)
            .src_access_mask(self.mask.src_access)
            .dst_stage_mask(self.mask.dst_stage)
            .dst_access_mask(self.mask.dst_access)
            .src_queue_family_index(self.src_queue_family_index)
            .dst_queue_family_index(self.dst_queue_family_index)
    }
}

/// 不针对具体资源的全局 memory barrier
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct GfxMemoryBarrier {
    pub mask: GfxBarrierMask,
}

impl GfxMemoryBarrier {
    #[inline]
    pub fn new(mask: GfxBarrierMask) -> Self {
        Self { mask }
    }

    pub fn to_vk(&self) -> vk::MemoryBarrier2<'static> {
        vk::MemoryBarrier2::default()
            .src_stage_mask(self.mask.src_stage)
            .src_access_mask(self.mask.src_access)
            .dst_stage_mask(self.mask.dst_stage)
            .dst_access_mask(self.mask.dst_access)
    }
}

/// 一次 `vkCmdPipelineBarrier2` 调用携带的全部 barrier
#[derive(Clone, Debug, Default)]
pub struct GfxDependencyInfo {
    pub memory_barriers: Vec<GfxMemoryBarrier>,
    pub buffer_barriers: Vec<GfxBufferBarrier>,
    pub image_barriers: Vec<GfxImageBarrier>,
}

impl GfxDependencyInfo {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.memory_barriers.is_empty() && self.buffer_barriers.is_empty() && self.image_barriers.is_empty()
    }

    /// barrier 描述符的总数
    #[inline]
    pub fn barrier_count(&self) -> usize {
        self.memory_barriers.len() + self.buffer_barriers.len() + self.image_barriers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_barriers_never_transfer_queue_ownership() {
        let image = GfxImageBarrier::new()
            .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL)
            .image_aspect_flag(vk::ImageAspectFlags::COLOR)
            .to_vk();
        assert_eq!(image.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(image.dst_queue_family_index, vk::QUEUE_FAMILY_IGNORED);

        let buffer = GfxBufferBarrier::new().buffer(vk::Buffer::null(), 0, vk::WHOLE_SIZE).to_vk();
        assert_eq!(buffer.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(buffer.dst_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
    }
}
