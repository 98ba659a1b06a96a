//! 管线布局（来自 shader 反射）与描述符写入的描述

use ash::vk;

/// 一个 descriptor binding 的反射信息
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxDescriptorBindingDesc {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
    /// shader 中声明为 readonly 的 storage 资源
    pub read_only: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct GfxDescriptorSetLayoutDesc {
    pub set: u32,
    pub bindings: Vec<GfxDescriptorBindingDesc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxPushConstantRange {
    pub stages: vk::ShaderStageFlags,
    pub offset: u32,
    pub size: u32,
}

/// 管线布局：descriptor set layouts + push constant ranges
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct GfxPipelineLayoutDesc {
    pub sets: Vec<GfxDescriptorSetLayoutDesc>,
    pub push_constants: Vec<GfxPushConstantRange>,
}

impl GfxPipelineLayoutDesc {
    pub fn binding(&self, set: u32, binding: u32) -> Option<&GfxDescriptorBindingDesc> {
        self.sets.iter().find(|s| s.set == set)?.bindings.iter().find(|b| b.binding == binding)
    }

    /// 覆盖 `[offset, offset + size)` 的所有 push constant range 的 stage 并集
    ///
    /// 没有任何 range 覆盖时返回 `None`
    pub fn push_constant_stages(&self, offset: u32, size: u32) -> Option<vk::ShaderStageFlags> {
        let end = offset.checked_add(size)?;
        let stages = self
            .push_constants
            .iter()
            .filter(|r| r.offset <= offset && end <= r.offset + r.size)
            .fold(vk::ShaderStageFlags::empty(), |acc, r| acc | r.stages);
        if stages.is_empty() { None } else { Some(stages) }
    }
}

/// 写入 descriptor 的具体资源
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GfxDescriptorResource {
    Buffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    Image {
        view: vk::ImageView,
        layout: vk::ImageLayout,
    },
    CombinedImageSampler {
        view: vk::ImageView,
        layout: vk::ImageLayout,
        sampler: vk::Sampler,
    },
    Sampler(vk::Sampler),
    AccelerationStructure(vk::AccelerationStructureKHR),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxDescriptorWrite {
    pub binding: u32,
    pub array_element: u32,
    pub descriptor_type: vk::DescriptorType,
    pub resource: GfxDescriptorResource,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> GfxPipelineLayoutDesc {
        GfxPipelineLayoutDesc {
            sets: vec![GfxDescriptorSetLayoutDesc {
                set: 1,
                bindings: vec![GfxDescriptorBindingDesc {
                    binding: 3,
                    descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
                    count: 1,
                    stages: vk::ShaderStageFlags::COMPUTE,
                    read_only: false,
                }],
            }],
            push_constants: vec![
                GfxPushConstantRange {
                    stages: vk::ShaderStageFlags::VERTEX,
                    offset: 0,
                    size: 64,
                },
                GfxPushConstantRange {
                    stages: vk::ShaderStageFlags::FRAGMENT,
                    offset: 0,
                    size: 16,
                },
            ],
        }
    }

    #[test]
    fn test_binding_lookup() {
        let layout = layout();
        assert!(layout.binding(1, 3).is_some());
        assert!(layout.binding(0, 3).is_none());
        assert!(layout.binding(1, 0).is_none());
    }

    #[test]
    fn test_push_constant_stages() {
        let layout = layout();
        assert_eq!(
            layout.push_constant_stages(0, 16),
            Some(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
        );
        assert_eq!(layout.push_constant_stages(32, 16), Some(vk::ShaderStageFlags::VERTEX));
        assert_eq!(layout.push_constant_stages(60, 16), None);
    }
}
