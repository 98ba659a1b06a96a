//! Pipeline 描述与 task 绑定的资源
//!
//! pipeline 对象本身由外部创建，frame graph 只关心它的反射布局：
//! 每个绑定的 descriptor 类型和 shader stage 决定了资源被以什么方式访问。

use std::collections::BTreeMap;

use ash::vk;
use itertools::Itertools;
use tessel_gfx::commands::descriptor::{GfxDescriptorResource, GfxDescriptorWrite, GfxPipelineLayoutDesc};

use crate::error::{RgError, RgResult};
use crate::handle::{RgBufferId, RgImageId, RgRawResource, RgRtSceneId, RgSamplerId};
use crate::pass::RgPassContext;
use crate::resource_state::RgUsage;

/// 图形管线的输出，用于检查与 render pass 的兼容性
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgGraphicsOutputs {
    pub color_formats: Vec<vk::Format>,
    pub depth_format: Option<vk::Format>,
    pub samples: vk::SampleCountFlags,
    /// 开启了深度写入
    pub depth_write: bool,
}

#[derive(Clone, Debug)]
pub struct RgPipelineDesc {
    pub name: String,
    pub bind_point: vk::PipelineBindPoint,
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    /// shader 反射得到的布局
    pub layout_desc: GfxPipelineLayoutDesc,
    /// 只有图形管线有
    pub graphics: Option<RgGraphicsOutputs>,
}

impl RgPipelineDesc {
    pub fn compute(
        name: impl Into<String>,
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
        layout_desc: GfxPipelineLayoutDesc,
    ) -> Self {
        Self {
            name: name.into(),
            bind_point: vk::PipelineBindPoint::COMPUTE,
            pipeline,
            layout,
            layout_desc,
            graphics: None,
        }
    }

    pub fn graphics(
        name: impl Into<String>,
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
        layout_desc: GfxPipelineLayoutDesc,
        outputs: RgGraphicsOutputs,
    ) -> Self {
        Self {
            name: name.into(),
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            pipeline,
            layout,
            layout_desc,
            graphics: Some(outputs),
        }
    }

    pub fn ray_tracing(
        name: impl Into<String>,
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
        layout_desc: GfxPipelineLayoutDesc,
    ) -> Self {
        Self {
            name: name.into(),
            bind_point: vk::PipelineBindPoint::RAY_TRACING_KHR,
            pipeline,
            layout,
            layout_desc,
            graphics: None,
        }
    }
}

/// 绑定到某个 descriptor 的资源
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RgBinding {
    Buffer {
        buffer: RgBufferId,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    Image(RgImageId),
    CombinedImageSampler {
        image: RgImageId,
        sampler: RgSamplerId,
    },
    Sampler(RgSamplerId),
    RtScene(RgRtSceneId),
}

impl RgBinding {
    fn raw(&self) -> Option<RgRawResource> {
        match *self {
            Self::Buffer { buffer, .. } => Some(buffer.into()),
            Self::Image(image) | Self::CombinedImageSampler { image, .. } => Some(image.into()),
            Self::RtScene(scene) => Some(scene.into()),
            Self::Sampler(_) => None,
        }
    }

    fn accepts(&self, ty: vk::DescriptorType) -> bool {
        match self {
            Self::Buffer { .. } => matches!(ty, vk::DescriptorType::UNIFORM_BUFFER | vk::DescriptorType::STORAGE_BUFFER),
            Self::Image(_) => matches!(
                ty,
                vk::DescriptorType::SAMPLED_IMAGE | vk::DescriptorType::STORAGE_IMAGE | vk::DescriptorType::INPUT_ATTACHMENT
            ),
            Self::CombinedImageSampler { .. } => ty == vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Self::Sampler(_) => ty == vk::DescriptorType::SAMPLER,
            Self::RtScene(_) => ty == vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgBindingSlot {
    pub set: u32,
    pub binding: u32,
    pub array_element: u32,
    pub resource: RgBinding,
}

/// 一个 task 绑定的全部资源和 push constants
#[derive(Clone, Debug, Default)]
pub struct RgPipelineResources {
    bindings: Vec<RgBindingSlot>,
    push_constants: Vec<(u32, Vec<u8>)>,
}

// builder
impl RgPipelineResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, set: u32, binding: u32, array_element: u32, resource: RgBinding) -> Self {
        self.bindings.push(RgBindingSlot {
            set,
            binding,
            array_element,
            resource,
        });
        self
    }

    /// 绑定整个 buffer
    #[inline]
    pub fn buffer(self, set: u32, binding: u32, buffer: RgBufferId) -> Self {
        self.buffer_range(set, binding, buffer, 0, vk::WHOLE_SIZE)
    }

    #[inline]
    pub fn buffer_range(
        self,
        set: u32,
        binding: u32,
        buffer: RgBufferId,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> Self {
        self.bind(set, binding, 0, RgBinding::Buffer { buffer, offset, range })
    }

    #[inline]
    pub fn image(self, set: u32, binding: u32, image: RgImageId) -> Self {
        self.bind(set, binding, 0, RgBinding::Image(image))
    }

    #[inline]
    pub fn sampled_image(self, set: u32, binding: u32, image: RgImageId, sampler: RgSamplerId) -> Self {
        self.bind(set, binding, 0, RgBinding::CombinedImageSampler { image, sampler })
    }

    #[inline]
    pub fn sampler(self, set: u32, binding: u32, sampler: RgSamplerId) -> Self {
        self.bind(set, binding, 0, RgBinding::Sampler(sampler))
    }

    #[inline]
    pub fn rt_scene(self, set: u32, binding: u32, scene: RgRtSceneId) -> Self {
        self.bind(set, binding, 0, RgBinding::RtScene(scene))
    }

    /// 以 `offset` 写入一段 push constant
    pub fn push_constants<T: bytemuck::Pod>(mut self, offset: u32, value: &T) -> Self {
        self.push_constants.push((offset, bytemuck::bytes_of(value).to_vec()));
        self
    }
}

// getters
impl RgPipelineResources {
    #[inline]
    pub fn bindings(&self) -> &[RgBindingSlot] {
        &self.bindings
    }

    /// 被 state tracker 跟踪的资源
    pub fn resources(&self) -> impl Iterator<Item = RgRawResource> + '_ {
        self.bindings.iter().filter_map(|slot| slot.resource.raw())
    }

    pub fn samplers(&self) -> impl Iterator<Item = RgSamplerId> + '_ {
        self.bindings.iter().filter_map(|slot| match slot.resource {
            RgBinding::Sampler(sampler) | RgBinding::CombinedImageSampler { sampler, .. } => Some(sampler),
            _ => None,
        })
    }
}

// 校验与访问推导
impl RgPipelineResources {
    /// 检查每个绑定都存在于 pipeline 的布局中，并且类型匹配
    pub fn validate(&self, pipeline: &RgPipelineDesc, task: &str) -> RgResult<()> {
        let mismatch = |reason: String| RgError::BindingMismatch {
            task: task.to_string(),
            reason,
        };

        for slot in &self.bindings {
            let desc = pipeline.layout_desc.binding(slot.set, slot.binding).ok_or_else(|| {
                mismatch(format!(
                    "pipeline \"{}\" has no binding (set {}, binding {})",
                    pipeline.name, slot.set, slot.binding
                ))
            })?;
            if !slot.resource.accepts(desc.descriptor_type) {
                return Err(mismatch(format!(
                    "(set {}, binding {}) is {:?}, cannot bind {:?}",
                    slot.set, slot.binding, desc.descriptor_type, slot.resource
                )));
            }
            if slot.array_element >= desc.count {
                return Err(mismatch(format!(
                    "(set {}, binding {}) array element {} out of range {}",
                    slot.set, slot.binding, slot.array_element, desc.count
                )));
            }
        }

        if let Some((a, b)) = self.bindings.iter().tuple_combinations().find(|(a, b)| {
            (a.set, a.binding, a.array_element) == (b.set, b.binding, b.array_element)
        }) {
            return Err(mismatch(format!(
                "(set {}, binding {}, element {}) is bound twice",
                a.set, b.binding, a.array_element
            )));
        }

        for (offset, data) in &self.push_constants {
            if pipeline.layout_desc.push_constant_stages(*offset, data.len() as u32).is_none() {
                return Err(mismatch(format!(
                    "push constants [{}, {}) are not covered by pipeline \"{}\"",
                    offset,
                    *offset as usize + data.len(),
                    pipeline.name
                )));
            }
        }
        Ok(())
    }

    /// 每个绑定对应的资源访问，未合并
    ///
    /// 调用前需要已经通过 `validate`
    pub fn accesses(&self, pipeline: &RgPipelineDesc) -> Vec<(RgRawResource, RgUsage)> {
        self.bindings
            .iter()
            .filter_map(|slot| {
                let raw = slot.resource.raw()?;
                let desc = pipeline.layout_desc.binding(slot.set, slot.binding)?;
                let stage = shader_stages_to_pipeline_stages(desc.stages);
                descriptor_usage(desc.descriptor_type, desc.read_only, stage).map(|usage| (raw, usage))
            })
            .collect()
    }
}

// 录制
impl RgPipelineResources {
    /// 绑定 pipeline，推送 descriptor 和 push constants
    pub fn emit(&self, ctx: &mut RgPassContext<'_>, pipeline: &RgPipelineDesc, task: &str) -> RgResult<()> {
        ctx.encoder.bind_pipeline(pipeline.bind_point, pipeline.pipeline);

        let mut sets: BTreeMap<u32, Vec<GfxDescriptorWrite>> = BTreeMap::new();
        for slot in &self.bindings {
            let Some(desc) = pipeline.layout_desc.binding(slot.set, slot.binding) else {
                continue;
            };
            let resource = self.native_descriptor(ctx, slot).ok_or_else(|| RgError::BindingMismatch {
                task: task.to_string(),
                reason: format!("(set {}, binding {}) references a destroyed resource", slot.set, slot.binding),
            })?;
            sets.entry(slot.set).or_default().push(GfxDescriptorWrite {
                binding: slot.binding,
                array_element: slot.array_element,
                descriptor_type: desc.descriptor_type,
                resource,
            });
        }
        for (set, writes) in &sets {
            ctx.encoder.push_descriptor_set(pipeline.bind_point, pipeline.layout, *set, writes);
        }

        for (offset, data) in &self.push_constants {
            if let Some(stages) = pipeline.layout_desc.push_constant_stages(*offset, data.len() as u32) {
                ctx.encoder.push_constants(pipeline.layout, stages, *offset, data);
            }
        }
        Ok(())
    }

    /// image descriptor 使用 tracker 此刻记录的 layout，同一个 image 以多种方式绑定时它们是一致的
    fn native_descriptor(&self, ctx: &RgPassContext<'_>, slot: &RgBindingSlot) -> Option<GfxDescriptorResource> {
        Some(match slot.resource {
            RgBinding::Buffer { buffer, offset, range } => GfxDescriptorResource::Buffer {
                buffer: ctx.get_buffer(buffer)?,
                offset,
                range,
            },
            RgBinding::Image(image) => {
                let (_, view, layout) = ctx.get_image(image)?;
                GfxDescriptorResource::Image { view, layout }
            }
            RgBinding::CombinedImageSampler { image, sampler } => {
                let (_, view, layout) = ctx.get_image(image)?;
                GfxDescriptorResource::CombinedImageSampler {
                    view,
                    layout,
                    sampler: ctx.get_sampler(sampler)?,
                }
            }
            RgBinding::Sampler(sampler) => GfxDescriptorResource::Sampler(ctx.get_sampler(sampler)?),
            RgBinding::RtScene(scene) => GfxDescriptorResource::AccelerationStructure(ctx.get_rt_scene(scene)?),
        })
    }
}

/// shader stage 到 pipeline stage 的映射
pub fn shader_stages_to_pipeline_stages(stages: vk::ShaderStageFlags) -> vk::PipelineStageFlags2 {
    const MAPPING: [(vk::ShaderStageFlags, vk::PipelineStageFlags2); 13] = [
        (vk::ShaderStageFlags::VERTEX, vk::PipelineStageFlags2::VERTEX_SHADER),
        (vk::ShaderStageFlags::TESSELLATION_CONTROL, vk::PipelineStageFlags2::TESSELLATION_CONTROL_SHADER),
        (vk::ShaderStageFlags::TESSELLATION_EVALUATION, vk::PipelineStageFlags2::TESSELLATION_EVALUATION_SHADER),
        (vk::ShaderStageFlags::GEOMETRY, vk::PipelineStageFlags2::GEOMETRY_SHADER),
        (vk::ShaderStageFlags::FRAGMENT, vk::PipelineStageFlags2::FRAGMENT_SHADER),
        (vk::ShaderStageFlags::COMPUTE, vk::PipelineStageFlags2::COMPUTE_SHADER),
        (vk::ShaderStageFlags::TASK_EXT, vk::PipelineStageFlags2::TASK_SHADER_EXT),
        (vk::ShaderStageFlags::MESH_EXT, vk::PipelineStageFlags2::MESH_SHADER_EXT),
        (vk::ShaderStageFlags::RAYGEN_KHR, vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR),
        (vk::ShaderStageFlags::MISS_KHR, vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR),
        (vk::ShaderStageFlags::CLOSEST_HIT_KHR, vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR),
        (vk::ShaderStageFlags::ANY_HIT_KHR, vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR),
        (vk::ShaderStageFlags::INTERSECTION_KHR, vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR),
    ];
    MAPPING
        .iter()
        .filter(|(shader, _)| stages.intersects(*shader))
        .fold(vk::PipelineStageFlags2::NONE, |acc, (_, stage)| acc | *stage)
}

/// descriptor 类型对应的资源访问，sampler 不是被跟踪的资源，返回 `None`
fn descriptor_usage(ty: vk::DescriptorType, read_only: bool, stage: vk::PipelineStageFlags2) -> Option<RgUsage> {
    let (access, layout) = match ty {
        vk::DescriptorType::UNIFORM_BUFFER => (vk::AccessFlags2::UNIFORM_READ, vk::ImageLayout::UNDEFINED),
        vk::DescriptorType::STORAGE_BUFFER if read_only => {
            (vk::AccessFlags2::SHADER_STORAGE_READ, vk::ImageLayout::UNDEFINED)
        }
        vk::DescriptorType::STORAGE_BUFFER => (
            vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE,
            vk::ImageLayout::UNDEFINED,
        ),
        vk::DescriptorType::SAMPLED_IMAGE | vk::DescriptorType::COMBINED_IMAGE_SAMPLER => {
            (vk::AccessFlags2::SHADER_SAMPLED_READ, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        }
        vk::DescriptorType::STORAGE_IMAGE if read_only => {
            (vk::AccessFlags2::SHADER_STORAGE_READ, vk::ImageLayout::GENERAL)
        }
        vk::DescriptorType::STORAGE_IMAGE => (
            vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE,
            vk::ImageLayout::GENERAL,
        ),
        vk::DescriptorType::INPUT_ATTACHMENT => {
            (vk::AccessFlags2::INPUT_ATTACHMENT_READ, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        }
        vk::DescriptorType::ACCELERATION_STRUCTURE_KHR => {
            (vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR, vk::ImageLayout::UNDEFINED)
        }
        _ => return None,
    };
    Some(RgUsage { stage, access, layout })
}

#[cfg(test)]
mod tests {
    use slotmap::KeyData;
    use tessel_gfx::commands::descriptor::{GfxDescriptorBindingDesc, GfxDescriptorSetLayoutDesc, GfxPushConstantRange};

    use super::*;

    fn pipeline() -> RgPipelineDesc {
        let binding = |binding, descriptor_type, read_only| GfxDescriptorBindingDesc {
            binding,
            descriptor_type,
            count: 1,
            stages: vk::ShaderStageFlags::COMPUTE,
            read_only,
        };
        RgPipelineDesc::compute(
            "blur",
            vk::Pipeline::null(),
            vk::PipelineLayout::null(),
            GfxPipelineLayoutDesc {
                sets: vec![GfxDescriptorSetLayoutDesc {
                    set: 0,
                    bindings: vec![
                        binding(0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, true),
                        binding(1, vk::DescriptorType::STORAGE_IMAGE, false),
                        binding(2, vk::DescriptorType::STORAGE_BUFFER, true),
                    ],
                }],
                push_constants: vec![GfxPushConstantRange {
                    stages: vk::ShaderStageFlags::COMPUTE,
                    offset: 0,
                    size: 16,
                }],
            },
        )
    }

    fn image(n: u64) -> RgImageId {
        RgImageId::from(KeyData::from_ffi(n))
    }

    #[test]
    fn test_accesses_follow_descriptor_types() {
        let buffer = RgBufferId::from(KeyData::from_ffi(7));
        let resources = RgPipelineResources::new()
            .sampled_image(0, 0, image(1), RgSamplerId::default())
            .image(0, 1, image(2))
            .buffer(0, 2, buffer);
        let pipeline = pipeline();
        resources.validate(&pipeline, "blur").unwrap();

        let accesses = resources.accesses(&pipeline);
        assert_eq!(accesses.len(), 3);
        assert_eq!(accesses[0].1.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert!(!accesses[0].1.is_write());
        assert_eq!(accesses[1].1.layout, vk::ImageLayout::GENERAL);
        assert!(accesses[1].1.is_write());
        assert_eq!(accesses[2].1.access, vk::AccessFlags2::SHADER_STORAGE_READ);
        assert!(accesses.iter().all(|(_, u)| u.stage == vk::PipelineStageFlags2::COMPUTE_SHADER));
    }

    #[test]
    fn test_validate_rejects_mismatches() {
        let pipeline = pipeline();
        let missing = RgPipelineResources::new().image(1, 0, image(1));
        assert!(matches!(missing.validate(&pipeline, "t"), Err(RgError::BindingMismatch { .. })));

        let wrong_type = RgPipelineResources::new().image(0, 0, image(1));
        assert!(wrong_type.validate(&pipeline, "t").is_err());

        let twice = RgPipelineResources::new().image(0, 1, image(1)).image(0, 1, image(2));
        assert!(twice.validate(&pipeline, "t").is_err());

        let push = RgPipelineResources::new().push_constants(8, &[0u32; 4]);
        assert!(push.validate(&pipeline, "t").is_err());
        let push = RgPipelineResources::new().push_constants(0, &[1.0f32; 4]);
        assert!(push.validate(&pipeline, "t").is_ok());
    }

    #[test]
    fn test_stage_mapping() {
        assert_eq!(
            shader_stages_to_pipeline_stages(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT),
            vk::PipelineStageFlags2::VERTEX_SHADER | vk::PipelineStageFlags2::FRAGMENT_SHADER
        );
        assert_eq!(
            shader_stages_to_pipeline_stages(vk::ShaderStageFlags::RAYGEN_KHR | vk::ShaderStageFlags::MISS_KHR),
            vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR
        );
    }
}
