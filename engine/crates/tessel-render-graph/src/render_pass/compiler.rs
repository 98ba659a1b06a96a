//! 逻辑 pass 到原生 render pass 的编译
//!
//! 一组相邻并且兼容的逻辑 pass 编译为一个原生 render pass，每个逻辑 pass 是其中的一个 subpass。
//! attachment 的 layout 转换在 render pass 之外由 barrier 完成，因此 attachment 的初始和最终 layout 相同。

use ash::vk;
use tessel_gfx::commands::render_pass::{
    GfxAttachmentDesc, GfxAttachmentRef, GfxClearValue, GfxFramebufferDesc, GfxRenderPassBegin, GfxRenderPassDesc,
    GfxSubpassDependency, GfxSubpassDesc,
};

use crate::error::{RgError, RgResult};
use crate::handle::RgImageId;
use crate::local_registry::RgLocalRegistry;
use crate::pass::RgPassContext;
use crate::render_pass::cache::RgRenderPassCache;
use crate::render_pass::{RgDrawEntry, RgDrawKind, RgLogicalPass};
use crate::stats::RgRenderingStats;

const ATTACHMENT_STAGES: vk::PipelineStageFlags2 = vk::PipelineStageFlags2::from_raw(
    vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT.as_raw()
        | vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw()
        | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
);

const ATTACHMENT_WRITES: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
    vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw() | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw(),
);

const ATTACHMENT_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
    ATTACHMENT_WRITES.as_raw()
        | vk::AccessFlags2::COLOR_ATTACHMENT_READ.as_raw()
        | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ.as_raw(),
);

/// 编译结果，render pass 对象本身在录制时从缓存取得
#[derive(Debug)]
pub(crate) struct RgNativePassPlan {
    pub(crate) desc: GfxRenderPassDesc,
    pub(crate) views: Vec<vk::ImageView>,
    pub(crate) clear_values: Vec<GfxClearValue>,
    pub(crate) extent: vk::Extent2D,
}

#[derive(Default)]
struct RgAttachmentTable {
    images: Vec<RgImageId>,
    descs: Vec<GfxAttachmentDesc>,
    views: Vec<vk::ImageView>,
    clear_values: Vec<GfxClearValue>,
}

impl RgAttachmentTable {
    /// 同一个 image 在多个 subpass 中只占用一个 attachment，store 以最后一次使用为准
    fn insert(
        &mut self,
        image: RgImageId,
        desc: GfxAttachmentDesc,
        clear: GfxClearValue,
        registry: &RgLocalRegistry,
    ) -> RgResult<u32> {
        if let Some(index) = self.images.iter().position(|i| *i == image) {
            let existing = &mut self.descs[index];
            existing.store_op = desc.store_op;
            existing.stencil_store_op = desc.stencil_store_op;
            return Ok(index as u32);
        }
        let (_, view, _) = registry.image(image).ok_or_else(|| RgError::invalid_handle("image", image))?;
        self.images.push(image);
        self.descs.push(desc);
        self.views.push(view);
        self.clear_values.push(clear);
        Ok((self.images.len() - 1) as u32)
    }
}

/// 把一组逻辑 pass 编译为一个原生 render pass 的描述
pub(crate) fn plan_native_pass(passes: &[&RgLogicalPass], registry: &RgLocalRegistry) -> RgResult<RgNativePassPlan> {
    let Some(first) = passes.first() else {
        return Err(RgError::AttachmentMismatch {
            pass: String::new(),
            reason: "no logical pass to compile".to_string(),
        });
    };

    let mut table = RgAttachmentTable::default();
    let mut subpasses = Vec::with_capacity(passes.len());
    for pass in passes {
        let mut subpass = GfxSubpassDesc::default();
        for (color, format) in pass.desc.color_attachments.iter().zip(&pass.color_formats) {
            let layout = RgLogicalPass::color_usage(color).layout;
            let attachment = table.insert(
                color.image,
                GfxAttachmentDesc {
                    format: *format,
                    samples: pass.samples,
                    load_op: color.load_op,
                    store_op: color.store_op,
                    stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                    stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                    initial_layout: layout,
                    final_layout: layout,
                },
                GfxClearValue::Color(color.clear),
                registry,
            )?;
            subpass.color_attachments.push(GfxAttachmentRef { attachment, layout });
        }
        if let (Some(depth), Some(format), Some(usage)) =
            (pass.desc.depth_attachment, pass.depth_format, pass.depth_usage())
        {
            let (stencil_load_op, stencil_store_op) = if pass.has_stencil() {
                (depth.stencil_load_op, depth.stencil_store_op)
            } else {
                (vk::AttachmentLoadOp::DONT_CARE, vk::AttachmentStoreOp::DONT_CARE)
            };
            let attachment = table.insert(
                depth.image,
                GfxAttachmentDesc {
                    format,
                    samples: pass.samples,
                    load_op: depth.load_op,
                    store_op: depth.store_op,
                    stencil_load_op,
                    stencil_store_op,
                    initial_layout: usage.layout,
                    final_layout: usage.layout,
                },
                GfxClearValue::DepthStencil {
                    depth: depth.clear_depth,
                    stencil: depth.clear_stencil,
                },
                registry,
            )?;
            subpass.depth_stencil_attachment = Some(GfxAttachmentRef {
                attachment,
                layout: usage.layout,
            });
        }
        subpasses.push(subpass);
    }

    // 相邻 subpass 之间保守地串行化 attachment 访问
    let dependencies = (1..passes.len() as u32)
        .map(|dst| GfxSubpassDependency {
            src_subpass: dst - 1,
            dst_subpass: dst,
            src_stage: ATTACHMENT_STAGES,
            dst_stage: ATTACHMENT_STAGES | vk::PipelineStageFlags2::FRAGMENT_SHADER,
            src_access: ATTACHMENT_WRITES,
            dst_access: ATTACHMENT_ACCESS | vk::AccessFlags2::INPUT_ATTACHMENT_READ,
            by_region: true,
        })
        .collect();

    Ok(RgNativePassPlan {
        desc: GfxRenderPassDesc {
            attachments: table.descs,
            subpasses,
            dependencies,
        },
        views: table.views,
        clear_values: table.clear_values,
        extent: first.extent,
    })
}

/// 录制一个原生 render pass，每个逻辑 pass 一个 subpass
pub(crate) fn emit_native_pass(
    ctx: &mut RgPassContext<'_>,
    cache: &RgRenderPassCache,
    frame_id: u64,
    passes: &[&RgLogicalPass],
    plan: &RgNativePassPlan,
    debug_labels: bool,
    stats: &mut RgRenderingStats,
) -> RgResult<()> {
    let _span = tessel_crate_tools::profile_span!("emit_native_pass");

    let device = ctx.manager.device().clone();
    let render_pass = cache.render_pass(device.as_ref(), &plan.desc, frame_id)?;
    let framebuffer = cache.framebuffer(
        device.as_ref(),
        &GfxFramebufferDesc {
            render_pass,
            attachments: plan.views.clone(),
            width: plan.extent.width,
            height: plan.extent.height,
            layers: 1,
        },
        frame_id,
    )?;

    let full_area = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: plan.extent,
    };
    ctx.encoder.begin_render_pass(&GfxRenderPassBegin {
        render_pass,
        framebuffer,
        render_area: full_area,
        clear_values: plan.clear_values.clone(),
    });
    stats.native_render_passes += 1;

    for (index, pass) in passes.iter().enumerate() {
        if index > 0 {
            ctx.encoder.next_subpass();
        }
        stats.subpasses += 1;
        if debug_labels {
            ctx.encoder.begin_label(pass.name(), pass.desc.color);
        }

        ctx.encoder.set_viewport(pass.desc.viewport.unwrap_or(vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: plan.extent.width as f32,
            height: plan.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }));
        ctx.encoder.set_scissor(pass.desc.scissor.unwrap_or(full_area));

        for draw in &pass.draws {
            if debug_labels {
                ctx.encoder.begin_label(&draw.task.name, draw.task.color);
            }
            emit_draw(ctx, draw, stats)?;
            if debug_labels {
                ctx.encoder.end_label();
            }
        }

        if debug_labels {
            ctx.encoder.end_label();
        }
    }

    ctx.encoder.end_render_pass();
    Ok(())
}

fn emit_draw(ctx: &mut RgPassContext<'_>, draw: &RgDrawEntry, stats: &mut RgRenderingStats) -> RgResult<()> {
    let task = &draw.task;
    if let RgDrawKind::Custom(pass) = &task.kind {
        pass.execute(ctx);
        return Ok(());
    }

    let pipeline = draw.pipeline.as_deref().ok_or_else(|| RgError::BindingMismatch {
        task: task.name.clone(),
        reason: "pipeline was not resolved".to_string(),
    })?;
    task.resources.emit(ctx, pipeline, &task.name)?;

    if !task.vertex_buffers.is_empty() {
        let mut buffers = Vec::with_capacity(task.vertex_buffers.len());
        let mut offsets = Vec::with_capacity(task.vertex_buffers.len());
        for (id, offset) in &task.vertex_buffers {
            buffers.push(ctx.get_buffer(*id).ok_or_else(|| RgError::invalid_handle("buffer", id))?);
            offsets.push(*offset);
        }
        ctx.encoder.bind_vertex_buffers(0, &buffers, &offsets);
    }
    if let Some((id, offset, index_type)) = task.index_buffer {
        let buffer = ctx.get_buffer(id).ok_or_else(|| RgError::invalid_handle("buffer", id))?;
        ctx.encoder.bind_index_buffer(buffer, offset, index_type);
    }

    match task.kind {
        RgDrawKind::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        } => ctx.encoder.draw(vertex_count, instance_count, first_vertex, first_instance),
        RgDrawKind::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        } => ctx.encoder.draw_indexed(index_count, instance_count, first_index, vertex_offset, first_instance),
        RgDrawKind::DrawIndirect {
            buffer,
            offset,
            draw_count,
            stride,
        } => {
            let native = ctx.get_buffer(buffer).ok_or_else(|| RgError::invalid_handle("buffer", buffer))?;
            ctx.encoder.draw_indirect(native, offset, draw_count, stride);
        }
        RgDrawKind::DrawIndexedIndirect {
            buffer,
            offset,
            draw_count,
            stride,
        } => {
            let native = ctx.get_buffer(buffer).ok_or_else(|| RgError::invalid_handle("buffer", buffer))?;
            ctx.encoder.draw_indexed_indirect(native, offset, draw_count, stride);
        }
        RgDrawKind::DrawMeshTasks { group_count } => ctx.encoder.draw_mesh_tasks(group_count),
        RgDrawKind::Custom(_) => {}
    }
    stats.draw_calls += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tessel_gfx::commands::render_pass::GfxClearColor;
    use tessel_gfx::headless::HeadlessDevice;
    use tessel_gfx::resources::image::GfxImageDesc;

    use super::*;
    use crate::handle::RgStrong;
    use crate::render_pass::RgRenderPassDesc;
    use crate::resource::manager::RgResourceManager;
    use crate::resource_state::RgImageState;

    struct Fixture {
        manager: std::sync::Arc<RgResourceManager>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                manager: RgResourceManager::new(std::sync::Arc::new(HeadlessDevice::new()), 2),
            }
        }

        fn image(&self, samples: vk::SampleCountFlags, format: vk::Format) -> RgStrong<RgImageId> {
            let usage = vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
            self.manager
                .create_image("target", &GfxImageDesc::new_2d(128, 128, format, usage).with_samples(samples), RgImageState::UNDEFINED)
                .unwrap()
        }

        fn pass(&self, desc: RgRenderPassDesc) -> RgLogicalPass {
            RgLogicalPass::new(desc, &self.manager).unwrap()
        }
    }

    #[test]
    fn test_matching_passes_merge_into_subpasses() {
        let fx = Fixture::new();
        let a = fx.image(vk::SampleCountFlags::TYPE_1, vk::Format::R8G8B8A8_UNORM);
        let b = fx.image(vk::SampleCountFlags::TYPE_1, vk::Format::R8G8B8A8_UNORM);
        let first = fx.pass(RgRenderPassDesc::new("first").clear_color(a.id(), GfxClearColor::default()));
        let second = fx.pass(RgRenderPassDesc::new("second").clear_color(b.id(), GfxClearColor::default()));
        assert!(first.is_merge_compatible(&second));

        let mut registry = RgLocalRegistry::new();
        registry.resolve(&fx.manager, a.id().into()).unwrap();
        registry.resolve(&fx.manager, b.id().into()).unwrap();
        let plan = plan_native_pass(&[&first, &second], &registry).unwrap();
        assert_eq!(plan.desc.attachments.len(), 2);
        assert_eq!(plan.desc.subpass_count(), 2);
        assert_eq!(plan.desc.dependencies.len(), 1);
        assert_eq!(plan.desc.subpasses[1].color_attachments[0].attachment, 1);
    }

    #[test]
    fn test_sample_count_mismatch_prevents_merge() {
        let fx = Fixture::new();
        let a = fx.image(vk::SampleCountFlags::TYPE_1, vk::Format::R8G8B8A8_UNORM);
        let b = fx.image(vk::SampleCountFlags::TYPE_4, vk::Format::R8G8B8A8_UNORM);
        let first = fx.pass(RgRenderPassDesc::new("first").clear_color(a.id(), GfxClearColor::default()));
        let second = fx.pass(RgRenderPassDesc::new("second").clear_color(b.id(), GfxClearColor::default()));
        assert!(!first.is_merge_compatible(&second));
    }

    #[test]
    fn test_shared_attachment_requires_load() {
        let fx = Fixture::new();
        let color = fx.image(vk::SampleCountFlags::TYPE_1, vk::Format::R8G8B8A8_UNORM);
        let first = fx.pass(RgRenderPassDesc::new("first").clear_color(color.id(), GfxClearColor::default()));
        let cleared = fx.pass(RgRenderPassDesc::new("cleared").clear_color(color.id(), GfxClearColor::default()));
        let loaded = fx.pass(RgRenderPassDesc::new("loaded").load_color(color.id()));
        assert!(!first.is_merge_compatible(&cleared));
        assert!(first.is_merge_compatible(&loaded));

        let mut registry = RgLocalRegistry::new();
        registry.resolve(&fx.manager, color.id().into()).unwrap();
        let plan = plan_native_pass(&[&first, &loaded], &registry).unwrap();
        assert_eq!(plan.desc.attachments.len(), 1);
        assert_eq!(plan.desc.attachments[0].load_op, vk::AttachmentLoadOp::CLEAR);
    }

    #[test]
    fn test_attachment_shape_is_validated() {
        let fx = Fixture::new();
        let color = fx.image(vk::SampleCountFlags::TYPE_1, vk::Format::R8G8B8A8_UNORM);
        let depth = fx.image(vk::SampleCountFlags::TYPE_4, vk::Format::D32_SFLOAT);
        let desc = RgRenderPassDesc::new("bad").clear_color(color.id(), GfxClearColor::default()).clear_depth(
            depth.id(),
            1.0,
            0,
        );
        let result = RgLogicalPass::new(desc, &fx.manager);
        assert!(matches!(result, Err(RgError::AttachmentMismatch { .. })));

        let desc = RgRenderPassDesc::new("swapped").clear_color(depth.id(), GfxClearColor::default());
        let result = RgLogicalPass::new(desc, &fx.manager);
        assert!(matches!(result, Err(RgError::AttachmentMismatch { .. })));
    }
}
