//! 逻辑 render pass
//!
//! `create_render_pass` 创建一个逻辑 pass，之后的 draw task 都挂在它下面。
//! 执行时，执行顺序上相邻、attachment 兼容的逻辑 pass 会被合并为同一个原生 render pass 的多个 subpass。

pub mod cache;
pub mod compiler;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ash::vk;
use tessel_gfx::commands::render_pass::GfxClearColor;
use tessel_gfx::format::{has_stencil, is_depth_format};

use crate::error::{RgError, RgResult};
use crate::handle::{RgBufferId, RgImageId, RgPipelineId, RgRawResource};
use crate::pass::{RgPass, RgPassBuilder};
use crate::pipeline::{RgPipelineDesc, RgPipelineResources};
use crate::resource::manager::RgResourceManager;
use crate::resource_state::{RgBufferState, RgImageState, RgUsage};
use crate::task::RG_DEFAULT_TASK_COLOR;
use crate::task::graph::RgTaskId;
use crate::task::kinds::merge_accesses;

#[derive(Clone, Copy, Debug)]
pub struct RgColorAttachment {
    pub image: RgImageId,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear: GfxClearColor,
}

#[derive(Clone, Copy, Debug)]
pub struct RgDepthAttachment {
    pub image: RgImageId,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub stencil_load_op: vk::AttachmentLoadOp,
    pub stencil_store_op: vk::AttachmentStoreOp,
    pub clear_depth: f32,
    pub clear_stencil: u32,
    /// 只做深度测试，pass 中的 draw 不允许写入深度
    pub read_only: bool,
}

/// `create_render_pass` 的参数
#[derive(Clone, Debug)]
pub struct RgRenderPassDesc {
    pub name: String,
    pub color: [f32; 4],
    pub depends_on: Vec<RgTaskId>,
    pub color_attachments: Vec<RgColorAttachment>,
    pub depth_attachment: Option<RgDepthAttachment>,
    /// 为空时使用整个 attachment
    pub viewport: Option<vk::Viewport>,
    pub scissor: Option<vk::Rect2D>,
}

impl RgRenderPassDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: RG_DEFAULT_TASK_COLOR,
            depends_on: Vec::new(),
            color_attachments: Vec::new(),
            depth_attachment: None,
            viewport: None,
            scissor: None,
        }
    }

    /// 先清除再写入
    pub fn clear_color(mut self, image: RgImageId, clear: GfxClearColor) -> Self {
        self.color_attachments.push(RgColorAttachment {
            image,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear,
        });
        self
    }

    /// 保留原有内容
    pub fn load_color(mut self, image: RgImageId) -> Self {
        self.color_attachments.push(RgColorAttachment {
            image,
            load_op: vk::AttachmentLoadOp::LOAD,
            store_op: vk::AttachmentStoreOp::STORE,
            clear: GfxClearColor::default(),
        });
        self
    }

    pub fn clear_depth(mut self, image: RgImageId, depth: f32, stencil: u32) -> Self {
        self.depth_attachment = Some(RgDepthAttachment {
            image,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::CLEAR,
            stencil_store_op: vk::AttachmentStoreOp::STORE,
            clear_depth: depth,
            clear_stencil: stencil,
            read_only: false,
        });
        self
    }

    pub fn load_depth(mut self, image: RgImageId, read_only: bool) -> Self {
        self.depth_attachment = Some(RgDepthAttachment {
            image,
            load_op: vk::AttachmentLoadOp::LOAD,
            store_op: if read_only { vk::AttachmentStoreOp::NONE } else { vk::AttachmentStoreOp::STORE },
            stencil_load_op: vk::AttachmentLoadOp::LOAD,
            stencil_store_op: if read_only { vk::AttachmentStoreOp::NONE } else { vk::AttachmentStoreOp::STORE },
            clear_depth: 1.0,
            clear_stencil: 0,
            read_only,
        });
        self
    }

    #[inline]
    pub fn viewport(mut self, viewport: vk::Viewport) -> Self {
        self.viewport = Some(viewport);
        self
    }

    #[inline]
    pub fn scissor(mut self, scissor: vk::Rect2D) -> Self {
        self.scissor = Some(scissor);
        self
    }

    #[inline]
    pub fn depends_on(mut self, tasks: &[RgTaskId]) -> Self {
        self.depends_on.extend_from_slice(tasks);
        self
    }

    #[inline]
    pub fn color(mut self, color: [f32; 4]) -> Self {
        self.color = color;
        self
    }
}

/// 逻辑 pass 的句柄，`task()` 可以作为其他 task 的依赖
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RgLogicalPassId {
    pub(crate) task: RgTaskId,
    pub(crate) index: u32,
}

impl RgLogicalPassId {
    #[inline]
    pub fn task(&self) -> RgTaskId {
        self.task
    }
}

pub enum RgDrawKind {
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    DrawIndirect {
        buffer: RgBufferId,
        offset: vk::DeviceSize,
        draw_count: u32,
        stride: u32,
    },
    DrawIndexedIndirect {
        buffer: RgBufferId,
        offset: vk::DeviceSize,
        draw_count: u32,
        stride: u32,
    },
    DrawMeshTasks {
        group_count: [u32; 3],
    },
    /// 自定义的 draw，自己绑定 pipeline 并录制命令
    Custom(Box<dyn RgPass>),
}

/// 逻辑 pass 中的一个 draw task
pub struct RgDrawTask {
    pub name: String,
    pub color: [f32; 4],
    pub pipeline: Option<RgPipelineId>,
    pub resources: RgPipelineResources,
    pub vertex_buffers: Vec<(RgBufferId, vk::DeviceSize)>,
    pub index_buffer: Option<(RgBufferId, vk::DeviceSize, vk::IndexType)>,
    pub kind: RgDrawKind,
}

impl RgDrawTask {
    pub fn new(name: impl Into<String>, pipeline: RgPipelineId, kind: RgDrawKind) -> Self {
        Self {
            name: name.into(),
            color: RG_DEFAULT_TASK_COLOR,
            pipeline: Some(pipeline),
            resources: RgPipelineResources::new(),
            vertex_buffers: Vec::new(),
            index_buffer: None,
            kind,
        }
    }

    pub fn custom(name: impl Into<String>, pass: impl RgPass + 'static) -> Self {
        Self {
            name: name.into(),
            color: RG_DEFAULT_TASK_COLOR,
            pipeline: None,
            resources: RgPipelineResources::new(),
            vertex_buffers: Vec::new(),
            index_buffer: None,
            kind: RgDrawKind::Custom(Box::new(pass)),
        }
    }

    #[inline]
    pub fn resources(mut self, resources: RgPipelineResources) -> Self {
        self.resources = resources;
        self
    }

    #[inline]
    pub fn vertex_buffer(mut self, buffer: RgBufferId, offset: vk::DeviceSize) -> Self {
        self.vertex_buffers.push((buffer, offset));
        self
    }

    #[inline]
    pub fn index_buffer(mut self, buffer: RgBufferId, offset: vk::DeviceSize, index_type: vk::IndexType) -> Self {
        self.index_buffer = Some((buffer, offset, index_type));
        self
    }

    #[inline]
    pub fn color(mut self, color: [f32; 4]) -> Self {
        self.color = color;
        self
    }
}

/// 经过校验的 draw task
pub(crate) struct RgDrawEntry {
    pub(crate) task: RgDrawTask,
    pub(crate) pipeline: Option<Arc<RgPipelineDesc>>,
    pub(crate) accesses: Vec<(RgRawResource, RgUsage)>,
    pub(crate) writes_depth: bool,
}

/// 一次 `create_render_pass` 创建的逻辑 pass
pub(crate) struct RgLogicalPass {
    pub(crate) desc: RgRenderPassDesc,
    pub(crate) extent: vk::Extent2D,
    pub(crate) samples: vk::SampleCountFlags,
    pub(crate) color_formats: Vec<vk::Format>,
    pub(crate) depth_format: Option<vk::Format>,
    pub(crate) draws: Vec<RgDrawEntry>,
}

// 创建
impl RgLogicalPass {
    pub(crate) fn new(desc: RgRenderPassDesc, manager: &RgResourceManager) -> RgResult<Self> {
        let mismatch = |reason: String| RgError::AttachmentMismatch {
            pass: desc.name.clone(),
            reason,
        };
        if desc.color_attachments.is_empty() && desc.depth_attachment.is_none() {
            return Err(mismatch("render pass has no attachments".to_string()));
        }

        let mut seen = HashSet::new();
        let mut shape: Option<(vk::Extent2D, vk::SampleCountFlags)> = None;
        let mut check = |image: RgImageId, want_depth: bool| -> RgResult<vk::Format> {
            let image_desc = manager.image_desc(image).ok_or_else(|| RgError::invalid_handle("image", image))?;
            if !seen.insert(image) {
                return Err(mismatch(format!("{:?} is bound to more than one attachment", image)));
            }
            if is_depth_format(image_desc.format) != want_depth {
                return Err(mismatch(format!(
                    "{:?} has format {:?}, which cannot be used as a {} attachment",
                    image,
                    image_desc.format,
                    if want_depth { "depth" } else { "color" }
                )));
            }
            let extent = vk::Extent2D {
                width: image_desc.extent.width,
                height: image_desc.extent.height,
            };
            match shape {
                None => shape = Some((extent, image_desc.samples)),
                Some((e, s)) if e == extent && s == image_desc.samples => {}
                Some((e, s)) => {
                    return Err(mismatch(format!(
                        "{:?} is {}x{} with {:?}, other attachments are {}x{} with {:?}",
                        image, extent.width, extent.height, image_desc.samples, e.width, e.height, s
                    )));
                }
            }
            Ok(image_desc.format)
        };

        let color_formats =
            desc.color_attachments.iter().map(|c| check(c.image, false)).collect::<RgResult<Vec<_>>>()?;
        let depth_format = desc.depth_attachment.map(|d| check(d.image, true)).transpose()?;

        if let Some(depth) = &desc.depth_attachment
            && depth.read_only
            && (depth.load_op == vk::AttachmentLoadOp::CLEAR || depth.stencil_load_op == vk::AttachmentLoadOp::CLEAR)
        {
            return Err(mismatch("read-only depth attachment cannot be cleared".to_string()));
        }

        let Some((extent, samples)) = shape else {
            return Err(mismatch("render pass has no attachments".to_string()));
        };
        Ok(Self {
            desc,
            extent,
            samples,
            color_formats,
            depth_format,
            draws: Vec::new(),
        })
    }

    #[inline]
    pub(crate) fn name(&self) -> &str {
        &self.desc.name
    }

    pub(crate) fn attachment_images(&self) -> impl Iterator<Item = RgImageId> + '_ {
        self.desc
            .color_attachments
            .iter()
            .map(|c| c.image)
            .chain(self.desc.depth_attachment.iter().map(|d| d.image))
    }
}

// draw task
impl RgLogicalPass {
    /// 检查 draw task 与 pass 的兼容性，推导它的资源访问
    pub(crate) fn add_draw(&mut self, mut task: RgDrawTask, manager: &RgResourceManager) -> RgResult<()> {
        let incompatible = |task: &RgDrawTask, reason: String| RgError::IncompatibleDrawTask {
            task: task.name.clone(),
            pass: self.desc.name.clone(),
            reason,
        };

        let mut accesses = Vec::new();
        let mut pipeline = None;
        let writes_depth = if let RgDrawKind::Custom(pass) = &mut task.kind {
            let mut builder = RgPassBuilder::new();
            pass.setup(&mut builder);
            accesses.extend(builder.accesses);
            self.desc.depth_attachment.is_some_and(|d| !d.read_only)
        } else {
            let id = task.pipeline.ok_or_else(|| incompatible(&task, "draw task has no pipeline".to_string()))?;
            let desc = manager.pipeline(id).ok_or_else(|| RgError::invalid_handle("pipeline", id))?;
            let Some(outputs) = desc.graphics.as_ref() else {
                return Err(incompatible(&task, format!("pipeline \"{}\" is not a graphics pipeline", desc.name)));
            };
            if outputs.color_formats != self.color_formats {
                return Err(incompatible(
                    &task,
                    format!("pipeline writes {:?}, render pass has {:?}", outputs.color_formats, self.color_formats),
                ));
            }
            if outputs.depth_format != self.depth_format {
                return Err(incompatible(
                    &task,
                    format!("pipeline depth format {:?}, render pass has {:?}", outputs.depth_format, self.depth_format),
                ));
            }
            if outputs.samples != self.samples {
                return Err(incompatible(
                    &task,
                    format!("pipeline uses {:?}, render pass has {:?}", outputs.samples, self.samples),
                ));
            }
            if outputs.depth_write && self.desc.depth_attachment.is_some_and(|d| d.read_only) {
                return Err(incompatible(&task, "pipeline writes a read-only depth attachment".to_string()));
            }
            task.resources.validate(&desc, &task.name)?;
            if let Some(sampler) = task.resources.samplers().find(|s| manager.sampler(*s).is_none()) {
                return Err(RgError::invalid_handle("sampler", sampler));
            }
            accesses.extend(task.resources.accesses(&desc));
            let writes_depth = outputs.depth_write;
            pipeline = Some(desc);
            writes_depth
        };

        accesses.extend(
            task.vertex_buffers
                .iter()
                .map(|(buffer, _)| (RgRawResource::from(*buffer), RgBufferState::VERTEX_BUFFER.into())),
        );
        if let Some((buffer, _, _)) = task.index_buffer {
            accesses.push((buffer.into(), RgBufferState::INDEX_BUFFER.into()));
        }
        if let RgDrawKind::DrawIndirect { buffer, .. } | RgDrawKind::DrawIndexedIndirect { buffer, .. } = task.kind {
            accesses.push((buffer.into(), RgBufferState::INDIRECT_BUFFER.into()));
        }

        // attachment 在 pass 内只能作为 attachment 访问
        let attachments: HashSet<RgRawResource> = self.attachment_images().map(RgRawResource::from).collect();
        if let Some((raw, _)) = accesses.iter().find(|(raw, _)| attachments.contains(raw)) {
            return Err(RgError::AttachmentMismatch {
                pass: self.desc.name.clone(),
                reason: format!("draw task \"{}\" also accesses attachment {:?}", task.name, raw),
            });
        }

        self.draws.push(RgDrawEntry {
            task,
            pipeline,
            accesses: merge_accesses(accesses),
            writes_depth,
        });
        Ok(())
    }
}

// 资源访问
impl RgLogicalPass {
    pub(crate) fn writes_depth(&self) -> bool {
        self.desc.depth_attachment.is_some_and(|d| {
            !d.read_only
                && (d.load_op == vk::AttachmentLoadOp::CLEAR
                    || d.stencil_load_op == vk::AttachmentLoadOp::CLEAR
                    || self.draws.iter().any(|draw| draw.writes_depth))
        })
    }

    /// 深度 attachment 的访问：没有任何写入时使用只读 layout，只需要深度测试阶段
    pub(crate) fn depth_usage(&self) -> Option<RgUsage> {
        let depth = self.desc.depth_attachment?;
        let usage = if !self.writes_depth() {
            RgImageState::DEPTH_ATTACHMENT_READ
        } else if depth.load_op == vk::AttachmentLoadOp::LOAD {
            RgImageState::DEPTH_ATTACHMENT_READ_WRITE
        } else {
            RgImageState::DEPTH_ATTACHMENT_WRITE
        };
        Some(usage.into())
    }

    pub(crate) fn color_usage(attachment: &RgColorAttachment) -> RgUsage {
        if attachment.load_op == vk::AttachmentLoadOp::LOAD {
            RgImageState::COLOR_ATTACHMENT_READ_WRITE.into()
        } else {
            RgImageState::COLOR_ATTACHMENT_WRITE.into()
        }
    }

    /// attachment 的访问
    pub(crate) fn attachment_accesses(&self) -> Vec<(RgRawResource, RgUsage)> {
        let mut accesses: Vec<(RgRawResource, RgUsage)> =
            self.desc.color_attachments.iter().map(|c| (c.image.into(), Self::color_usage(c))).collect();
        if let (Some(depth), Some(usage)) = (self.desc.depth_attachment, self.depth_usage()) {
            accesses.push((depth.image.into(), usage));
        }
        accesses
    }

    /// 整个 pass 的资源访问：attachment 加上所有 draw task 的访问
    ///
    /// pass 内部不能插入 barrier，因此以 pass 为单位请求
    pub(crate) fn accesses(&self) -> Vec<(RgRawResource, RgUsage)> {
        let mut accesses = self.attachment_accesses();
        accesses.extend(self.draws.iter().flat_map(|draw| draw.accesses.iter().copied()));
        merge_accesses(accesses)
    }

    /// 深度 attachment 是否带 stencil
    pub(crate) fn has_stencil(&self) -> bool {
        self.depth_format.is_some_and(has_stencil)
    }
}

// 合并
impl RgLogicalPass {
    /// `next` 紧跟在 `self` 之后执行时，能否作为同一个原生 render pass 的下一个 subpass
    ///
    /// 要求 attachment 格式、采样数、尺寸和 load/store 完全一致；
    /// 两个 pass 共享的资源要么是同一位置的 attachment 并且 `next` 保留已有内容，要么两边都只读
    pub(crate) fn is_merge_compatible(&self, next: &RgLogicalPass) -> bool {
        if self.extent != next.extent
            || self.samples != next.samples
            || self.color_formats != next.color_formats
            || self.depth_format != next.depth_format
        {
            return false;
        }

        let colors_match = self.desc.color_attachments.iter().zip(&next.desc.color_attachments).all(|(a, b)| {
            if a.image == b.image {
                b.load_op == vk::AttachmentLoadOp::LOAD
            } else {
                a.load_op == b.load_op && a.store_op == b.store_op
            }
        });
        let depth_match = match (self.desc.depth_attachment, next.desc.depth_attachment) {
            (Some(a), Some(b)) if a.image == b.image => {
                b.load_op == vk::AttachmentLoadOp::LOAD
                    && b.stencil_load_op != vk::AttachmentLoadOp::CLEAR
                    && self.depth_usage().map(|u| u.layout) == next.depth_usage().map(|u| u.layout)
            }
            (Some(a), Some(b)) => {
                a.load_op == b.load_op
                    && a.store_op == b.store_op
                    && a.stencil_load_op == b.stencil_load_op
                    && a.read_only == b.read_only
            }
            (None, None) => true,
            _ => false,
        };
        if !colors_match || !depth_match {
            return false;
        }

        let own: HashMap<RgRawResource, RgUsage> = self.accesses().into_iter().collect();
        let shared_attachments: HashSet<RgRawResource> = self
            .attachment_images()
            .zip(next.attachment_images())
            .filter(|(a, b)| a == b)
            .map(|(a, _)| a.into())
            .collect();
        next.accesses().iter().all(|(raw, usage)| match own.get(raw) {
            None => true,
            Some(_) if shared_attachments.contains(raw) => true,
            // 两边都只读并且 layout 相同，render pass 之前请求一次即可
            Some(mine) => !mine.is_write() && !usage.is_write() && mine.layout == usage.layout,
        })
    }
}
