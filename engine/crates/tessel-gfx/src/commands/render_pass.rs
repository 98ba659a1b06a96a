//! 原生 render pass / framebuffer 的结构化描述
//!
//! 这些描述同时作为缓存 key 使用，因此都实现了 `Hash + Eq`。

use ash::vk;

/// 单个 attachment 的描述
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxAttachmentDesc {
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub stencil_load_op: vk::AttachmentLoadOp,
    pub stencil_store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxAttachmentRef {
    pub attachment: u32,
    pub layout: vk::ImageLayout,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct GfxSubpassDesc {
    pub input_attachments: Vec<GfxAttachmentRef>,
    pub color_attachments: Vec<GfxAttachmentRef>,
    pub depth_stencil_attachment: Option<GfxAttachmentRef>,
}

/// subpass 之间的依赖，`src_subpass` 可以是 `vk::SUBPASS_EXTERNAL`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxSubpassDependency {
    pub src_subpass: u32,
    pub dst_subpass: u32,
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_access: vk::AccessFlags2,
    pub by_region: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct GfxRenderPassDesc {
    pub attachments: Vec<GfxAttachmentDesc>,
    pub subpasses: Vec<GfxSubpassDesc>,
    pub dependencies: Vec<GfxSubpassDependency>,
}

impl GfxRenderPassDesc {
    #[inline]
    pub fn subpass_count(&self) -> usize {
        self.subpasses.len()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GfxFramebufferDesc {
    pub render_pass: vk::RenderPass,
    pub attachments: Vec<vk::ImageView>,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
}

/// 颜色清除值，`vk::ClearColorValue` 是 union，这里用 enum 表达
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GfxClearColor {
    Float([f32; 4]),
    Int([i32; 4]),
    Uint([u32; 4]),
}

impl Default for GfxClearColor {
    fn default() -> Self {
        Self::Float([0.0; 4])
    }
}

impl GfxClearColor {
    pub fn to_vk(self) -> vk::ClearColorValue {
        match self {
            Self::Float(float32) => vk::ClearColorValue { float32 },
            Self::Int(int32) => vk::ClearColorValue { int32 },
            Self::Uint(uint32) => vk::ClearColorValue { uint32 },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GfxClearValue {
    Color(GfxClearColor),
    DepthStencil { depth: f32, stencil: u32 },
}

impl GfxClearValue {
    pub fn to_vk(self) -> vk::ClearValue {
        match self {
            Self::Color(color) => vk::ClearValue { color: color.to_vk() },
            Self::DepthStencil { depth, stencil } => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
            },
        }
    }
}

/// `vkCmdBeginRenderPass` 的参数
#[derive(Clone, Debug)]
pub struct GfxRenderPassBegin {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub render_area: vk::Rect2D,
    /// 与 attachment 一一对应
    pub clear_values: Vec<GfxClearValue>,
}
