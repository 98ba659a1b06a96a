//! 内置的 task 类型
//!
//! task 的种类是封闭的，每个种类只需要回答两个问题：访问了哪些资源（用于计算 barrier），
//! 以及录制哪些命令。两者都通过 match 分发。

use std::sync::Arc;

use ash::vk;
use tessel_gfx::commands::accel::{GfxAccelGeometry, GfxAccelStructBuild, GfxTraceRays};
use tessel_gfx::commands::render_pass::GfxClearColor;

use crate::error::{RgError, RgResult};
use crate::handle::{
    RgBufferId, RgImageId, RgPipelineId, RgRawResource, RgRtGeometryId, RgRtSceneId, RgSwapchainId,
};
use crate::pass::{RgPass, RgPassBuilder, RgPassContext};
use crate::pipeline::{RgPipelineDesc, RgPipelineResources};
use crate::resource::manager::RgResourceManager;
use crate::resource_state::{RgBufferState, RgImageState, RgUsage};
use crate::stats::RgRenderingStats;

#[derive(Clone, Debug)]
pub struct RgCopyBuffer {
    pub src: RgBufferId,
    pub dst: RgBufferId,
    pub regions: Vec<vk::BufferCopy>,
}

#[derive(Clone, Debug)]
pub struct RgCopyImage {
    pub src: RgImageId,
    pub dst: RgImageId,
    pub regions: Vec<vk::ImageCopy>,
}

#[derive(Clone, Debug)]
pub struct RgCopyBufferToImage {
    pub src: RgBufferId,
    pub dst: RgImageId,
    pub regions: Vec<vk::BufferImageCopy>,
}

#[derive(Clone, Debug)]
pub struct RgCopyImageToBuffer {
    pub src: RgImageId,
    pub dst: RgBufferId,
    pub regions: Vec<vk::BufferImageCopy>,
}

#[derive(Clone, Debug)]
pub struct RgBlitImage {
    pub src: RgImageId,
    pub dst: RgImageId,
    pub regions: Vec<vk::ImageBlit>,
    pub filter: vk::Filter,
}

#[derive(Clone, Debug)]
pub struct RgResolveImage {
    pub src: RgImageId,
    pub dst: RgImageId,
    pub regions: Vec<vk::ImageResolve>,
}

#[derive(Clone, Copy, Debug)]
pub struct RgFillBuffer {
    pub buffer: RgBufferId,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
    pub data: u32,
}

#[derive(Clone, Debug)]
pub struct RgUpdateBuffer {
    pub buffer: RgBufferId,
    pub offset: vk::DeviceSize,
    pub data: Vec<u8>,
}

#[derive(Clone, Copy, Debug)]
pub struct RgClearColorImage {
    pub image: RgImageId,
    pub color: GfxClearColor,
}

#[derive(Clone, Copy, Debug)]
pub struct RgClearDepthStencilImage {
    pub image: RgImageId,
    pub depth: f32,
    pub stencil: u32,
}

#[derive(Clone, Debug)]
pub struct RgDispatch {
    pub pipeline: RgPipelineId,
    pub resources: RgPipelineResources,
    pub group_count: [u32; 3],
}

#[derive(Clone, Debug)]
pub struct RgDispatchIndirect {
    pub pipeline: RgPipelineId,
    pub resources: RgPipelineResources,
    pub buffer: RgBufferId,
    pub offset: vk::DeviceSize,
}

/// BLAS 的一份几何输入，数据来自被跟踪的 buffer
#[derive(Clone, Copy, Debug)]
pub enum RgRtGeometryInput {
    Triangles {
        vertices: RgBufferId,
        vertex_offset: vk::DeviceSize,
        vertex_stride: vk::DeviceSize,
        vertex_format: vk::Format,
        max_vertex: u32,
        /// 没有 index buffer 时为 `None`
        indices: Option<(RgBufferId, vk::DeviceSize, vk::IndexType)>,
        primitive_count: u32,
        opaque: bool,
    },
    Aabbs {
        buffer: RgBufferId,
        offset: vk::DeviceSize,
        stride: vk::DeviceSize,
        primitive_count: u32,
        opaque: bool,
    },
}

impl RgRtGeometryInput {
    fn buffers(&self) -> impl Iterator<Item = RgBufferId> {
        let (first, second) = match *self {
            Self::Triangles { vertices, indices, .. } => (vertices, indices.map(|(buffer, _, _)| buffer)),
            Self::Aabbs { buffer, .. } => (buffer, None),
        };
        std::iter::once(first).chain(second)
    }
}

#[derive(Clone, Debug)]
pub struct RgBuildRtGeometry {
    pub geometry: RgRtGeometryId,
    pub inputs: Vec<RgRtGeometryInput>,
    pub scratch: RgBufferId,
    pub flags: vk::BuildAccelerationStructureFlagsKHR,
    /// 基于已有内容做 update
    pub update: bool,
}

#[derive(Clone, Debug)]
pub struct RgBuildRtScene {
    pub scene: RgRtSceneId,
    /// `VkAccelerationStructureInstanceKHR` 数组
    pub instances: RgBufferId,
    pub instance_offset: vk::DeviceSize,
    pub instance_count: u32,
    /// 实例引用的几何体，构建时会被读取
    pub geometries: Vec<RgRtGeometryId>,
    pub scratch: RgBufferId,
    pub flags: vk::BuildAccelerationStructureFlagsKHR,
    pub update: bool,
}

/// 着色器表中的一段，offset 相对于表所在的 buffer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RgSbtRegion {
    pub offset: vk::DeviceSize,
    pub stride: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

#[derive(Clone, Copy, Debug)]
pub struct RgShaderBindingTable {
    pub buffer: RgBufferId,
    pub raygen: RgSbtRegion,
    pub miss: RgSbtRegion,
    pub hit: RgSbtRegion,
    pub callable: Option<RgSbtRegion>,
}

#[derive(Clone, Debug)]
pub struct RgTraceRays {
    pub pipeline: RgPipelineId,
    pub resources: RgPipelineResources,
    pub sbt: RgShaderBindingTable,
    pub extent: [u32; 3],
}

/// 把 swapchain image 转换为可以呈现的 layout，并在提交后呈现
#[derive(Clone, Copy, Debug)]
pub struct RgPresent {
    pub swapchain: RgSwapchainId,
    pub image_index: u32,
}

pub enum RgTaskKind {
    CopyBuffer(RgCopyBuffer),
    CopyImage(RgCopyImage),
    CopyBufferToImage(RgCopyBufferToImage),
    CopyImageToBuffer(RgCopyImageToBuffer),
    BlitImage(RgBlitImage),
    ResolveImage(RgResolveImage),
    FillBuffer(RgFillBuffer),
    UpdateBuffer(RgUpdateBuffer),
    ClearColorImage(RgClearColorImage),
    ClearDepthStencilImage(RgClearDepthStencilImage),
    Dispatch(RgDispatch),
    DispatchIndirect(RgDispatchIndirect),
    BuildRtGeometry(RgBuildRtGeometry),
    BuildRtScene(RgBuildRtScene),
    TraceRays(RgTraceRays),
    Present(RgPresent),
    /// 由 `create_render_pass` 添加，值为逻辑 pass 在 recording 中的序号，
    /// draw task 在 execute 时由 render pass 编译器处理
    RenderPass(u32),
    Custom(Box<dyn RgPass>),
}

macro_rules! impl_from_kind {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for RgTaskKind {
                fn from(task: $ty) -> Self {
                    Self::$variant(task)
                }
            }
        )*
    };
}

impl_from_kind!(
    CopyBuffer(RgCopyBuffer),
    CopyImage(RgCopyImage),
    CopyBufferToImage(RgCopyBufferToImage),
    CopyImageToBuffer(RgCopyImageToBuffer),
    BlitImage(RgBlitImage),
    ResolveImage(RgResolveImage),
    FillBuffer(RgFillBuffer),
    UpdateBuffer(RgUpdateBuffer),
    ClearColorImage(RgClearColorImage),
    ClearDepthStencilImage(RgClearDepthStencilImage),
    Dispatch(RgDispatch),
    DispatchIndirect(RgDispatchIndirect),
    BuildRtGeometry(RgBuildRtGeometry),
    BuildRtScene(RgBuildRtScene),
    TraceRays(RgTraceRays),
    Present(RgPresent),
);

impl<P: RgPass + 'static> From<Box<P>> for RgTaskKind {
    fn from(pass: Box<P>) -> Self {
        Self::Custom(pass)
    }
}

impl RgTaskKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::CopyBuffer(_) => "copy-buffer",
            Self::CopyImage(_) => "copy-image",
            Self::CopyBufferToImage(_) => "copy-buffer-to-image",
            Self::CopyImageToBuffer(_) => "copy-image-to-buffer",
            Self::BlitImage(_) => "blit-image",
            Self::ResolveImage(_) => "resolve-image",
            Self::FillBuffer(_) => "fill-buffer",
            Self::UpdateBuffer(_) => "update-buffer",
            Self::ClearColorImage(_) => "clear-color",
            Self::ClearDepthStencilImage(_) => "clear-depth-stencil",
            Self::Dispatch(_) => "dispatch",
            Self::DispatchIndirect(_) => "dispatch-indirect",
            Self::BuildRtGeometry(_) => "build-rt-geometry",
            Self::BuildRtScene(_) => "build-rt-scene",
            Self::TraceRays(_) => "trace-rays",
            Self::Present(_) => "present",
            Self::RenderPass(_) => "render-pass",
            Self::Custom(_) => "custom",
        }
    }
}

/// 需要在提交之后执行的呈现请求
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgPresentRequest {
    pub swapchain: vk::SwapchainKHR,
    pub image_index: u32,
}

/// 图中的 task：种类以及 `add_task` 时解析出的资源访问
pub struct RgTask {
    pub kind: RgTaskKind,
    /// 每个资源一条，同一个 task 对同一资源的多次访问已经合并
    pub(crate) accesses: Vec<(RgRawResource, RgUsage)>,
    pub(crate) pipeline: Option<Arc<RgPipelineDesc>>,
    pub(crate) present: Option<RgPresentRequest>,
}

#[inline]
fn image(id: RgImageId, state: RgImageState) -> (RgRawResource, RgUsage) {
    (id.into(), state.into())
}

#[inline]
fn buffer(id: RgBufferId, state: RgBufferState) -> (RgRawResource, RgUsage) {
    (id.into(), state.into())
}

/// 合并同一个 task 对同一资源的多次访问
///
/// layout 不同的 image 访问（例如同一 image 内的拷贝）合并为 `GENERAL`
pub(crate) fn merge_accesses(accesses: Vec<(RgRawResource, RgUsage)>) -> Vec<(RgRawResource, RgUsage)> {
    let mut merged: Vec<(RgRawResource, RgUsage)> = Vec::with_capacity(accesses.len());
    for (raw, usage) in accesses {
        match merged.iter_mut().find(|(r, _)| *r == raw) {
            Some((_, existing)) => {
                let layout = if existing.layout == usage.layout {
                    usage.layout
                } else {
                    log::debug!("{:?} is accessed with two layouts in one task, use GENERAL", raw);
                    vk::ImageLayout::GENERAL
                };
                *existing = RgUsage {
                    stage: existing.stage | usage.stage,
                    access: existing.access | usage.access,
                    layout,
                };
            }
            None => merged.push((raw, usage)),
        }
    }
    merged
}

// 解析
impl RgTask {
    /// 检查句柄，推导资源访问
    pub(crate) fn prepare(mut kind: RgTaskKind, manager: &RgResourceManager, name: &str) -> RgResult<Self> {
        let mut pipeline = None;
        let mut present = None;

        let accesses = match &mut kind {
            RgTaskKind::CopyBuffer(t) => {
                vec![buffer(t.src, RgBufferState::TRANSFER_SRC), buffer(t.dst, RgBufferState::TRANSFER_DST)]
            }
            RgTaskKind::CopyImage(t) => {
                vec![image(t.src, RgImageState::TRANSFER_SRC), image(t.dst, RgImageState::TRANSFER_DST)]
            }
            RgTaskKind::CopyBufferToImage(t) => {
                vec![buffer(t.src, RgBufferState::TRANSFER_SRC), image(t.dst, RgImageState::TRANSFER_DST)]
            }
            RgTaskKind::CopyImageToBuffer(t) => {
                vec![image(t.src, RgImageState::TRANSFER_SRC), buffer(t.dst, RgBufferState::TRANSFER_DST)]
            }
            RgTaskKind::BlitImage(t) => {
                vec![image(t.src, RgImageState::TRANSFER_SRC), image(t.dst, RgImageState::TRANSFER_DST)]
            }
            RgTaskKind::ResolveImage(t) => {
                vec![image(t.src, RgImageState::TRANSFER_SRC), image(t.dst, RgImageState::TRANSFER_DST)]
            }
            RgTaskKind::FillBuffer(t) => vec![buffer(t.buffer, RgBufferState::TRANSFER_DST)],
            RgTaskKind::UpdateBuffer(t) => vec![buffer(t.buffer, RgBufferState::TRANSFER_DST)],
            RgTaskKind::ClearColorImage(t) => vec![image(t.image, RgImageState::TRANSFER_DST)],
            RgTaskKind::ClearDepthStencilImage(t) => vec![image(t.image, RgImageState::TRANSFER_DST)],
            RgTaskKind::Dispatch(t) => {
                let desc = resolve_pipeline(manager, t.pipeline, &t.resources, vk::PipelineBindPoint::COMPUTE, name)?;
                let accesses = t.resources.accesses(&desc);
                pipeline = Some(desc);
                accesses
            }
            RgTaskKind::DispatchIndirect(t) => {
                let desc = resolve_pipeline(manager, t.pipeline, &t.resources, vk::PipelineBindPoint::COMPUTE, name)?;
                let mut accesses = t.resources.accesses(&desc);
                accesses.push(buffer(t.buffer, RgBufferState::INDIRECT_BUFFER));
                pipeline = Some(desc);
                accesses
            }
            RgTaskKind::TraceRays(t) => {
                let desc = resolve_pipeline(
                    manager,
                    t.pipeline,
                    &t.resources,
                    vk::PipelineBindPoint::RAY_TRACING_KHR,
                    name,
                )?;
                let mut accesses = t.resources.accesses(&desc);
                accesses.push(buffer(t.sbt.buffer, RgBufferState::SHADER_BINDING_TABLE));
                pipeline = Some(desc);
                accesses
            }
            RgTaskKind::BuildRtGeometry(t) => {
                let mut accesses: Vec<_> = t
                    .inputs
                    .iter()
                    .flat_map(|input| input.buffers())
                    .map(|b| buffer(b, RgBufferState::ACCELERATION_STRUCTURE_BUILD_INPUT))
                    .collect();
                accesses.push(buffer(t.scratch, RgBufferState::ACCELERATION_STRUCTURE_SCRATCH));
                accesses.push((t.geometry.into(), rt_output_usage(t.update)));
                accesses
            }
            RgTaskKind::BuildRtScene(t) => {
                let mut accesses = vec![
                    buffer(t.instances, RgBufferState::ACCELERATION_STRUCTURE_BUILD_INPUT),
                    buffer(t.scratch, RgBufferState::ACCELERATION_STRUCTURE_SCRATCH),
                ];
                accesses.extend(
                    t.geometries
                        .iter()
                        .map(|g| (RgRawResource::from(*g), RgBufferState::ACCELERATION_STRUCTURE_BUILD_READ.into())),
                );
                accesses.push((t.scene.into(), rt_output_usage(t.update)));
                accesses
            }
            RgTaskKind::Present(t) => {
                let swapchain = manager
                    .swapchain(t.swapchain)
                    .ok_or_else(|| RgError::invalid_handle("swapchain", t.swapchain))?;
                let image_id = swapchain.images.get(t.image_index as usize).copied().ok_or_else(|| {
                    RgError::invalid_handle("swapchain image", (t.swapchain, t.image_index))
                })?;
                present = Some(RgPresentRequest {
                    swapchain: swapchain.handle,
                    image_index: t.image_index,
                });
                vec![image(image_id, RgImageState::PRESENT)]
            }
            RgTaskKind::RenderPass(_) => Vec::new(),
            RgTaskKind::Custom(pass) => {
                let mut builder = RgPassBuilder::new();
                pass.setup(&mut builder);
                builder.accesses
            }
        };

        Ok(Self {
            kind,
            accesses: merge_accesses(accesses),
            pipeline,
            present,
        })
    }

    #[inline]
    pub fn accesses(&self) -> &[(RgRawResource, RgUsage)] {
        &self.accesses
    }

    /// 当前 recording 中这个 task 要等待的呈现
    #[inline]
    pub fn present(&self) -> Option<RgPresentRequest> {
        self.present
    }
}

fn rt_output_usage(update: bool) -> RgUsage {
    let usage: RgUsage = RgBufferState::ACCELERATION_STRUCTURE_WRITE.into();
    if update {
        usage.merge(RgBufferState::ACCELERATION_STRUCTURE_BUILD_READ.into())
    } else {
        usage
    }
}

fn resolve_pipeline(
    manager: &RgResourceManager,
    id: RgPipelineId,
    resources: &RgPipelineResources,
    bind_point: vk::PipelineBindPoint,
    task: &str,
) -> RgResult<Arc<RgPipelineDesc>> {
    let pipeline = manager.pipeline(id).ok_or_else(|| RgError::invalid_handle("pipeline", id))?;
    if pipeline.bind_point != bind_point {
        return Err(RgError::BindingMismatch {
            task: task.to_string(),
            reason: format!(
                "pipeline \"{}\" binds to {:?}, expected {:?}",
                pipeline.name, pipeline.bind_point, bind_point
            ),
        });
    }
    resources.validate(&pipeline, task)?;
    if let Some(sampler) = resources.samplers().find(|s| manager.sampler(*s).is_none()) {
        return Err(RgError::invalid_handle("sampler", sampler));
    }
    Ok(pipeline)
}

fn get_image(ctx: &RgPassContext<'_>, id: RgImageId) -> RgResult<(vk::Image, vk::ImageLayout)> {
    ctx.get_image(id)
        .map(|(image, _, layout)| (image, layout))
        .ok_or_else(|| RgError::invalid_handle("image", id))
}

fn get_buffer(ctx: &RgPassContext<'_>, id: RgBufferId) -> RgResult<vk::Buffer> {
    ctx.get_buffer(id).ok_or_else(|| RgError::invalid_handle("buffer", id))
}

fn get_address(ctx: &RgPassContext<'_>, id: RgBufferId, offset: vk::DeviceSize) -> RgResult<vk::DeviceAddress> {
    match ctx.get_device_address(id) {
        Some(address) if address != 0 => Ok(address + offset),
        _ => Err(RgError::invalid_handle("buffer device address", id)),
    }
}

fn get_range(ctx: &RgPassContext<'_>, id: RgImageId) -> RgResult<vk::ImageSubresourceRange> {
    ctx.get_image_range(id).ok_or_else(|| RgError::invalid_handle("image", id))
}

// 录制
impl RgTask {
    /// 录制 task 的命令，barrier 已经在此之前发出
    ///
    /// render pass 节点由 render pass 编译器录制，不经过这里
    pub(crate) fn emit_commands(&self, ctx: &mut RgPassContext<'_>, name: &str) -> RgResult<()> {
        match &self.kind {
            RgTaskKind::CopyBuffer(t) => {
                let (src, dst) = (get_buffer(ctx, t.src)?, get_buffer(ctx, t.dst)?);
                ctx.encoder.copy_buffer(src, dst, &t.regions);
            }
            RgTaskKind::CopyImage(t) => {
                let ((src, src_layout), (dst, dst_layout)) = (get_image(ctx, t.src)?, get_image(ctx, t.dst)?);
                ctx.encoder.copy_image(src, src_layout, dst, dst_layout, &t.regions);
            }
            RgTaskKind::CopyBufferToImage(t) => {
                let src = get_buffer(ctx, t.src)?;
                let (dst, dst_layout) = get_image(ctx, t.dst)?;
                ctx.encoder.copy_buffer_to_image(src, dst, dst_layout, &t.regions);
            }
            RgTaskKind::CopyImageToBuffer(t) => {
                let (src, src_layout) = get_image(ctx, t.src)?;
                let dst = get_buffer(ctx, t.dst)?;
                ctx.encoder.copy_image_to_buffer(src, src_layout, dst, &t.regions);
            }
            RgTaskKind::BlitImage(t) => {
                let ((src, src_layout), (dst, dst_layout)) = (get_image(ctx, t.src)?, get_image(ctx, t.dst)?);
                ctx.encoder.blit_image(src, src_layout, dst, dst_layout, &t.regions, t.filter);
            }
            RgTaskKind::ResolveImage(t) => {
                let ((src, src_layout), (dst, dst_layout)) = (get_image(ctx, t.src)?, get_image(ctx, t.dst)?);
                ctx.encoder.resolve_image(src, src_layout, dst, dst_layout, &t.regions);
            }
            RgTaskKind::FillBuffer(t) => {
                let buffer = get_buffer(ctx, t.buffer)?;
                ctx.encoder.fill_buffer(buffer, t.offset, t.size, t.data);
            }
            RgTaskKind::UpdateBuffer(t) => {
                let buffer = get_buffer(ctx, t.buffer)?;
                ctx.encoder.update_buffer(buffer, t.offset, &t.data);
            }
            RgTaskKind::ClearColorImage(t) => {
                let (image, layout) = get_image(ctx, t.image)?;
                let range = get_range(ctx, t.image)?;
                ctx.encoder.clear_color_image(image, layout, t.color, &[range]);
            }
            RgTaskKind::ClearDepthStencilImage(t) => {
                let (image, layout) = get_image(ctx, t.image)?;
                let range = get_range(ctx, t.image)?;
                let value = vk::ClearDepthStencilValue {
                    depth: t.depth,
                    stencil: t.stencil,
                };
                ctx.encoder.clear_depth_stencil_image(image, layout, value, &[range]);
            }
            RgTaskKind::Dispatch(t) => {
                let pipeline = self.bound_pipeline(name)?;
                t.resources.emit(ctx, pipeline, name)?;
                ctx.encoder.dispatch(t.group_count);
            }
            RgTaskKind::DispatchIndirect(t) => {
                let pipeline = self.bound_pipeline(name)?;
                t.resources.emit(ctx, pipeline, name)?;
                let buffer = get_buffer(ctx, t.buffer)?;
                ctx.encoder.dispatch_indirect(buffer, t.offset);
            }
            RgTaskKind::TraceRays(t) => {
                let pipeline = self.bound_pipeline(name)?;
                t.resources.emit(ctx, pipeline, name)?;
                let region = |ctx: &RgPassContext<'_>, r: RgSbtRegion| -> RgResult<vk::StridedDeviceAddressRegionKHR> {
                    Ok(vk::StridedDeviceAddressRegionKHR {
                        device_address: get_address(ctx, t.sbt.buffer, r.offset)?,
                        stride: r.stride,
                        size: r.size,
                    })
                };
                let trace = GfxTraceRays {
                    raygen: region(ctx, t.sbt.raygen)?,
                    miss: region(ctx, t.sbt.miss)?,
                    hit: region(ctx, t.sbt.hit)?,
                    callable: match t.sbt.callable {
                        Some(callable) => region(ctx, callable)?,
                        None => vk::StridedDeviceAddressRegionKHR::default(),
                    },
                    width: t.extent[0],
                    height: t.extent[1],
                    depth: t.extent[2],
                };
                ctx.encoder.trace_rays(&trace);
            }
            RgTaskKind::BuildRtGeometry(t) => {
                let dst = ctx
                    .get_rt_geometry(t.geometry)
                    .ok_or_else(|| RgError::invalid_handle("rt-geometry", t.geometry))?;
                let geometries = t
                    .inputs
                    .iter()
                    .map(|input| native_geometry(ctx, input))
                    .collect::<RgResult<Vec<_>>>()?;
                ctx.encoder.build_acceleration_structure(&GfxAccelStructBuild {
                    ty: vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
                    flags: t.flags,
                    src: t.update.then_some(dst),
                    dst,
                    scratch_address: get_address(ctx, t.scratch, 0)?,
                    geometries,
                });
            }
            RgTaskKind::BuildRtScene(t) => {
                let dst = ctx.get_rt_scene(t.scene).ok_or_else(|| RgError::invalid_handle("rt-scene", t.scene))?;
                ctx.encoder.build_acceleration_structure(&GfxAccelStructBuild {
                    ty: vk::AccelerationStructureTypeKHR::TOP_LEVEL,
                    flags: t.flags,
                    src: t.update.then_some(dst),
                    dst,
                    scratch_address: get_address(ctx, t.scratch, 0)?,
                    geometries: vec![GfxAccelGeometry::Instances {
                        data_address: get_address(ctx, t.instances, t.instance_offset)?,
                        instance_count: t.instance_count,
                    }],
                });
            }
            // layout 转换就是全部工作
            RgTaskKind::Present(_) => {}
            RgTaskKind::RenderPass(_) => {
                debug_assert!(false, "render pass nodes are recorded by the render pass compiler");
            }
            RgTaskKind::Custom(pass) => pass.execute(ctx),
        }
        Ok(())
    }

    fn bound_pipeline(&self, name: &str) -> RgResult<&RgPipelineDesc> {
        self.pipeline.as_deref().ok_or_else(|| RgError::BindingMismatch {
            task: name.to_string(),
            reason: "pipeline was not resolved".to_string(),
        })
    }

    /// 累计这个 task 录制的命令数量
    pub(crate) fn count_commands(&self, stats: &mut RgRenderingStats) {
        match &self.kind {
            RgTaskKind::CopyBuffer(_)
            | RgTaskKind::CopyImage(_)
            | RgTaskKind::CopyBufferToImage(_)
            | RgTaskKind::CopyImageToBuffer(_)
            | RgTaskKind::BlitImage(_)
            | RgTaskKind::ResolveImage(_)
            | RgTaskKind::UpdateBuffer(_) => stats.copies += 1,
            RgTaskKind::FillBuffer(_) | RgTaskKind::ClearColorImage(_) | RgTaskKind::ClearDepthStencilImage(_) => {
                stats.clears += 1
            }
            RgTaskKind::Dispatch(_) | RgTaskKind::DispatchIndirect(_) => stats.dispatches += 1,
            RgTaskKind::TraceRays(_) => stats.trace_rays += 1,
            RgTaskKind::BuildRtGeometry(_) | RgTaskKind::BuildRtScene(_) => stats.accel_builds += 1,
            RgTaskKind::Present(_) => stats.presents += 1,
            RgTaskKind::RenderPass(_) | RgTaskKind::Custom(_) => {}
        }
    }
}

fn native_geometry(ctx: &RgPassContext<'_>, input: &RgRtGeometryInput) -> RgResult<GfxAccelGeometry> {
    Ok(match *input {
        RgRtGeometryInput::Triangles {
            vertices,
            vertex_offset,
            vertex_stride,
            vertex_format,
            max_vertex,
            indices,
            primitive_count,
            opaque,
        } => {
            let (index_address, index_type) = match indices {
                Some((buffer, offset, index_type)) => (get_address(ctx, buffer, offset)?, index_type),
                None => (0, vk::IndexType::NONE_KHR),
            };
            GfxAccelGeometry::Triangles {
                vertex_address: get_address(ctx, vertices, vertex_offset)?,
                vertex_stride,
                vertex_format,
                max_vertex,
                index_address,
                index_type,
                transform_address: 0,
                primitive_count,
                opaque,
            }
        }
        RgRtGeometryInput::Aabbs {
            buffer,
            offset,
            stride,
            primitive_count,
            opaque,
        } => GfxAccelGeometry::Aabbs {
            data_address: get_address(ctx, buffer, offset)?,
            stride,
            primitive_count,
            opaque,
        },
    })
}

#[cfg(test)]
mod tests {
    use slotmap::KeyData;

    use super::*;

    #[test]
    fn test_merge_same_layout_unions_access() {
        let id = RgBufferId::from(KeyData::from_ffi(3));
        let merged = merge_accesses(vec![
            buffer(id, RgBufferState::TRANSFER_SRC),
            buffer(id, RgBufferState::TRANSFER_DST),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].1.access, vk::AccessFlags2::TRANSFER_READ | vk::AccessFlags2::TRANSFER_WRITE);
        assert!(merged[0].1.is_write());
    }

    #[test]
    fn test_merge_different_layouts_uses_general() {
        let id = RgImageId::from(KeyData::from_ffi(5));
        let other = RgImageId::from(KeyData::from_ffi(6));
        let merged = merge_accesses(vec![
            image(id, RgImageState::TRANSFER_SRC),
            image(other, RgImageState::SHADER_READ_FRAGMENT),
            image(id, RgImageState::TRANSFER_DST),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].1.layout, vk::ImageLayout::GENERAL);
        assert_eq!(merged[1].1.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }
}
