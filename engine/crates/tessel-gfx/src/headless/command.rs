use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use super::HeadlessState;
use crate::GfxResult;
use crate::commands::accel::{GfxAccelStructBuild, GfxTraceRays};
use crate::commands::barrier::GfxDependencyInfo;
use crate::commands::descriptor::GfxDescriptorWrite;
use crate::commands::encoder::GfxCommandEncoder;
use crate::commands::render_pass::{GfxClearColor, GfxRenderPassBegin};

/// 被记录下来的一条原生命令
#[derive(Clone, Debug)]
pub enum GfxCommand {
    PipelineBarrier(GfxDependencyInfo),
    BeginRenderPass(GfxRenderPassBegin),
    NextSubpass,
    EndRenderPass,
    SetViewport(vk::Viewport),
    SetScissor(vk::Rect2D),
    BindPipeline {
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    },
    PushDescriptorSet {
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set: u32,
        writes: Vec<GfxDescriptorWrite>,
    },
    PushConstants {
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: Vec<u8>,
    },
    BindVertexBuffers {
        first_binding: u32,
        buffers: Vec<vk::Buffer>,
        offsets: Vec<vk::DeviceSize>,
    },
    BindIndexBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    },
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
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        draw_count: u32,
        stride: u32,
        indexed: bool,
    },
    DrawMeshTasks([u32; 3]),
    Dispatch([u32; 3]),
    DispatchIndirect {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
    },
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: Vec<vk::BufferCopy>,
    },
    CopyImage {
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: Vec<vk::ImageCopy>,
    },
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: Vec<vk::BufferImageCopy>,
    },
    CopyImageToBuffer {
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: Vec<vk::BufferImageCopy>,
    },
    BlitImage {
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: Vec<vk::ImageBlit>,
        filter: vk::Filter,
    },
    ResolveImage {
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: Vec<vk::ImageResolve>,
    },
    FillBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        data: u32,
    },
    UpdateBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        data: Vec<u8>,
    },
    ClearColorImage {
        image: vk::Image,
        layout: vk::ImageLayout,
        color: GfxClearColor,
    },
    ClearDepthStencilImage {
        image: vk::Image,
        layout: vk::ImageLayout,
        value: vk::ClearDepthStencilValue,
    },
    BuildAccelerationStructure(GfxAccelStructBuild),
    TraceRays(GfxTraceRays),
    BeginLabel {
        name: String,
        color: [f32; 4],
    },
    EndLabel,
}

impl GfxCommand {
    #[inline]
    pub fn as_pipeline_barrier(&self) -> Option<&GfxDependencyInfo> {
        match self {
            Self::PipelineBarrier(dependency) => Some(dependency),
            _ => None,
        }
    }

    #[inline]
    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            Self::Draw { .. } | Self::DrawIndexed { .. } | Self::DrawIndirect { .. } | Self::DrawMeshTasks(_)
        )
    }
}

pub struct HeadlessCommandEncoder {
    command_buffer: vk::CommandBuffer,
    commands: Vec<GfxCommand>,
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessCommandEncoder {
    pub(crate) fn new(command_buffer: vk::CommandBuffer, state: Arc<Mutex<HeadlessState>>) -> Self {
        Self {
            command_buffer,
            commands: Vec::new(),
            state,
        }
    }

    /// 目前已经录制的命令
    #[inline]
    pub fn commands(&self) -> &[GfxCommand] {
        &self.commands
    }
}

impl GfxCommandEncoder for HeadlessCommandEncoder {
    fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    fn finish(self: Box<Self>) -> GfxResult<vk::CommandBuffer> {
        let this = *self;
        this.state.lock().command_logs.insert(this.command_buffer, this.commands);
        Ok(this.command_buffer)
    }

    fn pipeline_barrier(&mut self, dependency: &GfxDependencyInfo) {
        self.commands.push(GfxCommand::PipelineBarrier(dependency.clone()));
    }

    fn begin_render_pass(&mut self, begin: &GfxRenderPassBegin) {
        self.commands.push(GfxCommand::BeginRenderPass(begin.clone()));
    }

    fn next_subpass(&mut self) {
        self.commands.push(GfxCommand::NextSubpass);
    }

    fn end_render_pass(&mut self) {
        self.commands.push(GfxCommand::EndRenderPass);
    }

    fn set_viewport(&mut self, viewport: vk::Viewport) {
        self.commands.push(GfxCommand::SetViewport(viewport));
    }

    fn set_scissor(&mut self, scissor: vk::Rect2D) {
        self.commands.push(GfxCommand::SetScissor(scissor));
    }

    fn bind_pipeline(&mut self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        self.commands.push(GfxCommand::BindPipeline { bind_point, pipeline });
    }

    fn push_descriptor_set(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set: u32,
        writes: &[GfxDescriptorWrite],
    ) {
        self.commands.push(GfxCommand::PushDescriptorSet {
            bind_point,
            layout,
            set,
            writes: writes.to_vec(),
        });
    }

    fn push_constants(&mut self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, offset: u32, data: &[u8]) {
        self.commands.push(GfxCommand::PushConstants {
            layout,
            stages,
            offset,
            data: data.to_vec(),
        });
    }

    fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]) {
        self.commands.push(GfxCommand::BindVertexBuffers {
            first_binding,
            buffers: buffers.to_vec(),
            offsets: offsets.to_vec(),
        });
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        self.commands.push(GfxCommand::BindIndexBuffer {
            buffer,
            offset,
            index_type,
        });
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.commands.push(GfxCommand::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.commands.push(GfxCommand::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        });
    }

    fn draw_indirect(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, draw_count: u32, stride: u32) {
        self.commands.push(GfxCommand::DrawIndirect {
            buffer,
            offset,
            draw_count,
            stride,
            indexed: false,
        });
    }

    fn draw_indexed_indirect(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, draw_count: u32, stride: u32) {
        self.commands.push(GfxCommand::DrawIndirect {
            buffer,
            offset,
            draw_count,
            stride,
            indexed: true,
        });
    }

    fn draw_mesh_tasks(&mut self, group_count: [u32; 3]) {
        self.commands.push(GfxCommand::DrawMeshTasks(group_count));
    }

    fn dispatch(&mut self, group_count: [u32; 3]) {
        self.commands.push(GfxCommand::Dispatch(group_count));
    }

    fn dispatch_indirect(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize) {
        self.commands.push(GfxCommand::DispatchIndirect { buffer, offset });
    }

    fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        self.commands.push(GfxCommand::CopyBuffer {
            src,
            dst,
            regions: regions.to_vec(),
        });
    }

    fn copy_image(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageCopy],
    ) {
        self.commands.push(GfxCommand::CopyImage {
            src,
            src_layout,
            dst,
            dst_layout,
            regions: regions.to_vec(),
        });
    }

    fn copy_buffer_to_image(
        &mut self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        self.commands.push(GfxCommand::CopyBufferToImage {
            src,
            dst,
            dst_layout,
            regions: regions.to_vec(),
        });
    }

    fn copy_image_to_buffer(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    ) {
        self.commands.push(GfxCommand::CopyImageToBuffer {
            src,
            src_layout,
            dst,
            regions: regions.to_vec(),
        });
    }

    fn blit_image(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    ) {
        self.commands.push(GfxCommand::BlitImage {
            src,
            src_layout,
            dst,
            dst_layout,
            regions: regions.to_vec(),
            filter,
        });
    }

    fn resolve_image(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageResolve],
    ) {
        self.commands.push(GfxCommand::ResolveImage {
            src,
            src_layout,
            dst,
            dst_layout,
            regions: regions.to_vec(),
        });
    }

    fn fill_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize, data: u32) {
        self.commands.push(GfxCommand::FillBuffer {
            buffer,
            offset,
            size,
            data,
        });
    }

    fn update_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) {
        self.commands.push(GfxCommand::UpdateBuffer {
            buffer,
            offset,
            data: data.to_vec(),
        });
    }

    fn clear_color_image(
        &mut self,
        image: vk::Image,
        layout: vk::ImageLayout,
        color: GfxClearColor,
        _ranges: &[vk::ImageSubresourceRange],
    ) {
        self.commands.push(GfxCommand::ClearColorImage { image, layout, color });
    }

    fn clear_depth_stencil_image(
        &mut self,
        image: vk::Image,
        layout: vk::ImageLayout,
        value: vk::ClearDepthStencilValue,
        _ranges: &[vk::ImageSubresourceRange],
    ) {
        self.commands.push(GfxCommand::ClearDepthStencilImage { image, layout, value });
    }

    fn build_acceleration_structure(&mut self, build: &GfxAccelStructBuild) {
        self.commands.push(GfxCommand::BuildAccelerationStructure(build.clone()));
    }

    fn trace_rays(&mut self, trace: &GfxTraceRays) {
        self.commands.push(GfxCommand::TraceRays(*trace));
    }

    fn begin_label(&mut self, name: &str, color: [f32; 4]) {
        self.commands.push(GfxCommand::BeginLabel {
            name: name.to_string(),
            color,
        });
    }

    fn end_label(&mut self) {
        self.commands.push(GfxCommand::EndLabel);
    }
}
