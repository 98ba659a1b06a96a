//! 命令录制接口
//!
//! frame graph 只通过 [`GfxCommandEncoder`] 发出原生命令，每个方法对应一个 `vkCmd*` 调用。

use ash::vk;

use crate::GfxResult;
use crate::commands::accel::{GfxAccelStructBuild, GfxTraceRays};
use crate::commands::barrier::GfxDependencyInfo;
use crate::commands::descriptor::GfxDescriptorWrite;
use crate::commands::render_pass::{GfxClearColor, GfxRenderPassBegin};

/// 一个正在录制的原生 command buffer
///
/// 一个 encoder 只会被一个线程使用，但可以在线程之间移动。
pub trait GfxCommandEncoder: Send {
    fn command_buffer(&self) -> vk::CommandBuffer;

    /// 结束录制，返回可以提交的 command buffer
    fn finish(self: Box<Self>) -> GfxResult<vk::CommandBuffer>;

    // barrier
    fn pipeline_barrier(&mut self, dependency: &GfxDependencyInfo);

    // render pass
    fn begin_render_pass(&mut self, begin: &GfxRenderPassBegin);
    fn next_subpass(&mut self);
    fn end_render_pass(&mut self);
    fn set_viewport(&mut self, viewport: vk::Viewport);
    fn set_scissor(&mut self, scissor: vk::Rect2D);

    // pipeline state
    fn bind_pipeline(&mut self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline);
    fn push_descriptor_set(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set: u32,
        writes: &[GfxDescriptorWrite],
    );
    fn push_constants(&mut self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, offset: u32, data: &[u8]);
    fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]);
    fn bind_index_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType);

    // draw
    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);
    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    fn draw_indirect(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, draw_count: u32, stride: u32);
    fn draw_indexed_indirect(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, draw_count: u32, stride: u32);
    fn draw_mesh_tasks(&mut self, group_count: [u32; 3]);

    // compute
    fn dispatch(&mut self, group_count: [u32; 3]);
    fn dispatch_indirect(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize);

    // transfer
    fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]);
    fn copy_image(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageCopy],
    );
    fn copy_buffer_to_image(
        &mut self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    );
    fn copy_image_to_buffer(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    );
    fn blit_image(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    );
    fn resolve_image(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageResolve],
    );
    fn fill_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize, data: u32);
    fn update_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]);
    fn clear_color_image(
        &mut self,
        image: vk::Image,
        layout: vk::ImageLayout,
        color: GfxClearColor,
        ranges: &[vk::ImageSubresourceRange],
    );
    fn clear_depth_stencil_image(
        &mut self,
        image: vk::Image,
        layout: vk::ImageLayout,
        value: vk::ClearDepthStencilValue,
        ranges: &[vk::ImageSubresourceRange],
    );

    // ray tracing
    fn build_acceleration_structure(&mut self, build: &GfxAccelStructBuild);
    fn trace_rays(&mut self, trace: &GfxTraceRays);

    // debug
    fn begin_label(&mut self, name: &str, color: [f32; 4]);
    fn end_label(&mut self);
}
