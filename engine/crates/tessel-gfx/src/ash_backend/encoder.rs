use std::ffi::CString;

use ash::vk;
use itertools::Itertools;

use super::AshExtensions;
use crate::GfxResult;
use crate::commands::accel::{GfxAccelGeometry, GfxAccelStructBuild, GfxTraceRays};
use crate::commands::barrier::GfxDependencyInfo;
use crate::commands::descriptor::{GfxDescriptorResource, GfxDescriptorWrite};
use crate::commands::encoder::GfxCommandEncoder;
use crate::commands::render_pass::{GfxClearColor, GfxRenderPassBegin};

/// 基于 ash 的命令录制
///
/// 扩展命令（mesh shader、光追、push descriptor、debug label）在对应扩展没有启用时会被跳过并打印警告。
pub struct AshCommandEncoder {
    device: ash::Device,
    extensions: AshExtensions,
    command_buffer: vk::CommandBuffer,
}

impl AshCommandEncoder {
    pub(crate) fn new(device: ash::Device, extensions: AshExtensions, command_buffer: vk::CommandBuffer) -> Self {
        Self {
            device,
            extensions,
            command_buffer,
        }
    }
}

impl GfxCommandEncoder for AshCommandEncoder {
    #[inline]
    fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    fn finish(self: Box<Self>) -> GfxResult<vk::CommandBuffer> {
        unsafe { self.device.end_command_buffer(self.command_buffer)? };
        Ok(self.command_buffer)
    }

    fn pipeline_barrier(&mut self, dependency: &GfxDependencyInfo) {
        let memory_barriers = dependency.memory_barriers.iter().map(|b| b.to_vk()).collect_vec();
        let buffer_barriers = dependency.buffer_barriers.iter().map(|b| b.to_vk()).collect_vec();
        let image_barriers = dependency.image_barriers.iter().map(|b| b.to_vk()).collect_vec();
        let info = vk::DependencyInfo::default()
            .memory_barriers(&memory_barriers)
            .buffer_memory_barriers(&buffer_barriers)
            .image_memory_barriers(&image_barriers);
        unsafe { self.device.cmd_pipeline_barrier2(self.command_buffer, &info) };
    }

    fn begin_render_pass(&mut self, begin: &GfxRenderPassBegin) {
        let clear_values = begin.clear_values.iter().map(|c| c.to_vk()).collect_vec();
        let info = vk::RenderPassBeginInfo::default()
            .render_pass(begin.render_pass)
            .framebuffer(begin.framebuffer)
            .render_area(begin.render_area)
            .clear_values(&clear_values);
        unsafe {
            self.device.cmd_begin_render_pass(self.command_buffer, &info, vk::SubpassContents::INLINE);
        }
    }

    fn next_subpass(&mut self) {
        unsafe { self.device.cmd_next_subpass(self.command_buffer, vk::SubpassContents::INLINE) };
    }

    fn end_render_pass(&mut self) {
        unsafe { self.device.cmd_end_render_pass(self.command_buffer) };
    }

    fn set_viewport(&mut self, viewport: vk::Viewport) {
        unsafe { self.device.cmd_set_viewport(self.command_buffer, 0, std::slice::from_ref(&viewport)) };
    }

    fn set_scissor(&mut self, scissor: vk::Rect2D) {
        unsafe { self.device.cmd_set_scissor(self.command_buffer, 0, std::slice::from_ref(&scissor)) };
    }

    fn bind_pipeline(&mut self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe { self.device.cmd_bind_pipeline(self.command_buffer, bind_point, pipeline) };
    }

    fn push_descriptor_set(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set: u32,
        writes: &[GfxDescriptorWrite],
    ) {
        let Some(push_descriptor) = &self.extensions.push_descriptor else {
            log::warn!("push_descriptor_set ignored: VK_KHR_push_descriptor is not enabled");
            return;
        };

        // 先把所有 info 放进稳定的数组，再构造引用它们的 WriteDescriptorSet
        let buffer_infos = writes
            .iter()
            .map(|w| match w.resource {
                GfxDescriptorResource::Buffer { buffer, offset, range } => {
                    vk::DescriptorBufferInfo { buffer, offset, range }
                }
                _ => vk::DescriptorBufferInfo::default(),
            })
            .collect_vec();
        let image_infos = writes
            .iter()
            .map(|w| match w.resource {
                GfxDescriptorResource::Image { view, layout } => vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view: view,
                    image_layout: layout,
                },
                GfxDescriptorResource::CombinedImageSampler { view, layout, sampler } => vk::DescriptorImageInfo {
                    sampler,
                    image_view: view,
                    image_layout: layout,
                },
                GfxDescriptorResource::Sampler(sampler) => vk::DescriptorImageInfo {
                    sampler,
                    ..Default::default()
                },
                _ => vk::DescriptorImageInfo::default(),
            })
            .collect_vec();
        let accels = writes
            .iter()
            .map(|w| match w.resource {
                GfxDescriptorResource::AccelerationStructure(accel) => accel,
                _ => vk::AccelerationStructureKHR::null(),
            })
            .collect_vec();
        let mut accel_infos = accels
            .iter()
            .map(|accel| {
                vk::WriteDescriptorSetAccelerationStructureKHR::default()
                    .acceleration_structures(std::slice::from_ref(accel))
            })
            .collect_vec();

        let mut vk_writes = Vec::with_capacity(writes.len());
        for (i, (write, accel_info)) in writes.iter().zip(accel_infos.iter_mut()).enumerate() {
            let vk_write = vk::WriteDescriptorSet::default()
                .dst_binding(write.binding)
                .dst_array_element(write.array_element)
                .descriptor_type(write.descriptor_type);
            let vk_write = match write.resource {
                GfxDescriptorResource::Buffer { .. } => {
                    vk_write.buffer_info(std::slice::from_ref(&buffer_infos[i]))
                }
                GfxDescriptorResource::AccelerationStructure(_) => {
                    vk_write.push_next(accel_info).descriptor_count(1)
                }
                _ => vk_write.image_info(std::slice::from_ref(&image_infos[i])),
            };
            vk_writes.push(vk_write);
        }

        unsafe {
            push_descriptor.cmd_push_descriptor_set(self.command_buffer, bind_point, layout, set, &vk_writes);
        }
    }

    fn push_constants(&mut self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, offset: u32, data: &[u8]) {
        unsafe { self.device.cmd_push_constants(self.command_buffer, layout, stages, offset, data) };
    }

    fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]) {
        unsafe { self.device.cmd_bind_vertex_buffers(self.command_buffer, first_binding, buffers, offsets) };
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        unsafe { self.device.cmd_bind_index_buffer(self.command_buffer, buffer, offset, index_type) };
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            self.device.cmd_draw(self.command_buffer, vertex_count, instance_count, first_vertex, first_instance);
        }
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                self.command_buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    fn draw_indirect(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, draw_count: u32, stride: u32) {
        unsafe { self.device.cmd_draw_indirect(self.command_buffer, buffer, offset, draw_count, stride) };
    }

    fn draw_indexed_indirect(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, draw_count: u32, stride: u32) {
        unsafe { self.device.cmd_draw_indexed_indirect(self.command_buffer, buffer, offset, draw_count, stride) };
    }

    fn draw_mesh_tasks(&mut self, group_count: [u32; 3]) {
        let Some(mesh_shader) = &self.extensions.mesh_shader else {
            log::warn!("draw_mesh_tasks ignored: VK_EXT_mesh_shader is not enabled");
            return;
        };
        unsafe {
            mesh_shader.cmd_draw_mesh_tasks(self.command_buffer, group_count[0], group_count[1], group_count[2]);
        }
    }

    fn dispatch(&mut self, group_count: [u32; 3]) {
        unsafe { self.device.cmd_dispatch(self.command_buffer, group_count[0], group_count[1], group_count[2]) };
    }

    fn dispatch_indirect(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize) {
        unsafe { self.device.cmd_dispatch_indirect(self.command_buffer, buffer, offset) };
    }

    fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe { self.device.cmd_copy_buffer(self.command_buffer, src, dst, regions) };
    }

    fn copy_image(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageCopy],
    ) {
        unsafe { self.device.cmd_copy_image(self.command_buffer, src, src_layout, dst, dst_layout, regions) };
    }

    fn copy_buffer_to_image(
        &mut self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe { self.device.cmd_copy_buffer_to_image(self.command_buffer, src, dst, dst_layout, regions) };
    }

    fn copy_image_to_buffer(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe { self.device.cmd_copy_image_to_buffer(self.command_buffer, src, src_layout, dst, regions) };
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
        unsafe {
            self.device.cmd_blit_image(self.command_buffer, src, src_layout, dst, dst_layout, regions, filter);
        }
    }

    fn resolve_image(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageResolve],
    ) {
        unsafe { self.device.cmd_resolve_image(self.command_buffer, src, src_layout, dst, dst_layout, regions) };
    }

    fn fill_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize, data: u32) {
        unsafe { self.device.cmd_fill_buffer(self.command_buffer, buffer, offset, size, data) };
    }

    fn update_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) {
        unsafe { self.device.cmd_update_buffer(self.command_buffer, buffer, offset, data) };
    }

    fn clear_color_image(
        &mut self,
        image: vk::Image,
        layout: vk::ImageLayout,
        color: GfxClearColor,
        ranges: &[vk::ImageSubresourceRange],
    ) {
        let color = color.to_vk();
        unsafe { self.device.cmd_clear_color_image(self.command_buffer, image, layout, &color, ranges) };
    }

    fn clear_depth_stencil_image(
        &mut self,
        image: vk::Image,
        layout: vk::ImageLayout,
        value: vk::ClearDepthStencilValue,
        ranges: &[vk::ImageSubresourceRange],
    ) {
        unsafe { self.device.cmd_clear_depth_stencil_image(self.command_buffer, image, layout, &value, ranges) };
    }

    fn build_acceleration_structure(&mut self, build: &GfxAccelStructBuild) {
        let Some(accel) = &self.extensions.acceleration_structure else {
            log::warn!("build_acceleration_structure ignored: VK_KHR_acceleration_structure is not enabled");
            return;
        };

        let geometries = build.geometries.iter().map(to_vk_geometry).collect_vec();
        let ranges = build
            .geometries
            .iter()
            .map(|g| vk::AccelerationStructureBuildRangeInfoKHR {
                primitive_count: g.primitive_count(),
                primitive_offset: 0,
                first_vertex: 0,
                transform_offset: 0,
            })
            .collect_vec();

        let mode = if build.src.is_some() {
            vk::BuildAccelerationStructureModeKHR::UPDATE
        } else {
            vk::BuildAccelerationStructureModeKHR::BUILD
        };
        let info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(build.ty)
            .flags(build.flags)
            .mode(mode)
            .src_acceleration_structure(build.src.unwrap_or_default())
            .dst_acceleration_structure(build.dst)
            .geometries(&geometries)
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: build.scratch_address,
            });

        unsafe {
            accel.cmd_build_acceleration_structures(
                self.command_buffer,
                std::slice::from_ref(&info),
                &[ranges.as_slice()],
            );
        }
    }

    fn trace_rays(&mut self, trace: &GfxTraceRays) {
        let Some(ray_tracing) = &self.extensions.ray_tracing_pipeline else {
            log::warn!("trace_rays ignored: VK_KHR_ray_tracing_pipeline is not enabled");
            return;
        };
        unsafe {
            ray_tracing.cmd_trace_rays(
                self.command_buffer,
                &trace.raygen,
                &trace.miss,
                &trace.hit,
                &trace.callable,
                trace.width,
                trace.height,
                trace.depth,
            );
        }
    }

    fn begin_label(&mut self, name: &str, color: [f32; 4]) {
        let Some(debug_utils) = &self.extensions.debug_utils else {
            return;
        };
        let name = CString::new(name).unwrap_or_default();
        let label = vk::DebugUtilsLabelEXT::default().label_name(&name).color(color);
        unsafe { debug_utils.cmd_begin_debug_utils_label(self.command_buffer, &label) };
    }

    fn end_label(&mut self) {
        if let Some(debug_utils) = &self.extensions.debug_utils {
            unsafe { debug_utils.cmd_end_debug_utils_label(self.command_buffer) };
        }
    }
}

fn to_vk_geometry(geometry: &GfxAccelGeometry) -> vk::AccelerationStructureGeometryKHR<'static> {
    match *geometry {
        GfxAccelGeometry::Triangles {
            vertex_address,
            vertex_stride,
            vertex_format,
            max_vertex,
            index_address,
            index_type,
            transform_address,
            opaque,
            ..
        } => vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
            .flags(if opaque { vk::GeometryFlagsKHR::OPAQUE } else { vk::GeometryFlagsKHR::empty() })
            .geometry(vk::AccelerationStructureGeometryDataKHR {
                triangles: vk::AccelerationStructureGeometryTrianglesDataKHR::default()
                    .vertex_format(vertex_format)
                    .vertex_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: vertex_address,
                    })
                    .vertex_stride(vertex_stride)
                    .max_vertex(max_vertex)
                    .index_type(index_type)
                    .index_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: index_address,
                    })
                    .transform_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: transform_address,
                    }),
            }),
        GfxAccelGeometry::Aabbs {
            data_address,
            stride,
            opaque,
            ..
        } => vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::AABBS)
            .flags(if opaque { vk::GeometryFlagsKHR::OPAQUE } else { vk::GeometryFlagsKHR::empty() })
            .geometry(vk::AccelerationStructureGeometryDataKHR {
                aabbs: vk::AccelerationStructureGeometryAabbsDataKHR::default()
                    .data(vk::DeviceOrHostAddressConstKHR {
                        device_address: data_address,
                    })
                    .stride(stride),
            }),
        GfxAccelGeometry::Instances { data_address, .. } => vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES)
            .geometry(vk::AccelerationStructureGeometryDataKHR {
                instances: vk::AccelerationStructureGeometryInstancesDataKHR::default()
                    .array_of_pointers(false)
                    .data(vk::DeviceOrHostAddressConstKHR {
                        device_address: data_address,
                    }),
            }),
    }
}
