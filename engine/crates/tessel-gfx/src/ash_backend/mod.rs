//! 基于 ash 的 [`GfxDevice`] 实现
//!
//! instance / device / queue 的创建属于更上层的初始化代码，这里只接收创建好的对象。

mod encoder;

pub use encoder::AshCommandEncoder;

use std::collections::HashMap;
use std::ffi::CString;
use std::sync::Arc;

use ash::vk;
use itertools::Itertools;
use parking_lot::Mutex;

use crate::commands::encoder::GfxCommandEncoder;
use crate::commands::render_pass::{GfxFramebufferDesc, GfxRenderPassDesc};
use crate::commands::submit_info::{GfxPresentInfo, GfxSubmitInfo};
use crate::device::{GfxDevice, GfxQueueType, GfxWaitResult};
use crate::format;
use crate::resources::buffer::{GfxAccelStructAllocation, GfxBufferAllocation, GfxBufferDesc};
use crate::resources::image::{GfxImageAllocation, GfxImageDesc};
use crate::resources::memory::{GfxMemoryAllocator, GfxMemoryRequest};
use crate::resources::sampler::GfxSamplerDesc;
use crate::{GfxError, GfxResult};

/// 设备上启用的扩展对应的函数表
#[derive(Clone, Default)]
pub struct AshExtensions {
    pub debug_utils: Option<ash::ext::debug_utils::Device>,
    pub push_descriptor: Option<ash::khr::push_descriptor::Device>,
    pub acceleration_structure: Option<ash::khr::acceleration_structure::Device>,
    pub ray_tracing_pipeline: Option<ash::khr::ray_tracing_pipeline::Device>,
    pub mesh_shader: Option<ash::ext::mesh_shader::Device>,
    pub swapchain: Option<ash::khr::swapchain::Device>,
}

/// 初始化 [`AshExtensions`] 时需要加载哪些扩展
#[derive(Clone, Copy, Debug, Default)]
pub struct AshExtensionSet {
    pub debug_utils: bool,
    pub push_descriptor: bool,
    pub ray_tracing: bool,
    pub mesh_shader: bool,
    pub swapchain: bool,
}

impl AshExtensions {
    pub fn load(instance: &ash::Instance, device: &ash::Device, set: AshExtensionSet) -> Self {
        Self {
            debug_utils: set.debug_utils.then(|| ash::ext::debug_utils::Device::new(instance, device)),
            push_descriptor: set.push_descriptor.then(|| ash::khr::push_descriptor::Device::new(instance, device)),
            acceleration_structure: set
                .ray_tracing
                .then(|| ash::khr::acceleration_structure::Device::new(instance, device)),
            ray_tracing_pipeline: set
                .ray_tracing
                .then(|| ash::khr::ray_tracing_pipeline::Device::new(instance, device)),
            mesh_shader: set.mesh_shader.then(|| ash::ext::mesh_shader::Device::new(instance, device)),
            swapchain: set.swapchain.then(|| ash::khr::swapchain::Device::new(instance, device)),
        }
    }
}

/// 一个硬件队列
#[derive(Clone, Copy, Debug)]
pub struct AshQueue {
    pub queue_type: GfxQueueType,
    pub family_index: u32,
    pub queue: vk::Queue,
}

pub struct AshDevice {
    device: ash::Device,
    extensions: AshExtensions,
    queues: Vec<AshQueue>,
    /// vkQueueSubmit 要求对 queue 外部同步
    queue_locks: Vec<Mutex<()>>,
    /// 所有不同的 queue family，资源以 CONCURRENT 方式共享
    queue_families: Vec<u32>,
    allocator: Arc<dyn GfxMemoryAllocator>,
    /// 每个 command buffer 使用独立的 transient pool，GPU 完成后整体销毁
    command_pools: Mutex<HashMap<vk::CommandBuffer, vk::CommandPool>>,
}

// new & init
impl AshDevice {
    pub fn new(
        device: ash::Device,
        extensions: AshExtensions,
        queues: Vec<AshQueue>,
        allocator: Arc<dyn GfxMemoryAllocator>,
    ) -> GfxResult<Self> {
        if !queues.iter().any(|q| q.queue_type == GfxQueueType::Graphics) {
            return Err(GfxError::Unsupported("a graphics queue is required"));
        }
        let queue_families = queues.iter().map(|q| q.family_index).sorted().dedup().collect_vec();
        let queue_locks = queues.iter().map(|_| Mutex::new(())).collect_vec();
        Ok(Self {
            device,
            extensions,
            queues,
            queue_locks,
            queue_families,
            allocator,
            command_pools: Mutex::new(HashMap::new()),
        })
    }
}

// getters
impl AshDevice {
    #[inline]
    pub fn ash_device(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn extensions(&self) -> &AshExtensions {
        &self.extensions
    }

    /// 找不到专用队列时退回到 graphics 队列
    fn queue_index(&self, queue_type: GfxQueueType) -> usize {
        self.queues
            .iter()
            .position(|q| q.queue_type == queue_type)
            .or_else(|| self.queues.iter().position(|q| q.queue_type == GfxQueueType::Graphics))
            .unwrap_or(0)
    }
}

// tools
impl AshDevice {
    fn set_debug_name<T: vk::Handle>(&self, handle: T, name: &str) {
        let Some(debug_utils) = &self.extensions.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::default().object_handle(handle).object_name(&name);
        if let Err(e) = unsafe { debug_utils.set_debug_utils_object_name(&info) } {
            log::warn!("failed to set debug name {:?}: {:?}", name, e);
        }
    }

    fn sharing_mode(&self) -> vk::SharingMode {
        if self.queue_families.len() > 1 { vk::SharingMode::CONCURRENT } else { vk::SharingMode::EXCLUSIVE }
    }
}

impl GfxDevice for AshDevice {
    fn queue_family_index(&self, queue: GfxQueueType) -> u32 {
        self.queues[self.queue_index(queue)].family_index
    }

    fn create_image(&self, desc: &GfxImageDesc, name: &str) -> GfxResult<GfxImageAllocation> {
        let info = vk::ImageCreateInfo::default()
            .flags(desc.flags)
            .image_type(desc.image_type)
            .format(desc.format)
            .extent(desc.extent)
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(desc.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(self.sharing_mode())
            .queue_family_indices(&self.queue_families)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&info, None).map_err(GfxError::from_vk)? };
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let block = match self.allocator.allocate(&GfxMemoryRequest {
            requirements,
            host_visible: false,
            device_address: false,
        }) {
            Ok(block) => block,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let bind_and_view = || -> GfxResult<vk::ImageView> {
            unsafe { self.device.bind_image_memory(image, block.memory, block.offset)? };
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(desc.default_view_type())
                .format(desc.format)
                .subresource_range(format::full_subresource_range(desc.format));
            Ok(unsafe { self.device.create_image_view(&view_info, None)? })
        };
        let view = match bind_and_view() {
            Ok(view) => view,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                self.allocator.free(block);
                return Err(e);
            }
        };

        self.set_debug_name(image, name);
        self.set_debug_name(view, name);
        Ok(GfxImageAllocation {
            image,
            view,
            memory: Some(block),
        })
    }

    fn destroy_image(&self, image: GfxImageAllocation) {
        unsafe {
            self.device.destroy_image_view(image.view, None);
            // 外部导入的 image 由外部负责销毁
            if let Some(block) = image.memory {
                self.device.destroy_image(image.image, None);
                self.allocator.free(block);
            }
        }
    }

    fn create_buffer(&self, desc: &GfxBufferDesc, name: &str) -> GfxResult<GfxBufferAllocation> {
        let info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(desc.usage)
            .sharing_mode(self.sharing_mode())
            .queue_family_indices(&self.queue_families);
        let buffer = unsafe { self.device.create_buffer(&info, None).map_err(GfxError::from_vk)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let block = match self.allocator.allocate(&GfxMemoryRequest {
            requirements,
            host_visible: desc.host_visible,
            device_address: desc.needs_device_address(),
        }) {
            Ok(block) => block,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        if let Err(e) = unsafe { self.device.bind_buffer_memory(buffer, block.memory, block.offset) } {
            unsafe { self.device.destroy_buffer(buffer, None) };
            self.allocator.free(block);
            return Err(GfxError::from_vk(e));
        }

        let device_address = if desc.needs_device_address() {
            unsafe { self.device.get_buffer_device_address(&vk::BufferDeviceAddressInfo::default().buffer(buffer)) }
        } else {
            0
        };

        self.set_debug_name(buffer, name);
        Ok(GfxBufferAllocation {
            buffer,
            size: desc.size,
            device_address,
            memory: Some(block),
        })
    }

    fn destroy_buffer(&self, buffer: GfxBufferAllocation) {
        if let Some(block) = buffer.memory {
            unsafe { self.device.destroy_buffer(buffer.buffer, None) };
            self.allocator.free(block);
        }
    }

    fn create_sampler(&self, desc: &GfxSamplerDesc) -> GfxResult<vk::Sampler> {
        Ok(unsafe { self.device.create_sampler(&desc.to_vk(), None)? })
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) };
    }

    fn create_acceleration_structure(
        &self,
        ty: vk::AccelerationStructureTypeKHR,
        size: vk::DeviceSize,
        name: &str,
    ) -> GfxResult<GfxAccelStructAllocation> {
        let Some(accel) = &self.extensions.acceleration_structure else {
            return Err(GfxError::Unsupported("VK_KHR_acceleration_structure"));
        };
        let buffer = self.create_buffer(
            &GfxBufferDesc::new(
                size,
                vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
                    | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            ),
            name,
        )?;
        let info = vk::AccelerationStructureCreateInfoKHR::default().buffer(buffer.buffer).size(size).ty(ty);
        let handle = match unsafe { accel.create_acceleration_structure(&info, None) } {
            Ok(handle) => handle,
            Err(e) => {
                self.destroy_buffer(buffer);
                return Err(GfxError::from_vk(e));
            }
        };
        let device_address = unsafe {
            accel.get_acceleration_structure_device_address(
                &vk::AccelerationStructureDeviceAddressInfoKHR::default().acceleration_structure(handle),
            )
        };
        self.set_debug_name(handle, name);
        Ok(GfxAccelStructAllocation {
            handle,
            ty,
            device_address,
            buffer,
        })
    }

    fn destroy_acceleration_structure(&self, allocation: GfxAccelStructAllocation) {
        if let Some(accel) = &self.extensions.acceleration_structure {
            unsafe { accel.destroy_acceleration_structure(allocation.handle, None) };
        }
        self.destroy_buffer(allocation.buffer);
    }

    fn create_render_pass(&self, desc: &GfxRenderPassDesc) -> GfxResult<vk::RenderPass> {
        let attachments = desc
            .attachments
            .iter()
            .map(|a| {
                vk::AttachmentDescription::default()
                    .format(a.format)
                    .samples(a.samples)
                    .load_op(a.load_op)
                    .store_op(a.store_op)
                    .stencil_load_op(a.stencil_load_op)
                    .stencil_store_op(a.stencil_store_op)
                    .initial_layout(a.initial_layout)
                    .final_layout(a.final_layout)
            })
            .collect_vec();

        let to_ref = |r: &crate::commands::render_pass::GfxAttachmentRef| vk::AttachmentReference {
            attachment: r.attachment,
            layout: r.layout,
        };
        let color_refs = desc.subpasses.iter().map(|s| s.color_attachments.iter().map(to_ref).collect_vec()).collect_vec();
        let input_refs = desc.subpasses.iter().map(|s| s.input_attachments.iter().map(to_ref).collect_vec()).collect_vec();
        let depth_refs = desc.subpasses.iter().map(|s| s.depth_stencil_attachment.as_ref().map(to_ref)).collect_vec();

        let subpasses = (0..desc.subpasses.len())
            .map(|i| {
                let subpass = vk::SubpassDescription::default()
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .color_attachments(&color_refs[i])
                    .input_attachments(&input_refs[i]);
                match &depth_refs[i] {
                    Some(depth) => subpass.depth_stencil_attachment(depth),
                    None => subpass,
                }
            })
            .collect_vec();

        // subpass 依赖使用 v1 的 flags，低 32 位与 v2 一致
        let dependencies = desc
            .dependencies
            .iter()
            .map(|d| {
                vk::SubpassDependency::default()
                    .src_subpass(d.src_subpass)
                    .dst_subpass(d.dst_subpass)
                    .src_stage_mask(vk::PipelineStageFlags::from_raw(d.src_stage.as_raw() as u32))
                    .dst_stage_mask(vk::PipelineStageFlags::from_raw(d.dst_stage.as_raw() as u32))
                    .src_access_mask(vk::AccessFlags::from_raw(d.src_access.as_raw() as u32))
                    .dst_access_mask(vk::AccessFlags::from_raw(d.dst_access.as_raw() as u32))
                    .dependency_flags(if d.by_region {
                        vk::DependencyFlags::BY_REGION
                    } else {
                        vk::DependencyFlags::empty()
                    })
            })
            .collect_vec();

        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        Ok(unsafe { self.device.create_render_pass(&info, None)? })
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) };
    }

    fn create_framebuffer(&self, desc: &GfxFramebufferDesc) -> GfxResult<vk::Framebuffer> {
        let info = vk::FramebufferCreateInfo::default()
            .render_pass(desc.render_pass)
            .attachments(&desc.attachments)
            .width(desc.width)
            .height(desc.height)
            .layers(desc.layers);
        Ok(unsafe { self.device.create_framebuffer(&info, None)? })
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) };
    }

    fn begin_commands(&self, queue: GfxQueueType, name: &str) -> GfxResult<Box<dyn GfxCommandEncoder>> {
        let family_index = self.queue_family_index(queue);
        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(family_index);
        let pool = unsafe { self.device.create_command_pool(&pool_info, None)? };

        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let begin = || -> GfxResult<vk::CommandBuffer> {
            let command_buffer = unsafe { self.device.allocate_command_buffers(&allocate_info)? }[0];
            let begin_info =
                vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { self.device.begin_command_buffer(command_buffer, &begin_info)? };
            Ok(command_buffer)
        };
        let command_buffer = match begin() {
            Ok(command_buffer) => command_buffer,
            Err(e) => {
                unsafe { self.device.destroy_command_pool(pool, None) };
                return Err(e);
            }
        };

        self.set_debug_name(command_buffer, name);
        self.command_pools.lock().insert(command_buffer, pool);
        Ok(Box::new(AshCommandEncoder::new(self.device.clone(), self.extensions.clone(), command_buffer)))
    }

    fn free_commands(&self, command_buffers: &[vk::CommandBuffer]) {
        let mut pools = self.command_pools.lock();
        for command_buffer in command_buffers {
            if let Some(pool) = pools.remove(command_buffer) {
                unsafe { self.device.destroy_command_pool(pool, None) };
            }
        }
    }

    fn create_semaphore(&self, name: &str) -> GfxResult<vk::Semaphore> {
        let semaphore = unsafe { self.device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)? };
        self.set_debug_name(semaphore, name);
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn create_fence(&self, signaled: bool, name: &str) -> GfxResult<vk::Fence> {
        let flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let fence = unsafe { self.device.create_fence(&vk::FenceCreateInfo::default().flags(flags), None)? };
        self.set_debug_name(fence, name);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn wait_fences(&self, fences: &[vk::Fence], timeout_ns: u64) -> GfxResult<GfxWaitResult> {
        if fences.is_empty() {
            return Ok(GfxWaitResult::Signaled);
        }
        match unsafe { self.device.wait_for_fences(fences, true, timeout_ns) } {
            Ok(()) => Ok(GfxWaitResult::Signaled),
            Err(vk::Result::TIMEOUT) => Ok(GfxWaitResult::Timeout),
            Err(e) => Err(GfxError::from_vk(e)),
        }
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> GfxResult<()> {
        if fences.is_empty() {
            return Ok(());
        }
        Ok(unsafe { self.device.reset_fences(fences)? })
    }

    fn submit(&self, queue: GfxQueueType, submits: &[GfxSubmitInfo], fence: vk::Fence) -> GfxResult<()> {
        let _span = tessel_crate_tools::profile_span!("AshDevice::submit");

        let command_infos = submits
            .iter()
            .map(|s| {
                s.command_buffers
                    .iter()
                    .map(|cmd| vk::CommandBufferSubmitInfo::default().command_buffer(*cmd))
                    .collect_vec()
            })
            .collect_vec();
        let wait_infos = submits.iter().map(|s| s.wait_infos.iter().map(|w| w.to_vk()).collect_vec()).collect_vec();
        let signal_infos =
            submits.iter().map(|s| s.signal_infos.iter().map(|w| w.to_vk()).collect_vec()).collect_vec();
        let vk_submits = (0..submits.len())
            .map(|i| {
                vk::SubmitInfo2::default()
                    .command_buffer_infos(&command_infos[i])
                    .wait_semaphore_infos(&wait_infos[i])
                    .signal_semaphore_infos(&signal_infos[i])
            })
            .collect_vec();

        let index = self.queue_index(queue);
        let _guard = self.queue_locks[index].lock();
        unsafe { self.device.queue_submit2(self.queues[index].queue, &vk_submits, fence).map_err(GfxError::from_vk) }
    }

    fn present(&self, queue: GfxQueueType, present: &GfxPresentInfo) -> GfxResult<()> {
        let Some(swapchain) = &self.extensions.swapchain else {
            return Err(GfxError::Unsupported("VK_KHR_swapchain"));
        };
        let swapchains = [present.swapchain];
        let image_indices = [present.image_index];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&present.wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let index = self.queue_index(queue);
        let _guard = self.queue_locks[index].lock();
        match unsafe { swapchain.queue_present(self.queues[index].queue, &info) } {
            Ok(suboptimal) => {
                if suboptimal {
                    log::debug!("swapchain {:?} is suboptimal", present.swapchain);
                }
                Ok(())
            }
            Err(e) => Err(GfxError::from_vk(e)),
        }
    }

    fn wait_idle(&self) -> GfxResult<()> {
        unsafe { self.device.device_wait_idle().map_err(GfxError::from_vk) }
    }
}
