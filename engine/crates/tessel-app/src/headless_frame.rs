//! 一帧的示例内容
//!
//! ```text
//! [upload]  (transfer)   update staging -> copy staging -> vertices
//!     │
//!     ▼
//! [scene]   (graphics)   albedo pass ┐ 合并为一个原生 render pass
//!                        normal pass ┘
//!                        composite pass -> swapchain image -> present
//! ```

use ash::vk;
use tessel_gfx::commands::descriptor::GfxPipelineLayoutDesc;
use tessel_gfx::commands::render_pass::GfxClearColor;
use tessel_gfx::device::{GfxDevice, GfxQueueType};
use tessel_gfx::resources::buffer::GfxBufferDesc;
use tessel_gfx::resources::image::GfxImageDesc;
use tessel_render_graph::handle::{RgBufferId, RgImageId, RgPipelineId, RgStrong, RgSwapchainId};
use tessel_render_graph::pipeline::{RgGraphicsOutputs, RgPipelineDesc};
use tessel_render_graph::render_pass::{RgDrawKind, RgDrawTask, RgRenderPassDesc};
use tessel_render_graph::resource_state::{RgBufferState, RgImageState};
use tessel_render_graph::task::RgTaskDesc;
use tessel_render_graph::task::kinds::{RgCopyBuffer, RgPresent, RgUpdateBuffer};
use tessel_render_graph::{
    RgBatchDesc, RgCommandBufferDesc, RgCommandBufferId, RgError, RgFrameGraph, RgQueueMask, RgResult,
};

const EXTENT: vk::Extent2D = vk::Extent2D {
    width: 640,
    height: 360,
};
const GBUFFER_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;
const SWAPCHAIN_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;
const SWAPCHAIN_IMAGE_COUNT: u32 = 2;

/// 三角形的顶点位置
const TRIANGLE: [[f32; 3]; 3] = [[0.0, -0.5, 0.0], [0.5, 0.5, 0.0], [-0.5, 0.5, 0.0]];

pub struct HeadlessFrame {
    staging: RgStrong<RgBufferId>,
    vertices: RgStrong<RgBufferId>,
    albedo: RgStrong<RgImageId>,
    normal: RgStrong<RgImageId>,
    swapchain: RgStrong<RgSwapchainId>,
    gbuffer_pipeline: RgStrong<RgPipelineId>,
    composite_pipeline: RgStrong<RgPipelineId>,
    frame_index: u32,
}

// new & init
impl HeadlessFrame {
    pub fn new(device: &dyn GfxDevice, fg: &RgFrameGraph) -> RgResult<Self> {
        let resources = fg.resources();
        let vertex_bytes = std::mem::size_of_val(&TRIANGLE) as vk::DeviceSize;

        let staging = resources.create_buffer(
            "staging",
            &GfxBufferDesc::new(vertex_bytes, vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST)
                .host_visible(),
            RgBufferState::UNDEFINED,
        )?;
        let vertices = resources.create_buffer(
            "vertices",
            &GfxBufferDesc::new(vertex_bytes, vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST),
            RgBufferState::VERTEX_BUFFER,
        )?;

        let gbuffer_desc = GfxImageDesc::new_2d(
            EXTENT.width,
            EXTENT.height,
            GBUFFER_FORMAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        );
        let albedo = resources.create_image("albedo", &gbuffer_desc, RgImageState::SHADER_READ_FRAGMENT)?;
        let normal = resources.create_image("normal", &gbuffer_desc, RgImageState::SHADER_READ_FRAGMENT)?;

        // headless 设备没有窗口系统，swapchain image 用普通 image 代替
        let swapchain_desc =
            GfxImageDesc::new_2d(EXTENT.width, EXTENT.height, SWAPCHAIN_FORMAT, vk::ImageUsageFlags::COLOR_ATTACHMENT);
        let swapchain_images = (0..SWAPCHAIN_IMAGE_COUNT)
            .map(|index| {
                let allocation = device.create_image(&swapchain_desc, &format!("swapchain-{}", index))?;
                Ok::<_, RgError>((allocation.image, allocation.view))
            })
            .collect::<RgResult<Vec<_>>>()?;
        let swapchain = resources.import_swapchain(
            "swapchain",
            vk::SwapchainKHR::null(),
            &swapchain_images,
            SWAPCHAIN_FORMAT,
            EXTENT,
        );

        let gbuffer_pipeline = resources.import_pipeline(Self::graphics_pipeline("gbuffer", GBUFFER_FORMAT));
        let composite_pipeline = resources.import_pipeline(Self::graphics_pipeline("composite", SWAPCHAIN_FORMAT));

        Ok(Self {
            staging,
            vertices,
            albedo,
            normal,
            swapchain,
            gbuffer_pipeline,
            composite_pipeline,
            frame_index: 0,
        })
    }

    fn graphics_pipeline(name: &str, format: vk::Format) -> RgPipelineDesc {
        RgPipelineDesc::graphics(
            name,
            vk::Pipeline::null(),
            vk::PipelineLayout::null(),
            GfxPipelineLayoutDesc::default(),
            RgGraphicsOutputs {
                color_formats: vec![format],
                depth_format: None,
                samples: vk::SampleCountFlags::TYPE_1,
                depth_write: false,
            },
        )
    }
}

// 录制
impl HeadlessFrame {
    /// 声明本帧的 batch 并录制两个 recording，返回它们的 id
    pub fn record(&mut self, fg: &RgFrameGraph) -> RgResult<Vec<RgCommandBufferId>> {
        fg.add_batch(RgBatchDesc::new("upload", RgQueueMask::TRANSFER))?;
        fg.add_batch(RgBatchDesc::new("scene", RgQueueMask::GRAPHICS).depends_on(&["upload"]))?;

        let upload = self.record_upload(fg)?;
        let scene = self.record_scene(fg)?;
        self.frame_index += 1;
        Ok(vec![upload, scene])
    }

    fn record_upload(&self, fg: &RgFrameGraph) -> RgResult<RgCommandBufferId> {
        let slot = fg.acquire(RgQueueMask::TRANSFER).ok_or_else(|| missing_slot("upload"))?;
        let mut cmd = fg.begin(RgCommandBufferDesc::new("upload", GfxQueueType::Transfer).slot(slot), &[])?;

        let data = TRIANGLE.iter().flatten().flat_map(|v| v.to_ne_bytes()).collect();
        cmd.add_task(RgTaskDesc::new(
            "update-staging",
            RgUpdateBuffer {
                buffer: self.staging.id(),
                offset: 0,
                data,
            },
        ))?;
        let size = fg.resources().buffer_size(self.vertices.id()).unwrap_or_default();
        cmd.add_task(RgTaskDesc::new(
            "copy-vertices",
            RgCopyBuffer {
                src: self.staging.id(),
                dst: self.vertices.id(),
                regions: vec![vk::BufferCopy::default().size(size)],
            },
        ))?;

        fg.execute(&mut cmd)
    }

    fn record_scene(&self, fg: &RgFrameGraph) -> RgResult<RgCommandBufferId> {
        let slot = fg.acquire(RgQueueMask::GRAPHICS).ok_or_else(|| missing_slot("scene"))?;
        let mut cmd = fg.begin(RgCommandBufferDesc::new("scene", GfxQueueType::Graphics).slot(slot), &[])?;

        let triangle = |name: &str, pipeline: RgPipelineId| {
            RgDrawTask::new(
                name,
                pipeline,
                RgDrawKind::Draw {
                    vertex_count: 3,
                    instance_count: 1,
                    first_vertex: 0,
                    first_instance: 0,
                },
            )
            .vertex_buffer(self.vertices.id(), 0)
        };

        let albedo = cmd.create_render_pass(
            RgRenderPassDesc::new("albedo-pass")
                .clear_color(self.albedo.id(), GfxClearColor::Float([0.1, 0.1, 0.1, 1.0]))
                .color([0.8, 0.4, 0.2, 1.0]),
        )?;
        cmd.add_draw_task(albedo, triangle("albedo-triangle", self.gbuffer_pipeline.id()))?;

        let normal = cmd.create_render_pass(
            RgRenderPassDesc::new("normal-pass")
                .clear_color(self.normal.id(), GfxClearColor::Float([0.5, 0.5, 1.0, 1.0]))
                .color([0.2, 0.4, 0.8, 1.0]),
        )?;
        cmd.add_draw_task(normal, triangle("normal-triangle", self.gbuffer_pipeline.id()))?;

        let image_index = self.frame_index % SWAPCHAIN_IMAGE_COUNT;
        let target = fg
            .resources()
            .swapchain_image(self.swapchain.id(), image_index)
            .ok_or_else(|| RgError::InvalidHandle {
                kind: "swapchain image",
                id: image_index.to_string(),
            })?;
        let composite = cmd.create_render_pass(
            RgRenderPassDesc::new("composite-pass")
                .clear_color(target, GfxClearColor::default())
                .depends_on(&[albedo.task(), normal.task()]),
        )?;
        cmd.add_draw_task(composite, triangle("composite-triangle", self.composite_pipeline.id()))?;

        cmd.add_task(RgTaskDesc::new(
            "present",
            RgPresent {
                swapchain: self.swapchain.id(),
                image_index,
            },
        ))?;

        fg.execute(&mut cmd)
    }
}

fn missing_slot(batch: &str) -> RgError {
    RgError::UnknownBatch(batch.to_string())
}
