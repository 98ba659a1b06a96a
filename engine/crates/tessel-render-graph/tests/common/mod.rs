#![allow(dead_code)]

use std::sync::Arc;

use ash::vk;
use tessel_gfx::commands::descriptor::GfxPipelineLayoutDesc;
use tessel_gfx::device::{GfxDevice, GfxQueueType};
use tessel_gfx::headless::{GfxCommand, HeadlessDevice};
use tessel_gfx::resources::buffer::GfxBufferDesc;
use tessel_gfx::resources::image::GfxImageDesc;
use tessel_render_graph::handle::{RgBufferId, RgImageId, RgPipelineId, RgStrong};
use tessel_render_graph::pipeline::{RgGraphicsOutputs, RgPipelineDesc};
use tessel_render_graph::resource_state::{RgBufferState, RgImageState};
use tessel_render_graph::{RgCommandBuffer, RgCommandBufferDesc, RgFrameGraph, RgSettings};

pub struct Fixture {
    pub device: Arc<HeadlessDevice>,
    pub fg: RgFrameGraph,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_settings(RgSettings::default())
    }

    pub fn with_settings(settings: RgSettings) -> Self {
        tessel_crate_tools::init_log::init_test_log();
        let device = Arc::new(HeadlessDevice::new());
        let fg = RgFrameGraph::new(device.clone(), settings).unwrap();
        fg.begin_frame().unwrap();
        Self { device, fg }
    }

    pub fn begin(&self, name: &str) -> RgCommandBuffer {
        self.fg.begin(RgCommandBufferDesc::new(name, GfxQueueType::Graphics), &[]).unwrap()
    }

    /// 外部创建的 buffer，带着指定的初始状态导入
    pub fn import_buffer(&self, name: &str, initial: RgBufferState, default: RgBufferState) -> RgStrong<RgBufferId> {
        let desc = GfxBufferDesc::new(256, vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST);
        let allocation = self.device.create_buffer(&desc, name).unwrap();
        self.fg.resources().import_buffer(name, allocation, initial, default)
    }

    pub fn color_target(&self, name: &str, samples: vk::SampleCountFlags) -> RgStrong<RgImageId> {
        let desc = GfxImageDesc::new_2d(64, 64, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .with_samples(samples);
        self.fg.resources().create_image(name, &desc, RgImageState::UNDEFINED).unwrap()
    }

    pub fn graphics_pipeline(&self, samples: vk::SampleCountFlags) -> RgStrong<RgPipelineId> {
        let outputs = RgGraphicsOutputs {
            color_formats: vec![vk::Format::R8G8B8A8_UNORM],
            depth_format: None,
            samples,
            depth_write: false,
        };
        self.fg.resources().import_pipeline(RgPipelineDesc::graphics(
            "triangle",
            vk::Pipeline::null(),
            vk::PipelineLayout::null(),
            GfxPipelineLayoutDesc::default(),
            outputs,
        ))
    }

    /// 按提交顺序返回所有录制过的命令
    pub fn submitted_commands(&self) -> Vec<GfxCommand> {
        self.device
            .submissions()
            .iter()
            .flat_map(|s| s.info.command_buffers.clone())
            .filter_map(|cb| self.device.command_log(cb))
            .flatten()
            .collect()
    }
}

pub fn pipeline_barrier_count(commands: &[GfxCommand]) -> usize {
    commands.iter().filter(|c| c.as_pipeline_barrier().is_some()).count()
}
