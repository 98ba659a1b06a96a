mod common;

use std::time::Duration;

use ash::vk;
use ash::vk::Handle;
use common::{Fixture, pipeline_barrier_count};
use tessel_gfx::commands::descriptor::{
    GfxDescriptorBindingDesc, GfxDescriptorResource, GfxDescriptorSetLayoutDesc, GfxDescriptorWrite,
    GfxPipelineLayoutDesc,
};
use tessel_gfx::commands::render_pass::GfxClearColor;
use tessel_gfx::device::GfxDevice;
use tessel_gfx::headless::GfxCommand;
use tessel_gfx::resources::buffer::GfxBufferDesc;
use tessel_gfx::resources::image::GfxImageDesc;
use tessel_render_graph::compiled::{RgCompiledBarrierKind, RgHazardEdge};
use tessel_render_graph::handle::{RgBufferId, RgImageId, RgPipelineId, RgStrong};
use tessel_render_graph::pipeline::{RgPipelineDesc, RgPipelineResources};
use tessel_render_graph::render_pass::{RgDrawKind, RgDrawTask, RgRenderPassDesc};
use tessel_render_graph::resource_state::{RgBufferState, RgImageState};
use tessel_render_graph::task::RgTaskDesc;
use tessel_render_graph::task::kinds::{RgCopyBuffer, RgDispatch, RgFillBuffer, RgPresent};
use tessel_render_graph::{RgError, RgQueueMask, RgRecordingState, RgSettings, RgWaitStatus};

fn copy(src: &RgStrong<RgBufferId>, dst: &RgStrong<RgBufferId>) -> RgCopyBuffer {
    RgCopyBuffer {
        src: src.id(),
        dst: dst.id(),
        regions: vec![vk::BufferCopy::default().size(256)],
    }
}

fn draw(pipeline: RgPipelineId) -> RgDrawTask {
    RgDrawTask::new(
        "triangle",
        pipeline,
        RgDrawKind::Draw {
            vertex_count: 3,
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0,
        },
    )
}

/// compute pipeline，set 0 的每个 binding 依次是给定的类型
fn compute_pipeline(fx: &Fixture, types: &[(vk::DescriptorType, bool)]) -> RgStrong<RgPipelineId> {
    let bindings = types
        .iter()
        .enumerate()
        .map(|(i, &(descriptor_type, read_only))| GfxDescriptorBindingDesc {
            binding: i as u32,
            descriptor_type,
            count: 1,
            stages: vk::ShaderStageFlags::COMPUTE,
            read_only,
        })
        .collect();
    let layout = GfxPipelineLayoutDesc {
        sets: vec![GfxDescriptorSetLayoutDesc { set: 0, bindings }],
        push_constants: Vec::new(),
    };
    fx.fg.resources().import_pipeline(RgPipelineDesc::compute(
        "filter",
        vk::Pipeline::null(),
        vk::PipelineLayout::null(),
        layout,
    ))
}

fn dispatch(pipeline: &RgStrong<RgPipelineId>, resources: RgPipelineResources) -> RgDispatch {
    RgDispatch {
        pipeline: pipeline.id(),
        resources,
        group_count: [8, 8, 1],
    }
}

fn descriptor_writes(commands: &[GfxCommand]) -> Vec<GfxDescriptorWrite> {
    commands
        .iter()
        .filter_map(|command| match command {
            GfxCommand::PushDescriptorSet { writes, .. } => Some(writes.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

fn image_layout(write: &GfxDescriptorWrite) -> Option<vk::ImageLayout> {
    match write.resource {
        GfxDescriptorResource::Image { layout, .. } | GfxDescriptorResource::CombinedImageSampler { layout, .. } => {
            Some(layout)
        }
        _ => None,
    }
}

#[test]
fn test_copy_from_read_state_needs_one_barrier() {
    let fx = Fixture::new();
    let src = fx.import_buffer("src", RgBufferState::TRANSFER_SRC, RgBufferState::TRANSFER_SRC);
    let dst = fx.import_buffer("dst", RgBufferState::GENERAL_READ, RgBufferState::GENERAL_READ);

    let mut cmd = fx.begin("upload");
    cmd.add_task(RgTaskDesc::new("copy", copy(&src, &dst))).unwrap();
    fx.fg.execute(&mut cmd).unwrap();

    let compiled = fx.fg.compiled_graph("upload").unwrap();
    let before: Vec<_> = compiled.barriers_before(0).collect();
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].resource.as_deref(), Some("dst"));
    assert_eq!(before[0].kind, RgCompiledBarrierKind::Buffer);
    // 写入只需要等待之前的读取完成
    assert_eq!(before[0].mask.src_access, vk::AccessFlags2::NONE);
    assert_eq!(before[0].mask.dst_access, vk::AccessFlags2::TRANSFER_WRITE);
}

#[test]
fn test_copy_from_written_source_needs_two_barriers() {
    let fx = Fixture::new();
    let src = fx.import_buffer("src", RgBufferState::TRANSFER_DST, RgBufferState::TRANSFER_SRC);
    let dst = fx.import_buffer("dst", RgBufferState::GENERAL_READ, RgBufferState::GENERAL_READ);

    let mut cmd = fx.begin("upload");
    cmd.add_task(RgTaskDesc::new("copy", copy(&src, &dst))).unwrap();
    fx.fg.execute(&mut cmd).unwrap();
    fx.fg.flush(RgQueueMask::all()).unwrap();

    let compiled = fx.fg.compiled_graph("upload").unwrap();
    assert_eq!(compiled.barriers_before(0).count(), 2);

    // 同一个 task 之前的 barrier 合并为一次调用
    let commands = fx.submitted_commands();
    let copy_at = commands.iter().position(|c| matches!(c, GfxCommand::CopyBuffer { .. })).unwrap();
    let barriers: Vec<_> = commands[..copy_at].iter().filter_map(GfxCommand::as_pipeline_barrier).collect();
    assert_eq!(barriers.len(), 1);
    assert_eq!(barriers[0].buffer_barriers.len(), 2);
    assert!(barriers[0].buffer_barriers.iter().all(|b| b.offset == 0 && b.size == vk::WHOLE_SIZE));
}

#[test]
fn test_barrier_flush_splits_at_capacity() {
    let settings = RgSettings {
        max_barriers_per_flush: 1,
        ..Default::default()
    };
    let fx = Fixture::with_settings(settings);
    let src = fx.import_buffer("src", RgBufferState::TRANSFER_DST, RgBufferState::UNDEFINED);
    let dst = fx.import_buffer("dst", RgBufferState::GENERAL_READ, RgBufferState::UNDEFINED);

    let mut cmd = fx.begin("upload");
    cmd.add_task(RgTaskDesc::new("copy", copy(&src, &dst))).unwrap();
    fx.fg.execute(&mut cmd).unwrap();
    fx.fg.flush(RgQueueMask::all()).unwrap();

    let commands = fx.submitted_commands();
    let copy_at = commands.iter().position(|c| matches!(c, GfxCommand::CopyBuffer { .. })).unwrap();
    assert_eq!(pipeline_barrier_count(&commands[..copy_at]), 2);
    assert_eq!(fx.fg.statistics().rendering.barrier_calls, 2);
}

#[test]
fn test_repeated_reads_need_no_barrier() {
    let fx = Fixture::new();
    let src = fx.import_buffer("src", RgBufferState::GENERAL_READ, RgBufferState::GENERAL_READ);
    let desc = GfxBufferDesc::new(256, vk::BufferUsageFlags::TRANSFER_DST);
    let a = fx.fg.resources().create_buffer("a", &desc, RgBufferState::UNDEFINED).unwrap();
    let b = fx.fg.resources().create_buffer("b", &desc, RgBufferState::UNDEFINED).unwrap();

    let mut cmd = fx.begin("fan-out");
    cmd.add_task(RgTaskDesc::new("copy-a", copy(&src, &a))).unwrap();
    cmd.add_task(RgTaskDesc::new("copy-b", copy(&src, &b))).unwrap();
    fx.fg.execute(&mut cmd).unwrap();
    fx.fg.flush(RgQueueMask::all()).unwrap();

    let compiled = fx.fg.compiled_graph("fan-out").unwrap();
    assert!(compiled.barriers.is_empty());
    assert!(compiled.hazards.is_empty());
    assert_eq!(compiled.stats.total_barriers(), 0);
    assert_eq!(compiled.stats.copies, 2);
    // 没有 barrier 时不会发出空的 barrier 调用
    assert_eq!(pipeline_barrier_count(&fx.submitted_commands()), 0);
}

#[test]
fn test_write_then_read_records_hazard() {
    let fx = Fixture::new();
    let desc = GfxBufferDesc::new(256, vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC);
    let staging = fx.fg.resources().create_buffer("staging", &desc, RgBufferState::UNDEFINED).unwrap();
    let target = fx.fg.resources().create_buffer("target", &desc, RgBufferState::UNDEFINED).unwrap();

    let mut cmd = fx.begin("upload");
    let fill = RgFillBuffer {
        buffer: staging.id(),
        offset: 0,
        size: vk::WHOLE_SIZE,
        data: 0xff,
    };
    cmd.add_task(RgTaskDesc::new("fill", fill)).unwrap();
    cmd.add_task(RgTaskDesc::new("copy", copy(&staging, &target))).unwrap();
    fx.fg.execute(&mut cmd).unwrap();

    let compiled = fx.fg.compiled_graph("upload").unwrap();
    assert_eq!(compiled.barriers_before(0).count(), 0);
    let before: Vec<_> = compiled.barriers_before(1).collect();
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].src_order, Some(0));
    assert_eq!(before[0].mask.src_access, vk::AccessFlags2::TRANSFER_WRITE);
    assert_eq!(before[0].mask.dst_access, vk::AccessFlags2::TRANSFER_READ);
    assert_eq!(
        compiled.hazards,
        vec![RgHazardEdge {
            src_order: 0,
            dst_order: 1,
            resource: "staging".to_string(),
        }]
    );
}

#[test]
fn test_explicit_dependency_orders_tasks() {
    let fx = Fixture::new();
    let desc = GfxBufferDesc::new(64, vk::BufferUsageFlags::TRANSFER_DST);
    let a = fx.fg.resources().create_buffer("a", &desc, RgBufferState::UNDEFINED).unwrap();
    let b = fx.fg.resources().create_buffer("b", &desc, RgBufferState::UNDEFINED).unwrap();

    let mut cmd = fx.begin("ordered");
    let fill = |buffer| RgFillBuffer {
        buffer,
        offset: 0,
        size: vk::WHOLE_SIZE,
        data: 0,
    };
    let late = cmd.add_task(RgTaskDesc::new("late", fill(a.id()))).unwrap();
    let early = cmd.add_task(RgTaskDesc::new("early", fill(b.id()))).unwrap();
    cmd.add_dependency(late, early).unwrap();
    fx.fg.execute(&mut cmd).unwrap();

    let compiled = fx.fg.compiled_graph("ordered").unwrap();
    let names: Vec<_> = compiled.tasks.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["early", "late"]);
    assert_eq!(compiled.task("late").unwrap().depends_on, vec![0]);
}

#[test]
fn test_cycle_fails_recording_without_blocking_frame() {
    let fx = Fixture::new();
    let desc = GfxBufferDesc::new(64, vk::BufferUsageFlags::TRANSFER_DST);
    let buffer = fx.fg.resources().create_buffer("b", &desc, RgBufferState::UNDEFINED).unwrap();
    let fill = RgFillBuffer {
        buffer: buffer.id(),
        offset: 0,
        size: vk::WHOLE_SIZE,
        data: 0,
    };

    let mut cmd = fx.begin("cyclic");
    let a = cmd.add_task(RgTaskDesc::new("a", fill)).unwrap();
    let b = cmd.add_task(RgTaskDesc::new("b", fill)).unwrap();
    cmd.add_dependency(a, b).unwrap();
    cmd.add_dependency(b, a).unwrap();
    let err = fx.fg.execute(&mut cmd).unwrap_err();
    assert!(matches!(err, RgError::CyclicDependency(_)));
    assert_eq!(cmd.state(), RgRecordingState::Failed);
    assert!(fx.fg.compiled_graph("cyclic").is_none());

    let mut ok = fx.begin("fine");
    ok.add_task(RgTaskDesc::new("fill", fill)).unwrap();
    let id = fx.fg.execute(&mut ok).unwrap();
    let report = fx.fg.flush(RgQueueMask::all()).unwrap();
    assert_eq!(report.submitted.len(), 2);
    assert_eq!(fx.fg.wait(&[id], Duration::from_millis(100)).unwrap(), RgWaitStatus::Complete);

    // 失败的 recording 只提交空的 batch
    let submissions = fx.device.submissions();
    assert!(submissions[0].info.command_buffers.is_empty());
    assert_eq!(submissions[1].info.command_buffers.len(), 1);
}

#[test]
fn test_merged_render_passes_share_one_native_pass() {
    let fx = Fixture::new();
    let samples = vk::SampleCountFlags::TYPE_1;
    let albedo = fx.color_target("albedo", samples);
    let normal = fx.color_target("normal", samples);
    let pipeline = fx.graphics_pipeline(samples);

    let mut cmd = fx.begin("gbuffer");
    let first = cmd
        .create_render_pass(RgRenderPassDesc::new("albedo-pass").clear_color(albedo.id(), GfxClearColor::default()))
        .unwrap();
    cmd.add_draw_task(first, draw(pipeline.id())).unwrap();
    let second = cmd
        .create_render_pass(RgRenderPassDesc::new("normal-pass").clear_color(normal.id(), GfxClearColor::default()))
        .unwrap();
    cmd.add_draw_task(second, draw(pipeline.id())).unwrap();
    fx.fg.execute(&mut cmd).unwrap();
    fx.fg.flush(RgQueueMask::all()).unwrap();

    let compiled = fx.fg.compiled_graph("gbuffer").unwrap();
    assert_eq!(compiled.stats.native_render_passes, 1);
    assert_eq!(compiled.stats.subpasses, 2);
    assert_eq!(compiled.stats.draw_calls, 2);
    assert_eq!(compiled.stats.tasks, 2);
    assert_eq!(compiled.pass_groups.len(), 1);
    assert_eq!(compiled.pass_groups[0].passes, ["albedo-pass", "normal-pass"]);
    assert_eq!(fx.device.render_pass_create_count(), 1);

    let commands = fx.submitted_commands();
    let count = |f: fn(&GfxCommand) -> bool| commands.iter().filter(|c| f(c)).count();
    assert_eq!(count(|c| matches!(c, GfxCommand::BeginRenderPass(_))), 1);
    assert_eq!(count(|c| matches!(c, GfxCommand::NextSubpass)), 1);
    assert_eq!(count(|c| matches!(c, GfxCommand::EndRenderPass)), 1);
    assert_eq!(count(GfxCommand::is_draw), 2);
}

#[test]
fn test_passes_reading_one_buffer_still_merge() {
    let fx = Fixture::new();
    let samples = vk::SampleCountFlags::TYPE_1;
    let albedo = fx.color_target("albedo", samples);
    let normal = fx.color_target("normal", samples);
    let pipeline = fx.graphics_pipeline(samples);
    let mesh = fx.import_buffer("mesh", RgBufferState::TRANSFER_DST, RgBufferState::GENERAL_READ);

    let mut cmd = fx.begin("gbuffer");
    let first = cmd
        .create_render_pass(RgRenderPassDesc::new("albedo-pass").clear_color(albedo.id(), GfxClearColor::default()))
        .unwrap();
    cmd.add_draw_task(first, draw(pipeline.id()).vertex_buffer(mesh.id(), 0)).unwrap();
    let second = cmd
        .create_render_pass(RgRenderPassDesc::new("normal-pass").clear_color(normal.id(), GfxClearColor::default()))
        .unwrap();
    cmd.add_draw_task(second, draw(pipeline.id()).index_buffer(mesh.id(), 0, vk::IndexType::UINT32)).unwrap();
    fx.fg.execute(&mut cmd).unwrap();
    fx.fg.flush(RgQueueMask::all()).unwrap();

    let compiled = fx.fg.compiled_graph("gbuffer").unwrap();
    assert_eq!(compiled.stats.native_render_passes, 1);
    assert_eq!(compiled.stats.subpasses, 2);

    // mesh 在 render pass 之前只同步一次，覆盖两个 subpass 的读取
    let commands = fx.submitted_commands();
    let begin = commands.iter().position(|c| matches!(c, GfxCommand::BeginRenderPass(_))).unwrap();
    let end = commands.iter().position(|c| matches!(c, GfxCommand::EndRenderPass)).unwrap();
    assert_eq!(pipeline_barrier_count(&commands[begin..end]), 0);
    let buffer_barriers: Vec<_> = commands[..begin]
        .iter()
        .filter_map(GfxCommand::as_pipeline_barrier)
        .flat_map(|dependency| dependency.buffer_barriers.iter())
        .collect();
    assert_eq!(buffer_barriers.len(), 1);
    let mask = buffer_barriers[0].mask;
    assert!(mask.dst_stage.contains(vk::PipelineStageFlags2::VERTEX_INPUT | vk::PipelineStageFlags2::INDEX_INPUT));
    assert!(mask.dst_access.contains(vk::AccessFlags2::VERTEX_ATTRIBUTE_READ | vk::AccessFlags2::INDEX_READ));
}

#[test]
fn test_sample_count_mismatch_keeps_passes_apart() {
    let fx = Fixture::new();
    let single = fx.color_target("single", vk::SampleCountFlags::TYPE_1);
    let multi = fx.color_target("multi", vk::SampleCountFlags::TYPE_4);
    let pipeline_1 = fx.graphics_pipeline(vk::SampleCountFlags::TYPE_1);
    let pipeline_4 = fx.graphics_pipeline(vk::SampleCountFlags::TYPE_4);

    let mut cmd = fx.begin("mixed");
    let first = cmd
        .create_render_pass(RgRenderPassDesc::new("single-pass").clear_color(single.id(), GfxClearColor::default()))
        .unwrap();
    cmd.add_draw_task(first, draw(pipeline_1.id())).unwrap();
    let second = cmd
        .create_render_pass(RgRenderPassDesc::new("multi-pass").clear_color(multi.id(), GfxClearColor::default()))
        .unwrap();
    cmd.add_draw_task(second, draw(pipeline_4.id())).unwrap();
    fx.fg.execute(&mut cmd).unwrap();

    let compiled = fx.fg.compiled_graph("mixed").unwrap();
    assert_eq!(compiled.stats.native_render_passes, 2);
    assert_eq!(compiled.stats.subpasses, 2);
    assert_eq!(fx.device.render_pass_create_count(), 2);
}

#[test]
fn test_render_pass_is_cached_across_frames() {
    let fx = Fixture::new();
    let target = fx.color_target("target", vk::SampleCountFlags::TYPE_1);
    let pipeline = fx.graphics_pipeline(vk::SampleCountFlags::TYPE_1);

    for _ in 0..2 {
        let mut cmd = fx.begin("frame");
        let pass = cmd
            .create_render_pass(RgRenderPassDesc::new("main").clear_color(target.id(), GfxClearColor::default()))
            .unwrap();
        cmd.add_draw_task(pass, draw(pipeline.id())).unwrap();
        fx.fg.execute(&mut cmd).unwrap();
        fx.fg.flush(RgQueueMask::all()).unwrap();
        assert_eq!(fx.fg.wait_idle(Duration::from_millis(100)).unwrap(), RgWaitStatus::Complete);
        fx.fg.begin_frame().unwrap();
    }
    assert_eq!(fx.device.render_pass_create_count(), 1);
    assert_eq!(fx.fg.statistics().cached_render_passes, 1);
}

#[test]
fn test_draw_with_wrong_format_is_rejected() {
    let fx = Fixture::new();
    let target = fx.color_target("target", vk::SampleCountFlags::TYPE_1);
    let pipeline = fx.graphics_pipeline(vk::SampleCountFlags::TYPE_4);

    let mut cmd = fx.begin("bad");
    let pass = cmd
        .create_render_pass(RgRenderPassDesc::new("main").clear_color(target.id(), GfxClearColor::default()))
        .unwrap();
    let err = cmd.add_draw_task(pass, draw(pipeline.id())).unwrap_err();
    assert!(matches!(err, RgError::IncompatibleDrawTask { .. }));
}

#[test]
fn test_write_to_immutable_resource_is_rejected() {
    let fx = Fixture::new();
    let src = fx.import_buffer("lut", RgBufferState::GENERAL_READ, RgBufferState::GENERAL_READ);
    let dst = fx.import_buffer("dst", RgBufferState::GENERAL_READ, RgBufferState::GENERAL_READ);

    let mut cmd = fx.begin("lookup");
    cmd.mark_immutable(src.id()).unwrap();
    cmd.add_task(RgTaskDesc::new("read", copy(&src, &dst))).unwrap();
    let err = cmd.add_task(RgTaskDesc::new("write", copy(&dst, &src))).unwrap_err();
    assert!(matches!(err, RgError::WriteToImmutable { .. }));
    fx.fg.execute(&mut cmd).unwrap();
}

#[test]
fn test_released_resource_is_destroyed_after_frames_in_flight() {
    let fx = Fixture::new();
    let desc = GfxBufferDesc::new(64, vk::BufferUsageFlags::STORAGE_BUFFER);
    let buffer = fx.fg.resources().create_buffer("scratch", &desc, RgBufferState::UNDEFINED).unwrap();
    let id = buffer.id();
    assert_eq!(fx.device.live_buffer_count(), 1);

    drop(buffer);
    // 句柄立即失效，原生对象等待 frames_in_flight 帧之后销毁
    assert!(!fx.fg.resources().contains(id.into()));
    let frames_in_flight = fx.fg.settings().frames_in_flight;
    for _ in 1..frames_in_flight {
        fx.fg.begin_frame().unwrap();
        assert_eq!(fx.device.live_buffer_count(), 1);
    }
    fx.fg.begin_frame().unwrap();
    assert_eq!(fx.device.live_buffer_count(), 0);
}

#[test]
fn test_dead_handle_is_rejected() {
    let fx = Fixture::new();
    let desc = GfxBufferDesc::new(64, vk::BufferUsageFlags::TRANSFER_DST);
    let buffer = fx.fg.resources().create_buffer("gone", &desc, RgBufferState::UNDEFINED).unwrap();
    let id = buffer.id();
    drop(buffer);

    let mut cmd = fx.begin("stale");
    let fill = RgFillBuffer {
        buffer: id,
        offset: 0,
        size: vk::WHOLE_SIZE,
        data: 0,
    };
    assert!(matches!(cmd.add_task(RgTaskDesc::new("fill", fill)), Err(RgError::InvalidHandle { .. })));
}

#[test]
fn test_present_after_submission() {
    let fx = Fixture::new();
    let swapchain = fx.fg.resources().import_swapchain(
        "swapchain",
        vk::SwapchainKHR::from_raw(0x5000),
        &[
            (vk::Image::from_raw(0x5001), vk::ImageView::from_raw(0x5002)),
            (vk::Image::from_raw(0x5003), vk::ImageView::from_raw(0x5004)),
        ],
        vk::Format::B8G8R8A8_UNORM,
        vk::Extent2D {
            width: 64,
            height: 64,
        },
    );

    let mut cmd = fx.begin("present");
    let present = RgPresent {
        swapchain: swapchain.id(),
        image_index: 1,
    };
    cmd.add_task(RgTaskDesc::new("present", present)).unwrap();
    fx.fg.execute(&mut cmd).unwrap();

    let compiled = fx.fg.compiled_graph("present").unwrap();
    let before: Vec<_> = compiled.barriers_before(0).collect();
    assert_eq!(before.len(), 1);
    assert_eq!(
        before[0].kind,
        RgCompiledBarrierKind::Image {
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        }
    );

    let report = fx.fg.flush(RgQueueMask::all()).unwrap();
    assert_eq!(report.presents, 1);
    let presents = fx.device.presents();
    assert_eq!(presents.len(), 1);
    assert_eq!(presents[0].1.image_index, 1);
    assert_eq!(presents[0].1.swapchain, vk::SwapchainKHR::from_raw(0x5000));
    // 呈现等待提交 signal 的 semaphore
    let signals = &fx.device.submissions()[0].info.signal_infos;
    assert_eq!(presents[0].1.wait_semaphores, vec![signals[0].semaphore]);
}

#[test]
fn test_waiting_on_unsubmitted_recording_times_out() {
    let fx = Fixture::new();
    let desc = GfxBufferDesc::new(64, vk::BufferUsageFlags::TRANSFER_DST);
    let buffer = fx.fg.resources().create_buffer("b", &desc, RgBufferState::UNDEFINED).unwrap();

    let mut cmd = fx.begin("pending");
    let fill = RgFillBuffer {
        buffer: buffer.id(),
        offset: 0,
        size: vk::WHOLE_SIZE,
        data: 0,
    };
    cmd.add_task(RgTaskDesc::new("fill", fill)).unwrap();
    let id = fx.fg.execute(&mut cmd).unwrap();
    assert_eq!(fx.fg.wait(&[id], Duration::from_millis(10)).unwrap(), RgWaitStatus::Timeout);

    fx.fg.flush(RgQueueMask::all()).unwrap();
    assert_eq!(fx.fg.wait(&[id], Duration::from_millis(100)).unwrap(), RgWaitStatus::Complete);
}

#[test]
fn test_dumps_describe_recording() {
    let fx = Fixture::new();
    let src = fx.import_buffer("src", RgBufferState::TRANSFER_DST, RgBufferState::TRANSFER_SRC);
    let dst = fx.import_buffer("dst", RgBufferState::GENERAL_READ, RgBufferState::GENERAL_READ);

    let mut cmd = fx.begin("upload");
    cmd.add_task(RgTaskDesc::new("copy", copy(&src, &dst))).unwrap();
    fx.fg.execute(&mut cmd).unwrap();

    let text = fx.fg.dump_to_string();
    assert!(text.contains("recording \"upload\""));
    assert!(text.contains("#0 \"copy\" [copy-buffer]"));
    assert!(text.contains("barrier buffer \"src\""));
    assert!(text.contains("drain:"));

    let dot = fx.fg.dump_to_graphviz();
    assert!(dot.starts_with("digraph \"frame\" {"));
    assert!(dot.contains("subgraph \"cluster_0\""));
    assert!(dot.contains("label=\"upload\";"));
    assert!(dot.trim_end().ends_with('}'));
}

#[test]
fn test_image_bound_twice_in_dispatch_uses_one_layout() {
    let fx = Fixture::new();
    let usage = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE;
    let desc = GfxImageDesc::new_2d(64, 64, vk::Format::R16G16B16A16_SFLOAT, usage);
    let image: RgStrong<RgImageId> = fx.fg.resources().create_image("hdr", &desc, RgImageState::UNDEFINED).unwrap();
    let pipeline = compute_pipeline(
        &fx,
        &[(vk::DescriptorType::SAMPLED_IMAGE, true), (vk::DescriptorType::STORAGE_IMAGE, false)],
    );

    let mut cmd = fx.begin("in-place");
    let resources = RgPipelineResources::new().image(0, 0, image.id()).image(0, 1, image.id());
    cmd.add_task(RgTaskDesc::new("filter", dispatch(&pipeline, resources))).unwrap();
    fx.fg.execute(&mut cmd).unwrap();
    fx.fg.flush(RgQueueMask::all()).unwrap();

    let commands = fx.submitted_commands();
    assert_eq!(pipeline_barrier_count(&commands), 1);
    let writes = descriptor_writes(&commands);
    assert_eq!(writes.len(), 2);
    assert!(writes.iter().all(|w| image_layout(w) == Some(vk::ImageLayout::GENERAL)));
}

#[test]
fn test_immutable_image_keeps_committed_layout_in_descriptors() {
    let fx = Fixture::new();
    let desc = GfxImageDesc::new_2d(16, 16, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::SAMPLED);
    let allocation = fx.device.create_image(&desc, "lut").unwrap();
    let lut = fx.fg.resources().import_image("lut", allocation, &desc, RgImageState::GENERAL, RgImageState::GENERAL);
    let pipeline = compute_pipeline(&fx, &[(vk::DescriptorType::SAMPLED_IMAGE, true)]);

    let mut cmd = fx.begin("lookup");
    cmd.mark_immutable(lut.id()).unwrap();
    let resources = RgPipelineResources::new().image(0, 0, lut.id());
    cmd.add_task(RgTaskDesc::new("filter", dispatch(&pipeline, resources))).unwrap();
    fx.fg.execute(&mut cmd).unwrap();
    fx.fg.flush(RgQueueMask::all()).unwrap();

    let commands = fx.submitted_commands();
    assert_eq!(pipeline_barrier_count(&commands), 0);
    let writes = descriptor_writes(&commands);
    assert_eq!(writes.len(), 1);
    assert_eq!(image_layout(&writes[0]), Some(vk::ImageLayout::GENERAL));
}
