mod common;

use std::time::Duration;

use ash::vk;
use ash::vk::Handle;
use common::Fixture;
use tessel_gfx::GfxError;
use tessel_gfx::device::GfxQueueType;
use tessel_gfx::resources::buffer::GfxBufferDesc;
use tessel_render_graph::handle::{RgBufferId, RgStrong};
use tessel_render_graph::resource_state::RgBufferState;
use tessel_render_graph::submission::RgBatchSlot;
use tessel_render_graph::task::RgTaskDesc;
use tessel_render_graph::task::kinds::{RgFillBuffer, RgPresent};
use tessel_render_graph::{RgBatchDesc, RgCommandBufferDesc, RgCommandBufferId, RgError, RgQueueMask, RgWaitStatus};

fn scratch(fx: &Fixture, name: &str) -> RgStrong<RgBufferId> {
    let desc = GfxBufferDesc::new(64, vk::BufferUsageFlags::TRANSFER_DST);
    fx.fg.resources().create_buffer(name, &desc, RgBufferState::UNDEFINED).unwrap()
}

/// 在指定槽位录制一个 fill task
fn record(fx: &Fixture, name: &str, queue: GfxQueueType, slot: RgBatchSlot, buffer: RgBufferId) -> RgCommandBufferId {
    let mut cmd = fx.fg.begin(RgCommandBufferDesc::new(name, queue).slot(slot), &[]).unwrap();
    let fill = RgFillBuffer {
        buffer,
        offset: 0,
        size: vk::WHOLE_SIZE,
        data: 0,
    };
    cmd.add_task(RgTaskDesc::new("fill", fill)).unwrap();
    fx.fg.execute(&mut cmd).unwrap()
}

fn slot_in(fx: &Fixture, batch: &str) -> RgBatchSlot {
    let id = fx.fg.submission().batch_id(batch).unwrap();
    fx.fg.submission().acquire_in(id).unwrap()
}

#[test]
fn test_fan_out_submits_upstream_first() {
    let fx = Fixture::new();
    let buffer = scratch(&fx, "b");
    fx.fg.add_batch(RgBatchDesc::new("a", RgQueueMask::GRAPHICS)).unwrap();
    fx.fg.add_batch(RgBatchDesc::new("b", RgQueueMask::COMPUTE).depends_on(&["a"])).unwrap();
    fx.fg.add_batch(RgBatchDesc::new("c", RgQueueMask::TRANSFER).depends_on(&["a"])).unwrap();

    // 录制顺序与提交顺序无关
    let c = record(&fx, "c", GfxQueueType::Transfer, slot_in(&fx, "c"), buffer.id());
    let b = record(&fx, "b", GfxQueueType::Compute, slot_in(&fx, "b"), buffer.id());
    let a = record(&fx, "a", GfxQueueType::Graphics, slot_in(&fx, "a"), buffer.id());

    let report = fx.fg.flush(RgQueueMask::all()).unwrap();
    assert_eq!(report.submitted, ["a", "b", "c"]);
    assert!(report.deferred.is_empty());

    let submissions = fx.device.submissions();
    assert_eq!(submissions.len(), 3);
    assert_eq!(submissions[0].queue, GfxQueueType::Graphics);
    assert_eq!(submissions[1].queue, GfxQueueType::Compute);
    assert_eq!(submissions[2].queue, GfxQueueType::Transfer);

    // 每条依赖边一个 semaphore
    let signals: Vec<_> = submissions[0].info.signal_infos.iter().map(|s| s.semaphore).collect();
    assert_eq!(signals.len(), 2);
    assert_eq!(submissions[1].info.wait_infos.len(), 1);
    assert_eq!(submissions[2].info.wait_infos.len(), 1);
    assert!(signals.contains(&submissions[1].info.wait_infos[0].semaphore));
    assert!(signals.contains(&submissions[2].info.wait_infos[0].semaphore));
    assert_ne!(submissions[1].info.wait_infos[0].semaphore, submissions[2].info.wait_infos[0].semaphore);

    assert_eq!(fx.fg.wait(&[a, b, c], Duration::from_millis(100)).unwrap(), RgWaitStatus::Complete);
}

#[test]
fn test_flush_defers_batches_with_unsubmitted_dependencies() {
    let fx = Fixture::new();
    let buffer = scratch(&fx, "b");
    fx.fg.add_batch(RgBatchDesc::new("graphics", RgQueueMask::GRAPHICS)).unwrap();
    fx.fg.add_batch(RgBatchDesc::new("compute", RgQueueMask::COMPUTE).depends_on(&["graphics"])).unwrap();
    record(&fx, "graphics", GfxQueueType::Graphics, slot_in(&fx, "graphics"), buffer.id());
    let compute = record(&fx, "compute", GfxQueueType::Compute, slot_in(&fx, "compute"), buffer.id());

    let report = fx.fg.flush(RgQueueMask::COMPUTE).unwrap();
    assert!(report.submitted.is_empty());
    assert_eq!(report.deferred, ["compute"]);
    assert_eq!(fx.fg.wait(&[compute], Duration::from_millis(10)).unwrap(), RgWaitStatus::Timeout);

    assert_eq!(fx.fg.flush(RgQueueMask::GRAPHICS).unwrap().submitted, ["graphics"]);
    assert_eq!(fx.fg.flush(RgQueueMask::COMPUTE).unwrap().submitted, ["compute"]);
    assert_eq!(fx.fg.wait(&[compute], Duration::from_millis(100)).unwrap(), RgWaitStatus::Complete);
}

#[test]
fn test_skipped_batch_does_not_block_dependents() {
    let fx = Fixture::new();
    let buffer = scratch(&fx, "b");
    fx.fg.add_batch(RgBatchDesc::new("shadows", RgQueueMask::GRAPHICS)).unwrap();
    fx.fg.add_batch(RgBatchDesc::new("lighting", RgQueueMask::GRAPHICS).depends_on(&["shadows"])).unwrap();

    fx.fg.skip_batch("shadows").unwrap();
    let lighting = record(&fx, "lighting", GfxQueueType::Graphics, slot_in(&fx, "lighting"), buffer.id());

    let report = fx.fg.flush(RgQueueMask::all()).unwrap();
    assert_eq!(report.submitted, ["shadows", "lighting"]);
    assert_eq!(fx.fg.wait(&[lighting], Duration::from_millis(100)).unwrap(), RgWaitStatus::Complete);

    // 被跳过的 batch 只 signal，不执行任何 command buffer
    let submissions = fx.device.submissions();
    assert!(submissions[0].info.command_buffers.is_empty());
    assert_eq!(submissions[0].info.signal_infos.len(), 1);
    assert!(submissions.iter().all(|s| s.completed));
}

#[test]
fn test_dependency_on_later_batch_is_rejected() {
    let fx = Fixture::new();
    fx.fg.add_batch(RgBatchDesc::new("first", RgQueueMask::GRAPHICS)).unwrap();
    let unknown = fx.fg.add_batch(RgBatchDesc::new("second", RgQueueMask::GRAPHICS).depends_on(&["third"]));
    assert!(matches!(unknown, Err(RgError::UnknownBatch(_))));

    fx.fg.add_batch(RgBatchDesc::new("third", RgQueueMask::GRAPHICS)).unwrap();
    let slot = slot_in(&fx, "first");
    let desc = RgCommandBufferDesc::new("first", GfxQueueType::Graphics).slot(slot);
    assert!(matches!(fx.fg.begin(desc, &["third"]), Err(RgError::CyclicDependency(_))));
    assert!(matches!(
        fx.fg.add_batch(RgBatchDesc::new("first", RgQueueMask::GRAPHICS)),
        Err(RgError::DuplicateBatch(_))
    ));
}

#[test]
fn test_multithreaded_batch_submits_all_slots_together() {
    let fx = Fixture::new();
    let buffers: Vec<_> = (0..4).map(|i| scratch(&fx, &format!("b{}", i))).collect();
    fx.fg.add_batch(RgBatchDesc::new("scene", RgQueueMask::GRAPHICS).threads(4)).unwrap();

    let fx = &fx;
    let ids: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = buffers
            .iter()
            .enumerate()
            .map(|(i, buffer)| {
                let buffer = buffer.id();
                scope.spawn(move || {
                    let slot = fx.fg.acquire(RgQueueMask::all()).unwrap();
                    record(fx, &format!("scene-{}", i), GfxQueueType::Graphics, slot, buffer)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    // 槽位已经用完
    assert!(fx.fg.acquire(RgQueueMask::all()).is_none());

    let report = fx.fg.flush(RgQueueMask::all()).unwrap();
    assert_eq!(report.submitted, ["scene"]);
    let submissions = fx.device.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].info.command_buffers.len(), 4);
    assert_eq!(fx.fg.wait(&ids, Duration::from_millis(100)).unwrap(), RgWaitStatus::Complete);
    assert_eq!(fx.fg.statistics().rendering.recordings, 4);
}

#[test]
fn test_frame_ring_reuses_semaphores() {
    let fx = Fixture::new();
    let buffer = scratch(&fx, "b");
    let mut live = Vec::new();
    for _ in 0..fx.fg.settings().frames_in_flight * 2 {
        fx.fg.add_batch(RgBatchDesc::new("upload", RgQueueMask::TRANSFER)).unwrap();
        fx.fg.add_batch(RgBatchDesc::new("draw", RgQueueMask::GRAPHICS).depends_on(&["upload"])).unwrap();
        record(&fx, "upload", GfxQueueType::Transfer, slot_in(&fx, "upload"), buffer.id());
        record(&fx, "draw", GfxQueueType::Graphics, slot_in(&fx, "draw"), buffer.id());
        fx.fg.flush(RgQueueMask::all()).unwrap();
        fx.fg.begin_frame().unwrap();
        live.push(fx.device.live_semaphore_count());
    }
    // 稳定之后不再创建新的 semaphore
    assert!(live.windows(2).skip(fx.fg.settings().frames_in_flight).all(|w| w[0] == w[1]));
}

#[test]
fn test_unsubmitted_batches_are_discarded_at_frame_start() {
    let fx = Fixture::new();
    let buffer = scratch(&fx, "b");
    fx.fg.add_batch(RgBatchDesc::new("forgotten", RgQueueMask::GRAPHICS)).unwrap();
    let id = record(&fx, "forgotten", GfxQueueType::Graphics, slot_in(&fx, "forgotten"), buffer.id());

    fx.fg.begin_frame().unwrap();
    assert_eq!(fx.fg.submission().batch_count(), 0);
    assert!(fx.device.submissions().is_empty());
    assert_eq!(fx.fg.wait(&[id], Duration::from_millis(10)).unwrap(), RgWaitStatus::Timeout);
}

/// 重复开始新帧，直到当前帧的槽位被回收
fn retire_frames(fx: &Fixture) {
    for _ in 0..fx.fg.settings().frames_in_flight {
        fx.fg.begin_frame().unwrap();
    }
}

#[test]
fn test_failed_present_still_counts_as_submitted() {
    let fx = Fixture::new();
    let buffer = scratch(&fx, "b");
    let swapchain = fx.fg.resources().import_swapchain(
        "swapchain",
        vk::SwapchainKHR::from_raw(0x6000),
        &[(vk::Image::from_raw(0x6001), vk::ImageView::from_raw(0x6002))],
        vk::Format::B8G8R8A8_UNORM,
        vk::Extent2D {
            width: 64,
            height: 64,
        },
    );
    fx.fg.add_batch(RgBatchDesc::new("frame", RgQueueMask::GRAPHICS)).unwrap();
    fx.fg.add_batch(RgBatchDesc::new("post", RgQueueMask::COMPUTE).depends_on(&["frame"])).unwrap();

    let desc = RgCommandBufferDesc::new("frame", GfxQueueType::Graphics).slot(slot_in(&fx, "frame"));
    let mut cmd = fx.fg.begin(desc, &[]).unwrap();
    let present = RgPresent {
        swapchain: swapchain.id(),
        image_index: 0,
    };
    cmd.add_task(RgTaskDesc::new("present", present)).unwrap();
    let frame = fx.fg.execute(&mut cmd).unwrap();
    let post = record(&fx, "post", GfxQueueType::Compute, slot_in(&fx, "post"), buffer.id());

    // swapchain out of date：错误在所有 batch 提交之后才返回
    fx.device.fail_next_present();
    let err = fx.fg.flush(RgQueueMask::all()).unwrap_err();
    assert!(matches!(err, RgError::Gfx(GfxError::Vk(vk::Result::ERROR_OUT_OF_DATE_KHR))));
    assert_eq!(fx.device.submissions().len(), 2);
    assert!(fx.device.presents().is_empty());

    // 不会再次提交同一个 command buffer
    let report = fx.fg.flush(RgQueueMask::all()).unwrap();
    assert!(report.submitted.is_empty());
    assert_eq!(fx.device.submissions().len(), 2);
    assert_eq!(fx.fg.wait(&[frame, post], Duration::from_millis(100)).unwrap(), RgWaitStatus::Complete);

    // command buffer 随帧回收
    let command_buffer = fx.device.submissions()[0].info.command_buffers[0];
    retire_frames(&fx);
    assert!(fx.device.command_log(command_buffer).is_none());
    assert_eq!(fx.fg.wait(&[frame, post], Duration::from_millis(10)).unwrap(), RgWaitStatus::Complete);
}

#[test]
fn test_failed_submit_can_be_flushed_again() {
    let fx = Fixture::new();
    let buffer = scratch(&fx, "b");
    fx.fg.add_batch(RgBatchDesc::new("upload", RgQueueMask::TRANSFER)).unwrap();
    let id = record(&fx, "upload", GfxQueueType::Transfer, slot_in(&fx, "upload"), buffer.id());

    fx.device.fail_next_submit();
    let err = fx.fg.flush(RgQueueMask::all()).unwrap_err();
    assert!(matches!(err, RgError::Gfx(GfxError::DeviceLost)));
    assert!(fx.device.submissions().is_empty());
    assert_eq!(fx.fg.wait(&[id], Duration::from_millis(10)).unwrap(), RgWaitStatus::Timeout);

    assert_eq!(fx.fg.flush(RgQueueMask::all()).unwrap().submitted, ["upload"]);
    assert_eq!(fx.device.submissions().len(), 1);
    assert_eq!(fx.fg.wait(&[id], Duration::from_millis(100)).unwrap(), RgWaitStatus::Complete);
}

#[test]
fn test_dropped_recordings_never_complete_after_retirement() {
    let fx = Fixture::new();
    let buffer = scratch(&fx, "b");
    fx.fg.add_batch(RgBatchDesc::new("forgotten", RgQueueMask::GRAPHICS)).unwrap();
    let forgotten = record(&fx, "forgotten", GfxQueueType::Graphics, slot_in(&fx, "forgotten"), buffer.id());

    fx.fg.begin_frame().unwrap();
    fx.fg.add_batch(RgBatchDesc::new("shadows", RgQueueMask::GRAPHICS)).unwrap();
    fx.fg.add_batch(RgBatchDesc::new("lighting", RgQueueMask::GRAPHICS)).unwrap();
    let shadows = record(&fx, "shadows", GfxQueueType::Graphics, slot_in(&fx, "shadows"), buffer.id());
    let lighting = record(&fx, "lighting", GfxQueueType::Graphics, slot_in(&fx, "lighting"), buffer.id());
    fx.fg.skip_batch("shadows").unwrap();
    fx.fg.flush(RgQueueMask::all()).unwrap();

    // 更晚的 recording 已经回收，丢弃的 recording 仍然不算完成
    retire_frames(&fx);
    assert_eq!(fx.fg.wait(&[lighting], Duration::from_millis(10)).unwrap(), RgWaitStatus::Complete);
    assert_eq!(fx.fg.wait(&[forgotten], Duration::from_millis(10)).unwrap(), RgWaitStatus::Timeout);
    assert_eq!(fx.fg.wait(&[shadows], Duration::from_millis(10)).unwrap(), RgWaitStatus::Timeout);
}
