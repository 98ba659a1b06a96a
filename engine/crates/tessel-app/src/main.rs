//! 在 headless 设备上跑几帧 frame graph
//!
//! 用法：`tessel-app [settings.toml] [--frames N] [--dot out.dot]`
//!
//! 每帧录制 upload 和 scene 两个 batch，最后打印执行计划、统计信息和 GraphViz 导出

mod headless_frame;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use headless_frame::HeadlessFrame;
use tessel_crate_tools::init_log::init_log;
use tessel_gfx::headless::HeadlessDevice;
use tessel_render_graph::{RgFrameGraph, RgQueueMask, RgSettings, RgWaitStatus};

const DEFAULT_FRAMES: u64 = 4;
const FRAME_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Default)]
struct Args {
    settings: Option<PathBuf>,
    frames: Option<u64>,
    dot: Option<PathBuf>,
}

impl Args {
    fn parse() -> anyhow::Result<Self> {
        let mut args = Self::default();
        let mut iter = std::env::args().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--frames" => {
                    let value = iter.next().context("--frames expects a value")?;
                    args.frames = Some(value.parse().with_context(|| format!("invalid frame count: {}", value))?);
                }
                "--dot" => {
                    args.dot = Some(iter.next().context("--dot expects a path")?.into());
                }
                _ if arg.starts_with("--") => bail!("unknown option: {}", arg),
                _ => args.settings = Some(arg.into()),
            }
        }
        Ok(args)
    }
}

fn main() -> anyhow::Result<()> {
    init_log();
    let args = Args::parse()?;

    let settings = match &args.settings {
        Some(path) => RgSettings::from_file(path).with_context(|| format!("failed to load settings: {:?}", path))?,
        None => RgSettings::default(),
    };
    log::info!("frame graph settings: {:?}", settings);

    let device = Arc::new(HeadlessDevice::new());
    let fg = RgFrameGraph::new(device.clone(), settings)?;
    let mut frame = HeadlessFrame::new(device.as_ref(), &fg)?;

    for _ in 0..args.frames.unwrap_or(DEFAULT_FRAMES) {
        let frame_id = fg.begin_frame()?;
        let ids = frame.record(&fg)?;

        let report = fg.flush(RgQueueMask::all())?;
        log::info!(
            "{} submitted {:?}, deferred {:?}, presents {}",
            fg.frame_name(),
            report.submitted,
            report.deferred,
            report.presents
        );

        if fg.wait(&ids, FRAME_TIMEOUT)? == RgWaitStatus::Timeout {
            bail!("frame {} did not complete within {:?}", frame_id, FRAME_TIMEOUT);
        }
    }

    fg.print_execution_plan();
    log::info!("statistics:\n{}", fg.statistics());

    println!("{}", fg.dump_to_string());
    let dot = fg.dump_to_graphviz();
    match &args.dot {
        Some(path) => {
            std::fs::write(path, &dot).with_context(|| format!("failed to write graphviz dump: {:?}", path))?;
            log::info!("graphviz dump written to {:?}", path);
        }
        None => println!("{}", dot),
    }

    if fg.wait_idle(FRAME_TIMEOUT)? == RgWaitStatus::Timeout {
        bail!("device did not become idle within {:?}", FRAME_TIMEOUT);
    }
    Ok(())
}
