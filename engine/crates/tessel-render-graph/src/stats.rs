//! 统计信息

use std::fmt;
use std::ops::AddAssign;

/// 一次或多次 recording 的渲染统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RgRenderingStats {
    pub recordings: usize,
    /// 处理过的 task，一个逻辑 pass 连同其中的 draw 只算一个
    pub tasks: usize,
    pub draw_calls: usize,
    pub dispatches: usize,
    pub trace_rays: usize,
    pub copies: usize,
    pub clears: usize,
    pub accel_builds: usize,
    pub presents: usize,
    /// 原生 render pass 数量（合并之后）
    pub native_render_passes: usize,
    pub subpasses: usize,
    /// `vkCmdPipelineBarrier2` 的调用次数
    pub barrier_calls: usize,
    pub buffer_barriers: usize,
    pub image_barriers: usize,
    pub global_barriers: usize,
    /// recording 结束时回到默认状态产生的 barrier
    pub drain_barriers: usize,
}

impl RgRenderingStats {
    #[inline]
    pub fn total_barriers(&self) -> usize {
        self.buffer_barriers + self.image_barriers + self.global_barriers
    }
}

impl AddAssign for RgRenderingStats {
    fn add_assign(&mut self, rhs: Self) {
        self.recordings += rhs.recordings;
        self.tasks += rhs.tasks;
        self.draw_calls += rhs.draw_calls;
        self.dispatches += rhs.dispatches;
        self.trace_rays += rhs.trace_rays;
        self.copies += rhs.copies;
        self.clears += rhs.clears;
        self.accel_builds += rhs.accel_builds;
        self.presents += rhs.presents;
        self.native_render_passes += rhs.native_render_passes;
        self.subpasses += rhs.subpasses;
        self.barrier_calls += rhs.barrier_calls;
        self.buffer_barriers += rhs.buffer_barriers;
        self.image_barriers += rhs.image_barriers;
        self.global_barriers += rhs.global_barriers;
        self.drain_barriers += rhs.drain_barriers;
    }
}

/// 资源数量统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RgResourceStats {
    pub images: usize,
    pub buffers: usize,
    pub rt_geometries: usize,
    pub rt_scenes: usize,
    pub samplers: usize,
    pub pipelines: usize,
    pub swapchains: usize,
    /// 等待 GPU 完成后才能销毁的资源
    pub pending_destroy: usize,
    pub cached_samplers: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RgStatistics {
    pub rendering: RgRenderingStats,
    pub resources: RgResourceStats,
    pub cached_render_passes: usize,
    pub cached_framebuffers: usize,
}

impl fmt::Display for RgStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.rendering;
        writeln!(f, "recordings: {}, tasks: {}", r.recordings, r.tasks)?;
        writeln!(
            f,
            "draws: {}, dispatches: {}, trace rays: {}, copies: {}, clears: {}, accel builds: {}, presents: {}",
            r.draw_calls, r.dispatches, r.trace_rays, r.copies, r.clears, r.accel_builds, r.presents
        )?;
        writeln!(f, "render passes: {} ({} subpasses)", r.native_render_passes, r.subpasses)?;
        writeln!(
            f,
            "barrier calls: {}, barriers: {} buffer / {} image / {} global, drain: {}",
            r.barrier_calls, r.buffer_barriers, r.image_barriers, r.global_barriers, r.drain_barriers
        )?;
        let s = &self.resources;
        write!(
            f,
            "resources: {} images, {} buffers, {} rt geometries, {} rt scenes, {} samplers, {} pipelines, {} pending destroy",
            s.images, s.buffers, s.rt_geometries, s.rt_scenes, s.samplers, s.pipelines, s.pending_destroy
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_assign_accumulates() {
        let mut total = RgRenderingStats::default();
        let one = RgRenderingStats {
            recordings: 1,
            tasks: 3,
            barrier_calls: 2,
            image_barriers: 4,
            drain_barriers: 1,
            ..Default::default()
        };
        total += one;
        total += one;
        assert_eq!(total.tasks, 6);
        assert_eq!(total.barrier_calls, 4);
        assert_eq!(total.total_barriers(), 8);
        assert_eq!(total.drain_barriers, 2);
    }
}
