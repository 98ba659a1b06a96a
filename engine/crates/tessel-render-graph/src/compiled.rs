//! 编译结果
//!
//! 一个 recording 执行之后留下的调度、barrier 与 render pass 分组信息，供统计和调试导出使用。

use ash::vk;
use tessel_gfx::commands::barrier::GfxBarrierMask;

use crate::resource_state::RgUsage;
use crate::stats::RgRenderingStats;

/// task 对一个资源的访问
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgCompiledAccess {
    pub resource: String,
    pub usage: RgUsage,
}

#[derive(Clone, Debug)]
pub struct RgCompiledTask {
    pub order: u32,
    pub name: String,
    pub kind: &'static str,
    /// 显式依赖的执行序号
    pub depends_on: Vec<u32>,
    pub accesses: Vec<RgCompiledAccess>,
    /// render pass 节点下的 draw task
    pub draws: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RgCompiledBarrierKind {
    Buffer,
    Image {
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    },
    Global,
}

#[derive(Clone, Debug)]
pub struct RgCompiledBarrier {
    pub resource: Option<String>,
    pub src_order: Option<u32>,
    /// `None` 表示 recording 结束时回到默认状态的 barrier
    pub dst_order: Option<u32>,
    pub mask: GfxBarrierMask,
    pub kind: RgCompiledBarrierKind,
}

/// 由资源冲突推导出的执行顺序约束
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgHazardEdge {
    pub src_order: u32,
    pub dst_order: u32,
    pub resource: String,
}

/// 合并为一个原生 render pass 的逻辑 pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgCompiledPassGroup {
    pub passes: Vec<String>,
    pub attachments: usize,
}

#[derive(Clone, Debug, Default)]
pub struct RgCompiledGraph {
    pub name: String,
    /// 按执行顺序
    pub tasks: Vec<RgCompiledTask>,
    pub barriers: Vec<RgCompiledBarrier>,
    pub hazards: Vec<RgHazardEdge>,
    pub pass_groups: Vec<RgCompiledPassGroup>,
    pub stats: RgRenderingStats,
}

impl RgCompiledGraph {
    /// 执行序号为 `order` 的 task 之前发出的 barrier
    pub fn barriers_before(&self, order: u32) -> impl Iterator<Item = &RgCompiledBarrier> {
        self.barriers.iter().filter(move |b| b.dst_order == Some(order))
    }

    /// recording 结束时回到默认状态的 barrier
    pub fn drain_barriers(&self) -> impl Iterator<Item = &RgCompiledBarrier> {
        self.barriers.iter().filter(|b| b.dst_order.is_none())
    }

    pub fn task(&self, name: &str) -> Option<&RgCompiledTask> {
        self.tasks.iter().find(|t| t.name == name)
    }
}
