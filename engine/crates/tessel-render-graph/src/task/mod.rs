//! 任务图与内置 task
//!
//! - [`graph`]：与 task 内容无关的依赖图，负责显式依赖和排序
//! - [`kinds`]：封闭的 task 种类，以及它们的资源访问和命令录制

pub mod graph;
pub mod kinds;

use crate::task::graph::RgTaskId;
use crate::task::kinds::RgTaskKind;

/// 默认的 debug label 颜色
pub const RG_DEFAULT_TASK_COLOR: [f32; 4] = [0.6, 0.6, 0.6, 1.0];

/// `add_task` 的参数
pub struct RgTaskDesc {
    pub name: String,
    pub color: [f32; 4],
    pub depends_on: Vec<RgTaskId>,
    pub kind: RgTaskKind,
}

impl RgTaskDesc {
    pub fn new(name: impl Into<String>, kind: impl Into<RgTaskKind>) -> Self {
        Self {
            name: name.into(),
            color: RG_DEFAULT_TASK_COLOR,
            depends_on: Vec::new(),
            kind: kind.into(),
        }
    }

    #[inline]
    pub fn depends_on(mut self, tasks: &[RgTaskId]) -> Self {
        self.depends_on.extend_from_slice(tasks);
        self
    }

    #[inline]
    pub fn color(mut self, color: [f32; 4]) -> Self {
        self.color = color;
        self
    }
}
