//! 编译结果的导出
//!
//! - `dump_to_string`：确定性的文本，可以直接与参考输出比较
//! - `dump_to_graphviz`：task 为节点，显式依赖为实线，资源冲突为带资源名的虚线，barrier 为菱形节点
//! - `print_execution_plan`：通过 log 打印的执行计划

use std::fmt::Write;

use crate::compiled::{RgCompiledBarrier, RgCompiledBarrierKind, RgCompiledGraph};
use crate::debug::{format_access_flags, format_pipeline_stage};

impl RgCompiledGraph {
    pub fn dump_to_string(&self) -> String {
        let mut out = String::new();
        self.write_text(&mut out);
        out
    }

    fn write_text(&self, out: &mut String) {
        let stats = &self.stats;
        let _ = writeln!(out, "recording \"{}\"", self.name);
        let _ = writeln!(
            out,
            "  tasks: {}, barrier calls: {}, barriers: {} buffer / {} image / {} global, drain: {}",
            self.tasks.len(),
            stats.barrier_calls,
            stats.buffer_barriers,
            stats.image_barriers,
            stats.global_barriers,
            stats.drain_barriers
        );

        for task in &self.tasks {
            for barrier in self.barriers_before(task.order) {
                let _ = writeln!(out, "  {}", describe_barrier(barrier));
            }
            let _ = writeln!(out, "  #{} \"{}\" [{}]", task.order, task.name, task.kind);
            if !task.depends_on.is_empty() {
                let deps = task.depends_on.iter().map(|d| format!("#{}", d)).collect::<Vec<_>>().join(", ");
                let _ = writeln!(out, "    depends on: {}", deps);
            }
            for draw in &task.draws {
                let _ = writeln!(out, "    draw \"{}\"", draw);
            }
            for access in &task.accesses {
                let _ = writeln!(
                    out,
                    "    {} \"{}\" {:?} (stage: {}, access: {})",
                    if access.usage.is_write() { "write" } else { "read " },
                    access.resource,
                    access.usage.layout,
                    format_pipeline_stage(access.usage.stage),
                    format_access_flags(access.usage.access)
                );
            }
        }

        let drain: Vec<_> = self.drain_barriers().collect();
        if !drain.is_empty() {
            let _ = writeln!(out, "  drain:");
            for barrier in drain {
                let _ = writeln!(out, "    {}", describe_barrier(barrier));
            }
        }

        if !self.pass_groups.is_empty() {
            let _ = writeln!(out, "  render passes:");
            for group in &self.pass_groups {
                let _ = writeln!(
                    out,
                    "    [{}] {} subpasses, {} attachments",
                    group.passes.join(", "),
                    group.passes.len(),
                    group.attachments
                );
            }
        }
    }

    pub fn dump_to_graphviz(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "digraph \"{}\" {{", escape(&self.name));
        let _ = writeln!(out, "  rankdir=LR;");
        let _ = writeln!(out, "  node [shape=box, style=rounded, fontname=\"monospace\"];");
        self.write_graphviz_body(&mut out, "", "  ");
        let _ = writeln!(out, "}}");
        out
    }

    fn write_graphviz_body(&self, out: &mut String, prefix: &str, indent: &str) {
        for task in &self.tasks {
            let _ = writeln!(
                out,
                "{}{}t{} [label=\"#{} {}\\n({})\"];",
                indent,
                prefix,
                task.order,
                task.order,
                escape(&task.name),
                task.kind
            );
        }
        for task in &self.tasks {
            for dep in &task.depends_on {
                let _ = writeln!(out, "{}{}t{} -> {}t{};", indent, prefix, dep, prefix, task.order);
            }
        }
        for hazard in &self.hazards {
            let _ = writeln!(
                out,
                "{}{}t{} -> {}t{} [style=dashed, label=\"{}\"];",
                indent,
                prefix,
                hazard.src_order,
                prefix,
                hazard.dst_order,
                escape(&hazard.resource)
            );
        }

        for (index, barrier) in self.barriers.iter().enumerate() {
            let _ = writeln!(
                out,
                "{}{}b{} [shape=diamond, label=\"{}\"];",
                indent,
                prefix,
                index,
                escape(&barrier_label(barrier))
            );
            if let Some(src) = barrier.src_order {
                let _ = writeln!(out, "{}{}t{} -> {}b{} [style=dotted];", indent, prefix, src, prefix, index);
            }
            match barrier.dst_order {
                Some(dst) => {
                    let _ = writeln!(out, "{}{}b{} -> {}t{} [style=dotted];", indent, prefix, index, prefix, dst);
                }
                None => {
                    let _ = writeln!(out, "{}{}b{} -> {}end [style=dotted];", indent, prefix, index, prefix);
                }
            }
        }
        if self.barriers.iter().any(|b| b.dst_order.is_none()) {
            let _ = writeln!(out, "{}{}end [shape=point];", indent, prefix);
        }
    }

    /// 打印执行计划（用于调试）
    pub fn print_execution_plan(&self) {
        log::info!("╔══════════════════════════════════════════════════════════════════╗");
        log::info!("║              Frame Graph Execution Plan                          ║");
        log::info!("╠══════════════════════════════════════════════════════════════════╣");
        log::info!(
            "║ Recording: \"{}\"  |  Execution Order: [{}]",
            self.name,
            self.tasks.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(" → ")
        );
        log::info!("╚══════════════════════════════════════════════════════════════════╝");

        for task in &self.tasks {
            log::info!("");
            log::info!("┌─────────────────────────────────────────────────────────────────┐");
            log::info!("│ [{}/{}] Task: \"{}\" ({})", task.order + 1, self.tasks.len(), task.name, task.kind);
            log::info!("├─────────────────────────────────────────────────────────────────┤");

            for draw in &task.draws {
                log::info!("│   🖌️  draw \"{}\"", draw);
            }
            for access in &task.accesses {
                log::info!(
                    "│   {} \"{}\" @ {:?} (stage: {}, access: {})",
                    if access.usage.is_write() { "✏️ " } else { "📖" },
                    access.resource,
                    access.usage.layout,
                    format_pipeline_stage(access.usage.stage),
                    format_access_flags(access.usage.access)
                );
            }

            let barriers: Vec<_> = self.barriers_before(task.order).collect();
            if barriers.is_empty() {
                log::info!("│ No barriers required");
            } else {
                log::info!("├─────────────────────────────────────────────────────────────────┤");
                log::info!("│ Barriers: {}", barriers.len());
                barriers.iter().for_each(|barrier| log_barrier(barrier));
            }
            log::info!("└─────────────────────────────────────────────────────────────────┘");
        }

        let drain: Vec<_> = self.drain_barriers().collect();
        if !drain.is_empty() {
            log::info!("");
            log::info!("┌─────────────────────────────────────────────────────────────────┐");
            log::info!("│ Drain: {} barriers", drain.len());
            drain.iter().for_each(|barrier| log_barrier(barrier));
            log::info!("└─────────────────────────────────────────────────────────────────┘");
        }

        log::info!("");
        log::info!("═══════════════════════ End of Execution Plan ═══════════════════════");
    }
}

/// 一帧内所有 recording 的文本导出
pub fn frame_dump_to_string(graphs: &[RgCompiledGraph]) -> String {
    let mut out = String::new();
    for graph in graphs {
        graph.write_text(&mut out);
    }
    out
}

/// 一帧内所有 recording 的 GraphViz 导出，每个 recording 一个 cluster
pub fn frame_dump_to_graphviz(graphs: &[RgCompiledGraph]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph \"frame\" {{");
    let _ = writeln!(out, "  rankdir=LR;");
    let _ = writeln!(out, "  node [shape=box, style=rounded, fontname=\"monospace\"];");
    for (index, graph) in graphs.iter().enumerate() {
        let _ = writeln!(out, "  subgraph \"cluster_{}\" {{", index);
        let _ = writeln!(out, "    label=\"{}\";", escape(&graph.name));
        graph.write_graphviz_body(&mut out, &format!("r{}_", index), "    ");
        let _ = writeln!(out, "  }}");
    }
    let _ = writeln!(out, "}}");
    out
}

fn describe_barrier(barrier: &RgCompiledBarrier) -> String {
    let resource = barrier.resource.as_deref().unwrap_or("<global>");
    let stage = format!(
        "{} → {}",
        format_pipeline_stage(barrier.mask.src_stage),
        format_pipeline_stage(barrier.mask.dst_stage)
    );
    let access = format!(
        "{} → {}",
        format_access_flags(barrier.mask.src_access),
        format_access_flags(barrier.mask.dst_access)
    );
    match &barrier.kind {
        RgCompiledBarrierKind::Buffer => format!("barrier buffer \"{}\" stage: {}, access: {}", resource, stage, access),
        RgCompiledBarrierKind::Image { old_layout, new_layout } => format!(
            "barrier image \"{}\" {:?} → {:?}, stage: {}, access: {}",
            resource, old_layout, new_layout, stage, access
        ),
        RgCompiledBarrierKind::Global => format!("barrier global stage: {}, access: {}", stage, access),
    }
}

fn barrier_label(barrier: &RgCompiledBarrier) -> String {
    let resource = barrier.resource.as_deref().unwrap_or("global");
    match &barrier.kind {
        RgCompiledBarrierKind::Image { old_layout, new_layout } => {
            format!("{}\n{:?} → {:?}", resource, old_layout, new_layout)
        }
        _ => format!(
            "{}\n{} → {}",
            resource,
            format_access_flags(barrier.mask.src_access),
            format_access_flags(barrier.mask.dst_access)
        ),
    }
}

fn log_barrier(barrier: &RgCompiledBarrier) {
    let resource = barrier.resource.as_deref().unwrap_or("<global>");
    match &barrier.kind {
        RgCompiledBarrierKind::Image { old_layout, new_layout } => {
            log::info!("│   🔒 Image \"{}\":", resource);
            if old_layout != new_layout {
                log::info!("│       Layout: {:?} → {:?}", old_layout, new_layout);
            } else {
                log::info!("│       Layout: {:?} (no layout change)", old_layout);
            }
        }
        RgCompiledBarrierKind::Buffer => log::info!("│   🔒 Buffer \"{}\":", resource),
        RgCompiledBarrierKind::Global => log::info!("│   🔒 Global:"),
    }
    log::info!(
        "│       Stage:  {} → {}",
        format_pipeline_stage(barrier.mask.src_stage),
        format_pipeline_stage(barrier.mask.dst_stage)
    );
    log::info!(
        "│       Access: {} → {}",
        format_access_flags(barrier.mask.src_access),
        format_access_flags(barrier.mask.dst_access)
    );
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use ash::vk;
    use tessel_gfx::commands::barrier::GfxBarrierMask;

    use super::*;
    use crate::compiled::{RgCompiledAccess, RgCompiledTask, RgHazardEdge};
    use crate::resource_state::RgUsage;

    fn sample() -> RgCompiledGraph {
        let write = RgUsage {
            stage: vk::PipelineStageFlags2::TRANSFER,
            access: vk::AccessFlags2::TRANSFER_WRITE,
            layout: vk::ImageLayout::UNDEFINED,
        };
        let read = RgUsage {
            access: vk::AccessFlags2::TRANSFER_READ,
            ..write
        };
        RgCompiledGraph {
            name: "upload".to_string(),
            tasks: vec![
                RgCompiledTask {
                    order: 0,
                    name: "fill".to_string(),
                    kind: "fill-buffer",
                    depends_on: vec![],
                    accesses: vec![RgCompiledAccess {
                        resource: "staging".to_string(),
                        usage: write,
                    }],
                    draws: vec![],
                },
                RgCompiledTask {
                    order: 1,
                    name: "copy".to_string(),
                    kind: "copy-buffer",
                    depends_on: vec![0],
                    accesses: vec![RgCompiledAccess {
                        resource: "staging".to_string(),
                        usage: read,
                    }],
                    draws: vec![],
                },
            ],
            barriers: vec![RgCompiledBarrier {
                resource: Some("staging".to_string()),
                src_order: Some(0),
                dst_order: Some(1),
                mask: GfxBarrierMask {
                    src_stage: write.stage,
                    dst_stage: read.stage,
                    src_access: write.access,
                    dst_access: read.access,
                },
                kind: RgCompiledBarrierKind::Buffer,
            }],
            hazards: vec![RgHazardEdge {
                src_order: 0,
                dst_order: 1,
                resource: "staging".to_string(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_text_dump_places_barrier_before_task() {
        let text = sample().dump_to_string();
        let barrier = text.find("barrier buffer \"staging\"").unwrap();
        let copy = text.find("#1 \"copy\"").unwrap();
        let fill = text.find("#0 \"fill\"").unwrap();
        assert!(fill < barrier && barrier < copy);
        assert!(text.contains("depends on: #0"));
        assert!(text.contains("TRANSFER_WRITE → TRANSFER_READ"));
    }

    #[test]
    fn test_graphviz_marks_hazard_edges() {
        let dot = sample().dump_to_graphviz();
        assert!(dot.starts_with("digraph \"upload\" {"));
        assert!(dot.contains("t0 -> t1;"));
        assert!(dot.contains("t0 -> t1 [style=dashed, label=\"staging\"];"));
        assert!(dot.contains("b0 [shape=diamond"));
        assert!(dot.trim_end().ends_with('}'));

        let frame = frame_dump_to_graphviz(&[sample(), sample()]);
        assert!(frame.contains("subgraph \"cluster_1\""));
        assert!(frame.contains("r1_t0 -> r1_t1;"));
    }
}
