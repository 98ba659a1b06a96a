//! Task 的处理：把排序后的任务图变成一串带 barrier 的原生命令
//!
//! 对每个 task（或一组合并的逻辑 pass）：
//! 1. 把引用的资源解析为本地资源
//! 2. 向 state tracker 请求访问，需要的 barrier 交给 barrier manager
//! 3. 有 barrier 时先 flush，再录制 task 的命令
//! 4. 累计统计
//!
//! 所有 task 处理完之后，把资源转换回默认状态，并把最终状态写回 manager。

use std::sync::Arc;

use ash::vk;
use tessel_gfx::commands::barrier::GfxBarrierMask;
use tessel_gfx::commands::encoder::GfxCommandEncoder;

use crate::barrier::{RgBarrierEvent, RgBarrierKind, RgBarrierManager, RgBarrierObserver, RgBarrierOrigin};
use crate::compiled::{
    RgCompiledAccess, RgCompiledBarrier, RgCompiledBarrierKind, RgCompiledGraph, RgCompiledPassGroup,
    RgCompiledTask, RgHazardEdge,
};
use crate::error::RgResult;
use crate::handle::RgRawResource;
use crate::local_registry::RgLocalRegistry;
use crate::pass::RgPassContext;
use crate::render_pass::RgLogicalPass;
use crate::render_pass::cache::RgRenderPassCache;
use crate::render_pass::compiler::{emit_native_pass, plan_native_pass};
use crate::resource::RgNativeResource;
use crate::resource::manager::RgResourceManager;
use crate::resource_state::RgUsage;
use crate::settings::RgSettings;
use crate::state_tracker::RgStateTransition;
use crate::stats::RgRenderingStats;
use crate::task::graph::{RgTaskGraph, RgTaskKey};
use crate::task::kinds::{RgTask, RgTaskKind};

/// 执行计划中的一步
enum RgStep {
    Task { key: RgTaskKey, order: u32 },
    /// 合并为同一个原生 render pass 的逻辑 pass：(task, 执行序号, 逻辑 pass 序号)
    Passes(Vec<(RgTaskKey, u32, usize)>),
}

pub(crate) struct RgTaskProcessor<'a> {
    manager: &'a RgResourceManager,
    cache: &'a RgRenderPassCache,
    settings: &'a RgSettings,
    frame_id: u64,

    barriers: RgBarrierManager,
    stats: RgRenderingStats,
    hazards: Vec<(u32, u32, RgRawResource)>,
    pass_groups: Vec<(Vec<usize>, usize)>,
}

// new & init
impl<'a> RgTaskProcessor<'a> {
    pub(crate) fn new(
        manager: &'a RgResourceManager,
        cache: &'a RgRenderPassCache,
        settings: &'a RgSettings,
        frame_id: u64,
        observer: Option<Arc<dyn RgBarrierObserver>>,
    ) -> Self {
        let mut barriers = RgBarrierManager::new(settings.max_barriers_per_flush, settings.record_debug_dumps);
        barriers.set_observer(observer);
        Self {
            manager,
            cache,
            settings,
            frame_id,
            barriers,
            stats: RgRenderingStats::default(),
            hazards: Vec::new(),
            pass_groups: Vec::new(),
        }
    }
}

// 执行
impl RgTaskProcessor<'_> {
    pub(crate) fn run(
        mut self,
        name: &str,
        graph: &mut RgTaskGraph<RgTask>,
        passes: &[RgLogicalPass],
        registry: &mut RgLocalRegistry,
        encoder: &mut dyn GfxCommandEncoder,
    ) -> RgResult<RgCompiledGraph> {
        let _span = tessel_crate_tools::profile_span!("RgTaskProcessor::run");

        let order = graph.schedule()?;
        let steps = Self::plan_steps(graph, passes, &order);

        for step in &steps {
            match step {
                RgStep::Task { key, order } => self.process_task(graph, *key, *order, registry, encoder)?,
                RgStep::Passes(group) => self.process_passes(graph, group, passes, registry, encoder)?,
            }
        }

        self.drain(order.len() as u32, registry, encoder);
        self.commit(registry);
        self.stats.recordings = 1;

        log::debug!(
            "recording \"{}\": {} tasks, {} barrier calls ({} barriers), {} native render passes",
            name,
            self.stats.tasks,
            self.stats.barrier_calls,
            self.stats.total_barriers(),
            self.stats.native_render_passes
        );
        Ok(self.into_compiled(name, graph, passes, &order, registry))
    }

    /// 相邻并且兼容的逻辑 pass 合并为一步
    fn plan_steps(graph: &RgTaskGraph<RgTask>, passes: &[RgLogicalPass], order: &[RgTaskKey]) -> Vec<RgStep> {
        let mut steps: Vec<RgStep> = Vec::with_capacity(order.len());
        for (index, &key) in order.iter().enumerate() {
            let index = index as u32;
            let RgTaskKind::RenderPass(pass) = graph.node(key).payload.kind else {
                steps.push(RgStep::Task { key, order: index });
                continue;
            };
            let pass = pass as usize;
            if let Some(RgStep::Passes(group)) = steps.last_mut()
                && group.iter().all(|&(_, _, prev)| passes[prev].is_merge_compatible(&passes[pass]))
            {
                group.push((key, index, pass));
                continue;
            }
            steps.push(RgStep::Passes(vec![(key, index, pass)]));
        }
        steps
    }

    fn process_task(
        &mut self,
        graph: &RgTaskGraph<RgTask>,
        key: RgTaskKey,
        order: u32,
        registry: &mut RgLocalRegistry,
        encoder: &mut dyn GfxCommandEncoder,
    ) -> RgResult<()> {
        let node = graph.node(key);
        let _span = tessel_crate_tools::profile_span!("RgTaskProcessor::process_task");

        self.request_accesses(&node.payload.accesses, order, registry, encoder)?;
        self.flush(encoder);

        if self.settings.debug_labels {
            encoder.begin_label(&node.name, node.color);
        }
        let mut ctx = RgPassContext::new(encoder, registry, self.manager);
        node.payload.emit_commands(&mut ctx, &node.name)?;
        if self.settings.debug_labels {
            encoder.end_label();
        }

        node.payload.count_commands(&mut self.stats);
        self.stats.tasks += 1;
        Ok(())
    }

    /// 一组逻辑 pass：所有访问在 render pass 开始之前请求，之后按 subpass 录制
    fn process_passes(
        &mut self,
        graph: &RgTaskGraph<RgTask>,
        group: &[(RgTaskKey, u32, usize)],
        passes: &[RgLogicalPass],
        registry: &mut RgLocalRegistry,
        encoder: &mut dyn GfxCommandEncoder,
    ) -> RgResult<()> {
        let _span = tessel_crate_tools::profile_span!("RgTaskProcessor::process_passes");

        // 共享的 attachment 只在第一次使用时请求，subpass 之间由 subpass dependency 同步；
        // 几个 pass 共同读取的资源合并读取方式后请求一次
        let mut requests: Vec<(u32, RgRawResource, RgUsage)> = Vec::new();
        for &(_, order, pass) in group {
            for (raw, usage) in passes[pass].accesses() {
                match requests.iter_mut().find(|(_, r, _)| *r == raw) {
                    Some((_, _, existing)) if !existing.is_write() && !usage.is_write() => {
                        existing.stage |= usage.stage;
                        existing.access |= usage.access;
                    }
                    Some(_) => {}
                    None => requests.push((order, raw, usage)),
                }
            }
        }
        for (order, raw, usage) in requests {
            self.request_accesses(&[(raw, usage)], order, registry, encoder)?;
        }
        self.flush(encoder);

        let logical: Vec<&RgLogicalPass> = group.iter().map(|&(_, _, pass)| &passes[pass]).collect();
        let plan = plan_native_pass(&logical, registry)?;
        if group.len() > 1 {
            log::debug!(
                "merge render passes [{}] into {} subpasses",
                logical.iter().map(|p| p.name()).collect::<Vec<_>>().join(", "),
                group.len()
            );
        }

        let mut ctx = RgPassContext::new(encoder, registry, self.manager);
        emit_native_pass(
            &mut ctx,
            self.cache,
            self.frame_id,
            &logical,
            &plan,
            self.settings.debug_labels,
            &mut self.stats,
        )?;

        self.stats.tasks += group.len();
        self.pass_groups.push((group.iter().map(|&(_, _, pass)| pass).collect(), plan.desc.attachments.len()));
        debug_assert!(group.iter().all(|(key, _, _)| graph.node(*key).order().is_some()));
        Ok(())
    }

    fn request_accesses(
        &mut self,
        accesses: &[(RgRawResource, RgUsage)],
        order: u32,
        registry: &mut RgLocalRegistry,
        encoder: &mut dyn GfxCommandEncoder,
    ) -> RgResult<()> {
        for &(raw, usage) in accesses {
            let local = registry.resolve(self.manager, raw)?;
            let Some(transition) = local.tracker.request_usage(usage, order) else {
                continue;
            };
            if let Some(src) = transition.src_order
                && src != order
            {
                self.hazards.push((src, order, raw));
            }
            let native = local.native;
            self.push_barrier(encoder, raw, &native, transition, Some(order));
        }
        Ok(())
    }

    fn push_barrier(
        &mut self,
        encoder: &mut dyn GfxCommandEncoder,
        raw: RgRawResource,
        native: &RgNativeResource,
        transition: RgStateTransition,
        dst_order: Option<u32>,
    ) {
        let origin = RgBarrierOrigin {
            resource: Some(raw),
            src_order: transition.src_order,
            dst_order,
        };
        if !enqueue_barrier(&mut self.barriers, origin, native, &transition) {
            self.flush(encoder);
            enqueue_barrier(&mut self.barriers, origin, native, &transition);
        }
    }

    fn flush(&mut self, encoder: &mut dyn GfxCommandEncoder) {
        if let Some(flushed) = self.barriers.flush(encoder) {
            self.stats.barrier_calls += 1;
            self.stats.buffer_barriers += flushed.buffer_barriers;
            self.stats.image_barriers += flushed.image_barriers;
            self.stats.global_barriers += flushed.global_barriers;
        }
    }
}

// 收尾
impl RgTaskProcessor<'_> {
    /// 把资源转换回默认状态，下一个 recording 从已知状态开始
    fn drain(&mut self, end_order: u32, registry: &mut RgLocalRegistry, encoder: &mut dyn GfxCommandEncoder) {
        for local in registry.iter_mut() {
            if !local.needs_drain() {
                continue;
            }
            if let Some(transition) = local.tracker.request_usage(local.default, end_order) {
                let (raw, native) = (local.raw, local.native);
                self.push_barrier(encoder, raw, &native, transition, None);
                self.stats.drain_barriers += 1;
            }
        }
        self.flush(encoder);
    }

    fn commit(&self, registry: &RgLocalRegistry) {
        for local in registry.iter().filter(|local| !local.tracker.is_immutable()) {
            let state = local.tracker.state();
            self.manager.commit_state(
                local.raw,
                RgUsage {
                    stage: state.stage,
                    access: state.access,
                    layout: state.layout,
                },
            );
        }
    }

    fn into_compiled(
        mut self,
        name: &str,
        graph: &RgTaskGraph<RgTask>,
        passes: &[RgLogicalPass],
        order: &[RgTaskKey],
        registry: &RgLocalRegistry,
    ) -> RgCompiledGraph {
        let resource_name = |raw: RgRawResource| registry.name(raw).to_string();

        let tasks = order
            .iter()
            .enumerate()
            .map(|(index, &key)| {
                let node = graph.node(key);
                let (accesses, draws) = match node.payload.kind {
                    RgTaskKind::RenderPass(pass) => {
                        let pass = &passes[pass as usize];
                        (pass.accesses(), pass.draws.iter().map(|d| d.task.name.clone()).collect())
                    }
                    _ => (node.payload.accesses.clone(), Vec::new()),
                };
                RgCompiledTask {
                    order: index as u32,
                    name: node.name.clone(),
                    kind: node.payload.kind.kind_name(),
                    depends_on: node.predecessors().iter().filter_map(|p| graph.node(*p).order()).collect(),
                    accesses: accesses
                        .into_iter()
                        .map(|(raw, usage)| RgCompiledAccess {
                            resource: resource_name(raw),
                            usage,
                        })
                        .collect(),
                    draws,
                }
            })
            .collect();

        let barriers = self.barriers.take_events().into_iter().map(|event| compile_barrier(event, &resource_name)).collect();

        let hazards = self
            .hazards
            .iter()
            .map(|&(src_order, dst_order, raw)| RgHazardEdge {
                src_order,
                dst_order,
                resource: resource_name(raw),
            })
            .collect();

        let pass_groups = self
            .pass_groups
            .iter()
            .map(|(group, attachments)| RgCompiledPassGroup {
                passes: group.iter().map(|&p| passes[p].name().to_string()).collect(),
                attachments: *attachments,
            })
            .collect();

        RgCompiledGraph {
            name: name.to_string(),
            tasks,
            barriers,
            hazards,
            pass_groups,
            stats: self.stats,
        }
    }
}

fn enqueue_barrier(
    barriers: &mut RgBarrierManager,
    origin: RgBarrierOrigin,
    native: &RgNativeResource,
    transition: &RgStateTransition,
) -> bool {
    let mask = GfxBarrierMask {
        src_stage: transition.src_stage,
        dst_stage: transition.dst_stage,
        src_access: transition.src_access,
        dst_access: transition.dst_access,
    };
    match *native {
        RgNativeResource::Image { image, range, .. } => {
            barriers.add_image_barrier(origin, image, mask, transition.old_layout, transition.new_layout, range)
        }
        RgNativeResource::Buffer { buffer, .. } | RgNativeResource::AccelStruct { buffer, .. } => {
            barriers.add_buffer_barrier(origin, buffer, mask, 0, vk::WHOLE_SIZE)
        }
    }
}

fn compile_barrier(event: RgBarrierEvent, resource_name: &impl Fn(RgRawResource) -> String) -> RgCompiledBarrier {
    RgCompiledBarrier {
        resource: event.origin.resource.map(resource_name),
        src_order: event.origin.src_order,
        dst_order: event.origin.dst_order,
        mask: event.mask,
        kind: match event.kind {
            RgBarrierKind::Buffer { .. } => RgCompiledBarrierKind::Buffer,
            RgBarrierKind::Image {
                old_layout, new_layout, ..
            } => RgCompiledBarrierKind::Image { old_layout, new_layout },
            RgBarrierKind::Global => RgCompiledBarrierKind::Global,
        },
    }
}
