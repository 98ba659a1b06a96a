//! 依赖图构建和排序
//!
//! 节点放在 slotmap 中，边是 key 而不是指针。每个 recording 使用一个新的图实例，
//! [`RgTaskId`] 中带有图的编号，来自其他 recording 的句柄会被识别出来。

use std::sync::atomic::{AtomicU64, Ordering};

use slotmap::{SecondaryMap, SlotMap, new_key_type};

use crate::error::{RgError, RgResult};

new_key_type! { pub struct RgTaskKey; }

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

/// 对外的 task 句柄
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RgTaskId {
    graph: u64,
    key: RgTaskKey,
}

impl RgTaskId {
    #[inline]
    pub fn key(&self) -> RgTaskKey {
        self.key
    }
}

pub struct RgTaskNode<T> {
    pub name: String,
    pub color: [f32; 4],
    pub payload: T,
    /// 显式依赖，按声明顺序
    pub(crate) predecessors: Vec<RgTaskKey>,
    pub(crate) successors: Vec<RgTaskKey>,
    /// 排序后的执行序号
    pub(crate) order: Option<u32>,
}

impl<T> RgTaskNode<T> {
    #[inline]
    pub fn predecessors(&self) -> &[RgTaskKey] {
        &self.predecessors
    }

    #[inline]
    pub fn successors(&self) -> &[RgTaskKey] {
        &self.successors
    }

    #[inline]
    pub fn order(&self) -> Option<u32> {
        self.order
    }

    #[inline]
    pub fn is_entry(&self) -> bool {
        self.predecessors.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum RgVisit {
    InProgress,
    Done,
}

/// 一个 recording 中的 task DAG
pub struct RgTaskGraph<T> {
    id: u64,
    nodes: SlotMap<RgTaskKey, RgTaskNode<T>>,
    /// 添加顺序，用于在没有依赖关系的 task 之间保持调用顺序
    insertion: Vec<RgTaskKey>,
    capacity: usize,
    /// 违反调用约定时额外触发 debug_assert
    assert_contracts: bool,
}

// new & init
impl<T> RgTaskGraph<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            id: NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed),
            nodes: SlotMap::with_capacity_and_key(capacity.min(256)),
            insertion: Vec::new(),
            capacity,
            assert_contracts: false,
        }
    }

    pub fn with_contract_asserts(mut self, enabled: bool) -> Self {
        self.assert_contracts = enabled;
        self
    }
}

// 构建
impl<T> RgTaskGraph<T> {
    /// 添加一个 task，`depends_on` 中的每个 task 都必须已经在这个图中
    pub fn add(
        &mut self,
        name: impl Into<String>,
        color: [f32; 4],
        payload: T,
        depends_on: &[RgTaskId],
    ) -> RgResult<RgTaskId> {
        if self.nodes.len() >= self.capacity {
            return Err(RgError::CapacityExceeded {
                what: "tasks per recording",
                limit: self.capacity,
            });
        }
        let predecessors = depends_on.iter().map(|dep| self.validate(*dep)).collect::<RgResult<Vec<_>>>()?;

        let key = self.nodes.insert(RgTaskNode {
            name: name.into(),
            color,
            payload,
            predecessors: Vec::new(),
            successors: Vec::new(),
            order: None,
        });
        for pred in predecessors {
            self.link(pred, key);
        }
        self.insertion.push(key);
        Ok(RgTaskId { graph: self.id, key })
    }

    /// 添加一条 `depends_on -> task` 的边
    ///
    /// 可以引用之后添加的 task，因此可能形成环，环在 `schedule` 时报告
    pub fn add_dependency(&mut self, task: RgTaskId, depends_on: RgTaskId) -> RgResult<()> {
        let task = self.validate(task)?;
        let depends_on = self.validate(depends_on)?;
        if task == depends_on {
            return Err(RgError::CyclicDependency(self.nodes[task].name.clone()));
        }
        self.link(depends_on, task);
        Ok(())
    }

    fn link(&mut self, pred: RgTaskKey, succ: RgTaskKey) {
        if self.nodes[succ].predecessors.contains(&pred) {
            return;
        }
        self.nodes[succ].predecessors.push(pred);
        self.nodes[pred].successors.push(succ);
    }

    fn validate(&self, id: RgTaskId) -> RgResult<RgTaskKey> {
        if id.graph != self.id {
            debug_assert!(!self.assert_contracts, "task {:?} belongs to another recording", id);
            return Err(RgError::ForeignTask(format!("{:?}", id)));
        }
        if !self.nodes.contains_key(id.key) {
            debug_assert!(!self.assert_contracts, "task {:?} does not exist", id);
            return Err(RgError::UnknownTask(format!("{:?}", id)));
        }
        Ok(id.key)
    }
}

// 排序
impl<T> RgTaskGraph<T> {
    /// 计算执行顺序并写入每个节点的序号
    ///
    /// 按添加顺序做深度优先遍历，先处理所有前驱。
    /// 没有依赖关系的 task 之间保持添加顺序，结果是确定的。
    pub fn schedule(&mut self) -> RgResult<Vec<RgTaskKey>> {
        let mut marks: SecondaryMap<RgTaskKey, RgVisit> = SecondaryMap::with_capacity(self.nodes.len());
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(RgTaskKey, usize)> = Vec::new();

        for &root in &self.insertion {
            if marks.contains_key(root) {
                continue;
            }
            marks.insert(root, RgVisit::InProgress);
            stack.push((root, 0));

            while let Some(top) = stack.len().checked_sub(1) {
                let (key, next) = stack[top];
                let predecessors = &self.nodes[key].predecessors;
                if next < predecessors.len() {
                    stack[top].1 += 1;
                    let pred = predecessors[next];
                    match marks.get(pred) {
                        None => {
                            marks.insert(pred, RgVisit::InProgress);
                            stack.push((pred, 0));
                        }
                        Some(RgVisit::InProgress) => {
                            return Err(RgError::CyclicDependency(self.nodes[pred].name.clone()));
                        }
                        Some(RgVisit::Done) => {}
                    }
                } else {
                    marks.insert(key, RgVisit::Done);
                    order.push(key);
                    stack.pop();
                }
            }
        }

        for (index, key) in order.iter().enumerate() {
            self.nodes[*key].order = Some(index as u32);
        }
        Ok(order)
    }
}

// getters
impl<T> RgTaskGraph<T> {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 没有前驱的 task，按添加顺序
    pub fn entries(&self) -> Vec<RgTaskId> {
        self.insertion
            .iter()
            .filter(|key| self.nodes[**key].is_entry())
            .map(|&key| RgTaskId { graph: self.id, key })
            .collect()
    }

    #[inline]
    pub fn get(&self, id: RgTaskId) -> Option<&RgTaskNode<T>> {
        if id.graph != self.id {
            return None;
        }
        self.nodes.get(id.key)
    }

    #[inline]
    pub fn node(&self, key: RgTaskKey) -> &RgTaskNode<T> {
        &self.nodes[key]
    }

    #[inline]
    pub fn node_mut(&mut self, key: RgTaskKey) -> &mut RgTaskNode<T> {
        &mut self.nodes[key]
    }

    #[inline]
    pub fn task_id(&self, key: RgTaskKey) -> RgTaskId {
        RgTaskId { graph: self.id, key }
    }

    /// 按添加顺序遍历
    pub fn iter(&self) -> impl Iterator<Item = (RgTaskKey, &RgTaskNode<T>)> {
        self.insertion.iter().map(|&key| (key, &self.nodes[key]))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(graph: &RgTaskGraph<()>, order: &[RgTaskKey]) -> Vec<String> {
        order.iter().map(|k| graph.node(*k).name.clone()).collect()
    }

    #[test]
    fn test_independent_tasks_keep_call_order() {
        let mut graph = RgTaskGraph::new(16);
        for name in ["a", "b", "c"] {
            graph.add(name, [0.0; 4], (), &[]).unwrap();
        }
        let order = graph.schedule().unwrap();
        assert_eq!(names(&graph, &order), ["a", "b", "c"]);
        assert_eq!(graph.entries().len(), 3);
    }

    #[test]
    fn test_late_dependency_reorders() {
        let mut graph = RgTaskGraph::new(16);
        let a = graph.add("a", [0.0; 4], (), &[]).unwrap();
        let b = graph.add("b", [0.0; 4], (), &[]).unwrap();
        let c = graph.add("c", [0.0; 4], (), &[b]).unwrap();
        // a 依赖之后才添加的 c
        graph.add_dependency(a, c).unwrap();

        let order = graph.schedule().unwrap();
        assert_eq!(names(&graph, &order), ["b", "c", "a"]);
        for (key, node) in graph.iter() {
            for pred in node.predecessors() {
                assert!(graph.node(*pred).order().unwrap() < graph.node(key).order().unwrap());
            }
        }
        assert_eq!(graph.entries(), vec![b]);
    }

    #[test]
    fn test_cycle_is_reported() {
        let mut graph = RgTaskGraph::new(16);
        let a = graph.add("a", [0.0; 4], (), &[]).unwrap();
        let b = graph.add("b", [0.0; 4], (), &[a]).unwrap();
        graph.add_dependency(a, b).unwrap();
        assert!(matches!(graph.schedule(), Err(RgError::CyclicDependency(_))));
        assert!(matches!(graph.add_dependency(a, a), Err(RgError::CyclicDependency(_))));
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut graph = RgTaskGraph::new(2);
        graph.add("a", [0.0; 4], (), &[]).unwrap();
        graph.add("b", [0.0; 4], (), &[]).unwrap();
        assert!(matches!(
            graph.add("c", [0.0; 4], (), &[]),
            Err(RgError::CapacityExceeded { limit: 2, .. })
        ));
    }

    #[test]
    fn test_unknown_task_rejected() {
        let mut graph: RgTaskGraph<()> = RgTaskGraph::new(4);
        let bogus = RgTaskId {
            graph: graph.id(),
            key: RgTaskKey::default(),
        };
        assert!(matches!(graph.add("a", [0.0; 4], (), &[bogus]), Err(RgError::UnknownTask(_))));
    }
}
