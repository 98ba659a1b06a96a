//! Tessel 的 frame graph
//!
//! 调用者声明 task 以及它们访问的资源，frame graph 负责：
//!
//! - 跟踪每个资源的访问状态（[`state_tracker`]），计算需要的 barrier 并成批发出（[`barrier`]）
//! - 按显式依赖排序 task（[`task::graph`]），逐个录制原生命令
//! - 把相邻且兼容的逻辑 render pass 合并为一个原生 render pass 的多个 subpass（[`render_pass`]）
//! - 按 batch 依赖提交 command buffer，依赖通过 semaphore 实现（[`submission`]）
//!
//! 入口是 [`frame_graph::RgFrameGraph`]。

pub mod barrier;
pub mod cache;
pub mod command_buffer;
pub mod compiled;
pub mod debug;
pub mod error;
pub mod frame_graph;
pub mod handle;
pub mod local_registry;
pub mod pass;
pub mod pipeline;
pub mod render_pass;
pub mod resource;
pub mod resource_state;
pub mod settings;
pub mod state_tracker;
pub mod stats;
pub mod submission;
pub mod task;

mod processor;

pub use command_buffer::{RgCommandBuffer, RgCommandBufferDesc, RgCommandBufferId, RgRecordingState};
pub use error::{RgError, RgResult};
pub use frame_graph::RgFrameGraph;
pub use settings::RgSettings;
pub use submission::ring::RgWaitStatus;
pub use submission::{RgBatchDesc, RgQueueMask};
