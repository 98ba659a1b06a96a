//! Tessel 的 GFX 层
//!
//! frame graph 只通过这里的 trait 与原生 API 交互：
//!
//! - [`commands::encoder::GfxCommandEncoder`]：录制 barrier、render pass、draw/dispatch/copy 等命令
//! - [`device::GfxDevice`]：资源创建、同步对象、队列提交
//! - [`resources::memory::GfxMemoryAllocator`]：可插拔的显存分配器
//!
//! `ash_backend` 基于 ash 实现上述 trait，`headless` 则把所有调用记录下来，用于测试和离线调试。

pub mod ash_backend;
pub mod commands;
pub mod device;
pub mod error;
pub mod format;
pub mod headless;
pub mod resources;

pub use error::{GfxError, GfxResult};
