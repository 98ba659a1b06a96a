//! Pass 定义和构建器
//!
//! 提供 `RgPass` trait 用于声明式定义自定义 task，
//! 以及 `RgPassBuilder` 用于在 setup 阶段声明资源访问。
//! 内置的 task 类型和自定义 pass 在录制命令时使用同一个 [`RgPassContext`]。

use std::sync::Arc;

use ash::vk;
use tessel_gfx::commands::encoder::GfxCommandEncoder;

use crate::handle::{RgBufferId, RgImageId, RgPipelineId, RgRawResource, RgRtGeometryId, RgRtSceneId, RgSamplerId};
use crate::local_registry::RgLocalRegistry;
use crate::pipeline::RgPipelineDesc;
use crate::resource::manager::RgResourceManager;
use crate::resource_state::{RgBufferState, RgImageState, RgUsage};

/// Pass 执行时的上下文
///
/// 提供录制命令所需的 encoder 和原生资源查询。
pub struct RgPassContext<'a> {
    /// 当前 recording 的 command encoder
    pub encoder: &'a mut dyn GfxCommandEncoder,

    pub(crate) registry: &'a RgLocalRegistry,
    pub(crate) manager: &'a RgResourceManager,
}

impl<'a> RgPassContext<'a> {
    pub(crate) fn new(
        encoder: &'a mut dyn GfxCommandEncoder,
        registry: &'a RgLocalRegistry,
        manager: &'a RgResourceManager,
    ) -> Self {
        Self {
            encoder,
            registry,
            manager,
        }
    }

    /// 获取图像的原生对象以及它此刻的 layout
    #[inline]
    pub fn get_image(&self, id: RgImageId) -> Option<(vk::Image, vk::ImageView, vk::ImageLayout)> {
        self.registry.image(id)
    }

    #[inline]
    pub fn get_image_view(&self, id: RgImageId) -> Option<vk::ImageView> {
        self.get_image(id).map(|(_, view, _)| view)
    }

    #[inline]
    pub fn get_image_range(&self, id: RgImageId) -> Option<vk::ImageSubresourceRange> {
        self.registry.image_range(id)
    }

    /// 获取缓冲区的原生对象
    #[inline]
    pub fn get_buffer(&self, id: RgBufferId) -> Option<vk::Buffer> {
        self.registry.buffer(id)
    }

    #[inline]
    pub fn get_device_address(&self, resource: impl Into<RgRawResource>) -> Option<vk::DeviceAddress> {
        self.registry.device_address(resource.into())
    }

    #[inline]
    pub fn get_rt_geometry(&self, id: RgRtGeometryId) -> Option<vk::AccelerationStructureKHR> {
        self.registry.accel_struct(id.into())
    }

    #[inline]
    pub fn get_rt_scene(&self, id: RgRtSceneId) -> Option<vk::AccelerationStructureKHR> {
        self.registry.accel_struct(id.into())
    }

    #[inline]
    pub fn get_pipeline(&self, id: RgPipelineId) -> Option<Arc<RgPipelineDesc>> {
        self.manager.pipeline(id)
    }

    #[inline]
    pub fn get_sampler(&self, id: RgSamplerId) -> Option<vk::Sampler> {
        self.manager.sampler(id)
    }
}

/// Pass 构建器
///
/// 在 `RgPass::setup()` 中使用，声明 Pass 的资源访问。
#[derive(Default)]
pub struct RgPassBuilder {
    pub(crate) accesses: Vec<(RgRawResource, RgUsage)>,
}

impl RgPassBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// 声明读取图像
    ///
    /// `state` 是期望的图像状态，用于自动生成 barrier
    #[inline]
    pub fn read_image(&mut self, id: RgImageId, state: RgImageState) -> RgImageId {
        debug_assert!(!state.is_write(), "read_image with a write state");
        self.accesses.push((id.into(), state.into()));
        id
    }

    /// 声明写入图像
    pub fn write_image(&mut self, id: RgImageId, state: RgImageState) -> RgImageId {
        self.accesses.push((id.into(), state.into()));
        id
    }

    /// 声明读写图像（同时读取和写入）
    ///
    /// 常用于累积操作（如 RT 累积、后处理）
    pub fn read_write_image(&mut self, id: RgImageId, state: RgImageState) -> RgImageId {
        self.write_image(id, state)
    }

    /// 声明读取缓冲区
    #[inline]
    pub fn read_buffer(&mut self, id: RgBufferId, state: RgBufferState) -> RgBufferId {
        debug_assert!(!state.is_write(), "read_buffer with a write state");
        self.accesses.push((id.into(), state.into()));
        id
    }

    /// 声明写入缓冲区
    pub fn write_buffer(&mut self, id: RgBufferId, state: RgBufferState) -> RgBufferId {
        self.accesses.push((id.into(), state.into()));
        id
    }

    pub fn read_write_buffer(&mut self, id: RgBufferId, state: RgBufferState) -> RgBufferId {
        self.write_buffer(id, state)
    }

    /// 加速结构按 buffer 的方式跟踪
    pub fn access_rt_scene(&mut self, id: RgRtSceneId, state: RgBufferState) -> RgRtSceneId {
        self.accesses.push((id.into(), state.into()));
        id
    }

    pub fn access_rt_geometry(&mut self, id: RgRtGeometryId, state: RgBufferState) -> RgRtGeometryId {
        self.accesses.push((id.into(), state.into()));
        id
    }
}

/// RgPass trait
///
/// 定义 frame graph 中的一个自定义 task。用户需要实现此 trait 来录制内置 task 覆盖不到的命令。
///
/// # 示例
///
/// ```ignore
/// struct MyPass {
///     input: RgImageId,
///     output: RgImageId,
/// }
///
/// impl RgPass for MyPass {
///     fn setup(&mut self, builder: &mut RgPassBuilder) {
///         builder.read_image(self.input, RgImageState::SHADER_READ_COMPUTE);
///         builder.write_image(self.output, RgImageState::STORAGE_WRITE_COMPUTE);
///     }
///
///     fn execute(&self, ctx: &mut RgPassContext) {
///         let output = ctx.get_image_view(self.output);
///         // 绑定 pipeline, dispatch...
///     }
/// }
/// ```
///
/// # 线程安全
///
/// 不同线程上的 recording 互相独立，Pass 只需要能随 recording 移动到其他线程（`Send`）。
pub trait RgPass: Send {
    /// 声明 Pass 的资源访问，在 `add_task` 时调用一次
    fn setup(&mut self, builder: &mut RgPassBuilder);

    /// 录制 Pass 的命令
    ///
    /// barrier 已经在此之前发出，直接录制命令即可。
    fn execute(&self, ctx: &mut RgPassContext<'_>);
}

/// 用闭包实现的 pass
pub struct RgFnPass<S, E> {
    setup: Option<S>,
    execute: E,
}

impl<S, E> RgFnPass<S, E>
where
    S: FnOnce(&mut RgPassBuilder) + Send,
    E: Fn(&mut RgPassContext<'_>) + Send,
{
    pub fn new(setup: S, execute: E) -> Self {
        Self {
            setup: Some(setup),
            execute,
        }
    }
}

impl<S, E> RgPass for RgFnPass<S, E>
where
    S: FnOnce(&mut RgPassBuilder) + Send,
    E: Fn(&mut RgPassContext<'_>) + Send,
{
    fn setup(&mut self, builder: &mut RgPassBuilder) {
        if let Some(setup) = self.setup.take() {
            setup(builder);
        }
    }

    fn execute(&self, ctx: &mut RgPassContext<'_>) {
        (self.execute)(ctx)
    }
}
