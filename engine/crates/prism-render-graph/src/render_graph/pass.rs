//! Pass 定义和构建器
//!
//! 提供 `RgPass` trait 用于声明式定义自定义节点，
//! 以及 `RgPassBuilder` 用于在 setup 阶段声明资源依赖。
//! 所有节点的录制回调都拿到同一种 `RgPassContext`。

use std::sync::Arc;

use ash::vk;
use prism_gfx::commands::recorder::GfxCommandRecorder;
use prism_gfx::resources::buffer::GfxBuffer;
use prism_gfx::resources::handles::{GfxBufferHandle, GfxImageHandle};
use prism_gfx::resources::image::{GfxImage, GfxImageDesc};

use crate::render_graph::access::{RgAccessKind, RgBufferAccess, RgImageAccess};
use crate::render_graph::buffer_resource::{RgBufferDesc, RgBufferResource};
use crate::render_graph::image_resource::{RgImageDesc, RgImageResource};
use crate::render_graph::resource_handle::{RgBufferHandle, RgBufferView, RgImageHandle, RgImageView};
use crate::render_graph::resource_registry::RgResourceRegistry;

/// 虚拟资源到物理资源的映射，执行前填充
///
/// 没有被任何节点访问的 transient 资源没有物理资源。
pub(crate) struct RgPhysicalResources {
    pub images: Vec<Option<Arc<GfxImage>>>,
    pub buffers: Vec<Option<Arc<GfxBuffer>>>,
}

impl RgPhysicalResources {
    pub fn image(&self, registry: &RgResourceRegistry, handle: RgImageHandle) -> GfxImageHandle {
        match self.images.get(handle.id as usize).and_then(|image| image.as_ref()) {
            Some(image) => image.handle(),
            None => panic!("image \"{}\" has no physical backing", registry.image(handle).name),
        }
    }

    pub fn buffer(&self, registry: &RgResourceRegistry, handle: RgBufferHandle) -> GfxBufferHandle {
        match self.buffers.get(handle.id as usize).and_then(|buffer| buffer.as_ref()) {
            Some(buffer) => buffer.handle(),
            None => panic!("buffer \"{}\" has no physical backing", registry.buffer(handle).name),
        }
    }
}

/// Pass 执行时的上下文
///
/// 提供节点执行所需的资源访问和命令录制接口。
pub struct RgPassContext<'c> {
    /// 命令录制接口，barrier 已经就位
    pub cmd: &'c mut dyn GfxCommandRecorder,

    pub(crate) name: &'c str,
    pub(crate) registry: &'c RgResourceRegistry,
    pub(crate) physical: &'c RgPhysicalResources,

    /// 节点声明过的访问，用于 debug 校验
    pub(crate) image_accesses: &'c [RgImageAccess],
    pub(crate) buffer_accesses: &'c [RgBufferAccess],
    pub(crate) validate: bool,
}

// getters
impl RgPassContext<'_> {
    #[inline]
    pub fn name(&self) -> &str {
        self.name
    }

    /// 获取图像的物理句柄
    pub fn image(&self, view: impl Into<RgImageView>) -> GfxImageHandle {
        let view = view.into();
        debug_assert!(
            !self.validate || self.is_image_declared(view),
            "node \"{}\" uses image \"{}\" {:?} without declaring it",
            self.name,
            self.registry.image(view.image).name,
            view.mips
        );
        self.physical.image(self.registry, view.image)
    }

    /// view 对应的 `(base_mip, mip_count)`
    #[inline]
    pub fn image_mips(&self, view: impl Into<RgImageView>) -> (u32, u32) {
        self.registry.resolve_image_view(view.into())
    }

    /// 图像元数据，不需要声明访问
    #[inline]
    pub fn image_desc(&self, handle: RgImageHandle) -> &GfxImageDesc {
        &self.registry.image(handle).desc
    }

    /// 获取缓冲区的物理句柄
    pub fn buffer(&self, view: impl Into<RgBufferView>) -> GfxBufferHandle {
        let view = view.into();
        debug_assert!(
            !self.validate || self.is_buffer_declared(view),
            "node \"{}\" uses buffer \"{}\" {:?} without declaring it",
            self.name,
            self.registry.buffer(view.buffer).name,
            view.range
        );
        self.physical.buffer(self.registry, view.buffer)
    }

    /// view 对应的 `(offset, size)`
    #[inline]
    pub fn buffer_range(&self, view: impl Into<RgBufferView>) -> (vk::DeviceSize, vk::DeviceSize) {
        self.registry.resolve_buffer_view(view.into())
    }
}

// tools
impl RgPassContext<'_> {
    pub fn push_constants<T: bytemuck::Pod>(&mut self, stages: vk::ShaderStageFlags, data: &T) {
        self.cmd.push_constants(stages, 0, bytemuck::bytes_of(data));
    }

    /// 请求的每个 mip 都被某个声明覆盖
    fn is_image_declared(&self, view: RgImageView) -> bool {
        let (base, count) = self.registry.resolve_image_view(view);
        (base..base + count).all(|mip| {
            self.image_accesses.iter().filter(|access| access.view.image == view.image).any(|access| {
                let (declared_base, declared_count) = self.registry.resolve_image_view(access.view);
                (declared_base..declared_base + declared_count).contains(&mip)
            })
        })
    }

    fn is_buffer_declared(&self, view: RgBufferView) -> bool {
        let (offset, size) = self.registry.resolve_buffer_view(view);
        self.buffer_accesses.iter().filter(|access| access.view.buffer == view.buffer).any(|access| {
            let (declared_offset, declared_size) = self.registry.resolve_buffer_view(access.view);
            declared_offset <= offset && offset + size <= declared_offset + declared_size
        })
    }
}

/// Pass 构建器
///
/// 在 `RgPass::setup()` 中使用，声明 Pass 的资源依赖。
pub struct RgPassBuilder<'r> {
    pub(crate) image_accesses: Vec<RgImageAccess>,
    pub(crate) buffer_accesses: Vec<RgBufferAccess>,

    /// 资源注册表引用（用于创建临时资源）
    pub(crate) resources: &'r mut RgResourceRegistry,
}

impl<'r> RgPassBuilder<'r> {
    pub(crate) fn new(resources: &'r mut RgResourceRegistry) -> Self {
        Self {
            image_accesses: Vec::new(),
            buffer_accesses: Vec::new(),
            resources,
        }
    }

    /// 声明读取图像
    ///
    /// # 参数
    /// - `view`: 要读取的图像范围
    /// - `kind`: 读取方式，决定 access 与 layout
    /// - `stage`: 读取发生的 pipeline stage
    pub fn read_image(
        &mut self,
        view: impl Into<RgImageView>,
        kind: RgAccessKind,
        stage: vk::PipelineStageFlags2,
    ) -> RgImageView {
        assert!(!kind.is_write(), "{:?} is a write access, use write_image", kind);
        let access = RgImageAccess::new(view, kind, stage);
        self.image_accesses.push(access);
        access.view
    }

    /// 声明写入图像
    pub fn write_image(
        &mut self,
        view: impl Into<RgImageView>,
        kind: RgAccessKind,
        stage: vk::PipelineStageFlags2,
    ) -> RgImageView {
        assert!(kind.is_write(), "{:?} is not a write access, use read_image", kind);
        let access = RgImageAccess::new(view, kind, stage);
        self.image_accesses.push(access);
        access.view
    }

    /// 声明读取缓冲区
    pub fn read_buffer(
        &mut self,
        view: impl Into<RgBufferView>,
        kind: RgAccessKind,
        stage: vk::PipelineStageFlags2,
    ) -> RgBufferView {
        assert!(!kind.is_write(), "{:?} is a write access, use write_buffer", kind);
        let access = RgBufferAccess::new(view, kind, stage);
        self.buffer_accesses.push(access);
        access.view
    }

    /// 声明写入缓冲区
    pub fn write_buffer(
        &mut self,
        view: impl Into<RgBufferView>,
        kind: RgAccessKind,
        stage: vk::PipelineStageFlags2,
    ) -> RgBufferView {
        assert!(kind.is_write(), "{:?} is not a write access, use read_buffer", kind);
        let access = RgBufferAccess::new(view, kind, stage);
        self.buffer_accesses.push(access);
        access.view
    }

    /// 创建临时图像
    pub fn create_image(&mut self, name: impl Into<String>, desc: &RgImageDesc) -> RgImageHandle {
        self.resources.register_image(RgImageResource::transient(name, desc))
    }

    /// 创建临时缓冲区
    pub fn create_buffer(&mut self, name: impl Into<String>, desc: &RgBufferDesc) -> RgBufferHandle {
        self.resources.register_buffer(RgBufferResource::transient(name, desc, false))
    }
}

/// 类型擦除的 Pass 执行器 trait
pub(crate) trait RgPassExecutor {
    fn execute(&self, ctx: &mut RgPassContext<'_>);
}

/// 包装用户 Pass 实现的执行器
pub(crate) struct RgPassExecutorWrapper<P: RgPass> {
    pub pass: P,
}

impl<P: RgPass> RgPassExecutor for RgPassExecutorWrapper<P> {
    fn execute(&self, ctx: &mut RgPassContext<'_>) {
        self.pass.execute(ctx);
    }
}

/// RgPass trait
///
/// 定义渲染图中的一个自定义节点。
///
/// # 示例
///
/// ```ignore
/// struct ResolvePass {
///     input: RgImageHandle,
///     output: RgImageHandle,
/// }
///
/// impl RgPass for ResolvePass {
///     fn setup(&mut self, builder: &mut RgPassBuilder) {
///         builder.read_image(self.input, RgAccessKind::SampledRead, vk::PipelineStageFlags2::COMPUTE_SHADER);
///         builder.write_image(self.output, RgAccessKind::StorageWrite, vk::PipelineStageFlags2::COMPUTE_SHADER);
///     }
///
///     fn execute(&self, ctx: &mut RgPassContext<'_>) {
///         let output = ctx.image(self.output);
///         // 绑定 pipeline, dispatch...
///     }
/// }
/// ```
///
/// Pass 可以借用外部资源，生命周期由 `RenderGraphBuilder<'a>` 约束。
pub trait RgPass {
    /// 声明 Pass 的资源依赖
    fn setup(&mut self, builder: &mut RgPassBuilder);

    /// 录制命令，barrier 已经插入完毕
    fn execute(&self, ctx: &mut RgPassContext<'_>);
}
