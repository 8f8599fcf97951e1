//! RenderGraph 构建器和执行器
//!
//! `RenderGraphBuilder` 用于声明资源和节点，`execute` 一次性完成
//! transient 资源分配、barrier 推导和命令录制。
//!
//! # 使用流程
//!
//! 1. 创建 builder: `RenderGraphBuilder::new()`
//! 2. 创建 / 导入资源: `create_image`, `import_image`, `create_storage_buffer` ...
//! 3. 注册节点: `dispatch`, `render_pass`, `copy_image`, `add_pass` ...
//! 4. 执行: `execute(RgExecuteContext { .. })`

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use ash::vk;
use itertools::Itertools;
use prism_gfx::basic::color::LabelColor;
use prism_gfx::commands::barrier::{GfxBufferBarrier, GfxImageBarrier};
use prism_gfx::commands::recorder::{
    GfxAttachmentInfo, GfxClearValue, GfxCommandRecorder, GfxDescriptorResource, GfxImageBlit, GfxImageCopy,
    GfxRenderingInfo,
};
use prism_gfx::resources::buffer::GfxBuffer;
use prism_gfx::resources::factory::GfxResourceFactory;
use prism_gfx::resources::image::GfxImage;
use prism_render_interface::frame_counter::FrameCounter;
use prism_render_interface::gpu_task::{GpuTask, GpuTaskHandle, GpuTaskScheduler};
use prism_render_interface::render_graph_settings::RenderGraphSettings;

use crate::render_graph::access::{RgAccessKind, RgBufferAccess, RgImageAccess};
use crate::render_graph::barrier::RgPassBarriers;
use crate::render_graph::buffer_resource::{RgBufferDesc, RgBufferResource, RgBufferSource};
use crate::render_graph::descriptor::{RgBinding, RgSetRef};
use crate::render_graph::image_resource::{RgImageDesc, RgImageResource};
use crate::render_graph::node::{
    RgDispatchDesc, RgDispatchIndirectDesc, RgNode, RgNodeKind, RgRenderPassDesc, RgSubpassDesc,
};
use crate::render_graph::pass::{RgPass, RgPassBuilder, RgPassContext, RgPassExecutorWrapper, RgPhysicalResources};
use crate::render_graph::resource_handle::{
    RgBufferHandle, RgBufferView, RgImageHandle, RgImageView, RgMipRange, next_graph_id,
};
use crate::render_graph::resource_registry::RgResourceRegistry;
use crate::render_graph::resource_state::{RgBufferState, RgImageState};
use crate::render_graph::scheduler::{RgExportedImage, RgSchedule, RgScheduler};
use crate::render_graph::transient_allocator::{
    RgAliasingMode, RgAllocationPlan, RgResourceLifetime, RgTransientKey,
};
use crate::render_graph::transient_pool::{
    RgPoolStats, RgTransientBufferRequest, RgTransientImageRequest, RgTransientPool, RgTransientRequests,
};

/// builder 的生命周期状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RgBuilderState {
    Building,
    /// `execute` 之后，任何注册都会 panic
    Executed,
}

/// view 的元数据
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgImageViewInfo {
    resolution: vk::Extent3D,
    format: vk::Format,
    base_mip: u32,
    mip_levels: u32,
}

// getters
impl RgImageViewInfo {
    /// view 第一个 mip 的尺寸
    #[inline]
    pub fn resolution(&self) -> vk::Extent3D {
        self.resolution
    }

    #[inline]
    pub fn resolution_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.resolution.width,
            height: self.resolution.height,
        }
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn base_mip(&self) -> u32 {
        self.base_mip
    }

    /// view 包含的 mip 数量
    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }
}

/// GPU 完成后执行的任务交给谁
pub struct RgGpuTaskTarget<'e> {
    pub scheduler: &'e mut GpuTaskScheduler,
    /// 本次提交完成时 timeline fence 会到达的值
    pub fence_value: u64,
}

/// `execute` 需要的外部服务
pub struct RgExecuteContext<'e> {
    pub factory: &'e mut dyn GfxResourceFactory,
    /// 已经 begin 的命令录制接口
    pub recorder: &'e mut dyn GfxCommandRecorder,
    pub pool: &'e mut RgTransientPool,
    pub frame_counter: &'e FrameCounter,
    pub settings: &'e RenderGraphSettings,
    /// 注册了 `on_gpu_complete` 时必须提供
    pub gpu_tasks: Option<RgGpuTaskTarget<'e>>,
}

/// 一次执行的结果
#[derive(Debug)]
pub struct RgFrameReport {
    pub schedule: RgSchedule,
    pub pool_stats: RgPoolStats,
    pub allocation_plan: RgAllocationPlan,
    pub scheduled_gpu_tasks: usize,
}

impl RgFrameReport {
    /// 导入 image 执行后的状态，调用方据此更新自己的状态跟踪
    #[inline]
    pub fn exported_image(&self, handle: RgImageHandle) -> Option<&RgExportedImage> {
        self.schedule.exported_image(handle)
    }
}

/// RenderGraph 构建器
///
/// 每帧（或每个离线任务）创建一个，在同一个线程上构建并执行一次。
///
/// # 生命周期
///
/// `'a` 是节点可以借用的外部数据的生命周期：录制回调、持久 descriptor set 等。
/// 不需要使用 Rc/Arc 包装。
pub struct RenderGraphBuilder<'a> {
    name: String,
    state: RgBuilderState,

    /// 资源注册表
    resources: RgResourceRegistry,

    /// 节点列表（按添加顺序，不会重排）
    nodes: Vec<RgNode<'a>>,

    /// 已经插入清零节点的 buffer
    zero_filled: HashSet<u32>,

    gpu_tasks: Vec<GpuTask>,
}

impl Default for RenderGraphBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl<'a> RenderGraphBuilder<'a> {
    pub fn new() -> Self {
        Self {
            name: "render-graph".to_string(),
            state: RgBuilderState::Building,
            resources: RgResourceRegistry::new(next_graph_id()),
            nodes: Vec::new(),
            zero_filled: HashSet::new(),
            gpu_tasks: Vec::new(),
        }
    }

    /// graph 的名字，用作最外层的 debug label
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

// getters
impl RenderGraphBuilder<'_> {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn state(&self) -> RgBuilderState {
        self.state
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn resources(&self) -> &RgResourceRegistry {
        &self.resources
    }

    #[inline]
    pub fn is_valid_image(&self, handle: RgImageHandle) -> bool {
        self.resources.contains_image(handle)
    }

    #[inline]
    pub fn is_valid_buffer(&self, handle: RgBufferHandle) -> bool {
        self.resources.contains_buffer(handle)
    }

    /// view 的尺寸、格式与 mip 数量，执行前后结果一致
    ///
    /// # Panics
    /// 句柄无效或 mip 范围越界
    pub fn image_info(&self, view: impl Into<RgImageView>) -> RgImageViewInfo {
        let view = view.into();
        let (base_mip, mip_levels) = self.resources.resolve_image_view(view);
        let desc = &self.resources.image(view.image).desc;
        RgImageViewInfo {
            resolution: desc.mip_extent(base_mip),
            format: desc.format,
            base_mip,
            mip_levels,
        }
    }

    #[inline]
    pub fn buffer_size(&self, handle: RgBufferHandle) -> vk::DeviceSize {
        self.resources.buffer(handle).size()
    }

    /// 只包含一个 mip 的 view，和原 image 共享同一份内存
    ///
    /// # Panics
    /// 句柄无效或 `mip` 超出 mip 数量
    pub fn create_mip_view(&self, handle: RgImageHandle, mip: u32) -> RgImageView {
        let image = self.resources.image(handle);
        assert!(
            mip < image.desc.mip_levels,
            "mip {} is out of bounds for image \"{}\" with {} mips",
            mip,
            image.name,
            image.desc.mip_levels
        );
        RgImageView {
            image: handle,
            mips: RgMipRange::single(mip),
        }
    }
}

// resources
impl RenderGraphBuilder<'_> {
    /// 创建 transient 图像，物理内存在 `execute` 时由 transient pool 分配
    pub fn create_image(&mut self, name: impl Into<String>, desc: &RgImageDesc) -> RgImageHandle {
        self.assert_building();
        self.resources.register_image(RgImageResource::transient(name, desc))
    }

    /// 导入外部图像
    ///
    /// # 参数
    /// - `image`: 调用方持有的物理图像
    /// - `initial_state`: 图像当前的状态
    pub fn import_image(
        &mut self,
        name: impl Into<String>,
        image: Arc<GfxImage>,
        initial_state: RgImageState,
    ) -> RgImageHandle {
        self.assert_building();
        self.resources.register_image(RgImageResource::imported(name, image, initial_state))
    }

    pub fn create_buffer(&mut self, name: impl Into<String>, desc: &RgBufferDesc) -> RgBufferHandle {
        self.assert_building();
        self.resources.register_buffer(RgBufferResource::transient(name, desc, false))
    }

    /// 创建 storage buffer
    ///
    /// `zero_fill` 为 true 时，在第一次使用之前插入一个清零节点。
    pub fn create_storage_buffer(
        &mut self,
        name: impl Into<String>,
        size: vk::DeviceSize,
        zero_fill: bool,
    ) -> RgBufferHandle {
        self.assert_building();
        self.resources.register_buffer(RgBufferResource::transient(name, &RgBufferDesc::storage(size), zero_fill))
    }

    pub fn import_buffer(
        &mut self,
        name: impl Into<String>,
        buffer: Arc<GfxBuffer>,
        initial_state: RgBufferState,
    ) -> RgBufferHandle {
        self.assert_building();
        self.resources.register_buffer(RgBufferResource::imported(name, buffer, initial_state))
    }

    /// 执行结束时把导入的图像转换到 `final_state`
    pub fn export_image(&mut self, handle: RgImageHandle, final_state: RgImageState) -> &mut Self {
        self.assert_building();
        let image = self.resources.image_mut(handle);
        assert!(!image.is_transient(), "transient image \"{}\" can not be exported", image.name);
        image.export_state = Some(final_state);
        self
    }

    pub fn export_buffer(&mut self, handle: RgBufferHandle, final_state: RgBufferState) -> &mut Self {
        self.assert_building();
        let buffer = self.resources.buffer_mut(handle);
        assert!(!buffer.is_transient(), "transient buffer \"{}\" can not be exported", buffer.name);
        buffer.export_state = Some(final_state);
        self
    }
}

// register
impl<'a> RenderGraphBuilder<'a> {
    /// 添加 compute dispatch 节点
    ///
    /// descriptor set 中的 binding 自动登记为访问声明。
    pub fn dispatch(&mut self, name: impl Into<String>, desc: RgDispatchDesc<'a>) -> &mut Self {
        self.assert_building();
        let RgDispatchDesc {
            pipeline,
            group_count,
            sets,
            push_constants,
            mut image_accesses,
            mut buffer_accesses,
        } = desc;
        collect_set_accesses(&sets, &mut image_accesses, &mut buffer_accesses);

        let kind = RgNodeKind::Dispatch {
            pipeline,
            group_count,
            sets,
            push_constants,
        };
        self.push_node(RgNode::new(name, image_accesses, buffer_accesses, kind))
    }

    /// 添加间接 dispatch 节点，参数 buffer 由 GPU 写入
    pub fn dispatch_indirect(&mut self, name: impl Into<String>, desc: RgDispatchIndirectDesc<'a>) -> &mut Self {
        self.assert_building();
        let RgDispatchIndirectDesc {
            pipeline,
            args,
            sets,
            push_constants,
            mut image_accesses,
            mut buffer_accesses,
        } = desc;
        collect_set_accesses(&sets, &mut image_accesses, &mut buffer_accesses);
        buffer_accesses.push(RgBufferAccess::fixed(args, RgAccessKind::IndirectArgument));

        let kind = RgNodeKind::DispatchIndirect {
            pipeline,
            args,
            sets,
            push_constants,
        };
        self.push_node(RgNode::new(name, image_accesses, buffer_accesses, kind))
    }

    /// 添加 render pass 节点，subpass 按添加顺序录制
    ///
    /// # Panics
    /// - 没有任何附件
    /// - 附件 view 包含多个 mip
    pub fn render_pass(&mut self, name: impl Into<String>, desc: RgRenderPassDesc<'a>) -> &mut Self {
        self.assert_building();
        let name = name.into();
        let RgRenderPassDesc {
            colors,
            depth,
            render_area,
            subpasses,
        } = desc;
        assert!(!colors.is_empty() || depth.is_some(), "render pass \"{}\" has no attachments", name);

        let mut image_accesses = Vec::new();
        let mut buffer_accesses = Vec::new();
        for color in &colors {
            self.assert_single_mip(&name, color.view);
            image_accesses.push(RgImageAccess::fixed(color.view, RgAccessKind::ColorAttachment));
        }
        if let Some(depth) = &depth {
            self.assert_single_mip(&name, depth.view);
            image_accesses.push(RgImageAccess::fixed(depth.view, depth.access_kind()));
        }
        for subpass in &subpasses {
            image_accesses.extend_from_slice(&subpass.image_accesses);
            buffer_accesses.extend_from_slice(&subpass.buffer_accesses);
            collect_set_accesses(&subpass.sets, &mut image_accesses, &mut buffer_accesses);
        }

        let kind = RgNodeKind::RenderPass {
            colors,
            depth,
            render_area,
            subpasses,
        };
        self.push_node(RgNode::new(name, image_accesses, buffer_accesses, kind))
    }

    /// 单个 mip 之间的拷贝
    ///
    /// # Panics
    /// view 包含多个 mip，或者两个 mip 的尺寸不同
    pub fn copy_image(
        &mut self,
        name: impl Into<String>,
        src: impl Into<RgImageView>,
        dst: impl Into<RgImageView>,
    ) -> &mut Self {
        self.assert_building();
        let (name, src, dst) = (name.into(), src.into(), dst.into());
        let src_mip = self.assert_single_mip(&name, src);
        let dst_mip = self.assert_single_mip(&name, dst);
        let src_extent = self.resources.image(src.image).desc.mip_extent(src_mip);
        let dst_extent = self.resources.image(dst.image).desc.mip_extent(dst_mip);
        assert_eq!(
            src_extent, dst_extent,
            "copy \"{}\" between different resolutions: {:?} and {:?}",
            name, src_extent, dst_extent
        );

        let image_accesses = vec![
            RgImageAccess::fixed(src, RgAccessKind::TransferSrc),
            RgImageAccess::fixed(dst, RgAccessKind::TransferDst),
        ];
        self.push_node(RgNode::new(name, image_accesses, Vec::new(), RgNodeKind::CopyImage { src, dst }))
    }

    /// 带缩放的单个 mip 之间的拷贝，常用于生成 mip 链
    pub fn blit_image(
        &mut self,
        name: impl Into<String>,
        src: impl Into<RgImageView>,
        dst: impl Into<RgImageView>,
        filter: vk::Filter,
    ) -> &mut Self {
        self.assert_building();
        let (name, src, dst) = (name.into(), src.into(), dst.into());
        self.assert_single_mip(&name, src);
        self.assert_single_mip(&name, dst);

        let image_accesses = vec![
            RgImageAccess::fixed(src, RgAccessKind::TransferSrc),
            RgImageAccess::fixed(dst, RgAccessKind::TransferDst),
        ];
        self.push_node(RgNode::new(name, image_accesses, Vec::new(), RgNodeKind::BlitImage { src, dst, filter }))
    }

    /// # Panics
    /// 两个范围大小不同
    pub fn copy_buffer(
        &mut self,
        name: impl Into<String>,
        src: impl Into<RgBufferView>,
        dst: impl Into<RgBufferView>,
    ) -> &mut Self {
        self.assert_building();
        let (name, src, dst) = (name.into(), src.into(), dst.into());
        let (_, src_size) = self.resources.resolve_buffer_view(src);
        let (_, dst_size) = self.resources.resolve_buffer_view(dst);
        assert_eq!(src_size, dst_size, "copy \"{}\" between ranges of different sizes", name);

        let buffer_accesses = vec![
            RgBufferAccess::fixed(src, RgAccessKind::TransferSrc),
            RgBufferAccess::fixed(dst, RgAccessKind::TransferDst),
        ];
        self.push_node(RgNode::new(name, Vec::new(), buffer_accesses, RgNodeKind::CopyBuffer { src, dst }))
    }

    /// 用 `data` 填充 buffer 范围
    pub fn fill_buffer(&mut self, name: impl Into<String>, dst: impl Into<RgBufferView>, data: u32) -> &mut Self {
        self.assert_building();
        let dst = dst.into();
        let buffer_accesses = vec![RgBufferAccess::fixed(dst, RgAccessKind::TransferDst)];
        self.push_node(RgNode::new(name, Vec::new(), buffer_accesses, RgNodeKind::FillBuffer { dst, data }))
    }

    /// 清除颜色或深度
    pub fn clear_image(
        &mut self,
        name: impl Into<String>,
        dst: impl Into<RgImageView>,
        value: GfxClearValue,
    ) -> &mut Self {
        self.assert_building();
        let dst = dst.into();
        let image_accesses = vec![RgImageAccess::fixed(dst, RgAccessKind::TransferDst)];
        self.push_node(RgNode::new(name, image_accesses, Vec::new(), RgNodeKind::ClearImage { dst, value }))
    }

    /// 添加自定义 Pass
    ///
    /// # 参数
    /// - `name`: Pass 名称（用于调试 label）
    /// - `pass`: 实现了 `RgPass` trait 的 Pass 对象
    pub fn add_pass<P: RgPass + 'a>(&mut self, name: impl Into<String>, mut pass: P) -> &mut Self {
        self.assert_building();

        // 创建 PassBuilder 供 Pass 声明依赖
        let mut builder = RgPassBuilder::new(&mut self.resources);
        pass.setup(&mut builder);
        let RgPassBuilder {
            image_accesses,
            buffer_accesses,
            ..
        } = builder;

        let kind = RgNodeKind::Custom(Box::new(RgPassExecutorWrapper { pass }));
        self.push_node(RgNode::new(name, image_accesses, buffer_accesses, kind))
    }

    /// 在本次提交的 GPU 工作完成之后，在 worker 线程上执行 `f`
    ///
    /// 常用于回读。`execute` 时必须提供 `RgExecuteContext::gpu_tasks`。
    pub fn on_gpu_complete<T, F>(&mut self, name: impl Into<String>, f: F) -> GpuTaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.assert_building();
        let (task, handle) = GpuTask::new(name, f);
        self.gpu_tasks.push(task);
        handle
    }
}

// tools
impl<'a> RenderGraphBuilder<'a> {
    fn assert_building(&self) {
        assert_eq!(
            self.state,
            RgBuilderState::Building,
            "render graph \"{}\" has already been executed",
            self.name
        );
    }

    /// 返回 view 唯一的 mip
    fn assert_single_mip(&self, node: &str, view: RgImageView) -> u32 {
        let (base, count) = self.resources.resolve_image_view(view);
        assert_eq!(
            count,
            1,
            "node \"{}\" needs a single mip of image \"{}\", got {} mips",
            node,
            self.resources.image(view.image).name,
            count
        );
        base
    }

    fn push_node(&mut self, mut node: RgNode<'a>) -> &mut Self {
        node.validate_accesses(&self.resources);

        // 需要清零的 buffer 在第一次被使用之前插入 fill 节点
        let pending_fills = node
            .buffer_accesses
            .iter()
            .map(|access| access.view.buffer)
            .unique()
            .filter(|buffer| {
                matches!(self.resources.buffer(*buffer).source, RgBufferSource::Transient { zero_fill: true })
                    && !self.zero_filled.contains(&buffer.id)
            })
            .collect_vec();
        for buffer in pending_fills {
            self.zero_filled.insert(buffer.id);
            let dst = buffer.full();
            self.nodes.push(RgNode::new(
                format!("zero-fill {}", self.resources.buffer(buffer).name),
                Vec::new(),
                vec![RgBufferAccess::fixed(dst, RgAccessKind::TransferDst)],
                RgNodeKind::FillBuffer { dst, data: 0 },
            ));
        }

        self.nodes.push(node);
        self
    }

    /// 每个被访问的 transient 资源的 `[first_node, last_node]`
    fn transient_requests(&self) -> RgTransientRequests {
        let mut image_lifetimes: Vec<Option<RgResourceLifetime>> = vec![None; self.resources.image_count()];
        let mut buffer_lifetimes: Vec<Option<RgResourceLifetime>> = vec![None; self.resources.buffer_count()];
        for (index, node) in self.nodes.iter().enumerate() {
            for access in &node.image_accesses {
                let lifetime = &mut image_lifetimes[access.view.image.id as usize];
                match lifetime {
                    Some(lifetime) => lifetime.extend(index),
                    None => *lifetime = Some(RgResourceLifetime::new(index, index)),
                }
            }
            for access in &node.buffer_accesses {
                let lifetime = &mut buffer_lifetimes[access.view.buffer.id as usize];
                match lifetime {
                    Some(lifetime) => lifetime.extend(index),
                    None => *lifetime = Some(RgResourceLifetime::new(index, index)),
                }
            }
        }

        let images = self
            .resources
            .iter_images()
            .filter(|(_, image)| image.is_transient())
            .filter_map(|(handle, image)| {
                image_lifetimes[handle.id as usize].map(|lifetime| RgTransientImageRequest {
                    id: handle.id,
                    name: image.name.clone(),
                    desc: image.desc,
                    lifetime,
                })
            })
            .collect();
        let buffers = self
            .resources
            .iter_buffers()
            .filter(|(_, buffer)| buffer.is_transient())
            .filter_map(|(handle, buffer)| {
                buffer_lifetimes[handle.id as usize].map(|lifetime| RgTransientBufferRequest {
                    id: handle.id,
                    name: buffer.name.clone(),
                    desc: buffer.desc,
                    lifetime,
                })
            })
            .collect();

        RgTransientRequests { images, buffers }
    }
}

// execute
impl RenderGraphBuilder<'_> {
    /// 分配 transient 资源，推导 barrier，并把所有节点录制到 `ctx.recorder`
    ///
    /// 不会等待 GPU。之后 builder 进入 `Executed` 状态。
    ///
    /// # Errors
    /// transient 资源或 descriptor set 分配失败
    ///
    /// # Panics
    /// - 已经执行过
    /// - 注册了 `on_gpu_complete` 但没有提供 `gpu_tasks`
    pub fn execute(&mut self, ctx: RgExecuteContext<'_>) -> anyhow::Result<RgFrameReport> {
        self.assert_building();
        assert!(
            self.gpu_tasks.is_empty() || ctx.gpu_tasks.is_some(),
            "render graph \"{}\" has {} gpu-complete tasks but no task scheduler",
            self.name,
            self.gpu_tasks.len()
        );
        self.state = RgBuilderState::Executed;

        let RgExecuteContext {
            factory,
            recorder,
            pool,
            frame_counter,
            settings,
            gpu_tasks,
        } = ctx;

        // transient 资源
        let requests = self.transient_requests();
        let mode = RgAliasingMode::from_memory_constrained(settings.memory_constrained);
        let backing = pool
            .prepare(&mut *factory, frame_counter, &requests, mode)
            .with_context(|| format!("render graph \"{}\": failed to back transient resources", self.name))?;

        // barrier
        let nodes = std::mem::take(&mut self.nodes);
        let needs_discard_sync = |key: RgTransientKey| backing.needs_discard_sync(key);
        let schedule = RgScheduler::new(&self.resources, &needs_discard_sync).schedule(&nodes);
        if settings.log_execution_plan {
            schedule.log_plan(&nodes, &self.resources);
        }

        let physical = RgPhysicalResources {
            images: self
                .resources
                .iter_images()
                .map(|(handle, image)| match image.imported_image() {
                    Some(image) => Some(image.clone()),
                    None => backing.images.get(&handle.id).cloned(),
                })
                .collect(),
            buffers: self
                .resources
                .iter_buffers()
                .map(|(handle, buffer)| match buffer.imported_buffer() {
                    Some(buffer) => Some(buffer.clone()),
                    None => backing.buffers.get(&handle.id).cloned(),
                })
                .collect(),
        };

        // 录制
        let mut recording = RgRecording {
            factory,
            recorder,
            pool,
            registry: &self.resources,
            physical: &physical,
            fif_index: frame_counter.fif_index(),
            validate: settings.validate_accesses,
        };
        recording.recorder.begin_label(&self.name, LabelColor::COLOR_GRAPH);
        for (step, node) in schedule.steps.iter().zip(nodes) {
            let mut barriers = step.activations.clone();
            barriers.extend(&step.barriers);
            recording.record_barriers(&barriers);

            recording.record_node(node).with_context(|| {
                format!("render graph \"{}\": failed to record node \"{}\"", self.name, step.name)
            })?;
        }
        if schedule.export_barriers.has_barriers() {
            recording.recorder.begin_label("export", LabelColor::COLOR_EXPORT);
            recording.record_barriers(&schedule.export_barriers);
            recording.recorder.end_label();
        }
        recording.recorder.end_label();

        // GPU 完成后的任务
        let scheduled_gpu_tasks = self.gpu_tasks.len();
        if let Some(target) = gpu_tasks {
            for task in self.gpu_tasks.drain(..) {
                target.scheduler.schedule(target.fence_value, task);
            }
        }

        let pool_stats = *recording.pool.last_stats();
        log::debug!(
            "render graph \"{}\" {}: {} nodes, {} barriers, {} activations, heap {} bytes, {} created / {} reused, {} bytes saved by aliasing",
            self.name,
            frame_counter.frame_name(),
            schedule.steps.len(),
            schedule.hazard_barrier_count(),
            schedule.activation_count(),
            pool_stats.heap_size,
            pool_stats.created_this_frame,
            pool_stats.reused_this_frame,
            pool_stats.bytes_saved_by_aliasing
        );

        Ok(RgFrameReport {
            schedule,
            pool_stats,
            allocation_plan: backing.plan,
            scheduled_gpu_tasks,
        })
    }
}

fn collect_set_accesses(
    sets: &[RgSetRef<'_>],
    image_accesses: &mut Vec<RgImageAccess>,
    buffer_accesses: &mut Vec<RgBufferAccess>,
) {
    for set in sets {
        set.state().collect_accesses(image_accesses, buffer_accesses);
    }
}

/// 执行期间录制命令需要的所有东西
struct RgRecording<'r> {
    factory: &'r mut dyn GfxResourceFactory,
    recorder: &'r mut dyn GfxCommandRecorder,
    pool: &'r mut RgTransientPool,
    registry: &'r RgResourceRegistry,
    physical: &'r RgPhysicalResources,
    fif_index: usize,
    validate: bool,
}

impl RgRecording<'_> {
    fn record_barriers(&mut self, barriers: &RgPassBarriers) {
        if !barriers.has_barriers() {
            return;
        }
        let image_barriers: Vec<GfxImageBarrier> = barriers
            .image_barriers
            .iter()
            .map(|desc| desc.to_gfx_barrier(self.physical.image(self.registry, desc.image)))
            .collect();
        let buffer_barriers: Vec<GfxBufferBarrier> = barriers
            .buffer_barriers
            .iter()
            .map(|desc| desc.to_gfx_barrier(self.physical.buffer(self.registry, desc.buffer)))
            .collect();
        self.recorder.pipeline_barrier(&image_barriers, &buffer_barriers);
    }

    fn record_node(&mut self, node: RgNode<'_>) -> anyhow::Result<()> {
        let RgNode {
            name,
            image_accesses,
            buffer_accesses,
            kind,
        } = node;
        let color = if kind.is_transfer() { LabelColor::COLOR_TRANSFER } else { LabelColor::COLOR_PASS };
        self.recorder.begin_label(&name, color);

        match kind {
            RgNodeKind::Dispatch {
                pipeline,
                group_count,
                mut sets,
                push_constants,
            } => {
                self.recorder.bind_pipeline(vk::PipelineBindPoint::COMPUTE, pipeline);
                self.bind_sets(vk::PipelineBindPoint::COMPUTE, &mut sets)?;
                if !push_constants.is_empty() {
                    self.recorder.push_constants(vk::ShaderStageFlags::COMPUTE, 0, &push_constants);
                }
                self.recorder.dispatch(group_count);
            }
            RgNodeKind::DispatchIndirect {
                pipeline,
                args,
                mut sets,
                push_constants,
            } => {
                self.recorder.bind_pipeline(vk::PipelineBindPoint::COMPUTE, pipeline);
                self.bind_sets(vk::PipelineBindPoint::COMPUTE, &mut sets)?;
                if !push_constants.is_empty() {
                    self.recorder.push_constants(vk::ShaderStageFlags::COMPUTE, 0, &push_constants);
                }
                let (offset, _) = self.registry.resolve_buffer_view(args);
                let buffer = self.physical.buffer(self.registry, args.buffer);
                self.recorder.dispatch_indirect(buffer, offset);
            }
            RgNodeKind::RenderPass {
                colors,
                depth,
                render_area,
                subpasses,
            } => {
                let attachment = |view: RgImageView, kind: RgAccessKind, load_op, store_op, clear_value| {
                    let (mip, _) = self.registry.resolve_image_view(view);
                    GfxAttachmentInfo {
                        image: self.physical.image(self.registry, view.image),
                        mip,
                        layout: kind.image_layout().unwrap_or(vk::ImageLayout::GENERAL),
                        load_op,
                        store_op,
                        clear_value,
                    }
                };
                let info = GfxRenderingInfo {
                    render_area: render_area.unwrap_or_else(|| {
                        let first = colors.first().map(|c| c.view).or(depth.map(|d| d.view));
                        first.map(|view| self.full_area(view)).unwrap_or_default()
                    }),
                    color_attachments: colors
                        .iter()
                        .map(|c| attachment(c.view, RgAccessKind::ColorAttachment, c.load_op, c.store_op, c.clear_value))
                        .collect(),
                    depth_attachment: depth
                        .map(|d| attachment(d.view, d.access_kind(), d.load_op, d.store_op, d.clear_value)),
                };

                self.recorder.begin_rendering(&info);
                self.recorder.set_viewport(vk::Viewport {
                    x: info.render_area.offset.x as f32,
                    y: info.render_area.offset.y as f32,
                    width: info.render_area.extent.width as f32,
                    height: info.render_area.extent.height as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                });
                self.recorder.set_scissor(info.render_area);
                for subpass in subpasses {
                    self.record_subpass(subpass, &image_accesses, &buffer_accesses)?;
                }
                self.recorder.end_rendering();
            }
            RgNodeKind::CopyImage { src, dst } => {
                let (src_mip, _) = self.registry.resolve_image_view(src);
                let (dst_mip, _) = self.registry.resolve_image_view(dst);
                let region = GfxImageCopy {
                    src_mip,
                    dst_mip,
                    extent: self.registry.image(src.image).desc.mip_extent(src_mip),
                };
                self.recorder.copy_image(
                    self.physical.image(self.registry, src.image),
                    self.physical.image(self.registry, dst.image),
                    &region,
                );
            }
            RgNodeKind::BlitImage { src, dst, filter } => {
                let (src_mip, _) = self.registry.resolve_image_view(src);
                let (dst_mip, _) = self.registry.resolve_image_view(dst);
                let region = GfxImageBlit {
                    src_mip,
                    dst_mip,
                    src_extent: self.registry.image(src.image).desc.mip_extent(src_mip),
                    dst_extent: self.registry.image(dst.image).desc.mip_extent(dst_mip),
                };
                self.recorder.blit_image(
                    self.physical.image(self.registry, src.image),
                    self.physical.image(self.registry, dst.image),
                    &region,
                    filter,
                );
            }
            RgNodeKind::CopyBuffer { src, dst } => {
                let (src_offset, size) = self.registry.resolve_buffer_view(src);
                let (dst_offset, _) = self.registry.resolve_buffer_view(dst);
                self.recorder.copy_buffer(
                    self.physical.buffer(self.registry, src.buffer),
                    self.physical.buffer(self.registry, dst.buffer),
                    vk::BufferCopy {
                        src_offset,
                        dst_offset,
                        size,
                    },
                );
            }
            RgNodeKind::FillBuffer { dst, data } => {
                let (offset, size) = self.registry.resolve_buffer_view(dst);
                self.recorder.fill_buffer(self.physical.buffer(self.registry, dst.buffer), offset, size, data);
            }
            RgNodeKind::ClearImage { dst, value } => {
                let (base_mip, mip_count) = self.registry.resolve_image_view(dst);
                let aspect = self.registry.image(dst.image).aspect();
                self.recorder.clear_image(
                    self.physical.image(self.registry, dst.image),
                    aspect,
                    base_mip,
                    mip_count,
                    value,
                );
            }
            RgNodeKind::Custom(executor) => {
                let mut ctx = RgPassContext {
                    cmd: &mut *self.recorder,
                    name: &name,
                    registry: self.registry,
                    physical: self.physical,
                    image_accesses: &image_accesses,
                    buffer_accesses: &buffer_accesses,
                    validate: self.validate,
                };
                executor.execute(&mut ctx);
            }
        }

        self.recorder.end_label();
        Ok(())
    }

    fn record_subpass(
        &mut self,
        subpass: RgSubpassDesc<'_>,
        image_accesses: &[RgImageAccess],
        buffer_accesses: &[RgBufferAccess],
    ) -> anyhow::Result<()> {
        let RgSubpassDesc {
            name,
            pipeline,
            mut sets,
            push_constants,
            record,
            ..
        } = subpass;

        self.recorder.begin_label(&name, LabelColor::COLOR_SUBPASS);
        if let Some(pipeline) = pipeline {
            self.recorder.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline);
        }
        self.bind_sets(vk::PipelineBindPoint::GRAPHICS, &mut sets)
            .with_context(|| format!("subpass \"{name}\""))?;
        if !push_constants.is_empty() {
            self.recorder.push_constants(vk::ShaderStageFlags::ALL_GRAPHICS, 0, &push_constants);
        }

        let mut ctx = RgPassContext {
            cmd: &mut *self.recorder,
            name: &name,
            registry: self.registry,
            physical: self.physical,
            image_accesses,
            buffer_accesses,
            validate: self.validate,
        };
        record(&mut ctx);

        self.recorder.end_label();
        Ok(())
    }

    /// 把 descriptor set 写入 GPU 并绑定，set index 等于在列表中的位置
    fn bind_sets(&mut self, bind_point: vk::PipelineBindPoint, sets: &mut [RgSetRef<'_>]) -> anyhow::Result<()> {
        let registry = self.registry;
        let physical = self.physical;
        let resolve = |binding: &RgBinding| resolve_binding(binding, registry, physical);

        for (set_index, set) in sets.iter_mut().enumerate() {
            let gpu_set = match set {
                RgSetRef::Transient(state) => {
                    let pool = &mut *self.pool;
                    let factory = &mut *self.factory;
                    state.flush(
                        0,
                        &mut *self.recorder,
                        |name, binding_count, _| pool.acquire_descriptor_set(factory, name, binding_count),
                        resolve,
                    )?
                }
                RgSetRef::Persistent(state) => {
                    let factory = &mut *self.factory;
                    state.flush(
                        self.fif_index,
                        &mut *self.recorder,
                        |name, binding_count, stale| {
                            if let Some(stale) = stale {
                                factory.destroy_descriptor_set(stale);
                            }
                            factory.create_descriptor_set(name, binding_count)
                        },
                        resolve,
                    )?
                }
            };
            self.recorder.bind_descriptor_set(bind_point, set_index as u32, gpu_set);
        }
        Ok(())
    }

    /// view 第一个 mip 的完整区域
    fn full_area(&self, view: RgImageView) -> vk::Rect2D {
        let (mip, _) = self.registry.resolve_image_view(view);
        let extent = self.registry.image(view.image).desc.mip_extent(mip);
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D {
                width: extent.width,
                height: extent.height,
            },
        }
    }
}

/// 把 binding 解析为物理资源
fn resolve_binding(
    binding: &RgBinding,
    registry: &RgResourceRegistry,
    physical: &RgPhysicalResources,
) -> GfxDescriptorResource {
    match binding {
        RgBinding::SampledImage(view) => {
            let (base_mip, mip_count) = registry.resolve_image_view(*view);
            GfxDescriptorResource::SampledImage {
                image: physical.image(registry, view.image),
                base_mip,
                mip_count,
            }
        }
        RgBinding::StorageImage { view, .. } => {
            let (base_mip, mip_count) = registry.resolve_image_view(*view);
            GfxDescriptorResource::StorageImage {
                image: physical.image(registry, view.image),
                base_mip,
                mip_count,
            }
        }
        RgBinding::UniformBuffer(view) => {
            let (offset, size) = registry.resolve_buffer_view(*view);
            GfxDescriptorResource::UniformBuffer {
                buffer: physical.buffer(registry, view.buffer),
                offset,
                size,
            }
        }
        RgBinding::StorageBuffer { view, .. } => {
            let (offset, size) = registry.resolve_buffer_view(*view);
            GfxDescriptorResource::StorageBuffer {
                buffer: physical.buffer(registry, view.buffer),
                offset,
                size,
            }
        }
        RgBinding::Sampler(sampler) => GfxDescriptorResource::Sampler(*sampler),
        RgBinding::Constants(data) => GfxDescriptorResource::Constants(data.clone()),
    }
}
