//! 节点定义
//!
//! 每次调用 `RenderGraphBuilder` 的注册方法都会追加一个 `RgNode`。
//! 节点在 `execute` 时被消费一次，之后丢弃。

use ash::vk;
use prism_gfx::commands::recorder::GfxClearValue;
use prism_gfx::resources::handles::GfxPipelineId;

use crate::render_graph::access::{RgAccessKind, RgBufferAccess, RgImageAccess};
use crate::render_graph::descriptor::RgSetRef;
use crate::render_graph::pass::{RgPassContext, RgPassExecutor};
use crate::render_graph::resource_handle::{RgBufferView, RgImageView};
use crate::render_graph::resource_registry::RgResourceRegistry;

/// 为 compute 节点的参数结构生成共同的 builder 方法
macro_rules! impl_compute_params {
    ($ty:ident) => {
        impl<'a> $ty<'a> {
            /// 追加一个 descriptor set，set index 等于追加顺序
            #[inline]
            pub fn set(mut self, set: impl Into<RgSetRef<'a>>) -> Self {
                self.sets.push(set.into());
                self
            }

            #[inline]
            pub fn push_constants<T: bytemuck::Pod>(mut self, data: &T) -> Self {
                self.push_constants = bytemuck::bytes_of(data).to_vec();
                self
            }

            /// 声明 descriptor set 之外的 image 读取
            pub fn read_image(mut self, view: impl Into<RgImageView>, kind: RgAccessKind) -> Self {
                assert!(!kind.is_write(), "{:?} is a write access", kind);
                self.image_accesses.push(compute_image_access(view.into(), kind));
                self
            }

            pub fn write_image(mut self, view: impl Into<RgImageView>, kind: RgAccessKind) -> Self {
                assert!(kind.is_write(), "{:?} is not a write access", kind);
                self.image_accesses.push(compute_image_access(view.into(), kind));
                self
            }

            pub fn read_buffer(mut self, view: impl Into<RgBufferView>, kind: RgAccessKind) -> Self {
                assert!(!kind.is_write(), "{:?} is a write access", kind);
                self.buffer_accesses.push(compute_buffer_access(view.into(), kind));
                self
            }

            pub fn write_buffer(mut self, view: impl Into<RgBufferView>, kind: RgAccessKind) -> Self {
                assert!(kind.is_write(), "{:?} is not a write access", kind);
                self.buffer_accesses.push(compute_buffer_access(view.into(), kind));
                self
            }
        }
    };
}

fn compute_image_access(view: RgImageView, kind: RgAccessKind) -> RgImageAccess {
    RgImageAccess::new(view, kind, kind.fixed_stage().unwrap_or(vk::PipelineStageFlags2::COMPUTE_SHADER))
}

fn compute_buffer_access(view: RgBufferView, kind: RgAccessKind) -> RgBufferAccess {
    RgBufferAccess::new(view, kind, kind.fixed_stage().unwrap_or(vk::PipelineStageFlags2::COMPUTE_SHADER))
}

/// compute dispatch 的参数
pub struct RgDispatchDesc<'a> {
    pub pipeline: GfxPipelineId,
    pub group_count: [u32; 3],
    pub sets: Vec<RgSetRef<'a>>,
    pub push_constants: Vec<u8>,
    pub image_accesses: Vec<RgImageAccess>,
    pub buffer_accesses: Vec<RgBufferAccess>,
}

impl RgDispatchDesc<'_> {
    pub fn new(pipeline: GfxPipelineId, group_count: [u32; 3]) -> Self {
        Self {
            pipeline,
            group_count,
            sets: Vec::new(),
            push_constants: Vec::new(),
            image_accesses: Vec::new(),
            buffer_accesses: Vec::new(),
        }
    }

    /// 覆盖 `extent` 所需的 group 数量
    pub fn group_count_for(extent: vk::Extent3D, local_size: [u32; 3]) -> [u32; 3] {
        [
            extent.width.div_ceil(local_size[0].max(1)),
            extent.height.div_ceil(local_size[1].max(1)),
            extent.depth.div_ceil(local_size[2].max(1)),
        ]
    }
}
impl_compute_params!(RgDispatchDesc);

/// 间接 dispatch 的参数，group 数量由 GPU 写入 `args`
pub struct RgDispatchIndirectDesc<'a> {
    pub pipeline: GfxPipelineId,
    /// `VkDispatchIndirectCommand` 所在位置
    pub args: RgBufferView,
    pub sets: Vec<RgSetRef<'a>>,
    pub push_constants: Vec<u8>,
    pub image_accesses: Vec<RgImageAccess>,
    pub buffer_accesses: Vec<RgBufferAccess>,
}

impl RgDispatchIndirectDesc<'_> {
    pub fn new(pipeline: GfxPipelineId, args: impl Into<RgBufferView>) -> Self {
        Self {
            pipeline,
            args: args.into(),
            sets: Vec::new(),
            push_constants: Vec::new(),
            image_accesses: Vec::new(),
            buffer_accesses: Vec::new(),
        }
    }
}
impl_compute_params!(RgDispatchIndirectDesc);

/// 颜色附件
#[derive(Clone, Copy, Debug)]
pub struct RgAttachment {
    /// 只能包含一个 mip
    pub view: RgImageView,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_value: GfxClearValue,
}

impl RgAttachment {
    pub fn clear(view: impl Into<RgImageView>, clear_value: GfxClearValue) -> Self {
        Self {
            view: view.into(),
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value,
        }
    }

    pub fn load(view: impl Into<RgImageView>) -> Self {
        Self {
            view: view.into(),
            load_op: vk::AttachmentLoadOp::LOAD,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: GfxClearValue::default(),
        }
    }
}

/// 深度附件
#[derive(Clone, Copy, Debug)]
pub struct RgDepthAttachment {
    pub view: RgImageView,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_value: GfxClearValue,
    /// 只做深度测试，不写入
    pub read_only: bool,
}

impl RgDepthAttachment {
    pub fn clear(view: impl Into<RgImageView>, depth: f32) -> Self {
        Self {
            view: view.into(),
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: GfxClearValue::DepthStencil { depth, stencil: 0 },
            read_only: false,
        }
    }

    pub fn read_only(view: impl Into<RgImageView>) -> Self {
        Self {
            view: view.into(),
            load_op: vk::AttachmentLoadOp::LOAD,
            store_op: vk::AttachmentStoreOp::NONE,
            clear_value: GfxClearValue::default(),
            read_only: true,
        }
    }

    #[inline]
    pub fn access_kind(&self) -> RgAccessKind {
        if self.read_only { RgAccessKind::DepthRead } else { RgAccessKind::DepthAttachment }
    }
}

pub(crate) type RgRecordFn<'a> = Box<dyn FnOnce(&mut RgPassContext<'_>) + 'a>;

/// render pass 中的一个 subpass
pub struct RgSubpassDesc<'a> {
    pub name: String,
    pub pipeline: Option<GfxPipelineId>,
    pub sets: Vec<RgSetRef<'a>>,
    pub push_constants: Vec<u8>,
    pub image_accesses: Vec<RgImageAccess>,
    pub buffer_accesses: Vec<RgBufferAccess>,
    pub(crate) record: RgRecordFn<'a>,
}

impl<'a> RgSubpassDesc<'a> {
    pub fn new(name: impl Into<String>, record: impl FnOnce(&mut RgPassContext<'_>) + 'a) -> Self {
        Self {
            name: name.into(),
            pipeline: None,
            sets: Vec::new(),
            push_constants: Vec::new(),
            image_accesses: Vec::new(),
            buffer_accesses: Vec::new(),
            record: Box::new(record),
        }
    }

    #[inline]
    pub fn with_pipeline(mut self, pipeline: GfxPipelineId) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    #[inline]
    pub fn set(mut self, set: impl Into<RgSetRef<'a>>) -> Self {
        self.sets.push(set.into());
        self
    }

    #[inline]
    pub fn push_constants<T: bytemuck::Pod>(mut self, data: &T) -> Self {
        self.push_constants = bytemuck::bytes_of(data).to_vec();
        self
    }

    pub fn read_image(
        mut self,
        view: impl Into<RgImageView>,
        kind: RgAccessKind,
        stage: vk::PipelineStageFlags2,
    ) -> Self {
        assert!(!kind.is_write(), "{:?} is a write access", kind);
        self.image_accesses.push(RgImageAccess::new(view, kind, stage));
        self
    }

    /// 顶点、索引、间接绘制参数等 buffer 读取
    pub fn read_buffer(mut self, view: impl Into<RgBufferView>, kind: RgAccessKind) -> Self {
        assert!(!kind.is_write(), "{:?} is a write access", kind);
        let stage = kind.fixed_stage().unwrap_or(vk::PipelineStageFlags2::VERTEX_SHADER);
        self.buffer_accesses.push(RgBufferAccess::new(view, kind, stage));
        self
    }
}

/// 使用 dynamic rendering 的 render pass
#[derive(Default)]
pub struct RgRenderPassDesc<'a> {
    pub colors: Vec<RgAttachment>,
    pub depth: Option<RgDepthAttachment>,
    /// 为 `None` 时使用第一个附件的尺寸
    pub render_area: Option<vk::Rect2D>,
    pub subpasses: Vec<RgSubpassDesc<'a>>,
}

impl<'a> RgRenderPassDesc<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn with_color(mut self, attachment: RgAttachment) -> Self {
        self.colors.push(attachment);
        self
    }

    #[inline]
    pub fn with_depth(mut self, attachment: RgDepthAttachment) -> Self {
        self.depth = Some(attachment);
        self
    }

    #[inline]
    pub fn with_render_area(mut self, render_area: vk::Rect2D) -> Self {
        self.render_area = Some(render_area);
        self
    }

    /// subpass 按追加顺序录制
    pub fn add_subpass(&mut self, subpass: RgSubpassDesc<'a>) -> &mut Self {
        self.subpasses.push(subpass);
        self
    }
}

/// 节点的具体工作
pub(crate) enum RgNodeKind<'a> {
    Dispatch {
        pipeline: GfxPipelineId,
        group_count: [u32; 3],
        sets: Vec<RgSetRef<'a>>,
        push_constants: Vec<u8>,
    },
    DispatchIndirect {
        pipeline: GfxPipelineId,
        args: RgBufferView,
        sets: Vec<RgSetRef<'a>>,
        push_constants: Vec<u8>,
    },
    RenderPass {
        colors: Vec<RgAttachment>,
        depth: Option<RgDepthAttachment>,
        render_area: Option<vk::Rect2D>,
        subpasses: Vec<RgSubpassDesc<'a>>,
    },
    CopyImage {
        src: RgImageView,
        dst: RgImageView,
    },
    BlitImage {
        src: RgImageView,
        dst: RgImageView,
        filter: vk::Filter,
    },
    CopyBuffer {
        src: RgBufferView,
        dst: RgBufferView,
    },
    FillBuffer {
        dst: RgBufferView,
        data: u32,
    },
    ClearImage {
        dst: RgImageView,
        value: GfxClearValue,
    },
    Custom(Box<dyn RgPassExecutor + 'a>),
}

impl RgNodeKind<'_> {
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Self::Dispatch { .. } => "dispatch",
            Self::DispatchIndirect { .. } => "dispatch-indirect",
            Self::RenderPass { .. } => "render-pass",
            Self::CopyImage { .. } => "copy-image",
            Self::BlitImage { .. } => "blit-image",
            Self::CopyBuffer { .. } => "copy-buffer",
            Self::FillBuffer { .. } => "fill-buffer",
            Self::ClearImage { .. } => "clear-image",
            Self::Custom(_) => "pass",
        }
    }

    #[inline]
    pub(crate) fn is_transfer(&self) -> bool {
        matches!(
            self,
            Self::CopyImage { .. }
                | Self::BlitImage { .. }
                | Self::CopyBuffer { .. }
                | Self::FillBuffer { .. }
                | Self::ClearImage { .. }
        )
    }
}

/// graph 中的一个节点
pub struct RgNode<'a> {
    pub name: String,
    pub image_accesses: Vec<RgImageAccess>,
    pub buffer_accesses: Vec<RgBufferAccess>,
    pub(crate) kind: RgNodeKind<'a>,
}

impl<'a> RgNode<'a> {
    pub(crate) fn new(
        name: impl Into<String>,
        image_accesses: Vec<RgImageAccess>,
        buffer_accesses: Vec<RgBufferAccess>,
        kind: RgNodeKind<'a>,
    ) -> Self {
        Self {
            name: name.into(),
            image_accesses,
            buffer_accesses,
            kind,
        }
    }

    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    /// 去掉重复的声明，检查同一节点内的访问是否冲突
    ///
    /// # Panics
    /// - 句柄无效，或者 view 超出资源范围
    /// - 重叠的范围上有两个写访问
    /// - 同一个 mip 被要求处于两种 layout
    pub(crate) fn validate_accesses(&mut self, registry: &RgResourceRegistry) {
        let images: Vec<(u32, u32)> =
            self.image_accesses.iter().map(|access| registry.resolve_image_view(access.view)).collect();
        fold_depth_samples(&mut self.image_accesses, &images);

        dedup_in_place(&mut self.image_accesses);
        dedup_in_place(&mut self.buffer_accesses);

        let images: Vec<(u32, u32)> =
            self.image_accesses.iter().map(|access| registry.resolve_image_view(access.view)).collect();
        for i in 0..self.image_accesses.len() {
            for j in (i + 1)..self.image_accesses.len() {
                let (a, b) = (&self.image_accesses[i], &self.image_accesses[j]);
                if a.view.image != b.view.image || !ranges_overlap(images[i], images[j]) {
                    continue;
                }
                let name = &registry.image(a.view.image).name;
                assert!(
                    !(a.kind.is_write() && b.kind.is_write()),
                    "node \"{}\" writes image \"{}\" twice in overlapping mips ({:?} and {:?})",
                    self.name,
                    name,
                    a.kind,
                    b.kind
                );
                assert_eq!(
                    a.layout(),
                    b.layout(),
                    "node \"{}\" needs image \"{}\" in two layouts at once ({:?} and {:?})",
                    self.name,
                    name,
                    a.kind,
                    b.kind
                );
            }
        }

        let buffers: Vec<(u64, u64)> =
            self.buffer_accesses.iter().map(|access| registry.resolve_buffer_view(access.view)).collect();
        for i in 0..self.buffer_accesses.len() {
            for j in (i + 1)..self.buffer_accesses.len() {
                let (a, b) = (&self.buffer_accesses[i], &self.buffer_accesses[j]);
                if a.view.buffer != b.view.buffer || !ranges_overlap(buffers[i], buffers[j]) {
                    continue;
                }
                assert!(
                    !(a.kind.is_write() && b.kind.is_write()),
                    "node \"{}\" writes buffer \"{}\" twice in overlapping ranges ({:?} and {:?})",
                    self.name,
                    registry.buffer(a.view.buffer).name,
                    a.kind,
                    b.kind
                );
            }
        }
    }
}

/// 与只读深度附件重叠的采样读取保持 `DEPTH_STENCIL_READ_ONLY_OPTIMAL`
fn fold_depth_samples(accesses: &mut [RgImageAccess], ranges: &[(u32, u32)]) {
    let depth_reads: Vec<usize> =
        (0..accesses.len()).filter(|&i| accesses[i].kind == RgAccessKind::DepthRead).collect();
    for i in 0..accesses.len() {
        if accesses[i].kind != RgAccessKind::SampledRead {
            continue;
        }
        let folded = depth_reads
            .iter()
            .any(|&d| accesses[d].view.image == accesses[i].view.image && ranges_overlap(ranges[d], ranges[i]));
        if folded {
            accesses[i].kind = RgAccessKind::DepthSampled;
        }
    }
}

fn dedup_in_place<T: PartialEq>(items: &mut Vec<T>) {
    let mut i = 0;
    while i < items.len() {
        if items[..i].contains(&items[i]) {
            items.remove(i);
        } else {
            i += 1;
        }
    }
}

/// `(start, count)` 形式的两个范围是否相交
#[inline]
pub(crate) fn ranges_overlap<T>(a: (T, T), b: (T, T)) -> bool
where
    T: Copy + PartialOrd + std::ops::Add<Output = T>,
{
    a.0 < b.0 + b.1 && b.0 < a.0 + a.1
}
