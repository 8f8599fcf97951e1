//! 声明式渲染图
//!
//! 调用方在一帧内声明资源（transient 或导入的）和节点，每个节点声明它访问哪些资源、
//! 以什么方式访问。`RenderGraphBuilder::execute` 负责：
//!
//! - 为 transient 资源在 heap 上分配物理内存，生命周期不重叠的资源可以共享内存
//! - 按注册顺序推导每个节点之前的 barrier（逐 mip / 逐字节区间）
//! - 录制命令，并在末尾把导入资源转换到导出状态
//!
//! 节点不会被重排，也不会被裁剪。

mod access;
mod barrier;
mod buffer_resource;
mod descriptor;
mod executor;
mod image_resource;
mod node;
mod pass;
mod resource_handle;
mod resource_registry;
mod resource_state;
mod scheduler;
mod transient_allocator;
mod transient_pool;

// Re-exports
pub use access::{RgAccessKind, RgBufferAccess, RgImageAccess, shader_stages_to_pipeline_stages};
pub use barrier::{RgBufferBarrierDesc, RgImageBarrierDesc, RgPassBarriers};
pub use buffer_resource::{RgBufferDesc, RgBufferResource, RgBufferSource};
pub use descriptor::{RgBinding, RgBindingVisitor, RgDescriptorSetState, RgSetRef};
pub use executor::{
    RenderGraphBuilder, RgBuilderState, RgExecuteContext, RgFrameReport, RgGpuTaskTarget, RgImageViewInfo,
};
pub use image_resource::{RgImageDesc, RgImageResource, RgImageSource};
pub use node::{
    RgAttachment, RgDepthAttachment, RgDispatchDesc, RgDispatchIndirectDesc, RgNode, RgRenderPassDesc, RgSubpassDesc,
};
pub use pass::{RgPass, RgPassBuilder, RgPassContext};
pub use resource_handle::{RgBufferHandle, RgBufferView, RgByteRange, RgImageHandle, RgImageView, RgMipRange};
pub use resource_registry::RgResourceRegistry;
pub use resource_state::{RgBufferState, RgImageState};
pub use scheduler::{RgExportedBuffer, RgExportedImage, RgSchedule, RgScheduledNode, RgScheduler};
pub use transient_allocator::{
    RgAliasingMode, RgAllocationPlan, RgAllocationRequest, RgPlacement, RgResourceLifetime, RgTransientAllocator,
    RgTransientKey,
};
pub use transient_pool::{
    RgPoolStats, RgTransientBacking, RgTransientBufferRequest, RgTransientImageRequest, RgTransientPool,
    RgTransientRequests,
};
