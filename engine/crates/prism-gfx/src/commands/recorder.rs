use ash::vk;

use crate::commands::barrier::{GfxBufferBarrier, GfxImageBarrier};
use crate::resources::handles::{GfxBufferHandle, GfxDescriptorSetHandle, GfxImageHandle, GfxPipelineId, GfxSamplerHandle};

/// 清除值
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GfxClearValue {
    Color([f32; 4]),
    ColorUint([u32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

impl Default for GfxClearValue {
    fn default() -> Self {
        Self::Color([0.0; 4])
    }
}

/// dynamic rendering 的一个附件
#[derive(Clone, Copy, Debug)]
pub struct GfxAttachmentInfo {
    pub image: GfxImageHandle,
    pub mip: u32,
    pub layout: vk::ImageLayout,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_value: GfxClearValue,
}

/// `begin_rendering` 的参数
#[derive(Clone, Debug)]
pub struct GfxRenderingInfo {
    pub render_area: vk::Rect2D,
    pub color_attachments: Vec<GfxAttachmentInfo>,
    pub depth_attachment: Option<GfxAttachmentInfo>,
}

/// image 之间的拷贝区域，整个 mip 级别
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxImageCopy {
    pub src_mip: u32,
    pub dst_mip: u32,
    pub extent: vk::Extent3D,
}

/// image 之间的 blit 区域，允许缩放
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxImageBlit {
    pub src_mip: u32,
    pub dst_mip: u32,
    pub src_extent: vk::Extent3D,
    pub dst_extent: vk::Extent3D,
}

/// descriptor set 中一个 binding 实际指向的物理资源
#[derive(Clone, Debug, PartialEq)]
pub enum GfxDescriptorResource {
    SampledImage {
        image: GfxImageHandle,
        base_mip: u32,
        mip_count: u32,
    },
    StorageImage {
        image: GfxImageHandle,
        base_mip: u32,
        mip_count: u32,
    },
    UniformBuffer {
        buffer: GfxBufferHandle,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    },
    StorageBuffer {
        buffer: GfxBufferHandle,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    },
    Sampler(GfxSamplerHandle),
    /// inline uniform 数据
    Constants(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct GfxDescriptorWrite {
    pub binding: u32,
    pub resource: GfxDescriptorResource,
}

/// 命令录制上下文
///
/// 渲染图在正确的位置插入 barrier 之后，把它交给每个节点的录制回调。
/// 实现方负责把句柄解析为真实的 Vulkan 对象。
///
/// 命令分类沿用 Vulkan 的说法：
/// - state：只修改录制状态
/// - action：产生 GPU 工作
/// - sync：同步命令
pub trait GfxCommandRecorder {
    // debug label
    fn begin_label(&mut self, name: &str, color: glam::Vec4);
    fn end_label(&mut self);

    /// - command type: sync
    fn pipeline_barrier(&mut self, image_barriers: &[GfxImageBarrier], buffer_barriers: &[GfxBufferBarrier]);

    /// - command type: state
    fn set_viewport(&mut self, viewport: vk::Viewport);
    /// - command type: state
    fn set_scissor(&mut self, scissor: vk::Rect2D);
    /// - command type: state
    fn bind_pipeline(&mut self, bind_point: vk::PipelineBindPoint, pipeline: GfxPipelineId);
    /// 把资源写入 GPU 侧的 descriptor set
    fn update_descriptor_set(&mut self, set: GfxDescriptorSetHandle, writes: &[GfxDescriptorWrite]);
    /// - command type: state
    fn bind_descriptor_set(&mut self, bind_point: vk::PipelineBindPoint, set_index: u32, set: GfxDescriptorSetHandle);
    /// - command type: state
    fn push_constants(&mut self, stages: vk::ShaderStageFlags, offset: u32, data: &[u8]);
    /// - command type: state
    fn bind_vertex_buffer(&mut self, binding: u32, buffer: GfxBufferHandle, offset: vk::DeviceSize);
    /// - command type: state
    fn bind_index_buffer(&mut self, buffer: GfxBufferHandle, offset: vk::DeviceSize, index_type: vk::IndexType);

    /// - command type: action
    fn dispatch(&mut self, group_count: [u32; 3]);
    /// - command type: action
    fn dispatch_indirect(&mut self, buffer: GfxBufferHandle, offset: vk::DeviceSize);

    /// - command type: action
    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);
    /// - command type: action
    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    /// - command type: action
    fn draw_indirect(&mut self, buffer: GfxBufferHandle, offset: vk::DeviceSize, draw_count: u32, stride: u32);
    /// - command type: action
    fn draw_indexed_indirect(&mut self, buffer: GfxBufferHandle, offset: vk::DeviceSize, draw_count: u32, stride: u32);

    /// - command type: action, state
    fn begin_rendering(&mut self, info: &GfxRenderingInfo);
    /// - command type: action, state
    fn end_rendering(&mut self);

    /// - command type: action
    fn copy_image(&mut self, src: GfxImageHandle, dst: GfxImageHandle, region: &GfxImageCopy);
    /// - command type: action
    fn blit_image(&mut self, src: GfxImageHandle, dst: GfxImageHandle, region: &GfxImageBlit, filter: vk::Filter);
    /// - command type: action
    fn copy_buffer(&mut self, src: GfxBufferHandle, dst: GfxBufferHandle, region: vk::BufferCopy);
    /// - command type: action
    fn fill_buffer(&mut self, buffer: GfxBufferHandle, offset: vk::DeviceSize, size: vk::DeviceSize, data: u32);
    /// - command type: action
    fn clear_image(
        &mut self,
        image: GfxImageHandle,
        aspect: vk::ImageAspectFlags,
        base_mip: u32,
        mip_count: u32,
        value: GfxClearValue,
    );
}
