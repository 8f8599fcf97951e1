//! 访问声明
//!
//! 一个节点对资源的每一次使用都是一条 `(view, kind, stage)`，
//! `RgAccessKind` 决定 access mask 与 image layout。

use ash::vk;

use crate::render_graph::resource_handle::{RgBufferView, RgImageView};
use crate::render_graph::resource_state::{RgBufferState, RgImageState};

const READ_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
    vk::AccessFlags2::SHADER_SAMPLED_READ.as_raw()
        | vk::AccessFlags2::SHADER_STORAGE_READ.as_raw()
        | vk::AccessFlags2::COLOR_ATTACHMENT_READ.as_raw()
        | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
        | vk::AccessFlags2::UNIFORM_READ.as_raw()
        | vk::AccessFlags2::INDIRECT_COMMAND_READ.as_raw()
        | vk::AccessFlags2::VERTEX_ATTRIBUTE_READ.as_raw()
        | vk::AccessFlags2::INDEX_READ.as_raw()
        | vk::AccessFlags2::TRANSFER_READ.as_raw(),
);

/// 资源的使用方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RgAccessKind {
    /// 采样（SRV）
    SampledRead,
    StorageRead,
    StorageWrite,
    StorageReadWrite,
    /// 颜色附件，包含 load 与 blend 的读取
    ColorAttachment,
    DepthAttachment,
    /// 只读深度附件
    DepthRead,
    /// 在只读深度附件期间被 shader 采样，layout 与 `DepthRead` 一致
    DepthSampled,
    UniformRead,
    IndirectArgument,
    /// 顶点与索引
    VertexInput,
    TransferSrc,
    TransferDst,
}

impl RgAccessKind {
    #[inline]
    pub fn is_write(self) -> bool {
        matches!(
            self,
            Self::StorageWrite
                | Self::StorageReadWrite
                | Self::ColorAttachment
                | Self::DepthAttachment
                | Self::TransferDst
        )
    }

    #[inline]
    pub fn is_read(self) -> bool {
        self.access_flags().intersects(READ_ACCESS)
    }

    pub fn access_flags(self) -> vk::AccessFlags2 {
        match self {
            Self::SampledRead => vk::AccessFlags2::SHADER_SAMPLED_READ,
            Self::StorageRead => vk::AccessFlags2::SHADER_STORAGE_READ,
            Self::StorageWrite => vk::AccessFlags2::SHADER_STORAGE_WRITE,
            Self::StorageReadWrite => vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE,
            Self::ColorAttachment => {
                vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
            }
            Self::DepthAttachment => {
                vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE
            }
            Self::DepthRead => vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ,
            Self::DepthSampled => vk::AccessFlags2::SHADER_SAMPLED_READ,
            Self::UniformRead => vk::AccessFlags2::UNIFORM_READ,
            Self::IndirectArgument => vk::AccessFlags2::INDIRECT_COMMAND_READ,
            Self::VertexInput => vk::AccessFlags2::VERTEX_ATTRIBUTE_READ | vk::AccessFlags2::INDEX_READ,
            Self::TransferSrc => vk::AccessFlags2::TRANSFER_READ,
            Self::TransferDst => vk::AccessFlags2::TRANSFER_WRITE,
        }
    }

    /// image 在这种访问下需要的 layout；只能用于 buffer 的访问返回 `None`
    pub fn image_layout(self) -> Option<vk::ImageLayout> {
        match self {
            Self::SampledRead => Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            Self::StorageRead | Self::StorageWrite | Self::StorageReadWrite => Some(vk::ImageLayout::GENERAL),
            Self::ColorAttachment => Some(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
            Self::DepthAttachment => Some(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            Self::DepthRead | Self::DepthSampled => Some(vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL),
            Self::TransferSrc => Some(vk::ImageLayout::TRANSFER_SRC_OPTIMAL),
            Self::TransferDst => Some(vk::ImageLayout::TRANSFER_DST_OPTIMAL),
            Self::UniformRead | Self::IndirectArgument | Self::VertexInput => None,
        }
    }

    #[inline]
    pub fn supports_buffer(self) -> bool {
        matches!(
            self,
            Self::StorageRead
                | Self::StorageWrite
                | Self::StorageReadWrite
                | Self::UniformRead
                | Self::IndirectArgument
                | Self::VertexInput
                | Self::TransferSrc
                | Self::TransferDst
        )
    }

    /// 固定功能阶段的访问自带 stage；shader 访问返回 `None`，由调用方指定
    pub fn fixed_stage(self) -> Option<vk::PipelineStageFlags2> {
        match self {
            Self::ColorAttachment => Some(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT),
            Self::DepthAttachment | Self::DepthRead => {
                Some(vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS)
            }
            Self::IndirectArgument => Some(vk::PipelineStageFlags2::DRAW_INDIRECT),
            Self::VertexInput => Some(vk::PipelineStageFlags2::VERTEX_INPUT | vk::PipelineStageFlags2::INDEX_INPUT),
            Self::TransferSrc | Self::TransferDst => Some(vk::PipelineStageFlags2::TRANSFER),
            _ => None,
        }
    }
}

/// shader 可见性转换为 pipeline stage
pub fn shader_stages_to_pipeline_stages(stages: vk::ShaderStageFlags) -> vk::PipelineStageFlags2 {
    let mut result = vk::PipelineStageFlags2::NONE;
    let pairs = [
        (vk::ShaderStageFlags::VERTEX, vk::PipelineStageFlags2::VERTEX_SHADER),
        (vk::ShaderStageFlags::FRAGMENT, vk::PipelineStageFlags2::FRAGMENT_SHADER),
        (vk::ShaderStageFlags::COMPUTE, vk::PipelineStageFlags2::COMPUTE_SHADER),
        (vk::ShaderStageFlags::GEOMETRY, vk::PipelineStageFlags2::GEOMETRY_SHADER),
        (vk::ShaderStageFlags::TASK_EXT, vk::PipelineStageFlags2::TASK_SHADER_EXT),
        (vk::ShaderStageFlags::MESH_EXT, vk::PipelineStageFlags2::MESH_SHADER_EXT),
        (vk::ShaderStageFlags::RAYGEN_KHR, vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR),
    ];
    for (shader_stage, pipeline_stage) in pairs {
        if stages.intersects(shader_stage) {
            result |= pipeline_stage;
        }
    }
    if result.is_empty() { vk::PipelineStageFlags2::ALL_COMMANDS } else { result }
}

/// 节点对 image 的一次访问
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgImageAccess {
    pub view: RgImageView,
    pub kind: RgAccessKind,
    pub stage: vk::PipelineStageFlags2,
}

impl RgImageAccess {
    pub fn new(view: impl Into<RgImageView>, kind: RgAccessKind, stage: vk::PipelineStageFlags2) -> Self {
        assert!(kind.image_layout().is_some(), "{:?} can not be used on an image", kind);
        Self {
            view: view.into(),
            kind,
            stage,
        }
    }

    /// 使用访问类型自带的 stage
    pub fn fixed(view: impl Into<RgImageView>, kind: RgAccessKind) -> Self {
        let stage = kind.fixed_stage().unwrap_or_else(|| panic!("{:?} needs an explicit pipeline stage", kind));
        Self::new(view, kind, stage)
    }

    #[inline]
    pub fn layout(&self) -> vk::ImageLayout {
        self.kind.image_layout().unwrap_or(vk::ImageLayout::UNDEFINED)
    }

    #[inline]
    pub fn state(&self) -> RgImageState {
        RgImageState::new(self.stage, self.kind.access_flags(), self.layout())
    }
}

/// 节点对 buffer 的一次访问
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgBufferAccess {
    pub view: RgBufferView,
    pub kind: RgAccessKind,
    pub stage: vk::PipelineStageFlags2,
}

impl RgBufferAccess {
    pub fn new(view: impl Into<RgBufferView>, kind: RgAccessKind, stage: vk::PipelineStageFlags2) -> Self {
        assert!(kind.supports_buffer(), "{:?} can not be used on a buffer", kind);
        Self {
            view: view.into(),
            kind,
            stage,
        }
    }

    pub fn fixed(view: impl Into<RgBufferView>, kind: RgAccessKind) -> Self {
        let stage = kind.fixed_stage().unwrap_or_else(|| panic!("{:?} needs an explicit pipeline stage", kind));
        Self::new(view, kind, stage)
    }

    #[inline]
    pub fn state(&self) -> RgBufferState {
        RgBufferState::new(self.stage, self.kind.access_flags())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_graph::resource_handle::{RgImageHandle, RgImageKey};

    #[test]
    fn test_kind_classification() {
        assert!(RgAccessKind::StorageReadWrite.is_write());
        assert!(RgAccessKind::StorageReadWrite.is_read());
        assert!(!RgAccessKind::StorageWrite.is_read());
        assert!(!RgAccessKind::SampledRead.is_write());
        assert!(RgAccessKind::ColorAttachment.is_write());
        assert!(!RgAccessKind::SampledRead.supports_buffer());
        assert_eq!(RgAccessKind::UniformRead.image_layout(), None);
        assert!(!RgAccessKind::DepthSampled.is_write());
        assert!(RgAccessKind::DepthSampled.is_read());
        assert_eq!(RgAccessKind::DepthSampled.image_layout(), RgAccessKind::DepthRead.image_layout());
    }

    #[test]
    fn test_access_state() {
        let image = RgImageHandle::new(RgImageKey::default(), 0, 1);
        let access = RgImageAccess::new(image, RgAccessKind::SampledRead, vk::PipelineStageFlags2::COMPUTE_SHADER);
        assert_eq!(access.state(), RgImageState::SHADER_READ_COMPUTE);

        let copy = RgImageAccess::fixed(image, RgAccessKind::TransferDst);
        assert_eq!(copy.state(), RgImageState::TRANSFER_DST);
    }

    #[test]
    #[should_panic]
    fn test_buffer_only_kind_on_image() {
        let image = RgImageHandle::new(RgImageKey::default(), 0, 1);
        RgImageAccess::fixed(image, RgAccessKind::IndirectArgument);
    }

    #[test]
    fn test_shader_stage_mapping() {
        assert_eq!(
            shader_stages_to_pipeline_stages(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT),
            vk::PipelineStageFlags2::VERTEX_SHADER | vk::PipelineStageFlags2::FRAGMENT_SHADER
        );
        assert_eq!(
            shader_stages_to_pipeline_stages(vk::ShaderStageFlags::COMPUTE),
            vk::PipelineStageFlags2::COMPUTE_SHADER
        );
    }
}
