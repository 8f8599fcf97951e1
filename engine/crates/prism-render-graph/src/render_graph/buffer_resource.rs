use std::sync::Arc;

use ash::vk;
use prism_gfx::resources::buffer::{GfxBuffer, GfxBufferDesc};

use crate::render_graph::resource_state::RgBufferState;

/// 缓冲区资源描述（用于创建临时资源）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RgBufferDesc {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
}

impl Default for RgBufferDesc {
    fn default() -> Self {
        Self {
            size: 0,
            usage: vk::BufferUsageFlags::STORAGE_BUFFER,
        }
    }
}

// new & init
impl RgBufferDesc {
    #[inline]
    pub fn new(size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Self {
        Self { size, usage }
    }

    /// storage buffer，同时可以作为 transfer 目标与间接参数
    #[inline]
    pub fn storage(size: vk::DeviceSize) -> Self {
        Self::new(
            size,
            vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::INDIRECT_BUFFER,
        )
    }

    #[inline]
    pub fn to_gfx_desc(&self) -> GfxBufferDesc {
        GfxBufferDesc::new(self.size, self.usage)
    }
}

/// 缓冲区资源的来源
#[derive(Clone, Debug)]
pub enum RgBufferSource {
    Imported {
        buffer: Arc<GfxBuffer>,
        initial_state: RgBufferState,
    },
    Transient {
        /// 第一次被访问之前先清零
        zero_fill: bool,
    },
}

/// 缓冲区资源条目
#[derive(Clone, Debug)]
pub struct RgBufferResource {
    pub name: String,
    pub desc: GfxBufferDesc,
    pub source: RgBufferSource,
    pub export_state: Option<RgBufferState>,
}

// new & init
impl RgBufferResource {
    pub fn imported(name: impl Into<String>, buffer: Arc<GfxBuffer>, initial_state: RgBufferState) -> Self {
        Self {
            name: name.into(),
            desc: *buffer.desc(),
            source: RgBufferSource::Imported { buffer, initial_state },
            export_state: None,
        }
    }

    pub fn transient(name: impl Into<String>, desc: &RgBufferDesc, zero_fill: bool) -> Self {
        assert!(desc.size > 0, "buffer size must not be zero");
        Self {
            name: name.into(),
            desc: desc.to_gfx_desc(),
            source: RgBufferSource::Transient { zero_fill },
            export_state: None,
        }
    }
}

// getter
impl RgBufferResource {
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self.source, RgBufferSource::Transient { .. })
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.desc.size
    }

    #[inline]
    pub fn imported_buffer(&self) -> Option<&Arc<GfxBuffer>> {
        match &self.source {
            RgBufferSource::Imported { buffer, .. } => Some(buffer),
            RgBufferSource::Transient { .. } => None,
        }
    }
}
