use std::sync::Arc;

use ash::vk;
use prism_gfx::resources::image::{GfxImage, GfxImageDesc};

use crate::render_graph::resource_state::RgImageState;

/// 图像资源描述（用于创建临时资源）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RgImageDesc {
    pub width: u32,
    pub height: u32,
    /// 图像深度（3D 纹理）
    pub depth: u32,
    pub mip_levels: u32,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub samples: vk::SampleCountFlags,
}

impl Default for RgImageDesc {
    fn default() -> Self {
        Self {
            width: 1,
            height: 1,
            depth: 1,
            mip_levels: 1,
            format: vk::Format::R8G8B8A8_UNORM,
            usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE,
            samples: vk::SampleCountFlags::TYPE_1,
        }
    }
}

// new & init & builder
impl RgImageDesc {
    #[inline]
    pub fn new_2d(width: u32, height: u32, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            width,
            height,
            format,
            usage,
            ..Default::default()
        }
    }

    #[inline]
    pub fn with_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage = usage;
        self
    }

    #[inline]
    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    /// 使用完整 mip 链，常用于 depth pyramid
    #[inline]
    pub fn with_full_mip_chain(mut self) -> Self {
        self.mip_levels = GfxImageDesc::full_mip_count(vk::Extent3D {
            width: self.width,
            height: self.height,
            depth: self.depth,
        });
        self
    }

    pub fn to_gfx_desc(&self) -> GfxImageDesc {
        GfxImageDesc {
            extent: vk::Extent3D {
                width: self.width,
                height: self.height,
                depth: self.depth,
            },
            mip_levels: self.mip_levels,
            array_layers: 1,
            format: self.format,
            usage: self.usage,
            samples: self.samples,
            image_type: if self.depth > 1 { vk::ImageType::TYPE_3D } else { vk::ImageType::TYPE_2D },
        }
    }
}

/// 图像资源的来源
#[derive(Clone, Debug)]
pub enum RgImageSource {
    /// 调用方持有的图像，graph 只在本次执行期间借用
    Imported {
        image: Arc<GfxImage>,
        initial_state: RgImageState,
    },
    /// 由 RenderGraph 创建的临时图像，物理内存来自 transient pool
    Transient,
}

/// 图像资源条目
#[derive(Clone, Debug)]
pub struct RgImageResource {
    pub name: String,
    /// 创建后不再改变
    pub desc: GfxImageDesc,
    pub source: RgImageSource,
    /// 执行完成后需要转换到的状态，仅导入资源可以设置
    pub export_state: Option<RgImageState>,
}

// new & init
impl RgImageResource {
    pub fn imported(name: impl Into<String>, image: Arc<GfxImage>, initial_state: RgImageState) -> Self {
        Self {
            name: name.into(),
            desc: *image.desc(),
            source: RgImageSource::Imported { image, initial_state },
            export_state: None,
        }
    }

    pub fn transient(name: impl Into<String>, desc: &RgImageDesc) -> Self {
        assert!(desc.width > 0 && desc.height > 0 && desc.depth > 0, "image extent must not be zero");
        assert!(desc.mip_levels > 0, "image must have at least one mip");
        let name = name.into();
        let gfx_desc = desc.to_gfx_desc();
        let max_mips = GfxImageDesc::full_mip_count(gfx_desc.extent);
        assert!(
            desc.mip_levels <= max_mips,
            "image \"{}\" asks for {} mips, but a {}x{}x{} image has at most {}",
            name,
            desc.mip_levels,
            desc.width,
            desc.height,
            desc.depth,
            max_mips
        );
        Self {
            name,
            desc: gfx_desc,
            source: RgImageSource::Transient,
            export_state: None,
        }
    }
}

// getters
impl RgImageResource {
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self.source, RgImageSource::Transient)
    }

    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.desc.aspect()
    }

    /// 导入资源对应的物理 image
    #[inline]
    pub fn imported_image(&self) -> Option<&Arc<GfxImage>> {
        match &self.source {
            RgImageSource::Imported { image, .. } => Some(image),
            RgImageSource::Transient => None,
        }
    }
}
