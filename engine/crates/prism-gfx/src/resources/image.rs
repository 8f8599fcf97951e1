use ash::vk;

use crate::basic::format::GfxFormatUtils;
use crate::resources::handles::GfxImageHandle;

/// 创建 image 所需的描述
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxImageDesc {
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub samples: vk::SampleCountFlags,
    pub image_type: vk::ImageType,
}

impl Default for GfxImageDesc {
    fn default() -> Self {
        Self {
            extent: vk::Extent3D {
                width: 1,
                height: 1,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            format: vk::Format::R8G8B8A8_UNORM,
            usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE,
            samples: vk::SampleCountFlags::TYPE_1,
            image_type: vk::ImageType::TYPE_2D,
        }
    }
}

// new & builder
impl GfxImageDesc {
    #[inline]
    pub fn new_2d(width: u32, height: u32, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            extent: vk::Extent3D { width, height, depth: 1 },
            format,
            usage,
            ..Default::default()
        }
    }

    #[inline]
    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    #[inline]
    pub fn with_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage = usage;
        self
    }

    /// 使用完整 mip 链
    #[inline]
    pub fn with_full_mip_chain(mut self) -> Self {
        self.mip_levels = Self::full_mip_count(self.extent);
        self
    }
}

// tools
impl GfxImageDesc {
    /// 指定 mip 的尺寸：base >> mip，最小为 1
    #[inline]
    pub fn mip_extent(&self, mip: u32) -> vk::Extent3D {
        let shrink = |size: u32| size.checked_shr(mip).unwrap_or(0).max(1);
        vk::Extent3D {
            width: shrink(self.extent.width),
            height: shrink(self.extent.height),
            depth: shrink(self.extent.depth),
        }
    }

    /// 尺寸对应的完整 mip 数量
    pub fn full_mip_count(extent: vk::Extent3D) -> u32 {
        let max_dim = extent.width.max(extent.height).max(extent.depth).max(1);
        32 - max_dim.leading_zeros()
    }

    /// 估算占用的显存大小（所有 mip + layer）
    pub fn estimated_size_in_bytes(&self) -> u64 {
        let texel = GfxFormatUtils::texel_size_in_bytes(self.format);
        let samples = self.samples.as_raw().max(1) as u64;
        (0..self.mip_levels)
            .map(|mip| {
                let e = self.mip_extent(mip);
                e.width as u64 * e.height as u64 * e.depth as u64 * texel
            })
            .sum::<u64>()
            * self.array_layers as u64
            * samples
    }

    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        GfxFormatUtils::infer_aspect(self.format)
    }
}

/// 物理 image
///
/// 由 `GfxResourceFactory` 创建，通过 `Arc` 在渲染图与调用方之间共享。
/// 元数据在创建后不可变。
#[derive(Debug)]
pub struct GfxImage {
    handle: GfxImageHandle,
    desc: GfxImageDesc,
    name: String,
}
// new & init
impl GfxImage {
    pub fn new(handle: GfxImageHandle, desc: GfxImageDesc, name: impl Into<String>) -> Self {
        Self {
            handle,
            desc,
            name: name.into(),
        }
    }
}
// getters
impl GfxImage {
    #[inline]
    pub fn handle(&self) -> GfxImageHandle {
        self.handle
    }

    #[inline]
    pub fn desc(&self) -> &GfxImageDesc {
        &self.desc
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent3D {
        self.desc.extent
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}
