use ash::vk;

/// Vulkan 格式相关的工具类
pub struct GfxFormatUtils;
impl GfxFormatUtils {
    /// 计算指定格式下每个 texel 的字节数
    ///
    /// 只用于估算 transient heap 的大小。未列出的格式按 16 字节保守估计。
    pub fn texel_size_in_bytes(format: vk::Format) -> u64 {
        match format {
            vk::Format::R8_UNORM | vk::Format::R8_SNORM | vk::Format::R8_UINT | vk::Format::S8_UINT => 1,

            vk::Format::R8G8_UNORM
            | vk::Format::R16_SFLOAT
            | vk::Format::R16_UNORM
            | vk::Format::R16_UINT
            | vk::Format::D16_UNORM => 2,

            vk::Format::D16_UNORM_S8_UINT => 3,

            vk::Format::R8G8B8A8_UNORM
            | vk::Format::R8G8B8A8_SRGB
            | vk::Format::B8G8R8A8_UNORM
            | vk::Format::B8G8R8A8_SRGB
            | vk::Format::A2B10G10R10_UNORM_PACK32
            | vk::Format::B10G11R11_UFLOAT_PACK32
            | vk::Format::E5B9G9R9_UFLOAT_PACK32
            | vk::Format::R16G16_SFLOAT
            | vk::Format::R16G16_UNORM
            | vk::Format::R32_SFLOAT
            | vk::Format::R32_UINT
            | vk::Format::R32_SINT
            | vk::Format::D32_SFLOAT
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D24_UNORM_S8_UINT => 4,

            vk::Format::D32_SFLOAT_S8_UINT => 5,

            vk::Format::R16G16B16A16_SFLOAT
            | vk::Format::R16G16B16A16_UNORM
            | vk::Format::R32G32_SFLOAT
            | vk::Format::R32G32_UINT => 8,

            vk::Format::R32G32B32_SFLOAT => 12,

            vk::Format::R32G32B32A32_SFLOAT | vk::Format::R32G32B32A32_UINT => 16,

            _ => 16,
        }
    }

    /// 从格式推断 aspect
    pub fn infer_aspect(format: vk::Format) -> vk::ImageAspectFlags {
        match format {
            vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
                vk::ImageAspectFlags::DEPTH
            }
            vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
            vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            }
            _ => vk::ImageAspectFlags::COLOR,
        }
    }

    #[inline]
    pub fn is_depth_stencil(format: vk::Format) -> bool {
        !Self::infer_aspect(format).contains(vk::ImageAspectFlags::COLOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texel_size() {
        assert_eq!(GfxFormatUtils::texel_size_in_bytes(vk::Format::R8G8B8A8_UNORM), 4);
        assert_eq!(GfxFormatUtils::texel_size_in_bytes(vk::Format::R16G16B16A16_SFLOAT), 8);
        assert_eq!(GfxFormatUtils::texel_size_in_bytes(vk::Format::R32G32B32A32_SFLOAT), 16);
    }

    #[test]
    fn test_depth_aspect() {
        assert_eq!(GfxFormatUtils::infer_aspect(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert!(GfxFormatUtils::is_depth_stencil(vk::Format::D24_UNORM_S8_UINT));
        assert!(!GfxFormatUtils::is_depth_stencil(vk::Format::R8G8B8A8_SRGB));
    }
}
