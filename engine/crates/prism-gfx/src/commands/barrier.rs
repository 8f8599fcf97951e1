use ash::vk;

use crate::resources::handles::{GfxBufferHandle, GfxImageHandle};

/// barrier 使用的 src 和 dst 访问 mask
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxBarrierMask {
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_access: vk::AccessFlags2,
}

/// 便捷创建 image memory barrier 的结构体
///
/// 物理 `vk::Image` 由后端在录制时通过 `GfxImageHandle` 解析，
/// 因此这里只保存句柄，`to_vk` 时再填入。
#[derive(Clone, Copy, Debug)]
pub struct GfxImageBarrier {
    image: GfxImageHandle,
    inner: vk::ImageMemoryBarrier2<'static>,
}

impl Default for GfxImageBarrier {
    fn default() -> Self {
        Self {
            image: GfxImageHandle::default(),
            inner: vk::ImageMemoryBarrier2 {
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::UNDEFINED,
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::empty(),
                    base_array_layer: 0,
                    layer_count: vk::REMAINING_ARRAY_LAYERS,
                    base_mip_level: 0,
                    level_count: 1,
                },
                ..Default::default()
            },
        }
    }
}

// builder
impl GfxImageBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn image(mut self, image: GfxImageHandle) -> Self {
        self.image = image;
        self
    }

    #[inline]
    pub fn layout_transfer(mut self, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        self.inner.old_layout = old_layout;
        self.inner.new_layout = new_layout;
        self
    }

    #[inline]
    pub fn src_mask(mut self, src_stage_mask: vk::PipelineStageFlags2, src_access_mask: vk::AccessFlags2) -> Self {
        self.inner.src_stage_mask = src_stage_mask;
        self.inner.src_access_mask = src_access_mask;
        self
    }

    #[inline]
    pub fn dst_mask(mut self, dst_stage_mask: vk::PipelineStageFlags2, dst_access_mask: vk::AccessFlags2) -> Self {
        self.inner.dst_stage_mask = dst_stage_mask;
        self.inner.dst_access_mask = dst_access_mask;
        self
    }

    #[inline]
    pub fn image_aspect_flag(mut self, aspect_mask: vk::ImageAspectFlags) -> Self {
        self.inner.subresource_range.aspect_mask = aspect_mask;
        self
    }

    /// 只作用于 `[base_mip, base_mip + mip_count)`，array layer 覆盖全部
    #[inline]
    pub fn mip_range(mut self, base_mip: u32, mip_count: u32) -> Self {
        self.inner.subresource_range.base_mip_level = base_mip;
        self.inner.subresource_range.level_count = mip_count;
        self
    }
}
// getters
impl GfxImageBarrier {
    #[inline]
    pub fn image_handle(&self) -> GfxImageHandle {
        self.image
    }

    #[inline]
    pub fn old_layout(&self) -> vk::ImageLayout {
        self.inner.old_layout
    }

    #[inline]
    pub fn new_layout(&self) -> vk::ImageLayout {
        self.inner.new_layout
    }

    #[inline]
    pub fn mask(&self) -> GfxBarrierMask {
        GfxBarrierMask {
            src_stage: self.inner.src_stage_mask,
            dst_stage: self.inner.dst_stage_mask,
            src_access: self.inner.src_access_mask,
            dst_access: self.inner.dst_access_mask,
        }
    }

    #[inline]
    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        self.inner.subresource_range
    }

    /// 填入物理 image，得到可以直接提交给 `vkCmdPipelineBarrier2` 的结构
    #[inline]
    pub fn to_vk(&self, image: vk::Image) -> vk::ImageMemoryBarrier2<'static> {
        let mut inner = self.inner;
        inner.image = image;
        inner
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GfxBufferBarrier {
    buffer: GfxBufferHandle,
    inner: vk::BufferMemoryBarrier2<'static>,
}

impl Default for GfxBufferBarrier {
    fn default() -> Self {
        Self {
            buffer: GfxBufferHandle::default(),
            inner: vk::BufferMemoryBarrier2 {
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                size: vk::WHOLE_SIZE,
                ..Default::default()
            },
        }
    }
}

// builder
impl GfxBufferBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn src_mask(mut self, src_stage_mask: vk::PipelineStageFlags2, src_access_mask: vk::AccessFlags2) -> Self {
        self.inner.src_stage_mask = src_stage_mask;
        self.inner.src_access_mask = src_access_mask;
        self
    }

    #[inline]
    pub fn dst_mask(mut self, dst_stage_mask: vk::PipelineStageFlags2, dst_access_mask: vk::AccessFlags2) -> Self {
        self.inner.dst_stage_mask = dst_stage_mask;
        self.inner.dst_access_mask = dst_access_mask;
        self
    }

    #[inline]
    pub fn mask(mut self, mask: GfxBarrierMask) -> Self {
        self.inner.src_stage_mask = mask.src_stage;
        self.inner.dst_stage_mask = mask.dst_stage;
        self.inner.src_access_mask = mask.src_access;
        self.inner.dst_access_mask = mask.dst_access;
        self
    }

    #[inline]
    pub fn buffer(mut self, buffer: GfxBufferHandle, offset: vk::DeviceSize, size: vk::DeviceSize) -> Self {
        self.buffer = buffer;
        self.inner.offset = offset;
        self.inner.size = size;
        self
    }
}
// getters
impl GfxBufferBarrier {
    #[inline]
    pub fn buffer_handle(&self) -> GfxBufferHandle {
        self.buffer
    }

    #[inline]
    pub fn offset(&self) -> vk::DeviceSize {
        self.inner.offset
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.inner.size
    }

    #[inline]
    pub fn mask_info(&self) -> GfxBarrierMask {
        GfxBarrierMask {
            src_stage: self.inner.src_stage_mask,
            dst_stage: self.inner.dst_stage_mask,
            src_access: self.inner.src_access_mask,
            dst_access: self.inner.dst_access_mask,
        }
    }

    #[inline]
    pub fn to_vk(&self, buffer: vk::Buffer) -> vk::BufferMemoryBarrier2<'static> {
        let mut inner = self.inner;
        inner.buffer = buffer;
        inner
    }
}
