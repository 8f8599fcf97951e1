//! Barrier 描述
//!
//! 调度阶段生成的 barrier 只引用 graph 内的虚拟句柄，
//! 录制前再通过物理资源表转换为 `GfxImageBarrier` / `GfxBufferBarrier`。

use ash::vk;
use prism_gfx::commands::barrier::{GfxBufferBarrier, GfxImageBarrier};
use prism_gfx::resources::handles::{GfxBufferHandle, GfxImageHandle};

use crate::render_graph::resource_handle::{RgBufferHandle, RgImageHandle};
use crate::render_graph::resource_state::{RgBufferState, RgImageState};

/// 图像 Barrier 描述
///
/// `src` 的 layout 是旧 layout，`dst` 的 layout 是新 layout。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgImageBarrierDesc {
    pub image: RgImageHandle,
    pub base_mip: u32,
    pub mip_count: u32,
    pub src: RgImageState,
    pub dst: RgImageState,
    /// COLOR / DEPTH / STENCIL
    pub aspect: vk::ImageAspectFlags,
}

impl RgImageBarrierDesc {
    #[inline]
    pub fn is_layout_transition(&self) -> bool {
        self.src.layout != self.dst.layout
    }

    /// 转换为 GfxImageBarrier，需要提供物理 image
    pub fn to_gfx_barrier(&self, image: GfxImageHandle) -> GfxImageBarrier {
        GfxImageBarrier::new()
            .image(image)
            .layout_transfer(self.src.layout, self.dst.layout)
            .src_mask(self.src.stage, self.src.access)
            .dst_mask(self.dst.stage, self.dst.access)
            .image_aspect_flag(self.aspect)
            .mip_range(self.base_mip, self.mip_count)
    }

    /// 两个 barrier 作用于同一 image 的相邻 mip 且转换完全一致
    fn can_merge(&self, next: &Self) -> bool {
        self.image == next.image
            && self.src == next.src
            && self.dst == next.dst
            && self.aspect == next.aspect
            && self.base_mip + self.mip_count == next.base_mip
    }
}

/// 缓冲区 Barrier 描述
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgBufferBarrierDesc {
    pub buffer: RgBufferHandle,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
    pub src: RgBufferState,
    pub dst: RgBufferState,
}

impl RgBufferBarrierDesc {
    pub fn to_gfx_barrier(&self, buffer: GfxBufferHandle) -> GfxBufferBarrier {
        GfxBufferBarrier::new()
            .buffer(buffer, self.offset, self.size)
            .src_mask(self.src.stage, self.src.access)
            .dst_mask(self.dst.stage, self.dst.access)
    }

    fn can_merge(&self, next: &Self) -> bool {
        self.buffer == next.buffer && self.src == next.src && self.dst == next.dst && self.offset + self.size == next.offset
    }
}

/// 一个节点执行前需要的 Barrier 集合
#[derive(Clone, Debug, Default)]
pub struct RgPassBarriers {
    pub image_barriers: Vec<RgImageBarrierDesc>,
    pub buffer_barriers: Vec<RgBufferBarrierDesc>,
}

impl RgPassBarriers {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加图像 barrier，与上一条相邻 mip 的相同转换合并
    pub fn push_image(&mut self, barrier: RgImageBarrierDesc) {
        if let Some(last) = self.image_barriers.last_mut() {
            if last.can_merge(&barrier) {
                last.mip_count += barrier.mip_count;
                return;
            }
        }
        self.image_barriers.push(barrier);
    }

    /// 添加缓冲区 barrier，与上一条连续区间的相同转换合并
    pub fn push_buffer(&mut self, barrier: RgBufferBarrierDesc) {
        if let Some(last) = self.buffer_barriers.last_mut() {
            if last.can_merge(&barrier) {
                last.size += barrier.size;
                return;
            }
        }
        self.buffer_barriers.push(barrier);
    }

    #[inline]
    pub fn has_barriers(&self) -> bool {
        !self.image_barriers.is_empty() || !self.buffer_barriers.is_empty()
    }

    #[inline]
    pub fn image_barrier_count(&self) -> usize {
        self.image_barriers.len()
    }

    #[inline]
    pub fn buffer_barrier_count(&self) -> usize {
        self.buffer_barriers.len()
    }

    /// 追加另一组 barrier
    pub fn extend(&mut self, other: &RgPassBarriers) {
        other.image_barriers.iter().for_each(|b| self.push_image(*b));
        other.buffer_barriers.iter().for_each(|b| self.push_buffer(*b));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_graph::resource_handle::{RgBufferKey, RgImageKey};

    fn image_barrier(base_mip: u32, src: RgImageState, dst: RgImageState) -> RgImageBarrierDesc {
        RgImageBarrierDesc {
            image: RgImageHandle::new(RgImageKey::default(), 0, 1),
            base_mip,
            mip_count: 1,
            src,
            dst,
            aspect: vk::ImageAspectFlags::COLOR,
        }
    }

    #[test]
    fn test_adjacent_mips_merge() {
        let mut barriers = RgPassBarriers::new();
        barriers.push_image(image_barrier(0, RgImageState::STORAGE_WRITE_COMPUTE, RgImageState::SHADER_READ_COMPUTE));
        barriers.push_image(image_barrier(1, RgImageState::STORAGE_WRITE_COMPUTE, RgImageState::SHADER_READ_COMPUTE));
        // 转换不同，不能合并
        barriers.push_image(image_barrier(2, RgImageState::UNDEFINED, RgImageState::SHADER_READ_COMPUTE));

        assert_eq!(barriers.image_barrier_count(), 2);
        assert_eq!(barriers.image_barriers[0].mip_count, 2);
        assert!(barriers.image_barriers[0].is_layout_transition());
    }

    #[test]
    fn test_contiguous_buffer_ranges_merge() {
        let buffer = RgBufferHandle::new(RgBufferKey::default(), 0, 1);
        let mut barriers = RgPassBarriers::new();
        for offset in [0, 64] {
            barriers.push_buffer(RgBufferBarrierDesc {
                buffer,
                offset,
                size: 64,
                src: RgBufferState::STORAGE_WRITE_COMPUTE,
                dst: RgBufferState::INDIRECT_BUFFER,
            });
        }
        barriers.push_buffer(RgBufferBarrierDesc {
            buffer,
            offset: 256,
            size: 64,
            src: RgBufferState::STORAGE_WRITE_COMPUTE,
            dst: RgBufferState::INDIRECT_BUFFER,
        });

        assert_eq!(barriers.buffer_barrier_count(), 2);
        assert_eq!(barriers.buffer_barriers[0].size, 128);
    }

    #[test]
    fn test_to_gfx_barrier_keeps_mip_range() {
        let mut desc = image_barrier(3, RgImageState::STORAGE_WRITE_COMPUTE, RgImageState::SHADER_READ_COMPUTE);
        desc.mip_count = 2;
        let gfx = desc.to_gfx_barrier(GfxImageHandle::default());
        assert_eq!(gfx.subresource_range().base_mip_level, 3);
        assert_eq!(gfx.subresource_range().level_count, 2);
        assert_eq!(gfx.new_layout(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(gfx.mask().src_access, vk::AccessFlags2::SHADER_STORAGE_WRITE);
    }
}
