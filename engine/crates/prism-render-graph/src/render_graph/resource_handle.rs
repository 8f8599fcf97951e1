//! RenderGraph 资源句柄定义
//!
//! 这些句柄是 graph 内部的虚拟引用，与 `GfxResourceFactory` 的物理句柄分离。
//! 句柄持有资源表的 slotmap key 与注册顺序，并记录产生它的 graph，跨 graph 使用会在查询时被断言拦下。

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use ash::vk;
use slotmap::new_key_type;

new_key_type! {
    /// `RgResourceRegistry` 中图像表的 key
    pub struct RgImageKey;
    /// `RgResourceRegistry` 中缓冲区表的 key
    pub struct RgBufferKey;
}

static NEXT_GRAPH_ID: AtomicU32 = AtomicU32::new(1);

/// 每个 `RenderGraphBuilder` 拥有一个进程内唯一的 id
pub(crate) fn next_graph_id() -> u32 {
    NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed)
}

/// Graph 内部的 Image 句柄
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RgImageHandle {
    pub(crate) key: RgImageKey,
    /// 注册顺序，每帧的跟踪表与 transient 分配用它做下标
    pub(crate) id: u32,
    /// 所属 graph
    pub(crate) graph: u32,
}

impl RgImageHandle {
    #[inline]
    pub(crate) fn new(key: RgImageKey, id: u32, graph: u32) -> Self {
        Self { key, id, graph }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// 覆盖全部 mip 的 view
    #[inline]
    pub fn full(self) -> RgImageView {
        RgImageView {
            image: self,
            mips: RgMipRange::ALL,
        }
    }

    /// 只覆盖单个 mip 的 view，不做范围检查；需要检查时使用 `RenderGraphBuilder::create_mip_view`
    #[inline]
    pub fn mip(self, mip: u32) -> RgImageView {
        RgImageView {
            image: self,
            mips: RgMipRange::single(mip),
        }
    }
}

impl fmt::Debug for RgImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RgImage({}@g{})", self.id, self.graph)
    }
}

/// Graph 内部的 Buffer 句柄
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RgBufferHandle {
    pub(crate) key: RgBufferKey,
    pub(crate) id: u32,
    pub(crate) graph: u32,
}

impl RgBufferHandle {
    #[inline]
    pub(crate) fn new(key: RgBufferKey, id: u32, graph: u32) -> Self {
        Self { key, id, graph }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn full(self) -> RgBufferView {
        RgBufferView {
            buffer: self,
            range: RgByteRange::WHOLE,
        }
    }

    #[inline]
    pub fn range(self, offset: vk::DeviceSize, size: vk::DeviceSize) -> RgBufferView {
        RgBufferView {
            buffer: self,
            range: RgByteRange { offset, size },
        }
    }
}

impl fmt::Debug for RgBufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RgBuffer({}@g{})", self.id, self.graph)
    }
}

/// mip 范围，`count == REMAINING` 表示直到最后一个 mip
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RgMipRange {
    pub base: u32,
    pub count: u32,
}

impl RgMipRange {
    pub const REMAINING: u32 = u32::MAX;
    pub const ALL: Self = Self {
        base: 0,
        count: Self::REMAINING,
    };

    #[inline]
    pub const fn new(base: u32, count: u32) -> Self {
        Self { base, count }
    }

    #[inline]
    pub const fn single(mip: u32) -> Self {
        Self { base: mip, count: 1 }
    }

    /// 解析为 `[base, base + count)`，越界时返回 `None`
    pub fn resolve(self, mip_levels: u32) -> Option<(u32, u32)> {
        if self.base >= mip_levels {
            return None;
        }
        let count = if self.count == Self::REMAINING { mip_levels - self.base } else { self.count };
        if count == 0 || self.base.checked_add(count)? > mip_levels {
            return None;
        }
        Some((self.base, count))
    }
}

/// 字节范围，`size == WHOLE_SIZE` 表示直到 buffer 末尾
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RgByteRange {
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

impl RgByteRange {
    pub const WHOLE: Self = Self {
        offset: 0,
        size: vk::WHOLE_SIZE,
    };

    /// 解析为 `(offset, size)`，越界时返回 `None`
    pub fn resolve(self, buffer_size: vk::DeviceSize) -> Option<(vk::DeviceSize, vk::DeviceSize)> {
        if self.offset >= buffer_size {
            return None;
        }
        let size = if self.size == vk::WHOLE_SIZE { buffer_size - self.offset } else { self.size };
        if size == 0 || self.offset.checked_add(size)? > buffer_size {
            return None;
        }
        Some((self.offset, size))
    }
}

/// image + mip 范围
///
/// 多个 view 可以指向同一个 image，mip 范围重叠的访问会被视为 hazard。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RgImageView {
    pub image: RgImageHandle,
    pub mips: RgMipRange,
}

impl From<RgImageHandle> for RgImageView {
    #[inline]
    fn from(handle: RgImageHandle) -> Self {
        handle.full()
    }
}

/// buffer + 字节范围
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RgBufferView {
    pub buffer: RgBufferHandle,
    pub range: RgByteRange,
}

impl From<RgBufferHandle> for RgBufferView {
    #[inline]
    fn from(handle: RgBufferHandle) -> Self {
        handle.full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_range_resolve() {
        assert_eq!(RgMipRange::ALL.resolve(9), Some((0, 9)));
        assert_eq!(RgMipRange::single(3).resolve(9), Some((3, 1)));
        assert_eq!(RgMipRange::new(2, RgMipRange::REMAINING).resolve(4), Some((2, 2)));
        assert_eq!(RgMipRange::single(9).resolve(9), None);
        assert_eq!(RgMipRange::new(8, 2).resolve(9), None);
        assert_eq!(RgMipRange::new(0, 0).resolve(9), None);
    }

    #[test]
    fn test_byte_range_resolve() {
        assert_eq!(RgByteRange::WHOLE.resolve(256), Some((0, 256)));
        assert_eq!(RgByteRange { offset: 64, size: vk::WHOLE_SIZE }.resolve(256), Some((64, 192)));
        assert_eq!(RgByteRange { offset: 64, size: 256 }.resolve(256), None);
        assert_eq!(RgByteRange { offset: 256, size: 1 }.resolve(256), None);
    }

    #[test]
    fn test_handle_debug() {
        let handle = RgImageHandle::new(RgImageKey::default(), 3, 7);
        assert_eq!(format!("{:?}", handle), "RgImage(3@g7)");
        assert_eq!(RgImageView::from(handle), handle.full());
    }
}
