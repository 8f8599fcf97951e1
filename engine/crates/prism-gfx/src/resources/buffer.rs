use ash::vk;

use crate::resources::handles::GfxBufferHandle;

/// 创建 buffer 所需的描述
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxBufferDesc {
    /// 缓冲区大小（字节）
    pub size: vk::DeviceSize,
    /// 缓冲区用途
    pub usage: vk::BufferUsageFlags,
}

impl Default for GfxBufferDesc {
    fn default() -> Self {
        Self {
            size: 0,
            usage: vk::BufferUsageFlags::STORAGE_BUFFER,
        }
    }
}

impl GfxBufferDesc {
    #[inline]
    pub fn new(size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Self {
        Self { size, usage }
    }
}

/// 物理 buffer
#[derive(Debug)]
pub struct GfxBuffer {
    handle: GfxBufferHandle,
    desc: GfxBufferDesc,
    name: String,
}
impl GfxBuffer {
    pub fn new(handle: GfxBufferHandle, desc: GfxBufferDesc, name: impl Into<String>) -> Self {
        Self {
            handle,
            desc,
            name: name.into(),
        }
    }

    #[inline]
    pub fn handle(&self) -> GfxBufferHandle {
        self.handle
    }

    #[inline]
    pub fn desc(&self) -> &GfxBufferDesc {
        &self.desc
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.desc.size
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}
