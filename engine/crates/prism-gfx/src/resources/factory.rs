use std::sync::Arc;

use ash::vk;

use crate::resources::buffer::{GfxBuffer, GfxBufferDesc};
use crate::resources::handles::{GfxBufferHandle, GfxDescriptorSetHandle, GfxHeapHandle, GfxImageHandle};
use crate::resources::image::{GfxImage, GfxImageDesc};
use crate::resources::sampler::{GfxSampler, GfxSamplerDesc};

/// 资源的内存位置
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GfxMemoryUsage {
    /// 独立分配，仅 GPU 可见
    GpuOnly,
    /// CPU 写，GPU 读（上传）
    CpuToGpu,
    /// GPU 写，CPU 读（回读）
    GpuToCpu,
    /// 放置在已有 heap 的指定偏移处，多个资源可以共享同一段内存
    Placed {
        heap: GfxHeapHandle,
        offset: vk::DeviceSize,
    },
}

/// 资源对内存的需求
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxMemoryRequirements {
    pub size: vk::DeviceSize,
    pub alignment: vk::DeviceSize,
}

/// GPU 资源工厂
///
/// 渲染图通过它为 transient 资源申请物理内存。分配失败通过 `anyhow::Error` 返回，
/// 渲染图不做重试或降级。
pub trait GfxResourceFactory {
    fn create_image(
        &mut self,
        name: &str,
        desc: &GfxImageDesc,
        memory: GfxMemoryUsage,
    ) -> anyhow::Result<Arc<GfxImage>>;

    fn create_buffer(
        &mut self,
        name: &str,
        desc: &GfxBufferDesc,
        memory: GfxMemoryUsage,
    ) -> anyhow::Result<Arc<GfxBuffer>>;

    fn create_sampler(&mut self, name: &str, desc: &GfxSamplerDesc) -> anyhow::Result<Arc<GfxSampler>>;

    /// 创建一块用于放置资源的 heap
    fn create_heap(&mut self, name: &str, size: vk::DeviceSize) -> anyhow::Result<GfxHeapHandle>;

    /// 分配一个 GPU 侧 descriptor set
    fn create_descriptor_set(&mut self, name: &str, binding_count: u32) -> anyhow::Result<GfxDescriptorSetHandle>;

    fn destroy_image(&mut self, image: GfxImageHandle);
    fn destroy_buffer(&mut self, buffer: GfxBufferHandle);
    fn destroy_heap(&mut self, heap: GfxHeapHandle);
    fn destroy_descriptor_set(&mut self, set: GfxDescriptorSetHandle);

    /// 查询 image 的内存需求
    ///
    /// 默认实现按格式估算，真实后端应当询问驱动。
    fn image_memory_requirements(&self, desc: &GfxImageDesc) -> GfxMemoryRequirements {
        GfxMemoryRequirements {
            size: desc.estimated_size_in_bytes(),
            alignment: 64 * 1024,
        }
    }

    fn buffer_memory_requirements(&self, desc: &GfxBufferDesc) -> GfxMemoryRequirements {
        GfxMemoryRequirements {
            size: desc.size,
            alignment: 256,
        }
    }
}
