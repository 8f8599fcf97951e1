//! 不依赖驱动的 GFX 实现
//!
//! `HeadlessDevice` 实现资源工厂与 pipeline 编译器，只分配句柄、做边界检查；
//! `HeadlessCommandBuffer` 把每一条命令记录为 [`GfxRecordedCommand`]，便于离线检查。

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, bail};
use ash::vk;
use slotmap::SlotMap;

use crate::commands::barrier::{GfxBufferBarrier, GfxImageBarrier};
use crate::commands::recorder::{
    GfxClearValue, GfxCommandRecorder, GfxDescriptorWrite, GfxImageBlit, GfxImageCopy, GfxRenderingInfo,
};
use crate::pipelines::shader::{GfxGraphicsPipelineDesc, GfxPipelineCompiler, GfxShaderCompileSettings, GfxShaderStageDesc};
use crate::resources::buffer::{GfxBuffer, GfxBufferDesc};
use crate::resources::factory::{GfxMemoryUsage, GfxResourceFactory};
use crate::resources::handles::{
    GfxBufferHandle, GfxDescriptorSetHandle, GfxHeapHandle, GfxImageHandle, GfxPipelineId, GfxSamplerHandle,
    GfxShaderId,
};
use crate::resources::image::{GfxImage, GfxImageDesc};
use crate::resources::sampler::{GfxSampler, GfxSamplerDesc};

struct HeadlessHeap {
    name: String,
    size: vk::DeviceSize,
}

struct HeadlessImage {
    name: String,
    size: vk::DeviceSize,
    memory: GfxMemoryUsage,
}

struct HeadlessBuffer {
    name: String,
    size: vk::DeviceSize,
    memory: GfxMemoryUsage,
}

/// 编译过的 shader 记录
#[derive(Clone, Debug)]
pub struct HeadlessShader {
    pub path: String,
    pub stage: GfxShaderStageDesc,
    pub permutation_key: String,
}

/// headless 资源工厂 + pipeline 编译器
#[derive(Default)]
pub struct HeadlessDevice {
    heaps: SlotMap<GfxHeapHandle, HeadlessHeap>,
    images: SlotMap<GfxImageHandle, HeadlessImage>,
    buffers: SlotMap<GfxBufferHandle, HeadlessBuffer>,
    samplers: SlotMap<GfxSamplerHandle, GfxSamplerDesc>,
    descriptor_sets: SlotMap<GfxDescriptorSetHandle, u32>,
    shaders: SlotMap<GfxShaderId, HeadlessShader>,
    pipelines: SlotMap<GfxPipelineId, String>,

    /// 独立分配与 heap 的总字节数上限，`None` 表示不限制
    memory_budget: Option<vk::DeviceSize>,
    allocated_bytes: vk::DeviceSize,

    /// 每个 shader 路径被编译的次数
    compile_counts: HashMap<String, usize>,
}

// new & init
impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// 限制可分配的显存总量，超出时创建资源返回错误
    pub fn with_memory_budget(mut self, budget: vk::DeviceSize) -> Self {
        self.memory_budget = Some(budget);
        self
    }
}

// getters
impl HeadlessDevice {
    #[inline]
    pub fn live_image_count(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    #[inline]
    pub fn live_heap_count(&self) -> usize {
        self.heaps.len()
    }

    #[inline]
    pub fn live_pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    #[inline]
    pub fn allocated_bytes(&self) -> vk::DeviceSize {
        self.allocated_bytes
    }

    pub fn heap_size(&self, heap: GfxHeapHandle) -> Option<vk::DeviceSize> {
        self.heaps.get(heap).map(|h| h.size)
    }

    /// image 放置在 heap 中的位置；独立分配的 image 返回 `None`
    pub fn image_placement(&self, image: GfxImageHandle) -> Option<(GfxHeapHandle, vk::DeviceSize)> {
        match self.images.get(image)?.memory {
            GfxMemoryUsage::Placed { heap, offset } => Some((heap, offset)),
            _ => None,
        }
    }

    pub fn buffer_placement(&self, buffer: GfxBufferHandle) -> Option<(GfxHeapHandle, vk::DeviceSize)> {
        match self.buffers.get(buffer)?.memory {
            GfxMemoryUsage::Placed { heap, offset } => Some((heap, offset)),
            _ => None,
        }
    }

    pub fn image_name(&self, image: GfxImageHandle) -> Option<&str> {
        self.images.get(image).map(|i| i.name.as_str())
    }

    pub fn buffer_name(&self, buffer: GfxBufferHandle) -> Option<&str> {
        self.buffers.get(buffer).map(|b| b.name.as_str())
    }

    pub fn shader(&self, shader: GfxShaderId) -> Option<&HeadlessShader> {
        self.shaders.get(shader)
    }

    pub fn compile_count(&self, path: &str) -> usize {
        self.compile_counts.get(path).copied().unwrap_or(0)
    }

    #[inline]
    pub fn live_descriptor_set_count(&self) -> usize {
        self.descriptor_sets.len()
    }

    pub fn descriptor_set_binding_count(&self, set: GfxDescriptorSetHandle) -> Option<u32> {
        self.descriptor_sets.get(set).copied()
    }
}

// tools
impl HeadlessDevice {
    fn reserve_bytes(&mut self, name: &str, size: vk::DeviceSize) -> anyhow::Result<()> {
        let total = self.allocated_bytes + size;
        if let Some(budget) = self.memory_budget {
            if total > budget {
                bail!("out of device memory when allocating {name}: {total} bytes requested, budget {budget}");
            }
        }
        self.allocated_bytes = total;
        Ok(())
    }

    fn check_placement(
        &self,
        name: &str,
        heap: GfxHeapHandle,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> anyhow::Result<()> {
        let heap_info = self.heaps.get(heap).with_context(|| format!("{name} placed in a destroyed heap"))?;
        if offset + size > heap_info.size {
            bail!(
                "{name} [{offset}, {}) is out of heap {} (size {})",
                offset + size,
                heap_info.name,
                heap_info.size
            );
        }
        Ok(())
    }
}

impl GfxResourceFactory for HeadlessDevice {
    fn create_image(
        &mut self,
        name: &str,
        desc: &GfxImageDesc,
        memory: GfxMemoryUsage,
    ) -> anyhow::Result<Arc<GfxImage>> {
        let size = self.image_memory_requirements(desc).size;
        match memory {
            GfxMemoryUsage::Placed { heap, offset } => self.check_placement(name, heap, offset, size)?,
            _ => self.reserve_bytes(name, size)?,
        }

        let handle = self.images.insert(HeadlessImage {
            name: name.to_string(),
            size,
            memory,
        });
        log::trace!("headless: create image {name} {:?} {:?}", handle, memory);
        Ok(Arc::new(GfxImage::new(handle, *desc, name)))
    }

    fn create_buffer(
        &mut self,
        name: &str,
        desc: &GfxBufferDesc,
        memory: GfxMemoryUsage,
    ) -> anyhow::Result<Arc<GfxBuffer>> {
        let size = self.buffer_memory_requirements(desc).size;
        match memory {
            GfxMemoryUsage::Placed { heap, offset } => self.check_placement(name, heap, offset, size)?,
            _ => self.reserve_bytes(name, size)?,
        }

        let handle = self.buffers.insert(HeadlessBuffer {
            name: name.to_string(),
            size,
            memory,
        });
        log::trace!("headless: create buffer {name} {:?} {:?}", handle, memory);
        Ok(Arc::new(GfxBuffer::new(handle, *desc, name)))
    }

    fn create_sampler(&mut self, _name: &str, desc: &GfxSamplerDesc) -> anyhow::Result<Arc<GfxSampler>> {
        let handle = self.samplers.insert(*desc);
        Ok(Arc::new(GfxSampler::new(handle, *desc)))
    }

    fn create_heap(&mut self, name: &str, size: vk::DeviceSize) -> anyhow::Result<GfxHeapHandle> {
        self.reserve_bytes(name, size)?;
        let handle = self.heaps.insert(HeadlessHeap {
            name: name.to_string(),
            size,
        });
        log::trace!("headless: create heap {name} ({size} bytes)");
        Ok(handle)
    }

    fn create_descriptor_set(&mut self, _name: &str, binding_count: u32) -> anyhow::Result<GfxDescriptorSetHandle> {
        Ok(self.descriptor_sets.insert(binding_count))
    }

    fn destroy_image(&mut self, image: GfxImageHandle) {
        if let Some(removed) = self.images.remove(image) {
            if !matches!(removed.memory, GfxMemoryUsage::Placed { .. }) {
                self.allocated_bytes -= removed.size;
            }
        }
    }

    fn destroy_buffer(&mut self, buffer: GfxBufferHandle) {
        if let Some(removed) = self.buffers.remove(buffer) {
            if !matches!(removed.memory, GfxMemoryUsage::Placed { .. }) {
                self.allocated_bytes -= removed.size;
            }
        }
    }

    fn destroy_descriptor_set(&mut self, set: GfxDescriptorSetHandle) {
        self.descriptor_sets.remove(set);
    }

    fn destroy_heap(&mut self, heap: GfxHeapHandle) {
        if let Some(removed) = self.heaps.remove(heap) {
            self.allocated_bytes -= removed.size;
        }
    }
}

impl GfxPipelineCompiler for HeadlessDevice {
    fn create_shader(
        &mut self,
        path: &str,
        stage: &GfxShaderStageDesc,
        settings: &GfxShaderCompileSettings,
    ) -> anyhow::Result<GfxShaderId> {
        if path.is_empty() {
            bail!("shader path is empty");
        }
        *self.compile_counts.entry(path.to_string()).or_default() += 1;
        Ok(self.shaders.insert(HeadlessShader {
            path: path.to_string(),
            stage: stage.clone(),
            permutation_key: settings.permutation_key(),
        }))
    }

    fn create_compute_pipeline(&mut self, name: &str, shader: GfxShaderId) -> anyhow::Result<GfxPipelineId> {
        let shader_info = self.shaders.get(shader).with_context(|| format!("pipeline {name}: unknown shader"))?;
        if shader_info.stage.stage != vk::ShaderStageFlags::COMPUTE {
            bail!("pipeline {name}: {} is not a compute shader", shader_info.path);
        }
        Ok(self.pipelines.insert(name.to_string()))
    }

    fn create_graphics_pipeline(
        &mut self,
        name: &str,
        shaders: &[GfxShaderId],
        _desc: &GfxGraphicsPipelineDesc,
    ) -> anyhow::Result<GfxPipelineId> {
        if shaders.iter().any(|shader| !self.shaders.contains_key(*shader)) {
            bail!("pipeline {name}: unknown shader");
        }
        Ok(self.pipelines.insert(name.to_string()))
    }

    fn destroy_shader(&mut self, shader: GfxShaderId) {
        self.shaders.remove(shader);
    }

    fn destroy_pipeline(&mut self, pipeline: GfxPipelineId) {
        self.pipelines.remove(pipeline);
    }
}

/// headless 录制下来的一条命令
#[derive(Clone, Debug)]
pub enum GfxRecordedCommand {
    BeginLabel(String),
    EndLabel,
    PipelineBarrier {
        images: Vec<GfxImageBarrier>,
        buffers: Vec<GfxBufferBarrier>,
    },
    SetViewport(vk::Viewport),
    SetScissor(vk::Rect2D),
    BindPipeline {
        bind_point: vk::PipelineBindPoint,
        pipeline: GfxPipelineId,
    },
    UpdateDescriptorSet {
        set: GfxDescriptorSetHandle,
        writes: Vec<GfxDescriptorWrite>,
    },
    BindDescriptorSet {
        bind_point: vk::PipelineBindPoint,
        set_index: u32,
        set: GfxDescriptorSetHandle,
    },
    PushConstants {
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: Vec<u8>,
    },
    BindVertexBuffer {
        binding: u32,
        buffer: GfxBufferHandle,
        offset: vk::DeviceSize,
    },
    BindIndexBuffer {
        buffer: GfxBufferHandle,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    },
    Dispatch([u32; 3]),
    DispatchIndirect {
        buffer: GfxBufferHandle,
        offset: vk::DeviceSize,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    DrawIndirect {
        buffer: GfxBufferHandle,
        offset: vk::DeviceSize,
        draw_count: u32,
        indexed: bool,
    },
    BeginRendering(GfxRenderingInfo),
    EndRendering,
    CopyImage {
        src: GfxImageHandle,
        dst: GfxImageHandle,
        region: GfxImageCopy,
    },
    BlitImage {
        src: GfxImageHandle,
        dst: GfxImageHandle,
        region: GfxImageBlit,
        filter: vk::Filter,
    },
    CopyBuffer {
        src: GfxBufferHandle,
        dst: GfxBufferHandle,
        size: vk::DeviceSize,
    },
    FillBuffer {
        buffer: GfxBufferHandle,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        data: u32,
    },
    ClearImage {
        image: GfxImageHandle,
        base_mip: u32,
        mip_count: u32,
        value: GfxClearValue,
    },
}

/// 记录命令的 command buffer
#[derive(Default)]
pub struct HeadlessCommandBuffer {
    commands: Vec<GfxRecordedCommand>,
    label_depth: usize,
}
impl HeadlessCommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn commands(&self) -> &[GfxRecordedCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<GfxRecordedCommand> {
        std::mem::take(&mut self.commands)
    }

    /// 所有 `pipeline_barrier` 命令
    pub fn barrier_commands(&self) -> impl Iterator<Item = (&[GfxImageBarrier], &[GfxBufferBarrier])> {
        self.commands.iter().filter_map(|cmd| match cmd {
            GfxRecordedCommand::PipelineBarrier { images, buffers } => Some((images.as_slice(), buffers.as_slice())),
            _ => None,
        })
    }

    /// 尚未闭合的 debug label 数量
    #[inline]
    pub fn open_label_depth(&self) -> usize {
        self.label_depth
    }
}

impl GfxCommandRecorder for HeadlessCommandBuffer {
    fn begin_label(&mut self, name: &str, _color: glam::Vec4) {
        self.label_depth += 1;
        self.commands.push(GfxRecordedCommand::BeginLabel(name.to_string()));
    }

    fn end_label(&mut self) {
        debug_assert!(self.label_depth > 0, "end_label without begin_label");
        self.label_depth = self.label_depth.saturating_sub(1);
        self.commands.push(GfxRecordedCommand::EndLabel);
    }

    fn pipeline_barrier(&mut self, image_barriers: &[GfxImageBarrier], buffer_barriers: &[GfxBufferBarrier]) {
        self.commands.push(GfxRecordedCommand::PipelineBarrier {
            images: image_barriers.to_vec(),
            buffers: buffer_barriers.to_vec(),
        });
    }

    fn set_viewport(&mut self, viewport: vk::Viewport) {
        self.commands.push(GfxRecordedCommand::SetViewport(viewport));
    }

    fn set_scissor(&mut self, scissor: vk::Rect2D) {
        self.commands.push(GfxRecordedCommand::SetScissor(scissor));
    }

    fn bind_pipeline(&mut self, bind_point: vk::PipelineBindPoint, pipeline: GfxPipelineId) {
        self.commands.push(GfxRecordedCommand::BindPipeline { bind_point, pipeline });
    }

    fn update_descriptor_set(&mut self, set: GfxDescriptorSetHandle, writes: &[GfxDescriptorWrite]) {
        self.commands.push(GfxRecordedCommand::UpdateDescriptorSet {
            set,
            writes: writes.to_vec(),
        });
    }

    fn bind_descriptor_set(&mut self, bind_point: vk::PipelineBindPoint, set_index: u32, set: GfxDescriptorSetHandle) {
        self.commands.push(GfxRecordedCommand::BindDescriptorSet {
            bind_point,
            set_index,
            set,
        });
    }

    fn push_constants(&mut self, stages: vk::ShaderStageFlags, offset: u32, data: &[u8]) {
        self.commands.push(GfxRecordedCommand::PushConstants {
            stages,
            offset,
            data: data.to_vec(),
        });
    }

    fn bind_vertex_buffer(&mut self, binding: u32, buffer: GfxBufferHandle, offset: vk::DeviceSize) {
        self.commands.push(GfxRecordedCommand::BindVertexBuffer { binding, buffer, offset });
    }

    fn bind_index_buffer(&mut self, buffer: GfxBufferHandle, offset: vk::DeviceSize, index_type: vk::IndexType) {
        self.commands.push(GfxRecordedCommand::BindIndexBuffer {
            buffer,
            offset,
            index_type,
        });
    }

    fn dispatch(&mut self, group_count: [u32; 3]) {
        self.commands.push(GfxRecordedCommand::Dispatch(group_count));
    }

    fn dispatch_indirect(&mut self, buffer: GfxBufferHandle, offset: vk::DeviceSize) {
        self.commands.push(GfxRecordedCommand::DispatchIndirect { buffer, offset });
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, _first_vertex: u32, _first_instance: u32) {
        self.commands.push(GfxRecordedCommand::Draw {
            vertex_count,
            instance_count,
        });
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.commands.push(GfxRecordedCommand::DrawIndexed {
            index_count,
            instance_count,
        });
    }

    fn draw_indirect(&mut self, buffer: GfxBufferHandle, offset: vk::DeviceSize, draw_count: u32, _stride: u32) {
        self.commands.push(GfxRecordedCommand::DrawIndirect {
            buffer,
            offset,
            draw_count,
            indexed: false,
        });
    }

    fn draw_indexed_indirect(&mut self, buffer: GfxBufferHandle, offset: vk::DeviceSize, draw_count: u32, _stride: u32) {
        self.commands.push(GfxRecordedCommand::DrawIndirect {
            buffer,
            offset,
            draw_count,
            indexed: true,
        });
    }

    fn begin_rendering(&mut self, info: &GfxRenderingInfo) {
        self.commands.push(GfxRecordedCommand::BeginRendering(info.clone()));
    }

    fn end_rendering(&mut self) {
        self.commands.push(GfxRecordedCommand::EndRendering);
    }

    fn copy_image(&mut self, src: GfxImageHandle, dst: GfxImageHandle, region: &GfxImageCopy) {
        self.commands.push(GfxRecordedCommand::CopyImage {
            src,
            dst,
            region: *region,
        });
    }

    fn blit_image(&mut self, src: GfxImageHandle, dst: GfxImageHandle, region: &GfxImageBlit, filter: vk::Filter) {
        self.commands.push(GfxRecordedCommand::BlitImage {
            src,
            dst,
            region: *region,
            filter,
        });
    }

    fn copy_buffer(&mut self, src: GfxBufferHandle, dst: GfxBufferHandle, region: vk::BufferCopy) {
        self.commands.push(GfxRecordedCommand::CopyBuffer {
            src,
            dst,
            size: region.size,
        });
    }

    fn fill_buffer(&mut self, buffer: GfxBufferHandle, offset: vk::DeviceSize, size: vk::DeviceSize, data: u32) {
        self.commands.push(GfxRecordedCommand::FillBuffer {
            buffer,
            offset,
            size,
            data,
        });
    }

    fn clear_image(
        &mut self,
        image: GfxImageHandle,
        _aspect: vk::ImageAspectFlags,
        base_mip: u32,
        mip_count: u32,
        value: GfxClearValue,
    ) {
        self.commands.push(GfxRecordedCommand::ClearImage {
            image,
            base_mip,
            mip_count,
            value,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placed_image_must_fit_in_heap() {
        let mut device = HeadlessDevice::new();
        let heap = device.create_heap("heap", 1024).unwrap();
        let desc = GfxImageDesc::new_2d(16, 16, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::STORAGE);

        let image = device.create_image("fits", &desc, GfxMemoryUsage::Placed { heap, offset: 0 }).unwrap();
        assert_eq!(device.image_placement(image.handle()), Some((heap, 0)));

        let result = device.create_image("overflow", &desc, GfxMemoryUsage::Placed { heap, offset: 512 });
        assert!(result.is_err());
    }

    #[test]
    fn test_memory_budget() {
        let mut device = HeadlessDevice::new().with_memory_budget(4096);
        assert!(device.create_heap("a", 4096).is_ok());
        assert!(device.create_heap("b", 1).is_err());
        assert_eq!(device.allocated_bytes(), 4096);
    }

    #[test]
    fn test_destroy_releases_budget() {
        let mut device = HeadlessDevice::new().with_memory_budget(4096);
        let heap = device.create_heap("a", 4096).unwrap();
        device.destroy_heap(heap);
        assert_eq!(device.live_heap_count(), 0);
        assert!(device.create_heap("b", 4096).is_ok());
    }

    #[test]
    fn test_compute_pipeline_requires_compute_shader() {
        let mut device = HeadlessDevice::new();
        let settings = GfxShaderCompileSettings::default();
        let vs = device.create_shader("a.slang", &GfxShaderStageDesc::vertex("vsmain"), &settings).unwrap();
        let cs = device.create_shader("a.slang", &GfxShaderStageDesc::compute("main"), &settings).unwrap();

        assert!(device.create_compute_pipeline("bad", vs).is_err());
        assert!(device.create_compute_pipeline("good", cs).is_ok());
        assert_eq!(device.compile_count("a.slang"), 2);
    }

    #[test]
    fn test_command_buffer_records_in_order() {
        let mut cmd = HeadlessCommandBuffer::new();
        cmd.begin_label("pass", glam::Vec4::ONE);
        cmd.pipeline_barrier(&[GfxImageBarrier::new()], &[]);
        cmd.dispatch([8, 8, 1]);
        cmd.end_label();

        assert_eq!(cmd.commands().len(), 4);
        assert_eq!(cmd.barrier_commands().count(), 1);
        assert_eq!(cmd.open_label_depth(), 0);
        assert!(matches!(cmd.commands()[2], GfxRecordedCommand::Dispatch([8, 8, 1])));
    }
}
