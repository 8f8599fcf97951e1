#![allow(dead_code)]

use ash::vk;
use prism_gfx::headless::{GfxRecordedCommand, HeadlessCommandBuffer, HeadlessDevice};
use prism_gfx::pipelines::shader::{GfxGraphicsPipelineDesc, GfxShaderCompileSettings, GfxShaderStageDesc};
use prism_gfx::resources::handles::{GfxImageHandle, GfxPipelineId};
use prism_render_graph::render_graph::{
    RenderGraphBuilder, RgExecuteContext, RgFrameReport, RgGpuTaskTarget, RgImageDesc, RgTransientPool,
};
use prism_render_interface::frame_counter::FrameCounter;
use prism_render_interface::gpu_task::GpuTaskScheduler;
use prism_render_interface::pipeline_cache::GfxPipelineCache;
use prism_render_interface::render_graph_settings::RenderGraphSettings;

/// headless 设备 + 跨帧持有的服务
pub struct TestGpu {
    pub device: HeadlessDevice,
    pub pool: RgTransientPool,
    pub pipelines: GfxPipelineCache,
    pub frame_counter: FrameCounter,
    pub settings: RenderGraphSettings,
}

impl TestGpu {
    pub fn new() -> Self {
        Self::with_settings(RenderGraphSettings::default())
    }

    pub fn with_settings(settings: RenderGraphSettings) -> Self {
        Self::with_device(HeadlessDevice::new(), settings)
    }

    pub fn with_device(device: HeadlessDevice, settings: RenderGraphSettings) -> Self {
        Self {
            device,
            pool: RgTransientPool::new(settings.heap_alignment),
            pipelines: GfxPipelineCache::new(),
            frame_counter: FrameCounter::new(0),
            settings,
        }
    }

    pub fn compute_pipeline(&mut self, path: &str) -> GfxPipelineId {
        self.pipelines
            .get_or_create_compute(&mut self.device, path, "main", &GfxShaderCompileSettings::default())
            .unwrap()
    }

    pub fn graphics_pipeline(&mut self, name: &str, path: &str) -> GfxPipelineId {
        self.pipelines
            .get_or_create_graphics(
                &mut self.device,
                name,
                &[(path, GfxShaderStageDesc::vertex("vsmain")), (path, GfxShaderStageDesc::fragment("psmain"))],
                &GfxShaderCompileSettings::default(),
                &GfxGraphicsPipelineDesc::default(),
            )
            .unwrap()
    }

    pub fn execute(
        &mut self,
        graph: &mut RenderGraphBuilder<'_>,
        cmd: &mut HeadlessCommandBuffer,
    ) -> anyhow::Result<RgFrameReport> {
        graph.execute(RgExecuteContext {
            factory: &mut self.device,
            recorder: cmd,
            pool: &mut self.pool,
            frame_counter: &self.frame_counter,
            settings: &self.settings,
            gpu_tasks: None,
        })
    }

    pub fn execute_with_tasks(
        &mut self,
        graph: &mut RenderGraphBuilder<'_>,
        cmd: &mut HeadlessCommandBuffer,
        scheduler: &mut GpuTaskScheduler,
        fence_value: u64,
    ) -> anyhow::Result<RgFrameReport> {
        graph.execute(RgExecuteContext {
            factory: &mut self.device,
            recorder: cmd,
            pool: &mut self.pool,
            frame_counter: &self.frame_counter,
            settings: &self.settings,
            gpu_tasks: Some(RgGpuTaskTarget { scheduler, fence_value }),
        })
    }

    pub fn next_frame(&mut self) {
        self.frame_counter.next_frame();
    }

    pub fn destroy(self) {
        let Self {
            mut device,
            pool,
            pipelines,
            ..
        } = self;
        pool.destroy(&mut device);
        pipelines.destroy(&mut device);
        assert_eq!(device.live_pipeline_count(), 0);
    }
}

pub fn storage_image_desc(width: u32, height: u32) -> RgImageDesc {
    RgImageDesc::new_2d(
        width,
        height,
        vk::Format::R8G8B8A8_UNORM,
        vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
    )
}

/// 所有 debug label 的名字，按录制顺序
pub fn labels(cmd: &HeadlessCommandBuffer) -> Vec<&str> {
    cmd.commands()
        .iter()
        .filter_map(|c| match c {
            GfxRecordedCommand::BeginLabel(name) => Some(name.as_str()),
            _ => None,
        })
        .collect()
}

/// 录制的 `ClearImage` 命令的目标，按录制顺序
pub fn cleared_images(cmd: &HeadlessCommandBuffer) -> Vec<GfxImageHandle> {
    cmd.commands()
        .iter()
        .filter_map(|c| match c {
            GfxRecordedCommand::ClearImage { image, .. } => Some(*image),
            _ => None,
        })
        .collect()
}
