mod common;

use ash::vk;
use prism_gfx::headless::{HeadlessCommandBuffer, HeadlessDevice};
use prism_render_graph::render_graph::{
    RenderGraphBuilder, RgAccessKind, RgDispatchDesc, RgFrameReport, RgImageHandle, RgTransientKey,
};
use prism_render_interface::render_graph_settings::RenderGraphSettings;

use common::{TestGpu, cleared_images, storage_image_desc};

/// 两张相同的 transient 图像，生命周期分别为节点 [0, 2] 与 [3, 5]
fn run_disjoint_lifetimes(
    gpu: &mut TestGpu,
    cmd: &mut HeadlessCommandBuffer,
) -> (RgFrameReport, RgImageHandle, RgImageHandle) {
    let sample = gpu.compute_pipeline("sample.slang");

    let mut graph = RenderGraphBuilder::new();
    let a = graph.create_image("ao", &storage_image_desc(256, 256));
    let b = graph.create_image("ssr", &storage_image_desc(256, 256));
    for (image, prefix) in [(a, "ao"), (b, "ssr")] {
        graph.clear_image(format!("{prefix} clear"), image.full(), Default::default());
        for i in 0..2 {
            graph.dispatch(
                format!("{prefix} consume {i}"),
                RgDispatchDesc::new(sample, [16, 16, 1]).read_image(image.full(), RgAccessKind::SampledRead),
            );
        }
    }
    let report = gpu.execute(&mut graph, cmd).unwrap();
    (report, a, b)
}

fn placement_offset(gpu: &TestGpu, cmd: &HeadlessCommandBuffer, index: usize) -> vk::DeviceSize {
    let image = cleared_images(cmd)[index];
    gpu.device.image_placement(image).unwrap().1
}

#[test]
fn test_disjoint_lifetimes_alias_when_memory_constrained() {
    let mut gpu = TestGpu::new();
    assert!(gpu.settings.memory_constrained);
    let mut cmd = HeadlessCommandBuffer::new();

    let (report, a, b) = run_disjoint_lifetimes(&mut gpu, &mut cmd);

    let plan = &report.allocation_plan;
    assert_eq!(
        plan.offset_of(RgTransientKey::Image(a.id())),
        plan.offset_of(RgTransientKey::Image(b.id()))
    );
    assert!(plan.placement(RgTransientKey::Image(b.id())).unwrap().aliased);
    assert_eq!(placement_offset(&gpu, &cmd, 0), placement_offset(&gpu, &cmd, 1));
    assert!(report.pool_stats.bytes_saved_by_aliasing > 0);

    // 复用内存的资源第一次使用前等待之前的使用者
    let first_b = report.schedule.step("ssr clear").unwrap();
    assert_eq!(first_b.activations.image_barriers[0].src.stage, vk::PipelineStageFlags2::ALL_COMMANDS);
    let first_a = report.schedule.step("ao clear").unwrap();
    assert_eq!(first_a.activations.image_barriers[0].src.stage, vk::PipelineStageFlags2::TOP_OF_PIPE);

    gpu.destroy();
}

#[test]
fn test_disjoint_lifetimes_do_not_alias_when_disabled() {
    let mut gpu = TestGpu::with_settings(RenderGraphSettings {
        memory_constrained: false,
        ..Default::default()
    });
    let mut cmd = HeadlessCommandBuffer::new();

    let (report, a, b) = run_disjoint_lifetimes(&mut gpu, &mut cmd);

    let plan = &report.allocation_plan;
    assert_ne!(
        plan.offset_of(RgTransientKey::Image(a.id())),
        plan.offset_of(RgTransientKey::Image(b.id()))
    );
    assert_ne!(placement_offset(&gpu, &cmd, 0), placement_offset(&gpu, &cmd, 1));
    assert_eq!(report.pool_stats.bytes_saved_by_aliasing, 0);
    assert_eq!(plan.heap_size, plan.total_requested);

    gpu.destroy();
}

#[test]
fn test_overlapping_lifetimes_never_alias() {
    let mut gpu = TestGpu::new();
    let combine = gpu.compute_pipeline("combine.slang");
    let mut cmd = HeadlessCommandBuffer::new();

    let mut graph = RenderGraphBuilder::new();
    let images: Vec<_> = (0..3)
        .map(|i| graph.create_image(format!("gbuffer-{i}"), &storage_image_desc(128, 128)))
        .collect();
    for image in &images {
        graph.clear_image("clear", image.full(), Default::default());
    }
    let mut combine_desc = RgDispatchDesc::new(combine, [8, 8, 1]);
    for image in &images {
        combine_desc = combine_desc.read_image(image.full(), RgAccessKind::SampledRead);
    }
    graph.dispatch("combine", combine_desc);
    let report = gpu.execute(&mut graph, &mut cmd).unwrap();

    let mut offsets: Vec<_> = images
        .iter()
        .map(|image| report.allocation_plan.offset_of(RgTransientKey::Image(image.id())).unwrap())
        .collect();
    offsets.sort_unstable();
    offsets.dedup();
    assert_eq!(offsets.len(), 3);
    assert_eq!(report.pool_stats.bytes_saved_by_aliasing, 0);

    gpu.destroy();
}

#[test]
fn test_unused_transients_get_no_backing() {
    let mut gpu = TestGpu::new();
    let mut cmd = HeadlessCommandBuffer::new();

    let mut graph = RenderGraphBuilder::new();
    let used = graph.create_image("used", &storage_image_desc(64, 64));
    let unused = graph.create_image("unused", &storage_image_desc(4096, 4096));
    graph.clear_image("clear", used.full(), Default::default());
    let report = gpu.execute(&mut graph, &mut cmd).unwrap();

    assert!(report.allocation_plan.placement(RgTransientKey::Image(unused.id())).is_none());
    assert_eq!(report.pool_stats.created_this_frame, 1);
    assert_eq!(gpu.device.live_image_count(), 1);

    gpu.destroy();
}

#[test]
fn test_transients_are_reused_by_the_same_frame_slot() {
    let mut gpu = TestGpu::new();
    let mut frame_images = Vec::new();

    for _ in 0..4 {
        let mut cmd = HeadlessCommandBuffer::new();
        let mut graph = RenderGraphBuilder::new();
        let image = graph.create_image("scene-color", &storage_image_desc(256, 256));
        graph.clear_image("clear", image.full(), Default::default());
        let report = gpu.execute(&mut graph, &mut cmd).unwrap();

        frame_images.push((cleared_images(&cmd)[0], report.pool_stats));
        gpu.next_frame();
    }

    // 每个 in-flight 槽位第一次使用时创建，之后复用
    for (_, stats) in &frame_images[..3] {
        assert_eq!(stats.created_this_frame, 1);
    }
    assert_eq!(frame_images[3].1.created_this_frame, 0);
    assert_eq!(frame_images[3].1.reused_this_frame, 1);
    assert_eq!(frame_images[3].0, frame_images[0].0);
    assert_ne!(frame_images[1].0, frame_images[0].0);

    gpu.destroy();
}

#[test]
fn test_pool_teardown_releases_all_memory() {
    let mut gpu = TestGpu::new();
    let mut cmd = HeadlessCommandBuffer::new();
    let _ = run_disjoint_lifetimes(&mut gpu, &mut cmd);
    assert!(gpu.device.live_heap_count() > 0);

    let TestGpu {
        mut device,
        pool,
        pipelines,
        ..
    } = gpu;
    pool.destroy(&mut device);
    pipelines.destroy(&mut device);
    assert_eq!(device.live_heap_count(), 0);
    assert_eq!(device.live_image_count(), 0);
    assert_eq!(device.allocated_bytes(), 0);
}

#[test]
fn test_out_of_memory_is_reported() {
    let mut gpu = TestGpu::with_device(HeadlessDevice::new().with_memory_budget(1024), RenderGraphSettings::default());
    let mut cmd = HeadlessCommandBuffer::new();

    let mut graph = RenderGraphBuilder::new().with_name("oom");
    let image = graph.create_image("huge", &storage_image_desc(2048, 2048));
    graph.clear_image("clear", image.full(), Default::default());
    let err = gpu.execute(&mut graph, &mut cmd).unwrap_err();

    let message = format!("{err:#}");
    assert!(message.contains("render graph \"oom\""), "{message}");
    assert!(message.contains("transient heap"), "{message}");
    assert!(message.contains("out of device memory"), "{message}");
    // 失败时什么都没有录制
    assert!(cmd.commands().is_empty());

    gpu.destroy();
}
