mod common;

use ash::vk;
use prism_gfx::headless::HeadlessCommandBuffer;
use prism_render_graph::render_graph::{
    RenderGraphBuilder, RgAccessKind, RgBuilderState, RgDispatchDesc, RgImageDesc,
};

use common::{TestGpu, storage_image_desc};

#[test]
fn test_mip_view_metadata() {
    let mut graph = RenderGraphBuilder::new();
    let desc = RgImageDesc::new_2d(256, 128, vk::Format::R32_SFLOAT, vk::ImageUsageFlags::STORAGE)
        .with_full_mip_chain();
    let hiz = graph.create_image("hi-z", &desc);

    let full = graph.image_info(hiz.full());
    assert_eq!(full.mip_levels(), 9);
    assert_eq!(full.resolution_2d(), vk::Extent2D { width: 256, height: 128 });
    assert_eq!(full.format(), vk::Format::R32_SFLOAT);

    let mip2 = graph.image_info(graph.create_mip_view(hiz, 2));
    assert_eq!(mip2.base_mip(), 2);
    assert_eq!(mip2.mip_levels(), 1);
    assert_eq!(mip2.resolution().width, 64);
    assert_eq!(mip2.resolution().height, 32);
    assert_eq!(mip2.resolution().depth, 1);

    // 尺寸最小为 1
    let last = graph.image_info(graph.create_mip_view(hiz, 8));
    assert_eq!(last.resolution_2d(), vk::Extent2D { width: 1, height: 1 });
}

#[test]
fn test_metadata_is_stable_across_execute() {
    let mut gpu = TestGpu::new();
    let mut cmd = HeadlessCommandBuffer::new();

    let mut graph = RenderGraphBuilder::new();
    let image = graph.create_image("velocity", &storage_image_desc(320, 180).with_mip_levels(2));
    let view = graph.create_mip_view(image, 1);
    graph.clear_image("clear", image.full(), Default::default());

    let before = (graph.image_info(image.full()), graph.image_info(view));
    assert_eq!(graph.state(), RgBuilderState::Building);
    gpu.execute(&mut graph, &mut cmd).unwrap();
    assert_eq!(graph.state(), RgBuilderState::Executed);

    let after = (graph.image_info(image.full()), graph.image_info(view));
    assert_eq!(before, after);
    assert_eq!(after.1.resolution_2d(), vk::Extent2D { width: 160, height: 90 });
    // 执行之后仍然可以创建 view
    assert_eq!(graph.create_mip_view(image, 1), view);

    gpu.destroy();
}

#[test]
fn test_handle_validity() {
    let mut first = RenderGraphBuilder::new();
    let mut second = RenderGraphBuilder::new();
    let image = first.create_image("a", &storage_image_desc(8, 8));
    let buffer = first.create_storage_buffer("b", 64, false);
    second.create_image("c", &storage_image_desc(8, 8));

    assert!(first.is_valid_image(image));
    assert!(first.is_valid_buffer(buffer));
    // id 相同，但属于另一个图
    assert!(!second.is_valid_image(image));
    assert!(!second.is_valid_buffer(buffer));
    assert_eq!(first.buffer_size(buffer), 64);
}

#[test]
fn test_nodes_keep_registration_order() {
    let mut graph = RenderGraphBuilder::new();
    let a = graph.create_storage_buffer("histogram", 1024, true);
    let b = graph.create_storage_buffer("exposure", 16, false);
    graph.fill_buffer("reset exposure", b.full(), 0);
    graph.copy_buffer("copy", a.range(0, 16), b.full());
    // 清零节点插入在 histogram 第一次使用之前
    assert_eq!(graph.node_count(), 3);
}

#[test]
#[should_panic(expected = "has already been executed")]
fn test_register_after_execute_panics() {
    let mut gpu = TestGpu::new();
    let mut cmd = HeadlessCommandBuffer::new();

    let mut graph = RenderGraphBuilder::new().with_name("frame");
    let image = graph.create_image("a", &storage_image_desc(16, 16));
    graph.clear_image("clear", image.full(), Default::default());
    gpu.execute(&mut graph, &mut cmd).unwrap();

    graph.create_image("late", &storage_image_desc(16, 16));
}

#[test]
#[should_panic(expected = "has already been executed")]
fn test_execute_twice_panics() {
    let mut gpu = TestGpu::new();
    let mut cmd = HeadlessCommandBuffer::new();

    let mut graph = RenderGraphBuilder::new();
    let _ = gpu.execute(&mut graph, &mut cmd);
    let _ = gpu.execute(&mut graph, &mut cmd);
}

#[test]
#[should_panic(expected = "belongs to another render graph")]
fn test_foreign_handle_panics() {
    let mut first = RenderGraphBuilder::new();
    let mut second = RenderGraphBuilder::new();
    let image = first.create_image("a", &storage_image_desc(8, 8));
    second.create_image("b", &storage_image_desc(8, 8));

    second.clear_image("clear", image.full(), Default::default());
}

#[test]
#[should_panic(expected = "out of bounds")]
fn test_mip_beyond_mip_count_panics() {
    let mut graph = RenderGraphBuilder::new();
    let image = graph.create_image("a", &storage_image_desc(8, 8).with_mip_levels(2));
    graph.create_mip_view(image, 2);
}

#[test]
#[should_panic(expected = "out of bounds")]
fn test_byte_range_beyond_buffer_panics() {
    let mut graph = RenderGraphBuilder::new();
    let buffer = graph.create_storage_buffer("a", 256, false);
    graph.fill_buffer("fill", buffer.range(128, 256), 0);
}

#[test]
#[should_panic(expected = "different resolutions")]
fn test_copy_between_resolutions_panics() {
    let mut graph = RenderGraphBuilder::new();
    let src = graph.create_image("src", &storage_image_desc(64, 64));
    let dst = graph.create_image("dst", &storage_image_desc(32, 32));
    graph.copy_image("copy", src.full(), dst.full());
}

#[test]
#[should_panic(expected = "twice in overlapping mips")]
fn test_overlapping_writes_in_one_node_panic() {
    let mut gpu = TestGpu::new();
    let pipeline = gpu.compute_pipeline("write.slang");

    let mut graph = RenderGraphBuilder::new();
    let image = graph.create_image("a", &storage_image_desc(8, 8).with_mip_levels(2));
    graph.dispatch(
        "write twice",
        RgDispatchDesc::new(pipeline, [1, 1, 1])
            .write_image(image.full(), RgAccessKind::StorageWrite)
            .write_image(image.mip(1), RgAccessKind::StorageReadWrite),
    );
}

#[test]
#[should_panic(expected = "can not be exported")]
fn test_export_transient_panics() {
    let mut graph = RenderGraphBuilder::new();
    let image = graph.create_image("a", &storage_image_desc(8, 8));
    graph.export_image(image, Default::default());
}

#[test]
#[should_panic(expected = "no task scheduler")]
fn test_gpu_task_without_scheduler_panics() {
    let mut gpu = TestGpu::new();
    let mut cmd = HeadlessCommandBuffer::new();

    let mut graph = RenderGraphBuilder::new();
    let _handle = graph.on_gpu_complete("readback", || 1u32);
    let _ = gpu.execute(&mut graph, &mut cmd);
}

#[test]
#[should_panic(expected = "asks for 40 mips, but a 256x256x1 image has at most 9")]
fn test_mip_count_beyond_full_chain_panics() {
    let mut graph = RenderGraphBuilder::new();
    graph.create_image("bad", &storage_image_desc(256, 256).with_mip_levels(40));
}

#[test]
fn test_full_chain_mip_count_is_accepted() {
    let mut graph = RenderGraphBuilder::new();
    let image = graph.create_image("npot", &storage_image_desc(300, 17).with_mip_levels(9));
    let last = graph.image_info(graph.create_mip_view(image, 8));
    assert_eq!(last.resolution_2d(), vk::Extent2D { width: 1, height: 1 });
}
