//! Barrier 调度
//!
//! 按注册顺序遍历节点，逐 mip（image）或逐字节区间（buffer）跟踪资源状态，
//! 为每个节点生成它执行前需要的 barrier。节点不会被重排。
//!
//! 跟踪的状态：当前 layout、最后一次写入、最后一次写入之后的读取、
//! 以及最后一次写入已经对哪些 stage / access 可见。

use std::collections::BTreeMap;

use ash::vk;

use crate::render_graph::barrier::{RgBufferBarrierDesc, RgImageBarrierDesc, RgPassBarriers};
use crate::render_graph::buffer_resource::RgBufferSource;
use crate::render_graph::image_resource::RgImageSource;
use crate::render_graph::node::RgNode;
use crate::render_graph::resource_handle::{RgBufferHandle, RgImageHandle};
use crate::render_graph::resource_registry::RgResourceRegistry;
use crate::render_graph::resource_state::{RgBufferState, RgImageState, WRITE_ACCESS};
use crate::render_graph::transient_allocator::RgTransientKey;

/// 一段子资源的同步状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SyncTrack {
    /// 最后一次写入的 (stage, access)；`Some((NONE, NONE))` 表示图外已经同步过的写入
    last_write: Option<(vk::PipelineStageFlags2, vk::AccessFlags2)>,
    /// 最后一次写入之后的读取
    read_stages: vk::PipelineStageFlags2,
    read_access: vk::AccessFlags2,
    /// 最后一次写入已经对哪些 stage / access 可见
    visible_stages: vk::PipelineStageFlags2,
    visible_access: vk::AccessFlags2,
    /// transient 资源第一次使用前为 false
    touched: bool,
}

impl SyncTrack {
    /// 尚未被使用的 transient 资源
    const FRESH: Self = Self {
        last_write: None,
        read_stages: vk::PipelineStageFlags2::NONE,
        read_access: vk::AccessFlags2::NONE,
        visible_stages: vk::PipelineStageFlags2::NONE,
        visible_access: vk::AccessFlags2::NONE,
        touched: false,
    };

    /// 按导入时的状态初始化
    fn imported(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2) -> Self {
        let mut track = Self {
            touched: true,
            ..Self::FRESH
        };
        if access.intersects(WRITE_ACCESS) {
            track.last_write = Some((stage, access & WRITE_ACCESS));
        } else if access != vk::AccessFlags2::NONE {
            track.last_write = Some((vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE));
            track.read_stages = stage;
            track.read_access = access;
            track.visible_stages = stage;
            track.visible_access = access;
        }
        track
    }

    /// 访问 `(stage, access)` 之前是否需要 barrier（不含 layout）
    fn needs_barrier(&self, stage: vk::PipelineStageFlags2, access: vk::AccessFlags2) -> bool {
        if access.intersects(WRITE_ACCESS) {
            // WAW / WAR
            return self.last_write.is_some() || !self.read_stages.is_empty();
        }
        // RAW
        self.last_write.is_some()
            && !(self.visible_stages.contains(stage) && self.visible_access.contains(access))
    }

    /// barrier 的 src 端
    fn src_mask(&self) -> (vk::PipelineStageFlags2, vk::AccessFlags2) {
        let (write_stage, write_access) = self.last_write.unwrap_or((vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE));
        let stage = write_stage | self.read_stages;
        let stage = if stage.is_empty() { vk::PipelineStageFlags2::TOP_OF_PIPE } else { stage };
        (stage, write_access)
    }

    /// 记录一次访问；`synchronized` 表示访问前插入了 barrier
    fn apply(&mut self, stage: vk::PipelineStageFlags2, access: vk::AccessFlags2, synchronized: bool) {
        self.touched = true;
        if access.intersects(WRITE_ACCESS) {
            self.last_write = Some((stage, access & WRITE_ACCESS));
            self.read_stages = vk::PipelineStageFlags2::NONE;
            self.read_access = vk::AccessFlags2::NONE;
            self.visible_stages = vk::PipelineStageFlags2::NONE;
            self.visible_access = vk::AccessFlags2::NONE;
        } else if synchronized {
            self.read_stages = stage;
            self.read_access = access;
            self.visible_stages = stage;
            self.visible_access = access;
        } else {
            self.read_stages |= stage;
            self.read_access |= access;
        }
    }

    /// 图执行完毕之后的状态
    fn final_mask(&self) -> (vk::PipelineStageFlags2, vk::AccessFlags2) {
        if !self.read_stages.is_empty() {
            return (self.read_stages, self.read_access);
        }
        match self.last_write {
            Some((stage, access)) if !stage.is_empty() => (stage, access),
            _ => (vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct MipTrack {
    layout: vk::ImageLayout,
    sync: SyncTrack,
}

/// buffer 的一个区间 `[start, end)`
#[derive(Clone, Copy, Debug)]
struct BufferSegment {
    start: vk::DeviceSize,
    end: vk::DeviceSize,
    sync: SyncTrack,
}

/// 一个节点内对同一子资源的需求合并后的结果
#[derive(Clone, Copy, Debug)]
struct Requirement {
    stage: vk::PipelineStageFlags2,
    access: vk::AccessFlags2,
    layout: vk::ImageLayout,
}

/// 执行后 image 的状态（逐 mip）
#[derive(Clone, Debug)]
pub struct RgExportedImage {
    pub handle: RgImageHandle,
    pub name: String,
    pub mip_states: Vec<RgImageState>,
}

impl RgExportedImage {
    /// 所有 mip 状态一致时返回该状态
    pub fn uniform_state(&self) -> Option<RgImageState> {
        let first = *self.mip_states.first()?;
        self.mip_states.iter().all(|s| *s == first).then_some(first)
    }
}

/// 执行后 buffer 的状态，多个区间状态不同时取并集
#[derive(Clone, Debug)]
pub struct RgExportedBuffer {
    pub handle: RgBufferHandle,
    pub name: String,
    pub final_state: RgBufferState,
}

/// 一个节点的调度结果
#[derive(Clone, Debug, Default)]
pub struct RgScheduledNode {
    /// 节点在注册顺序中的下标
    pub node_index: usize,
    pub name: String,
    /// transient 资源第一次使用前的激活（从 UNDEFINED 转换）
    pub activations: RgPassBarriers,
    /// hazard barrier
    pub barriers: RgPassBarriers,
}

/// 整个图的调度结果
#[derive(Clone, Debug, Default)]
pub struct RgSchedule {
    pub steps: Vec<RgScheduledNode>,
    /// 所有节点之后，把导出资源转换到要求的最终状态
    pub export_barriers: RgPassBarriers,
    /// 所有导入 image 执行后的状态
    pub exported_images: Vec<RgExportedImage>,
    pub exported_buffers: Vec<RgExportedBuffer>,
}

// getters
impl RgSchedule {
    /// 所有节点前的 hazard barrier 数量（image + buffer）
    pub fn hazard_barrier_count(&self) -> usize {
        self.steps
            .iter()
            .map(|s| s.barriers.image_barrier_count() + s.barriers.buffer_barrier_count())
            .sum()
    }

    pub fn activation_count(&self) -> usize {
        self.steps
            .iter()
            .map(|s| s.activations.image_barrier_count() + s.activations.buffer_barrier_count())
            .sum()
    }

    pub fn step(&self, name: &str) -> Option<&RgScheduledNode> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn exported_image(&self, handle: RgImageHandle) -> Option<&RgExportedImage> {
        self.exported_images.iter().find(|e| e.handle == handle)
    }

    pub fn exported_buffer(&self, handle: RgBufferHandle) -> Option<&RgExportedBuffer> {
        self.exported_buffers.iter().find(|e| e.handle == handle)
    }
}

/// Barrier 调度器
///
/// 一次性使用：`new` 之后调用 `schedule` 得到 `RgSchedule`。
pub struct RgScheduler<'r> {
    registry: &'r RgResourceRegistry,
    /// transient 资源第一次使用前是否需要等待内存之前的使用者
    needs_discard_sync: &'r dyn Fn(RgTransientKey) -> bool,

    image_tracks: Vec<Vec<MipTrack>>,
    buffer_tracks: Vec<Vec<BufferSegment>>,
}

// new & init
impl<'r> RgScheduler<'r> {
    pub fn new(registry: &'r RgResourceRegistry, needs_discard_sync: &'r dyn Fn(RgTransientKey) -> bool) -> Self {
        let image_tracks = registry
            .iter_images()
            .map(|(_, image)| {
                let track = match &image.source {
                    RgImageSource::Imported { initial_state, .. } => MipTrack {
                        layout: initial_state.layout,
                        sync: SyncTrack::imported(initial_state.stage, initial_state.access),
                    },
                    RgImageSource::Transient => MipTrack {
                        layout: vk::ImageLayout::UNDEFINED,
                        sync: SyncTrack::FRESH,
                    },
                };
                vec![track; image.desc.mip_levels as usize]
            })
            .collect();

        let buffer_tracks = registry
            .iter_buffers()
            .map(|(_, buffer)| {
                let sync = match &buffer.source {
                    RgBufferSource::Imported { initial_state, .. } => {
                        SyncTrack::imported(initial_state.stage, initial_state.access)
                    }
                    RgBufferSource::Transient { .. } => SyncTrack::FRESH,
                };
                vec![BufferSegment {
                    start: 0,
                    end: buffer.size(),
                    sync,
                }]
            })
            .collect();

        Self {
            registry,
            needs_discard_sync,
            image_tracks,
            buffer_tracks,
        }
    }
}

// schedule
impl RgScheduler<'_> {
    pub fn schedule(mut self, nodes: &[RgNode<'_>]) -> RgSchedule {
        let mut steps = Vec::with_capacity(nodes.len());
        for (node_index, node) in nodes.iter().enumerate() {
            let mut step = RgScheduledNode {
                node_index,
                name: node.name.clone(),
                ..Default::default()
            };
            self.schedule_images(node, &mut step);
            self.schedule_buffers(node, &mut step);
            steps.push(step);
        }

        let mut export_barriers = RgPassBarriers::new();
        self.schedule_exports(&mut export_barriers);

        let (exported_images, exported_buffers) = self.collect_final_states();
        RgSchedule {
            steps,
            export_barriers,
            exported_images,
            exported_buffers,
        }
    }

    fn schedule_images(&mut self, node: &RgNode<'_>, step: &mut RgScheduledNode) {
        // (image id, mip) -> 合并后的需求；BTreeMap 保证相邻 mip 连续出现，便于合并 barrier
        let mut requirements: BTreeMap<(u32, u32), Requirement> = BTreeMap::new();
        for access in &node.image_accesses {
            let (base, count) = self.registry.resolve_image_view(access.view);
            let state = access.state();
            for mip in base..base + count {
                requirements
                    .entry((access.view.image.id, mip))
                    .and_modify(|r| {
                        r.stage |= state.stage;
                        r.access |= state.access;
                    })
                    .or_insert(Requirement {
                        stage: state.stage,
                        access: state.access,
                        layout: state.layout,
                    });
            }
        }

        for ((image_id, mip), req) in requirements {
            let handle = self.registry.image_handle(image_id);
            let aspect = self.registry.image(handle).aspect();
            let track = &mut self.image_tracks[image_id as usize][mip as usize];
            let dst = RgImageState::new(req.stage, req.access, req.layout);

            if !track.sync.touched {
                let discard_sync = (self.needs_discard_sync)(RgTransientKey::Image(image_id));
                let src = if discard_sync {
                    RgImageState::new(
                        vk::PipelineStageFlags2::ALL_COMMANDS,
                        vk::AccessFlags2::MEMORY_WRITE,
                        vk::ImageLayout::UNDEFINED,
                    )
                } else {
                    RgImageState::UNDEFINED
                };
                step.activations.push_image(RgImageBarrierDesc {
                    image: handle,
                    base_mip: mip,
                    mip_count: 1,
                    src,
                    dst,
                    aspect,
                });
                track.layout = req.layout;
                track.sync.apply(req.stage, req.access, true);
                continue;
            }

            let layout_change = track.layout != req.layout;
            let synchronized = layout_change || track.sync.needs_barrier(req.stage, req.access);
            if synchronized {
                let (src_stage, src_access) = track.sync.src_mask();
                let barrier = RgImageBarrierDesc {
                    image: handle,
                    base_mip: mip,
                    mip_count: 1,
                    src: RgImageState::new(src_stage, src_access, track.layout),
                    dst,
                    aspect,
                };
                log::trace!(
                    "rg barrier before \"{}\": image \"{}\" mip {} {:?} -> {:?}",
                    node.name,
                    self.registry.image(handle).name,
                    mip,
                    track.layout,
                    req.layout
                );
                step.barriers.push_image(barrier);
            }
            track.layout = req.layout;
            track.sync.apply(req.stage, req.access, synchronized);
        }
    }

    fn schedule_buffers(&mut self, node: &RgNode<'_>, step: &mut RgScheduledNode) {
        // 每个 buffer 的所有访问区间，切分为互不重叠的基本区间后合并需求
        let mut per_buffer: BTreeMap<u32, Vec<(vk::DeviceSize, vk::DeviceSize, Requirement)>> = BTreeMap::new();
        for access in &node.buffer_accesses {
            let (offset, size) = self.registry.resolve_buffer_view(access.view);
            let state = access.state();
            per_buffer.entry(access.view.buffer.id).or_default().push((
                offset,
                offset + size,
                Requirement {
                    stage: state.stage,
                    access: state.access,
                    layout: vk::ImageLayout::UNDEFINED,
                },
            ));
        }

        for (buffer_id, ranges) in per_buffer {
            let handle = self.registry.buffer_handle(buffer_id);
            for (start, end, req) in elementary_ranges(&ranges) {
                let segments = &mut self.buffer_tracks[buffer_id as usize];
                split_segments(segments, start, end);

                for segment in segments.iter_mut().filter(|s| s.start >= start && s.end <= end) {
                    let dst = RgBufferState::new(req.stage, req.access);
                    if !segment.sync.touched {
                        if (self.needs_discard_sync)(RgTransientKey::Buffer(buffer_id)) {
                            step.activations.push_buffer(RgBufferBarrierDesc {
                                buffer: handle,
                                offset: segment.start,
                                size: segment.end - segment.start,
                                src: RgBufferState::new(
                                    vk::PipelineStageFlags2::ALL_COMMANDS,
                                    vk::AccessFlags2::MEMORY_WRITE,
                                ),
                                dst,
                            });
                        }
                        segment.sync.apply(req.stage, req.access, true);
                        continue;
                    }

                    let synchronized = segment.sync.needs_barrier(req.stage, req.access);
                    if synchronized {
                        let (src_stage, src_access) = segment.sync.src_mask();
                        step.barriers.push_buffer(RgBufferBarrierDesc {
                            buffer: handle,
                            offset: segment.start,
                            size: segment.end - segment.start,
                            src: RgBufferState::new(src_stage, src_access),
                            dst,
                        });
                    }
                    segment.sync.apply(req.stage, req.access, synchronized);
                }
                coalesce_segments(segments);
            }
        }
    }

    /// 导出资源转换到要求的最终状态
    fn schedule_exports(&mut self, export_barriers: &mut RgPassBarriers) {
        for (handle, image) in self.registry.iter_images() {
            let Some(export_state) = image.export_state else {
                continue;
            };
            let aspect = image.aspect();
            for (mip, track) in self.image_tracks[handle.id as usize].iter_mut().enumerate() {
                let synchronized = track.layout != export_state.layout
                    || track.sync.needs_barrier(export_state.stage, export_state.access);
                if synchronized {
                    let (src_stage, src_access) = track.sync.src_mask();
                    export_barriers.push_image(RgImageBarrierDesc {
                        image: handle,
                        base_mip: mip as u32,
                        mip_count: 1,
                        src: RgImageState::new(src_stage, src_access, track.layout),
                        dst: export_state,
                        aspect,
                    });
                }
                track.layout = export_state.layout;
                track.sync.apply(export_state.stage, export_state.access, synchronized);
            }
        }

        for (handle, buffer) in self.registry.iter_buffers() {
            let Some(export_state) = buffer.export_state else {
                continue;
            };
            for segment in self.buffer_tracks[handle.id as usize].iter_mut() {
                let synchronized = segment.sync.needs_barrier(export_state.stage, export_state.access);
                if synchronized {
                    let (src_stage, src_access) = segment.sync.src_mask();
                    export_barriers.push_buffer(RgBufferBarrierDesc {
                        buffer: handle,
                        offset: segment.start,
                        size: segment.end - segment.start,
                        src: RgBufferState::new(src_stage, src_access),
                        dst: export_state,
                    });
                }
                segment.sync.apply(export_state.stage, export_state.access, synchronized);
            }
        }
    }

    fn collect_final_states(&self) -> (Vec<RgExportedImage>, Vec<RgExportedBuffer>) {
        let images = self
            .registry
            .iter_images()
            .filter(|(_, image)| !image.is_transient())
            .map(|(handle, image)| RgExportedImage {
                handle,
                name: image.name.clone(),
                mip_states: self.image_tracks[handle.id as usize]
                    .iter()
                    .map(|track| {
                        let (stage, access) = track.sync.final_mask();
                        RgImageState::new(stage, access, track.layout)
                    })
                    .collect(),
            })
            .collect();

        let buffers = self
            .registry
            .iter_buffers()
            .filter(|(_, buffer)| !buffer.is_transient())
            .map(|(handle, buffer)| {
                let (stage, access) = self.buffer_tracks[handle.id as usize].iter().fold(
                    (vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE),
                    |(stage, access), segment| {
                        let (s, a) = segment.sync.final_mask();
                        (stage | s, access | a)
                    },
                );
                RgExportedBuffer {
                    handle,
                    name: buffer.name.clone(),
                    final_state: RgBufferState::new(stage, access),
                }
            })
            .collect();

        (images, buffers)
    }
}

/// 把可能重叠的区间切成互不重叠的基本区间，每个基本区间合并覆盖它的所有需求
fn elementary_ranges(
    ranges: &[(vk::DeviceSize, vk::DeviceSize, Requirement)],
) -> Vec<(vk::DeviceSize, vk::DeviceSize, Requirement)> {
    let mut points = ranges.iter().flat_map(|(start, end, _)| [*start, *end]).collect::<Vec<_>>();
    points.sort_unstable();
    points.dedup();

    points
        .windows(2)
        .filter_map(|w| {
            let (start, end) = (w[0], w[1]);
            ranges.iter().filter(|(s, e, _)| *s <= start && end <= *e).fold(None, |acc: Option<Requirement>, (_, _, r)| {
                Some(match acc {
                    Some(mut acc) => {
                        acc.stage |= r.stage;
                        acc.access |= r.access;
                        acc
                    }
                    None => *r,
                })
            })
            .map(|req| (start, end, req))
        })
        .collect()
}

/// 保证 `start` 与 `end` 都落在区间边界上
fn split_segments(segments: &mut Vec<BufferSegment>, start: vk::DeviceSize, end: vk::DeviceSize) {
    for point in [start, end] {
        if let Some(index) = segments.iter().position(|s| s.start < point && point < s.end) {
            let segment = segments[index];
            segments[index].end = point;
            segments.insert(
                index + 1,
                BufferSegment {
                    start: point,
                    ..segment
                },
            );
        }
    }
}

/// 合并状态相同的相邻区间
fn coalesce_segments(segments: &mut Vec<BufferSegment>) {
    let mut merged: Vec<BufferSegment> = Vec::with_capacity(segments.len());
    for segment in segments.drain(..) {
        match merged.last_mut() {
            Some(last) if last.end == segment.start && last.sync == segment.sync => last.end = segment.end,
            _ => merged.push(segment),
        }
    }
    *segments = merged;
}

// 调试输出
impl RgSchedule {
    /// 打印执行计划
    ///
    /// 输出每个节点的类型、访问声明、激活与 barrier 的详细信息。
    pub fn log_plan(&self, nodes: &[RgNode<'_>], registry: &RgResourceRegistry) {
        log::info!("╔══════════════════════════════════════════════════════════════════╗");
        log::info!("║              RenderGraph Execution Plan                          ║");
        log::info!("╠══════════════════════════════════════════════════════════════════╣");
        log::info!(
            "║ Total Nodes: {}  |  Hazard Barriers: {}  |  Activations: {}",
            self.steps.len(),
            self.hazard_barrier_count(),
            self.activation_count()
        );
        log::info!("╚══════════════════════════════════════════════════════════════════╝");

        for (order, step) in self.steps.iter().enumerate() {
            let node = &nodes[step.node_index];

            log::info!("");
            log::info!("┌─────────────────────────────────────────────────────────────────┐");
            log::info!("│ [{}/{}] {}: \"{}\"", order + 1, self.steps.len(), node.type_name(), node.name);
            log::info!("├─────────────────────────────────────────────────────────────────┤");

            for access in &node.image_accesses {
                let (base, count) = registry.resolve_image_view(access.view);
                log::info!(
                    "│   {} \"{}\" mips [{}, {}) @ {:?} (stage: {}, access: {})",
                    if access.kind.is_write() { "✏️ " } else { "📖" },
                    registry.image(access.view.image).name,
                    base,
                    base + count,
                    access.layout(),
                    format_pipeline_stage(access.stage),
                    format_access_flags(access.kind.access_flags())
                );
            }
            for access in &node.buffer_accesses {
                let (offset, size) = registry.resolve_buffer_view(access.view);
                log::info!(
                    "│   {} \"{}\" bytes [{}, {}) (stage: {}, access: {})",
                    if access.kind.is_write() { "✏️ " } else { "📖" },
                    registry.buffer(access.view.buffer).name,
                    offset,
                    offset + size,
                    format_pipeline_stage(access.stage),
                    format_access_flags(access.kind.access_flags())
                );
            }

            if step.activations.has_barriers() {
                log::info!("├─────────────────────────────────────────────────────────────────┤");
                log::info!("│ Activations: {}", step.activations.image_barrier_count() + step.activations.buffer_barrier_count());
                log_barriers(&step.activations, registry);
            }
            if step.barriers.has_barriers() {
                log::info!("├─────────────────────────────────────────────────────────────────┤");
                log::info!(
                    "│ Barriers: {} image, {} buffer",
                    step.barriers.image_barrier_count(),
                    step.barriers.buffer_barrier_count()
                );
                log_barriers(&step.barriers, registry);
            } else {
                log::info!("│ No barriers required");
            }

            log::info!("└─────────────────────────────────────────────────────────────────┘");
        }

        if self.export_barriers.has_barriers() {
            log::info!("");
            log::info!("Export barriers:");
            log_barriers(&self.export_barriers, registry);
        }

        log::info!("");
        log::info!("═══════════════════════ End of Execution Plan ═══════════════════════");
    }
}

fn log_barriers(barriers: &RgPassBarriers, registry: &RgResourceRegistry) {
    for barrier in &barriers.image_barriers {
        let layout_change = if barrier.is_layout_transition() {
            format!("{:?} → {:?}", barrier.src.layout, barrier.dst.layout)
        } else {
            format!("{:?} (no layout change)", barrier.src.layout)
        };
        log::info!(
            "│   🔒 Image \"{}\" mips [{}, {}):",
            registry.image(barrier.image).name,
            barrier.base_mip,
            barrier.base_mip + barrier.mip_count
        );
        log::info!("│       Layout: {}", layout_change);
        log::info!(
            "│       Stage:  {} → {}",
            format_pipeline_stage(barrier.src.stage),
            format_pipeline_stage(barrier.dst.stage)
        );
        log::info!(
            "│       Access: {} → {}",
            format_access_flags(barrier.src.access),
            format_access_flags(barrier.dst.access)
        );
        log::info!("│       Aspect: {:?}", barrier.aspect);
    }

    for barrier in &barriers.buffer_barriers {
        log::info!(
            "│   🔒 Buffer \"{}\" bytes [{}, {}):",
            registry.buffer(barrier.buffer).name,
            barrier.offset,
            barrier.offset + barrier.size
        );
        log::info!(
            "│       Stage:  {} → {}",
            format_pipeline_stage(barrier.src.stage),
            format_pipeline_stage(barrier.dst.stage)
        );
        log::info!(
            "│       Access: {} → {}",
            format_access_flags(barrier.src.access),
            format_access_flags(barrier.dst.access)
        );
    }
}

/// 格式化 PipelineStageFlags2 为可读字符串
pub(crate) fn format_pipeline_stage(stage: vk::PipelineStageFlags2) -> String {
    const NAMES: &[(vk::PipelineStageFlags2, &str)] = &[
        (vk::PipelineStageFlags2::TOP_OF_PIPE, "TOP_OF_PIPE"),
        (vk::PipelineStageFlags2::BOTTOM_OF_PIPE, "BOTTOM_OF_PIPE"),
        (vk::PipelineStageFlags2::DRAW_INDIRECT, "DRAW_INDIRECT"),
        (vk::PipelineStageFlags2::VERTEX_INPUT, "VERTEX_INPUT"),
        (vk::PipelineStageFlags2::INDEX_INPUT, "INDEX_INPUT"),
        (vk::PipelineStageFlags2::VERTEX_SHADER, "VERTEX_SHADER"),
        (vk::PipelineStageFlags2::FRAGMENT_SHADER, "FRAGMENT_SHADER"),
        (vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT, "COLOR_ATTACHMENT_OUTPUT"),
        (vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS, "EARLY_FRAGMENT_TESTS"),
        (vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS, "LATE_FRAGMENT_TESTS"),
        (vk::PipelineStageFlags2::COMPUTE_SHADER, "COMPUTE_SHADER"),
        (vk::PipelineStageFlags2::TRANSFER, "TRANSFER"),
        (vk::PipelineStageFlags2::HOST, "HOST"),
        (vk::PipelineStageFlags2::ALL_GRAPHICS, "ALL_GRAPHICS"),
        (vk::PipelineStageFlags2::ALL_COMMANDS, "ALL_COMMANDS"),
    ];

    if stage == vk::PipelineStageFlags2::NONE {
        return "NONE".to_string();
    }
    let stages = NAMES.iter().filter(|(flag, _)| stage.contains(*flag)).map(|(_, name)| *name).collect::<Vec<_>>();
    if stages.is_empty() { format!("{:?}", stage) } else { stages.join(" | ") }
}

/// 格式化 AccessFlags2 为可读字符串
pub(crate) fn format_access_flags(access: vk::AccessFlags2) -> String {
    const NAMES: &[(vk::AccessFlags2, &str)] = &[
        (vk::AccessFlags2::INDIRECT_COMMAND_READ, "INDIRECT_CMD_READ"),
        (vk::AccessFlags2::INDEX_READ, "INDEX_READ"),
        (vk::AccessFlags2::VERTEX_ATTRIBUTE_READ, "VERTEX_ATTR_READ"),
        (vk::AccessFlags2::UNIFORM_READ, "UNIFORM_READ"),
        (vk::AccessFlags2::SHADER_SAMPLED_READ, "SHADER_SAMPLED_READ"),
        (vk::AccessFlags2::SHADER_STORAGE_READ, "STORAGE_READ"),
        (vk::AccessFlags2::SHADER_STORAGE_WRITE, "STORAGE_WRITE"),
        (vk::AccessFlags2::COLOR_ATTACHMENT_READ, "COLOR_ATTACH_READ"),
        (vk::AccessFlags2::COLOR_ATTACHMENT_WRITE, "COLOR_ATTACH_WRITE"),
        (vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ, "DEPTH_ATTACH_READ"),
        (vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE, "DEPTH_ATTACH_WRITE"),
        (vk::AccessFlags2::TRANSFER_READ, "TRANSFER_READ"),
        (vk::AccessFlags2::TRANSFER_WRITE, "TRANSFER_WRITE"),
        (vk::AccessFlags2::HOST_READ, "HOST_READ"),
        (vk::AccessFlags2::MEMORY_READ, "MEMORY_READ"),
        (vk::AccessFlags2::MEMORY_WRITE, "MEMORY_WRITE"),
    ];

    if access == vk::AccessFlags2::NONE {
        return "NONE".to_string();
    }
    let flags = NAMES.iter().filter(|(flag, _)| access.contains(*flag)).map(|(_, name)| *name).collect::<Vec<_>>();
    if flags.is_empty() { format!("{:?}", access) } else { flags.join(" | ") }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_graph::access::{RgAccessKind, RgBufferAccess, RgImageAccess};
    use crate::render_graph::buffer_resource::{RgBufferDesc, RgBufferResource};
    use crate::render_graph::image_resource::{RgImageDesc, RgImageResource};
    use crate::render_graph::node::RgNodeKind;
    use crate::render_graph::pass::{RgPassContext, RgPassExecutor};

    struct Noop;
    impl RgPassExecutor for Noop {
        fn execute(&self, _ctx: &mut RgPassContext<'_>) {}
    }

    fn node(name: &str, images: Vec<RgImageAccess>, buffers: Vec<RgBufferAccess>) -> RgNode<'static> {
        RgNode::new(name, images, buffers, RgNodeKind::Custom(Box::new(Noop)))
    }

    fn compute(kind: RgAccessKind, view: impl Into<crate::render_graph::resource_handle::RgImageView>) -> RgImageAccess {
        RgImageAccess::new(view, kind, vk::PipelineStageFlags2::COMPUTE_SHADER)
    }

    fn no_discard(_: RgTransientKey) -> bool {
        false
    }

    fn storage_image(registry: &mut RgResourceRegistry, name: &str, mips: u32) -> RgImageHandle {
        let desc = RgImageDesc::new_2d(256, 256, vk::Format::R16G16B16A16_SFLOAT, vk::ImageUsageFlags::STORAGE)
            .with_mip_levels(mips);
        registry.register_image(RgImageResource::transient(name, &desc))
    }

    #[test]
    fn test_write_then_read_needs_one_barrier() {
        let mut registry = RgResourceRegistry::new(1);
        let a = storage_image(&mut registry, "A", 1);
        let b = storage_image(&mut registry, "B", 1);
        let nodes = vec![
            node("write A", vec![compute(RgAccessKind::StorageWrite, a)], vec![]),
            node(
                "A to B",
                vec![compute(RgAccessKind::SampledRead, a), compute(RgAccessKind::StorageWrite, b)],
                vec![],
            ),
        ];

        let schedule = RgScheduler::new(&registry, &no_discard).schedule(&nodes);
        assert_eq!(schedule.hazard_barrier_count(), 1);
        let barrier = schedule.steps[1].barriers.image_barriers[0];
        assert_eq!(barrier.image, a);
        assert_eq!(barrier.src.access, vk::AccessFlags2::SHADER_STORAGE_WRITE);
        assert_eq!(barrier.dst.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        // B 只有一次激活
        assert_eq!(schedule.steps[1].activations.image_barriers.len(), 1);
        assert_eq!(schedule.steps[1].activations.image_barriers[0].image, b);
        assert_eq!(schedule.steps[1].activations.image_barriers[0].src.layout, vk::ImageLayout::UNDEFINED);
    }

    #[test]
    fn test_read_after_read_is_free() {
        let mut registry = RgResourceRegistry::new(1);
        let a = storage_image(&mut registry, "A", 1);
        let nodes = vec![
            node("write", vec![compute(RgAccessKind::StorageWrite, a)], vec![]),
            node("read 1", vec![compute(RgAccessKind::SampledRead, a)], vec![]),
            node("read 2", vec![compute(RgAccessKind::SampledRead, a)], vec![]),
        ];

        let schedule = RgScheduler::new(&registry, &no_discard).schedule(&nodes);
        assert_eq!(schedule.hazard_barrier_count(), 1);
        assert!(!schedule.steps[2].barriers.has_barriers());
    }

    #[test]
    fn test_write_after_read_waits_for_readers() {
        let mut registry = RgResourceRegistry::new(1);
        let a = storage_image(&mut registry, "A", 1);
        let nodes = vec![
            node("write", vec![compute(RgAccessKind::StorageWrite, a)], vec![]),
            node("read", vec![compute(RgAccessKind::StorageRead, a)], vec![]),
            node("write again", vec![compute(RgAccessKind::StorageWrite, a)], vec![]),
        ];

        let schedule = RgScheduler::new(&registry, &no_discard).schedule(&nodes);
        let war = schedule.steps[2].barriers.image_barriers[0];
        assert_eq!(war.src.layout, war.dst.layout);
        assert!(war.src.stage.contains(vk::PipelineStageFlags2::COMPUTE_SHADER));
    }

    #[test]
    fn test_mips_are_tracked_independently() {
        let mut registry = RgResourceRegistry::new(1);
        let pyramid = storage_image(&mut registry, "pyramid", 4);
        let mut nodes = vec![node("mip 0", vec![compute(RgAccessKind::StorageWrite, pyramid.mip(0))], vec![])];
        for mip in 1..4 {
            nodes.push(node(
                "downsample",
                vec![
                    compute(RgAccessKind::SampledRead, pyramid.mip(mip - 1)),
                    compute(RgAccessKind::StorageWrite, pyramid.mip(mip)),
                ],
                vec![],
            ));
        }

        let schedule = RgScheduler::new(&registry, &no_discard).schedule(&nodes);
        for step in &schedule.steps[1..] {
            // 只等待上一级 mip，写入的 mip 只有激活
            assert_eq!(step.barriers.image_barrier_count(), 1);
            assert_eq!(step.barriers.image_barriers[0].mip_count, 1);
            assert_eq!(step.activations.image_barrier_count(), 1);
        }
    }

    #[test]
    fn test_adjacent_mip_barriers_merge() {
        let mut registry = RgResourceRegistry::new(1);
        let image = storage_image(&mut registry, "image", 4);
        let nodes = vec![
            node("write", vec![compute(RgAccessKind::StorageWrite, image)], vec![]),
            node("read", vec![compute(RgAccessKind::SampledRead, image)], vec![]),
        ];

        let schedule = RgScheduler::new(&registry, &no_discard).schedule(&nodes);
        assert_eq!(schedule.steps[0].activations.image_barrier_count(), 1);
        assert_eq!(schedule.steps[1].barriers.image_barrier_count(), 1);
        assert_eq!(schedule.steps[1].barriers.image_barriers[0].mip_count, 4);
    }

    #[test]
    fn test_disjoint_buffer_ranges_are_independent() {
        let mut registry = RgResourceRegistry::new(1);
        let buffer = registry.register_buffer(RgBufferResource::transient("counters", &RgBufferDesc::storage(256), false));
        let storage = |view, kind| RgBufferAccess::new(view, kind, vk::PipelineStageFlags2::COMPUTE_SHADER);
        let nodes = vec![
            node("write low", vec![], vec![storage(buffer.range(0, 128), RgAccessKind::StorageWrite)]),
            node("write high", vec![], vec![storage(buffer.range(128, 128), RgAccessKind::StorageWrite)]),
            node("read all", vec![], vec![storage(buffer.full(), RgAccessKind::StorageRead)]),
        ];

        let schedule = RgScheduler::new(&registry, &no_discard).schedule(&nodes);
        assert!(!schedule.steps[1].barriers.has_barriers());
        // 两段状态相同，合并为一个 barrier
        let barriers = &schedule.steps[2].barriers.buffer_barriers;
        assert_eq!(barriers.len(), 1);
        assert_eq!((barriers[0].offset, barriers[0].size), (0, 256));
    }

    #[test]
    fn test_discard_sync_for_aliased_memory() {
        let mut registry = RgResourceRegistry::new(1);
        let a = storage_image(&mut registry, "A", 1);
        let discard_all = |_: RgTransientKey| true;
        let nodes = vec![node("write", vec![compute(RgAccessKind::StorageWrite, a)], vec![])];

        let schedule = RgScheduler::new(&registry, &discard_all).schedule(&nodes);
        let activation = schedule.steps[0].activations.image_barriers[0];
        assert_eq!(activation.src.stage, vk::PipelineStageFlags2::ALL_COMMANDS);
        assert_eq!(activation.src.access, vk::AccessFlags2::MEMORY_WRITE);
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(
            format_pipeline_stage(vk::PipelineStageFlags2::COMPUTE_SHADER | vk::PipelineStageFlags2::TRANSFER),
            "COMPUTE_SHADER | TRANSFER"
        );
        assert_eq!(format_access_flags(vk::AccessFlags2::NONE), "NONE");
    }
}
