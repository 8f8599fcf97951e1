//! transient 资源池
//!
//! 跨帧持有 transient heap 以及放置在其中的 image / buffer。
//! 每个 frame in flight 槽位一块 heap，同一槽位的上一帧一定已经在 GPU 上执行完毕，
//! 因此可以直接复用其中的物理资源；不再需要的资源延迟 `fif_count` 帧后销毁。

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, bail};
use ash::vk;
use prism_gfx::resources::buffer::{GfxBuffer, GfxBufferDesc};
use prism_gfx::resources::factory::{GfxMemoryUsage, GfxResourceFactory};
use prism_gfx::resources::handles::{GfxBufferHandle, GfxDescriptorSetHandle, GfxHeapHandle, GfxImageHandle};
use prism_gfx::resources::image::{GfxImage, GfxImageDesc};
use prism_render_interface::frame_counter::FrameCounter;

use crate::render_graph::transient_allocator::{
    RgAliasingMode, RgAllocationPlan, RgAllocationRequest, RgResourceLifetime, RgTransientAllocator, RgTransientKey,
};

/// 一个需要物理内存的 transient image
#[derive(Clone, Debug)]
pub struct RgTransientImageRequest {
    /// graph 内的资源 id
    pub id: u32,
    pub name: String,
    pub desc: GfxImageDesc,
    pub lifetime: RgResourceLifetime,
}

#[derive(Clone, Debug)]
pub struct RgTransientBufferRequest {
    pub id: u32,
    pub name: String,
    pub desc: GfxBufferDesc,
    pub lifetime: RgResourceLifetime,
}

#[derive(Clone, Debug, Default)]
pub struct RgTransientRequests {
    pub images: Vec<RgTransientImageRequest>,
    pub buffers: Vec<RgTransientBufferRequest>,
}

impl RgTransientRequests {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.buffers.is_empty()
    }
}

/// 本次执行使用的物理资源
pub struct RgTransientBacking {
    pub plan: RgAllocationPlan,
    /// key 为 graph 内的资源 id
    pub images: HashMap<u32, Arc<GfxImage>>,
    pub buffers: HashMap<u32, Arc<GfxBuffer>>,
    /// heap 在本次之前已经被使用过，其中的内存可能还留着其他资源的写入
    pub heap_reused: bool,
}

impl RgTransientBacking {
    /// 第一次使用前是否需要等待这段内存之前的使用者
    #[inline]
    pub fn needs_discard_sync(&self, key: RgTransientKey) -> bool {
        self.heap_reused || self.plan.placement(key).is_some_and(|p| p.aliased)
    }
}

/// 资源池统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RgPoolStats {
    /// 所有槽位 heap 的总大小
    pub heap_size: vk::DeviceSize,
    pub live_images: usize,
    pub live_buffers: usize,
    pub created_this_frame: usize,
    pub reused_this_frame: usize,
    pub bytes_requested: vk::DeviceSize,
    pub bytes_saved_by_aliasing: vk::DeviceSize,
    pub pending_destroy: usize,
}

struct CachedImage {
    image: Arc<GfxImage>,
    offset: vk::DeviceSize,
    generation: u64,
}

struct CachedBuffer {
    buffer: Arc<GfxBuffer>,
    offset: vk::DeviceSize,
    generation: u64,
}

enum RetiredResource {
    Image(GfxImageHandle),
    Buffer(GfxBufferHandle),
    Heap(GfxHeapHandle),
}

#[derive(Default)]
struct PoolSlot {
    heap: Option<GfxHeapHandle>,
    heap_size: vk::DeviceSize,
    /// heap 每重建一次加一，旧 heap 上的缓存资源全部失效
    generation: u64,
    images: Vec<CachedImage>,
    buffers: Vec<CachedBuffer>,
}

/// 把槽位中所有缓存的资源（可选包括 heap）放入待销毁队列
fn retire_slot(
    slot: &mut PoolSlot,
    pending: &mut Vec<(RetiredResource, u64)>,
    frame_id: u64,
    include_heap: bool,
) {
    pending.extend(slot.images.drain(..).map(|c| (RetiredResource::Image(c.image.handle()), frame_id)));
    pending.extend(slot.buffers.drain(..).map(|c| (RetiredResource::Buffer(c.buffer.handle()), frame_id)));
    if include_heap {
        if let Some(heap) = slot.heap.take() {
            pending.push((RetiredResource::Heap(heap), frame_id));
        }
        slot.heap_size = 0;
    }
}

/// transient 资源池
///
/// 由调用方持有，跨帧复用。
///
/// # Destroy
///
/// 需要手动调用 `destroy` 方法来释放资源。
pub struct RgTransientPool {
    slots: Vec<PoolSlot>,
    heap_alignment: vk::DeviceSize,

    /// (resource, 退休时的 frame id)
    pending_destroy: Vec<(RetiredResource, u64)>,

    free_descriptor_sets: Vec<(u32, GfxDescriptorSetHandle)>,
    /// (binding count, set, 使用时的 frame id)
    used_descriptor_sets: Vec<(u32, GfxDescriptorSetHandle, u64)>,

    current_frame: u64,
    last_stats: RgPoolStats,

    #[cfg(debug_assertions)]
    destroyed: bool,
}

// new & init
impl RgTransientPool {
    pub fn new(heap_alignment: vk::DeviceSize) -> Self {
        assert!(heap_alignment.is_power_of_two(), "heap alignment must be a power of two");
        Self {
            slots: (0..FrameCounter::fif_count()).map(|_| PoolSlot::default()).collect(),
            heap_alignment,
            pending_destroy: Vec::new(),
            free_descriptor_sets: Vec::new(),
            used_descriptor_sets: Vec::new(),
            current_frame: 0,
            last_stats: RgPoolStats::default(),
            #[cfg(debug_assertions)]
            destroyed: false,
        }
    }
}

// getters
impl RgTransientPool {
    #[inline]
    pub fn last_stats(&self) -> &RgPoolStats {
        &self.last_stats
    }

    #[inline]
    pub fn heap_alignment(&self) -> vk::DeviceSize {
        self.heap_alignment
    }

    /// 指定槽位的 heap
    #[inline]
    pub fn heap(&self, fif_index: usize) -> Option<GfxHeapHandle> {
        self.slots.get(fif_index).and_then(|slot| slot.heap)
    }
}

// update
impl RgTransientPool {
    /// 为本次执行的 transient 资源准备物理内存
    ///
    /// 布局由 `RgTransientAllocator` 决定；heap 不够大时重建，
    /// 与上一次使用同一槽位时描述与位置都一致的资源直接复用。
    pub fn prepare(
        &mut self,
        factory: &mut dyn GfxResourceFactory,
        frame_counter: &FrameCounter,
        requests: &RgTransientRequests,
        mode: RgAliasingMode,
    ) -> anyhow::Result<RgTransientBacking> {
        let frame_id = frame_counter.frame_id();
        self.current_frame = frame_id;
        self.collect_garbage(factory, frame_counter);

        let allocation_requests = requests
            .images
            .iter()
            .map(|r| {
                let req = factory.image_memory_requirements(&r.desc);
                RgAllocationRequest {
                    key: RgTransientKey::Image(r.id),
                    size: req.size,
                    alignment: req.alignment,
                    lifetime: r.lifetime,
                }
            })
            .chain(requests.buffers.iter().map(|r| {
                let req = factory.buffer_memory_requirements(&r.desc);
                RgAllocationRequest {
                    key: RgTransientKey::Buffer(r.id),
                    size: req.size,
                    alignment: req.alignment,
                    lifetime: r.lifetime,
                }
            }))
            .collect::<Vec<_>>();
        let plan = RgTransientAllocator::new(mode, self.heap_alignment).allocate(&allocation_requests);

        let slot_index = frame_counter.fif_index();
        let slot = &mut self.slots[slot_index];
        let mut heap_reused = true;
        if plan.heap_size > 0 && (slot.heap.is_none() || slot.heap_size < plan.heap_size) {
            let new_size = plan.heap_size.div_ceil(self.heap_alignment) * self.heap_alignment;
            if slot.heap.is_some() {
                log::warn!(
                    "render graph transient heap #{} grows from {} to {} bytes",
                    slot_index,
                    slot.heap_size,
                    new_size
                );
            }
            retire_slot(slot, &mut self.pending_destroy, frame_id, true);

            let heap = factory
                .create_heap(&format!("rg-transient-heap-{slot_index}"), new_size)
                .with_context(|| format!("failed to create transient heap of {new_size} bytes"))?;
            slot.heap = Some(heap);
            slot.heap_size = new_size;
            slot.generation += 1;
            heap_reused = false;
        }

        let mut stats = RgPoolStats {
            bytes_requested: plan.total_requested,
            bytes_saved_by_aliasing: plan.bytes_saved(),
            ..Default::default()
        };
        let mut images = HashMap::with_capacity(requests.images.len());
        let mut buffers = HashMap::with_capacity(requests.buffers.len());

        if !requests.is_empty() {
            let Some(heap) = slot.heap else {
                bail!("transient heap is missing for {} resources", allocation_requests.len());
            };
            let generation = slot.generation;

            // image
            let mut claimed = vec![false; slot.images.len()];
            let mut fresh = Vec::new();
            for request in &requests.images {
                let offset = plan.offset_of(RgTransientKey::Image(request.id)).unwrap_or_default();
                let cached = slot.images.iter().enumerate().position(|(i, c)| {
                    !claimed[i] && c.generation == generation && c.offset == offset && *c.image.desc() == request.desc
                });
                let image = match cached {
                    Some(i) => {
                        claimed[i] = true;
                        stats.reused_this_frame += 1;
                        slot.images[i].image.clone()
                    }
                    None => {
                        let image = factory
                            .create_image(&request.name, &request.desc, GfxMemoryUsage::Placed { heap, offset })
                            .with_context(|| format!("failed to create transient image \"{}\"", request.name))?;
                        stats.created_this_frame += 1;
                        fresh.push(CachedImage {
                            image: image.clone(),
                            offset,
                            generation,
                        });
                        image
                    }
                };
                images.insert(request.id, image);
            }
            let mut index = 0;
            let pending = &mut self.pending_destroy;
            slot.images.retain(|c| {
                let keep = claimed[index];
                index += 1;
                if !keep {
                    pending.push((RetiredResource::Image(c.image.handle()), frame_id));
                }
                keep
            });
            slot.images.extend(fresh);

            // buffer
            let mut claimed = vec![false; slot.buffers.len()];
            let mut fresh = Vec::new();
            for request in &requests.buffers {
                let offset = plan.offset_of(RgTransientKey::Buffer(request.id)).unwrap_or_default();
                let cached = slot.buffers.iter().enumerate().position(|(i, c)| {
                    !claimed[i] && c.generation == generation && c.offset == offset && *c.buffer.desc() == request.desc
                });
                let buffer = match cached {
                    Some(i) => {
                        claimed[i] = true;
                        stats.reused_this_frame += 1;
                        slot.buffers[i].buffer.clone()
                    }
                    None => {
                        let buffer = factory
                            .create_buffer(&request.name, &request.desc, GfxMemoryUsage::Placed { heap, offset })
                            .with_context(|| format!("failed to create transient buffer \"{}\"", request.name))?;
                        stats.created_this_frame += 1;
                        fresh.push(CachedBuffer {
                            buffer: buffer.clone(),
                            offset,
                            generation,
                        });
                        buffer
                    }
                };
                buffers.insert(request.id, buffer);
            }
            let mut index = 0;
            slot.buffers.retain(|c| {
                let keep = claimed[index];
                index += 1;
                if !keep {
                    pending.push((RetiredResource::Buffer(c.buffer.handle()), frame_id));
                }
                keep
            });
            slot.buffers.extend(fresh);
        }

        stats.heap_size = self.slots.iter().map(|s| s.heap_size).sum();
        stats.live_images = self.slots.iter().map(|s| s.images.len()).sum();
        stats.live_buffers = self.slots.iter().map(|s| s.buffers.len()).sum();
        stats.pending_destroy = self.pending_destroy.len();
        self.last_stats = stats;

        Ok(RgTransientBacking {
            plan,
            images,
            buffers,
            heap_reused,
        })
    }

    /// 分配一个本帧使用的 descriptor set，`fif_count` 帧之后回收
    pub fn acquire_descriptor_set(
        &mut self,
        factory: &mut dyn GfxResourceFactory,
        name: &str,
        binding_count: u32,
    ) -> anyhow::Result<GfxDescriptorSetHandle> {
        let set = match self.free_descriptor_sets.iter().position(|(count, _)| *count == binding_count) {
            Some(index) => self.free_descriptor_sets.swap_remove(index).1,
            None => factory
                .create_descriptor_set(name, binding_count)
                .with_context(|| format!("failed to allocate descriptor set \"{name}\""))?,
        };
        self.used_descriptor_sets.push((binding_count, set, self.current_frame));
        Ok(set)
    }

    /// 销毁已经退休的资源，回收 descriptor set
    fn collect_garbage(&mut self, factory: &mut dyn GfxResourceFactory, frame_counter: &FrameCounter) {
        let mut destroyed = 0;
        self.pending_destroy.retain(|(resource, frame_id)| {
            if !frame_counter.is_retired(*frame_id) {
                return true;
            }
            match resource {
                RetiredResource::Image(image) => factory.destroy_image(*image),
                RetiredResource::Buffer(buffer) => factory.destroy_buffer(*buffer),
                RetiredResource::Heap(heap) => factory.destroy_heap(*heap),
            }
            destroyed += 1;
            false
        });
        if destroyed > 0 {
            log::debug!("render graph transient pool: destroyed {destroyed} retired resources");
        }

        let free = &mut self.free_descriptor_sets;
        self.used_descriptor_sets.retain(|(count, set, frame_id)| {
            let retired = frame_counter.is_retired(*frame_id);
            if retired {
                free.push((*count, *set));
            }
            !retired
        });
    }
}

// destroy
impl RgTransientPool {
    pub fn destroy(mut self, factory: &mut dyn GfxResourceFactory) {
        for slot in &mut self.slots {
            retire_slot(slot, &mut self.pending_destroy, 0, true);
        }
        for (resource, _) in self.pending_destroy.drain(..) {
            match resource {
                RetiredResource::Image(image) => factory.destroy_image(image),
                RetiredResource::Buffer(buffer) => factory.destroy_buffer(buffer),
                RetiredResource::Heap(heap) => factory.destroy_heap(heap),
            }
        }
        let used = self.used_descriptor_sets.drain(..).map(|(_, set, _)| set);
        for set in self.free_descriptor_sets.drain(..).map(|(_, set)| set).chain(used) {
            factory.destroy_descriptor_set(set);
        }

        #[cfg(debug_assertions)]
        {
            self.destroyed = true;
        }
    }
}
impl Drop for RgTransientPool {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        debug_assert!(
            self.destroyed || std::thread::panicking(),
            "RgTransientPool must be destroyed manually before drop."
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_gfx::headless::HeadlessDevice;

    fn image_request(id: u32, first: usize, last: usize) -> RgTransientImageRequest {
        RgTransientImageRequest {
            id,
            name: format!("transient-{id}"),
            desc: GfxImageDesc::new_2d(256, 256, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::STORAGE),
            lifetime: RgResourceLifetime::new(first, last),
        }
    }

    fn requests() -> RgTransientRequests {
        RgTransientRequests {
            images: vec![image_request(0, 0, 2), image_request(1, 3, 5)],
            buffers: Vec::new(),
        }
    }

    #[test]
    fn test_pool_aliases_placed_images() {
        let mut device = HeadlessDevice::new();
        let mut pool = RgTransientPool::new(256);
        let frame_counter = FrameCounter::new(0);

        let backing = pool.prepare(&mut device, &frame_counter, &requests(), RgAliasingMode::Enabled).unwrap();
        let a = device.image_placement(backing.images[&0].handle()).unwrap();
        let b = device.image_placement(backing.images[&1].handle()).unwrap();
        assert_eq!(a, b);
        assert!(backing.needs_discard_sync(RgTransientKey::Image(1)));
        assert!(!backing.needs_discard_sync(RgTransientKey::Image(0)));

        pool.destroy(&mut device);
        assert_eq!(device.live_image_count(), 0);
        assert_eq!(device.live_heap_count(), 0);
    }

    #[test]
    fn test_pool_without_aliasing() {
        let mut device = HeadlessDevice::new();
        let mut pool = RgTransientPool::new(256);
        let frame_counter = FrameCounter::new(0);

        let backing = pool.prepare(&mut device, &frame_counter, &requests(), RgAliasingMode::Disabled).unwrap();
        let (_, a) = device.image_placement(backing.images[&0].handle()).unwrap();
        let (_, b) = device.image_placement(backing.images[&1].handle()).unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.last_stats().bytes_saved_by_aliasing, 0);

        pool.destroy(&mut device);
    }

    #[test]
    fn test_resources_are_reused_by_the_same_slot() {
        let mut device = HeadlessDevice::new();
        let mut pool = RgTransientPool::new(256);
        let mut frame_counter = FrameCounter::new(0);

        let first = pool.prepare(&mut device, &frame_counter, &requests(), RgAliasingMode::Enabled).unwrap();
        assert_eq!(pool.last_stats().created_this_frame, 2);
        for _ in 0..FrameCounter::fif_count() {
            frame_counter.next_frame();
        }

        let again = pool.prepare(&mut device, &frame_counter, &requests(), RgAliasingMode::Enabled).unwrap();
        assert_eq!(pool.last_stats().created_this_frame, 0);
        assert_eq!(pool.last_stats().reused_this_frame, 2);
        assert!(again.heap_reused);
        assert_eq!(first.images[&0].handle(), again.images[&0].handle());

        pool.destroy(&mut device);
    }

    #[test]
    fn test_heap_growth_retires_old_heap() {
        let mut device = HeadlessDevice::new();
        let mut pool = RgTransientPool::new(256);
        let mut frame_counter = FrameCounter::new(0);

        let small = RgTransientRequests {
            images: vec![image_request(0, 0, 0)],
            buffers: Vec::new(),
        };
        pool.prepare(&mut device, &frame_counter, &small, RgAliasingMode::Enabled).unwrap();
        let old_heap = pool.heap(0).unwrap();

        for _ in 0..FrameCounter::fif_count() {
            frame_counter.next_frame();
        }
        // 两个资源同时存活，heap 需要翻倍
        let large = RgTransientRequests {
            images: vec![image_request(0, 0, 1), image_request(1, 0, 1)],
            buffers: Vec::new(),
        };
        let backing = pool.prepare(&mut device, &frame_counter, &large, RgAliasingMode::Enabled).unwrap();
        assert!(!backing.heap_reused);
        assert_ne!(pool.heap(0), Some(old_heap));
        // 旧 heap 还在等待销毁
        assert_eq!(device.heap_size(old_heap), Some(256 * 256 * 4));

        for _ in 0..FrameCounter::fif_count() {
            frame_counter.next_frame();
        }
        pool.prepare(&mut device, &frame_counter, &large, RgAliasingMode::Enabled).unwrap();
        assert_eq!(device.heap_size(old_heap), None);

        pool.destroy(&mut device);
        assert_eq!(device.allocated_bytes(), 0);
    }

    #[test]
    fn test_factory_failure_propagates() {
        let mut device = HeadlessDevice::new().with_memory_budget(1024);
        let mut pool = RgTransientPool::new(256);
        let frame_counter = FrameCounter::new(0);

        let result = pool.prepare(&mut device, &frame_counter, &requests(), RgAliasingMode::Enabled);
        let err = result.err().unwrap();
        assert!(format!("{err:#}").contains("transient heap"));

        pool.destroy(&mut device);
    }

    #[test]
    fn test_descriptor_sets_are_recycled_after_fif_frames() {
        let mut device = HeadlessDevice::new();
        let mut pool = RgTransientPool::new(256);
        let mut frame_counter = FrameCounter::new(0);
        let empty = RgTransientRequests::default();

        pool.prepare(&mut device, &frame_counter, &empty, RgAliasingMode::Enabled).unwrap();
        let a = pool.acquire_descriptor_set(&mut device, "blur", 2).unwrap();
        let b = pool.acquire_descriptor_set(&mut device, "blur", 2).unwrap();
        assert_ne!(a, b);

        for _ in 0..FrameCounter::fif_count() {
            frame_counter.next_frame();
        }
        pool.prepare(&mut device, &frame_counter, &empty, RgAliasingMode::Enabled).unwrap();
        let c = pool.acquire_descriptor_set(&mut device, "blur", 2).unwrap();
        assert!(c == a || c == b);
        assert_eq!(device.live_descriptor_set_count(), 2);

        pool.destroy(&mut device);
        assert_eq!(device.live_descriptor_set_count(), 0);
    }
}
