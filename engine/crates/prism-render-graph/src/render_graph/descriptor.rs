//! Descriptor set 的 CPU 侧状态
//!
//! `RgDescriptorSetState` 保存有序的 binding 列表。执行时 graph 把每个 binding
//! 解析为物理资源，只把和上一次写入不同的 binding 提交给 GPU 侧 set。
//! 绑定本身就是访问声明：采样 image 被登记为 `SampledRead`，可写的 storage 资源被登记为
//! `StorageReadWrite`，stage 来自 set 的 shader 可见性。

use ash::vk;
use prism_gfx::commands::recorder::{GfxCommandRecorder, GfxDescriptorResource, GfxDescriptorWrite};
use prism_gfx::resources::handles::{GfxDescriptorSetHandle, GfxSamplerHandle};
use prism_render_interface::frame_counter::FrameCounter;

use crate::render_graph::access::{RgAccessKind, RgBufferAccess, RgImageAccess, shader_stages_to_pipeline_stages};
use crate::render_graph::resource_handle::{RgBufferView, RgImageView};

/// descriptor set 中的一个 binding
#[derive(Clone, Debug, PartialEq)]
pub enum RgBinding {
    SampledImage(RgImageView),
    StorageImage { view: RgImageView, write: bool },
    UniformBuffer(RgBufferView),
    StorageBuffer { view: RgBufferView, write: bool },
    Sampler(GfxSamplerHandle),
    /// inline uniform 数据
    Constants(Vec<u8>),
}

impl RgBinding {
    /// 绑定隐含的访问类型；sampler 与常量不访问 graph 资源
    pub fn access_kind(&self) -> Option<RgAccessKind> {
        match self {
            Self::SampledImage(_) => Some(RgAccessKind::SampledRead),
            Self::StorageImage { write: false, .. } | Self::StorageBuffer { write: false, .. } => {
                Some(RgAccessKind::StorageRead)
            }
            Self::StorageImage { write: true, .. } | Self::StorageBuffer { write: true, .. } => {
                Some(RgAccessKind::StorageReadWrite)
            }
            Self::UniformBuffer(_) => Some(RgAccessKind::UniformRead),
            Self::Sampler(_) | Self::Constants(_) => None,
        }
    }
}

/// 按 binding 类型分派的访问者
pub trait RgBindingVisitor {
    fn visit_image(&mut self, _slot: u32, _view: RgImageView, _kind: RgAccessKind) {}
    fn visit_buffer(&mut self, _slot: u32, _view: RgBufferView, _kind: RgAccessKind) {}
    fn visit_sampler(&mut self, _slot: u32, _sampler: GfxSamplerHandle) {}
    fn visit_constants(&mut self, _slot: u32, _data: &[u8]) {}
}

/// 把 binding 收集为节点的访问声明
pub(crate) struct RgAccessCollector<'v> {
    pub stage: vk::PipelineStageFlags2,
    pub image_accesses: &'v mut Vec<RgImageAccess>,
    pub buffer_accesses: &'v mut Vec<RgBufferAccess>,
}

impl RgBindingVisitor for RgAccessCollector<'_> {
    fn visit_image(&mut self, _slot: u32, view: RgImageView, kind: RgAccessKind) {
        self.image_accesses.push(RgImageAccess::new(view, kind, self.stage));
    }

    fn visit_buffer(&mut self, _slot: u32, view: RgBufferView, kind: RgAccessKind) {
        self.buffer_accesses.push(RgBufferAccess::new(view, kind, self.stage));
    }
}

/// 每个 frame in flight 一份 GPU 侧 set，避免改写仍在使用中的 set
#[derive(Default)]
struct RgGpuSetSlot {
    set: Option<GfxDescriptorSetHandle>,
    /// 分配 set 时的 binding 数量，变化后需要重新分配
    binding_count: u32,
    last_written: Vec<Option<GfxDescriptorResource>>,
}

/// descriptor set 的 CPU 侧状态
///
/// 可以每次 dispatch 临时创建（`RgSetRef::Transient`），
/// 也可以由调用方跨帧持有（`RgSetRef::Persistent`），后者只会重写变化过的 binding。
pub struct RgDescriptorSetState {
    name: String,
    stages: vk::ShaderStageFlags,
    slots: Vec<Option<RgBinding>>,
    dirty: bool,
    gpu_sets: Vec<RgGpuSetSlot>,
}

// new & init
impl RgDescriptorSetState {
    pub fn new(name: impl Into<String>, stages: vk::ShaderStageFlags) -> Self {
        Self {
            name: name.into(),
            stages,
            slots: Vec::new(),
            dirty: true,
            gpu_sets: (0..FrameCounter::fif_count()).map(|_| RgGpuSetSlot::default()).collect(),
        }
    }
}

// builder
impl RgDescriptorSetState {
    #[inline]
    pub fn with(mut self, slot: u32, binding: RgBinding) -> Self {
        self.set(slot, binding);
        self
    }

    /// 设置一个 binding，内容不变时不会标记 dirty
    pub fn set(&mut self, slot: u32, binding: RgBinding) {
        let slot = slot as usize;
        if self.slots.len() <= slot {
            self.slots.resize(slot + 1, None);
        }
        if self.slots[slot].as_ref() != Some(&binding) {
            self.slots[slot] = Some(binding);
            self.dirty = true;
        }
    }

    /// 清空所有 binding
    pub fn clear(&mut self) {
        if !self.slots.is_empty() {
            self.slots.clear();
            self.dirty = true;
        }
    }
}

// getters
impl RgDescriptorSetState {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn stages(&self) -> vk::ShaderStageFlags {
        self.stages
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub fn binding_count(&self) -> u32 {
        self.slots.len() as u32
    }

    #[inline]
    pub fn binding(&self, slot: u32) -> Option<&RgBinding> {
        self.slots.get(slot as usize).and_then(|b| b.as_ref())
    }

    /// 上一次提交到 GPU 的 set
    #[inline]
    pub fn gpu_set(&self, fif_index: usize) -> Option<GfxDescriptorSetHandle> {
        self.gpu_sets.get(fif_index).and_then(|slot| slot.set)
    }
}

// tools
impl RgDescriptorSetState {
    pub fn visit(&self, visitor: &mut dyn RgBindingVisitor) {
        for (slot, binding) in self.slots.iter().enumerate() {
            let Some(binding) = binding else {
                continue;
            };
            let slot = slot as u32;
            match binding {
                RgBinding::SampledImage(view) | RgBinding::StorageImage { view, .. } => {
                    visitor.visit_image(slot, *view, binding.access_kind().unwrap_or(RgAccessKind::SampledRead));
                }
                RgBinding::UniformBuffer(view) | RgBinding::StorageBuffer { view, .. } => {
                    visitor.visit_buffer(slot, *view, binding.access_kind().unwrap_or(RgAccessKind::UniformRead));
                }
                RgBinding::Sampler(sampler) => visitor.visit_sampler(slot, *sampler),
                RgBinding::Constants(data) => visitor.visit_constants(slot, data),
            }
        }
    }

    /// 把 binding 登记为访问声明
    pub(crate) fn collect_accesses(
        &self,
        image_accesses: &mut Vec<RgImageAccess>,
        buffer_accesses: &mut Vec<RgBufferAccess>,
    ) {
        let mut collector = RgAccessCollector {
            stage: shader_stages_to_pipeline_stages(self.stages),
            image_accesses,
            buffer_accesses,
        };
        self.visit(&mut collector);
    }

    /// 解析 binding 并写入 GPU 侧 set
    ///
    /// - `acquire`: 该 frame slot 还没有 GPU 侧 set，或者 binding 数量变了时用来分配；
    ///   第三个参数是需要释放的旧 set
    /// - `resolve`: 把 binding 解析为物理资源
    ///
    /// 只有和上一次写入不同的 binding 会被提交。
    pub(crate) fn flush(
        &mut self,
        fif_index: usize,
        recorder: &mut dyn GfxCommandRecorder,
        acquire: impl FnOnce(&str, u32, Option<GfxDescriptorSetHandle>) -> anyhow::Result<GfxDescriptorSetHandle>,
        resolve: impl Fn(&RgBinding) -> GfxDescriptorResource,
    ) -> anyhow::Result<GfxDescriptorSetHandle> {
        let binding_count = self.binding_count();
        let slot_index = fif_index % self.gpu_sets.len();
        let gpu_slot = &mut self.gpu_sets[slot_index];
        let set = match gpu_slot.set {
            Some(set) if gpu_slot.binding_count == binding_count => set,
            stale => {
                if stale.is_some() {
                    log::debug!(
                        "descriptor set \"{}\": binding count {} -> {}, reallocating",
                        self.name,
                        gpu_slot.binding_count,
                        binding_count
                    );
                }
                let set = acquire(&self.name, binding_count, stale)?;
                gpu_slot.set = Some(set);
                gpu_slot.binding_count = binding_count;
                gpu_slot.last_written.clear();
                set
            }
        };

        let resolved: Vec<Option<GfxDescriptorResource>> =
            self.slots.iter().map(|b| b.as_ref().map(&resolve)).collect();

        let writes: Vec<GfxDescriptorWrite> = resolved
            .iter()
            .enumerate()
            .filter(|(slot, res)| res.is_some() && gpu_slot.last_written.get(*slot) != Some(*res))
            .filter_map(|(slot, res)| {
                res.clone().map(|resource| GfxDescriptorWrite {
                    binding: slot as u32,
                    resource,
                })
            })
            .collect();

        if !writes.is_empty() {
            log::trace!("descriptor set \"{}\": {} writes", self.name, writes.len());
            recorder.update_descriptor_set(set, &writes);
        }
        gpu_slot.last_written = resolved;
        self.dirty = false;

        Ok(set)
    }
}

/// dispatch 使用的 descriptor set：临时创建或跨帧持有
pub enum RgSetRef<'a> {
    Transient(RgDescriptorSetState),
    Persistent(&'a mut RgDescriptorSetState),
}

impl RgSetRef<'_> {
    #[inline]
    pub fn state(&self) -> &RgDescriptorSetState {
        match self {
            Self::Transient(state) => state,
            Self::Persistent(state) => state,
        }
    }

    #[inline]
    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Persistent(_))
    }
}

impl From<RgDescriptorSetState> for RgSetRef<'_> {
    fn from(state: RgDescriptorSetState) -> Self {
        Self::Transient(state)
    }
}

impl<'a> From<&'a mut RgDescriptorSetState> for RgSetRef<'a> {
    fn from(state: &'a mut RgDescriptorSetState) -> Self {
        Self::Persistent(state)
    }
}
