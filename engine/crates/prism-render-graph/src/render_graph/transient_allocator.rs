//! transient 资源的内存布局
//!
//! 按首次使用的顺序遍历资源，把生命周期已经结束的资源归还到空闲链表，
//! 再为当前资源挑选位置：先找大小完全一致的空闲块，再找能放下的最小空闲块并切分，
//! 都不行就扩大 heap。生命周期重叠的资源永远不会共享内存。

use ash::vk;

/// 资源被访问的节点区间 `[first_node, last_node]`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgResourceLifetime {
    pub first_node: usize,
    pub last_node: usize,
}

impl RgResourceLifetime {
    #[inline]
    pub fn new(first_node: usize, last_node: usize) -> Self {
        assert!(first_node <= last_node, "lifetime [{first_node}, {last_node}] is reversed");
        Self { first_node, last_node }
    }

    /// 扩展区间以包含 `node`
    #[inline]
    pub fn extend(&mut self, node: usize) {
        self.first_node = self.first_node.min(node);
        self.last_node = self.last_node.max(node);
    }

    #[inline]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.first_node <= other.last_node && other.first_node <= self.last_node
    }
}

/// 是否允许不同资源复用同一段内存
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RgAliasingMode {
    /// 生命周期不重叠的资源共享内存
    Enabled,
    /// 每个资源独占一段内存
    Disabled,
}

impl RgAliasingMode {
    #[inline]
    pub fn from_memory_constrained(memory_constrained: bool) -> Self {
        if memory_constrained { Self::Enabled } else { Self::Disabled }
    }
}

/// 分配请求对应的资源
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RgTransientKey {
    Image(u32),
    Buffer(u32),
}

#[derive(Clone, Copy, Debug)]
pub struct RgAllocationRequest {
    pub key: RgTransientKey,
    pub size: vk::DeviceSize,
    pub alignment: vk::DeviceSize,
    pub lifetime: RgResourceLifetime,
}

/// 一个资源在 heap 中的位置
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgPlacement {
    pub key: RgTransientKey,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
    pub lifetime: RgResourceLifetime,
    /// 这段内存在本次布局中已经被其他资源用过
    pub aliased: bool,
}

/// 布局结果
#[derive(Clone, Debug, Default)]
pub struct RgAllocationPlan {
    /// 与请求的顺序一致
    pub placements: Vec<RgPlacement>,
    pub heap_size: vk::DeviceSize,
    /// 所有请求的大小之和
    pub total_requested: vk::DeviceSize,
}

impl RgAllocationPlan {
    pub fn placement(&self, key: RgTransientKey) -> Option<&RgPlacement> {
        self.placements.iter().find(|p| p.key == key)
    }

    #[inline]
    pub fn offset_of(&self, key: RgTransientKey) -> Option<vk::DeviceSize> {
        self.placement(key).map(|p| p.offset)
    }

    /// 相比每个资源独立分配节省的字节数
    #[inline]
    pub fn bytes_saved(&self) -> vk::DeviceSize {
        self.total_requested.saturating_sub(self.heap_size)
    }
}

#[derive(Clone, Copy, Debug)]
struct FreeBlock {
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
    /// 曾经被资源占用过，而不只是对齐留下的空隙
    used: bool,
}

impl FreeBlock {
    #[inline]
    fn end(&self) -> vk::DeviceSize {
        self.offset + self.size
    }
}

/// 按 offset 排序的空闲链表，相邻块自动合并
#[derive(Default)]
struct FreeList {
    blocks: Vec<FreeBlock>,
}

impl FreeList {
    fn insert(&mut self, block: FreeBlock) {
        if block.size == 0 {
            return;
        }
        let index = self.blocks.partition_point(|b| b.offset < block.offset);
        self.blocks.insert(index, block);

        // 与后一个块合并
        if index + 1 < self.blocks.len() && self.blocks[index].end() == self.blocks[index + 1].offset {
            let next = self.blocks.remove(index + 1);
            self.blocks[index].size += next.size;
            self.blocks[index].used |= next.used;
        }
        // 与前一个块合并
        if index > 0 && self.blocks[index - 1].end() == self.blocks[index].offset {
            let current = self.blocks.remove(index);
            self.blocks[index - 1].size += current.size;
            self.blocks[index - 1].used |= current.used;
        }
    }

    /// 取出 `[start, start + size)`，把块中剩下的部分放回
    fn take(&mut self, index: usize, start: vk::DeviceSize, size: vk::DeviceSize) -> FreeBlock {
        let block = self.blocks.remove(index);
        debug_assert!(block.offset <= start && start + size <= block.end());
        self.insert(FreeBlock {
            offset: block.offset,
            size: start - block.offset,
            used: block.used,
        });
        self.insert(FreeBlock {
            offset: start + size,
            size: block.end() - (start + size),
            used: block.used,
        });
        block
    }
}

#[inline]
fn align_up(value: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    value.div_ceil(alignment) * alignment
}

/// transient 资源的线性 heap 布局器
pub struct RgTransientAllocator {
    mode: RgAliasingMode,
    /// 所有 offset 至少按它对齐
    min_alignment: vk::DeviceSize,
}

// new & init
impl RgTransientAllocator {
    pub fn new(mode: RgAliasingMode, min_alignment: vk::DeviceSize) -> Self {
        Self {
            mode,
            min_alignment: min_alignment.max(1),
        }
    }
}

// getters
impl RgTransientAllocator {
    #[inline]
    pub fn mode(&self) -> RgAliasingMode {
        self.mode
    }
}

// tools
impl RgTransientAllocator {
    pub fn allocate(&self, requests: &[RgAllocationRequest]) -> RgAllocationPlan {
        let mut order: Vec<usize> = (0..requests.len()).collect();
        order.sort_by_key(|&i| (requests[i].lifetime.first_node, i));

        let mut free_list = FreeList::default();
        // (last_node, offset, size)
        let mut active: Vec<(usize, vk::DeviceSize, vk::DeviceSize)> = Vec::new();
        let mut heap_end: vk::DeviceSize = 0;
        let mut placements: Vec<Option<RgPlacement>> = vec![None; requests.len()];

        for index in order {
            let request = &requests[index];
            let alignment = request.alignment.max(self.min_alignment);

            if self.mode == RgAliasingMode::Enabled {
                active.retain(|&(last_node, offset, size)| {
                    let retired = last_node < request.lifetime.first_node;
                    if retired {
                        free_list.insert(FreeBlock { offset, size, used: true });
                    }
                    !retired
                });
            }

            let (offset, aliased) = Self::place(&mut free_list, &mut heap_end, request.size, alignment);
            active.push((request.lifetime.last_node, offset, request.size));
            placements[index] = Some(RgPlacement {
                key: request.key,
                offset,
                size: request.size,
                lifetime: request.lifetime,
                aliased,
            });
        }

        RgAllocationPlan {
            placements: placements.into_iter().flatten().collect(),
            heap_size: heap_end,
            total_requested: requests.iter().map(|r| r.size).sum(),
        }
    }

    /// 返回 `(offset, aliased)`
    fn place(
        free_list: &mut FreeList,
        heap_end: &mut vk::DeviceSize,
        size: vk::DeviceSize,
        alignment: vk::DeviceSize,
    ) -> (vk::DeviceSize, bool) {
        // 1. 大小完全一致且已经对齐的空闲块
        let exact = free_list.blocks.iter().position(|b| b.size == size && b.offset % alignment == 0);
        if let Some(index) = exact {
            let block = free_list.take(index, free_list.blocks[index].offset, size);
            return (block.offset, block.used);
        }

        // 2. 能放下的最小空闲块，切分
        let best_fit = free_list
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| align_up(b.offset, alignment) + size <= b.end())
            .min_by_key(|(_, b)| b.size)
            .map(|(index, _)| index);
        if let Some(index) = best_fit {
            let start = align_up(free_list.blocks[index].offset, alignment);
            let block = free_list.take(index, start, size);
            return (start, block.used);
        }

        // 3. 扩大 heap；末尾的空闲块可以直接并入新的区域
        let tail = free_list.blocks.last().copied().filter(|b| b.end() == *heap_end);
        let (start, aliased) = match tail {
            Some(tail) => {
                free_list.blocks.pop();
                let start = align_up(tail.offset, alignment);
                free_list.insert(FreeBlock {
                    offset: tail.offset,
                    size: start - tail.offset,
                    used: tail.used,
                });
                (start, tail.used)
            }
            None => {
                let start = align_up(*heap_end, alignment);
                free_list.insert(FreeBlock {
                    offset: *heap_end,
                    size: start - *heap_end,
                    used: false,
                });
                (start, false)
            }
        };
        *heap_end = start + size;
        (start, aliased)
    }
}
