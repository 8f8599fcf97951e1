use std::sync::atomic::{AtomicU64, Ordering};

/// GPU 完成进度，语义与 timeline semaphore 一致：值单调递增
pub trait GfxFence: Send + Sync {
    /// GPU 已经完成的最大 signal 值
    fn completed_value(&self) -> u64;
}

/// 由 CPU 手动推进的 timeline fence
///
/// headless 后端与测试使用，真实后端用 `vkGetSemaphoreCounterValue` 实现 `GfxFence`。
#[derive(Debug, Default)]
pub struct GfxManualFence {
    value: AtomicU64,
}
impl GfxManualFence {
    pub fn new(initial_value: u64) -> Self {
        Self {
            value: AtomicU64::new(initial_value),
        }
    }

    /// 推进到 `value`，不允许回退
    pub fn signal(&self, value: u64) {
        let prev = self.value.fetch_max(value, Ordering::AcqRel);
        debug_assert!(prev <= value, "timeline fence can not go backwards: {prev} -> {value}");
    }
}
impl GfxFence for GfxManualFence {
    #[inline]
    fn completed_value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_fence_signal() {
        let fence = GfxManualFence::new(1);
        assert_eq!(fence.completed_value(), 1);
        fence.signal(5);
        assert_eq!(fence.completed_value(), 5);
    }
}
