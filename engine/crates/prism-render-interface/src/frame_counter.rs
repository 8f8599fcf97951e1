pub struct FrameCounter {
    /// 当前的帧序号，一直累加
    frame_id: u64,
}
impl Default for FrameCounter {
    fn default() -> Self {
        Self::new(0)
    }
}
// new & init
impl FrameCounter {
    pub fn new(init_frame_id: u64) -> Self {
        Self { frame_id: init_frame_id }
    }
}
// update
impl FrameCounter {
    #[inline]
    pub fn next_frame(&mut self) {
        self.frame_id = self.frame_id.wrapping_add(1);
    }
}
// getters
impl FrameCounter {
    const FIF_COUNT: usize = 3;
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }
    #[inline]
    pub const fn fif_count() -> usize {
        Self::FIF_COUNT
    }
    /// 当前帧使用的 in-flight 槽位
    #[inline]
    pub fn fif_index(&self) -> usize {
        self.frame_id as usize % Self::FIF_COUNT
    }
    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}{}]", self.frame_id, (b'A' + self.fif_index() as u8) as char)
    }
    /// 在 `frame_id` 帧提交的 GPU 工作，在当前帧是否一定已经结束
    #[inline]
    pub fn is_retired(&self, frame_id: u64) -> bool {
        frame_id + Self::FIF_COUNT as u64 <= self.frame_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retire_after_fif_frames() {
        let mut counter = FrameCounter::new(10);
        assert!(!counter.is_retired(10));
        counter.next_frame();
        counter.next_frame();
        assert!(!counter.is_retired(10));
        counter.next_frame();
        assert!(counter.is_retired(10));
        assert_eq!(counter.frame_name(), "[F13B]");
    }
}
