use smallvec::SmallVec;

use super::{Frame, FrameId, MemoryManager};

impl MemoryManager {
    /// 回收仍被已终止任务的页占据、且未被占用的帧。返回回收的帧数
    pub fn reclaim_orphan_frames(&self) -> usize {
        let orphans: SmallVec<[FrameId; 16]> = self
            .frames
            .iter()
            .filter(|frame| {
                frame.lock_inner_with(|inner| {
                    !inner.is_occupied() && inner.page.as_ref().is_some_and(|page| page.is_orphan())
                })
            })
            .map(Frame::id)
            .collect();
        for &id in &orphans {
            self.free(id);
        }
        if !orphans.is_empty() {
            debug!("daemon reclaimed {} orphan frames", orphans.len());
        }
        orphans.len()
    }
}
