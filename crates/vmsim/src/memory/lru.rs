//! 按最近使用时间排列的候选帧
//!
//! 每个帧有一个单调递增的时间戳作为最近使用标记。`order` 中只有当前可被换出的帧，
//! 按 `(时间戳, 帧号)` 排序，因此时间戳相同时按帧表顺序决出先后。
//!
//! 帧因被占用而移出 `order` 时仍保留其标记，重新变为可换出时回到原来的位置；
//! 只有 [`LruTracker::forget`] 会清掉标记

use std::collections::BTreeSet;

use super::FrameId;

pub struct LruTracker {
    clock: u64,
    order: BTreeSet<(u64, FrameId)>,
    stamps: Box<[Option<u64>]>,
    tracked: Box<[bool]>,
}

impl LruTracker {
    pub fn new(frame_count: usize) -> Self {
        Self {
            clock: 0,
            order: BTreeSet::new(),
            stamps: vec![None; frame_count].into_boxed_slice(),
            tracked: vec![false; frame_count].into_boxed_slice(),
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// 移到最近使用的一端，不在结构中则插入
    pub fn touch(&mut self, frame: FrameId) {
        self.untrack(frame);
        let stamp = self.tick();
        self.stamps[frame.0] = Some(stamp);
        self.order.insert((stamp, frame));
        self.tracked[frame.0] = true;
    }

    /// 只刷新标记而不插入。用于被占用的帧，它回到结构中时会排在最新的位置
    pub fn refresh(&mut self, frame: FrameId) {
        if self.tracked[frame.0] {
            self.touch(frame);
        } else {
            let stamp = self.tick();
            self.stamps[frame.0] = Some(stamp);
        }
    }

    /// 不在结构中则插入。保留有标记的帧回到原位置，否则作为最新
    pub fn insert_if_absent(&mut self, frame: FrameId) {
        if self.tracked[frame.0] {
            return;
        }
        let stamp = match self.stamps[frame.0] {
            Some(stamp) => stamp,
            None => {
                let stamp = self.tick();
                self.stamps[frame.0] = Some(stamp);
                stamp
            }
        };
        self.order.insert((stamp, frame));
        self.tracked[frame.0] = true;
    }

    /// 帧被占用时调用，移出结构但保留标记
    pub fn remove(&mut self, frame: FrameId) {
        self.untrack(frame);
    }

    /// 帧被释放时调用，移出结构并清掉标记
    pub fn forget(&mut self, frame: FrameId) {
        self.untrack(frame);
        self.stamps[frame.0] = None;
    }

    fn untrack(&mut self, frame: FrameId) {
        if core::mem::take(&mut self.tracked[frame.0]) {
            if let Some(stamp) = self.stamps[frame.0] {
                self.order.remove(&(stamp, frame));
            }
        }
    }

    pub fn contains(&self, frame: FrameId) -> bool {
        self.tracked[frame.0]
    }

    /// 从最久未使用到最近使用
    pub fn iter(&self) -> impl Iterator<Item = FrameId> + '_ {
        self.order.iter().map(|&(_, frame)| frame)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// 按最近使用顺序找到第一个可被换出的帧，跳过 `evictable` 返回 false 的帧
    pub fn select_victim(&self, mut evictable: impl FnMut(FrameId) -> bool) -> Option<FrameId> {
        self.iter().find(|&frame| evictable(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::LruTracker;
    use crate::memory::FrameId;

    fn order(lru: &LruTracker) -> Vec<usize> {
        lru.iter().map(|frame| frame.0).collect()
    }

    #[test]
    fn touch_moves_to_newest_end() {
        let mut lru = LruTracker::new(4);
        for i in 0..4 {
            lru.touch(FrameId(i));
        }
        assert_eq!(order(&lru), [0, 1, 2, 3]);
        lru.touch(FrameId(1));
        assert_eq!(order(&lru), [0, 2, 3, 1]);
        assert_eq!(lru.select_victim(|_| true), Some(FrameId(0)));
    }

    #[test]
    fn victim_skips_frames_that_are_not_evictable() {
        let mut lru = LruTracker::new(4);
        for i in 0..4 {
            lru.touch(FrameId(i));
        }
        assert_eq!(
            lru.select_victim(|frame| frame.0 >= 2),
            Some(FrameId(2))
        );
        assert_eq!(lru.select_victim(|_| false), None);
        assert_eq!(LruTracker::new(2).select_victim(|_| true), None);
    }

    #[test]
    fn removed_frame_returns_to_its_old_position() {
        let mut lru = LruTracker::new(4);
        for i in 0..4 {
            lru.touch(FrameId(i));
        }
        lru.remove(FrameId(1));
        assert!(!lru.contains(FrameId(1)));
        assert_eq!(order(&lru), [0, 2, 3]);
        lru.touch(FrameId(0));
        lru.insert_if_absent(FrameId(1));
        assert_eq!(order(&lru), [1, 2, 3, 0]);
        // 已经在结构中时什么也不做
        lru.insert_if_absent(FrameId(1));
        assert_eq!(order(&lru), [1, 2, 3, 0]);
    }

    #[test]
    fn refresh_of_removed_frame_only_updates_marker() {
        let mut lru = LruTracker::new(3);
        for i in 0..3 {
            lru.touch(FrameId(i));
        }
        lru.remove(FrameId(0));
        lru.refresh(FrameId(0));
        assert_eq!(order(&lru), [1, 2]);
        lru.insert_if_absent(FrameId(0));
        assert_eq!(order(&lru), [1, 2, 0]);

        lru.refresh(FrameId(1));
        assert_eq!(order(&lru), [2, 0, 1]);
    }

    #[test]
    fn forget_drops_the_marker() {
        let mut lru = LruTracker::new(3);
        for i in 0..3 {
            lru.touch(FrameId(i));
        }
        lru.forget(FrameId(0));
        lru.forget(FrameId(0));
        assert_eq!(lru.len(), 2);
        lru.insert_if_absent(FrameId(0));
        assert_eq!(order(&lru), [1, 2, 0]);
    }

    #[test]
    fn equal_stamps_break_ties_by_table_order() {
        let mut lru = LruTracker::new(3);
        lru.order.insert((7, FrameId(2)));
        lru.order.insert((7, FrameId(0)));
        lru.tracked[0] = true;
        lru.tracked[2] = true;
        assert_eq!(lru.select_victim(|_| true), Some(FrameId(0)));
    }
}
