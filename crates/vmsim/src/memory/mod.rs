//! 内存管理：帧表、页表、地址转换、缺页处理、LRU 换出与帧加锁
//!
//! 所有状态都在显式构造的 [`MemoryManager`] 中，没有全局变量

mod address;
mod daemon;
mod frame;
mod lock;
mod lru;
mod mmu;
mod page_fault;
mod page_table;
mod stats;

use std::sync::Arc;

use defines::{
    config::{FRAME_COUNT, MAX_VIRTUAL_ADDRESS_BITS, PAGE_ADDRESS_BITS, VIRTUAL_ADDRESS_BITS},
    error::{errno, KResult},
};
use klocks::SpinMutex;
use smallvec::SmallVec;

pub use self::{
    address::{AddressLayout, VirtAddr, VirtPageNum},
    frame::{Frame, FrameId, FrameInner},
    lru::LruTracker,
    mmu::ReferenceKind,
    page_fault::FaultOutcome,
    page_table::{Page, PageInner, PageTable},
    stats::{FaultStats, StatsSnapshot},
};
use crate::{
    swap::SwapDevice,
    task::{Task, TaskId},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryConfig {
    pub virtual_address_bits: u32,
    pub page_address_bits: u32,
    pub frame_count: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            virtual_address_bits: VIRTUAL_ADDRESS_BITS,
            page_address_bits: PAGE_ADDRESS_BITS,
            frame_count: FRAME_COUNT,
        }
    }
}

impl MemoryConfig {
    pub fn validate(&self) -> KResult {
        if self.virtual_address_bits > MAX_VIRTUAL_ADDRESS_BITS
            || self.page_address_bits > self.virtual_address_bits
            || self.frame_count == 0
        {
            return Err(errno::EINVAL);
        }
        Ok(())
    }

    pub fn layout(&self) -> AddressLayout {
        AddressLayout::new(self.virtual_address_bits, self.page_address_bits)
    }
}

pub struct MemoryManager {
    layout: AddressLayout,
    frames: Box<[Frame]>,
    lru: SpinMutex<LruTracker>,
    swap_device: Arc<SwapDevice>,
    /// 当前活跃的地址空间
    active: SpinMutex<Option<TaskId>>,
    stats: FaultStats,
}

impl MemoryManager {
    pub fn new(config: MemoryConfig, swap_device: Arc<SwapDevice>) -> KResult<Self> {
        config.validate()?;
        let layout = config.layout();
        let frames = (0..config.frame_count)
            .map(|id| Frame::new(FrameId(id), layout.page_size()))
            .collect();
        info!(
            "memory manager: {} frames of {} bytes, {} pages per task",
            config.frame_count,
            layout.page_size(),
            layout.page_count()
        );
        Ok(Self {
            layout,
            frames,
            lru: SpinMutex::new(LruTracker::new(config.frame_count)),
            swap_device,
            active: SpinMutex::new(None),
            stats: FaultStats::default(),
        })
    }

    pub fn layout(&self) -> AddressLayout {
        self.layout
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frame(&self, id: FrameId) -> &Frame {
        &self.frames[id.0]
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn swap_device(&self) -> &Arc<SwapDevice> {
        &self.swap_device
    }

    /// 切换当前活跃的地址空间
    pub fn activate(&self, task: TaskId) {
        *self.active.lock() = Some(task);
    }

    pub fn active_task(&self) -> Option<TaskId> {
        *self.active.lock()
    }

    /// 从最久未使用到最近使用的可换出帧
    pub fn lru_order(&self) -> Vec<FrameId> {
        self.lru.lock().iter().collect()
    }

    fn all_frames_occupied(&self) -> bool {
        self.frames.iter().all(Frame::is_occupied)
    }

    /// 帧不再被占用时放回 LRU
    fn track_if_evictable(&self, id: FrameId) {
        let frame = self.frame(id);
        let evictable = frame.lock_inner_with(|inner| inner.page.is_some() && !inner.is_occupied());
        if evictable {
            self.lru.lock().insert_if_absent(id);
        }
    }

    /// 清空帧：解除与页的绑定，清除脏位与访问位，移出 LRU。
    /// 若原先的页仍指向该帧，则将其置为无效。
    ///
    /// 不影响锁计数与预留。对空闲帧调用不产生任何效果
    pub fn free(&self, id: FrameId) {
        let frame = self.frame(id);
        let page = frame.lock_inner_with(|inner| {
            inner.dirty = false;
            inner.referenced = false;
            inner.page.take()
        });
        self.lru.lock().forget(id);
        if let Some(page) = page {
            let invalidated = page.lock_inner_with(|inner| {
                if inner.frame == Some(id) {
                    inner.valid = false;
                    inner.frame = None;
                    true
                } else {
                    false
                }
            });
            trace!("{id} freed, {page} invalidated: {invalidated}");
            page.notify_waiters();
        }
    }

    /// 释放 `task` 的页所占据的所有帧，在任务终止时调用一次
    pub fn deallocate(&self, task: &Task) {
        let owned: SmallVec<[FrameId; 16]> = self
            .frames
            .iter()
            .filter(|frame| {
                frame.lock_inner_with(|inner| {
                    inner
                        .page
                        .as_ref()
                        .is_some_and(|page| page.task_id() == task.id())
                })
            })
            .map(Frame::id)
            .collect();
        for &id in &owned {
            self.free(id);
        }
        debug!("{:?} deallocated, {} frames released", task.id(), owned.len());
    }

    /// 检查全局不变式：
    /// - 有效页所绑定的帧反过来指向该页，即一个帧上至多绑定一个有效页
    /// - 帧上绑定的页要么有效，要么该帧正被预留（缺页处理中）
    /// - 被加锁的帧不会同时被预留；它若绑定着页，该页也指向它。
    ///   属主任务已被回收时，加锁的帧可以不绑定任何页，直到加锁者解锁
    /// - LRU 中没有被占用的帧
    pub fn check_invariants(&self, tasks: &[Arc<Task>]) -> KResult {
        let mut bound = vec![0usize; self.frames.len()];
        for task in tasks {
            for page in task.page_table().iter() {
                let (valid, frame) = page.lock_inner_with(|inner| (inner.valid, inner.frame));
                if !valid {
                    continue;
                }
                let Some(id) = frame.filter(|id| id.0 < self.frames.len()) else {
                    error!("{page} is valid without a frame");
                    return Err(errno::INVARIANT);
                };
                let points_back = self
                    .frame(id)
                    .page()
                    .is_some_and(|bound_page| Arc::ptr_eq(&bound_page, page));
                if !points_back {
                    error!("{page} is valid on {id}, but {id} holds another page");
                    return Err(errno::INVARIANT);
                }
                bound[id.0] += 1;
            }
        }
        if let Some(id) = bound.iter().position(|&count| count > 1) {
            error!("F{id} carries {} valid pages", bound[id]);
            return Err(errno::INVARIANT);
        }
        for frame in self.frames.iter() {
            let inner = frame.lock_inner();
            if inner.lock_count > 0 && inner.reserved.is_some() {
                error!(
                    "{} is locked {} times while reserved by {:?}",
                    frame.id(),
                    inner.lock_count,
                    inner.reserved
                );
                return Err(errno::INVARIANT);
            }
            if let Some(page) = &inner.page {
                if !page.is_valid() && inner.reserved.is_none() {
                    error!("{} holds invalid page {page} without reservation", frame.id());
                    return Err(errno::INVARIANT);
                }
                if inner.lock_count > 0 && page.frame() != Some(frame.id()) {
                    error!("locked {} holds {page}, which is not bound to it", frame.id());
                    return Err(errno::INVARIANT);
                }
            }
        }
        let lru = self.lru.lock();
        if let Some(id) = lru.iter().find(|&id| self.frame(id).is_occupied()) {
            error!("occupied {id} is an eviction candidate");
            return Err(errno::INVARIANT);
        }
        Ok(())
    }
}
