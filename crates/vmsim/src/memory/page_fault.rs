//! 缺页处理
//!
//! 流程：
//! 1. 把当前线程登记为该页的校验线程，若已有其他线程在处理则等待其结束
//! 2. 页已经有效则直接返回；所有帧都被占用则返回 `NotEnoughMemory`
//! 3. 选帧：先按帧表顺序找空闲帧，没有则按 LRU 找可换出的帧，并为本任务预留
//! 4. 帧是脏的则写回其上的页，等待写回完成
//! 5. 解除被换出页与帧的绑定，换入目标页，等待换入完成
//! 6. 绑定帧与页，解除预留
//!
//! 等待 I/O 之后都要检查线程是否已被杀死，是则回滚并返回。
//! 无论结果如何，最后都清除校验标记、唤醒在该页上等待的线程并让出 CPU

use std::sync::Arc;

use defines::error::{errno, KResult};
use executor::yield_now;

use super::{FrameId, MemoryManager, Page, ReferenceKind};
use crate::{task::TaskId, thread::Thread};

/// 一次缺页处理的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum FaultOutcome {
    /// 页已被换入并绑定
    Success,
    /// 页已经是有效的，没有必要处理缺页
    AlreadyValid,
    /// 没有可用的帧
    NotEnoughMemory,
    /// 处理过程中线程被杀死，已回滚
    Killed,
    /// 交换 I/O 失败
    IoFailed,
    /// 发现了不变式被破坏
    Corrupted,
}

impl FaultOutcome {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    pub fn into_result(self) -> KResult {
        match self {
            Self::Success | Self::AlreadyValid => Ok(()),
            Self::NotEnoughMemory => Err(errno::ENOMEM),
            Self::Killed => Err(errno::KILLED),
            Self::IoFailed => Err(errno::EIO),
            Self::Corrupted => Err(errno::INVARIANT),
        }
    }
}

impl MemoryManager {
    pub async fn handle_fault(
        &self,
        thread: &Thread,
        kind: ReferenceKind,
        page: &Arc<Page>,
    ) -> FaultOutcome {
        if !self.claim_validation(thread, page).await {
            debug!("{:?} killed while waiting for {page}", thread.tid());
            return FaultOutcome::Killed;
        }
        debug!("{:?} faults on {page} ({kind:?})", thread.tid());
        let outcome = self.resolve_fault(thread, kind, page).await;
        self.finish_fault(thread, page, outcome).await
    }

    /// 登记为校验线程。需要等待时若被杀死则返回 false，此时没有登记
    async fn claim_validation(&self, thread: &Thread, page: &Page) -> bool {
        loop {
            let listener = page.listen();
            let claimed = page.lock_inner_with(|inner| {
                if inner.validating.is_none() {
                    inner.validating = Some(thread.tid());
                    true
                } else {
                    false
                }
            });
            if claimed {
                return true;
            }
            listener.await;
            if thread.is_killed() {
                return false;
            }
        }
    }

    async fn resolve_fault(
        &self,
        thread: &Thread,
        kind: ReferenceKind,
        page: &Arc<Page>,
    ) -> FaultOutcome {
        if page.is_valid() {
            return FaultOutcome::AlreadyValid;
        }
        if self.all_frames_occupied() {
            debug!("{page}: every frame is locked or reserved");
            return FaultOutcome::NotEnoughMemory;
        }
        let task = page.task_id();
        let Some(frame_id) = self.reserve_frame(task) else {
            debug!("{page}: no evictable frame");
            return FaultOutcome::NotEnoughMemory;
        };
        let frame = self.frame(frame_id);

        // 写回。写回期间被换出的页仍然有效，可能再次被写脏，因此循环直到帧是干净的
        loop {
            let victim = frame.lock_inner_with(|inner| match &inner.page {
                Some(victim) if inner.dirty => {
                    inner.dirty = false;
                    Some(Arc::clone(victim))
                }
                _ => None,
            });
            let Some(victim) = victim else {
                break;
            };
            debug!("{frame_id}: write back {victim}");
            let request = self.swap_device.submit_swap_write(
                victim.swap(),
                victim.vpn(),
                frame.snapshot(),
                thread.tid(),
            );
            let result = request.wait().await;
            if result.is_err() {
                // 写回失败的页不再恢复
                warn!("{frame_id}: write back of {victim} failed, it stays invalid");
                self.free(frame_id);
                if self.release_reservation(frame_id, task).is_err() {
                    return FaultOutcome::Corrupted;
                }
                return if thread.is_killed() {
                    FaultOutcome::Killed
                } else {
                    FaultOutcome::IoFailed
                };
            }
            if thread.is_killed() {
                debug!("{page}: killed during write back, {frame_id} keeps {victim}");
                return self.abort(frame_id, task, FaultOutcome::Killed);
            }
        }

        // 解除被换出页与帧的绑定
        let victim = frame.lock_inner_with(|inner| {
            inner.dirty = false;
            inner.referenced = false;
            inner.page.take()
        });
        self.lru.lock().forget(frame_id);
        if let Some(victim) = victim {
            victim.lock_inner_with(|inner| {
                if inner.frame == Some(frame_id) {
                    inner.valid = false;
                    inner.frame = None;
                }
            });
            debug!("{frame_id}: evict {victim}");
            victim.notify_waiters();
        }

        // 换入
        let prior = page.lock_inner_with(|inner| inner.frame.replace(frame_id));
        let request = self.swap_device.submit_swap_read(
            page.swap(),
            page.vpn(),
            self.layout.page_size(),
            thread.tid(),
        );
        let result = request.wait().await;
        if thread.is_killed() || result.is_err() {
            page.lock_inner_with(|inner| inner.frame = prior);
            let outcome = if thread.is_killed() {
                debug!("{page}: killed during swap in, rolled back");
                FaultOutcome::Killed
            } else {
                FaultOutcome::IoFailed
            };
            return self.abort(frame_id, task, outcome);
        }
        frame.fill_from(&request.take_buffer());

        let conflict = frame.lock_inner_with(|inner| {
            if inner.page.is_some() {
                return true;
            }
            inner.page = Some(Arc::clone(page));
            inner.referenced = true;
            inner.dirty = kind == ReferenceKind::Write;
            false
        });
        if conflict {
            error!("{frame_id} claimed by another fault while reserved for {page}");
            return FaultOutcome::Corrupted;
        }
        page.lock_inner_with(|inner| inner.valid = true);
        if self.release_reservation(frame_id, task).is_err() {
            return FaultOutcome::Corrupted;
        }
        self.lru.lock().touch(frame_id);
        FaultOutcome::Success
    }

    async fn finish_fault(&self, thread: &Thread, page: &Page, outcome: FaultOutcome) -> FaultOutcome {
        page.lock_inner_with(|inner| {
            debug_assert_eq!(inner.validating, Some(thread.tid()));
            inner.validating = None;
        });
        let woken = page.notify_waiters();
        self.stats.record_fault(outcome.is_success());
        debug!(
            "{page}: fault by {:?} finished with {outcome:?}, {woken} waiters woken, {}",
            thread.tid(),
            self.stats()
        );
        yield_now().await;
        outcome
    }

    /// 为 `task` 预留一个帧并将其移出 LRU。先找空闲帧，再找最久未使用的可换出帧
    fn reserve_frame(&self, task: TaskId) -> Option<FrameId> {
        for frame in self.frames.iter() {
            if frame.page().is_none() && frame.try_reserve(task).is_ok() {
                self.lru.lock().remove(frame.id());
                return Some(frame.id());
            }
        }
        let mut rejected = Vec::new();
        loop {
            let victim = self.lru.lock().select_victim(|id| {
                !rejected.contains(&id) && !self.frame(id).is_occupied()
            })?;
            if self.frame(victim).try_reserve(task).is_ok() {
                self.lru.lock().remove(victim);
                trace!("{task:?} reserves victim {victim}");
                return Some(victim);
            }
            // 选中之后才发现不能预留，换一个
            rejected.push(victim);
        }
    }

    /// 解除预留，帧上仍有页时放回 LRU 并唤醒等待该页的线程
    fn release_reservation(&self, id: FrameId, task: TaskId) -> KResult {
        self.frame(id).unreserve(task)?;
        self.track_if_evictable(id);
        if let Some(page) = self.frame(id).page() {
            page.notify_waiters();
        }
        Ok(())
    }

    fn abort(&self, id: FrameId, task: TaskId, outcome: FaultOutcome) -> FaultOutcome {
        match self.release_reservation(id, task) {
            Ok(()) => outcome,
            Err(_) => FaultOutcome::Corrupted,
        }
    }
}
