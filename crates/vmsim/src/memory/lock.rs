//! 帧加锁：I/O 期间把页钉在帧上，使其不会被换出

use std::sync::Arc;

use defines::error::{errno, KResult};

use super::{FrameId, MemoryManager, Page, ReferenceKind};
use crate::thread::Thread;

impl MemoryManager {
    /// 锁住页所在的帧，返回该帧。页无效时先处理缺页
    ///
    /// 同一页上的多个加锁者各自等待、各自增加锁计数
    pub async fn lock(&self, thread: &Thread, page: &Arc<Page>) -> KResult<FrameId> {
        loop {
            if thread.is_killed() {
                return Err(errno::KILLED);
            }
            let listener = page.listen();
            let (valid, frame, validating) =
                page.lock_inner_with(|inner| (inner.valid, inner.frame, inner.validating));
            if valid {
                let Some(id) = frame else {
                    error!("{page} is valid without a frame");
                    return Err(errno::INVARIANT);
                };
                match self.frame(id).pin() {
                    Some(count) => {
                        if count == 1 {
                            self.lru.lock().remove(id);
                        }
                        trace!("{:?} locks {page} on {id}, count {count}", thread.tid());
                        return Ok(id);
                    }
                    // 帧正在被换出，等换出结束或放弃后重试
                    None => listener.await,
                }
            } else if validating.is_some() {
                listener.await;
            } else {
                self.handle_fault(thread, ReferenceKind::Lock, page)
                    .await
                    .into_result()?;
            }
        }
    }

    /// 减少帧的锁计数。计数已经为 0 时返回 `INVARIANT`，不做修改
    ///
    /// 以 [`MemoryManager::lock`] 返回的帧号解锁。页的属主任务在加锁期间被杀死时，
    /// 帧与页的绑定已被解除，但锁计数仍在，解锁后帧即成为空闲帧
    pub fn unlock(&self, id: FrameId) -> KResult {
        let count = self.frame(id).unpin()?;
        trace!("{id} unlocked, count {count}");
        if count == 0 {
            self.track_if_evictable(id);
        }
        Ok(())
    }
}
