//! 地址转换，以及在其之上的按字节读写

use std::sync::Arc;

use defines::error::{errno, KResult};

use super::{FrameId, MemoryManager, Page, VirtAddr};
use crate::thread::Thread;

/// 访存类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferenceKind {
    Read,
    Write,
    /// 为 I/O 锁住页而触发的访问，不会写脏页
    Lock,
}

impl MemoryManager {
    /// 把虚拟地址转换为（有效的）页，必要时处理缺页
    ///
    /// - 地址不属于当前活跃的地址空间：`EPERM`
    /// - 页号超出范围：`EFAULT`
    /// - 没有可用的帧：`ENOMEM`
    /// - 线程在等待期间被杀死：`KILLED`
    pub async fn translate(
        &self,
        thread: &Thread,
        addr: VirtAddr,
        kind: ReferenceKind,
    ) -> KResult<Arc<Page>> {
        let (page, _, _) = self.reference(thread, addr, kind).await?;
        Ok(page)
    }

    async fn reference(
        &self,
        thread: &Thread,
        addr: VirtAddr,
        kind: ReferenceKind,
    ) -> KResult<(Arc<Page>, FrameId, usize)> {
        let task = thread.task();
        if self.active_task() != Some(task.id()) {
            warn!(
                "{:?} references {addr} while {:?} is active",
                thread.tid(),
                self.active_task()
            );
            return Err(errno::EPERM);
        }
        let (vpn, offset) = self.layout.split(addr).inspect_err(|_| {
            warn!("{:?} references {addr}, out of range", thread.tid());
        })?;
        let page = task.page_table().get(vpn).ok_or(errno::EFAULT)?;

        if !page.is_valid() && page.validating_thread().is_some() {
            trace!("{:?} waits for {page}", thread.tid());
            page.wait_validation().await;
        }
        while !page.is_valid() {
            if thread.is_killed() {
                return Err(errno::KILLED);
            }
            self.handle_fault(thread, kind, page).await.into_result()?;
        }
        if thread.is_killed() {
            return Err(errno::KILLED);
        }

        let Some(frame_id) = page.frame() else {
            error!("{page} is valid without a frame");
            return Err(errno::INVARIANT);
        };
        let occupied = self.frame(frame_id).lock_inner_with(|inner| {
            inner.referenced = true;
            if kind == ReferenceKind::Write {
                inner.dirty = true;
            }
            inner.is_occupied()
        });
        {
            let mut lru = self.lru.lock();
            if occupied {
                lru.refresh(frame_id);
            } else {
                lru.touch(frame_id);
            }
        }
        self.stats.record_reference();
        Ok((Arc::clone(page), frame_id, offset))
    }

    /// 从 `addr` 开始读出 `buf.len()` 字节，可以跨页
    pub async fn load(&self, thread: &Thread, addr: VirtAddr, buf: &mut [u8]) -> KResult {
        let mut done = 0;
        while done < buf.len() {
            let va = addr.0.checked_add(done).ok_or(errno::EFAULT)?;
            let (_, frame, offset) = self
                .reference(thread, VirtAddr(va), ReferenceKind::Read)
                .await?;
            let len = (self.layout.page_size() - offset).min(buf.len() - done);
            self.frame(frame).read_bytes(offset, &mut buf[done..done + len]);
            done += len;
        }
        Ok(())
    }

    /// 从 `addr` 开始写入 `data`，可以跨页
    pub async fn store(&self, thread: &Thread, addr: VirtAddr, data: &[u8]) -> KResult {
        let mut done = 0;
        while done < data.len() {
            let va = addr.0.checked_add(done).ok_or(errno::EFAULT)?;
            let (_, frame, offset) = self
                .reference(thread, VirtAddr(va), ReferenceKind::Write)
                .await?;
            let len = (self.layout.page_size() - offset).min(data.len() - done);
            self.frame(frame).write_bytes(offset, &data[done..done + len]);
            done += len;
        }
        Ok(())
    }
}
