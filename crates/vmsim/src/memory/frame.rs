use core::fmt;
use std::sync::Arc;

use defines::error::{errno, KResult};
use klocks::{SpinMutex, SpinMutexGuard};

use super::page_table::Page;
use crate::task::TaskId;

/// 帧号，即帧在帧表中的下标
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameId(pub usize);

impl fmt::Debug for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.0)
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.0)
    }
}

/// 物理帧。系统初始化时创建，此后在不同任务、不同页之间反复绑定
pub struct Frame {
    id: FrameId,
    data: SpinMutex<Box<[u8]>>,
    inner: SpinMutex<FrameInner>,
}

pub struct FrameInner {
    /// 占据该帧的页
    pub page: Option<Arc<Page>>,
    pub dirty: bool,
    pub referenced: bool,
    /// 尚未结束的加锁操作数
    pub lock_count: usize,
    /// 预留该帧的任务。非空时帧正被某个缺页处理使用
    pub reserved: Option<TaskId>,
}

impl FrameInner {
    /// 被加锁或被预留的帧不能被换出
    pub fn is_occupied(&self) -> bool {
        self.lock_count > 0 || self.reserved.is_some()
    }
}

impl Frame {
    pub fn new(id: FrameId, page_size: usize) -> Self {
        Self {
            id,
            data: SpinMutex::new(vec![0; page_size].into_boxed_slice()),
            inner: SpinMutex::new(FrameInner {
                page: None,
                dirty: false,
                referenced: false,
                lock_count: 0,
                reserved: None,
            }),
        }
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn lock_inner(&self) -> SpinMutexGuard<'_, FrameInner> {
        self.inner.lock()
    }

    /// 锁 inner 然后进行操作，这是一个便捷方法
    pub fn lock_inner_with<T>(&self, f: impl FnOnce(&mut FrameInner) -> T) -> T {
        f(&mut self.inner.lock())
    }

    pub fn is_occupied(&self) -> bool {
        self.inner.lock().is_occupied()
    }

    pub fn page(&self) -> Option<Arc<Page>> {
        self.inner.lock().page.clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.lock().dirty
    }

    pub fn is_referenced(&self) -> bool {
        self.inner.lock().referenced
    }

    pub fn lock_count(&self) -> usize {
        self.inner.lock().lock_count
    }

    pub fn reserved_by(&self) -> Option<TaskId> {
        self.inner.lock().reserved
    }

    /// 为 `task` 预留该帧，检查与设置在同一临界区内完成
    ///
    /// 帧已被占用，或其上的页正在被校验时返回 `EBUSY`
    pub fn try_reserve(&self, task: TaskId) -> KResult {
        let mut inner = self.inner.lock();
        if inner.is_occupied() {
            return Err(errno::EBUSY);
        }
        if let Some(page) = &inner.page {
            if page.validating_thread().is_some() {
                return Err(errno::EBUSY);
            }
        }
        inner.reserved = Some(task);
        Ok(())
    }

    /// 解除 `task` 对该帧的预留。预留者不是 `task` 说明状态已被破坏
    pub fn unreserve(&self, task: TaskId) -> KResult {
        let mut inner = self.inner.lock();
        if inner.reserved != Some(task) {
            error!(
                "{}: unreserve by {task:?}, but reserved by {:?}",
                self.id, inner.reserved
            );
            return Err(errno::INVARIANT);
        }
        inner.reserved = None;
        Ok(())
    }

    /// 增加锁计数，返回新的计数。帧被预留（正在被换出）时失败
    pub fn pin(&self) -> Option<usize> {
        let mut inner = self.inner.lock();
        if inner.reserved.is_some() {
            return None;
        }
        inner.lock_count += 1;
        Some(inner.lock_count)
    }

    /// 减少锁计数，返回新的计数。计数已经为 0 时不做修改，返回 `INVARIANT`
    pub fn unpin(&self) -> KResult<usize> {
        let mut inner = self.inner.lock();
        if inner.lock_count == 0 {
            error!("{}: unlock with lock count 0", self.id);
            return Err(errno::INVARIANT);
        }
        inner.lock_count -= 1;
        Ok(inner.lock_count)
    }

    pub fn read_bytes(&self, offset: usize, buf: &mut [u8]) {
        buf.copy_from_slice(&self.data.lock()[offset..offset + buf.len()]);
    }

    pub fn write_bytes(&self, offset: usize, src: &[u8]) {
        self.data.lock()[offset..offset + src.len()].copy_from_slice(src);
    }

    /// 整页内容的拷贝，用于写回
    pub fn snapshot(&self) -> Box<[u8]> {
        self.data.lock().clone()
    }

    pub fn fill_from(&self, src: &[u8]) {
        self.data.lock().copy_from_slice(src);
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("page", &inner.page.as_ref().map(|page| page.to_string()))
            .field("dirty", &inner.dirty)
            .field("referenced", &inner.referenced)
            .field("lock_count", &inner.lock_count)
            .field("reserved", &inner.reserved)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use defines::error::errno;

    use super::{Frame, FrameId};
    use crate::task::TaskId;

    #[test]
    fn reservation_is_exclusive() {
        let frame = Frame::new(FrameId(0), 16);
        assert!(!frame.is_occupied());
        frame.try_reserve(TaskId(1)).unwrap();
        assert!(frame.is_occupied());
        assert_eq!(frame.try_reserve(TaskId(1)), Err(errno::EBUSY));
        assert_eq!(frame.try_reserve(TaskId(2)), Err(errno::EBUSY));
        assert_eq!(frame.reserved_by(), Some(TaskId(1)));
    }

    #[test]
    fn unreserve_by_another_task_is_an_invariant_violation() {
        let frame = Frame::new(FrameId(0), 16);
        assert_eq!(frame.unreserve(TaskId(1)), Err(errno::INVARIANT));
        frame.try_reserve(TaskId(1)).unwrap();
        assert_eq!(frame.unreserve(TaskId(2)), Err(errno::INVARIANT));
        assert_eq!(frame.reserved_by(), Some(TaskId(1)));
        frame.unreserve(TaskId(1)).unwrap();
        assert!(!frame.is_occupied());
    }

    #[test]
    fn locked_frame_is_occupied_and_cannot_be_reserved() {
        let frame = Frame::new(FrameId(3), 16);
        assert_eq!(frame.pin(), Some(1));
        assert_eq!(frame.pin(), Some(2));
        assert_eq!(frame.try_reserve(TaskId(0)), Err(errno::EBUSY));
        assert_eq!(frame.unpin(), Ok(1));
        assert_eq!(frame.unpin(), Ok(0));
        assert_eq!(frame.unpin(), Err(errno::INVARIANT));
        assert_eq!(frame.lock_count(), 0);
        frame.try_reserve(TaskId(0)).unwrap();
        assert_eq!(frame.pin(), None);
    }

    #[test]
    fn byte_access_stays_within_the_frame() {
        let frame = Frame::new(FrameId(0), 8);
        frame.write_bytes(2, &[1, 2, 3]);
        let mut buf = [0; 4];
        frame.read_bytes(1, &mut buf);
        assert_eq!(buf, [0, 1, 2, 3]);
        assert_eq!(&*frame.snapshot(), &[0, 0, 1, 2, 3, 0, 0, 0]);
        frame.fill_from(&[9; 8]);
        assert_eq!(&*frame.snapshot(), &[9; 8]);
    }
}
