use core::fmt;
use std::sync::{Arc, Weak};

use event_listener::{Event, EventListener};
use klocks::{SpinMutex, SpinMutexGuard};

use super::{FrameId, VirtPageNum};
use crate::{
    swap::SwapTarget,
    task::{Task, TaskId},
    thread::Tid,
};

/// 任务地址空间中的一个虚拟页
pub struct Page {
    vpn: VirtPageNum,
    task_id: TaskId,
    task: Weak<Task>,
    swap: Arc<dyn SwapTarget>,
    inner: SpinMutex<PageInner>,
    /// 在该页上等待的线程，按加入顺序唤醒
    waiters: Event,
}

pub struct PageInner {
    pub valid: bool,
    /// 有效时为所绑定的帧；换入过程中会临时指向正在换入的帧
    pub frame: Option<FrameId>,
    /// 正在为该页处理缺页的线程，恰在缺页进行期间非空
    pub validating: Option<Tid>,
}

impl Page {
    pub fn new(task_id: TaskId, task: Weak<Task>, vpn: VirtPageNum, swap: Arc<dyn SwapTarget>) -> Self {
        Self {
            vpn,
            task_id,
            task,
            swap,
            inner: SpinMutex::new(PageInner {
                valid: false,
                frame: None,
                validating: None,
            }),
            waiters: Event::new(),
        }
    }

    pub fn vpn(&self) -> VirtPageNum {
        self.vpn
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// 所属任务已被回收时返回 None
    pub fn task(&self) -> Option<Arc<Task>> {
        self.task.upgrade()
    }

    /// 所属任务已终止或已被回收
    pub fn is_orphan(&self) -> bool {
        self.task().map_or(true, |task| task.is_terminated())
    }

    pub fn swap(&self) -> &Arc<dyn SwapTarget> {
        &self.swap
    }

    pub fn lock_inner(&self) -> SpinMutexGuard<'_, PageInner> {
        self.inner.lock()
    }

    /// 锁 inner 然后进行操作，这是一个便捷方法
    pub fn lock_inner_with<T>(&self, f: impl FnOnce(&mut PageInner) -> T) -> T {
        f(&mut self.inner.lock())
    }

    pub fn is_valid(&self) -> bool {
        self.inner.lock().valid
    }

    pub fn frame(&self) -> Option<FrameId> {
        self.inner.lock().frame
    }

    pub fn validating_thread(&self) -> Option<Tid> {
        self.inner.lock().validating
    }

    /// 先注册监听再检查条件，避免错过唤醒
    pub(crate) fn listen(&self) -> EventListener {
        self.waiters.listen()
    }

    /// 唤醒所有在该页上等待的线程，返回唤醒的数量
    pub(crate) fn notify_waiters(&self) -> usize {
        self.waiters.notify(usize::MAX)
    }

    /// 等到没有线程在为该页处理缺页
    pub async fn wait_validation(&self) {
        loop {
            let listener = self.listen();
            if self.validating_thread().is_none() {
                return;
            }
            listener.await;
        }
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}:P{}", self.task_id.0, self.vpn)
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Page")
            .field("task", &self.task_id)
            .field("vpn", &self.vpn)
            .field("valid", &inner.valid)
            .field("frame", &inner.frame)
            .field("validating", &inner.validating)
            .finish_non_exhaustive()
    }
}

/// 单级页表，由一个任务独占，覆盖整个虚拟页号范围
pub struct PageTable {
    pages: Box<[Arc<Page>]>,
}

impl PageTable {
    pub fn new(task_id: TaskId, task: &Weak<Task>, page_count: usize, swap: &Arc<dyn SwapTarget>) -> Self {
        let pages = (0..page_count)
            .map(|vpn| {
                Arc::new(Page::new(
                    task_id,
                    Weak::clone(task),
                    VirtPageNum(vpn),
                    Arc::clone(swap),
                ))
            })
            .collect();
        Self { pages }
    }

    pub fn get(&self, vpn: VirtPageNum) -> Option<&Arc<Page>> {
        self.pages.get(vpn.0)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Page>> {
        self.pages.iter()
    }
}
