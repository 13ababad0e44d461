//! 模拟线程。线程体是一个 future，由 [`ThreadFuture`] 包装后交给调度器

use core::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use std::sync::Arc;

use atomic::{Atomic, Ordering};

use crate::{memory::MemoryManager, task::Task};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid(pub usize);

impl fmt::Debug for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tid{}", self.0)
    }
}

pub struct Thread {
    tid: Tid,
    task: Arc<Task>,
    status: Atomic<ThreadStatus>,
}

impl Thread {
    pub fn new(tid: Tid, task: Arc<Task>) -> Self {
        Self {
            tid,
            task,
            status: Atomic::new(ThreadStatus::Ready),
        }
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    pub fn status(&self) -> ThreadStatus {
        self.status.load(Ordering::SeqCst)
    }

    /// `Killed` 和 `Exited` 是终态，不会被覆盖
    pub fn set_status(&self, status: ThreadStatus) {
        let _ = self
            .status
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |old| {
                (!old.is_final()).then_some(status)
            });
    }

    /// 仅当当前状态为 `from` 时切换到 `to`
    fn transition(&self, from: ThreadStatus, to: ThreadStatus) -> bool {
        self.status
            .compare_exchange(from, to, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// 杀死线程。线程会在下一个恢复点发现这一点并退出当前操作
    pub fn kill(&self) {
        if self.status.swap(ThreadStatus::Killed, Ordering::SeqCst) != ThreadStatus::Killed {
            debug!("{:?} of {:?} killed", self.tid, self.task.id());
        }
    }

    /// 线程本身被杀死，或者其所属任务已经终止
    pub fn is_killed(&self) -> bool {
        self.status() == ThreadStatus::Killed || self.task.is_terminated()
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("tid", &self.tid)
            .field("task", &self.task.id())
            .field("status", &self.status())
            .finish()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, bytemuck::NoUninit)]
#[repr(u8)]
pub enum ThreadStatus {
    Ready,
    Running,
    Blocking,
    Exited,
    Killed,
}

impl ThreadStatus {
    pub fn is_final(self) -> bool {
        matches!(self, Self::Exited | Self::Killed)
    }
}

/// 包装线程体。每次被 poll 时把线程所属任务的地址空间设为当前活跃的地址空间，并维护线程状态
#[pin_project::pin_project]
pub struct ThreadFuture<F> {
    thread: Arc<Thread>,
    mm: Arc<MemoryManager>,
    #[pin]
    future: F,
}

impl<F> ThreadFuture<F> {
    pub fn new(thread: Arc<Thread>, mm: Arc<MemoryManager>, future: F) -> Self {
        Self { thread, mm, future }
    }
}

impl<F: Future> Future for ThreadFuture<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        this.mm.activate(this.thread.task().id());
        this.thread.set_status(ThreadStatus::Running);

        let ret = this.future.poll(cx);

        match ret {
            Poll::Ready(_) => this.thread.set_status(ThreadStatus::Exited),
            // 在 poll 期间已经被唤醒的话，状态已是 `Ready`
            Poll::Pending => {
                this.thread
                    .transition(ThreadStatus::Running, ThreadStatus::Blocking);
            }
        }
        ret
    }
}
