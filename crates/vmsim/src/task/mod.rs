//! 任务：拥有一个地址空间（页表）和一份交换存储

use core::fmt;
use std::sync::{Arc, Weak};

use atomic::{Atomic, Ordering};
use klocks::SpinMutex;

use crate::{memory::PageTable, swap::SwapTarget, thread::Thread};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub usize);

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

pub struct Task {
    id: TaskId,
    status: Atomic<TaskStatus>,
    page_table: PageTable,
    swap: Arc<dyn SwapTarget>,
    threads: SpinMutex<Vec<Weak<Thread>>>,
}

impl Task {
    pub fn new(id: TaskId, page_count: usize, swap: Arc<dyn SwapTarget>) -> Arc<Self> {
        Arc::new_cyclic(|task| Self {
            id,
            status: Atomic::new(TaskStatus::Live),
            page_table: PageTable::new(id, task, page_count, &swap),
            swap,
            threads: SpinMutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    pub fn swap(&self) -> &Arc<dyn SwapTarget> {
        &self.swap
    }

    pub fn status(&self) -> TaskStatus {
        self.status.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.status() == TaskStatus::Terminated
    }

    /// 标记为终止。返回是否是第一次终止
    pub fn terminate(&self) -> bool {
        self.status.swap(TaskStatus::Terminated, Ordering::SeqCst) == TaskStatus::Live
    }

    pub(crate) fn add_thread(&self, thread: &Arc<Thread>) {
        self.threads.lock().push(Arc::downgrade(thread));
    }

    /// 仍然存活的线程
    pub fn threads(&self) -> Vec<Arc<Thread>> {
        let mut threads = self.threads.lock();
        threads.retain(|thread| thread.strong_count() > 0);
        threads.iter().filter_map(Weak::upgrade).collect()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("pages", &self.page_table.len())
            .finish_non_exhaustive()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, bytemuck::NoUninit)]
#[repr(u8)]
pub enum TaskStatus {
    Live,
    Terminated,
}
