//! 把调度器、交换设备、内存管理以及任务/线程组装在一起

use core::{
    future::Future,
    sync::atomic::{AtomicUsize, Ordering},
};
use std::sync::Arc;

use async_task::Task as TaskHandle;
use defines::{
    config::{DAEMON_INTERVAL, SWAP_LATENCY},
    error::{errno, KResult},
};
use executor::Executor;
use klocks::SpinMutex;

use crate::{
    memory::{MemoryConfig, MemoryManager},
    swap::{MemorySwapFile, SwapDevice, SwapTarget},
    task::{Task, TaskId},
    thread::{Thread, ThreadFuture, ThreadStatus, Tid},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimConfig {
    pub memory: MemoryConfig,
    /// 每个交换请求占用的调度轮数
    pub swap_latency: usize,
    /// 回收孤儿帧的间隔（调度轮数）
    pub daemon_interval: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            memory: MemoryConfig::default(),
            swap_latency: SWAP_LATENCY,
            daemon_interval: DAEMON_INTERVAL,
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> KResult {
        self.memory.validate()?;
        if self.daemon_interval == 0 {
            return Err(errno::EINVAL);
        }
        Ok(())
    }
}

pub struct Simulation {
    config: SimConfig,
    executor: Executor,
    mm: Arc<MemoryManager>,
    tasks: SpinMutex<Vec<Arc<Task>>>,
    next_task_id: AtomicUsize,
    next_tid: AtomicUsize,
}

impl Simulation {
    pub fn new(config: SimConfig) -> KResult<Self> {
        config.validate()?;
        let executor = Executor::new();
        let swap_device = Arc::new(SwapDevice::new(config.swap_latency));
        executor.spawn(Arc::clone(&swap_device).serve()).detach();
        let mm = Arc::new(MemoryManager::new(config.memory, swap_device)?);
        Ok(Self {
            config,
            executor,
            mm,
            tasks: SpinMutex::new(Vec::new()),
            next_task_id: AtomicUsize::new(0),
            next_tid: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.mm
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// 创建一个以内存交换文件为交换存储的任务
    pub fn create_task(&self) -> (Arc<Task>, Arc<MemorySwapFile>) {
        let swap = Arc::new(MemorySwapFile::new(self.mm.layout().page_size()));
        let task = self.create_task_with_swap(Arc::clone(&swap) as Arc<dyn SwapTarget>);
        (task, swap)
    }

    pub fn create_task_with_swap(&self, swap: Arc<dyn SwapTarget>) -> Arc<Task> {
        let id = TaskId(self.next_task_id.fetch_add(1, Ordering::Relaxed));
        let task = Task::new(id, self.mm.layout().page_count(), swap);
        debug!("{id:?} created");
        self.tasks.lock().push(Arc::clone(&task));
        task
    }

    /// 尚未终止的任务
    pub fn tasks(&self) -> Vec<Arc<Task>> {
        self.tasks.lock().clone()
    }

    /// 在 `task` 中创建线程执行 `body`，线程立即进入就绪队列
    pub fn spawn_thread<F, Fut>(&self, task: &Arc<Task>, body: F) -> (Arc<Thread>, TaskHandle<Fut::Output>)
    where
        F: FnOnce(Arc<MemoryManager>, Arc<Thread>) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let tid = Tid(self.next_tid.fetch_add(1, Ordering::Relaxed));
        let thread = Arc::new(Thread::new(tid, Arc::clone(task)));
        task.add_thread(&thread);
        let future = ThreadFuture::new(
            Arc::clone(&thread),
            Arc::clone(&self.mm),
            body(Arc::clone(&self.mm), Arc::clone(&thread)),
        );
        let woken = Arc::clone(&thread);
        let handle = self
            .executor
            .spawn_with(future, move || woken.set_status(ThreadStatus::Ready));
        trace!("{tid:?} spawned in {:?}", task.id());
        (thread, handle)
    }

    /// 杀死单个线程。线程在下一个恢复点放弃当前操作，所属任务不受影响
    pub fn kill_thread(&self, thread: &Arc<Thread>) {
        info!("kill {:?} of {:?}", thread.tid(), thread.task().id());
        thread.kill();
    }

    /// 杀死任务的所有线程，终止任务并释放其占据的帧
    pub fn kill_task(&self, task: &Arc<Task>) {
        if !task.terminate() {
            return;
        }
        for thread in task.threads() {
            thread.kill();
        }
        self.mm.deallocate(task);
        self.tasks.lock().retain(|live| !Arc::ptr_eq(live, task));
        info!("{:?} killed", task.id());
    }

    /// 调度直到没有就绪的任务，每隔 `daemon_interval` 轮回收一次孤儿帧。返回调度的次数
    pub fn run(&self) -> usize {
        let mut polls = 0;
        loop {
            while self.executor.run_once() {
                polls += 1;
                if polls % self.config.daemon_interval == 0 {
                    self.mm.reclaim_orphan_frames();
                }
            }
            // 空闲时再回收一次；回收会唤醒等待者，因此可能又有任务就绪
            self.mm.reclaim_orphan_frames();
            if self.executor.pending() == 0 {
                break;
            }
        }
        debug!("simulation idle after {polls} polls, {}", self.mm.stats());
        polls
    }
}
