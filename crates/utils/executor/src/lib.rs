//! 单执行流的协作式调度器
//!
//! 被调度的单位是 `async_task` 的 `Runnable`。挂起即 `.await` 一个尚未就绪的
//! future，唤醒即把 `Runnable` 重新放回就绪队列，调度即从队头取出一个并 poll
//! 到它的下一个挂起点。就绪队列严格先进先出

#[macro_use]
extern crate log;

mod yield_now;

use core::future::Future;

use async_task::{Runnable, Task};
use crossbeam_queue::SegQueue;
use futures::FutureExt;
use triomphe::Arc;

pub use self::yield_now::yield_now;

pub struct Executor {
    queue: Arc<SegQueue<Runnable>>,
}

impl Executor {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(SegQueue::new()),
        }
    }

    /// 创建任务并立刻放入就绪队列
    ///
    /// 返回的 [`Task`] 被 drop 时任务会被取消，不关心结果时应当 `detach`
    pub fn spawn<F>(&self, future: F) -> Task<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.spawn_with(future, || {})
    }

    /// 同 [`Executor::spawn`]，但任务每次被唤醒回到就绪队列时都会先调用 `on_schedule`
    pub fn spawn_with<F, A>(&self, future: F, on_schedule: A) -> Task<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
        A: Fn() + Send + Sync + 'static,
    {
        let queue = Arc::clone(&self.queue);
        let (runnable, task) = async_task::spawn(future, move |runnable| {
            on_schedule();
            queue.push(runnable);
        });
        runnable.schedule();
        task
    }

    /// 从队头取出一个任务运行到它的下一个挂起点。队列为空时返回 false
    pub fn run_once(&self) -> bool {
        match self.queue.pop() {
            Some(runnable) => {
                trace!("Schedule new task");
                runnable.run();
                true
            }
            None => false,
        }
    }

    /// 一直调度，直到没有就绪的任务。返回调度的次数
    pub fn run_until_idle(&self) -> usize {
        let mut polls = 0;
        while self.run_once() {
            polls += 1;
        }
        polls
    }

    /// 就绪队列中的任务数量
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// 若任务已经结束，取出其结果；否则原样还回去
    pub fn try_join<T>(mut task: Task<T>) -> Result<T, Task<T>> {
        if !task.is_finished() {
            return Err(task);
        }
        match (&mut task).now_or_never() {
            Some(output) => Ok(output),
            None => Err(task),
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    use super::{yield_now, Executor};

    #[test]
    fn tasks_run_in_spawn_order() {
        let executor = Executor::new();
        let trace = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let trace = Arc::clone(&trace);
            executor.spawn(async move { trace.lock().unwrap().push(i) }).detach();
        }
        assert_eq!(executor.pending(), 4);
        assert_eq!(executor.run_until_idle(), 4);
        assert_eq!(*trace.lock().unwrap(), [0, 1, 2, 3]);
    }

    #[test]
    fn yield_goes_to_the_back_of_the_queue() {
        let executor = Executor::new();
        let trace = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b"] {
            let trace = Arc::clone(&trace);
            executor
                .spawn(async move {
                    for round in 0..3 {
                        trace.lock().unwrap().push(format!("{name}{round}"));
                        yield_now().await;
                    }
                })
                .detach();
        }
        executor.run_until_idle();
        assert_eq!(
            *trace.lock().unwrap(),
            ["a0", "b0", "a1", "b1", "a2", "b2"]
        );
    }

    #[test]
    fn on_schedule_runs_for_every_wake() {
        let executor = Executor::new();
        let scheduled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&scheduled);
        executor
            .spawn_with(
                async {
                    yield_now().await;
                    yield_now().await;
                },
                move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                },
            )
            .detach();
        executor.run_until_idle();
        // 初次入队一次，两次 yield 各一次
        assert_eq!(scheduled.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn try_join_only_returns_finished_output() {
        let executor = Executor::new();
        let task = executor.spawn(async {
            yield_now().await;
            42
        });
        assert!(executor.run_once());
        let task = Executor::try_join(task).unwrap_err();
        executor.run_until_idle();
        assert_eq!(Executor::try_join(task).ok(), Some(42));
    }
}
