use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use defines::error::KResult;
use event_listener::Event;
use executor::yield_now;
use klocks::SpinMutex;

use super::SwapTarget;
use crate::{memory::VirtPageNum, thread::Tid};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoKind {
    SwapIn,
    SwapOut,
}

/// 提交给交换设备的一次请求
pub struct IoRequest {
    kind: IoKind,
    page_id: VirtPageNum,
    target: Arc<dyn SwapTarget>,
    requester: Tid,
    /// 换出时是要写入的页内容，换入时用于接收读出的页内容
    buffer: SpinMutex<Box<[u8]>>,
    result: SpinMutex<Option<KResult>>,
    done: Event,
}

impl IoRequest {
    pub fn kind(&self) -> IoKind {
        self.kind
    }

    pub fn page_id(&self) -> VirtPageNum {
        self.page_id
    }

    pub fn requester(&self) -> Tid {
        self.requester
    }

    /// 尚未完成时返回 None
    pub fn result(&self) -> Option<KResult> {
        *self.result.lock()
    }

    /// 挂起直到请求完成
    pub async fn wait(&self) -> KResult {
        loop {
            let listener = self.done.listen();
            if let Some(result) = self.result() {
                return result;
            }
            listener.await;
        }
    }

    /// 取走缓冲区，换入完成后用于填充帧
    pub fn take_buffer(&self) -> Box<[u8]> {
        core::mem::take(&mut *self.buffer.lock())
    }

    fn perform(&self) -> KResult {
        let mut buffer = self.buffer.lock();
        match self.kind {
            IoKind::SwapIn => self.target.read_page(self.page_id, &mut buffer),
            IoKind::SwapOut => self.target.write_page(self.page_id, &buffer),
        }
    }
}

/// 模拟的交换设备：请求按提交顺序处理，每个请求占用 `latency` 个调度轮次
pub struct SwapDevice {
    latency: usize,
    queue: SpinMutex<VecDeque<Arc<IoRequest>>>,
    wakeup: Event,
    in_flight: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl SwapDevice {
    pub fn new(latency: usize) -> Self {
        Self {
            latency,
            queue: SpinMutex::new(VecDeque::new()),
            wakeup: Event::new(),
            in_flight: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    pub fn submit_swap_read(
        &self,
        target: &Arc<dyn SwapTarget>,
        page_id: VirtPageNum,
        page_size: usize,
        requester: Tid,
    ) -> Arc<IoRequest> {
        self.submit(
            IoKind::SwapIn,
            target,
            page_id,
            vec![0; page_size].into_boxed_slice(),
            requester,
        )
    }

    pub fn submit_swap_write(
        &self,
        target: &Arc<dyn SwapTarget>,
        page_id: VirtPageNum,
        data: Box<[u8]>,
        requester: Tid,
    ) -> Arc<IoRequest> {
        self.submit(IoKind::SwapOut, target, page_id, data, requester)
    }

    fn submit(
        &self,
        kind: IoKind,
        target: &Arc<dyn SwapTarget>,
        page_id: VirtPageNum,
        buffer: Box<[u8]>,
        requester: Tid,
    ) -> Arc<IoRequest> {
        let request = Arc::new(IoRequest {
            kind,
            page_id,
            target: Arc::clone(target),
            requester,
            buffer: SpinMutex::new(buffer),
            result: SpinMutex::new(None),
            done: Event::new(),
        });
        trace!("{requester:?} submits {kind:?} of page {page_id}");
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.queue.lock().push_back(Arc::clone(&request));
        self.wakeup.notify(1);
        request
    }

    /// 已提交但尚未完成的请求数
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// 驱动循环，应当作为一个任务运行在调度器上，永不返回
    pub async fn serve(self: Arc<Self>) {
        loop {
            let request = self.next_request().await;
            for _ in 0..self.latency {
                yield_now().await;
            }
            let result = request.perform();
            self.complete(&request, result);
        }
    }

    async fn next_request(&self) -> Arc<IoRequest> {
        loop {
            let listener = self.wakeup.listen();
            let next = self.queue.lock().pop_front();
            if let Some(request) = next {
                return request;
            }
            listener.await;
        }
    }

    /// 请求完成的“中断”：无论成功与否都要减少未完成计数，再唤醒等待者
    fn complete(&self, request: &IoRequest, result: KResult) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match result {
            Ok(()) => {
                self.completed.fetch_add(1, Ordering::SeqCst);
                trace!("{:?} of page {} done", request.kind, request.page_id);
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                warn!(
                    "{:?} of page {} for {:?} failed: {err}",
                    request.kind, request.page_id, request.requester
                );
            }
        }
        *request.result.lock() = Some(result);
        request.done.notify(usize::MAX);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use defines::error::errno;
    use executor::Executor;

    use super::{IoKind, SwapDevice};
    use crate::{
        memory::VirtPageNum,
        swap::{MemorySwapFile, SwapTarget},
        thread::Tid,
    };

    #[test]
    fn requests_complete_in_submission_order() {
        let executor = Executor::new();
        let device = Arc::new(SwapDevice::new(2));
        executor.spawn(Arc::clone(&device).serve()).detach();

        let file = Arc::new(MemorySwapFile::new(4));
        let target: Arc<dyn SwapTarget> = file.clone();
        let write = device.submit_swap_write(&target, VirtPageNum(5), vec![1, 2, 3, 4].into(), Tid(0));
        let read = device.submit_swap_read(&target, VirtPageNum(5), 4, Tid(1));
        assert_eq!(write.kind(), IoKind::SwapOut);
        assert_eq!(device.in_flight(), 2);

        let reader = {
            let read = Arc::clone(&read);
            executor.spawn(async move { read.wait().await })
        };
        executor.run_until_idle();

        assert_eq!(write.result(), Some(Ok(())));
        assert_eq!(Executor::try_join(reader).ok(), Some(Ok(())));
        assert_eq!(&*read.take_buffer(), &[1, 2, 3, 4]);
        assert_eq!(device.in_flight(), 0);
        assert_eq!(device.completed(), 2);
    }

    #[test]
    fn failed_request_still_leaves_the_queue() {
        let executor = Executor::new();
        let device = Arc::new(SwapDevice::new(1));
        executor.spawn(Arc::clone(&device).serve()).detach();

        let file = Arc::new(MemorySwapFile::new(4));
        file.set_failing(true);
        let target: Arc<dyn SwapTarget> = file;
        let read = device.submit_swap_read(&target, VirtPageNum(0), 4, Tid(0));
        executor.run_until_idle();

        assert_eq!(read.result(), Some(Err(errno::EIO)));
        assert_eq!(device.in_flight(), 0);
        assert_eq!(device.failed(), 1);
    }
}
