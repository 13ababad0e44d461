use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

/// 即刻让出控制权，并且立刻 wake（也就是立刻回到就绪队列的队尾）
///
/// 没有时钟，模拟时间只能以调度轮次计：交换设备每个请求让出 `latency` 次，
/// 缺页结束时让出一次，使刚被唤醒的等待者先于当前线程的后续访存运行。
/// 立即重新入队保证让出的任务不会因为没有唤醒者而丢失
pub fn yield_now() -> impl Future<Output = ()> {
    YieldFuture { yielded: false }
}

struct YieldFuture {
    yielded: bool,
}

impl Future for YieldFuture {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
