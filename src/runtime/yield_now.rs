use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Yields once so other ready tasks get a turn.
///
/// The first poll wakes the current task and returns `Pending`; the task is
/// queued behind everything already ready and completes on its next resume.
pub async fn yield_now() {
    struct YieldOnce(bool);

    impl Future for YieldOnce {
        type Output = ();

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            if !self.0 {
                self.0 = true;
                cx.waker().wake_by_ref();
                return Poll::Pending;
            }
            Poll::Ready(())
        }
    }

    YieldOnce(false).await
}
