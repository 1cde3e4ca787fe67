use std::pin::Pin;
use std::{future::Future, task::Poll};

pub mod flow;
pub mod value;

/// Resolves once the paired [FinishSender] fires or is dropped.
pub struct FinishSignal {
    inner: tokio::sync::oneshot::Receiver<()>,
}

pub type FinishSender = tokio::sync::oneshot::Sender<()>;

impl FinishSignal {
    pub fn new(inner: tokio::sync::oneshot::Receiver<()>) -> Self {
        Self { inner }
    }

    pub fn channel() -> (FinishSender, FinishSignal) {
        let (sender, receiver) = tokio::sync::oneshot::channel();
        (sender, FinishSignal::new(receiver))
    }
}

impl Future for FinishSignal {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.inner).poll(cx) {
            Poll::Ready(_) => Poll::Ready(()),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[tokio::test]
async fn test_finish_signal_on_drop() {
    let (sender, signal) = FinishSignal::channel();
    drop(sender);
    signal.await;
}
