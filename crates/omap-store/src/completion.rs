//! Completion handles for asynchronous backend operations
//!
//! A [`Completion`] is the receiving half of a one-shot promise. The backend
//! keeps the [`Completer`] and resolves it from whichever thread finished the
//! operation; the caller either awaits the completion or blocks on it.

use crate::error::{StoreError, StoreResult};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Backend side of a pending operation
#[derive(Debug)]
pub struct Completer<T> {
    tx: oneshot::Sender<StoreResult<T>>,
}

impl<T> Completer<T> {
    /// Resolve the operation. A caller that already dropped its completion is ignored.
    pub fn complete(self, result: StoreResult<T>) {
        let _ = self.tx.send(result);
    }
}

/// Caller side of a pending operation
#[derive(Debug)]
pub struct Completion<T> {
    rx: oneshot::Receiver<StoreResult<T>>,
}

impl<T> Completion<T> {
    /// Create a connected completer/completion pair
    pub fn pair() -> (Completer<T>, Completion<T>) {
        let (tx, rx) = oneshot::channel();
        (Completer { tx }, Completion { rx })
    }

    /// A completion that is already resolved
    pub fn ready(result: StoreResult<T>) -> Self {
        let (completer, completion) = Self::pair();
        completer.complete(result);
        completion
    }

    /// Block the current thread until the operation finished
    ///
    /// Must not be called from inside an async task.
    pub fn wait(self) -> StoreResult<T> {
        futures::executor::block_on(self)
    }
}

impl<T> Future for Completion<T> {
    type Output = StoreResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(StoreError::Canceled)),
            Poll::Pending => Poll::Pending,
        }
    }
}
