//! Future returned by every storage operation.

use crate::error::{StorageError, StorageResult};
use futures::channel::oneshot;
use futures::FutureExt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

const STATE_PENDING: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_CANCELED: u8 = 2;

/// Start/cancel handshake shared between a future and its queued job.
#[derive(Debug, Default)]
pub(crate) struct TaskState {
    status: AtomicU8,
}

impl TaskState {
    /// Moves the task to running. Fails when it was canceled first.
    pub(crate) fn try_start(&self) -> bool {
        self.status
            .compare_exchange(
                STATE_PENDING,
                STATE_RUNNING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn cancel(&self) -> bool {
        self.status
            .compare_exchange(
                STATE_PENDING,
                STATE_CANCELED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn is_started(&self) -> bool {
        self.status.load(Ordering::Acquire) == STATE_RUNNING
    }
}

/// Cloneable handle that cancels a queued task.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    state: Arc<TaskState>,
}

impl CancelHandle {
    /// Requests cancellation. Returns `false` when the task already started
    /// (its result can then only be discarded) or was already canceled.
    pub fn cancel(&self) -> bool {
        self.state.cancel()
    }
}

/// Pending result of one storage task.
///
/// Await it from async code or call [`TaskFuture::wait`] to block.
#[must_use = "storage tasks report their outcome through the future"]
pub struct TaskFuture<T> {
    receiver: oneshot::Receiver<StorageResult<T>>,
    state: Arc<TaskState>,
}

impl<T> TaskFuture<T> {
    pub(crate) fn new(
        receiver: oneshot::Receiver<StorageResult<T>>,
        state: Arc<TaskState>,
    ) -> Self {
        Self { receiver, state }
    }

    /// Future that is already resolved, used for failures detected before
    /// submission.
    pub fn ready(result: StorageResult<T>) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(result);
        Self {
            receiver,
            state: Arc::new(TaskState::default()),
        }
    }

    /// See [`CancelHandle::cancel`].
    pub fn cancel(&self) -> bool {
        self.state.cancel()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            state: Arc::clone(&self.state),
        }
    }

    pub fn is_started(&self) -> bool {
        self.state.is_started()
    }

    /// Blocks the calling thread until the task resolves.
    pub fn wait(self) -> StorageResult<T> {
        futures::executor::block_on(self)
    }
}

impl<T> Future for TaskFuture<T> {
    type Output = StorageResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.receiver.poll_unpin(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Job dropped without reporting: scheduler stopped or work panicked.
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(StorageError::Canceled)),
            Poll::Pending => Poll::Pending,
        }
    }
}
