//! Cross-thread completion delivery.
//!
//! The engine completes operations on its own worker threads, while consumers await results on a
//! single cooperative execution context. A [`CompletionSignal`] connects the two: worker threads
//! push statuses through a [`Notifier`] without ever blocking, and the consumer task drains them
//! in FIFO order when it polls.
//!
//! The queue is a `futures` unbounded channel with exactly one consumer. It is unbounded only in
//! type: the arm discipline of [`FutureContext`][crate::FutureContext] allows at most one
//! outstanding notification per arm, so the queue never holds more than one message in practice.

use std::fmt;
use std::task::{Context, Poll};

use futures::StreamExt;
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::ErrorCode;

/// The consumer end of a cross-thread completion queue.
///
/// Owned by exactly one future context. Statuses enqueued by [`Notifier::notify()`] are
/// delivered by [`poll_delivery()`][Self::poll_delivery] in the order they were enqueued.
///
/// After [`release()`][Self::release], notifiers are rejected and nothing more is delivered.
/// The queue storage is reference-counted, so a worker thread racing with release can never
/// observe freed memory; the owner frees its native resources only after `release()` returns.
pub struct CompletionSignal {
    sender: UnboundedSender<ErrorCode>,
    receiver: UnboundedReceiver<ErrorCode>,
    released: bool,
}

impl CompletionSignal {
    /// Creates a signal with an empty queue.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded();

        Self {
            sender,
            receiver,
            released: false,
        }
    }

    /// Returns a handle that worker threads can use to enqueue a delivery.
    #[must_use]
    pub fn notifier(&self) -> Notifier {
        Notifier {
            sender: self.sender.clone(),
        }
    }

    /// Polls for the next delivery, registering the current task for wake-up if none is queued.
    ///
    /// Returns `Poll::Ready(None)` once the signal has been released and drained.
    pub fn poll_delivery(&mut self, cx: &mut Context<'_>) -> Poll<Option<ErrorCode>> {
        // A sender that passed the open check just before release may still be mid-push,
        // so the queue itself cannot be trusted to be empty here.
        if self.released {
            return Poll::Ready(None);
        }

        self.receiver.poll_next_unpin(cx)
    }

    /// Stops accepting notifications and discards any that were already queued.
    ///
    /// Returns the number of discarded notifications. Calling this again is a no-op that
    /// returns zero.
    pub fn release(&mut self) -> usize {
        if self.released {
            return 0;
        }

        self.released = true;
        self.receiver.close();

        let mut discarded: usize = 0;

        // After `close()` the channel reports `Closed` once the remaining messages are drained;
        // no new message can be accepted any more.
        while let Ok(status) = self.receiver.try_recv() {
            tracing::trace!(?status, "discarding completion queued before release");
            discarded = discarded.saturating_add(1);
        }

        discarded
    }

    /// Whether [`release()`][Self::release] has been called.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CompletionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSignal")
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

/// The producer end of a [`CompletionSignal`], safe to move to and use from any thread.
#[derive(Clone)]
pub struct Notifier {
    sender: UnboundedSender<ErrorCode>,
}

impl Notifier {
    /// Enqueues a delivery carrying `status`. Never blocks.
    ///
    /// Returns `false` if the signal has been released, in which case the status is dropped.
    pub fn notify(&self, status: ErrorCode) -> bool {
        match self.sender.unbounded_send(status) {
            Ok(()) => true,
            Err(_) => {
                tracing::trace!(?status, "completion arrived after release; discarded");
                false
            }
        }
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("released", &self.sender.is_closed())
            .finish()
    }
}
