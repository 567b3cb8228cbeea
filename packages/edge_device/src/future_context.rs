//! The bridge between one native operation and one awaiting consumer.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use crate::{CompletionSignal, Engine, EngineError, ErrorCode, OperationHandle, UsageError};

/// Lifecycle state of a [`FutureContext`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum ContextState {
    /// Nothing is armed. A new operation may be armed.
    Idle,

    /// An operation is armed and its completion has not been delivered yet.
    Armed,

    /// The context has been stopped; its native operation is freed.
    Stopped,
}

/// Pairs one native operation with one completion signal and at most one pending result.
///
/// The typical cycle is:
///
/// 1. Start some native work against [`operation()`][Self::operation].
/// 2. [`arm()`][Self::arm] the context, which registers the completion callback with the engine
///    and returns a [`Deferred`] to await.
/// 3. The engine completes the operation on one of its worker threads; the callback enqueues the
///    status without blocking.
/// 4. Awaiting the `Deferred` drains the status on the consumer's task and resolves (OK) or
///    rejects (anything else) it.
///
/// A one-shot context (armed with `repeatable = false`) stops itself right after its single
/// delivery. A repeatable context returns to [`ContextState::Idle`] and can be armed again for
/// the next completion of the same native operation.
///
/// [`stop()`][Self::stop] is a two-phase shutdown: the signal is released first, so a callback
/// still in flight on a worker thread is discarded, and only then is the native operation freed.
/// Dropping the context stops it.
pub struct FutureContext {
    engine: Arc<dyn Engine>,

    // `None` once freed.
    operation: Option<OperationHandle>,

    signal: CompletionSignal,
    state: ContextState,
    repeatable: bool,
    last_status: Option<ErrorCode>,
}

impl FutureContext {
    /// Allocates a native operation and wraps it in an idle context.
    #[must_use]
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        let operation = engine.operation_new();

        Self {
            engine,
            operation: Some(operation),
            signal: CompletionSignal::new(),
            state: ContextState::Idle,
            repeatable: false,
            last_status: None,
        }
    }

    /// The native operation to start work against.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError::Stopped`] if the context has been stopped.
    pub fn operation(&self) -> Result<OperationHandle, UsageError> {
        self.operation.ok_or(UsageError::Stopped)
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Whether the most recent arm was repeatable.
    #[must_use]
    pub fn is_repeatable(&self) -> bool {
        self.repeatable
    }

    /// The status of the most recent delivery, if any delivery has happened.
    #[must_use]
    pub fn last_status(&self) -> Option<ErrorCode> {
        self.last_status
    }

    /// Registers the completion callback and returns the result to await.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError::AlreadyArmed`] if a previous arm has not been delivered yet and
    /// [`UsageError::Stopped`] if the context has been stopped. The context is unchanged.
    pub fn arm(&mut self, repeatable: bool) -> Result<Deferred<'_>, UsageError> {
        self.arm_detached(repeatable)?;

        Ok(Deferred { context: self })
    }

    /// Like [`arm()`][Self::arm] but without handing out a [`Deferred`]; use
    /// [`resume()`][Self::resume] to await the result later.
    ///
    /// # Errors
    ///
    /// Same as [`arm()`][Self::arm].
    pub fn arm_detached(&mut self, repeatable: bool) -> Result<(), UsageError> {
        match self.state {
            ContextState::Idle => {}
            ContextState::Armed => return Err(UsageError::AlreadyArmed),
            ContextState::Stopped => return Err(UsageError::Stopped),
        }

        let operation = self.operation()?;

        self.repeatable = repeatable;
        self.state = ContextState::Armed;

        let notifier = self.signal.notifier();
        self.engine.operation_set_callback(
            operation,
            Box::new(move |status| {
                notifier.notify(status);
            }),
        );

        tracing::trace!(operation = operation.to_raw(), repeatable, "armed");

        Ok(())
    }

    /// Returns a new [`Deferred`] for the outstanding arm, e.g. after the previous one was
    /// dropped before it resolved.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError::NotArmed`] if nothing is armed and [`UsageError::Stopped`] if the
    /// context has been stopped.
    pub fn resume(&mut self) -> Result<Deferred<'_>, UsageError> {
        match self.state {
            ContextState::Armed => Ok(Deferred { context: self }),
            ContextState::Idle => Err(UsageError::NotArmed),
            ContextState::Stopped => Err(UsageError::Stopped),
        }
    }

    /// Releases the completion signal, then frees the native operation.
    ///
    /// Any completion that has not been delivered yet is discarded, including one that the
    /// engine is delivering concurrently on a worker thread. Calling this more than once is a
    /// no-op.
    pub fn stop(&mut self) {
        self.release();
        self.free();
    }

    /// First phase of [`stop()`][Self::stop]: after this, no callback can reach the consumer.
    ///
    /// The native operation stays allocated, so owners of native resources that may still
    /// complete it (such as a subscription) can free those before calling
    /// [`free()`][Self::free].
    pub(crate) fn release(&mut self) {
        if self.state == ContextState::Stopped {
            return;
        }

        let was_armed = self.state == ContextState::Armed;
        let discarded = self.signal.release();
        self.state = ContextState::Stopped;

        tracing::debug!(
            operation = ?self.operation,
            was_armed,
            discarded,
            "completion signal released"
        );
    }

    /// Second phase of [`stop()`][Self::stop]: frees the native operation. Releases the signal
    /// first if that has not happened yet.
    pub(crate) fn free(&mut self) {
        self.release();

        if let Some(operation) = self.operation.take() {
            self.engine.operation_free(operation);

            tracing::trace!(operation = operation.to_raw(), "operation freed");
        }
    }

    #[cfg_attr(test, mutants::skip)] // Critical for delivery; mutations cause test hangs.
    fn poll_delivery(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), EngineError>> {
        assert!(
            self.state == ContextState::Armed,
            "Deferred polled after its result was already delivered"
        );

        let Some(status) = ready!(self.signal.poll_delivery(cx)) else {
            // The signal is only released by `stop()`, which cannot run while a `Deferred`
            // borrows the context, so this is a context stopped before the `Deferred` existed.
            return Poll::Ready(Err(EngineError::new(ErrorCode::Stopped)));
        };

        self.last_status = Some(status);

        if self.repeatable {
            self.state = ContextState::Idle;
            tracing::trace!(?status, "delivered");
        } else {
            tracing::trace!(?status, "delivered; one-shot operation terminating");
            self.stop();
        }

        Poll::Ready(status.into_result())
    }
}

impl Drop for FutureContext {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for FutureContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureContext")
            .field("operation", &self.operation)
            .field("signal", &self.signal)
            .field("state", &self.state)
            .field("repeatable", &self.repeatable)
            .field("last_status", &self.last_status)
            .finish_non_exhaustive()
    }
}

/// The pending result of one arm of a [`FutureContext`].
///
/// Resolves with `Ok(())` when the engine reports success and with the [`EngineError`] carrying
/// the engine status otherwise.
///
/// Dropping a `Deferred` does not cancel the armed operation; the context stays armed and
/// [`FutureContext::resume()`] returns a new `Deferred` for the same arm.
#[must_use = "the armed result is only delivered when the Deferred is awaited"]
pub struct Deferred<'a> {
    context: &'a mut FutureContext,
}

impl Future for Deferred<'_> {
    type Output = Result<(), EngineError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.context.poll_delivery(cx)
    }
}

impl fmt::Debug for Deferred<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("operation", &self.context.operation)
            .finish()
    }
}

/// Runs one one-shot native operation to completion.
///
/// `start` begins the native work against the freshly allocated operation. If the returned
/// future is dropped early, the context is stopped and a late completion is discarded.
pub(crate) async fn run_once<F>(engine: &Arc<dyn Engine>, start: F) -> crate::Result<()>
where
    F: FnOnce(&dyn Engine, OperationHandle),
{
    let mut context = FutureContext::new(Arc::clone(engine));
    let operation = context.operation()?;

    start(&**engine, operation);
    context.arm(false)?.await?;

    Ok(())
}
