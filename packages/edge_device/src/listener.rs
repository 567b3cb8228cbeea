use std::fmt;
use std::sync::Arc;

use crate::{
    ContextState, Deferred, Engine, Error, ErrorCode, FutureContext, ListenerBinding,
    ListenerHandle, Occurrence, Result, Selector, UsageError,
};

/// Adapts the generic [`Listener`] to one class of occurrences.
///
/// A kind describes what to subscribe to and how to turn the engine's occurrence record into the
/// value handed to the consumer.
pub trait ListenerKind: fmt::Debug + Send {
    /// What the consumer receives for each occurrence.
    type Occurrence;

    /// What the native subscription listens for.
    fn selector(&self) -> Selector;

    /// Converts an engine occurrence record. Returns `None` if the record does not belong to
    /// this kind.
    fn extract(occurrence: Occurrence, engine: &Arc<dyn Engine>) -> Option<Self::Occurrence>;
}

/// A subscription that yields an unbounded sequence of occurrences.
///
/// The listener owns a repeatable [`FutureContext`] and one native subscription. Each call to
/// [`start_or_rearm()`][Self::start_or_rearm] waits for the next occurrence; once that resolves
/// successfully, [`current_occurrence()`][Self::current_occurrence] returns it until the next
/// rearm. [`next()`][Self::next] does both.
///
/// The listener is owned by whoever created it. Stopping it (explicitly or by dropping it) stops
/// its future context first and frees the native subscription afterwards.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use edge_device::fake::FakeEngine;
/// use edge_device::{ConnectionEvent, ConnectionRef, Device};
///
/// # futures::executor::block_on(async {
/// let engine = Arc::new(FakeEngine::new());
/// let device = Device::new(engine.clone());
///
/// let mut connections = device.connection_events();
/// connections.subscribe().unwrap();
/// engine.emit_connection_event(ConnectionEvent::Opened, ConnectionRef::from_raw(7));
///
/// connections.start_or_rearm().unwrap().await.unwrap();
/// let (event, connection) = connections.current_occurrence().unwrap();
/// assert_eq!(event, ConnectionEvent::Opened);
/// assert_eq!(connection, ConnectionRef::from_raw(7));
/// # });
/// ```
pub struct Listener<K: ListenerKind> {
    kind: K,
    engine: Arc<dyn Engine>,
    context: FutureContext,

    // Allocated on first subscribe.
    handle: Option<ListenerHandle>,
    binding: Option<ListenerBinding>,

    stopped: bool,
}

impl<K: ListenerKind> Listener<K> {
    pub(crate) fn new(engine: Arc<dyn Engine>, kind: K) -> Self {
        Self {
            kind,
            context: FutureContext::new(Arc::clone(&engine)),
            engine,
            handle: None,
            binding: None,
            stopped: false,
        }
    }

    /// What this listener listens for.
    #[must_use]
    pub fn kind(&self) -> &K {
        &self.kind
    }

    /// The result of subscribing, if the listener has subscribed.
    #[must_use]
    pub fn binding(&self) -> Option<ListenerBinding> {
        self.binding
    }

    /// Whether the listener has been stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Creates the native subscription if it does not exist yet.
    ///
    /// [`start_or_rearm()`][Self::start_or_rearm] subscribes automatically. Subscribing
    /// explicitly is useful when occurrences must be captured before the first wait, or to learn
    /// the binding (such as an allocated stream port) up front.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the engine rejects the subscription, e.g. because the route or
    /// port is already taken. The listener can try again later.
    pub fn subscribe(&mut self) -> Result<ListenerBinding> {
        if self.stopped {
            return Err(UsageError::Stopped.into());
        }

        if let Some(binding) = self.binding {
            return Ok(binding);
        }

        let handle = self.engine.listener_new();
        let selector = self.kind.selector();

        match self.engine.listener_init(handle, &selector) {
            Ok(binding) => {
                tracing::debug!(listener = handle.to_raw(), ?selector, ?binding, "subscribed");

                self.handle = Some(handle);
                self.binding = Some(binding);
                Ok(binding)
            }
            Err(e) => {
                tracing::warn!(?selector, error = %e, "engine rejected subscription");

                self.engine.listener_free(handle);
                Err(e.into())
            }
        }
    }

    /// Waits for the next occurrence, subscribing first if necessary.
    ///
    /// The previous occurrence is no longer available from the moment this is called.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError::AlreadyArmed`] if the previous wait has not resolved yet,
    /// [`UsageError::Stopped`] after [`stop()`][Self::stop], or the engine error if subscribing
    /// failed. The returned [`Deferred`] rejects with the engine error if the wait fails.
    pub fn start_or_rearm(&mut self) -> Result<Deferred<'_>> {
        if self.stopped {
            return Err(UsageError::Stopped.into());
        }

        if self.context.state() == ContextState::Armed {
            return Err(UsageError::AlreadyArmed.into());
        }

        self.subscribe()?;

        let handle = self.handle.ok_or(Error::Usage(UsageError::Stopped))?;
        let operation = self.context.operation()?;

        self.engine.listener_await_next(handle, operation);

        Ok(self.context.arm(true)?)
    }

    /// The occurrence delivered by the most recent successful wait.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError::NoOccurrence`] if no successful wait has completed since the last
    /// rearm, and [`UsageError::Stopped`] after [`stop()`][Self::stop].
    pub fn current_occurrence(&self) -> std::result::Result<K::Occurrence, UsageError> {
        if self.stopped {
            return Err(UsageError::Stopped);
        }

        let delivered = self.context.state() == ContextState::Idle
            && self.context.last_status() == Some(ErrorCode::Ok);

        if !delivered {
            return Err(UsageError::NoOccurrence);
        }

        self.handle
            .and_then(|handle| self.engine.listener_occurrence(handle))
            .and_then(|occurrence| K::extract(occurrence, &self.engine))
            .ok_or(UsageError::NoOccurrence)
    }

    /// Waits for the next occurrence and returns it.
    ///
    /// # Errors
    ///
    /// Same as [`start_or_rearm()`][Self::start_or_rearm], plus the engine error if the wait
    /// fails.
    pub async fn next(&mut self) -> Result<K::Occurrence> {
        self.start_or_rearm()?.await?;

        Ok(self.current_occurrence()?)
    }

    /// Stops waiting and frees the native subscription, then the native operation. Calling this
    /// again is a no-op.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }

        self.stopped = true;

        // The subscription may still complete a pending wait, so the operation outlives it.
        self.context.release();

        if let Some(handle) = self.handle.take() {
            self.engine.listener_free(handle);

            tracing::debug!(listener = handle.to_raw(), kind = ?self.kind, "listener stopped");
        }

        self.context.free();
    }
}

impl<K: ListenerKind> Drop for Listener<K> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<K: ListenerKind> fmt::Debug for Listener<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("kind", &self.kind)
            .field("context", &self.context)
            .field("handle", &self.handle)
            .field("binding", &self.binding)
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}
