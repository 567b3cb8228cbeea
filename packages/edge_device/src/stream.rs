use std::fmt;
use std::sync::{Arc, Mutex};

use crate::future_context::run_once;
use crate::{
    ConnectionRef, Deferred, ERR_POISONED_LOCK, Engine, ErrorCode, FutureContext, OperationHandle,
    Result, StreamRef, UsageError,
};

/// The largest number of bytes a single [`Stream::read_some()`] returns.
pub const READ_SOME_CAPACITY: usize = 1024;

/// Destination of a stream read, filled by the engine on one of its worker threads.
///
/// The buffer is shared between the engine and the [`PendingRead`] that started the read, so it
/// stays alive for as long as either side still needs it. The consumer detaches the data once
/// the read has completed successfully.
#[derive(Clone)]
pub struct ReadBuffer {
    data: Arc<Mutex<Vec<u8>>>,
    capacity: usize,
}

impl ReadBuffer {
    /// Creates an empty buffer that accepts up to `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Arc::new(Mutex::new(Vec::with_capacity(capacity))),
            capacity,
        }
    }

    /// The maximum number of bytes the buffer accepts.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The number of bytes received so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.lock().expect(ERR_POISONED_LOCK).len()
    }

    /// Whether no bytes have been received yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many more bytes the buffer accepts.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.len())
    }

    /// Appends as much of `bytes` as fits and returns how many bytes were taken.
    pub fn fill(&self, bytes: &[u8]) -> usize {
        let mut data = self.data.lock().expect(ERR_POISONED_LOCK);

        let take = bytes
            .len()
            .min(self.capacity.saturating_sub(data.len()));
        data.extend(bytes.iter().take(take));

        take
    }

    pub(crate) fn detach(&self) -> Vec<u8> {
        std::mem::take(&mut *self.data.lock().expect(ERR_POISONED_LOCK))
    }
}

impl fmt::Debug for ReadBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadBuffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// A bidirectional byte stream opened by a client, delivered by a
/// [`StreamListener`][crate::StreamListener].
///
/// Accept the stream before reading from or writing to it. Every asynchronous method runs one
/// one-shot native operation; at most one read and one write should be outstanding at a time.
pub struct Stream {
    engine: Arc<dyn Engine>,
    stream: StreamRef,
}

impl Stream {
    pub(crate) fn new(engine: Arc<dyn Engine>, stream: StreamRef) -> Self {
        Self { engine, stream }
    }

    /// The engine reference of the stream.
    #[must_use]
    pub fn stream_ref(&self) -> StreamRef {
        self.stream
    }

    /// The connection the stream belongs to.
    #[must_use]
    pub fn connection_ref(&self) -> ConnectionRef {
        self.engine.stream_connection_ref(self.stream)
    }

    /// Accepts the incoming stream.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the stream could not be accepted.
    pub async fn accept(&self) -> Result<()> {
        let stream = self.stream;
        run_once(&self.engine, |engine, operation| {
            engine.stream_accept(stream, operation);
        })
        .await
    }

    /// Writes all of `data` to the stream.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the write failed, e.g. because the stream was aborted.
    pub async fn write(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        let stream = self.stream;
        let data = data.into();
        run_once(&self.engine, move |engine, operation| {
            engine.stream_write(stream, operation, data);
        })
        .await
    }

    /// Closes the write direction of the stream. Reading remains possible.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the close failed.
    pub async fn close(&self) -> Result<()> {
        let stream = self.stream;
        run_once(&self.engine, |engine, operation| {
            engine.stream_close(stream, operation);
        })
        .await
    }

    /// Aborts the stream in both directions. Outstanding operations fail with
    /// [`ErrorCode::Aborted`].
    pub fn abort(&self) {
        tracing::debug!(stream = self.stream.to_raw(), "aborting stream");

        self.engine.stream_abort(self.stream);
    }

    /// Starts reading whatever is available, between 1 and [`READ_SOME_CAPACITY`] bytes.
    ///
    /// # Errors
    ///
    /// Returns a usage error only if the freshly allocated operation cannot be armed.
    pub fn start_read_some(&self) -> Result<PendingRead> {
        self.start_read(READ_SOME_CAPACITY, |engine, stream, operation, buffer| {
            engine.stream_read_some(stream, operation, buffer);
        })
    }

    /// Starts reading exactly `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns a usage error only if the freshly allocated operation cannot be armed.
    pub fn start_read_all(&self, len: usize) -> Result<PendingRead> {
        self.start_read(len, |engine, stream, operation, buffer| {
            engine.stream_read_all(stream, operation, buffer);
        })
    }

    fn start_read<F>(&self, capacity: usize, start: F) -> Result<PendingRead>
    where
        F: FnOnce(&dyn Engine, StreamRef, OperationHandle, ReadBuffer),
    {
        let mut context = FutureContext::new(Arc::clone(&self.engine));
        let buffer = ReadBuffer::new(capacity);

        start(
            &*self.engine,
            self.stream,
            context.operation()?,
            buffer.clone(),
        );
        context.arm_detached(false)?;

        Ok(PendingRead { context, buffer })
    }

    /// Reads whatever is available, between 1 and [`READ_SOME_CAPACITY`] bytes.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the read failed. [`ErrorCode::EndOfFile`] means the remote
    /// side closed the stream.
    pub async fn read_some(&self) -> Result<Vec<u8>> {
        let mut pending = self.start_read_some()?;
        pending.completion()?.await?;

        Ok(pending.into_data()?)
    }

    /// Reads exactly `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the read failed. [`ErrorCode::EndOfFile`] means the remote
    /// side closed the stream before `len` bytes arrived.
    pub async fn read_all(&self, len: usize) -> Result<Vec<u8>> {
        let mut pending = self.start_read_all(len)?;
        pending.completion()?.await?;

        Ok(pending.into_data()?)
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}

/// A stream read in progress, owning the buffer the engine writes into.
///
/// Await [`completion()`][Self::completion], then take the bytes with
/// [`into_data()`][Self::into_data]. Dropping a pending read stops its future context; the
/// engine may still write into the buffer afterwards, which is harmless.
#[derive(Debug)]
pub struct PendingRead {
    context: FutureContext,
    buffer: ReadBuffer,
}

impl PendingRead {
    /// The result of the read.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError::Stopped`] if the result has already been delivered.
    pub fn completion(&mut self) -> std::result::Result<Deferred<'_>, UsageError> {
        self.context.resume()
    }

    /// Whether the read has completed successfully.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.context.last_status() == Some(ErrorCode::Ok)
    }

    /// The buffer the engine writes into.
    #[must_use]
    pub fn buffer(&self) -> &ReadBuffer {
        &self.buffer
    }

    /// Detaches the received bytes.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError::NotCompleted`] unless the read completed successfully.
    pub fn into_data(self) -> std::result::Result<Vec<u8>, UsageError> {
        if !self.is_complete() {
            return Err(UsageError::NotCompleted);
        }

        Ok(self.buffer.detach())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use futures::executor::block_on;
    use static_assertions::assert_impl_all;
    use testing::with_watchdog;

    use super::*;
    use crate::fake::FakeEngine;
    use crate::{ConnectionRef, Device, DeviceOptions};

    assert_impl_all!(ReadBuffer: Send, Sync, Clone);
    assert_impl_all!(Stream: Send, Sync);
    assert_impl_all!(PendingRead: Send);

    #[test]
    fn fill_respects_capacity() {
        let buffer = ReadBuffer::new(4);

        assert_eq!(buffer.fill(b"abc"), 3);
        assert_eq!(buffer.fill(b"def"), 1);
        assert_eq!(buffer.fill(b"g"), 0);
        assert_eq!(buffer.remaining(), 0);

        assert_eq!(buffer.detach(), b"abcd");
        assert!(buffer.is_empty());
    }

    fn accepted_stream() -> (Arc<FakeEngine>, Stream) {
        let fake = Arc::new(FakeEngine::new());
        let device = Device::new(fake.clone());
        device
            .set_options(&DeviceOptions::builder("pr-1", "de-1", "key").build().unwrap())
            .unwrap();

        let mut listener = device.stream_listener(4000);
        listener.subscribe().unwrap();
        fake.open_stream(4000, ConnectionRef::from_raw(1)).unwrap();

        let stream = block_on(listener.next()).unwrap();
        block_on(stream.accept()).unwrap();

        (fake, stream)
    }

    #[test]
    fn read_some_returns_available_bytes() {
        with_watchdog(|| {
            let (fake, stream) = accepted_stream();

            fake.stream_send(stream.stream_ref(), b"hello");

            assert_eq!(block_on(stream.read_some()).unwrap(), b"hello");
        });
    }

    #[test]
    fn read_all_waits_for_exact_length() {
        with_watchdog(|| {
            let (fake, stream) = accepted_stream();

            let mut pending = stream.start_read_all(6).unwrap();
            fake.stream_send(stream.stream_ref(), b"abc");
            fake.stream_send(stream.stream_ref(), b"defgh");

            block_on(pending.completion().unwrap()).unwrap();
            assert!(pending.is_complete());
            assert_eq!(pending.into_data().unwrap(), b"abcdef");

            assert_eq!(block_on(stream.read_some()).unwrap(), b"gh");
        });
    }

    #[test]
    fn read_after_remote_finish_is_end_of_file() {
        with_watchdog(|| {
            let (fake, stream) = accepted_stream();

            fake.stream_finish(stream.stream_ref());

            let error = block_on(stream.read_some()).unwrap_err();
            assert_eq!(error.engine_code(), Some(ErrorCode::EndOfFile));
        });
    }

    #[test]
    fn data_of_incomplete_read_is_not_available() {
        with_watchdog(|| {
            let (_fake, stream) = accepted_stream();

            let pending = stream.start_read_some().unwrap();

            assert!(!pending.is_complete());
            assert_eq!(pending.into_data(), Err(UsageError::NotCompleted));
        });
    }

    #[test]
    fn abort_fails_outstanding_read() {
        with_watchdog(|| {
            let (_fake, stream) = accepted_stream();

            let mut pending = stream.start_read_some().unwrap();
            stream.abort();

            let error = block_on(pending.completion().unwrap()).unwrap_err();
            assert_eq!(error.code(), ErrorCode::Aborted);
        });
    }

    #[test]
    fn write_reaches_remote_side() {
        with_watchdog(|| {
            let (fake, stream) = accepted_stream();

            block_on(stream.write(b"pong".to_vec())).unwrap();
            block_on(stream.write("!")).unwrap();

            assert_eq!(fake.stream_written(stream.stream_ref()), b"pong!");
            assert_eq!(stream.connection_ref(), ConnectionRef::from_raw(1));
        });
    }
}
