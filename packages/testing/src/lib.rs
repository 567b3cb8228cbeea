#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for testing `edge_device`.

use std::future::Future;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use futures::FutureExt;
use futures::executor::LocalPool;
use tracing_subscriber::EnvFilter;

/// Runs a test with a timeout to prevent infinite hangs.
///
/// The test body runs on a separate thread. If it takes longer than the timeout to complete,
/// this panics instead of letting CI hang on a lost completion.
///
/// The timeout is 10 seconds under normal conditions and 60 seconds under Miri, where thread
/// synchronization primitives are significantly slower.
///
/// When the `MUTATION_TESTING` environment variable is set to "1", the watchdog is disabled and
/// the test function is executed directly. This allows mutation testing to properly detect
/// hanging mutations.
///
/// # Panics
///
/// Panics if the test exceeds the timeout (when not in mutation testing mode), or re-raises the
/// panic of the test body.
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// with_watchdog(|| {
///     assert_eq!(2 + 2, 4);
/// });
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if std::env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        return test_fn();
    }

    let (tx, rx) = mpsc::channel();

    let test_handle = thread::spawn(move || {
        let result = test_fn();
        // If this fails, the receiver has already timed out.
        drop(tx.send(result));
    });

    let timeout = if cfg!(miri) {
        Duration::from_secs(60)
    } else {
        Duration::from_secs(10)
    };

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            test_handle.join().expect("Test thread should not panic");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("Test exceeded {timeout:?} timeout");
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => match test_handle.join() {
            Ok(()) => panic!("Test thread disconnected unexpectedly"),
            Err(e) => std::panic::resume_unwind(e),
        },
    }
}

/// Runs a future to completion on a single-threaded [`LocalPool`], under the watchdog.
///
/// This is the consumer side of every bridge test: one cooperative execution context that
/// awaits completions delivered from other threads.
///
/// The future is created on the test thread by `make_future`, so it does not need to be `Send`.
pub fn run_local<F, Fut, R>(make_future: F) -> R
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = R>,
    R: Send + 'static,
{
    with_watchdog(move || {
        let mut pool = LocalPool::new();
        pool.run_until(make_future())
    })
}

/// Installs a `tracing` subscriber that writes through the test harness, filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call in a process installs the subscriber.
pub fn init_tracing() {
    // Fails if another test already installed a subscriber, which is fine.
    drop(
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init(),
    );
}

/// Asserts that `future` is pending now and is still pending after `window` has passed.
///
/// Used to check that nothing is delivered spuriously. The future is polled with a no-op waker.
///
/// # Panics
///
/// Panics if the future completes at either poll.
pub fn assert_stays_pending<F>(future: &mut F, window: Duration)
where
    F: Future + Unpin,
{
    assert!(
        (&mut *future).now_or_never().is_none(),
        "future completed immediately but was expected to stay pending"
    );

    thread::sleep(window);

    assert!(
        (&mut *future).now_or_never().is_none(),
        "future completed within {window:?} but was expected to stay pending"
    );
}
