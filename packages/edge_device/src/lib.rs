#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Await the completions of a multi-threaded device communication engine from a single-threaded
//! async context.
//!
//! The engine runs its own worker threads and reports the outcome of every native operation by
//! invoking a callback on one of them. Application code, on the other hand, typically runs on one
//! cooperative execution context (a `LocalPool`, a current-thread runtime) and wants to simply
//! `.await` results. This package bridges the two:
//!
//! * A [`FutureContext`] pairs one native operation with a cross-thread [`CompletionSignal`].
//!   Worker threads enqueue the completion status without blocking; the consumer drains it when
//!   it awaits the [`Deferred`] result.
//! * A [`Listener`] keeps one future context in repeatable mode and re-arms it to surface an
//!   unbounded sequence of occurrences: device events, connection events, CoAP requests,
//!   incoming streams and authorization requests.
//! * A [`Device`] is the entry point. It starts and closes the device and creates listeners and
//!   one-shot operations such as ICE-server requests.
//!
//! The engine itself is opaque and reached through the [`Engine`] trait.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use edge_device::fake::FakeEngine;
//! use edge_device::{Device, DeviceEvent, DeviceOptions};
//!
//! # futures::executor::block_on(async {
//! let engine = Arc::new(FakeEngine::new());
//! let device = Device::new(engine.clone());
//!
//! let options = DeviceOptions::builder("pr-12345678", "de-abcdefgh", "-----BEGIN EC KEY-----")
//!     .build()
//!     .unwrap();
//! device.set_options(&options).unwrap();
//! device.start().await.unwrap();
//!
//! let mut events = device.device_events();
//! events.subscribe().unwrap();
//! engine.emit_device_event(DeviceEvent::Attached);
//!
//! assert_eq!(events.next().await.unwrap(), DeviceEvent::Attached);
//! # });
//! ```
//!
//! # Two-step listener contract
//!
//! Awaiting [`Listener::start_or_rearm()`] only reports whether an occurrence arrived. The
//! occurrence itself is read with [`Listener::current_occurrence()`] and stays valid until the
//! next rearm, after which the engine may recycle it. [`Listener::next()`] performs both steps.
//!
//! # Shutdown
//!
//! Stopping a future context (explicitly, by dropping it, or automatically after a one-shot
//! delivery) first releases its completion signal and only then frees the native operation, so a
//! completion racing with the stop on a worker thread is discarded instead of delivered.

mod authorization;
mod coap;
mod connection;
mod device;
mod engine;
mod error;
mod future_context;
mod ice;
mod kinds;
mod listener;
mod options;
mod signal;
mod stream;

#[cfg(any(test, feature = "test-util"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub mod fake;

pub use authorization::*;
pub use coap::*;
pub use connection::*;
pub use device::*;
pub use engine::*;
pub use error::*;
pub use future_context::*;
pub use ice::*;
pub use kinds::*;
pub use listener::*;
pub use options::*;
pub use signal::*;
pub use stream::*;

// A poisoned lock means a thread panicked while holding shared engine state; we cannot continue.
const ERR_POISONED_LOCK: &str = "encountered poisoned lock - program validity cannot be guaranteed";
