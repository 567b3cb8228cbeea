//! The boundary between this crate and the communication engine.
//!
//! Everything the engine does (sessions, cryptography, CoAP, streaming) is opaque to this crate.
//! The engine is reached only through the [`Engine`] trait: start a native operation, let the
//! engine call back with a status on one of its worker threads, then read already-resolved state
//! through plain accessors.

use std::fmt;

use derive_more::Display;

use crate::{
    CoapMethod, DeviceConfiguration, DeviceOptions, EngineError, ErrorCode, IceServer, ReadBuffer,
};

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub struct $name(u64);

        impl $name {
            /// Wraps an identifier assigned by the engine.
            #[must_use]
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// Returns the identifier assigned by the engine.
            #[must_use]
            pub const fn to_raw(self) -> u64 {
                self.0
            }
        }
    };
}

opaque_handle!(
    /// Identifies one native asynchronous operation (a native "future").
    ///
    /// An operation can be completed many times in sequence (listeners reuse one operation for
    /// every occurrence) but has at most one completion in flight at a time.
    OperationHandle
);

opaque_handle!(
    /// Identifies one native subscription.
    ListenerHandle
);

opaque_handle!(
    /// Identifies a client connection to the device.
    ConnectionRef
);

opaque_handle!(
    /// Identifies an incoming CoAP request owned by the engine.
    CoapRequestRef
);

opaque_handle!(
    /// Identifies a stream owned by the engine.
    StreamRef
);

opaque_handle!(
    /// Identifies an authorization request owned by the engine.
    AuthorizationRequestRef
);

opaque_handle!(
    /// Identifies an ICE-server request owned by the engine.
    IceServersRequestRef
);

/// Invoked by the engine, on any of its threads, when an operation completes.
pub type CompletionCallback = Box<dyn FnOnce(ErrorCode) + Send + 'static>;

/// Invoked by the engine, on any of its threads, for every log line it emits.
pub type LogCallback = Box<dyn Fn(LogMessage) + Send + Sync + 'static>;

/// Events concerning the device as a whole.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum DeviceEvent {
    /// The device attached to the basestation.
    #[display("attached")]
    Attached,

    /// The device lost its basestation attachment.
    #[display("detached")]
    Detached,

    /// The device was closed.
    #[display("closed")]
    Closed,

    /// The basestation does not recognize the device's public key fingerprint.
    #[display("unknown fingerprint")]
    UnknownFingerprint,

    /// The basestation rejected the configured product ID.
    #[display("wrong product id")]
    WrongProductId,

    /// The basestation rejected the configured device ID.
    #[display("wrong device id")]
    WrongDeviceId,
}

/// Events concerning one client connection.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum ConnectionEvent {
    /// A client connection was opened.
    #[display("opened")]
    Opened,

    /// A client connection was closed.
    #[display("closed")]
    Closed,

    /// The connection switched to a different underlying channel.
    #[display("channel changed")]
    ChannelChanged,
}

/// What a native subscription listens for. The engine does the filtering.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Selector {
    /// Device-level events.
    DeviceEvents,

    /// Connection lifecycle events.
    ConnectionEvents,

    /// CoAP requests matching a method and path. Path segments written as `{name}` match any
    /// value and make it available as a request parameter.
    CoapRequests {
        /// The CoAP method to match.
        method: CoapMethod,

        /// The path segments to match.
        path: Vec<String>,
    },

    /// Streams opened towards a port. Port 0 asks the engine to allocate an ephemeral port.
    Streams {
        /// The requested port.
        port: u32,
    },

    /// Authorization decisions the engine needs the application to make.
    AuthorizationRequests,
}

/// The result of initializing a native subscription.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ListenerBinding {
    /// The subscription is active.
    Subscribed,

    /// The stream subscription is active on this port.
    StreamPort(u32),
}

/// One delivered event or request, as recorded by the engine for a subscription.
///
/// The record is only valid until the subscription is re-armed; references inside it point at
/// engine-owned objects.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Occurrence {
    /// A device event.
    Device(DeviceEvent),

    /// A connection event.
    Connection {
        /// What happened.
        event: ConnectionEvent,

        /// The affected connection.
        connection: ConnectionRef,
    },

    /// An incoming CoAP request.
    CoapRequest(CoapRequestRef),

    /// An incoming stream.
    Stream(StreamRef),

    /// An authorization request.
    AuthorizationRequest(AuthorizationRequestRef),
}

/// Severity of an engine log line.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum LogSeverity {
    /// An error.
    #[display("error")]
    Error,

    /// A warning.
    #[display("warn")]
    Warn,

    /// Informational.
    #[display("info")]
    Info,

    /// Verbose tracing output.
    #[display("trace")]
    Trace,
}

/// One log line emitted by the engine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogMessage {
    severity: LogSeverity,
    message: String,
}

impl LogMessage {
    /// Creates a log line.
    #[must_use]
    pub fn new(severity: LogSeverity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }

    /// The severity of the line.
    #[must_use]
    pub fn severity(&self) -> LogSeverity {
        self.severity
    }

    /// The text of the line.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// The native API of one device instance of the communication engine.
///
/// Operation-starting methods (`start`, `listener_await_next`, `stream_read_some`, ...) only
/// begin the work. The engine reports the outcome later through the callback registered with
/// [`operation_set_callback()`][Engine::operation_set_callback], invoking it exactly once per
/// started operation, on a thread of its choosing. If the operation already completed when the
/// callback is registered, the engine invokes the callback promptly.
///
/// All other methods are synchronous reads or writes of engine state.
#[cfg_attr(test, mockall::automock)]
pub trait Engine: Send + Sync {
    /// The version string of the engine.
    fn version(&self) -> String;

    /// Generates a new private key in PEM format.
    fn create_private_key(&self) -> Result<String, EngineError>;

    /// Applies device options. Must be called before [`start()`][Engine::start].
    fn set_options(&self, options: &DeviceOptions) -> Result<(), EngineError>;

    /// Sets the engine log level (`error`, `warn`, `info` or `trace`).
    fn set_log_level(&self, level: &str) -> Result<(), EngineError>;

    /// Installs or removes the callback that receives engine log lines.
    fn set_log_callback(&self, callback: Option<LogCallback>);

    /// The configuration in effect. Ports are resolved once the device has started.
    fn configuration(&self) -> Result<DeviceConfiguration, EngineError>;

    /// Enables or disables attaching to the basestation. Must be called before
    /// [`start()`][Engine::start].
    fn set_basestation_attach(&self, enable: bool) -> Result<(), EngineError>;

    /// Adds a subtype to the mDNS service announced for the device.
    fn mdns_add_subtype(&self, subtype: &str) -> Result<(), EngineError>;

    /// Adds an item to the mDNS TXT record announced for the device.
    fn mdns_add_txt_item(&self, key: &str, value: &str) -> Result<(), EngineError>;

    /// Generates a new random server connect token.
    fn create_server_connect_token(&self) -> Result<String, EngineError>;

    /// Adds a server connect token that remote clients may present through the basestation.
    fn add_server_connect_token(&self, token: &str) -> Result<(), EngineError>;

    /// Whether every added server connect token has been synchronized with the basestation.
    fn are_server_connect_tokens_synchronized(&self) -> Result<bool, EngineError>;

    /// Starts the device: opens sockets and begins attaching to the basestation.
    fn start(&self, operation: OperationHandle);

    /// Closes the device gracefully.
    fn close(&self, operation: OperationHandle);

    /// Stops the device immediately; pending operations complete with [`ErrorCode::Stopped`].
    fn stop(&self);

    /// Allocates a native operation.
    fn operation_new(&self) -> OperationHandle;

    /// Registers the callback for the current (or next) completion of `operation`.
    fn operation_set_callback(&self, operation: OperationHandle, callback: CompletionCallback);

    /// Frees a native operation. Its callback will not be invoked afterwards.
    fn operation_free(&self, operation: OperationHandle);

    /// Allocates an uninitialized native subscription.
    fn listener_new(&self) -> ListenerHandle;

    /// Initializes a subscription for what `selector` describes.
    fn listener_init(
        &self,
        listener: ListenerHandle,
        selector: &Selector,
    ) -> Result<ListenerBinding, EngineError>;

    /// Starts waiting for the next occurrence on `listener`, completing `operation` when it
    /// arrives. The previous occurrence record may be recycled from this point on.
    fn listener_await_next(&self, listener: ListenerHandle, operation: OperationHandle);

    /// The occurrence delivered by the most recent successful completion, if still valid.
    fn listener_occurrence(&self, listener: ListenerHandle) -> Option<Occurrence>;

    /// Frees a subscription. A pending wait completes with [`ErrorCode::Stopped`].
    fn listener_free(&self, listener: ListenerHandle);

    /// The fingerprint of the public key the client authenticated the connection with.
    fn connection_client_fingerprint(&self, connection: ConnectionRef)
    -> Result<String, EngineError>;

    /// Whether the client reached the device on the local network.
    fn connection_is_local(&self, connection: ConnectionRef) -> bool;

    /// Whether the client has completed password authentication on the connection.
    fn connection_is_password_authenticated(&self, connection: ConnectionRef) -> bool;

    /// The username the client authenticated with, if it used password authentication.
    fn connection_password_username(&self, connection: ConnectionRef)
    -> Result<String, EngineError>;

    /// The method of the request.
    fn coap_method(&self, request: CoapRequestRef) -> Result<CoapMethod, EngineError>;

    /// The path of the request as sent by the client.
    fn coap_path(&self, request: CoapRequestRef) -> Result<String, EngineError>;

    /// The CoAP content format of the request payload.
    fn coap_content_format(&self, request: CoapRequestRef) -> Result<u16, EngineError>;

    /// The request payload.
    fn coap_payload(&self, request: CoapRequestRef) -> Result<Vec<u8>, EngineError>;

    /// The connection the request arrived on.
    fn coap_connection_ref(&self, request: CoapRequestRef) -> ConnectionRef;

    /// The value captured by a `{name}` path segment.
    fn coap_parameter(&self, request: CoapRequestRef, name: &str) -> Option<String>;

    /// Responds with an error status and message.
    fn coap_error_response(
        &self,
        request: CoapRequestRef,
        code: u16,
        message: &str,
    ) -> Result<(), EngineError>;

    /// Sets the response status code.
    fn coap_set_response_code(&self, request: CoapRequestRef, code: u16)
    -> Result<(), EngineError>;

    /// Sets the response payload.
    fn coap_set_response_payload(
        &self,
        request: CoapRequestRef,
        payload: &[u8],
    ) -> Result<(), EngineError>;

    /// Sets the response content format.
    fn coap_set_response_content_format(
        &self,
        request: CoapRequestRef,
        format: u16,
    ) -> Result<(), EngineError>;

    /// Sends the response assembled so far.
    fn coap_response_ready(&self, request: CoapRequestRef) -> Result<(), EngineError>;

    /// Accepts an incoming stream.
    fn stream_accept(&self, stream: StreamRef, operation: OperationHandle);

    /// Reads whatever is available, at least one byte and at most the buffer capacity.
    fn stream_read_some(&self, stream: StreamRef, operation: OperationHandle, buffer: ReadBuffer);

    /// Reads exactly the buffer capacity.
    fn stream_read_all(&self, stream: StreamRef, operation: OperationHandle, buffer: ReadBuffer);

    /// Writes all of `data`.
    fn stream_write(&self, stream: StreamRef, operation: OperationHandle, data: Vec<u8>);

    /// Closes the write direction of the stream.
    fn stream_close(&self, stream: StreamRef, operation: OperationHandle);

    /// Aborts the stream; pending operations complete with [`ErrorCode::Aborted`].
    fn stream_abort(&self, stream: StreamRef);

    /// The connection the stream belongs to.
    fn stream_connection_ref(&self, stream: StreamRef) -> ConnectionRef;

    /// The action the client wants to perform, e.g. `TcpTunnel:ListServices`.
    fn authorization_action(&self, request: AuthorizationRequestRef) -> String;

    /// The connection requesting the action.
    fn authorization_connection_ref(&self, request: AuthorizationRequestRef) -> ConnectionRef;

    /// The attributes of the request, as ordered name/value pairs.
    fn authorization_attributes(&self, request: AuthorizationRequestRef) -> Vec<(String, String)>;

    /// Allows or denies the request.
    fn authorization_verdict(&self, request: AuthorizationRequestRef, allow: bool);

    /// Allocates an ICE-server request.
    fn ice_servers_request_new(&self) -> IceServersRequestRef;

    /// Asks the basestation for ICE servers for `identifier`.
    fn ice_servers_request_send(
        &self,
        identifier: &str,
        request: IceServersRequestRef,
        operation: OperationHandle,
    );

    /// The number of servers in a completed request.
    fn ice_servers_count(&self, request: IceServersRequestRef) -> usize;

    /// The server at `index` in a completed request.
    fn ice_server(&self, request: IceServersRequestRef, index: usize) -> Option<IceServer>;

    /// Frees an ICE-server request.
    fn ice_servers_request_free(&self, request: IceServersRequestRef);
}

impl fmt::Debug for dyn Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}
