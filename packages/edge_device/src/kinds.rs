//! The listener kinds offered by a device.

use std::sync::Arc;

use crate::{
    AuthorizationRequest, CoapMethod, CoapRequest, ConnectionEvent, ConnectionRef, DeviceEvent,
    Engine, Listener, ListenerBinding, ListenerKind, Occurrence, Selector, Stream, split_path,
};

/// Listens for [`DeviceEvent`]s.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DeviceEvents;

impl ListenerKind for DeviceEvents {
    type Occurrence = DeviceEvent;

    fn selector(&self) -> Selector {
        Selector::DeviceEvents
    }

    fn extract(occurrence: Occurrence, _engine: &Arc<dyn Engine>) -> Option<DeviceEvent> {
        match occurrence {
            Occurrence::Device(event) => Some(event),
            _ => None,
        }
    }
}

/// Listens for [`ConnectionEvent`]s together with the affected connection.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ConnectionEvents;

impl ListenerKind for ConnectionEvents {
    type Occurrence = (ConnectionEvent, ConnectionRef);

    fn selector(&self) -> Selector {
        Selector::ConnectionEvents
    }

    fn extract(
        occurrence: Occurrence,
        _engine: &Arc<dyn Engine>,
    ) -> Option<(ConnectionEvent, ConnectionRef)> {
        match occurrence {
            Occurrence::Connection { event, connection } => Some((event, connection)),
            _ => None,
        }
    }
}

/// Listens for CoAP requests on one method and path.
///
/// Path segments written as `{name}` match any value, which the request then exposes through
/// [`CoapRequest::parameter()`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CoapRoute {
    method: CoapMethod,
    path: Vec<String>,
}

impl CoapRoute {
    /// A route for `method` on `path`, e.g. `/heat-pump/{id}/target`.
    #[must_use]
    pub fn new(method: CoapMethod, path: &str) -> Self {
        Self {
            method,
            path: split_path(path),
        }
    }

    /// The method of the route.
    #[must_use]
    pub fn method(&self) -> CoapMethod {
        self.method
    }

    /// The path segments of the route.
    #[must_use]
    pub fn path(&self) -> &[String] {
        &self.path
    }
}

impl ListenerKind for CoapRoute {
    type Occurrence = CoapRequest;

    fn selector(&self) -> Selector {
        Selector::CoapRequests {
            method: self.method,
            path: self.path.clone(),
        }
    }

    fn extract(occurrence: Occurrence, engine: &Arc<dyn Engine>) -> Option<CoapRequest> {
        match occurrence {
            Occurrence::CoapRequest(request) => Some(CoapRequest::new(Arc::clone(engine), request)),
            _ => None,
        }
    }
}

/// Listens for streams opened towards one port.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StreamPort {
    port: u32,
}

impl StreamPort {
    /// Listens on `port`. Port 0 lets the engine allocate an ephemeral port on subscribe.
    #[must_use]
    pub fn new(port: u32) -> Self {
        Self { port }
    }

    /// The requested port.
    #[must_use]
    pub fn requested_port(&self) -> u32 {
        self.port
    }
}

impl ListenerKind for StreamPort {
    type Occurrence = Stream;

    fn selector(&self) -> Selector {
        Selector::Streams { port: self.port }
    }

    fn extract(occurrence: Occurrence, engine: &Arc<dyn Engine>) -> Option<Stream> {
        match occurrence {
            Occurrence::Stream(stream) => Some(Stream::new(Arc::clone(engine), stream)),
            _ => None,
        }
    }
}

/// Listens for authorization decisions the engine needs the application to make.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AuthorizationRequests;

impl ListenerKind for AuthorizationRequests {
    type Occurrence = AuthorizationRequest;

    fn selector(&self) -> Selector {
        Selector::AuthorizationRequests
    }

    fn extract(occurrence: Occurrence, engine: &Arc<dyn Engine>) -> Option<AuthorizationRequest> {
        match occurrence {
            Occurrence::AuthorizationRequest(request) => {
                Some(AuthorizationRequest::new(Arc::clone(engine), request))
            }
            _ => None,
        }
    }
}

/// Yields [`DeviceEvent`]s.
pub type DeviceEventListener = Listener<DeviceEvents>;

/// Yields connection events.
pub type ConnectionEventListener = Listener<ConnectionEvents>;

/// Yields CoAP requests for one route.
pub type CoapListener = Listener<CoapRoute>;

/// Yields incoming streams on one port.
pub type StreamListener = Listener<StreamPort>;

/// Yields authorization requests.
pub type AuthorizationRequestListener = Listener<AuthorizationRequests>;

impl Listener<StreamPort> {
    /// The port the listener is bound to, once subscribed.
    ///
    /// When port 0 was requested, this is the ephemeral port the engine allocated.
    #[must_use]
    pub fn port(&self) -> Option<u32> {
        match self.binding() {
            Some(ListenerBinding::StreamPort(port)) => Some(port),
            _ => None,
        }
    }
}
