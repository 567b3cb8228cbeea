use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use derive_more::Display;

use crate::{CoapRequestRef, ConnectionRef, Engine, Error, Result};

/// The CoAP methods a route can listen for.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum CoapMethod {
    /// `GET`
    #[display("GET")]
    Get,

    /// `POST`
    #[display("POST")]
    Post,

    /// `PUT`
    #[display("PUT")]
    Put,

    /// `DELETE`
    #[display("DELETE")]
    Delete,
}

// Accepted on method names for compatibility with the engine's own constant names.
const ENGINE_METHOD_PREFIX: &str = "NABTO_DEVICE_COAP_";

impl FromStr for CoapMethod {
    type Err = Error;

    /// Parses `GET`, `POST`, `PUT` or `DELETE`, ignoring case and an optional
    /// `NABTO_DEVICE_COAP_` prefix.
    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        let name = upper
            .strip_prefix(ENGINE_METHOD_PREFIX)
            .unwrap_or(upper.as_str());

        match name {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            _ => Err(Error::InvalidArgument {
                argument: "method",
                problem: format!("'{s}' is not a CoAP method (expected GET, POST, PUT or DELETE)"),
            }),
        }
    }
}

/// Splits a CoAP path into segments, ignoring empty ones.
///
/// ```
/// assert_eq!(edge_device::split_path("/a//b/"), vec!["a", "b"]);
/// ```
#[must_use]
pub fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// An incoming CoAP request delivered by a [`CoapListener`][crate::CoapListener].
///
/// The request belongs to the engine. Send exactly one response, either with
/// [`send_error_response()`][Self::send_error_response] or by setting the response parts and
/// calling [`response_ready()`][Self::response_ready]; both consume the request.
pub struct CoapRequest {
    engine: Arc<dyn Engine>,
    request: CoapRequestRef,
}

impl CoapRequest {
    pub(crate) fn new(engine: Arc<dyn Engine>, request: CoapRequestRef) -> Self {
        Self { engine, request }
    }

    /// The engine reference of the request.
    #[must_use]
    pub fn request_ref(&self) -> CoapRequestRef {
        self.request
    }

    /// The method of the request.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the request is no longer known to the engine.
    pub fn method(&self) -> Result<CoapMethod> {
        Ok(self.engine.coap_method(self.request)?)
    }

    /// The path of the request as the client sent it, e.g. `/heat-pump/7`.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the request is no longer known to the engine.
    pub fn path(&self) -> Result<String> {
        Ok(self.engine.coap_path(self.request)?)
    }

    /// The content format of the request payload.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the request carries no content format.
    pub fn content_format(&self) -> Result<u16> {
        Ok(self.engine.coap_content_format(self.request)?)
    }

    /// The request payload.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the request carries no payload.
    pub fn payload(&self) -> Result<Vec<u8>> {
        Ok(self.engine.coap_payload(self.request)?)
    }

    /// The connection the request arrived on.
    #[must_use]
    pub fn connection_ref(&self) -> ConnectionRef {
        self.engine.coap_connection_ref(self.request)
    }

    /// The value of a `{name}` parameter in the route path.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<String> {
        self.engine.coap_parameter(self.request, name)
    }

    /// Sets the response status code, e.g. `205` for "Content".
    ///
    /// # Errors
    ///
    /// Returns the engine error if the response can no longer be changed.
    pub fn set_response_code(&self, code: u16) -> Result<()> {
        Ok(self.engine.coap_set_response_code(self.request, code)?)
    }

    /// Sets the response payload together with its content format.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the response can no longer be changed.
    pub fn set_response_payload(&self, content_format: u16, payload: &[u8]) -> Result<()> {
        self.engine
            .coap_set_response_content_format(self.request, content_format)?;
        self.engine
            .coap_set_response_payload(self.request, payload)?;

        Ok(())
    }

    /// Sends the response assembled so far.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the response could not be sent.
    pub fn response_ready(self) -> Result<()> {
        tracing::trace!(request = self.request.to_raw(), "CoAP response ready");

        Ok(self.engine.coap_response_ready(self.request)?)
    }

    /// Responds with an error status code and a diagnostic message.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the response could not be sent.
    pub fn send_error_response(self, code: u16, message: &str) -> Result<()> {
        tracing::debug!(
            request = self.request.to_raw(),
            code,
            reason = message,
            "CoAP error response"
        );

        Ok(self.engine.coap_error_response(self.request, code, message)?)
    }
}

impl fmt::Debug for CoapRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoapRequest")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use mockall::predicate::eq;

    use super::*;
    use crate::{EngineError, ErrorCode, MockEngine};

    const REQUEST: CoapRequestRef = CoapRequestRef::from_raw(3);

    #[test]
    fn parses_method_names() {
        assert_eq!("GET".parse::<CoapMethod>().unwrap(), CoapMethod::Get);
        assert_eq!("post".parse::<CoapMethod>().unwrap(), CoapMethod::Post);
        assert_eq!(
            "NABTO_DEVICE_COAP_PUT".parse::<CoapMethod>().unwrap(),
            CoapMethod::Put
        );
        assert_eq!(
            "nabto_device_coap_delete".parse::<CoapMethod>().unwrap(),
            CoapMethod::Delete
        );
    }

    #[test]
    fn unknown_method_is_rejected() {
        let error = "PATCH".parse::<CoapMethod>().unwrap_err();

        assert!(matches!(
            error,
            Error::InvalidArgument {
                argument: "method",
                ..
            }
        ));
    }

    #[test]
    fn method_display_round_trips() {
        for method in [
            CoapMethod::Get,
            CoapMethod::Post,
            CoapMethod::Put,
            CoapMethod::Delete,
        ] {
            assert_eq!(method.to_string().parse::<CoapMethod>().unwrap(), method);
        }
    }

    #[test]
    fn split_path_ignores_empty_segments() {
        assert_eq!(split_path("/a//b/"), vec!["a", "b"]);
        assert_eq!(split_path("heat-pump/{id}"), vec!["heat-pump", "{id}"]);
        assert!(split_path("/").is_empty());
        assert!(split_path("").is_empty());
    }

    #[test]
    fn response_payload_sets_format_then_payload() {
        let mut engine = MockEngine::new();
        let mut sequence = mockall::Sequence::new();
        engine
            .expect_coap_set_response_content_format()
            .with(eq(REQUEST), eq(50))
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| Ok(()));
        engine
            .expect_coap_set_response_payload()
            .withf(|request, payload| *request == REQUEST && payload.to_vec() == b"{}")
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| Ok(()));

        let request = CoapRequest::new(Arc::new(engine), REQUEST);
        request.set_response_payload(50, b"{}").unwrap();
    }

    #[test]
    fn method_and_path_come_from_engine() {
        let mut engine = MockEngine::new();
        engine
            .expect_coap_method()
            .with(eq(REQUEST))
            .returning(|_| Ok(CoapMethod::Put));
        engine
            .expect_coap_path()
            .with(eq(REQUEST))
            .returning(|_| Ok("/pumps/9/target".to_string()));

        let request = CoapRequest::new(Arc::new(engine), REQUEST);

        assert_eq!(request.method().unwrap(), CoapMethod::Put);
        assert_eq!(request.path().unwrap(), "/pumps/9/target");
    }

    #[test]
    fn missing_payload_surfaces_engine_error() {
        let mut engine = MockEngine::new();
        engine
            .expect_coap_payload()
            .returning(|_| Err(EngineError::new(ErrorCode::NoData)));

        let request = CoapRequest::new(Arc::new(engine), REQUEST);

        assert_eq!(
            request.payload().unwrap_err().engine_code(),
            Some(ErrorCode::NoData)
        );
    }

    #[test]
    fn error_response_is_forwarded() {
        let mut engine = MockEngine::new();
        engine
            .expect_coap_error_response()
            .withf(|request, code, message| {
                *request == REQUEST && *code == 404 && message.to_string() == "no such pump"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let request = CoapRequest::new(Arc::new(engine), REQUEST);
        request.send_error_response(404, "no such pump").unwrap();
    }
}
