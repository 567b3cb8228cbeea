use std::fmt;
use std::sync::Arc;

use crate::{AuthorizationRequestRef, ConnectionRef, Engine};

/// A decision the engine asks the application to make, delivered by an
/// [`AuthorizationRequestListener`][crate::AuthorizationRequestListener].
///
/// Exactly one verdict must be given per request; [`verdict()`][Self::verdict] consumes it.
pub struct AuthorizationRequest {
    engine: Arc<dyn Engine>,
    request: AuthorizationRequestRef,
}

impl AuthorizationRequest {
    pub(crate) fn new(engine: Arc<dyn Engine>, request: AuthorizationRequestRef) -> Self {
        Self { engine, request }
    }

    /// The engine reference of the request.
    #[must_use]
    pub fn request_ref(&self) -> AuthorizationRequestRef {
        self.request
    }

    /// The action the client wants to perform, e.g. `TcpTunnel:ListServices`.
    #[must_use]
    pub fn action(&self) -> String {
        self.engine.authorization_action(self.request)
    }

    /// The connection requesting the action.
    #[must_use]
    pub fn connection_ref(&self) -> ConnectionRef {
        self.engine.authorization_connection_ref(self.request)
    }

    /// All attributes of the request in the order the engine reports them.
    #[must_use]
    pub fn attributes(&self) -> Vec<(String, String)> {
        self.engine.authorization_attributes(self.request)
    }

    /// The value of the first attribute called `name`.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<String> {
        self.attributes()
            .into_iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Allows or denies the requested action.
    pub fn verdict(self, allow: bool) {
        tracing::debug!(
            request = self.request.to_raw(),
            action = %self.action(),
            allow,
            "authorization verdict"
        );

        self.engine.authorization_verdict(self.request, allow);
    }
}

impl fmt::Debug for AuthorizationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationRequest")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}
