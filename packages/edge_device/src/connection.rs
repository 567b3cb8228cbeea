use std::fmt;
use std::sync::Arc;

use crate::{ConnectionRef, Engine, Result};

/// Read-only information about one client connection, obtained from
/// [`Device::connection()`][crate::Device::connection].
///
/// The connection itself is owned by the engine. Once it has closed, the accessors report
/// [`ErrorCode::NotFound`][crate::ErrorCode::NotFound] or `false`.
pub struct Connection {
    engine: Arc<dyn Engine>,
    connection: ConnectionRef,
}

impl Connection {
    pub(crate) fn new(engine: Arc<dyn Engine>, connection: ConnectionRef) -> Self {
        Self { engine, connection }
    }

    /// The engine reference of the connection.
    #[must_use]
    pub fn connection_ref(&self) -> ConnectionRef {
        self.connection
    }

    /// The fingerprint of the public key the client authenticated with, as hex.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the connection is unknown.
    pub fn client_fingerprint(&self) -> Result<String> {
        Ok(self.engine.connection_client_fingerprint(self.connection)?)
    }

    /// Whether the client reached the device on the local network.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.engine.connection_is_local(self.connection)
    }

    /// Whether the client has completed password authentication.
    #[must_use]
    pub fn is_password_authenticated(&self) -> bool {
        self.engine.connection_is_password_authenticated(self.connection)
    }

    /// The username the client completed password authentication with.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the connection is unknown or the client has not used password
    /// authentication.
    pub fn password_authentication_username(&self) -> Result<String> {
        Ok(self.engine.connection_password_username(self.connection)?)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}
