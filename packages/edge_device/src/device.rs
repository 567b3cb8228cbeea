use std::fmt;
use std::sync::Arc;

use crate::future_context::run_once;
use crate::{
    AuthorizationRequestListener, AuthorizationRequests, CoapListener, CoapMethod, CoapRoute,
    Connection, ConnectionEventListener, ConnectionEvents, ConnectionRef, DeviceConfiguration,
    DeviceEventListener, DeviceEvents, DeviceOptions, Engine, IceServer, Listener, LogMessage,
    LogSeverity, Result, StreamListener, StreamPort,
};

/// The tracing target that engine log lines are forwarded to.
pub const ENGINE_LOG_TARGET: &str = "edge_device::engine";

/// One device instance of the communication engine.
///
/// The device is the factory for listeners and device-level operations. It keeps no listeners of
/// its own: every listener it creates is owned by the caller and stops when the caller drops it.
///
/// A typical lifecycle is [`set_options()`][Self::set_options], [`start()`][Self::start], create
/// listeners and serve them, then [`close()`][Self::close] and finally [`stop()`][Self::stop].
#[derive(Clone)]
pub struct Device {
    engine: Arc<dyn Engine>,
}

impl Device {
    /// Wraps a device instance of the engine.
    #[must_use]
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self { engine }
    }

    /// The engine version.
    #[must_use]
    pub fn version(&self) -> String {
        self.engine.version()
    }

    /// Generates a new private key in PEM format, suitable for [`DeviceOptions`].
    ///
    /// # Errors
    ///
    /// Returns the engine error if key generation failed.
    pub fn create_private_key(&self) -> Result<String> {
        Ok(self.engine.create_private_key()?)
    }

    /// Validates the options and applies them to the engine.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOptions`][crate::Error::InvalidOptions] if validation fails, or
    /// the engine error if the engine rejects the options (e.g. because the device has already
    /// been started).
    pub fn set_options(&self, options: &DeviceOptions) -> Result<()> {
        options.validate()?;

        self.engine.set_options(options)?;

        tracing::debug!(
            product_id = options.product_id(),
            device_id = options.device_id(),
            "device options applied"
        );

        Ok(())
    }

    /// Sets the engine log level: `error`, `warn`, `info` or `trace`.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the level is not recognized.
    pub fn set_log_level(&self, level: &str) -> Result<()> {
        Ok(self.engine.set_log_level(level)?)
    }

    /// Forwards engine log lines to `tracing` under the [`ENGINE_LOG_TARGET`] target.
    pub fn forward_engine_logs(&self) {
        self.engine
            .set_log_callback(Some(Box::new(|line: LogMessage| forward_log_line(&line))));
    }

    /// The configuration the device runs with, including the ports bound at start and the
    /// fingerprint of the device key.
    ///
    /// # Errors
    ///
    /// Returns the engine error if no options have been applied.
    pub fn configuration(&self) -> Result<DeviceConfiguration> {
        Ok(self.engine.configuration()?)
    }

    /// Enables or disables attaching to the basestation. Attaching is enabled by default; a
    /// device that does not attach is only reachable on the local network.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the device has already been started.
    pub fn set_basestation_attach(&self, enable: bool) -> Result<()> {
        self.engine.set_basestation_attach(enable)?;

        tracing::debug!(enable, "basestation attach configured");

        Ok(())
    }

    /// Adds a subtype to the mDNS service the device announces, e.g. `heatpump`.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the subtype is rejected.
    pub fn mdns_add_subtype(&self, subtype: &str) -> Result<()> {
        Ok(self.engine.mdns_add_subtype(subtype)?)
    }

    /// Adds a key/value item to the mDNS TXT record the device announces.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the item is rejected.
    pub fn mdns_add_txt_item(&self, key: &str, value: &str) -> Result<()> {
        Ok(self.engine.mdns_add_txt_item(key, value)?)
    }

    /// Generates a new random server connect token. The token is not in effect until it is
    /// added with [`add_server_connect_token()`][Self::add_server_connect_token].
    ///
    /// # Errors
    ///
    /// Returns the engine error if token generation failed.
    pub fn create_server_connect_token(&self) -> Result<String> {
        Ok(self.engine.create_server_connect_token()?)
    }

    /// Allows remote clients presenting `token` to connect through the basestation.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the token is rejected.
    pub fn add_server_connect_token(&self, token: &str) -> Result<()> {
        self.engine.add_server_connect_token(token)?;

        tracing::debug!("server connect token added");

        Ok(())
    }

    /// Whether every added server connect token is known to the basestation yet.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the state cannot be queried.
    pub fn are_server_connect_tokens_synchronized(&self) -> Result<bool> {
        Ok(self.engine.are_server_connect_tokens_synchronized()?)
    }

    /// Information about a client connection, e.g. one reported by a connection event.
    #[must_use]
    pub fn connection(&self, connection: ConnectionRef) -> Connection {
        Connection::new(Arc::clone(&self.engine), connection)
    }

    /// Starts the device.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the device could not be started, e.g. because no options
    /// were set.
    pub async fn start(&self) -> Result<()> {
        run_once(&self.engine, |engine, operation| engine.start(operation)).await?;

        tracing::info!(version = %self.engine.version(), "device started");

        Ok(())
    }

    /// Closes the device gracefully, detaching from the basestation.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the close failed.
    pub async fn close(&self) -> Result<()> {
        run_once(&self.engine, |engine, operation| engine.close(operation)).await?;

        tracing::info!("device closed");

        Ok(())
    }

    /// Stops the device immediately. Outstanding waits fail with
    /// [`ErrorCode::Stopped`][crate::ErrorCode::Stopped].
    pub fn stop(&self) {
        self.engine.set_log_callback(None);
        self.engine.stop();

        tracing::info!("device stopped");
    }

    /// Creates a listener for device events.
    #[must_use]
    pub fn device_events(&self) -> DeviceEventListener {
        Listener::new(Arc::clone(&self.engine), DeviceEvents)
    }

    /// Creates a listener for connection events.
    #[must_use]
    pub fn connection_events(&self) -> ConnectionEventListener {
        Listener::new(Arc::clone(&self.engine), ConnectionEvents)
    }

    /// Creates a listener for CoAP requests on `method` and `path`.
    ///
    /// ```
    /// use std::sync::Arc;
    ///
    /// use edge_device::fake::FakeEngine;
    /// use edge_device::{CoapMethod, Device};
    ///
    /// let device = Device::new(Arc::new(FakeEngine::new()));
    ///
    /// let mut route = device.coap_listener("get".parse::<CoapMethod>()?, "/heat-pump/{id}");
    /// route.subscribe()?;
    /// # Ok::<(), edge_device::Error>(())
    /// ```
    #[must_use]
    pub fn coap_listener(&self, method: CoapMethod, path: &str) -> CoapListener {
        Listener::new(Arc::clone(&self.engine), CoapRoute::new(method, path))
    }

    /// Creates a listener for streams on `port`. Port 0 allocates an ephemeral port on subscribe.
    #[must_use]
    pub fn stream_listener(&self, port: u32) -> StreamListener {
        Listener::new(Arc::clone(&self.engine), StreamPort::new(port))
    }

    /// Creates a listener for authorization requests.
    #[must_use]
    pub fn authorization_requests(&self) -> AuthorizationRequestListener {
        Listener::new(Arc::clone(&self.engine), AuthorizationRequests)
    }

    /// Asks the basestation for the TURN and STUN servers to use for `identifier`.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the request failed, e.g. because the device is not attached.
    pub async fn request_ice_servers(&self, identifier: &str) -> Result<Vec<IceServer>> {
        let request = self.engine.ice_servers_request_new();

        let engine = Arc::clone(&self.engine);
        let request = scopeguard::guard(request, move |request| {
            engine.ice_servers_request_free(request);
        });
        let request_ref = *request;

        run_once(&self.engine, |engine, operation| {
            engine.ice_servers_request_send(identifier, request_ref, operation);
        })
        .await?;

        let count = self.engine.ice_servers_count(request_ref);
        let servers: Vec<_> = (0..count)
            .filter_map(|index| self.engine.ice_server(request_ref, index))
            .collect();

        tracing::debug!(identifier, count = servers.len(), "received ICE servers");

        Ok(servers)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("engine", &self.engine)
            .finish()
    }
}

fn forward_log_line(line: &LogMessage) {
    let message = line.message();

    match line.severity() {
        LogSeverity::Error => tracing::error!(target: ENGINE_LOG_TARGET, "{message}"),
        LogSeverity::Warn => tracing::warn!(target: ENGINE_LOG_TARGET, "{message}"),
        LogSeverity::Info => tracing::info!(target: ENGINE_LOG_TARGET, "{message}"),
        LogSeverity::Trace => tracing::trace!(target: ENGINE_LOG_TARGET, "{message}"),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use futures::executor::block_on;
    use mockall::predicate::eq;
    use static_assertions::assert_impl_all;
    use testing::with_watchdog;

    use super::*;
    use crate::fake::{FAKE_LOCAL_PORT, FAKE_P2P_PORT, FakeConnection, FakeEngine};
    use crate::{DeviceEvent, ErrorCode, IceServersRequestRef, MockEngine, OperationHandle};

    assert_impl_all!(Device: Send, Sync, Clone);

    fn options() -> DeviceOptions {
        DeviceOptions::builder("pr-1", "de-1", "key").build().unwrap()
    }

    fn started() -> (Arc<FakeEngine>, Device) {
        let fake = Arc::new(FakeEngine::new());
        let device = Device::new(fake.clone());
        device.set_options(&options()).unwrap();
        block_on(device.start()).unwrap();
        (fake, device)
    }

    #[test]
    fn start_requires_options() {
        with_watchdog(|| {
            let device = Device::new(Arc::new(FakeEngine::new()));

            let error = block_on(device.start()).unwrap_err();
            assert_eq!(error.engine_code(), Some(ErrorCode::InvalidState));
        });
    }

    #[test]
    fn start_failure_is_reported() {
        with_watchdog(|| {
            let fake = Arc::new(FakeEngine::new());
            fake.set_start_status(ErrorCode::Failed);
            let device = Device::new(fake.clone());
            device.set_options(&options()).unwrap();

            let error = block_on(device.start()).unwrap_err();
            assert_eq!(error.engine_code(), Some(ErrorCode::Failed));
            assert!(!fake.is_started());
            assert_eq!(fake.live_operations(), 0);
        });
    }

    #[test]
    fn start_and_close() {
        with_watchdog(|| {
            let (fake, device) = started();
            assert!(fake.is_started());
            assert_eq!(fake.options(), Some(options()));

            let mut events = device.device_events();
            events.subscribe().unwrap();

            block_on(device.close()).unwrap();
            assert_eq!(block_on(events.next()).unwrap(), DeviceEvent::Closed);
        });
    }

    #[test]
    fn stop_fails_outstanding_waits() {
        with_watchdog(|| {
            let (fake, device) = started();
            let mut events = device.device_events();
            let pending = events.start_or_rearm().unwrap();

            device.stop();

            assert_eq!(block_on(pending).unwrap_err().code(), ErrorCode::Stopped);
            assert!(fake.is_stopped());
        });
    }

    #[test]
    fn options_are_forwarded_to_engine() {
        let mut engine = MockEngine::new();
        engine
            .expect_set_options()
            .withf(|options| options.product_id() == "pr-1" && options.server_port() == 4433)
            .times(1)
            .returning(|_| Ok(()));

        let device = Device::new(Arc::new(engine));
        let options = DeviceOptions::builder("pr-1", "de-1", "key")
            .server_port(4433)
            .build()
            .unwrap();

        device.set_options(&options).unwrap();
    }

    #[test]
    fn options_rejected_by_engine_are_reported() {
        with_watchdog(|| {
            let (_fake, device) = started();

            let error = device.set_options(&options()).unwrap_err();
            assert_eq!(error.engine_code(), Some(ErrorCode::InvalidState));
        });
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let fake = Arc::new(FakeEngine::new());
        let device = Device::new(fake.clone());

        device.set_log_level("trace").unwrap();
        assert_eq!(fake.log_level().as_deref(), Some("trace"));

        let error = device.set_log_level("verbose").unwrap_err();
        assert_eq!(error.engine_code(), Some(ErrorCode::InvalidArgument));
    }

    #[test]
    fn engine_logs_are_forwarded() {
        with_watchdog(|| {
            let fake = Arc::new(FakeEngine::new());
            let device = Device::new(fake.clone());

            assert!(!fake.has_log_callback());
            device.forward_engine_logs();
            assert!(fake.has_log_callback());

            fake.emit_log(LogMessage::new(LogSeverity::Info, "attached to basestation"));
            fake.wait_idle();

            device.stop();
            assert!(!fake.has_log_callback());
        });
    }

    #[test]
    fn ice_servers_are_read_into_owned_values() {
        with_watchdog(|| {
            let (fake, device) = started();
            fake.set_ice_servers(vec![
                IceServer::new(vec!["stun:stun.example.net".to_string()], None, None),
                IceServer::new(
                    vec!["turn:turn.example.net:3478?transport=udp".to_string()],
                    Some("user".to_string()),
                    Some("secret".to_string()),
                ),
            ]);

            let servers = block_on(device.request_ice_servers("client-1")).unwrap();

            let [stun, turn] = servers.as_slice() else {
                panic!("expected two servers, got {servers:?}");
            };
            assert!(!stun.is_turn());
            assert!(turn.is_turn());
            assert_eq!(turn.username(), Some("user"));
            assert_eq!(turn.credential(), Some("secret"));
            assert_eq!(fake.live_ice_requests(), 0);
        });
    }

    #[test]
    fn ice_servers_require_attached_device() {
        with_watchdog(|| {
            let device = Device::new(Arc::new(FakeEngine::new()));

            let error = block_on(device.request_ice_servers("client-1")).unwrap_err();
            assert_eq!(error.engine_code(), Some(ErrorCode::NotAttached));
        });
    }

    #[test]
    fn ice_request_is_freed_when_dropped_early() {
        let mut engine = MockEngine::new();
        engine
            .expect_ice_servers_request_new()
            .return_const(IceServersRequestRef::from_raw(5));
        engine
            .expect_operation_new()
            .return_const(OperationHandle::from_raw(6));
        engine.expect_ice_servers_request_send().return_const(());
        engine.expect_operation_set_callback().return_const(());
        engine.expect_operation_free().times(1).return_const(());
        engine
            .expect_ice_servers_request_free()
            .with(eq(IceServersRequestRef::from_raw(5)))
            .times(1)
            .return_const(());

        let device = Device::new(Arc::new(engine));
        let mut request = Box::pin(device.request_ice_servers("client-1"));

        assert!(
            futures::FutureExt::now_or_never(request.as_mut()).is_none(),
            "engine never completes, so the request stays pending"
        );
        drop(request);
    }

    #[test]
    fn coap_listener_parses_route() {
        let device = Device::new(Arc::new(FakeEngine::new()));
        let listener = device.coap_listener(CoapMethod::Put, "/pump//target/");

        assert_eq!(listener.kind().method(), CoapMethod::Put);
        assert_eq!(listener.kind().path(), ["pump", "target"]);
    }

    #[test]
    fn configuration_reports_bound_ports_after_start() {
        with_watchdog(|| {
            let fake = Arc::new(FakeEngine::new());
            let device = Device::new(fake.clone());

            assert_eq!(
                device.configuration().unwrap_err().engine_code(),
                Some(ErrorCode::InvalidState)
            );

            device.set_options(&options()).unwrap();
            assert_eq!(device.configuration().unwrap().local_port(), 0);

            block_on(device.start()).unwrap();

            let configuration = device.configuration().unwrap();
            assert_eq!(configuration.product_id(), "pr-1");
            assert_eq!(configuration.device_id(), "de-1");
            assert_eq!(configuration.local_port(), FAKE_LOCAL_PORT);
            assert_eq!(configuration.p2p_port(), FAKE_P2P_PORT);
            assert!(!configuration.device_fingerprint().is_empty());
        });
    }

    #[test]
    fn detached_device_cannot_request_ice_servers() {
        with_watchdog(|| {
            let fake = Arc::new(FakeEngine::new());
            let device = Device::new(fake.clone());
            device.set_options(&options()).unwrap();
            device.set_basestation_attach(false).unwrap();
            block_on(device.start()).unwrap();

            let error = block_on(device.request_ice_servers("client-1")).unwrap_err();
            assert_eq!(error.engine_code(), Some(ErrorCode::NotAttached));

            assert_eq!(
                device.set_basestation_attach(true).unwrap_err().engine_code(),
                Some(ErrorCode::InvalidState)
            );
        });
    }

    #[test]
    fn mdns_announcement_is_extended() {
        let fake = Arc::new(FakeEngine::new());
        let device = Device::new(fake.clone());

        device.mdns_add_subtype("heatpump").unwrap();
        device.mdns_add_txt_item("foo", "bar").unwrap();

        assert_eq!(fake.mdns_subtypes(), ["heatpump"]);
        assert_eq!(
            fake.mdns_txt_items(),
            [("foo".to_string(), "bar".to_string())]
        );
        assert_eq!(
            device.mdns_add_subtype("").unwrap_err().engine_code(),
            Some(ErrorCode::InvalidArgument)
        );
    }

    #[test]
    fn server_connect_tokens_round_trip_through_engine() {
        let fake = Arc::new(FakeEngine::new());
        let device = Device::new(fake.clone());

        let token = device.create_server_connect_token().unwrap();
        device.add_server_connect_token(&token).unwrap();

        assert_eq!(fake.server_connect_tokens(), [token]);
        assert!(!device.are_server_connect_tokens_synchronized().unwrap());

        fake.synchronize_server_connect_tokens();
        assert!(device.are_server_connect_tokens_synchronized().unwrap());
    }

    #[test]
    fn connection_details_are_read_from_engine() {
        let fake = Arc::new(FakeEngine::new());
        let device = Device::new(fake.clone());
        let client = ConnectionRef::from_raw(77);

        fake.connect_client(
            client,
            FakeConnection::new("f00d").local().password_authenticated("alice"),
        );

        let connection = device.connection(client);
        assert_eq!(connection.connection_ref(), client);
        assert_eq!(connection.client_fingerprint().unwrap(), "f00d");
        assert!(connection.is_local());
        assert!(connection.is_password_authenticated());
        assert_eq!(connection.password_authentication_username().unwrap(), "alice");

        assert_eq!(
            device
                .connection(ConnectionRef::from_raw(78))
                .client_fingerprint()
                .unwrap_err()
                .engine_code(),
            Some(ErrorCode::NotFound)
        );
    }
}
