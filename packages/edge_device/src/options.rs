use crate::{Error, Result};

/// The basestation port used when none is configured.
pub const DEFAULT_SERVER_PORT: u16 = 443;

/// Configuration applied to a device before it is started.
///
/// Create an instance with [`DeviceOptions::builder()`]. The three identity values are required;
/// everything else falls back to engine defaults when not set.
///
/// # Example
///
/// ```
/// use edge_device::DeviceOptions;
///
/// let options = DeviceOptions::builder("pr-12345678", "de-abcdefgh", "-----BEGIN EC KEY-----")
///     .server_url("pr-12345678.devices.example.net")
///     .app_name("heat pump")
///     .app_version("1.2.0")
///     .enable_mdns(true)
///     .build()
///     .unwrap();
///
/// assert_eq!(options.product_id(), "pr-12345678");
/// assert_eq!(options.server_port(), 443);
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceOptions {
    product_id: String,
    device_id: String,
    private_key: String,
    server_url: Option<String>,
    server_port: u16,
    root_certs: Option<String>,
    app_name: Option<String>,
    app_version: Option<String>,
    local_port: Option<u16>,
    p2p_port: Option<u16>,
    enable_mdns: bool,
}

impl DeviceOptions {
    /// Starts building options for the given device identity.
    #[must_use]
    pub fn builder(
        product_id: impl Into<String>,
        device_id: impl Into<String>,
        private_key: impl Into<String>,
    ) -> DeviceOptionsBuilder {
        DeviceOptionsBuilder {
            options: Self {
                product_id: product_id.into(),
                device_id: device_id.into(),
                private_key: private_key.into(),
                server_url: None,
                server_port: DEFAULT_SERVER_PORT,
                root_certs: None,
                app_name: None,
                app_version: None,
                local_port: None,
                p2p_port: None,
                enable_mdns: false,
            },
        }
    }

    /// The product ID assigned by the basestation operator.
    #[must_use]
    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    /// The device ID assigned by the basestation operator.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// The device private key in PEM format.
    #[must_use]
    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    /// The basestation host name, if overridden.
    #[must_use]
    pub fn server_url(&self) -> Option<&str> {
        self.server_url.as_deref()
    }

    /// The basestation port.
    #[must_use]
    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    /// Root certificates for the basestation connection in PEM format, if overridden.
    #[must_use]
    pub fn root_certs(&self) -> Option<&str> {
        self.root_certs.as_deref()
    }

    /// The application name reported to clients.
    #[must_use]
    pub fn app_name(&self) -> Option<&str> {
        self.app_name.as_deref()
    }

    /// The application version reported to clients.
    #[must_use]
    pub fn app_version(&self) -> Option<&str> {
        self.app_version.as_deref()
    }

    /// The local UDP port, if fixed.
    #[must_use]
    pub fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    /// The UDP port used for peer-to-peer connections, if fixed.
    #[must_use]
    pub fn p2p_port(&self) -> Option<u16> {
        self.p2p_port
    }

    /// Whether the device announces itself on the local network with mDNS.
    #[must_use]
    pub fn is_mdns_enabled(&self) -> bool {
        self.enable_mdns
    }

    /// Checks the options for values the engine would reject.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOptions`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        require_non_empty("product_id", &self.product_id)?;
        require_non_empty("device_id", &self.device_id)?;
        require_non_empty("private_key", &self.private_key)?;

        if let Some(url) = &self.server_url {
            require_non_empty("server_url", url)?;
        }

        if self.server_port == 0 {
            return Err(Error::InvalidOptions {
                field: "server_port",
                problem: "must not be zero".to_string(),
            });
        }

        Ok(())
    }
}

fn require_non_empty(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidOptions {
            field,
            problem: "must not be empty".to_string(),
        });
    }

    Ok(())
}

/// Builds [`DeviceOptions`].
///
/// Required parameters (passed to [`DeviceOptions::builder()`]):
/// * `product_id`
/// * `device_id`
/// * `private_key`
#[derive(Debug)]
#[must_use]
pub struct DeviceOptionsBuilder {
    options: DeviceOptions,
}

impl DeviceOptionsBuilder {
    /// Overrides the basestation host name.
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.options.server_url = Some(url.into());
        self
    }

    /// Overrides the basestation port. Defaults to [`DEFAULT_SERVER_PORT`].
    pub fn server_port(mut self, port: u16) -> Self {
        self.options.server_port = port;
        self
    }

    /// Overrides the root certificates used to verify the basestation.
    pub fn root_certs(mut self, certs: impl Into<String>) -> Self {
        self.options.root_certs = Some(certs.into());
        self
    }

    /// Sets the application name reported to clients.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.options.app_name = Some(name.into());
        self
    }

    /// Sets the application version reported to clients.
    pub fn app_version(mut self, version: impl Into<String>) -> Self {
        self.options.app_version = Some(version.into());
        self
    }

    /// Fixes the local UDP port. Port 0 lets the operating system choose.
    pub fn local_port(mut self, port: u16) -> Self {
        self.options.local_port = Some(port);
        self
    }

    /// Fixes the UDP port used for peer-to-peer connections.
    pub fn p2p_port(mut self, port: u16) -> Self {
        self.options.p2p_port = Some(port);
        self
    }

    /// Enables or disables mDNS announcements. Disabled by default.
    pub fn enable_mdns(mut self, enable: bool) -> Self {
        self.options.enable_mdns = enable;
        self
    }

    /// Validates and returns the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOptions`] if a required value is empty or a port is invalid.
    pub fn build(self) -> Result<DeviceOptions> {
        self.options.validate()?;
        Ok(self.options)
    }
}

/// The configuration a device runs with, as reported by the engine.
///
/// Identity and application values come from the applied [`DeviceOptions`]. The ports are the
/// ones the engine actually bound, which differ from the options when those left them open.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceConfiguration {
    product_id: String,
    device_id: String,
    app_name: Option<String>,
    app_version: Option<String>,
    local_port: u16,
    p2p_port: u16,
    device_fingerprint: String,
}

impl DeviceConfiguration {
    /// Combines applied options with the values resolved by the engine.
    #[must_use]
    pub fn new(
        options: &DeviceOptions,
        local_port: u16,
        p2p_port: u16,
        device_fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            product_id: options.product_id.clone(),
            device_id: options.device_id.clone(),
            app_name: options.app_name.clone(),
            app_version: options.app_version.clone(),
            local_port,
            p2p_port,
            device_fingerprint: device_fingerprint.into(),
        }
    }

    /// The product ID.
    #[must_use]
    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    /// The device ID.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// The application name reported to clients, if set.
    #[must_use]
    pub fn app_name(&self) -> Option<&str> {
        self.app_name.as_deref()
    }

    /// The application version reported to clients, if set.
    #[must_use]
    pub fn app_version(&self) -> Option<&str> {
        self.app_version.as_deref()
    }

    /// The bound local UDP port, or 0 before the device has started.
    #[must_use]
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// The bound peer-to-peer UDP port, or 0 before the device has started.
    #[must_use]
    pub fn p2p_port(&self) -> u16 {
        self.p2p_port
    }

    /// The fingerprint of the device public key, as hex.
    #[must_use]
    pub fn device_fingerprint(&self) -> &str {
        &self.device_fingerprint
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn builder() -> DeviceOptionsBuilder {
        DeviceOptions::builder("pr-1", "de-1", "key")
    }

    #[test]
    fn defaults() {
        let options = builder().build().unwrap();

        assert_eq!(options.server_url(), None);
        assert_eq!(options.server_port(), DEFAULT_SERVER_PORT);
        assert_eq!(options.local_port(), None);
        assert!(!options.is_mdns_enabled());
    }

    #[test]
    fn all_values_are_kept() {
        let options = builder()
            .server_url("example.net")
            .server_port(4433)
            .root_certs("certs")
            .app_name("app")
            .app_version("1.0")
            .local_port(5592)
            .p2p_port(5593)
            .enable_mdns(true)
            .build()
            .unwrap();

        assert_eq!(options.server_url(), Some("example.net"));
        assert_eq!(options.server_port(), 4433);
        assert_eq!(options.root_certs(), Some("certs"));
        assert_eq!(options.app_name(), Some("app"));
        assert_eq!(options.app_version(), Some("1.0"));
        assert_eq!(options.local_port(), Some(5592));
        assert_eq!(options.p2p_port(), Some(5593));
        assert!(options.is_mdns_enabled());
    }

    #[test]
    fn empty_identity_is_rejected() {
        let error = DeviceOptions::builder("pr-1", " ", "key").build().unwrap_err();

        assert!(matches!(
            error,
            Error::InvalidOptions {
                field: "device_id",
                ..
            }
        ));
    }

    #[test]
    fn zero_server_port_is_rejected() {
        let error = builder().server_port(0).build().unwrap_err();

        assert!(matches!(
            error,
            Error::InvalidOptions {
                field: "server_port",
                ..
            }
        ));
    }

    #[test]
    fn empty_server_url_is_rejected() {
        let error = builder().server_url("").build().unwrap_err();

        assert!(matches!(
            error,
            Error::InvalidOptions {
                field: "server_url",
                ..
            }
        ));
    }

    #[test]
    fn configuration_takes_identity_from_options() {
        let options = builder().app_name("app").local_port(0).build().unwrap();

        let configuration = DeviceConfiguration::new(&options, 40_001, 5593, "ab12");

        assert_eq!(configuration.product_id(), "pr-1");
        assert_eq!(configuration.device_id(), "de-1");
        assert_eq!(configuration.app_name(), Some("app"));
        assert_eq!(configuration.app_version(), None);
        assert_eq!(configuration.local_port(), 40_001);
        assert_eq!(configuration.p2p_port(), 5593);
        assert_eq!(configuration.device_fingerprint(), "ab12");
    }
}
