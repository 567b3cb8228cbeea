/// A TURN or STUN server returned by the basestation for WebRTC connectivity.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IceServer {
    urls: Vec<String>,
    username: Option<String>,
    credential: Option<String>,
}

impl IceServer {
    /// Creates a server description. STUN servers have no username or credential.
    #[must_use]
    pub fn new(urls: Vec<String>, username: Option<String>, credential: Option<String>) -> Self {
        Self {
            urls,
            username,
            credential,
        }
    }

    /// The `stun:` or `turn:` URLs of the server.
    #[must_use]
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// The TURN username, if any.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// The TURN credential, if any.
    #[must_use]
    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    /// Whether the server relays traffic (has credentials) rather than only reflecting addresses.
    #[must_use]
    pub fn is_turn(&self) -> bool {
        self.username.is_some() && self.credential.is_some()
    }
}
