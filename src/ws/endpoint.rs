//! Resolution of the chat backend WebSocket endpoint.

use url::Url;

use crate::Result;
use crate::error::Error;

/// Port the LexAI backend listens on for WebSocket traffic.
pub const BACKEND_PORT: u16 = 8080;
/// Path of the chat socket on the backend.
pub const SOCKET_PATH: &str = "/ws";
/// Used when neither an override nor a hosting page is available.
pub const LOOPBACK_ENDPOINT: &str = "ws://localhost:8080/ws";

/// The page hosting the chat client.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostContext {
    /// Whether the page itself was served over a secure scheme
    pub secure: bool,
    /// Hostname of the page, without port
    pub hostname: String,
}

impl HostContext {
    #[must_use]
    pub fn new<S: Into<String>>(hostname: S, secure: bool) -> Self {
        Self {
            secure,
            hostname: hostname.into(),
        }
    }

    /// Derive the context from the page URL, e.g. `https://lexai.app/chat`.
    pub fn from_url(page: &str) -> Result<Self> {
        let url = Url::parse(page)?;
        let hostname = url
            .host_str()
            .ok_or_else(|| Error::validation(format!("page url {page} has no host")))?;

        Ok(Self::new(hostname, url.scheme() == "https"))
    }
}

/// Compute the endpoint to connect to.
///
/// A non-empty `endpoint_override` always wins. Otherwise the endpoint is built
/// from the hosting page (`wss` for secure pages), falling back to
/// [`LOOPBACK_ENDPOINT`].
#[must_use]
pub fn resolve(endpoint_override: Option<&str>, host: Option<&HostContext>) -> String {
    if let Some(endpoint) = endpoint_override.map(str::trim).filter(|e| !e.is_empty()) {
        return endpoint.to_owned();
    }

    match host {
        Some(host) => {
            let scheme = if host.secure { "wss" } else { "ws" };
            format!("{scheme}://{}:{BACKEND_PORT}{SOCKET_PATH}", host.hostname)
        }
        None => LOOPBACK_ENDPOINT.to_owned(),
    }
}
