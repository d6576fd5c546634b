//! Rendezvous endpoint selection.

use roomdrop_protocol::constants::DEV_SERVER_PORT;

/// Where to reach the rendezvous service.
///
/// The URL is derived from the hosting context: secure hosts get
/// `wss`, a localhost host talks to the dev server port directly, and
/// production hosts expose the service under `/server`. The path picks
/// the room flavor by local RTC capability.
#[derive(Debug, Clone)]
pub struct ServerEndpoint {
    /// Host of the page embedding the engine, e.g. `drop.example.org`.
    pub host: String,
    /// Whether the hosting context is secure (`wss` vs `ws`).
    pub secure: bool,
    /// Port of the dev rendezvous service when `host` is localhost.
    pub dev_port: u16,
    /// Whether this runtime negotiates direct channels.
    pub rtc_supported: bool,
}

impl ServerEndpoint {
    pub fn new(host: impl Into<String>, secure: bool, rtc_supported: bool) -> Self {
        Self {
            host: host.into(),
            secure,
            dev_port: DEV_SERVER_PORT,
            rtc_supported,
        }
    }

    /// The WebSocket URL to dial.
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        let authority = if self.host.starts_with("localhost") {
            format!("localhost:{}", self.dev_port)
        } else {
            format!("{}/server", self.host)
        };
        let room = if self.rtc_supported {
            "webrtc"
        } else {
            "fallback"
        };
        format!("{scheme}://{authority}/{room}")
    }
}
