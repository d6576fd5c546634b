//! Peer descriptors and engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;

/// A peer as announced by the rendezvous service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    /// Opaque id, unique within the room.
    pub id: String,
    /// Whether the peer's runtime can negotiate a direct channel.
    pub rtc_supported: bool,
}

/// One STUN or TURN endpoint. Treated as opaque by the engine and
/// handed to the RTC layer verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub credential: String,
}

impl IceServerConfig {
    /// A credential-less STUN endpoint.
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: String::new(),
            credential: String::new(),
        }
    }
}

/// Process-wide engine configuration, injected at construction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// ICE servers used when negotiating direct channels.
    pub ice_servers: Vec<IceServerConfig>,
    /// Size of one binary chunk.
    pub chunk_size: usize,
    /// Flow-control bound on unacknowledged bytes.
    pub max_partition_size: u64,
    /// Server reconnect delay.
    pub reconnect_delay: Duration,
    /// Minimum progress delta per `progress` frame.
    pub progress_report_threshold: f64,
    /// Whether this runtime offers direct channels at all. When false
    /// every session falls back to the relayed transport.
    pub rtc_supported: bool,
    /// Offer loopback ICE candidates so two peers on the same host can
    /// connect directly. Off in production, useful in development.
    pub include_loopback: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServerConfig::stun("stun:stun.l.google.com:19302")],
            chunk_size: constants::CHUNK_SIZE,
            max_partition_size: constants::MAX_PARTITION_SIZE,
            reconnect_delay: constants::RECONNECT_DELAY,
            progress_report_threshold: constants::PROGRESS_REPORT_THRESHOLD,
            rtc_supported: true,
            include_loopback: false,
        }
    }
}
