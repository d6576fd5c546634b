//! Envelope for the rendezvous (server) link.
//!
//! Every frame on the server socket is a JSON object discriminated by
//! its `type` field. Signaling frames carry exactly one of `sdp` or
//! `ice`, plus `to` on the way out and `sender` on the way in; the
//! server rewrites one into the other when forwarding.

use serde::{Deserialize, Serialize};

use crate::frames::SessionFrame;
use crate::types::PeerInfo;

/// A signaling frame: an SDP description or one ICE candidate.
///
/// Both payloads are opaque to the engine; they are produced and
/// consumed by the RTC layer and merely ferried here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SignalFrame {
    /// Recipient peer id (outbound only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Originating peer id (inbound only, stamped by the server).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ice: Option<serde_json::Value>,
}

/// All frames spoken on the server socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Full room membership, sent on join and on room changes.
    #[serde(rename = "peers")]
    Peers { peers: Vec<PeerInfo> },

    /// A single peer entered the room.
    #[serde(rename = "peer-joined")]
    PeerJoined { peer: PeerInfo },

    /// A peer left the room.
    #[serde(rename = "peer-left")]
    PeerLeft {
        #[serde(rename = "peerId")]
        peer_id: String,
    },

    /// SDP/ICE exchange between two peers.
    #[serde(rename = "signal")]
    Signal(SignalFrame),

    /// A session frame tunneled through the server for peers without a
    /// direct channel.
    #[serde(rename = "relay")]
    Relay {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
        frame: SessionFrame,
    },

    /// Server keepalive probe.
    #[serde(rename = "ping")]
    Ping,

    /// Reply to `ping`.
    #[serde(rename = "pong")]
    Pong,

    /// Courtesy notice that this client is going away.
    #[serde(rename = "disconnect")]
    Disconnect,
}

impl SignalFrame {
    /// An outbound SDP signal.
    pub fn sdp(to: impl Into<String>, sdp: serde_json::Value) -> Self {
        Self {
            to: Some(to.into()),
            sdp: Some(sdp),
            ..Self::default()
        }
    }

    /// An outbound ICE candidate signal.
    pub fn ice(to: impl Into<String>, ice: serde_json::Value) -> Self {
        Self {
            to: Some(to.into()),
            ice: Some(ice),
            ..Self::default()
        }
    }
}
