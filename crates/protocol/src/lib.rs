//! Wire protocol for roomdrop.
//!
//! Two protocols share this crate: the JSON envelope spoken on the
//! rendezvous (server) link, and the frame protocol spoken between two
//! peers on a data channel. Both are type-discriminated JSON; file
//! chunks on a direct channel travel as raw binary frames instead.

pub mod constants;
pub mod envelope;
pub mod frames;
pub mod text;
pub mod types;

pub(crate) mod base64_bytes;

pub use envelope::{ServerMessage, SignalFrame};
pub use frames::SessionFrame;
pub use types::{EngineConfig, IceServerConfig, PeerInfo};

/// Errors from envelope and payload handling.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("text payload is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}
