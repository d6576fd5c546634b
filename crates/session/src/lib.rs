//! Per-peer sessions and their registry.
//!
//! A session owns the transfer protocol state for one remote peer and
//! a transport to reach it: either a direct data channel negotiated
//! via SDP/ICE, or frames relayed through the rendezvous service. The
//! [`PeersManager`] keeps one session per peer id and routes server
//! events and user actions to them.

mod link;
mod manager;
mod peer_session;
mod relay;
mod rtc;
mod sink;

pub use link::ServerLink;
pub use manager::{PeerHandle, PeersManager};
pub use peer_session::PeerSession;
pub use relay::RelayPeerSession;
pub use rtc::RtcPeerSession;
pub use sink::{FrameSink, SinkFrame};
