//! Outbound half of the rendezvous link, as sessions see it.

use roomdrop_protocol::ServerMessage;

/// Sends envelopes to the rendezvous service.
///
/// Sessions use this for signaling and relayed frames. Sends are
/// fire-and-forget: a closed link drops the message, matching the
/// server connection's own semantics.
pub trait ServerLink: Send + Sync {
    fn send(&self, msg: &ServerMessage);
}
