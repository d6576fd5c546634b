//! Connection to the rendezvous service.
//!
//! One long-lived WebSocket carries JSON envelopes in both directions.
//! The connection reconnects itself after a fixed delay, answers
//! keepalive probes, and fans inbound envelopes out onto the event bus.

mod connection;
mod endpoint;

pub use connection::{LinkState, ServerConnection};
pub use endpoint::ServerEndpoint;
