//! Relayed peer session.
//!
//! Fallback transport for peers without a direct channel: every
//! session frame is wrapped in a `relay` envelope and forwarded by the
//! rendezvous service. Binary chunks ride the same path base64-encoded
//! as `chunk` frames, so file transfer works identically, just slower.

use std::sync::Arc;

use tracing::{debug, warn};

use roomdrop_events::EventBus;
use roomdrop_protocol::{EngineConfig, ServerMessage, SessionFrame};
use roomdrop_transfer::OutgoingFile;

use crate::link::ServerLink;
use crate::peer_session::PeerSession;
use crate::sink::{FrameSink, SinkFrame, SINK_CAPACITY};

/// A peer session tunneled through the server connection.
pub struct RelayPeerSession {
    peer_id: String,
    session: PeerSession,
    sink: FrameSink,
    drain: tokio::task::JoinHandle<()>,
}

impl RelayPeerSession {
    pub fn new(
        peer_id: String,
        config: Arc<EngineConfig>,
        link: Arc<dyn ServerLink>,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        let session = PeerSession::new(peer_id.clone(), bus, config);
        let (sink, mut rx) = FrameSink::channel(SINK_CAPACITY);

        let to = peer_id.clone();
        let drain = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let frame = match frame {
                    SinkFrame::Json(frame) => frame,
                    SinkFrame::Binary(bytes) => SessionFrame::Chunk {
                        data: bytes.to_vec(),
                    },
                };
                link.send(&ServerMessage::Relay {
                    to: Some(to.clone()),
                    sender: None,
                    frame,
                });
            }
        });

        Arc::new(Self {
            peer_id,
            session,
            sink,
            drain,
        })
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub async fn send_files(&self, files: Vec<OutgoingFile>) {
        self.session.send_files(&self.sink, files).await;
    }

    pub async fn send_text(&self, text: &str) {
        self.session.send_text(&self.sink, text).await;
    }

    /// Feeds one relayed frame into the session protocol.
    pub async fn handle_frame(&self, frame: SessionFrame) {
        if let Err(e) = self.session.handle_frame(&self.sink, frame).await {
            // No channel to tear down on this transport; the poisoned
            // inbound state has already been cleared.
            warn!(peer = %self.peer_id, error = %e, "fatal protocol error on relay transport");
        }
    }

    pub fn close(&self) {
        self.drain.abort();
        debug!(peer = %self.peer_id, "relay session closed");
    }
}

impl Drop for RelayPeerSession {
    fn drop(&mut self) {
        self.drain.abort();
    }
}
