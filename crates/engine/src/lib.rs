//! The assembled transfer engine.
//!
//! [`Engine`] wires the event bus, the rendezvous connection, and the
//! peers manager together. The embedder drives it entirely through the
//! bus: it listens for `peers` / `file-received` / `text-received` /
//! `file-progress` / `notify-user` events and fires `files-selected` /
//! `send-text` actions (or uses the typed convenience methods, which
//! fire the same events).

use std::sync::Arc;

use tracing::info;

use roomdrop_events::{Event, EventBus};
use roomdrop_protocol::{EngineConfig, ServerMessage};
use roomdrop_server::{ServerConnection, ServerEndpoint};
use roomdrop_session::{PeersManager, ServerLink};
use roomdrop_transfer::OutgoingFile;

pub use roomdrop_events::EventKind;
pub use roomdrop_protocol::{IceServerConfig, PeerInfo};
pub use roomdrop_transfer::ReceivedFile;

/// Adapts the server connection to the session-facing link trait.
struct LinkAdapter(ServerConnection);

impl ServerLink for LinkAdapter {
    fn send(&self, msg: &ServerMessage) {
        self.0.send(msg);
    }
}

/// One running transfer engine.
pub struct Engine {
    bus: Arc<EventBus>,
    server: ServerConnection,
    manager: PeersManager,
    config: Arc<EngineConfig>,
}

impl Engine {
    /// Builds the engine. Must be called from within a tokio runtime;
    /// call [`connect`](Self::connect) to actually join the room.
    pub fn new(config: EngineConfig, endpoint: ServerEndpoint) -> Self {
        let config = Arc::new(config);
        let bus = EventBus::new();
        let server = ServerConnection::new(endpoint, config.reconnect_delay, bus.clone());
        let link: Arc<dyn ServerLink> = Arc::new(LinkAdapter(server.clone()));
        let manager = PeersManager::spawn(bus.clone(), link, config.clone());
        info!("engine assembled");
        Self {
            bus,
            server,
            manager,
            config,
        }
    }

    /// The bus carrying every engine event. Safe to clone and hand to
    /// UI code.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Dials the rendezvous service. No-op while already connected.
    pub fn connect(&self) {
        self.server.connect();
    }

    /// Queues files for a peer. Equivalent to firing `files-selected`.
    pub fn send_files(&self, to: impl Into<String>, files: Vec<OutgoingFile>) {
        self.bus.fire(Event::FilesSelected {
            to: to.into(),
            files,
        });
    }

    /// Sends a text message to a peer. Equivalent to firing `send-text`.
    pub fn send_text(&self, to: impl Into<String>, text: impl Into<String>) {
        self.bus.fire(Event::SendText {
            to: to.into(),
            text: text.into(),
        });
    }

    /// Ids of the peers with live sessions.
    pub async fn session_ids(&self) -> Vec<String> {
        self.manager.session_ids().await
    }

    /// Leaves the room: courtesy disconnect, then closes every session.
    pub async fn shutdown(&self) {
        self.server.shutdown().await;
        self.manager.shutdown().await;
        info!("engine shut down");
    }
}
