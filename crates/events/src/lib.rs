//! In-process publish/subscribe with typed event kinds.
//!
//! Dispatch is synchronous: [`EventBus::fire`] invokes every listener
//! registered for the event's kind, in registration order, before it
//! returns. Listeners therefore run on the firing task and must not
//! block; async consumers bridge through [`EventBus::forward`], which
//! enqueues clones into a tokio channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::warn;

use roomdrop_protocol::{PeerInfo, SessionFrame, SignalFrame};
use roomdrop_transfer::{OutgoingFile, ReceivedFile};

/// Discriminant used for listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Peers,
    PeerJoined,
    PeerLeft,
    Signal,
    Relay,
    FileProgress,
    FileReceived,
    TextReceived,
    NotifyUser,
    FilesSelected,
    SendText,
}

/// Everything that travels over the bus.
///
/// The first five variants originate at the server connection; the
/// middle four are surfaced to the embedder; the last two are consumed
/// from it.
#[derive(Debug, Clone)]
pub enum Event {
    Peers(Vec<PeerInfo>),
    PeerJoined(PeerInfo),
    PeerLeft { peer_id: String },
    Signal(SignalFrame),
    Relay { sender: String, frame: SessionFrame },
    FileProgress { sender: String, progress: f64 },
    FileReceived { sender: String, file: ReceivedFile },
    TextReceived { sender: String, text: String },
    NotifyUser { message: String },
    FilesSelected { to: String, files: Vec<OutgoingFile> },
    SendText { to: String, text: String },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Peers(_) => EventKind::Peers,
            Event::PeerJoined(_) => EventKind::PeerJoined,
            Event::PeerLeft { .. } => EventKind::PeerLeft,
            Event::Signal(_) => EventKind::Signal,
            Event::Relay { .. } => EventKind::Relay,
            Event::FileProgress { .. } => EventKind::FileProgress,
            Event::FileReceived { .. } => EventKind::FileReceived,
            Event::TextReceived { .. } => EventKind::TextReceived,
            Event::NotifyUser { .. } => EventKind::NotifyUser,
            Event::FilesSelected { .. } => EventKind::FilesSelected,
            Event::SendText { .. } => EventKind::SendText,
        }
    }
}

type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Process-wide synchronous event bus.
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<HashMap<EventKind, Vec<Listener>>>,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `listener` for events of `kind`.
    pub fn on(&self, kind: EventKind, listener: impl Fn(&Event) + Send + Sync + 'static) {
        let mut map = self.listeners.lock().unwrap();
        map.entry(kind).or_default().push(Arc::new(listener));
    }

    /// Dispatches `event` to every listener of its kind, in
    /// registration order, before returning.
    pub fn fire(&self, event: Event) {
        // Snapshot outside the lock so listeners may register or fire
        // from within a callback.
        let snapshot: Vec<Listener> = {
            let map = self.listeners.lock().unwrap();
            match map.get(&event.kind()) {
                Some(listeners) => listeners.clone(),
                None => return,
            }
        };
        for listener in snapshot {
            listener(&event);
        }
    }

    /// Registers a listener that clones events of `kind` into `tx`.
    /// Events are dropped (with a warning) when the channel is full or
    /// closed, keeping dispatch non-blocking.
    pub fn forward(&self, kind: EventKind, tx: mpsc::Sender<Event>) {
        self.on(kind, move |event| {
            if let Err(e) = tx.try_send(event.clone()) {
                warn!(kind = ?event.kind(), "dropping bus event: {e}");
            }
        });
    }
}
