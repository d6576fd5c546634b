//! Registry of live sessions, one per peer id.
//!
//! The manager runs as a command loop fed by the event bus, which
//! serializes every registry mutation: peers appearing and leaving,
//! inbound signaling for unknown senders, and user actions routed to
//! their target session.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use roomdrop_events::{Event, EventBus, EventKind};
use roomdrop_protocol::{EngineConfig, PeerInfo, SessionFrame, SignalFrame};
use roomdrop_transfer::OutgoingFile;

use crate::link::ServerLink;
use crate::relay::RelayPeerSession;
use crate::rtc::RtcPeerSession;

/// A session of either transport.
#[derive(Clone)]
pub enum PeerHandle {
    Rtc(Arc<RtcPeerSession>),
    Relay(Arc<RelayPeerSession>),
}

enum Command {
    Event(Event),
    SessionIds(oneshot::Sender<Vec<String>>),
}

/// Owns the `peer id → session` registry.
pub struct PeersManager {
    tx: mpsc::Sender<Command>,
    cancel: CancellationToken,
    loop_handle: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

struct Ctx {
    bus: Arc<EventBus>,
    link: Arc<dyn ServerLink>,
    config: Arc<EngineConfig>,
}

impl PeersManager {
    /// Subscribes to the bus and starts the command loop. Must be
    /// called from within a tokio runtime.
    pub fn spawn(bus: Arc<EventBus>, link: Arc<dyn ServerLink>, config: Arc<EngineConfig>) -> Self {
        let (tx, rx) = mpsc::channel::<Command>(64);

        // `peer-joined` is deliberately absent: the joining peer dials
        // everyone it finds in its `peers` list, and the sessions here
        // are created as callees when its signaling arrives.
        for kind in [
            EventKind::Peers,
            EventKind::PeerLeft,
            EventKind::Signal,
            EventKind::Relay,
            EventKind::FilesSelected,
            EventKind::SendText,
        ] {
            let tx = tx.clone();
            bus.on(kind, move |event| {
                if tx.try_send(Command::Event(event.clone())).is_err() {
                    warn!(kind = ?event.kind(), "manager queue full, dropping event");
                }
            });
        }

        let cancel = CancellationToken::new();
        let ctx = Ctx {
            bus,
            link,
            config,
        };
        let loop_handle = tokio::spawn(run(rx, ctx, cancel.clone()));

        Self {
            tx,
            cancel,
            loop_handle: std::sync::Mutex::new(Some(loop_handle)),
        }
    }

    /// Ids of all live sessions.
    pub async fn session_ids(&self) -> Vec<String> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::SessionIds(tx)).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Stops the loop and closes every session.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.loop_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn run(mut rx: mpsc::Receiver<Command>, ctx: Ctx, cancel: CancellationToken) {
    let mut sessions: HashMap<String, PeerHandle> = HashMap::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            cmd = rx.recv() => match cmd {
                Some(Command::Event(event)) => handle_event(&ctx, &mut sessions, event).await,
                Some(Command::SessionIds(reply)) => {
                    let _ = reply.send(sessions.keys().cloned().collect());
                }
                None => break,
            },
        }
    }

    for (peer_id, handle) in sessions.drain() {
        debug!(peer = %peer_id, "closing session on shutdown");
        close_session(handle).await;
    }
}

async fn handle_event(ctx: &Ctx, sessions: &mut HashMap<String, PeerHandle>, event: Event) {
    match event {
        Event::Peers(peers) => {
            for peer in peers {
                ensure_peer(ctx, sessions, peer).await;
            }
        }
        Event::PeerLeft { peer_id } => {
            if let Some(handle) = sessions.remove(&peer_id) {
                info!(peer = %peer_id, "peer left, closing session");
                close_session(handle).await;
            }
        }
        Event::Signal(signal) => on_signal(ctx, sessions, signal).await,
        Event::Relay { sender, frame } => on_relay(ctx, sessions, sender, frame).await,
        Event::FilesSelected { to, files } => on_files_selected(sessions, &to, files).await,
        Event::SendText { to, text } => on_send_text(sessions, &to, &text).await,
        _ => {}
    }
}

/// Creates a session for a listed peer, or refreshes the one we have.
async fn ensure_peer(ctx: &Ctx, sessions: &mut HashMap<String, PeerHandle>, peer: PeerInfo) {
    match sessions.get(&peer.id) {
        Some(PeerHandle::Rtc(session)) => session.refresh().await,
        Some(PeerHandle::Relay(_)) => {}
        None => {
            let handle = if ctx.config.rtc_supported && peer.rtc_supported {
                info!(peer = %peer.id, transport = "rtc", "creating session");
                let session = RtcPeerSession::new(
                    peer.id.clone(),
                    true,
                    ctx.config.clone(),
                    ctx.link.clone(),
                    ctx.bus.clone(),
                );
                session.open().await;
                PeerHandle::Rtc(session)
            } else {
                info!(peer = %peer.id, transport = "relay", "creating session");
                PeerHandle::Relay(RelayPeerSession::new(
                    peer.id.clone(),
                    ctx.config.clone(),
                    ctx.link.clone(),
                    ctx.bus.clone(),
                ))
            };
            sessions.insert(peer.id, handle);
        }
    }
}

/// Routes an inbound signaling frame, creating a callee-role session
/// for an unknown sender.
async fn on_signal(ctx: &Ctx, sessions: &mut HashMap<String, PeerHandle>, signal: SignalFrame) {
    let Some(sender) = signal.sender.clone() else {
        warn!("signal without sender, dropping");
        return;
    };

    if !sessions.contains_key(&sender) {
        info!(peer = %sender, transport = "rtc", role = "callee", "creating session");
        let session = RtcPeerSession::new(
            sender.clone(),
            false,
            ctx.config.clone(),
            ctx.link.clone(),
            ctx.bus.clone(),
        );
        session.open().await;
        sessions.insert(sender.clone(), PeerHandle::Rtc(session));
    }

    match sessions.get(&sender) {
        Some(PeerHandle::Rtc(session)) => session.handle_signal(signal).await,
        Some(PeerHandle::Relay(_)) => {
            warn!(peer = %sender, "signal for a relay session, dropping");
        }
        None => {}
    }
}

/// Routes a relayed session frame, creating a relay session for an
/// unknown sender.
async fn on_relay(
    ctx: &Ctx,
    sessions: &mut HashMap<String, PeerHandle>,
    sender: String,
    frame: SessionFrame,
) {
    if !sessions.contains_key(&sender) {
        info!(peer = %sender, transport = "relay", "creating session");
        let session = RelayPeerSession::new(
            sender.clone(),
            ctx.config.clone(),
            ctx.link.clone(),
            ctx.bus.clone(),
        );
        sessions.insert(sender.clone(), PeerHandle::Relay(session));
    }

    match sessions.get(&sender) {
        Some(PeerHandle::Relay(session)) => session.handle_frame(frame).await,
        Some(PeerHandle::Rtc(_)) => {
            warn!(peer = %sender, "relayed frame for a direct session, dropping");
        }
        None => {}
    }
}

async fn on_files_selected(
    sessions: &HashMap<String, PeerHandle>,
    to: &str,
    files: Vec<OutgoingFile>,
) {
    match sessions.get(to) {
        Some(PeerHandle::Rtc(session)) => session.send_files(files).await,
        Some(PeerHandle::Relay(session)) => session.send_files(files).await,
        None => warn!(peer = %to, "files selected for an unknown peer, dropping"),
    }
}

async fn on_send_text(sessions: &HashMap<String, PeerHandle>, to: &str, text: &str) {
    match sessions.get(to) {
        Some(PeerHandle::Rtc(session)) => session.send_text(text).await,
        Some(PeerHandle::Relay(session)) => session.send_text(text).await,
        None => warn!(peer = %to, "text for an unknown peer, dropping"),
    }
}

async fn close_session(handle: PeerHandle) {
    match handle {
        PeerHandle::Rtc(session) => session.close().await,
        PeerHandle::Relay(session) => session.close(),
    }
}
