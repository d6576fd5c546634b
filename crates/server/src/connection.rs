//! The rendezvous WebSocket link.
//!
//! A single socket is shared by the whole engine. Outbound envelopes
//! are queued through a write pump; inbound envelopes are parsed by
//! the read pump and fired onto the event bus. When the socket closes
//! for any reason the link notifies the embedder and arms exactly one
//! retry timer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use roomdrop_events::{Event, EventBus};
use roomdrop_protocol::ServerMessage;

use crate::ServerEndpoint;

/// Lifecycle of the server link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Handle to the rendezvous connection. Cheap to clone; all clones
/// share the same socket.
#[derive(Clone)]
pub struct ServerConnection {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: ServerEndpoint,
    reconnect_delay: Duration,
    bus: Arc<EventBus>,
    state: Mutex<LinkState>,
    write_tx: Mutex<Option<mpsc::Sender<tungstenite::Message>>>,
    /// The single pending retry timer, tagged with a generation so a
    /// fired timer never clears a newer one.
    retry: Mutex<Option<(u64, CancellationToken)>>,
    retry_gen: AtomicU64,
    shutdown: CancellationToken,
}

impl ServerConnection {
    pub fn new(endpoint: ServerEndpoint, reconnect_delay: Duration, bus: Arc<EventBus>) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoint,
                reconnect_delay,
                bus,
                state: Mutex::new(LinkState::Disconnected),
                write_tx: Mutex::new(None),
                retry: Mutex::new(None),
                retry_gen: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Opens the socket. A no-op while already connected or
    /// connecting, so it is safe to call on every wake-up of the
    /// hosting context. Must be called from within a tokio runtime.
    pub fn connect(&self) {
        Inner::connect(&self.inner);
    }

    /// Serializes `msg` and queues it for writing. Dropped silently
    /// when the socket is not open; callers that care re-send after
    /// reconnection.
    pub fn send(&self, msg: &ServerMessage) {
        if *self.inner.state.lock().unwrap() != LinkState::Connected {
            debug!("server link not open, dropping outbound message");
            return;
        }
        let guard = self.inner.write_tx.lock().unwrap();
        let Some(tx) = guard.as_ref() else {
            debug!("server link has no writer, dropping outbound message");
            return;
        };
        match serde_json::to_string(msg) {
            Ok(json) => {
                if tx.try_send(tungstenite::Message::Text(json.into())).is_err() {
                    debug!("server write queue unavailable, dropping outbound message");
                }
            }
            Err(e) => warn!("failed to encode server message: {e}"),
        }
    }

    pub fn state(&self) -> LinkState {
        *self.inner.state.lock().unwrap()
    }

    /// Sends a courtesy `disconnect`, closes the socket, and disarms
    /// any pending retry. The connection cannot be reused afterwards.
    pub async fn shutdown(&self) {
        self.send(&ServerMessage::Disconnect);
        Inner::cancel_retry(&self.inner);
        // Dropping the writer lets the pump drain the courtesy message
        // and emit a close frame before the read side is cancelled.
        self.inner.write_tx.lock().unwrap().take();
        tokio::task::yield_now().await;
        self.inner.shutdown.cancel();
        *self.inner.state.lock().unwrap() = LinkState::Disconnected;
        info!("server link shut down");
    }
}

impl Inner {
    fn connect(inner: &Arc<Inner>) {
        if inner.shutdown.is_cancelled() {
            return;
        }
        {
            let mut state = inner.state.lock().unwrap();
            if *state != LinkState::Disconnected {
                debug!(state = ?*state, "connect requested while link already active");
                return;
            }
            *state = LinkState::Connecting;
        }
        let inner = inner.clone();
        tokio::spawn(async move {
            Inner::run(inner).await;
        });
    }

    /// Dials the endpoint and runs the socket to completion.
    async fn run(inner: Arc<Inner>) {
        let url = inner.endpoint.url();
        debug!(%url, "dialing rendezvous service");

        let dialed = tokio::select! {
            _ = inner.shutdown.cancelled() => {
                Inner::set_disconnected(&inner);
                return;
            }
            r = tokio_tungstenite::connect_async(url.as_str()) => r,
        };

        let ws = match dialed {
            Ok((ws, _)) => ws,
            Err(e) => {
                warn!(%url, error = %e, "rendezvous dial failed");
                Inner::set_disconnected(&inner);
                Inner::on_link_lost(&inner);
                return;
            }
        };
        info!(%url, "rendezvous link established");

        let (write, read) = ws.split();
        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(256);
        *inner.write_tx.lock().unwrap() = Some(write_tx.clone());
        *inner.state.lock().unwrap() = LinkState::Connected;

        let write_handle = tokio::spawn(write_pump(write, write_rx));
        Inner::read_pump(read, &inner, &write_tx).await;

        // Close the write queue so the pump drains and sends Close.
        inner.write_tx.lock().unwrap().take();
        drop(write_tx);
        let _ = write_handle.await;

        Inner::set_disconnected(&inner);
        Inner::on_link_lost(&inner);
    }

    /// Reads envelopes until the socket dies or the link shuts down.
    async fn read_pump<S>(mut read: S, inner: &Arc<Inner>, write_tx: &mpsc::Sender<tungstenite::Message>)
    where
        S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
    {
        loop {
            tokio::select! {
                _ = inner.shutdown.cancelled() => break,

                msg = read.next() => match msg {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        inner.handle_envelope(&text, write_tx);
                    }
                    Some(Ok(tungstenite::Message::Binary(_))) => {
                        // Reserved frame type; nothing uses it yet.
                        trace!("binary control frame ignored");
                    }
                    Some(Ok(tungstenite::Message::Ping(data))) => {
                        let _ = write_tx.try_send(tungstenite::Message::Pong(data));
                    }
                    Some(Ok(tungstenite::Message::Pong(_))) => {}
                    Some(Ok(tungstenite::Message::Close(_))) => {
                        debug!("server sent close frame");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("server read error: {e}");
                        break;
                    }
                    None => {
                        debug!("server stream ended");
                        break;
                    }
                },
            }
        }
    }

    /// Parses one inbound envelope and dispatches it.
    fn handle_envelope(&self, text: &str, write_tx: &mpsc::Sender<tungstenite::Message>) {
        let msg: ServerMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                warn!("unrecognized server message, dropping: {e}");
                return;
            }
        };
        trace!(msg = ?msg, "server message");

        match msg {
            ServerMessage::Ping => {
                // Answered synchronously so the server's liveness probe
                // never waits behind application traffic.
                match serde_json::to_string(&ServerMessage::Pong) {
                    Ok(json) => {
                        let _ = write_tx.try_send(tungstenite::Message::Text(json.into()));
                    }
                    Err(e) => warn!("failed to encode pong: {e}"),
                }
            }
            ServerMessage::Peers { peers } => self.bus.fire(Event::Peers(peers)),
            ServerMessage::PeerJoined { peer } => self.bus.fire(Event::PeerJoined(peer)),
            ServerMessage::PeerLeft { peer_id } => self.bus.fire(Event::PeerLeft { peer_id }),
            ServerMessage::Signal(signal) => self.bus.fire(Event::Signal(signal)),
            ServerMessage::Relay {
                sender: Some(sender),
                frame,
                ..
            } => self.bus.fire(Event::Relay { sender, frame }),
            ServerMessage::Relay { sender: None, .. } => {
                warn!("relay frame without sender, dropping");
            }
            ServerMessage::Pong | ServerMessage::Disconnect => {
                trace!("informational server message");
            }
        }
    }

    fn set_disconnected(inner: &Arc<Inner>) {
        *inner.state.lock().unwrap() = LinkState::Disconnected;
        inner.write_tx.lock().unwrap().take();
    }

    fn on_link_lost(inner: &Arc<Inner>) {
        if inner.shutdown.is_cancelled() {
            return;
        }
        let secs = inner.reconnect_delay.as_secs_f64();
        inner.bus.fire(Event::NotifyUser {
            message: format!("Connection lost. Retrying in {secs:.0} seconds…"),
        });
        Inner::schedule_retry(inner);
    }

    fn cancel_retry(inner: &Arc<Inner>) {
        if let Some((_, token)) = inner.retry.lock().unwrap().take() {
            token.cancel();
        }
    }

    /// Arms the retry timer, cancelling any previous one first so at
    /// most one reconnect is ever pending.
    fn schedule_retry(inner: &Arc<Inner>) {
        let generation = inner.retry_gen.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();
        {
            let mut slot = inner.retry.lock().unwrap();
            if let Some((_, old)) = slot.take() {
                old.cancel();
            }
            *slot = Some((generation, token.clone()));
        }
        debug!(
            delay_secs = inner.reconnect_delay.as_secs_f64(),
            "reconnect armed"
        );

        let inner = inner.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(inner.reconnect_delay) => {
                    {
                        let mut slot = inner.retry.lock().unwrap();
                        if slot.as_ref().is_some_and(|(g, _)| *g == generation) {
                            *slot = None;
                        }
                    }
                    Inner::connect(&inner);
                }
            }
        });
    }
}

/// Writes queued messages to the socket, then a close frame once the
/// queue's senders are gone.
async fn write_pump<S>(mut write: S, mut write_rx: mpsc::Receiver<tungstenite::Message>)
where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    while let Some(msg) = write_rx.recv().await {
        if let Err(e) = write.send(msg).await {
            warn!("server write error: {e}");
            return;
        }
    }
    let _ = write.send(tungstenite::Message::Close(None)).await;
}
