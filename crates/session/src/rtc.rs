//! Direct peer session over a negotiated data channel.
//!
//! The caller creates the channel and an offer as soon as the session
//! exists; the callee answers and waits for the remote-created channel
//! to appear. ICE candidates trickle through the rendezvous link in
//! both directions. Once the channel opens, queued session frames
//! drain straight onto it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use roomdrop_events::EventBus;
use roomdrop_protocol::{EngineConfig, ServerMessage, SessionFrame, SignalFrame};
use roomdrop_transfer::OutgoingFile;

use crate::link::ServerLink;
use crate::peer_session::PeerSession;
use crate::sink::{FrameSink, SinkFrame, SINK_CAPACITY};

const CHANNEL_LABEL: &str = "roomdrop";

/// A peer session whose transport is a direct data channel.
pub struct RtcPeerSession {
    peer_id: String,
    caller: bool,
    config: Arc<EngineConfig>,
    link: Arc<dyn ServerLink>,
    session: PeerSession,
    pc: tokio::sync::Mutex<Option<Arc<RTCPeerConnection>>>,
    channel: tokio::sync::Mutex<Option<Arc<RTCDataChannel>>>,
    sink: std::sync::Mutex<FrameSink>,
    sink_rx: std::sync::Mutex<Option<mpsc::Receiver<SinkFrame>>>,
    drain: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    closed: CancellationToken,
}

impl RtcPeerSession {
    /// Creates the session. `caller` is true when the peer id came
    /// from a peer list (we dial), false when the session exists
    /// because the peer signaled us first (we answer).
    ///
    /// Call [`open`](Self::open) afterwards to begin the handshake.
    pub fn new(
        peer_id: String,
        caller: bool,
        config: Arc<EngineConfig>,
        link: Arc<dyn ServerLink>,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        let session = PeerSession::new(peer_id.clone(), bus, config.clone());
        let (sink, rx) = FrameSink::channel(SINK_CAPACITY);
        Arc::new(Self {
            peer_id,
            caller,
            config,
            link,
            session,
            pc: tokio::sync::Mutex::new(None),
            channel: tokio::sync::Mutex::new(None),
            sink: std::sync::Mutex::new(sink),
            sink_rx: std::sync::Mutex::new(Some(rx)),
            drain: std::sync::Mutex::new(None),
            closed: CancellationToken::new(),
        })
    }

    /// Starts (or restarts) the channel negotiation in this session's
    /// role. Safe to call again after a channel loss.
    pub async fn open(self: &Arc<Self>) {
        self.start_handshake().await;
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn is_caller(&self) -> bool {
        self.caller
    }

    pub async fn send_files(&self, files: Vec<OutgoingFile>) {
        let sink = self.sink.lock().unwrap().clone();
        self.session.send_files(&sink, files).await;
    }

    pub async fn send_text(&self, text: &str) {
        let sink = self.sink.lock().unwrap().clone();
        self.session.send_text(&sink, text).await;
    }

    /// Applies an inbound SDP description or ICE candidate.
    pub async fn handle_signal(self: &Arc<Self>, signal: SignalFrame) {
        // A fresh offer can arrive after `failed` discarded the
        // connection object; rebuild before applying it.
        let needs_rebuild = self.pc.lock().await.is_none();
        if needs_rebuild && signal.sdp.is_some() {
            self.start_handshake().await;
        }

        let pc = match self.pc.lock().await.as_ref() {
            Some(pc) => pc.clone(),
            None => {
                warn!(peer = %self.peer_id, "signal for a session without a connection, dropping");
                return;
            }
        };

        if let Some(sdp) = signal.sdp {
            match serde_json::from_value::<RTCSessionDescription>(sdp) {
                Ok(desc) => {
                    let is_offer = desc.sdp_type == RTCSdpType::Offer;
                    if let Err(e) = pc.set_remote_description(desc).await {
                        warn!(peer = %self.peer_id, error = %e, "failed to apply remote description");
                        return;
                    }
                    if is_offer {
                        self.answer(&pc).await;
                    }
                }
                Err(e) => warn!(peer = %self.peer_id, "malformed sdp payload, dropping: {e}"),
            }
        }

        if let Some(ice) = signal.ice {
            match serde_json::from_value::<RTCIceCandidateInit>(ice) {
                Ok(init) => {
                    if let Err(e) = pc.add_ice_candidate(init).await {
                        warn!(peer = %self.peer_id, error = %e, "failed to apply ICE candidate");
                    }
                }
                Err(e) => warn!(peer = %self.peer_id, "malformed ice payload, dropping: {e}"),
            }
        }
    }

    /// Called when the peer reappears in a fresh peer list: restart
    /// the handshake unless the channel is alive and open.
    pub async fn refresh(self: &Arc<Self>) {
        let open = self
            .channel
            .lock()
            .await
            .as_ref()
            .map(|dc| dc.ready_state() == RTCDataChannelState::Open)
            .unwrap_or(false);
        if open {
            return;
        }
        debug!(peer = %self.peer_id, "refreshing stale channel");
        self.start_handshake().await;
    }

    /// Permanently closes the session (peer left the room).
    pub async fn close(&self) {
        self.closed.cancel();
        if let Some(handle) = self.drain.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(dc) = self.channel.lock().await.take() {
            let _ = dc.close().await;
        }
        if let Some(pc) = self.pc.lock().await.take() {
            let _ = pc.close().await;
        }
        debug!(peer = %self.peer_id, "rtc session closed");
    }

    // ── Handshake ────────────────────────────────────────────────────

    // Boxed explicitly (rather than `async fn`) because this function,
    // `create_peer_connection`, and `on_channel_closed` call each other
    // in a cycle; rustc cannot resolve the opaque-type `Send` bound
    // across that cycle when left as plain `async fn`s.
    fn start_handshake(self: &Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
        if self.closed.is_cancelled() {
            return;
        }
        debug!(peer = %self.peer_id, caller = self.caller, "starting channel negotiation");

        // Tear down any previous attempt.
        if let Some(handle) = self.drain.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(dc) = self.channel.lock().await.take() {
            let _ = dc.close().await;
        }
        if let Some(pc) = self.pc.lock().await.take() {
            let _ = pc.close().await;
        }

        // Fresh frame queue for the new channel.
        {
            let (sink, rx) = FrameSink::channel(SINK_CAPACITY);
            *self.sink.lock().unwrap() = sink;
            *self.sink_rx.lock().unwrap() = Some(rx);
        }

        let pc = match self.create_peer_connection().await {
            Ok(pc) => pc,
            Err(e) => {
                warn!(peer = %self.peer_id, error = %e, "peer connection setup failed");
                return;
            }
        };
        *self.pc.lock().await = Some(pc.clone());

        if self.caller {
            let dc = match pc.create_data_channel(CHANNEL_LABEL, None).await {
                Ok(dc) => dc,
                Err(e) => {
                    warn!(peer = %self.peer_id, error = %e, "data channel creation failed");
                    return;
                }
            };
            self.attach_channel(dc).await;

            let offer = match pc.create_offer(None).await {
                Ok(offer) => offer,
                Err(e) => {
                    warn!(peer = %self.peer_id, error = %e, "offer creation failed");
                    return;
                }
            };
            if let Err(e) = pc.set_local_description(offer).await {
                warn!(peer = %self.peer_id, error = %e, "failed to set local offer");
                return;
            }
            self.signal_local_description(&pc).await;
        }
        })
    }

    async fn answer(&self, pc: &Arc<RTCPeerConnection>) {
        let answer = match pc.create_answer(None).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(peer = %self.peer_id, error = %e, "answer creation failed");
                return;
            }
        };
        if let Err(e) = pc.set_local_description(answer).await {
            warn!(peer = %self.peer_id, error = %e, "failed to set local answer");
            return;
        }
        self.signal_local_description(pc).await;
    }

    /// Signals the freshly set local description to the peer.
    async fn signal_local_description(&self, pc: &Arc<RTCPeerConnection>) {
        let Some(desc) = pc.local_description().await else {
            warn!(peer = %self.peer_id, "no local description to signal");
            return;
        };
        match serde_json::to_value(&desc) {
            Ok(sdp) => self
                .link
                .send(&ServerMessage::Signal(SignalFrame::sdp(&self.peer_id, sdp))),
            Err(e) => warn!(peer = %self.peer_id, "failed to encode local description: {e}"),
        }
    }

    fn create_peer_connection(
        self: &Arc<Self>,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<RTCPeerConnection>, webrtc::Error>> + Send + '_>>
    {
        Box::pin(async move {
        let mut media = MediaEngine::default();
        let registry = register_default_interceptors(Registry::new(), &mut media)?;
        let mut setting = SettingEngine::default();
        if self.config.include_loopback {
            setting.set_include_loopback_candidate(true);
        }
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting)
            .build();

        let ice_servers = self
            .config
            .ice_servers
            .iter()
            .map(|s| RTCIceServer {
                urls: s.urls.clone(),
                username: s.username.clone(),
                credential: s.credential.clone(),
            })
            .collect();

        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await?,
        );

        // Trickle local ICE candidates out through the server.
        let link = self.link.clone();
        let peer_id = self.peer_id.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let link = link.clone();
            let peer_id = peer_id.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => match serde_json::to_value(&init) {
                        Ok(ice) => {
                            link.send(&ServerMessage::Signal(SignalFrame::ice(&peer_id, ice)));
                        }
                        Err(e) => warn!("failed to encode ICE candidate: {e}"),
                    },
                    Err(e) => warn!("failed to export ICE candidate: {e}"),
                }
            })
        }));

        // `disconnected` is treated as a lost channel; `failed` also
        // discards the connection object before re-initiating.
        let weak = Arc::downgrade(self);
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(this) = weak.upgrade() else { return };
                match state {
                    RTCPeerConnectionState::Connected => {
                        debug!(peer = %this.peer_id, "peer connection established");
                    }
                    RTCPeerConnectionState::Disconnected => {
                        warn!(peer = %this.peer_id, "peer connection interrupted");
                        this.on_channel_closed(false).await;
                    }
                    RTCPeerConnectionState::Failed => {
                        warn!(peer = %this.peer_id, "peer connection failed");
                        this.on_channel_closed(true).await;
                    }
                    _ => {}
                }
            })
        }));

        if !self.caller {
            let weak = Arc::downgrade(self);
            pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                let weak = weak.clone();
                Box::pin(async move {
                    if let Some(this) = weak.upgrade() {
                        this.attach_channel(dc).await;
                    }
                })
            }));
        }

        Ok(pc)
        })
    }

    // ── Channel wiring ───────────────────────────────────────────────

    async fn attach_channel(self: &Arc<Self>, dc: Arc<RTCDataChannel>) {
        *self.channel.lock().await = Some(dc.clone());

        let weak = Arc::downgrade(self);
        let dc_open = dc.clone();
        dc.on_open(Box::new(move || {
            let weak = weak.clone();
            let dc = dc_open.clone();
            Box::pin(async move {
                let Some(this) = weak.upgrade() else { return };
                info!(peer = %this.peer_id, "data channel open");
                this.spawn_drain(dc);
            })
        }));

        let weak = Arc::downgrade(self);
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(this) = weak.upgrade() {
                    this.on_channel_message(msg).await;
                }
            })
        }));

        let weak = Arc::downgrade(self);
        dc.on_close(Box::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(this) = weak.upgrade() {
                    this.on_channel_closed(false).await;
                }
            })
        }));

        // The channel may have opened before the handler landed.
        if dc.ready_state() == RTCDataChannelState::Open {
            self.spawn_drain(dc);
        }
    }

    /// Moves queued frames onto the open channel.
    fn spawn_drain(self: &Arc<Self>, dc: Arc<RTCDataChannel>) {
        let Some(mut rx) = self.sink_rx.lock().unwrap().take() else {
            return;
        };
        let peer_id = self.peer_id.clone();
        let handle = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let result = match frame {
                    SinkFrame::Json(frame) => match serde_json::to_string(&frame) {
                        Ok(json) => dc.send_text(json).await.map(|_| ()),
                        Err(e) => {
                            warn!("failed to encode session frame: {e}");
                            continue;
                        }
                    },
                    SinkFrame::Binary(bytes) => dc.send(&bytes).await.map(|_| ()),
                };
                if let Err(e) = result {
                    debug!(peer = %peer_id, "channel send failed, dropping frame: {e}");
                    return;
                }
            }
        });
        *self.drain.lock().unwrap() = Some(handle);
    }

    async fn on_channel_message(&self, msg: DataChannelMessage) {
        let sink = self.sink.lock().unwrap().clone();
        let result = if msg.is_string {
            match std::str::from_utf8(&msg.data) {
                Ok(text) => match serde_json::from_str::<SessionFrame>(text) {
                    Ok(frame) => self.session.handle_frame(&sink, frame).await,
                    Err(e) => {
                        warn!(peer = %self.peer_id, "unrecognized session frame, dropping: {e}");
                        Ok(())
                    }
                },
                Err(e) => {
                    warn!(peer = %self.peer_id, "non-UTF-8 text frame, dropping: {e}");
                    Ok(())
                }
            }
        } else {
            self.session.handle_binary(&sink, msg.data.clone()).await
        };

        if let Err(e) = result {
            warn!(peer = %self.peer_id, error = %e, "fatal protocol error, dropping channel");
            if let Some(dc) = self.channel.lock().await.as_ref() {
                let _ = dc.close().await;
            }
        }
    }

    /// The channel died. The caller re-initiates the handshake with
    /// the same peer id; the callee waits to be re-called.
    fn on_channel_closed(
        self: &Arc<Self>,
        drop_connection: bool,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
        if self.closed.is_cancelled() {
            return;
        }
        if drop_connection {
            if let Some(pc) = self.pc.lock().await.take() {
                let _ = pc.close().await;
            }
        }
        let had_channel = self.channel.lock().await.take().is_some();
        if !had_channel && !drop_connection {
            // close and state-change handlers can both land here
            return;
        }
        if let Some(handle) = self.drain.lock().unwrap().take() {
            handle.abort();
        }

        if self.caller {
            debug!(peer = %self.peer_id, "re-initiating channel");
            let this = self.clone();
            tokio::spawn(async move {
                this.start_handshake().await;
            });
        } else {
            debug!(peer = %self.peer_id, "waiting for the caller to re-open the channel");
        }
        })
    }
}
