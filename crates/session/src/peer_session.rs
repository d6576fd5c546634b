//! Transport-independent session protocol.
//!
//! One [`PeerSession`] holds both directions of the transfer protocol
//! for a single remote peer. Outbound transfers run one at a time in
//! enqueue order; each is chunked into partitions and paused at every
//! partition boundary until the receiver acknowledges it. Inbound
//! transfers are digested chunk by chunk with progress reported back
//! in ≥1% increments. The two directions are independent.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use roomdrop_events::{Event, EventBus};
use roomdrop_protocol::text::{decode_text, encode_text};
use roomdrop_protocol::{EngineConfig, SessionFrame};
use roomdrop_transfer::{
    ChunkerEvent, FileChunker, FileDigester, FileMeta, OutgoingFile, TransferError,
};

use crate::sink::FrameSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum SendPhase {
    #[default]
    Idle,
    AwaitingPartitionAck,
    AwaitingComplete,
}

#[derive(Default)]
struct SendState {
    queue: VecDeque<OutgoingFile>,
    chunker: Option<FileChunker>,
    phase: SendPhase,
}

#[derive(Default)]
struct RecvState {
    digester: Option<FileDigester>,
    last_reported: f64,
}

enum PumpOutcome {
    /// Partition sent; waiting for the ack.
    Paused,
    /// The transfer was abandoned; the next queued file may start.
    Failed,
}

/// Protocol state for one remote peer, shared by both transports.
pub struct PeerSession {
    peer_id: String,
    bus: Arc<EventBus>,
    config: Arc<EngineConfig>,
    outbound: Mutex<SendState>,
    inbound: Mutex<RecvState>,
}

impl PeerSession {
    pub fn new(peer_id: String, bus: Arc<EventBus>, config: Arc<EngineConfig>) -> Self {
        Self {
            peer_id,
            bus,
            config,
            outbound: Mutex::new(SendState::default()),
            inbound: Mutex::new(RecvState::default()),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Appends `files` to the outbound queue and starts sending if the
    /// session is idle.
    pub async fn send_files(&self, sink: &FrameSink, files: Vec<OutgoingFile>) {
        let mut state = self.outbound.lock().await;
        state.queue.extend(files);
        if state.chunker.is_none() {
            self.advance(sink, &mut state).await;
        }
    }

    /// Sends a text message, base64-wrapped for the JSON path.
    pub async fn send_text(&self, sink: &FrameSink, text: &str) {
        sink.send_json(SessionFrame::Text {
            text: encode_text(text),
        })
        .await;
    }

    /// Dispatch entry for every inbound JSON frame.
    pub async fn handle_frame(
        &self,
        sink: &FrameSink,
        frame: SessionFrame,
    ) -> Result<(), TransferError> {
        match frame {
            SessionFrame::Header { name, mime, size } => {
                self.on_header(sink, FileMeta { name, mime, size }).await;
                Ok(())
            }
            SessionFrame::Chunk { data } => self.handle_binary(sink, Bytes::from(data)).await,
            SessionFrame::Partition { offset } => {
                sink.send_json(SessionFrame::PartitionReceived { offset })
                    .await;
                Ok(())
            }
            SessionFrame::PartitionReceived { offset } => {
                self.on_partition_ack(sink, offset).await;
                Ok(())
            }
            SessionFrame::Progress { progress } => {
                self.bus.fire(Event::FileProgress {
                    sender: self.peer_id.clone(),
                    progress,
                });
                Ok(())
            }
            SessionFrame::TransferComplete => {
                self.on_transfer_complete(sink).await;
                Ok(())
            }
            SessionFrame::Text { text } => {
                match decode_text(&text) {
                    Ok(text) => self.bus.fire(Event::TextReceived {
                        sender: self.peer_id.clone(),
                        text,
                    }),
                    Err(e) => warn!(peer = %self.peer_id, "undecodable text payload, dropping: {e}"),
                }
                Ok(())
            }
        }
    }

    /// Dispatch entry for inbound binary chunks.
    ///
    /// An over-run — more bytes than the transfer header declared — is
    /// fatal: the inbound state is cleared and the error returned so
    /// the transport can tear the channel down.
    pub async fn handle_binary(
        &self,
        sink: &FrameSink,
        bytes: Bytes,
    ) -> Result<(), TransferError> {
        let mut state = self.inbound.lock().await;
        let Some(digester) = state.digester.as_mut() else {
            warn!(
                peer = %self.peer_id,
                len = bytes.len(),
                "binary frame outside a transfer, dropping"
            );
            return Ok(());
        };

        let (completed, progress) = match digester.unchunk(bytes) {
            Ok(completed) => (completed, digester.progress()),
            Err(e) => {
                warn!(peer = %self.peer_id, error = %e, "inbound transfer poisoned");
                state.digester = None;
                return Err(e);
            }
        };

        let threshold = self.config.progress_report_threshold;
        if progress - state.last_reported >= threshold
            || (progress >= 1.0 && state.last_reported < 1.0)
        {
            state.last_reported = progress;
            sink.send_json(SessionFrame::Progress { progress }).await;
            self.bus.fire(Event::FileProgress {
                sender: self.peer_id.clone(),
                progress,
            });
        }

        if let Some(file) = completed {
            self.finish_receive(sink, &mut state, file).await;
        }
        Ok(())
    }

    // ── Outbound machine ─────────────────────────────────────────────

    /// Drives the outbound queue until it pauses on a partition ack or
    /// runs dry.
    async fn advance(&self, sink: &FrameSink, state: &mut SendState) {
        loop {
            if state.chunker.is_none() && !self.open_next(sink, state).await {
                return;
            }
            match self.pump_partition(sink, state).await {
                PumpOutcome::Paused => return,
                PumpOutcome::Failed => continue,
            }
        }
    }

    /// Pops the queue until a file opens, then announces it. Returns
    /// false once the queue is empty.
    async fn open_next(&self, sink: &FrameSink, state: &mut SendState) -> bool {
        while let Some(file) = state.queue.pop_front() {
            let (name, mime, size) = (file.name.clone(), file.mime.clone(), file.size);
            match FileChunker::new(file, self.config.chunk_size, self.config.max_partition_size)
                .await
            {
                Ok(chunker) => {
                    info!(peer = %self.peer_id, file = %name, size, "outbound transfer started");
                    state.chunker = Some(chunker);
                    sink.send_json(SessionFrame::Header { name, mime, size }).await;
                    return true;
                }
                Err(e) => {
                    warn!(
                        peer = %self.peer_id,
                        file = %name,
                        error = %e,
                        "cannot open outbound file, skipping"
                    );
                }
            }
        }
        state.phase = SendPhase::Idle;
        false
    }

    /// Streams one partition, then pauses for the ack.
    async fn pump_partition(&self, sink: &FrameSink, state: &mut SendState) -> PumpOutcome {
        match state.chunker.as_mut() {
            Some(chunker) => chunker.begin_partition(),
            None => return PumpOutcome::Failed,
        }
        loop {
            let event = match state.chunker.as_mut() {
                Some(chunker) => chunker.next_event().await,
                None => return PumpOutcome::Failed,
            };
            match event {
                Ok(ChunkerEvent::Chunk(bytes)) => sink.send_binary(bytes).await,
                Ok(ChunkerEvent::PartitionEnd { .. }) => {
                    let offset = state.chunker.as_ref().map(|c| c.offset()).unwrap_or(0);
                    sink.send_json(SessionFrame::Partition { offset }).await;
                    state.phase = SendPhase::AwaitingPartitionAck;
                    return PumpOutcome::Paused;
                }
                Err(e) => {
                    warn!(
                        peer = %self.peer_id,
                        error = %e,
                        "outbound read failed, abandoning transfer"
                    );
                    state.chunker = None;
                    return PumpOutcome::Failed;
                }
            }
        }
    }

    /// The receiver acknowledged a partition: send the next one, or
    /// wait for its completion report at file end.
    async fn on_partition_ack(&self, sink: &FrameSink, offset: u64) {
        let mut state = self.outbound.lock().await;
        if state.phase != SendPhase::AwaitingPartitionAck {
            warn!(peer = %self.peer_id, "unexpected partition ack, dropping");
            return;
        }
        let Some(chunker) = state.chunker.as_ref() else {
            return;
        };
        // An ack for an earlier transfer (a completion raced the last
        // partition ack) must not release the current partition.
        if offset != chunker.offset() {
            debug!(
                peer = %self.peer_id,
                ack = offset,
                at = chunker.offset(),
                "stale partition ack, ignoring"
            );
            return;
        }

        if chunker.is_file_end() {
            state.phase = SendPhase::AwaitingComplete;
            return;
        }
        if let PumpOutcome::Failed = self.pump_partition(sink, &mut state).await {
            self.advance(sink, &mut state).await;
        }
    }

    /// The receiver reassembled the whole file.
    ///
    /// Normally arrives in `AwaitingComplete`; for an empty file the
    /// receiver completes on the header alone, so the report may beat
    /// the partition ack and is accepted from that state too.
    async fn on_transfer_complete(&self, sink: &FrameSink) {
        let mut state = self.outbound.lock().await;
        if state.chunker.is_none() {
            warn!(peer = %self.peer_id, "completion report without an active transfer, dropping");
            return;
        }
        debug!(peer = %self.peer_id, "outbound transfer complete");
        state.chunker = None;
        self.bus.fire(Event::FileProgress {
            sender: self.peer_id.clone(),
            progress: 1.0,
        });
        self.advance(sink, &mut state).await;
    }

    // ── Inbound machine ──────────────────────────────────────────────

    /// A transfer header arrived: set up the digester. An empty file
    /// is complete right away, without any chunk.
    async fn on_header(&self, sink: &FrameSink, meta: FileMeta) {
        let mut state = self.inbound.lock().await;
        if state.digester.is_some() {
            warn!(peer = %self.peer_id, "header while already receiving, replacing transfer");
        }
        info!(
            peer = %self.peer_id,
            file = %meta.name,
            size = meta.size,
            "inbound transfer started"
        );
        let mut digester = FileDigester::new(meta);
        state.last_reported = 0.0;
        match digester.poll_complete() {
            Some(file) => self.finish_receive(sink, &mut state, file).await,
            None => state.digester = Some(digester),
        }
    }

    async fn finish_receive(
        &self,
        sink: &FrameSink,
        state: &mut RecvState,
        file: roomdrop_transfer::ReceivedFile,
    ) {
        state.digester = None;
        state.last_reported = 1.0;
        self.bus.fire(Event::FileReceived {
            sender: self.peer_id.clone(),
            file,
        });
        sink.send_json(SessionFrame::TransferComplete).await;
    }
}
