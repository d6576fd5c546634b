//! The frame queue between a session and its transport.
//!
//! Both transports drain the same queue shape: JSON session frames and
//! raw binary chunks. Sessions enqueue; the transport's drain task
//! performs the actual writes. When the transport is gone the queue
//! closes and sends are dropped silently, which is exactly the
//! send-on-closed-channel behavior the protocol wants.

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use roomdrop_protocol::SessionFrame;

/// Queue depth between a session and its transport.
pub(crate) const SINK_CAPACITY: usize = 256;

/// One queued frame.
#[derive(Debug, Clone)]
pub enum SinkFrame {
    Json(SessionFrame),
    Binary(Bytes),
}

/// Enqueues frames for a transport to write.
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<SinkFrame>,
}

impl FrameSink {
    /// Creates a sink and the receiver its transport drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SinkFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queues a JSON frame. Dropped silently if the transport is gone.
    pub async fn send_json(&self, frame: SessionFrame) {
        if self.tx.send(SinkFrame::Json(frame)).await.is_err() {
            debug!("transport gone, dropping session frame");
        }
    }

    /// Queues a binary chunk. Dropped silently if the transport is gone.
    pub async fn send_binary(&self, bytes: Bytes) {
        if self.tx.send(SinkFrame::Binary(bytes)).await.is_err() {
            debug!("transport gone, dropping chunk");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_arrive_in_order() {
        let (sink, mut rx) = FrameSink::channel(8);
        sink.send_json(SessionFrame::TransferComplete).await;
        sink.send_binary(Bytes::from_static(b"abc")).await;

        assert!(matches!(
            rx.recv().await,
            Some(SinkFrame::Json(SessionFrame::TransferComplete))
        ));
        match rx.recv().await {
            Some(SinkFrame::Binary(b)) => assert_eq!(&b[..], b"abc"),
            other => panic!("expected binary frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_after_receiver_drop_is_silent() {
        let (sink, rx) = FrameSink::channel(8);
        drop(rx);
        // Must neither panic nor block.
        sink.send_json(SessionFrame::TransferComplete).await;
        sink.send_binary(Bytes::new()).await;
    }
}
