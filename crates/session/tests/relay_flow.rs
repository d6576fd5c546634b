//! The relayed transport end to end: two relay sessions joined by a
//! fake rendezvous service that forwards `relay` envelopes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use roomdrop_events::{Event, EventBus, EventKind};
use roomdrop_protocol::{EngineConfig, ServerMessage};
use roomdrop_session::{RelayPeerSession, ServerLink};
use roomdrop_transfer::OutgoingFile;

const WAIT: Duration = Duration::from_secs(10);

/// Captures outbound envelopes for a router task to forward.
struct TestLink {
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ServerLink for TestLink {
    fn send(&self, msg: &ServerMessage) {
        let _ = self.tx.send(msg.clone());
    }
}

/// Two relay sessions with the server's forwarding behavior in
/// between: `{to, frame}` becomes `{sender, frame}` on the other side.
fn relay_pair() -> (Arc<RelayPeerSession>, Arc<RelayPeerSession>, Arc<EventBus>, Arc<EventBus>) {
    let config = Arc::new(EngineConfig {
        chunk_size: 64,
        max_partition_size: 1000,
        ..EngineConfig::default()
    });

    let bus_a = EventBus::new();
    let bus_b = EventBus::new();
    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();

    let a = RelayPeerSession::new(
        "b".into(),
        config.clone(),
        Arc::new(TestLink { tx: tx_a }),
        bus_a.clone(),
    );
    let b = RelayPeerSession::new(
        "a".into(),
        config,
        Arc::new(TestLink { tx: tx_b }),
        bus_b.clone(),
    );

    let b_router = b.clone();
    tokio::spawn(async move {
        while let Some(msg) = rx_a.recv().await {
            if let ServerMessage::Relay { to, frame, .. } = msg {
                assert_eq!(to.as_deref(), Some("b"));
                b_router.handle_frame(frame).await;
            }
        }
    });
    let a_router = a.clone();
    tokio::spawn(async move {
        while let Some(msg) = rx_b.recv().await {
            if let ServerMessage::Relay { to, frame, .. } = msg {
                assert_eq!(to.as_deref(), Some("a"));
                a_router.handle_frame(frame).await;
            }
        }
    });

    (a, b, bus_a, bus_b)
}

#[tokio::test]
async fn file_transfer_over_relay() {
    let (a, _b, _bus_a, bus_b) = relay_pair();

    let (tx, mut rx) = mpsc::channel(8);
    bus_b.forward(EventKind::FileReceived, tx);

    let data: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();
    a.send_files(vec![OutgoingFile::from_bytes(
        "relayed.bin",
        "application/octet-stream",
        data.clone(),
    )])
    .await;

    match timeout(WAIT, rx.recv()).await.unwrap().unwrap() {
        Event::FileReceived { sender, file } => {
            assert_eq!(sender, "a");
            assert_eq!(file.name, "relayed.bin");
            assert_eq!(&file.bytes[..], &data[..]);
        }
        other => panic!("expected file, got {other:?}"),
    }
}

#[tokio::test]
async fn text_over_relay_both_directions() {
    let (a, b, bus_a, bus_b) = relay_pair();

    let (tx_b, mut rx_b) = mpsc::channel(8);
    bus_b.forward(EventKind::TextReceived, tx_b);
    let (tx_a, mut rx_a) = mpsc::channel(8);
    bus_a.forward(EventKind::TextReceived, tx_a);

    a.send_text("to b: héllo 🌍").await;
    b.send_text("to a: servus").await;

    match timeout(WAIT, rx_b.recv()).await.unwrap().unwrap() {
        Event::TextReceived { text, .. } => assert_eq!(text, "to b: héllo 🌍"),
        other => panic!("expected text, got {other:?}"),
    }
    match timeout(WAIT, rx_a.recv()).await.unwrap().unwrap() {
        Event::TextReceived { text, .. } => assert_eq!(text, "to a: servus"),
        other => panic!("expected text, got {other:?}"),
    }
}

#[tokio::test]
async fn closed_relay_session_stops_forwarding() {
    let config = Arc::new(EngineConfig::default());
    let bus = EventBus::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let session = RelayPeerSession::new(
        "gone".into(),
        config,
        Arc::new(TestLink { tx }),
        bus,
    );

    session.close();
    session.send_text("into the void").await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());
}
