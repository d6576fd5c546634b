//! Registry behavior of the peers manager: session creation by
//! capability, role assignment, refresh, routing, and removal.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::timeout;

use roomdrop_events::{Event, EventBus};
use roomdrop_protocol::{EngineConfig, PeerInfo, ServerMessage, SessionFrame, SignalFrame};
use roomdrop_session::{PeersManager, ServerLink};

const WAIT: Duration = Duration::from_secs(10);

/// Records everything sessions try to send to the server.
#[derive(Default)]
struct CaptureLink {
    sent: Mutex<Vec<ServerMessage>>,
}

impl CaptureLink {
    fn snapshot(&self) -> Vec<ServerMessage> {
        self.sent.lock().unwrap().clone()
    }
}

impl ServerLink for CaptureLink {
    fn send(&self, msg: &ServerMessage) {
        self.sent.lock().unwrap().push(msg.clone());
    }
}

fn manager() -> (PeersManager, Arc<EventBus>, Arc<CaptureLink>) {
    let bus = EventBus::new();
    let link = Arc::new(CaptureLink::default());
    let config = Arc::new(EngineConfig::default());
    let mgr = PeersManager::spawn(bus.clone(), link.clone(), config);
    (mgr, bus, link)
}

fn rtc_peer(id: &str) -> PeerInfo {
    PeerInfo {
        id: id.into(),
        rtc_supported: true,
    }
}

/// Polls the link capture until `pred` holds.
async fn wait_for_link(link: &CaptureLink, pred: impl Fn(&[ServerMessage]) -> bool) {
    timeout(WAIT, async {
        loop {
            if pred(&link.snapshot()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("expected server traffic did not appear");
}

/// Polls the registry until `pred` holds for its session ids.
async fn wait_for_ids(mgr: &PeersManager, pred: impl Fn(&[String]) -> bool) {
    timeout(WAIT, async {
        loop {
            let ids = mgr.session_ids().await;
            if pred(&ids) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("registry did not reach the expected state");
}

#[tokio::test]
async fn listed_rtc_peer_gets_a_caller_session_that_offers() {
    let (mgr, bus, link) = manager();

    bus.fire(Event::Peers(vec![rtc_peer("b")]));

    // The caller role shows on the wire: an SDP offer signal to `b`.
    wait_for_link(&link, |sent| {
        sent.iter().any(|m| {
            matches!(
                m,
                ServerMessage::Signal(SignalFrame { to: Some(to), sdp: Some(_), .. }) if to == "b"
            )
        })
    })
    .await;

    assert_eq!(mgr.session_ids().await, vec!["b".to_string()]);
    mgr.shutdown().await;
}

#[tokio::test]
async fn repeated_peer_lists_keep_a_single_session() {
    let (mgr, bus, _link) = manager();

    bus.fire(Event::Peers(vec![rtc_peer("b")]));
    bus.fire(Event::Peers(vec![rtc_peer("b")]));
    bus.fire(Event::Peers(vec![rtc_peer("b")]));

    wait_for_ids(&mgr, |ids| ids == ["b".to_string()]).await;

    // Settle and confirm no duplicate appeared.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(mgr.session_ids().await, vec!["b".to_string()]);
    mgr.shutdown().await;
}

#[tokio::test]
async fn non_rtc_peer_gets_a_relay_session() {
    let (mgr, bus, link) = manager();

    bus.fire(Event::Peers(vec![PeerInfo {
        id: "legacy".into(),
        rtc_supported: false,
    }]));
    wait_for_ids(&mgr, |ids| ids == ["legacy".to_string()]).await;

    // Text routed to it travels as a relay envelope.
    bus.fire(Event::SendText {
        to: "legacy".into(),
        text: "hi".into(),
    });

    wait_for_link(&link, |sent| {
        sent.iter().any(|m| {
            matches!(
                m,
                ServerMessage::Relay { to: Some(to), frame: SessionFrame::Text { .. }, .. }
                    if to == "legacy"
            )
        })
    })
    .await;

    // No signaling happened for a relay peer.
    assert!(!link
        .snapshot()
        .iter()
        .any(|m| matches!(m, ServerMessage::Signal(_))));
    mgr.shutdown().await;
}

#[tokio::test]
async fn peer_left_removes_and_closes_the_session() {
    let (mgr, bus, _link) = manager();

    bus.fire(Event::Peers(vec![rtc_peer("b"), rtc_peer("c")]));
    wait_for_ids(&mgr, |ids| ids.len() == 2).await;

    bus.fire(Event::PeerLeft {
        peer_id: "b".into(),
    });
    wait_for_ids(&mgr, |ids| ids == ["c".to_string()]).await;
    mgr.shutdown().await;
}

#[tokio::test]
async fn signal_from_unknown_sender_creates_a_callee_session() {
    let (mgr, bus, link) = manager();

    bus.fire(Event::Signal(SignalFrame {
        sender: Some("stranger".into()),
        ..SignalFrame::default()
    }));

    wait_for_ids(&mgr, |ids| ids.contains(&"stranger".to_string())).await;

    // The callee does not offer: no outbound SDP signal.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!link
        .snapshot()
        .iter()
        .any(|m| matches!(m, ServerMessage::Signal(SignalFrame { sdp: Some(_), .. }))));
    mgr.shutdown().await;
}

#[tokio::test]
async fn actions_for_unknown_peers_are_dropped() {
    let (mgr, bus, link) = manager();

    bus.fire(Event::SendText {
        to: "nobody".into(),
        text: "hello?".into(),
    });
    bus.fire(Event::FilesSelected {
        to: "nobody".into(),
        files: vec![],
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(link.snapshot().is_empty());
    assert!(mgr.session_ids().await.is_empty());
    mgr.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_every_session() {
    let (mgr, bus, _link) = manager();

    bus.fire(Event::Peers(vec![rtc_peer("b"), rtc_peer("c")]));
    wait_for_ids(&mgr, |ids| ids.len() == 2).await;

    mgr.shutdown().await;
    assert!(mgr.session_ids().await.is_empty());
}
