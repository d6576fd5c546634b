//! Frame protocol spoken between two peers.
//!
//! A session channel carries two physical frame shapes: JSON text
//! frames (this enum) and raw binary frames holding file chunks. The
//! relayed transport has no binary shape, so chunks tunnel as
//! [`SessionFrame::Chunk`] with the bytes base64-encoded.

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_MIME;

fn default_mime() -> String {
    DEFAULT_MIME.to_string()
}

/// All JSON frames of the peer-to-peer session protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionFrame {
    /// Announces an inbound transfer; chunks follow.
    #[serde(rename = "header")]
    Header {
        name: String,
        #[serde(default = "default_mime")]
        mime: String,
        size: u64,
    },

    /// End-of-partition marker; the sender pauses until it is acked.
    /// `offset` is the absolute byte offset reached in the file.
    #[serde(rename = "partition")]
    Partition { offset: u64 },

    /// Acknowledges a partition, releasing the sender's next one.
    #[serde(rename = "partition_received")]
    PartitionReceived { offset: u64 },

    /// Receiver-side progress, reported in ≥1% increments.
    #[serde(rename = "progress")]
    Progress { progress: f64 },

    /// The receiver has reassembled the whole file.
    #[serde(rename = "transfer-complete")]
    TransferComplete,

    /// A text message; payload is `base64(utf8(text))`.
    #[serde(rename = "text")]
    Text { text: String },

    /// A file chunk on the relayed transport.
    #[serde(rename = "chunk")]
    Chunk {
        #[serde(with = "crate::base64_bytes")]
        data: Vec<u8>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let frame = SessionFrame::Header {
            name: "hi.txt".into(),
            mime: "text/plain".into(),
            size: 5,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(
            json,
            r#"{"type":"header","name":"hi.txt","mime":"text/plain","size":5}"#
        );
        assert_eq!(serde_json::from_str::<SessionFrame>(&json).unwrap(), frame);
    }

    #[test]
    fn header_without_mime_gets_octet_stream() {
        let parsed: SessionFrame =
            serde_json::from_str(r#"{"type":"header","name":"blob","size":10}"#).unwrap();
        match parsed {
            SessionFrame::Header { mime, .. } => assert_eq!(mime, "application/octet-stream"),
            other => panic!("expected header, got {other:?}"),
        }
    }

    #[test]
    fn partition_ack_tag_uses_underscore() {
        let json = serde_json::to_string(&SessionFrame::PartitionReceived { offset: 5 }).unwrap();
        assert_eq!(json, r#"{"type":"partition_received","offset":5}"#);
    }

    #[test]
    fn chunk_bytes_travel_as_base64() {
        let frame = SessionFrame::Chunk {
            data: b"hello".to_vec(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"{"type":"chunk","data":"aGVsbG8="}"#);
        assert_eq!(serde_json::from_str::<SessionFrame>(&json).unwrap(), frame);
    }

    #[test]
    fn transfer_complete_is_bare() {
        assert_eq!(
            serde_json::to_string(&SessionFrame::TransferComplete).unwrap(),
            r#"{"type":"transfer-complete"}"#
        );
    }

    #[test]
    fn unknown_frame_type_is_an_error() {
        assert!(serde_json::from_str::<SessionFrame>(r#"{"type":"resume"}"#).is_err());
    }
}
