//! Chunked outbound reads and inbound reassembly.
//!
//! One [`FileChunker`] reads a local payload as a lazy sequence of
//! fixed-size chunks grouped into partitions; one [`FileDigester`]
//! rebuilds an inbound chunk sequence into a finished artifact.

mod chunker;
mod digester;
mod source;

pub use chunker::{ChunkerEvent, FileChunker};
pub use digester::{FileDigester, FileMeta, ReceivedFile};
pub use source::{FilePayload, OutgoingFile};

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("received {received} bytes for a transfer declared as {declared}")]
    Overrun { received: u64, declared: u64 },
}
