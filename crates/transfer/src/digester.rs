//! Inbound chunk reassembly.

use bytes::{Bytes, BytesMut};
use tracing::debug;
use uuid::Uuid;

use crate::TransferError;

/// Header metadata of one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub name: String,
    pub mime: String,
    pub size: u64,
}

/// A fully reassembled transfer.
///
/// `handle` is a process-unique id the embedder can use to reference
/// the artifact (e.g. as the key of a blob store) without copying it.
#[derive(Debug, Clone)]
pub struct ReceivedFile {
    pub name: String,
    pub mime: String,
    pub size: u64,
    pub bytes: Bytes,
    pub handle: Uuid,
}

/// Reassembles one inbound chunk sequence.
///
/// Chunks are buffered in arrival order; once the received byte count
/// equals the declared size the buffer is concatenated into a single
/// artifact, returned exactly once. A zero-size transfer is complete
/// at construction; collect it with [`FileDigester::poll_complete`].
pub struct FileDigester {
    meta: FileMeta,
    chunks: Vec<Bytes>,
    bytes_received: u64,
    finished: bool,
}

impl FileDigester {
    pub fn new(meta: FileMeta) -> Self {
        Self {
            meta,
            chunks: Vec::new(),
            bytes_received: 0,
            finished: false,
        }
    }

    /// Appends one chunk. Returns the artifact on the chunk that
    /// completes the transfer.
    ///
    /// Delivering more bytes than the header declared is a protocol
    /// violation and poisons the transfer.
    pub fn unchunk(&mut self, chunk: Bytes) -> Result<Option<ReceivedFile>, TransferError> {
        let received = self.bytes_received + chunk.len() as u64;
        if self.finished || received > self.meta.size {
            return Err(TransferError::Overrun {
                received,
                declared: self.meta.size,
            });
        }

        self.bytes_received = received;
        self.chunks.push(chunk);

        if self.bytes_received == self.meta.size {
            return Ok(Some(self.finish()));
        }
        Ok(None)
    }

    /// Collects the artifact of a transfer that needs no chunks.
    pub fn poll_complete(&mut self) -> Option<ReceivedFile> {
        if !self.finished && self.bytes_received == self.meta.size {
            return Some(self.finish());
        }
        None
    }

    /// Fraction of the declared size received so far, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.meta.size == 0 {
            return 1.0;
        }
        (self.bytes_received as f64 / self.meta.size as f64).clamp(0.0, 1.0)
    }

    pub fn meta(&self) -> &FileMeta {
        &self.meta
    }

    fn finish(&mut self) -> ReceivedFile {
        self.finished = true;
        let mut buffer = BytesMut::with_capacity(self.meta.size as usize);
        for chunk in self.chunks.drain(..) {
            buffer.extend_from_slice(&chunk);
        }
        let handle = Uuid::new_v4();
        debug!(
            name = %self.meta.name,
            size = self.meta.size,
            %handle,
            "transfer reassembled"
        );
        ReceivedFile {
            name: self.meta.name.clone(),
            mime: self.meta.mime.clone(),
            size: self.meta.size,
            bytes: buffer.freeze(),
            handle,
        }
    }
}
