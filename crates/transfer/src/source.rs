//! Outbound file payloads.

use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::TransferError;

/// Where an outbound file's bytes live.
///
/// Disk payloads are opened lazily by the chunker; only the size is
/// recorded up front so the transfer header can be sent immediately.
#[derive(Debug, Clone)]
pub enum FilePayload {
    Memory(Bytes),
    Disk(PathBuf),
}

/// One file queued for sending.
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    pub name: String,
    pub mime: String,
    pub size: u64,
    pub payload: FilePayload,
}

impl OutgoingFile {
    /// Wraps an in-memory buffer.
    pub fn from_bytes(
        name: impl Into<String>,
        mime: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        let bytes = bytes.into();
        Self {
            name: name.into(),
            mime: mime.into(),
            size: bytes.len() as u64,
            payload: FilePayload::Memory(bytes),
        }
    }

    /// Records a file on disk; the size is read from metadata now, the
    /// contents only when the transfer starts.
    pub async fn from_path(
        path: impl AsRef<Path>,
        mime: impl Into<String>,
    ) -> Result<Self, TransferError> {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            name,
            mime: mime.into(),
            size: meta.len(),
            payload: FilePayload::Disk(path.to_path_buf()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn from_bytes_records_size() {
        let file = OutgoingFile::from_bytes("a.bin", "application/octet-stream", &b"12345"[..]);
        assert_eq!(file.size, 5);
        assert_eq!(file.name, "a.bin");
    }

    #[tokio::test]
    async fn from_path_reads_metadata() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("data.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"hello world").unwrap();

        let file = OutgoingFile::from_path(&path, "text/plain").await.unwrap();
        assert_eq!(file.size, 11);
        assert_eq!(file.name, "data.txt");
        assert!(matches!(file.payload, FilePayload::Disk(_)));
    }

    #[tokio::test]
    async fn from_path_missing_file_errors() {
        let result = OutgoingFile::from_path("/nonexistent/nope.bin", "x").await;
        assert!(matches!(result, Err(TransferError::Io(_))));
    }
}
