//! Partitioned chunk reads over an outbound payload.

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tracing::trace;

use crate::source::{FilePayload, OutgoingFile};
use crate::TransferError;

/// One step of the chunking loop.
#[derive(Debug)]
pub enum ChunkerEvent {
    /// The next chunk of the current partition.
    Chunk(Bytes),
    /// The current partition is finished; `bytes` is its total size.
    /// The sender must wait for an acknowledgement, then call
    /// [`FileChunker::begin_partition`] before reading on.
    PartitionEnd { bytes: u64 },
}

enum PayloadReader {
    Memory(Bytes),
    Disk {
        file: tokio::fs::File,
        needs_seek: bool,
    },
}

impl PayloadReader {
    /// Reads exactly `len` bytes at `offset`. Reads are sequential;
    /// the seek only happens after a rewind.
    async fn read(&mut self, offset: u64, len: usize) -> Result<Bytes, TransferError> {
        match self {
            PayloadReader::Memory(data) => {
                let start = offset as usize;
                Ok(data.slice(start..start + len))
            }
            PayloadReader::Disk { file, needs_seek } => {
                if *needs_seek {
                    file.seek(SeekFrom::Start(offset)).await?;
                    *needs_seek = false;
                }
                let mut buf = vec![0u8; len];
                file.read_exact(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

/// Reads one outbound file as fixed-size chunks grouped into
/// partitions of at most `max_partition_size` bytes.
pub struct FileChunker {
    name: String,
    reader: PayloadReader,
    size: u64,
    chunk_size: usize,
    max_partition_size: u64,
    offset: u64,
    partition_bytes: u64,
}

impl FileChunker {
    /// Opens `file` for chunked reading. Disk payloads are opened here;
    /// in-memory payloads are wrapped as-is.
    pub async fn new(
        file: OutgoingFile,
        chunk_size: usize,
        max_partition_size: u64,
    ) -> Result<Self, TransferError> {
        let reader = match file.payload {
            FilePayload::Memory(data) => PayloadReader::Memory(data),
            FilePayload::Disk(path) => PayloadReader::Disk {
                file: tokio::fs::File::open(path).await?,
                needs_seek: false,
            },
        };
        Ok(Self {
            name: file.name,
            reader,
            size: file.size,
            chunk_size,
            max_partition_size,
            offset: 0,
            partition_bytes: 0,
        })
    }

    /// Starts a new partition by resetting the partition counter.
    pub fn begin_partition(&mut self) {
        self.partition_bytes = 0;
    }

    /// Reads the next chunk of the current partition, or reports the
    /// partition finished. The next read is only issued once the
    /// previous one has completed.
    ///
    /// Chunks never straddle a partition boundary, so a partition's
    /// total size is exactly `max_partition_size` until the final,
    /// shorter one.
    pub async fn next_event(&mut self) -> Result<ChunkerEvent, TransferError> {
        if self.offset >= self.size || self.partition_bytes >= self.max_partition_size {
            trace!(
                file = %self.name,
                offset = self.offset,
                partition_bytes = self.partition_bytes,
                "partition end"
            );
            return Ok(ChunkerEvent::PartitionEnd {
                bytes: self.partition_bytes,
            });
        }

        let remaining_in_file = self.size - self.offset;
        let remaining_in_partition = self.max_partition_size - self.partition_bytes;
        let len = (self.chunk_size as u64)
            .min(remaining_in_file)
            .min(remaining_in_partition) as usize;

        let chunk = self.reader.read(self.offset, len).await?;
        self.offset += chunk.len() as u64;
        self.partition_bytes += chunk.len() as u64;
        Ok(ChunkerEvent::Chunk(chunk))
    }

    /// True once every byte of the file has been read.
    pub fn is_file_end(&self) -> bool {
        self.offset >= self.size
    }

    /// Fraction of the file read so far, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.size == 0 {
            return 1.0;
        }
        (self.offset as f64 / self.size as f64).clamp(0.0, 1.0)
    }

    /// Absolute byte offset reached in the file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Rewinds to the start of the current partition so it can be sent
    /// again after a channel reopen. Not invoked by the transfer
    /// protocol itself; a retransmit would need the receiver to agree
    /// on the rewound offset first.
    pub fn repeat_partition(&mut self) {
        self.offset -= self.partition_bytes;
        self.partition_bytes = 0;
        if let PayloadReader::Disk { needs_seek, .. } = &mut self.reader {
            *needs_seek = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    async fn memory_chunker(data: &[u8], chunk_size: usize, max_partition: u64) -> FileChunker {
        let file = OutgoingFile::from_bytes("test.bin", "application/octet-stream", data.to_vec());
        FileChunker::new(file, chunk_size, max_partition)
            .await
            .unwrap()
    }

    /// Drives one partition to its end, returning (chunks, partition bytes).
    async fn drain_partition(chunker: &mut FileChunker) -> (Vec<Bytes>, u64) {
        chunker.begin_partition();
        let mut chunks = Vec::new();
        loop {
            match chunker.next_event().await.unwrap() {
                ChunkerEvent::Chunk(c) => chunks.push(c),
                ChunkerEvent::PartitionEnd { bytes } => return (chunks, bytes),
            }
        }
    }

    #[tokio::test]
    async fn single_partition_file() {
        let mut chunker = memory_chunker(b"hello", 10, 100).await;
        let (chunks, bytes) = drain_partition(&mut chunker).await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(&chunks[0][..], b"hello");
        assert_eq!(bytes, 5);
        assert!(chunker.is_file_end());
        assert_eq!(chunker.progress(), 1.0);
    }

    #[tokio::test]
    async fn chunks_concatenate_to_original() {
        let data: Vec<u8> = (0..=255).cycle().take(1000).collect();
        let mut chunker = memory_chunker(&data, 64, 300).await;

        let mut rebuilt = Vec::new();
        while !chunker.is_file_end() {
            let (chunks, _) = drain_partition(&mut chunker).await;
            for c in &chunks {
                rebuilt.extend_from_slice(c);
            }
        }
        assert_eq!(rebuilt, data);
    }

    #[tokio::test]
    async fn partition_sizes_are_bounded_and_exact() {
        // 2500 bytes, chunk 64, partition cap 1000: expect partitions
        // of exactly 1000, 1000, 500.
        let data = vec![7u8; 2500];
        let mut chunker = memory_chunker(&data, 64, 1000).await;

        let mut partition_sizes = Vec::new();
        while !chunker.is_file_end() {
            let (chunks, bytes) = drain_partition(&mut chunker).await;
            let sum: u64 = chunks.iter().map(|c| c.len() as u64).sum();
            assert_eq!(sum, bytes);
            partition_sizes.push(bytes);
        }
        assert_eq!(partition_sizes, vec![1000, 1000, 500]);
    }

    #[tokio::test]
    async fn default_sized_file_partitions_at_the_megabyte() {
        // 2.5 MB at the default chunk and partition sizes.
        let data = vec![0u8; 2_500_000];
        let mut chunker = memory_chunker(&data, 64_000, 1_000_000).await;

        let mut partition_sizes = Vec::new();
        let mut chunk_count = 0usize;
        while !chunker.is_file_end() {
            let (chunks, bytes) = drain_partition(&mut chunker).await;
            chunk_count += chunks.len();
            partition_sizes.push(bytes);
        }
        assert_eq!(partition_sizes, vec![1_000_000, 1_000_000, 500_000]);
        // ceil(2_500_000 / 64_000) = 40
        assert_eq!(chunk_count, 40);
    }

    #[tokio::test]
    async fn chunk_count_matches_ceiling() {
        let data = vec![1u8; 2500];
        let mut chunker = memory_chunker(&data, 64, 1000).await;
        let mut count = 0usize;
        while !chunker.is_file_end() {
            let (chunks, _) = drain_partition(&mut chunker).await;
            count += chunks.len();
        }
        // ceil(2500 / 64) = 40
        assert_eq!(count, 40);
    }

    #[tokio::test]
    async fn exact_multiple_has_no_empty_read() {
        let data = vec![9u8; 20];
        let mut chunker = memory_chunker(&data, 10, 100).await;
        let (chunks, bytes) = drain_partition(&mut chunker).await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.len() == 10));
        assert_eq!(bytes, 20);
        assert!(chunker.is_file_end());
    }

    #[tokio::test]
    async fn empty_file_ends_immediately() {
        let mut chunker = memory_chunker(b"", 10, 100).await;
        assert!(chunker.is_file_end());
        assert_eq!(chunker.progress(), 1.0);
        let (chunks, bytes) = drain_partition(&mut chunker).await;
        assert!(chunks.is_empty());
        assert_eq!(bytes, 0);
    }

    #[tokio::test]
    async fn progress_advances_monotonically() {
        let data = vec![0u8; 100];
        let mut chunker = memory_chunker(&data, 10, 30).await;
        let mut last = 0.0;
        while !chunker.is_file_end() {
            let _ = drain_partition(&mut chunker).await;
            let p = chunker.progress();
            assert!(p >= last);
            last = p;
        }
        assert_eq!(last, 1.0);
    }

    #[tokio::test]
    async fn repeat_partition_rereads_same_bytes() {
        let data: Vec<u8> = (0u8..100).collect();
        let mut chunker = memory_chunker(&data, 10, 30).await;

        let (first, bytes) = drain_partition(&mut chunker).await;
        assert_eq!(bytes, 30);

        chunker.repeat_partition();
        assert_eq!(chunker.offset(), 0);

        let (again, bytes_again) = drain_partition(&mut chunker).await;
        assert_eq!(bytes_again, 30);
        assert_eq!(first, again);
    }

    #[tokio::test]
    async fn disk_payload_reads_and_rewinds() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("disk.bin");
        let data: Vec<u8> = (0u8..=99).collect();
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&data)
            .unwrap();

        let file = OutgoingFile::from_path(&path, "application/octet-stream")
            .await
            .unwrap();
        let mut chunker = FileChunker::new(file, 16, 48).await.unwrap();

        let (first, _) = drain_partition(&mut chunker).await;
        chunker.repeat_partition();
        let (again, _) = drain_partition(&mut chunker).await;
        assert_eq!(first, again);

        let mut rebuilt: Vec<u8> = again.iter().flat_map(|c| c.to_vec()).collect();
        while !chunker.is_file_end() {
            let (chunks, _) = drain_partition(&mut chunker).await;
            for c in &chunks {
                rebuilt.extend_from_slice(c);
            }
        }
        assert_eq!(rebuilt, data);
    }
}
