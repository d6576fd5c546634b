//! Tunable protocol defaults.

use std::time::Duration;

/// Size of one binary chunk read from an outbound file.
pub const CHUNK_SIZE: usize = 64_000;

/// Upper bound on the bytes in flight before the sender stops and
/// waits for a partition acknowledgement.
pub const MAX_PARTITION_SIZE: u64 = 1_000_000;

/// Delay before the server connection retries after a close.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Minimum inbound-progress delta that triggers a `progress` frame.
pub const PROGRESS_REPORT_THRESHOLD: f64 = 0.01;

/// Mime type assumed when a transfer header carries none.
pub const DEFAULT_MIME: &str = "application/octet-stream";

/// Port of the rendezvous service during local development.
pub const DEV_SERVER_PORT: u16 = 3000;
