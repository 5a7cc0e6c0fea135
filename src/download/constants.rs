//! Constants for the download module (timeouts, chunking, refresh cadence).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes without a single byte arriving).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Size of each slice written to disk; pause and cancel flags are checked between slices.
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Minimum window between two speed/ETA refreshes inside a transfer.
pub const PROGRESS_WINDOW: Duration = Duration::from_millis(1000);

/// Default interval between two polls of the external download store.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Sentinel for a total size the server did not announce.
pub const UNKNOWN_SIZE: i64 = -1;

/// Sentinel for an ETA that cannot be computed yet.
pub const UNKNOWN_ETA: i64 = -1;
