//! Download status and the immutable record snapshot published to consumers.

use serde::{Deserialize, Serialize};

use super::constants::{UNKNOWN_ETA, UNKNOWN_SIZE};
use super::identity::DownloadId;

/// Lifecycle state of a download.
///
/// Cancellation is not a status: a cancelled download leaves the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Waiting for the server to answer.
    Pending,
    /// Streaming the body to disk.
    Running,
    /// Stopped by the user; the partial file is kept.
    Paused,
    /// Body fully received.
    Succeeded,
    /// Network, HTTP or file error; the partial file is kept for a retry.
    Failed,
}

impl DownloadStatus {
    /// Returns the stable label for logs and JSON output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Whether the download still needs the foreground presence signal.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running | Self::Paused)
    }

    /// Whether a repeated start request should resume this download.
    #[must_use]
    pub fn is_resumable(self) -> bool {
        matches!(self, Self::Paused | Self::Failed)
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of one custom download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadRecord {
    /// URL-derived identity.
    pub id: DownloadId,
    /// Source URL.
    pub url: String,
    /// Destination file name inside the download directory.
    pub filename: String,
    /// Total size in bytes, [`UNKNOWN_SIZE`] until (or unless) the server says.
    pub total_size: i64,
    /// Bytes present in the destination file.
    pub downloaded_bytes: u64,
    /// Current lifecycle state.
    pub status: DownloadStatus,
    /// Bytes per second over the last refresh window, 0 when not running.
    pub speed: u64,
    /// Seconds remaining, [`UNKNOWN_ETA`] when unknown.
    pub eta: i64,
}

impl DownloadRecord {
    /// A freshly created record before the first network call.
    #[must_use]
    pub fn pending(id: DownloadId, url: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            filename: filename.into(),
            total_size: UNKNOWN_SIZE,
            downloaded_bytes: 0,
            status: DownloadStatus::Pending,
            speed: 0,
            eta: UNKNOWN_ETA,
        }
    }

    /// Total size when the server announced one.
    #[must_use]
    pub fn known_total(&self) -> Option<u64> {
        u64::try_from(self.total_size).ok()
    }
}
