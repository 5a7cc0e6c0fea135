//! Unified download view and its display labels.

use serde::Serialize;

use super::external::ExternalRecord;
use super::identity::DownloadId;
use super::record::{DownloadRecord, DownloadStatus};

/// Which subsystem a view item comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadOrigin {
    /// Transferred by this process.
    Custom,
    /// Owned by the platform download store.
    External,
}

/// One row of the merged download list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnifiedDownload {
    /// URL-derived or store-assigned identity.
    pub id: DownloadId,
    /// File name shown to the user.
    pub title: String,
    /// Expected size in bytes, `-1` when unknown.
    pub total_size: i64,
    /// Bytes received so far.
    pub downloaded_bytes: u64,
    /// Current status.
    pub status: DownloadStatus,
    /// Bytes per second, 0 unless running.
    pub speed: u64,
    /// Seconds left, `-1` when unknown.
    pub eta: i64,
    /// MIME type reported by the store, if any.
    pub media_type: Option<String>,
    /// Source URI, used to restart store downloads.
    pub uri: Option<String>,
    /// Which subsystem owns the download.
    pub origin: DownloadOrigin,
}

impl UnifiedDownload {
    /// Builds the row for an external record with estimator output applied.
    #[must_use]
    pub fn external(record: ExternalRecord, speed: u64, eta: i64) -> Self {
        Self {
            id: record.id,
            title: record.title,
            total_size: record.total_size,
            downloaded_bytes: record.downloaded_bytes,
            status: record.status,
            speed,
            eta,
            media_type: record.media_type,
            uri: record.uri,
            origin: DownloadOrigin::External,
        }
    }

    /// Completion in percent, 0 while the total is unknown.
    #[must_use]
    pub fn progress_percent(&self) -> u8 {
        match u64::try_from(self.total_size) {
            Ok(total) if total > 0 => {
                let percent = u128::from(self.downloaded_bytes) * 100 / u128::from(total);
                u8::try_from(percent.min(100)).unwrap_or(100)
            }
            _ => 0,
        }
    }

    /// e.g. `1.50 MB/s`.
    #[must_use]
    pub fn speed_label(&self) -> String {
        format!("{}/s", format_size(self.speed))
    }

    /// e.g. `1h 02m 05s left`, or `Calculating...` without an estimate.
    #[must_use]
    pub fn eta_label(&self) -> String {
        let Ok(eta) = u64::try_from(self.eta) else {
            return "Calculating...".to_string();
        };
        let hours = eta / 3600;
        let minutes = (eta % 3600) / 60;
        let seconds = eta % 60;
        if hours > 0 {
            format!("{hours}h {minutes:02}m {seconds:02}s left")
        } else if minutes > 0 {
            format!("{minutes}m {seconds:02}s left")
        } else {
            format!("{seconds}s left")
        }
    }

    /// One-line status for list rendering.
    #[must_use]
    pub fn status_line(&self) -> String {
        match self.status {
            DownloadStatus::Running => match u64::try_from(self.total_size) {
                Ok(total) => format!(
                    "{} / {} ({}%) • {} • {}",
                    format_size(self.downloaded_bytes),
                    format_size(total),
                    self.progress_percent(),
                    self.speed_label(),
                    self.eta_label()
                ),
                Err(_) => format!(
                    "{} • {}",
                    format_size(self.downloaded_bytes),
                    self.speed_label()
                ),
            },
            DownloadStatus::Paused => "Paused".to_string(),
            DownloadStatus::Pending => "Pending...".to_string(),
            DownloadStatus::Succeeded => {
                let size = u64::try_from(self.total_size).unwrap_or(self.downloaded_bytes);
                format!("Completed • {}", format_size(size))
            }
            DownloadStatus::Failed => "Failed".to_string(),
        }
    }
}

impl From<DownloadRecord> for UnifiedDownload {
    fn from(record: DownloadRecord) -> Self {
        Self {
            id: record.id,
            title: record.filename,
            total_size: record.total_size,
            downloaded_bytes: record.downloaded_bytes,
            status: record.status,
            speed: record.speed,
            eta: record.eta,
            media_type: None,
            uri: Some(record.url),
            origin: DownloadOrigin::Custom,
        }
    }
}

/// Human-readable size in decimal units (`842 B`, `1.50 MB`, `120 GB`).
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["kB", "MB", "GB", "TB", "PB"];
    if bytes <= 900 {
        return format!("{bytes} B");
    }
    #[allow(clippy::cast_precision_loss)]
    let mut value = bytes as f64 / 1000.0;
    let mut unit = UNITS[0];
    for next in &UNITS[1..] {
        if value <= 900.0 {
            break;
        }
        value /= 1000.0;
        unit = next;
    }
    if value >= 100.0 {
        format!("{value:.0} {unit}")
    } else {
        format!("{value:.2} {unit}")
    }
}
