//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::download::constants::{CONNECT_TIMEOUT_SECS, DEFAULT_POLL_INTERVAL, READ_TIMEOUT_SECS};

/// Directory used when none is configured.
pub const DEFAULT_DOWNLOAD_DIR: &str = "./downloads";

/// Settings the [`DownloadService`](crate::DownloadService) is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Directory custom downloads are written to. Created on first use.
    pub download_dir: PathBuf,
    /// Interval between two polls of the external store.
    pub poll_interval: Duration,
    /// HTTP connect timeout.
    pub connect_timeout: Duration,
    /// Longest silence tolerated between two body reads.
    pub read_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            poll_interval: DEFAULT_POLL_INTERVAL,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
        }
    }
}

impl EngineConfig {
    /// Default settings writing to `download_dir`.
    #[must_use]
    pub fn with_download_dir(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            ..Self::default()
        }
    }
}
