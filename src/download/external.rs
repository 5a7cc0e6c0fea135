//! Seam to the platform's own download store.
//!
//! Downloads the host hands to its system download manager never run in this
//! process; the reconciler only observes them through this trait and merges
//! them into the unified view.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::constants::UNKNOWN_SIZE;
use super::identity::DownloadId;
use super::record::DownloadStatus;

/// Errors reported by an external download store.
#[derive(Debug, Error)]
pub enum ExternalStoreError {
    /// The store could not be reached or queried.
    #[error("external download store unavailable: {reason}")]
    Unavailable {
        /// Store-specific description.
        reason: String,
    },

    /// The store refused a new request.
    #[error("external download store rejected {uri}: {reason}")]
    Rejected {
        /// URI of the refused request.
        uri: String,
        /// Store-specific description.
        reason: String,
    },
}

impl ExternalStoreError {
    /// Creates an unavailable-store error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Creates a rejected-request error.
    pub fn rejected(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            uri: uri.into(),
            reason: reason.into(),
        }
    }
}

/// One download as the external store reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRecord {
    /// Store-assigned id.
    pub id: DownloadId,
    /// Display title, usually the target file name.
    pub title: String,
    /// Total size in bytes, `-1` when unknown.
    pub total_size: i64,
    /// Bytes received so far.
    pub downloaded_bytes: u64,
    /// Store status mapped onto ours.
    pub status: DownloadStatus,
    /// MIME type, when the store knows it.
    pub media_type: Option<String>,
    /// Source URI, when the store knows it.
    pub uri: Option<String>,
}

/// A new download handed to the external store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalRequest {
    /// Source URI.
    pub uri: String,
    /// File name to save as.
    pub filename: String,
    /// MIME type to declare.
    pub media_type: Option<String>,
}

/// Data-access contract for the platform download store.
#[async_trait]
pub trait ExternalDownloadStore: Send + Sync {
    /// Lists every download the store knows about.
    async fn query(&self) -> Result<Vec<ExternalRecord>, ExternalStoreError>;

    /// Removes a download (and its file) from the store. Unknown ids are ignored.
    async fn remove(&self, id: DownloadId) -> Result<(), ExternalStoreError>;

    /// Enqueues a new download and returns its store id.
    async fn enqueue(&self, request: ExternalRequest) -> Result<DownloadId, ExternalStoreError>;
}

/// Process-local store used by the CLI and tests.
///
/// Enqueued requests appear as pending records; progress is driven through
/// [`InMemoryExternalStore::update`].
#[derive(Debug)]
pub struct InMemoryExternalStore {
    records: Mutex<BTreeMap<DownloadId, ExternalRecord>>,
    requests: Mutex<Vec<ExternalRequest>>,
    next_id: AtomicU64,
    unavailable: AtomicBool,
}

impl Default for InMemoryExternalStore {
    fn default() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            requests: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            unavailable: AtomicBool::new(false),
        }
    }
}

impl InMemoryExternalStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a record.
    pub fn insert(&self, record: ExternalRecord) {
        self.next_id
            .fetch_max(record.id.get().saturating_add(1), Ordering::SeqCst);
        self.records().insert(record.id, record);
    }

    /// Applies `apply` to the record `id`; returns whether it existed.
    pub fn update(&self, id: DownloadId, apply: impl FnOnce(&mut ExternalRecord)) -> bool {
        match self.records().get_mut(&id) {
            Some(record) => {
                apply(record);
                true
            }
            None => false,
        }
    }

    /// Makes every following call fail until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Requests received through [`ExternalDownloadStore::enqueue`], in order.
    #[must_use]
    pub fn requests(&self) -> Vec<ExternalRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the store holds `id`.
    #[must_use]
    pub fn contains(&self, id: DownloadId) -> bool {
        self.records().contains_key(&id)
    }

    fn records(&self) -> MutexGuard<'_, BTreeMap<DownloadId, ExternalRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), ExternalStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ExternalStoreError::unavailable("store marked unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl ExternalDownloadStore for InMemoryExternalStore {
    async fn query(&self) -> Result<Vec<ExternalRecord>, ExternalStoreError> {
        self.check_available()?;
        Ok(self.records().values().cloned().collect())
    }

    async fn remove(&self, id: DownloadId) -> Result<(), ExternalStoreError> {
        self.check_available()?;
        self.records().remove(&id);
        Ok(())
    }

    async fn enqueue(&self, request: ExternalRequest) -> Result<DownloadId, ExternalStoreError> {
        self.check_available()?;
        if request.uri.trim().is_empty() {
            return Err(ExternalStoreError::rejected(&request.uri, "empty uri"));
        }
        let id = DownloadId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let record = ExternalRecord {
            id,
            title: request.filename.clone(),
            total_size: UNKNOWN_SIZE,
            downloaded_bytes: 0,
            status: DownloadStatus::Pending,
            media_type: request.media_type.clone(),
            uri: Some(request.uri.clone()),
        };
        self.records().insert(id, record);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        Ok(id)
    }
}
