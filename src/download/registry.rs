//! Registry of custom downloads.
//!
//! The registry owns every [`TransferWorker`], routes commands to them and
//! republishes an immutable, id-descending list of records through a
//! `tokio::sync::watch` channel whenever something changes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use super::client::HttpClient;
use super::filename::unique_filename;
use super::identity::DownloadId;
use super::record::{DownloadRecord, DownloadStatus};
use super::worker::{ProgressSink, TransferWorker, discard_partial};
use crate::lifecycle::NotificationSink;

/// Errors raised while constructing a registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No Tokio runtime was available to run transfers on.
    #[error("download registry must be created inside a Tokio runtime: {source}")]
    NoRuntime {
        /// The underlying runtime lookup error.
        #[source]
        source: tokio::runtime::TryCurrentError,
    },
}

/// Shared handle to the custom downloads. Cloning is cheap.
#[derive(Clone)]
pub struct DownloadRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    workers: DashMap<DownloadId, Arc<TransferWorker>>,
    // Files owned by a worker that is listed or still draining after a cancel.
    destinations: Mutex<HashSet<PathBuf>>,
    client: HttpClient,
    download_dir: PathBuf,
    runtime: Handle,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    records_tx: watch::Sender<Arc<[DownloadRecord]>>,
    notifications: Arc<dyn NotificationSink>,
}

impl std::fmt::Debug for DownloadRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadRegistry")
            .field("download_dir", &self.inner.download_dir)
            .field("downloads", &self.inner.workers.len())
            .finish_non_exhaustive()
    }
}

impl DownloadRegistry {
    /// Creates an empty registry saving files under `download_dir`.
    ///
    /// Transfers are spawned on the runtime current at construction time.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NoRuntime`] when called outside a Tokio runtime.
    pub fn new(
        client: HttpClient,
        download_dir: impl Into<PathBuf>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Result<Self, RegistryError> {
        let runtime = Handle::try_current().map_err(|source| RegistryError::NoRuntime { source })?;
        let (records_tx, _) = watch::channel(Arc::<[DownloadRecord]>::from(Vec::new()));
        Ok(Self {
            inner: Arc::new(RegistryInner {
                workers: DashMap::new(),
                destinations: Mutex::new(HashSet::new()),
                client,
                download_dir: download_dir.into(),
                runtime,
                tasks: Mutex::new(Vec::new()),
                records_tx,
                notifications,
            }),
        })
    }

    /// Directory files are written to.
    #[must_use]
    pub fn download_dir(&self) -> &Path {
        &self.inner.download_dir
    }

    /// Starts (or resumes) the download of `url` into `filename`.
    ///
    /// A known URL whose download is paused or failed is resumed; any other
    /// known URL is left alone. Returns the URL's identity either way.
    ///
    /// When another download already writes to `filename`, the new one is
    /// saved as `stem_1.ext`, `stem_2.ext` and so on.
    #[instrument(skip(self), fields(url = %url))]
    pub fn start(&self, url: &str, filename: &str) -> DownloadId {
        let id = DownloadId::from_url(url);
        let fresh = match self.inner.workers.entry(id) {
            Entry::Occupied(entry) => {
                let worker = Arc::clone(entry.get());
                drop(entry);
                if worker.status().is_resumable() {
                    self.inner.resume_worker(&worker);
                } else {
                    debug!(%id, status = %worker.status(), "start ignored; download already known");
                }
                None
            }
            Entry::Vacant(entry) => {
                let filename = self.inner.reserve_destination(filename);
                let worker = Arc::new(TransferWorker::new(url, filename, &self.inner.download_dir));
                entry.insert(Arc::clone(&worker));
                Some(worker)
            }
        };
        if let Some(worker) = fresh {
            info!(%id, path = %worker.destination().display(), "download started");
            self.inner.launch(worker);
        }
        self.inner.republish();
        id
    }

    /// Requests a pause; the transfer stops at its next slice boundary.
    pub fn pause(&self, id: DownloadId) {
        let Some(worker) = self.worker(id) else {
            debug!(%id, "pause for unknown download ignored");
            return;
        };
        worker.pause();
        self.inner.republish();
    }

    /// Clears a pause request and relaunches the transfer if it is not running.
    pub fn resume(&self, id: DownloadId) {
        let Some(worker) = self.worker(id) else {
            debug!(%id, "resume for unknown download ignored");
            return;
        };
        self.inner.resume_worker(&worker);
        self.inner.republish();
    }

    /// Cancels a download: removes it and deletes its partial file.
    ///
    /// Returns once the transfer loop has stopped and the file is gone, so a
    /// following [`start`](Self::start) of the same URL begins at offset 0.
    /// A completed download is left untouched.
    pub async fn cancel(&self, id: DownloadId) {
        let Some(worker) = self.worker(id) else {
            debug!(%id, "cancel for unknown download ignored");
            return;
        };
        if worker.status() == DownloadStatus::Succeeded {
            debug!(%id, "cancel for completed download ignored");
            return;
        }
        self.inner.cancel_worker(id, &worker).await;
    }

    /// Removes a download from the list.
    ///
    /// Unfinished downloads are cancelled. Completed downloads are dropped
    /// from the list but their file stays on disk.
    pub async fn delete(&self, id: DownloadId) {
        let Some(worker) = self.worker(id) else {
            debug!(%id, "delete for unknown download ignored");
            return;
        };
        if worker.status() != DownloadStatus::Succeeded {
            self.inner.cancel_worker(id, &worker).await;
            return;
        }
        self.inner.workers.remove(&id);
        self.inner.release_destination(worker.destination());
        self.inner.republish();
        self.inner.notifications.clear(id);
        info!(%id, "completed download removed from list");
    }

    /// Snapshot of one download.
    #[must_use]
    pub fn get(&self, id: DownloadId) -> Option<DownloadRecord> {
        self.worker(id).map(|worker| worker.snapshot())
    }

    /// Whether `id` names a custom download.
    #[must_use]
    pub fn contains(&self, id: DownloadId) -> bool {
        self.inner.workers.contains_key(&id)
    }

    /// Last published list, id descending.
    #[must_use]
    pub fn records(&self) -> Arc<[DownloadRecord]> {
        Arc::clone(&self.inner.records_tx.borrow())
    }

    /// Subscribes to list changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<[DownloadRecord]>> {
        self.inner.records_tx.subscribe()
    }

    /// Pauses every unfinished download and waits for the transfer tasks to
    /// stop. Partial files are kept for a later resume.
    pub async fn shutdown(&self) {
        let mut paused = 0usize;
        for entry in &self.inner.workers {
            if matches!(
                entry.value().status(),
                DownloadStatus::Pending | DownloadStatus::Running
            ) {
                entry.value().pause();
                paused += 1;
            }
        }
        let tasks = std::mem::take(
            &mut *self
                .inner
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        info!(paused, tasks = tasks.len(), "registry shutting down");
        for task in tasks {
            if let Err(error) = task.await {
                debug!(error = %error, "transfer task ended abnormally");
            }
        }
        self.inner.republish();
    }

    fn worker(&self, id: DownloadId) -> Option<Arc<TransferWorker>> {
        self.inner.workers.get(&id).map(|entry| Arc::clone(entry.value()))
    }
}

impl RegistryInner {
    fn launch(self: &Arc<Self>, worker: Arc<TransferWorker>) {
        let inner = Arc::clone(self);
        let task = self.runtime.spawn(async move {
            worker.run(&inner.client, inner.as_ref()).await;
        });
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }

    fn resume_worker(self: &Arc<Self>, worker: &Arc<TransferWorker>) {
        worker.resume();
        if worker.status() == DownloadStatus::Succeeded {
            debug!(id = %worker.id(), "resume for completed download ignored");
            return;
        }
        if worker.is_running() {
            debug!(id = %worker.id(), "transfer still running; pause request cleared");
            return;
        }
        info!(id = %worker.id(), "download resumed");
        self.launch(Arc::clone(worker));
    }

    async fn cancel_worker(&self, id: DownloadId, worker: &TransferWorker) {
        worker.cancel();
        self.workers.remove(&id);
        self.republish();
        self.notifications.clear(id);
        worker.wait_idle().await;
        if worker.status() == DownloadStatus::Succeeded {
            debug!(%id, "transfer finished before the cancel landed; file kept");
        } else {
            discard_partial(worker.destination()).await;
        }
        self.release_destination(worker.destination());
        info!(%id, "download cancelled");
    }

    fn reserve_destination(&self, filename: &str) -> String {
        let mut taken = self
            .destinations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let chosen = unique_filename(filename, |candidate| {
            taken.contains(&self.download_dir.join(candidate))
        });
        if chosen != filename {
            debug!(requested = filename, chosen = %chosen, "file name in use; saving under another name");
        }
        taken.insert(self.download_dir.join(&chosen));
        chosen
    }

    fn release_destination(&self, path: &Path) {
        self.destinations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
    }

    fn snapshot(&self) -> Vec<DownloadRecord> {
        let mut records: Vec<DownloadRecord> = self
            .workers
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        records.sort_by(|a, b| b.id.cmp(&a.id));
        records
    }
}

impl ProgressSink for RegistryInner {
    fn republish(&self) {
        // Snapshotting under the channel's write lock keeps publications in
        // order when several workers republish at once.
        self.records_tx.send_if_modified(|current| {
            let next = self.snapshot();
            if **current == *next {
                return false;
            }
            *current = Arc::from(next);
            true
        });
    }
}
