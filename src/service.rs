//! Composition root tying the registry, the reconciler and the lifecycle
//! driver together behind one command surface.

use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::EngineConfig;
use crate::download::filename::{resolve_download_filename, restart_filename, sanitize_filename};
use crate::download::{
    DownloadError, DownloadId, DownloadRegistry, ExternalDownloadStore, ExternalRequest,
    ExternalStoreError, HttpClient, Reconciler, RegistryError, UnifiedDownload, ViewReceiver,
};
use crate::lifecycle::{LifecycleDriver, NotificationSink};

/// Errors returned by [`DownloadService`] operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The HTTP client could not be built.
    #[error("failed to initialize HTTP client: {source}")]
    Client {
        /// The underlying client error.
        #[source]
        source: DownloadError,
    },

    /// The registry could not be created.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The URL cannot be fetched over HTTP.
    #[error("unsupported download URL: {url}")]
    UnsupportedUrl {
        /// The rejected URL.
        url: String,
    },

    /// No external download with this id exists.
    #[error("unknown download {id}")]
    UnknownDownload {
        /// The requested id.
        id: DownloadId,
    },

    /// The external record has no source URI to restart from.
    #[error("download {id} has no source URI")]
    MissingUri {
        /// The requested id.
        id: DownloadId,
    },

    /// The external store failed.
    #[error("external download store error: {source}")]
    Store {
        /// The underlying store error.
        #[source]
        source: ExternalStoreError,
    },
}

/// Download manager facade.
///
/// Custom downloads are transferred in-process by the registry; everything
/// else is delegated to the external store. Both appear in one view.
pub struct DownloadService {
    registry: DownloadRegistry,
    store: Arc<dyn ExternalDownloadStore>,
    notifications: Arc<dyn NotificationSink>,
    view_rx: ViewReceiver,
    shutdown_tx: watch::Sender<bool>,
    reconciler: Mutex<Option<JoinHandle<()>>>,
    lifecycle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for DownloadService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadService")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl DownloadService {
    /// Builds the service and spawns its background tasks on the current
    /// Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Client`] when the HTTP client cannot be built
    /// and [`ServiceError::Registry`] outside a Tokio runtime.
    #[instrument(skip(store, notifications), fields(download_dir = %config.download_dir.display()))]
    pub fn start(
        config: &EngineConfig,
        store: Arc<dyn ExternalDownloadStore>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Result<Self, ServiceError> {
        let client = HttpClient::with_timeouts(config.connect_timeout, config.read_timeout)
            .map_err(|source| ServiceError::Client { source })?;
        let registry = DownloadRegistry::new(
            client,
            config.download_dir.clone(),
            Arc::clone(&notifications),
        )?;
        let (reconciler, view_rx) =
            Reconciler::new(registry.clone(), Arc::clone(&store), config.poll_interval);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reconciler_task = tokio::spawn(reconciler.run(shutdown_rx));

        let service = Self {
            registry,
            store,
            notifications,
            view_rx,
            shutdown_tx,
            reconciler: Mutex::new(Some(reconciler_task)),
            lifecycle: Mutex::new(None),
        };
        service.ensure_lifecycle();
        info!("download service started");
        Ok(service)
    }

    /// Starts a download from a link the user clicked, deriving the file name
    /// from the headers the page supplied.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::UnsupportedUrl`] for anything but `http(s)`.
    pub fn enqueue(
        &self,
        url: &str,
        content_disposition: Option<&str>,
        mime: Option<&str>,
    ) -> Result<DownloadId, ServiceError> {
        check_fetchable(url)?;
        let filename = resolve_download_filename(url, content_disposition, mime);
        Ok(self.launch(url, &filename))
    }

    /// Starts a download saved under `suggested_filename`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::UnsupportedUrl`] for anything but `http(s)`.
    pub fn start_download(
        &self,
        url: &str,
        suggested_filename: &str,
    ) -> Result<DownloadId, ServiceError> {
        check_fetchable(url)?;
        Ok(self.launch(url, &sanitize_filename(suggested_filename)))
    }

    /// Pauses a custom download. External downloads cannot be paused.
    pub fn pause(&self, id: DownloadId) {
        if self.registry.contains(id) {
            self.registry.pause(id);
        } else {
            info!(%id, "cannot pause system download");
        }
    }

    /// Resumes a custom download, or restarts an external one.
    pub async fn resume(&self, id: DownloadId) {
        if self.registry.contains(id) {
            self.registry.resume(id);
            self.ensure_lifecycle();
            return;
        }
        if let Err(error) = self.restart(id).await {
            warn!(%id, error = %error, "failed to restart system download");
        }
    }

    /// Cancels a download and removes its partial file.
    pub async fn cancel(&self, id: DownloadId) {
        if self.registry.contains(id) {
            self.registry.cancel(id).await;
        }
        self.remove_external(id).await;
    }

    /// Removes a download from the list.
    pub async fn delete(&self, id: DownloadId) {
        if self.registry.contains(id) {
            self.registry.delete(id).await;
        }
        self.remove_external(id).await;
    }

    /// Re-enqueues an external download from its source URI.
    ///
    /// A custom id is simply resumed.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::UnknownDownload`] when the store does not know
    /// `id`, [`ServiceError::MissingUri`] when it has no source URI and
    /// [`ServiceError::Store`] when the store fails.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn restart(&self, id: DownloadId) -> Result<DownloadId, ServiceError> {
        if self.registry.contains(id) {
            self.registry.resume(id);
            self.ensure_lifecycle();
            return Ok(id);
        }

        let records = self
            .store
            .query()
            .await
            .map_err(|source| ServiceError::Store { source })?;
        let record = records
            .into_iter()
            .find(|record| record.id == id)
            .ok_or(ServiceError::UnknownDownload { id })?;
        let uri = record.uri.ok_or(ServiceError::MissingUri { id })?;

        self.store
            .remove(id)
            .await
            .map_err(|source| ServiceError::Store { source })?;
        self.notifications.clear(id);

        let filename = restart_filename(&record.title, &uri, record.media_type.as_deref());
        let new_id = self
            .store
            .enqueue(ExternalRequest {
                uri,
                filename,
                media_type: record.media_type,
            })
            .await
            .map_err(|source| ServiceError::Store { source })?;
        info!(%new_id, "system download restarted");
        self.ensure_lifecycle();
        Ok(new_id)
    }

    /// Subscribes to the unified view.
    #[must_use]
    pub fn subscribe(&self) -> ViewReceiver {
        self.view_rx.clone()
    }

    /// Last published unified view.
    #[must_use]
    pub fn snapshot(&self) -> Arc<[UnifiedDownload]> {
        Arc::clone(&*self.view_rx.borrow())
    }

    /// The registry of custom downloads.
    #[must_use]
    pub fn registry(&self) -> &DownloadRegistry {
        &self.registry
    }

    /// Respawns the lifecycle driver if it is not running.
    pub fn ensure_lifecycle(&self) {
        let mut slot = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        if *self.shutdown_tx.borrow() {
            debug!("service shut down; lifecycle driver not restarted");
            return;
        }
        let driver = LifecycleDriver::new(self.view_rx.clone(), Arc::clone(&self.notifications));
        *slot = Some(tokio::spawn(driver.run(self.shutdown_tx.subscribe())));
        debug!("lifecycle driver started");
    }

    /// Pauses running downloads, stops the background tasks and waits for
    /// them. Partial files are kept.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
        self.shutdown_tx.send_replace(true);
        let tasks = [
            take_task(&self.reconciler),
            take_task(&self.lifecycle),
        ];
        for task in tasks.into_iter().flatten() {
            if let Err(error) = task.await {
                debug!(error = %error, "background task ended abnormally");
            }
        }
        info!("download service stopped");
    }

    fn launch(&self, url: &str, filename: &str) -> DownloadId {
        let id = self.registry.start(url, filename);
        self.ensure_lifecycle();
        id
    }

    async fn remove_external(&self, id: DownloadId) {
        if let Err(error) = self.store.remove(id).await {
            warn!(%id, error = %error, "failed to remove download from system store");
        }
        self.notifications.clear(id);
    }
}

fn take_task(slot: &Mutex<Option<JoinHandle<()>>>) -> Option<JoinHandle<()>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

fn check_fetchable(url: &str) -> Result<(), ServiceError> {
    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        _ => Err(ServiceError::UnsupportedUrl {
            url: url.to_string(),
        }),
    }
}
