//! Poll loop merging custom and external downloads into one view.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use super::external::ExternalDownloadStore;
use super::rate::RateEstimator;
use super::record::DownloadRecord;
use super::registry::DownloadRegistry;
use super::view::UnifiedDownload;

/// Last-value channel carrying the unified view.
pub type ViewReceiver = watch::Receiver<Arc<[UnifiedDownload]>>;

/// Periodically queries the external store and republishes the merged view.
pub struct Reconciler {
    registry: DownloadRegistry,
    store: Arc<dyn ExternalDownloadStore>,
    estimator: RateEstimator,
    poll_interval: Duration,
    view_tx: watch::Sender<Arc<[UnifiedDownload]>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("poll_interval", &self.poll_interval)
            .field("tracked", &self.estimator.len())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates the reconciler and the receiving end of its view channel.
    #[must_use]
    pub fn new(
        registry: DownloadRegistry,
        store: Arc<dyn ExternalDownloadStore>,
        poll_interval: Duration,
    ) -> (Self, ViewReceiver) {
        let (view_tx, view_rx) = watch::channel(Arc::<[UnifiedDownload]>::from(Vec::new()));
        (
            Self {
                registry,
                store,
                estimator: RateEstimator::new(),
                poll_interval,
                view_tx,
            },
            view_rx,
        )
    }

    /// Runs one reconciliation tick and returns the published view.
    ///
    /// A failing store query is logged and contributes no external rows;
    /// smoothing state is kept for the next successful query.
    pub async fn poll_once(&mut self, now: Instant) -> Arc<[UnifiedDownload]> {
        let external = match self.store.query().await {
            Ok(records) => {
                let live: HashSet<_> = records.iter().map(|record| record.id).collect();
                self.estimator.retain(&live);
                records
            }
            Err(error) => {
                warn!(error = %error, "external download query failed; showing custom downloads only");
                Vec::new()
            }
        };

        let rows: Vec<UnifiedDownload> = external
            .into_iter()
            .map(|record| {
                let (speed, eta) = self.estimator.estimate(
                    record.id,
                    record.downloaded_bytes,
                    record.total_size,
                    record.status,
                    now,
                );
                UnifiedDownload::external(record, speed, eta)
            })
            .collect();

        let view: Arc<[UnifiedDownload]> = merge_views(rows, &self.registry.records()).into();
        self.view_tx.send_if_modified(|current| {
            if **current == *view {
                return false;
            }
            *current = Arc::clone(&view);
            true
        });
        view
    }

    /// Polls until `shutdown` turns true or its sender goes away, then
    /// publishes one last tick.
    #[instrument(skip_all)]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        debug!("reconciler started");
        while !*shutdown.borrow_and_update() {
            self.poll_once(Instant::now()).await;
            tokio::select! {
                () = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        self.poll_once(Instant::now()).await;
        debug!("reconciler stopped");
    }
}

/// Concatenates both sources and orders the result by id, newest first.
#[must_use]
pub fn merge_views(external: Vec<UnifiedDownload>, custom: &[DownloadRecord]) -> Vec<UnifiedDownload> {
    let mut merged = external;
    merged.extend(custom.iter().cloned().map(UnifiedDownload::from));
    merged.sort_by(|a, b| b.id.cmp(&a.id));
    merged
}
