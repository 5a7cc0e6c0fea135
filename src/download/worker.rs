//! Single resumable transfer.
//!
//! A [`TransferWorker`] owns one destination file and the mutable progress of
//! one custom download. Its [`run`](TransferWorker::run) loop is the only
//! writer of that file; commands reach it through atomic flags that are
//! inspected between 8 KiB slices, so a pause or cancel takes effect within
//! one slice.

use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};

use super::client::HttpClient;
use super::constants::{CHUNK_SIZE, PROGRESS_WINDOW, UNKNOWN_ETA, UNKNOWN_SIZE};
use super::error::DownloadError;
use super::identity::DownloadId;
use super::record::{DownloadRecord, DownloadStatus};

/// Receiver of "state changed" signals from a running transfer.
///
/// The registry implements this to republish its list; tests use counters.
pub trait ProgressSink: Send + Sync {
    /// Called after every status transition and every speed refresh.
    fn republish(&self);
}

/// How a transfer loop ended when no error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferOutcome {
    Completed,
    Paused,
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
struct Progress {
    total_size: i64,
    downloaded_bytes: u64,
    status: DownloadStatus,
    speed: u64,
    eta: i64,
}

/// One custom download and its transfer loop.
#[derive(Debug)]
pub struct TransferWorker {
    id: DownloadId,
    url: String,
    filename: String,
    destination: PathBuf,
    progress: Mutex<Progress>,
    paused: AtomicBool,
    cancelled: AtomicBool,
    running: AtomicBool,
    // Woken on pause and cancel so a transfer blocked on the network stops.
    interrupt: Notify,
    // Woken whenever the loop releases `running`.
    exited: Notify,
}

impl TransferWorker {
    /// Creates a worker saving `url` as `download_dir/filename`.
    #[must_use]
    pub fn new(url: impl Into<String>, filename: impl Into<String>, download_dir: &Path) -> Self {
        let url = url.into();
        let filename = filename.into();
        Self {
            id: DownloadId::from_url(&url),
            destination: download_dir.join(&filename),
            url,
            filename,
            progress: Mutex::new(Progress {
                total_size: UNKNOWN_SIZE,
                downloaded_bytes: 0,
                status: DownloadStatus::Pending,
                speed: 0,
                eta: UNKNOWN_ETA,
            }),
            paused: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            running: AtomicBool::new(false),
            interrupt: Notify::new(),
            exited: Notify::new(),
        }
    }

    /// URL-derived identity.
    #[must_use]
    pub fn id(&self) -> DownloadId {
        self.id
    }

    /// Source URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Full path of the destination file.
    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> DownloadStatus {
        self.lock().status
    }

    /// Consistent copy of the mutable fields.
    #[must_use]
    pub fn snapshot(&self) -> DownloadRecord {
        let progress = *self.lock();
        DownloadRecord {
            id: self.id,
            url: self.url.clone(),
            filename: self.filename.clone(),
            total_size: progress.total_size,
            downloaded_bytes: progress.downloaded_bytes,
            status: progress.status,
            speed: progress.speed,
            eta: progress.eta,
        }
    }

    /// Requests a pause at the next slice boundary.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.interrupt.notify_waiters();
    }

    /// Clears a pending pause request.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Requests cancellation: the loop deletes the partial file and exits.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.interrupt.notify_waiters();
    }

    /// Whether a transfer loop is currently executing.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether a pause has been requested and not cleared.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Whether the download has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Waits until no transfer loop is executing.
    ///
    /// Once this returns after [`cancel`](Self::cancel), the loop will not
    /// touch the destination file again.
    pub async fn wait_idle(&self) {
        loop {
            let mut exited = pin!(self.exited.notified());
            exited.as_mut().enable();
            if !self.is_running() {
                return;
            }
            exited.await;
        }
    }

    /// Runs the transfer until it completes, fails, pauses or is cancelled.
    ///
    /// Returns immediately if another invocation is already running the loop.
    /// Errors never escape: they become [`DownloadStatus::Failed`].
    #[instrument(skip(self, client, sink), fields(id = %self.id, url = %self.url))]
    pub async fn run(&self, client: &HttpClient, sink: &dyn ProgressSink) {
        loop {
            if self.is_cancelled() {
                debug!("transfer cancelled before start");
                return;
            }
            if self
                .running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                debug!("transfer loop already running; ignoring launch");
                return;
            }
            // Pairs with `cancel` storing its flag before reading `running`.
            if self.is_cancelled() {
                self.release();
                return;
            }

            let outcome = self.transfer(client, sink).await;
            self.settle(&outcome);
            // A cancel that raced the loop exit left the file to us.
            if self.is_cancelled() && !matches!(outcome, Ok(TransferOutcome::Completed)) {
                remove_partial(&self.destination).await;
            }
            self.release();
            sink.republish();

            // A resume that landed while the loop was exiting saw `running`
            // still set and did not relaunch; pick it up here.
            let resumed_meanwhile = matches!(outcome, Ok(TransferOutcome::Paused))
                && !self.is_paused()
                && !self.is_cancelled();
            if !resumed_meanwhile {
                return;
            }
            debug!("resume arrived while pausing; restarting transfer");
        }
    }

    fn settle(&self, outcome: &Result<TransferOutcome, DownloadError>) {
        match outcome {
            Ok(TransferOutcome::Completed) => {
                let progress = self.update(|p| {
                    p.status = DownloadStatus::Succeeded;
                    p.speed = 0;
                    p.eta = UNKNOWN_ETA;
                });
                info!(
                    bytes = progress.downloaded_bytes,
                    path = %self.destination.display(),
                    "download complete"
                );
            }
            Ok(TransferOutcome::Paused) => {
                let progress = self.update(|p| {
                    p.status = DownloadStatus::Paused;
                    p.speed = 0;
                    p.eta = UNKNOWN_ETA;
                });
                info!(bytes = progress.downloaded_bytes, "download paused");
            }
            Ok(TransferOutcome::Cancelled) => {
                info!("download cancelled");
            }
            Err(error) => {
                self.update(|p| {
                    p.status = DownloadStatus::Failed;
                    p.speed = 0;
                    p.eta = UNKNOWN_ETA;
                });
                warn!(error = %error, "download failed");
            }
        }
    }

    async fn transfer(
        &self,
        client: &HttpClient,
        sink: &dyn ProgressSink,
    ) -> Result<TransferOutcome, DownloadError> {
        let offset = existing_length(&self.destination).await;
        self.update(|p| {
            p.status = DownloadStatus::Pending;
            p.downloaded_bytes = offset;
            p.speed = 0;
            p.eta = UNKNOWN_ETA;
        });
        sink.republish();
        debug!(offset, "opening transfer");

        let opened = tokio::select! {
            opened = client.open(&self.url, offset) => opened?,
            () = self.interrupted() => return Ok(self.stop_outcome()),
        };
        let start = opened.start_offset;
        let total = announced_total(opened.content_length, start);
        if offset > 0 && start == 0 {
            info!(offset, "range not honored; restarting from the beginning");
        }

        self.update(|p| {
            p.total_size = total;
            p.downloaded_bytes = start;
            p.status = DownloadStatus::Running;
        });
        sink.republish();

        let mut file = open_destination(&self.destination, start > 0).await?;
        let mut stream = opened.response.bytes_stream();
        let mut window = RateWindow::new(Instant::now());

        loop {
            let next = tokio::select! {
                next = stream.next() => next,
                () = self.interrupted() => return self.stop(file).await,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(error) => {
                    close(&mut file, &self.destination).await?;
                    return Err(DownloadError::from_request(&self.url, error));
                }
            };

            for slice in chunk.chunks(CHUNK_SIZE) {
                if self.is_paused() || self.is_cancelled() {
                    return self.stop(file).await;
                }

                file.write_all(slice)
                    .await
                    .map_err(|e| DownloadError::io(&self.destination, e))?;

                let refreshed = window.record(slice.len() as u64, Instant::now());
                self.update(|p| {
                    p.downloaded_bytes += slice.len() as u64;
                    if let Some(speed) = refreshed {
                        p.speed = speed;
                        if speed > 0 && p.total_size > 0 {
                            p.eta = remaining_secs(p.total_size, p.downloaded_bytes, speed);
                        }
                    }
                });
                if refreshed.is_some() {
                    sink.republish();
                }
            }
        }

        close(&mut file, &self.destination).await?;

        let progress = *self.lock();
        match u64::try_from(progress.total_size) {
            Ok(expected) if progress.downloaded_bytes < expected => Err(DownloadError::integrity(
                &self.destination,
                expected,
                progress.downloaded_bytes,
            )),
            // Unknown length: the server closing the body is taken as completion.
            _ => Ok(TransferOutcome::Completed),
        }
    }

    /// Resolves once a pause or cancel is requested.
    async fn interrupted(&self) {
        loop {
            let mut signal = pin!(self.interrupt.notified());
            signal.as_mut().enable();
            if self.is_paused() || self.is_cancelled() {
                return;
            }
            signal.await;
        }
    }

    /// Ends a transfer interrupted by a pause or cancel request.
    async fn stop(&self, mut file: File) -> Result<TransferOutcome, DownloadError> {
        if self.is_cancelled() {
            drop(file);
            remove_partial(&self.destination).await;
            return Ok(TransferOutcome::Cancelled);
        }
        close(&mut file, &self.destination).await?;
        Ok(TransferOutcome::Paused)
    }

    fn stop_outcome(&self) -> TransferOutcome {
        if self.is_cancelled() {
            TransferOutcome::Cancelled
        } else {
            TransferOutcome::Paused
        }
    }

    fn release(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.exited.notify_waiters();
    }

    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, apply: impl FnOnce(&mut Progress)) -> Progress {
        let mut guard = self.lock();
        apply(&mut guard);
        *guard
    }
}

/// Bytes accumulated since the last speed refresh.
#[derive(Debug)]
struct RateWindow {
    started: Instant,
    bytes: u64,
}

impl RateWindow {
    fn new(now: Instant) -> Self {
        Self {
            started: now,
            bytes: 0,
        }
    }

    /// Adds `bytes`; once the window spans [`PROGRESS_WINDOW`] returns the
    /// speed over it and starts a new window.
    fn record(&mut self, bytes: u64, now: Instant) -> Option<u64> {
        self.bytes += bytes;
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed < PROGRESS_WINDOW {
            return None;
        }
        let speed = speed_over(self.bytes, elapsed);
        self.started = now;
        self.bytes = 0;
        Some(speed)
    }
}

fn speed_over(bytes: u64, elapsed: Duration) -> u64 {
    let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX).max(1);
    bytes.saturating_mul(1000) / millis
}

fn remaining_secs(total: i64, downloaded: u64, speed: u64) -> i64 {
    let total = u64::try_from(total).unwrap_or(0);
    let remaining = total.saturating_sub(downloaded);
    i64::try_from(remaining / speed).unwrap_or(i64::MAX)
}

fn announced_total(content_length: Option<u64>, start: u64) -> i64 {
    content_length
        .and_then(|len| i64::try_from(len.saturating_add(start)).ok())
        .unwrap_or(UNKNOWN_SIZE)
}

async fn existing_length(path: &Path) -> u64 {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.len())
        .unwrap_or(0)
}

async fn open_destination(path: &Path, append: bool) -> Result<File, DownloadError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::io(parent, e))?;
    }
    let mut options = OpenOptions::new();
    options.create(true);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    options
        .open(path)
        .await
        .map_err(|e| DownloadError::io(path, e))
}

async fn close(file: &mut File, path: &Path) -> Result<(), DownloadError> {
    file.flush().await.map_err(|e| DownloadError::io(path, e))
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "partial file removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial file"),
    }
}

/// Deletes a destination file left behind by a worker that is not running.
pub(crate) async fn discard_partial(path: &Path) {
    remove_partial(path).await;
}
