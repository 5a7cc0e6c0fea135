//! Foreground presence and per-download notifications.
//!
//! The [`LifecycleDriver`] watches the unified view. While anything is
//! pending, running or paused it keeps the host's foreground signal raised and
//! pushes one notification per active download; once nothing is active it
//! lowers the signal.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, instrument};

use crate::download::{DownloadId, DownloadStatus, UnifiedDownload, ViewReceiver};

/// Content of one progress notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Download the notification belongs to.
    pub id: DownloadId,
    /// File name.
    pub title: String,
    /// `"<speed> • <eta>"`, `"Pending..."` or `"Paused"`.
    pub text: String,
    /// Completion, 0 to 100.
    pub progress: u8,
}

impl Notification {
    /// Notification for an active download, `None` otherwise.
    #[must_use]
    pub fn for_download(item: &UnifiedDownload) -> Option<Self> {
        let text = match item.status {
            DownloadStatus::Running => format!("{} • {}", item.speed_label(), item.eta_label()),
            DownloadStatus::Pending => "Pending...".to_string(),
            DownloadStatus::Paused => "Paused".to_string(),
            DownloadStatus::Succeeded | DownloadStatus::Failed => return None,
        };
        Some(Self {
            id: item.id,
            title: item.title.clone(),
            text,
            progress: item.progress_percent(),
        })
    }
}

/// Host surface for notifications and the foreground presence signal.
pub trait NotificationSink: Send + Sync {
    /// Shows or replaces the notification for `notification.id`.
    fn show(&self, notification: &Notification);

    /// Removes the notification for `id`, if any.
    fn clear(&self, id: DownloadId);

    /// Raises or lowers the foreground presence signal.
    fn set_foreground(&self, active: bool);
}

/// Sink that reports through `tracing`; used when no host surface exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    fn show(&self, notification: &Notification) {
        debug!(
            id = %notification.id,
            title = %notification.title,
            progress = notification.progress,
            "{}",
            notification.text
        );
    }

    fn clear(&self, id: DownloadId) {
        debug!(%id, "notification cleared");
    }

    fn set_foreground(&self, active: bool) {
        info!(active, "foreground presence changed");
    }
}

/// Mirrors the unified view onto a [`NotificationSink`].
pub struct LifecycleDriver {
    view_rx: ViewReceiver,
    notifications: Arc<dyn NotificationSink>,
    foreground: bool,
    shown: HashSet<DownloadId>,
}

impl std::fmt::Debug for LifecycleDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleDriver")
            .field("foreground", &self.foreground)
            .field("shown", &self.shown.len())
            .finish_non_exhaustive()
    }
}

impl LifecycleDriver {
    /// Creates a driver following `view_rx`; the foreground signal starts lowered.
    #[must_use]
    pub fn new(view_rx: ViewReceiver, notifications: Arc<dyn NotificationSink>) -> Self {
        Self {
            view_rx,
            notifications,
            foreground: false,
            shown: HashSet::new(),
        }
    }

    /// Whether the foreground signal is currently raised.
    #[must_use]
    pub fn is_foreground(&self) -> bool {
        self.foreground
    }

    /// Applies one view: updates notifications and the foreground signal.
    pub fn apply(&mut self, view: &[UnifiedDownload]) {
        let active: Vec<Notification> = view.iter().filter_map(Notification::for_download).collect();

        let still_shown: HashSet<DownloadId> = active.iter().map(|n| n.id).collect();
        for id in self.shown.difference(&still_shown) {
            self.notifications.clear(*id);
        }
        self.shown = still_shown;

        if active.is_empty() {
            self.set_foreground(false);
            return;
        }
        self.set_foreground(true);
        for notification in &active {
            self.notifications.show(notification);
        }
    }

    /// Follows the view until its channel closes or `shutdown` fires.
    #[instrument(skip_all)]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let initial = Arc::clone(&*self.view_rx.borrow_and_update());
        self.apply(&initial);
        loop {
            tokio::select! {
                changed = self.view_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let view = Arc::clone(&*self.view_rx.borrow_and_update());
                    self.apply(&view);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.set_foreground(false);
        debug!("lifecycle driver stopped");
    }

    fn set_foreground(&mut self, active: bool) {
        if self.foreground != active {
            self.foreground = active;
            self.notifications.set_foreground(active);
        }
    }
}
