//! Helpers shared by unit tests.

pub mod socket_guard;

use std::sync::{Mutex, PoisonError};

use crate::download::DownloadId;
use crate::lifecycle::{Notification, NotificationSink};

/// Notification sink that remembers every call.
#[derive(Debug, Default)]
pub struct RecordingNotifications {
    shown: Mutex<Vec<Notification>>,
    cleared: Mutex<Vec<DownloadId>>,
    foreground: Mutex<Vec<bool>>,
}

impl RecordingNotifications {
    pub fn shown(&self) -> Vec<Notification> {
        self.shown.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn cleared(&self) -> Vec<DownloadId> {
        self.cleared.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn foreground_changes(&self) -> Vec<bool> {
        self.foreground
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl NotificationSink for RecordingNotifications {
    fn show(&self, notification: &Notification) {
        self.shown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification.clone());
    }

    fn clear(&self, id: DownloadId) {
        self.cleared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id);
    }

    fn set_foreground(&self, active: bool) {
        self.foreground
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(active);
    }
}
