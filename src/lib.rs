//! Browser Downloads Library
//!
//! This library provides the download manager behind an embedded browser:
//! resumable HTTP transfers run in-process, downloads handed to the platform
//! store are observed by polling, and both are merged into one live list.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`download`] - Transfer worker, registry, rate estimator and reconciler
//! - [`lifecycle`] - Foreground presence and progress notifications
//! - [`service`] - Composition root exposing the command surface
//! - [`config`] - Engine settings

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod download;
pub mod lifecycle;
pub mod service;
#[cfg(test)]
pub mod test_support;

// Re-export commonly used types
pub use config::EngineConfig;
pub use download::{
    DownloadError, DownloadId, DownloadOrigin, DownloadRecord, DownloadRegistry, DownloadStatus,
    ExternalDownloadStore, ExternalRecord, ExternalRequest, ExternalStoreError, HttpClient,
    InMemoryExternalStore, UnifiedDownload,
};
pub use lifecycle::{LifecycleDriver, Notification, NotificationSink, TracingNotificationSink};
pub use service::{DownloadService, ServiceError};
