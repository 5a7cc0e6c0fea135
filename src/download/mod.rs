//! Resumable HTTP downloads and the merged download list.
//!
//! # Features
//!
//! - Streaming transfers written to disk in 8 KiB slices
//! - Resume from a partial file with `Range: bytes=<offset>-`
//! - Cooperative pause and cancel between slices
//! - One registry publishing an id-ordered list of records
//! - Smoothed speed and ETA for externally managed downloads
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use browser_downloads::download::{DownloadRegistry, HttpClient};
//! use browser_downloads::lifecycle::TracingNotificationSink;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = DownloadRegistry::new(
//!     HttpClient::new()?,
//!     "./downloads",
//!     Arc::new(TracingNotificationSink),
//! )?;
//! let id = registry.start("https://example.com/app.apk", "app.apk");
//! let mut updates = registry.subscribe();
//! updates.changed().await?;
//! println!("{id}: {:?}", registry.get(id).map(|r| r.status));
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod error;
mod external;
pub mod filename;
mod identity;
mod rate;
mod reconciler;
mod record;
mod registry;
mod view;
mod worker;

pub use client::{DEFAULT_USER_AGENT, HttpClient, TransferResponse};
pub use error::DownloadError;
pub use external::{
    ExternalDownloadStore, ExternalRecord, ExternalRequest, ExternalStoreError,
    InMemoryExternalStore,
};
pub use identity::DownloadId;
pub use rate::RateEstimator;
pub use reconciler::{Reconciler, ViewReceiver, merge_views};
pub use record::{DownloadRecord, DownloadStatus};
pub use registry::{DownloadRegistry, RegistryError};
pub use view::{DownloadOrigin, UnifiedDownload, format_size};
pub use worker::{ProgressSink, TransferWorker};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
