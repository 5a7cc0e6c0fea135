//! CLI entry point for browser-downloads.

use std::io::{self, IsTerminal};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result, bail};
use browser_downloads::{
    DownloadId, DownloadService, DownloadStatus, ExternalDownloadStore, InMemoryExternalStore,
    NotificationSink, TracingNotificationSink, UnifiedDownload,
};
use clap::Parser;
use tracing::{debug, info, warn};

mod app_config;
mod cli;
mod progress;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    let file_config = app_config::load_default_file_config()?;
    let settings = app_config::resolve_settings(&args, file_config.as_ref());

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config file > default (info)
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(settings.verbosity.log_level()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    if args.urls.is_empty() {
        info!("No URLs provided. Pass one or more URLs as arguments.");
        info!("Example: browser-downloads https://example.com/file.zip");
        return Ok(());
    }

    let store: Arc<dyn ExternalDownloadStore> = Arc::new(InMemoryExternalStore::new());
    let notifications: Arc<dyn NotificationSink> = Arc::new(TracingNotificationSink);
    let service = DownloadService::start(&settings.engine, store, notifications)
        .context("Failed to start download service")?;
    info!(
        download_dir = %settings.engine.download_dir.display(),
        urls = args.urls.len(),
        "browser-downloads starting"
    );

    let mut ids: Vec<DownloadId> = Vec::new();
    for url in &args.urls {
        match service.enqueue(url, None, None) {
            Ok(id) => {
                debug!(%id, url = %url, "download enqueued");
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            Err(error) => warn!(url = %url, error = %error, "Skipped URL"),
        }
    }

    let show_progress = !args.quiet && !args.json && io::stderr().is_terminal();
    let (progress_handle, progress_stop) =
        progress::spawn_progress_ui(show_progress, service.subscribe());

    let mut view_rx = service.subscribe();
    tokio::select! {
        settled = view_rx.wait_for(|view| all_settled(view, &ids)) => {
            if settled.is_err() {
                warn!("download list closed before all downloads finished");
            }
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Interrupted; pausing downloads (run again to resume)"),
                Err(error) => warn!(error = %error, "failed to listen for interrupt"),
            }
        }
    }

    service.shutdown().await;
    progress_stop.store(true, Ordering::SeqCst);
    if let Some(handle) = progress_handle
        && let Err(error) = handle.await
    {
        debug!(error = %error, "progress UI ended abnormally");
    }

    let view = service.snapshot();
    if args.json {
        let json = serde_json::to_string_pretty(&*view).context("Failed to encode download list")?;
        println!("{json}");
    }

    let count = |status| view.iter().filter(|item| item.status == status).count();
    let failed = count(DownloadStatus::Failed);
    info!(
        completed = count(DownloadStatus::Succeeded),
        paused = count(DownloadStatus::Paused),
        failed,
        total = view.len(),
        "Download run finished"
    );

    if failed > 0 {
        bail!("{failed} download(s) failed");
    }
    Ok(())
}

fn all_settled(view: &[UnifiedDownload], ids: &[DownloadId]) -> bool {
    ids.iter().all(|id| {
        view.iter().any(|item| {
            item.id == *id
                && matches!(
                    item.status,
                    DownloadStatus::Succeeded | DownloadStatus::Failed
                )
        })
    })
}
