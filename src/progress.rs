//! Progress UI: one bar per download, driven by the unified view.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use browser_downloads::download::ViewReceiver;
use browser_downloads::{DownloadId, UnifiedDownload};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Spawns the progress UI when requested.
/// Returns (handle, stop) so the caller can signal stop and await the handle.
/// When `enabled` is false, returns (None, stop) with stop already true.
pub(crate) fn spawn_progress_ui(
    enabled: bool,
    view_rx: ViewReceiver,
) -> (Option<tokio::task::JoinHandle<()>>, Arc<AtomicBool>) {
    if !enabled {
        return (None, Arc::new(AtomicBool::new(true)));
    }
    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_bars_inner(view_rx, Arc::clone(&stop));
    (Some(handle), stop)
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner} {prefix:30!} [{bar:25}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

fn spawn_bars_inner(view_rx: ViewReceiver, stop: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let multi = MultiProgress::new();
        let mut bars: HashMap<DownloadId, ProgressBar> = HashMap::new();

        while !stop.load(Ordering::SeqCst) {
            let view = Arc::clone(&*view_rx.borrow());
            render(&multi, &mut bars, &view);
            tokio::time::sleep(Duration::from_millis(120)).await;
        }

        let view = Arc::clone(&*view_rx.borrow());
        render(&multi, &mut bars, &view);
        for bar in bars.values() {
            bar.finish();
        }
    })
}

fn render(multi: &MultiProgress, bars: &mut HashMap<DownloadId, ProgressBar>, view: &[UnifiedDownload]) {
    for item in view {
        let bar = bars.entry(item.id).or_insert_with(|| {
            let bar = multi.add(ProgressBar::new(100));
            bar.set_style(bar_style());
            bar.set_prefix(item.title.clone());
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        });
        bar.set_position(u64::from(item.progress_percent()));
        bar.set_message(item.status_line());
    }
    bars.retain(|id, bar| {
        let keep = view.iter().any(|item| item.id == *id);
        if !keep {
            bar.finish_and_clear();
        }
        keep
    });
}
