//! Integration tests for custom downloads driven through the registry.
//!
//! These tests verify full transfer flows against mock HTTP servers: fresh
//! and resumed downloads, unknown lengths, pause/resume and cancellation.

mod support;

use std::sync::Arc;
use std::time::Duration;

use browser_downloads::download::{DownloadId, DownloadRegistry, DownloadStatus, HttpClient};
use browser_downloads::{NotificationSink, TracingNotificationSink};
use support::raw_http::{BodyMode, RawServer};
use support::socket_guard::start_mock_server_or_skip;
use support::{patterned_body, poll_until};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

const WAIT: Duration = Duration::from_secs(20);

fn registry(dir: &TempDir) -> DownloadRegistry {
    let notifications: Arc<dyn NotificationSink> = Arc::new(TracingNotificationSink);
    DownloadRegistry::new(HttpClient::new().unwrap(), dir.path(), notifications).unwrap()
}

async fn wait_for_status(registry: &DownloadRegistry, id: DownloadId, status: DownloadStatus) {
    let mut rx = registry.subscribe();
    let reached = tokio::time::timeout(
        WAIT,
        rx.wait_for(|records| records.iter().any(|r| r.id == id && r.status == status)),
    )
    .await;
    assert!(
        matches!(reached, Ok(Ok(_))),
        "download {id} never reached {status}; last record: {:?}",
        registry.get(id)
    );
}

fn trickle() -> BodyMode {
    BodyMode::Trickle {
        chunk: 8 * 1024,
        delay: Duration::from_millis(20),
    }
}

#[tokio::test]
async fn test_fresh_download_of_known_length_succeeds() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let content = patterned_body(1000);
    Mock::given(method("GET"))
        .and(path("/file.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let registry = registry(&dir);

    let id = registry.start(&format!("{}/file.bin", server.uri()), "file.bin");
    wait_for_status(&registry, id, DownloadStatus::Succeeded).await;

    let record = registry.get(id).unwrap();
    assert_eq!(record.total_size, 1000);
    assert_eq!(record.downloaded_bytes, 1000);
    assert_eq!(record.speed, 0);
    assert_eq!(record.eta, -1);
    assert_eq!(std::fs::read(dir.path().join("file.bin")).unwrap(), content);
}

#[tokio::test]
async fn test_partial_file_resumes_with_range_header() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let content = patterned_body(1000);
    Mock::given(method("GET"))
        .and(path("/file.bin"))
        .and(header("range", "bytes=400-"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(content[400..].to_vec()))
        .expect(1)
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("file.bin"), &content[..400]).unwrap();
    let registry = registry(&dir);

    let id = registry.start(&format!("{}/file.bin", server.uri()), "file.bin");
    wait_for_status(&registry, id, DownloadStatus::Succeeded).await;

    let record = registry.get(id).unwrap();
    assert_eq!(record.total_size, 1000);
    assert_eq!(record.downloaded_bytes, 1000);
    assert_eq!(std::fs::read(dir.path().join("file.bin")).unwrap(), content);
}

#[tokio::test]
async fn test_unknown_length_download_succeeds_with_unknown_total() {
    let content = patterned_body(3000);
    let Some(server) = RawServer::start(content.clone(), BodyMode::NoContentLength).await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    let registry = registry(&dir);

    let id = registry.start(&server.url("/stream"), "stream.bin");
    wait_for_status(&registry, id, DownloadStatus::Succeeded).await;

    let record = registry.get(id).unwrap();
    assert_eq!(record.total_size, -1);
    assert_eq!(record.downloaded_bytes, 3000);
    assert_eq!(std::fs::read(dir.path().join("stream.bin")).unwrap(), content);
}

#[tokio::test]
async fn test_body_cut_short_fails_and_keeps_partial_file() {
    let content = patterned_body(400);
    let Some(server) =
        RawServer::start(content, BodyMode::Truncated { announced: 1000 }).await
    else {
        return;
    };
    let dir = TempDir::new().unwrap();
    let registry = registry(&dir);

    let id = registry.start(&server.url("/short.bin"), "short.bin");
    wait_for_status(&registry, id, DownloadStatus::Failed).await;

    let on_disk = std::fs::metadata(dir.path().join("short.bin")).unwrap().len();
    assert_eq!(on_disk, registry.get(id).unwrap().downloaded_bytes);
    assert!(on_disk <= 400);
}

#[tokio::test]
async fn test_pause_keeps_partial_file_and_resume_completes_it() {
    let content = patterned_body(256 * 1024);
    let Some(server) = RawServer::start(content.clone(), trickle()).await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    let registry = registry(&dir);
    let file = dir.path().join("slow.bin");

    let id = registry.start(&server.url("/slow.bin"), "slow.bin");
    assert!(
        poll_until(WAIT, || {
            registry
                .get(id)
                .is_some_and(|r| r.status == DownloadStatus::Running && r.downloaded_bytes >= 16 * 1024)
        })
        .await
    );

    registry.pause(id);
    wait_for_status(&registry, id, DownloadStatus::Paused).await;
    let paused = registry.get(id).unwrap();
    assert!(paused.downloaded_bytes < content.len() as u64);
    assert_eq!(std::fs::metadata(&file).unwrap().len(), paused.downloaded_bytes);
    assert_eq!(paused.speed, 0);

    // pausing twice changes nothing
    registry.pause(id);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(registry.get(id).unwrap().downloaded_bytes, paused.downloaded_bytes);

    registry.resume(id);
    wait_for_status(&registry, id, DownloadStatus::Succeeded).await;

    assert_eq!(std::fs::read(&file).unwrap(), content);
    assert_eq!(server.ranges(), vec![None, Some(paused.downloaded_bytes)]);
}

#[tokio::test]
async fn test_cancel_while_running_removes_record_and_file() {
    let content = patterned_body(256 * 1024);
    let Some(server) = RawServer::start(content, trickle()).await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    let registry = registry(&dir);
    let file = dir.path().join("cancel.bin");

    let id = registry.start(&server.url("/cancel.bin"), "cancel.bin");
    assert!(
        poll_until(WAIT, || {
            registry.get(id).is_some_and(|r| r.downloaded_bytes > 0)
        })
        .await
    );

    registry.cancel(id).await;

    assert!(!registry.contains(id));
    assert!(registry.records().iter().all(|r| r.id != id));
    assert!(!file.exists(), "partial file should be gone once cancel returns");
}

#[tokio::test]
async fn test_start_right_after_cancel_begins_fresh_transfer() {
    let content = patterned_body(128 * 1024);
    let Some(server) = RawServer::start(content.clone(), trickle()).await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    let registry = registry(&dir);
    let url = server.url("/again.bin");
    let file = dir.path().join("again.bin");

    let id = registry.start(&url, "again.bin");
    assert!(
        poll_until(WAIT, || {
            registry.get(id).is_some_and(|r| r.downloaded_bytes >= 16 * 1024)
        })
        .await
    );

    registry.cancel(id).await;
    let again = registry.start(&url, "again.bin");

    assert_eq!(again, id);
    wait_for_status(&registry, id, DownloadStatus::Succeeded).await;
    assert_eq!(server.ranges(), vec![None, None]);
    let record = registry.get(id).unwrap();
    assert_eq!(record.downloaded_bytes, content.len() as u64);
    assert_eq!(record.filename, "again.bin");
    assert_eq!(std::fs::read(&file).unwrap(), content);
}

#[tokio::test]
async fn test_urls_sharing_a_file_name_get_separate_files() {
    let content = patterned_body(64 * 1024);
    let Some(server) = RawServer::start(content.clone(), trickle()).await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    let registry = registry(&dir);

    let first = registry.start(&server.url("/get?id=1"), "get.bin");
    let second = registry.start(&server.url("/get?id=2"), "get.bin");

    assert_ne!(first, second);
    wait_for_status(&registry, first, DownloadStatus::Succeeded).await;
    wait_for_status(&registry, second, DownloadStatus::Succeeded).await;

    assert_eq!(registry.get(first).unwrap().filename, "get.bin");
    assert_eq!(registry.get(second).unwrap().filename, "get_1.bin");
    assert_eq!(server.ranges(), vec![None, None]);
    assert_eq!(std::fs::read(dir.path().join("get.bin")).unwrap(), content);
    assert_eq!(std::fs::read(dir.path().join("get_1.bin")).unwrap(), content);
}

#[tokio::test]
async fn test_running_transfer_reports_speed_and_falling_eta() {
    let content = patterned_body(3 * 1024 * 1024);
    let Some(server) = RawServer::start(
        content,
        BodyMode::Trickle {
            chunk: 16 * 1024,
            delay: Duration::from_millis(20),
        },
    )
    .await
    else {
        return;
    };
    let dir = TempDir::new().unwrap();
    let registry = registry(&dir);
    let mut rx = registry.subscribe();

    let id = registry.start(&server.url("/big.bin"), "big.bin");

    let mut etas: Vec<i64> = Vec::new();
    let finished = tokio::time::timeout(WAIT, async {
        loop {
            if rx.changed().await.is_err() {
                return;
            }
            let Some(record) = rx.borrow_and_update().iter().find(|r| r.id == id).cloned() else {
                continue;
            };
            match record.status {
                DownloadStatus::Running if record.speed > 0 => {
                    assert!(record.eta >= 0, "eta must be known once speed is: {record:?}");
                    if etas.last() != Some(&record.eta) {
                        etas.push(record.eta);
                    }
                }
                DownloadStatus::Succeeded | DownloadStatus::Failed => return,
                _ => {}
            }
        }
    })
    .await;

    assert!(finished.is_ok(), "transfer did not finish in time");
    assert_eq!(registry.get(id).unwrap().status, DownloadStatus::Succeeded);
    assert!(etas.len() >= 2, "expected several speed refreshes, got {etas:?}");
    assert!(etas.last() < etas.first(), "eta should fall over time: {etas:?}");
}

#[tokio::test]
async fn test_resume_right_after_pause_still_completes() {
    let content = patterned_body(128 * 1024);
    let Some(server) = RawServer::start(content.clone(), trickle()).await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    let registry = registry(&dir);

    let id = registry.start(&server.url("/flip.bin"), "flip.bin");
    assert!(
        poll_until(WAIT, || {
            registry.get(id).is_some_and(|r| r.downloaded_bytes >= 16 * 1024)
        })
        .await
    );

    registry.pause(id);
    registry.resume(id);

    wait_for_status(&registry, id, DownloadStatus::Succeeded).await;
    assert_eq!(std::fs::read(dir.path().join("flip.bin")).unwrap(), content);
    let ranges = server.ranges();
    assert_eq!(ranges.first(), Some(&None));
    assert!(ranges.len() <= 2, "at most one resumed request: {ranges:?}");
}

#[tokio::test]
async fn test_same_url_keeps_one_identity() {
    let content = patterned_body(64 * 1024);
    let Some(server) = RawServer::start(content, trickle()).await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    let registry = registry(&dir);
    let url = server.url("/once.bin");

    let first = registry.start(&url, "once.bin");
    let second = registry.start(&url, "once.bin");

    assert_eq!(first, second);
    assert_eq!(first, DownloadId::from_url(&url));
    assert_eq!(registry.records().len(), 1);
    wait_for_status(&registry, first, DownloadStatus::Succeeded).await;
    assert_eq!(server.ranges().len(), 1);
}

#[tokio::test]
async fn test_shutdown_pauses_running_transfers() {
    let content = patterned_body(256 * 1024);
    let Some(server) = RawServer::start(content, trickle()).await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    let registry = registry(&dir);

    let id = registry.start(&server.url("/long.bin"), "long.bin");
    assert!(
        poll_until(WAIT, || registry.get(id).is_some_and(|r| r.downloaded_bytes > 0)).await
    );

    tokio::time::timeout(WAIT, registry.shutdown()).await.unwrap();

    let record = registry.get(id).unwrap();
    assert_eq!(record.status, DownloadStatus::Paused);
    assert_eq!(
        std::fs::metadata(dir.path().join("long.bin")).unwrap().len(),
        record.downloaded_bytes
    );
}
