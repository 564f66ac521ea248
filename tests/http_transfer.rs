//! End-to-end HTTP transfer tests against a local mock server.
//!
//! Exercises the real HTTP adapter through the public engine API: metadata
//! probing, single- and multi-segment transfers, checkpoint resume, and
//! failure reporting.

use multi_dl::{Config, MultiDownloader, Status, TaskOptions};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Serves a byte body with HTTP range support, recording every Range
/// header it sees.
struct RangeResponder {
    body: Vec<u8>,
    seen_ranges: Arc<Mutex<Vec<String>>>,
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match range.as_deref().and_then(parse_range) {
            Some((start, end)) => {
                self.seen_ranges
                    .lock()
                    .unwrap()
                    .push(range.unwrap_or_default());
                let end = end
                    .unwrap_or(self.body.len() as u64 - 1)
                    .min(self.body.len() as u64 - 1);
                let slice = self.body[start as usize..=end as usize].to_vec();
                ResponseTemplate::new(206)
                    .insert_header(
                        "content-range",
                        format!("bytes {start}-{end}/{}", self.body.len()).as_str(),
                    )
                    .set_body_bytes(slice)
            }
            None => ResponseTemplate::new(200).set_body_bytes(self.body.clone()),
        }
    }
}

/// Parse "bytes=a-b" / "bytes=a-" into (start, Option<end>).
fn parse_range(value: &str) -> Option<(u64, Option<u64>)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start = start.parse().ok()?;
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse().ok()?)
    };
    Some((start, end))
}

fn test_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Mount HEAD + ranged GET mocks for one file path.
async fn mount_file(
    server: &MockServer,
    file_path: &str,
    body: Vec<u8>,
    resumable: bool,
) -> Arc<Mutex<Vec<String>>> {
    let seen_ranges = Arc::new(Mutex::new(Vec::new()));

    // The server strips the body for HEAD but keeps content-length
    let mut head = ResponseTemplate::new(200).set_body_bytes(body.clone());
    if resumable {
        head = head.insert_header("accept-ranges", "bytes");
    }
    Mock::given(method("HEAD"))
        .and(path(file_path))
        .respond_with(head)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(file_path))
        .respond_with(RangeResponder {
            body,
            seen_ranges: Arc::clone(&seen_ranges),
        })
        .mount(server)
        .await;

    seen_ranges
}

async fn test_engine(max_segments: usize, segment_min_bytes: u64) -> (MultiDownloader, tempfile::TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.persistence.database_path = temp_dir.path().join("test.db");
    config.download.download_dir = temp_dir.path().join("downloads");
    config.download.segments_per_task = max_segments;
    config.download.segment_min_bytes = segment_min_bytes;
    config.download.progress_interval = Duration::from_millis(50);
    config.retry.max_attempts = 1;
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.jitter = false;

    let engine = MultiDownloader::new(config).await.unwrap();
    (engine, temp_dir)
}

async fn wait_for_status(
    engine: &MultiDownloader,
    id: multi_dl::TaskId,
    wanted: Status,
    timeout: Duration,
) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let record = engine.db.get_task(id).await.unwrap().unwrap();
        if Status::from_i32(record.status) == wanted {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "timed out waiting for {wanted:?}, task is {:?} ({:?})",
                Status::from_i32(record.status),
                record.error_message
            );
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn downloads_a_file_end_to_end() {
    let server = MockServer::start().await;
    let body = test_body(4096);
    mount_file(&server, "/files/a.bin", body.clone(), true).await;

    let (engine, temp) = test_engine(4, 512 * 1024).await;
    let dest = temp.path().join("a.bin");

    let id = engine
        .add(TaskOptions::http(format!("{}/files/a.bin", server.uri()), &dest).unwrap())
        .await
        .unwrap();
    engine.start(id).await.unwrap();

    wait_for_status(&engine, id, Status::Complete, Duration::from_secs(10)).await;

    let record = engine.db.get_task(id).await.unwrap().unwrap();
    assert_eq!(record.total_bytes, 4096);
    assert_eq!(record.completed_bytes, 4096);
    assert!(record.resumable);
    assert!(record.is_complete);

    assert_eq!(std::fs::read(&dest).unwrap(), body);
}

#[tokio::test]
async fn splits_resumable_download_into_segments() {
    let server = MockServer::start().await;
    let body = test_body(2048);
    let seen_ranges = mount_file(&server, "/files/big.bin", body.clone(), true).await;

    let (engine, temp) = test_engine(4, 256).await;
    let dest = temp.path().join("big.bin");

    let id = engine
        .add(TaskOptions::http(format!("{}/files/big.bin", server.uri()), &dest).unwrap())
        .await
        .unwrap();
    engine.start(id).await.unwrap();

    wait_for_status(&engine, id, Status::Complete, Duration::from_secs(10)).await;

    assert_eq!(std::fs::read(&dest).unwrap(), body, "segments must reassemble exactly");

    let ranges = seen_ranges.lock().unwrap().clone();
    assert_eq!(ranges.len(), 4, "four segments expected, saw: {ranges:?}");
    assert!(ranges.iter().any(|r| r == "bytes=0-511"));
    assert!(ranges.iter().any(|r| r == "bytes=1536-2047"));
}

#[tokio::test]
async fn resumes_from_persisted_checkpoint() {
    let server = MockServer::start().await;
    let body = test_body(1000);
    let seen_ranges = mount_file(&server, "/files/resume.bin", body.clone(), true).await;

    let (engine, temp) = test_engine(1, 1).await;
    let dest = temp.path().join("resume.bin");

    let id = engine
        .add(TaskOptions::http(format!("{}/files/resume.bin", server.uri()), &dest).unwrap())
        .await
        .unwrap();

    // Seed the state a stopped task would have left behind: 400 bytes on
    // disk and a flushed checkpoint row
    std::fs::write(&dest, &body[..400]).unwrap();
    engine.db.update_metadata(id, Some(1000), true).await.unwrap();
    engine.db.update_progress(id, 400).await.unwrap();
    engine
        .db
        .replace_segments(
            id,
            &[multi_dl::db::SegmentRecord {
                task_id: id.get(),
                seg_index: 0,
                start_byte: 0,
                end_byte: 999,
                downloaded: 400,
            }],
        )
        .await
        .unwrap();

    engine.resume(id).await.unwrap();
    wait_for_status(&engine, id, Status::Complete, Duration::from_secs(10)).await;

    assert_eq!(std::fs::read(&dest).unwrap(), body);

    let ranges = seen_ranges.lock().unwrap().clone();
    assert_eq!(
        ranges,
        vec!["bytes=400-999".to_string()],
        "transfer must request only the remainder"
    );
}

#[tokio::test]
async fn non_resumable_server_detected_and_downloaded_whole() {
    let server = MockServer::start().await;
    let body = test_body(1500);

    // No Accept-Ranges, and GET ignores Range entirely: the range probe
    // sees 200, so the source is classified non-resumable
    Mock::given(method("HEAD"))
        .and(path("/files/plain.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/plain.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let (engine, temp) = test_engine(4, 1).await;
    let dest = temp.path().join("plain.bin");

    let id = engine
        .add(TaskOptions::http(format!("{}/files/plain.bin", server.uri()), &dest).unwrap())
        .await
        .unwrap();
    engine.start(id).await.unwrap();

    wait_for_status(&engine, id, Status::Complete, Duration::from_secs(10)).await;

    let record = engine.db.get_task(id).await.unwrap().unwrap();
    assert!(!record.resumable, "a server ignoring Range is not resumable");

    assert_eq!(std::fs::read(&dest).unwrap(), body);
}

#[tokio::test]
async fn missing_source_fails_permanently() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/files/missing.bin"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (engine, temp) = test_engine(4, 1).await;
    let mut events = engine.subscribe();
    let dest = temp.path().join("missing.bin");

    let id = engine
        .add(TaskOptions::http(format!("{}/files/missing.bin", server.uri()), &dest).unwrap())
        .await
        .unwrap();
    engine.start(id).await.unwrap();

    wait_for_status(&engine, id, Status::Failed, Duration::from_secs(10)).await;

    let record = engine.db.get_task(id).await.unwrap().unwrap();
    assert!(record.error_message.unwrap().contains("404"));

    let mut saw_terminal_failure = false;
    while let Ok(event) = events.try_recv() {
        if let multi_dl::Event::Failed {
            id: event_id,
            retry_scheduled,
            ..
        } = event
            && event_id == id
            && !retry_scheduled
        {
            saw_terminal_failure = true;
        }
    }
    assert!(saw_terminal_failure, "terminal failure must reach the event sink");
}
