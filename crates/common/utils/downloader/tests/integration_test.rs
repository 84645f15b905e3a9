// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    path::Path,
    sync::{Arc, Mutex},
};

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use axum_test::TestServer;
use jiff::SignedDuration;
use qbit_base::readable_size::ReadableSize;
use qbit_downloader::{
    DownloadError, DownloadRequest, Downloader, DownloaderConfig, RetryConfig, Strategy,
};
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

const CHUNK: usize = 1024;

/// Canned answer for one request of a given range
#[derive(Debug, Clone, Copy)]
enum Reply {
    Status(StatusCode),
    /// `200` with the whole file, ignoring the range
    FullBody,
    /// `206` one byte short of the range
    ShortBody,
    /// Never answer; signals `AppState::stalled`
    Stall,
}

#[derive(Clone)]
struct AppState {
    content:         Arc<Vec<u8>>,
    accept_ranges:   bool,
    /// Header that must be present, otherwise 403
    required_header: Option<(&'static str, &'static str)>,
    /// Replies used for a given `Range` value before serving it normally
    script:          Arc<Mutex<HashMap<String, VecDeque<Reply>>>>,
    /// `Range` header of every GET, `None` for plain requests
    requests:        Arc<Mutex<Vec<Option<String>>>>,
    stalled:         Arc<Notify>,
}

impl AppState {
    fn new(content: Vec<u8>, accept_ranges: bool) -> Self {
        Self {
            content: Arc::new(content),
            accept_ranges,
            required_header: None,
            script: Arc::default(),
            requests: Arc::default(),
            stalled: Arc::default(),
        }
    }

    fn script(&self, range: &str, statuses: &[StatusCode]) {
        let replies: Vec<_> = statuses.iter().copied().map(Reply::Status).collect();
        self.script_replies(range, &replies);
    }

    fn script_replies(&self, range: &str, replies: &[Reply]) {
        self.script
            .lock()
            .unwrap()
            .insert(range.to_string(), replies.iter().copied().collect());
    }

    fn request_count(&self) -> usize { self.requests.lock().unwrap().len() }

    fn count_for(&self, range: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.as_deref() == Some(range))
            .count()
    }

    /// Ranges requested, excluding the `bytes=0-0` probe
    fn chunk_requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .filter(|r| r.as_str() != "bytes=0-0")
            .cloned()
            .collect()
    }
}

async fn handle_get(headers: HeaderMap, State(state): State<AppState>) -> Response {
    let range_value = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    state.requests.lock().unwrap().push(range_value.clone());

    if let Some((name, value)) = state.required_header
        && headers.get(name).and_then(|v| v.to_str().ok()) != Some(value)
    {
        return StatusCode::FORBIDDEN.into_response();
    }

    let total_len = state.content.len();

    if let Some(range) = range_value.as_deref() {
        let scripted = state
            .script
            .lock()
            .unwrap()
            .get_mut(range)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(Reply::Status(status)) => return status.into_response(),
            Some(Reply::FullBody) => {
                return (StatusCode::OK, Bytes::copy_from_slice(&state.content)).into_response();
            }
            Some(Reply::ShortBody) => {
                let (start, end) = parse_range(range, total_len).unwrap();
                return (
                    StatusCode::PARTIAL_CONTENT,
                    [(
                        header::CONTENT_RANGE,
                        format!("bytes {start}-{end}/{total_len}"),
                    )],
                    Bytes::copy_from_slice(&state.content[start..end]),
                )
                    .into_response();
            }
            Some(Reply::Stall) => {
                state.stalled.notify_one();
                return std::future::pending::<Response>().await;
            }
            None => {}
        }
    }

    let range = range_value
        .as_deref()
        .and_then(|value| parse_range(value, total_len));

    if state.accept_ranges
        && let Some((start, end)) = range
    {
        let slice = &state.content[start..=end];
        let mut response_headers = HeaderMap::new();
        response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        response_headers.insert(
            header::CONTENT_RANGE,
            HeaderValue::from_str(&format!("bytes {start}-{end}/{total_len}")).unwrap(),
        );
        response_headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        return (
            StatusCode::PARTIAL_CONTENT,
            response_headers,
            Bytes::copy_from_slice(slice),
        )
            .into_response();
    }

    (StatusCode::OK, Bytes::copy_from_slice(&state.content)).into_response()
}

fn parse_range(value: &str, total: usize) -> Option<(usize, usize)> {
    let value = value.strip_prefix("bytes=")?;
    let (start_str, end_str) = value.split_once('-')?;
    let start: usize = start_str.parse().ok()?;
    let end: usize = end_str.parse().ok()?;
    if start <= end && end < total {
        Some((start, end))
    } else {
        None
    }
}

fn create_temp_dir(prefix: &str) -> TempDir {
    tempfile::Builder::new()
        .prefix(&format!("downloader-{prefix}-"))
        .tempdir()
        .expect("failed to create temp dir")
}

fn create_test_server(state: AppState) -> TestServer {
    qbit_common_telemetry::init_default_ut_logging();
    let app = Router::new()
        .route("/files/payload.bin", get(handle_get))
        .with_state(state);

    TestServer::builder()
        .http_transport()
        .build(app)
        .expect("failed to create test server")
}

fn get_file_url(server: &TestServer) -> String {
    let base = server
        .server_address()
        .expect("server should have HTTP address")
        .to_string();
    format!("{}/files/payload.bin", base.trim_end_matches('/'))
}

/// Deterministic payload that differs from chunk to chunk
fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| u8::try_from(i % 251).unwrap()).collect()
}

fn test_config(dir: &Path) -> DownloaderConfig {
    DownloaderConfig::builder()
        .save_path(dir)
        .chunk_size(ReadableSize::kb(1))
        .max_workers(2)
        .retry(
            RetryConfig::builder()
                .min_delay(SignedDuration::from_millis(1))
                .max_delay(SignedDuration::from_millis(4))
                .rate_limit_delay(SignedDuration::from_millis(5))
                .rate_limit_max_delay(SignedDuration::from_millis(20))
                .build(),
        )
        .build()
}

fn chunk_range(index: usize, total: usize) -> String {
    let start = index * CHUNK;
    let end = ((index + 1) * CHUNK).min(total) - 1;
    format!("bytes={start}-{end}")
}

/// Chunk entries of the side-car, without the chunk size key
fn read_sidecar(dir: &Path, name: &str) -> BTreeMap<String, bool> {
    let raw = std::fs::read(dir.join(format!("{name}.downloading.metadata"))).unwrap();
    let map: BTreeMap<String, serde_json::Value> = serde_json::from_slice(&raw).unwrap();
    map.into_iter()
        .filter_map(|(key, value)| Some((key, value.as_bool()?)))
        .collect()
}

#[tokio::test]
async fn download_ranged_in_chunks() {
    let content = payload(CHUNK * 3 + 300);
    let state = AppState::new(content.clone(), true);
    let server = create_test_server(state.clone());
    let out = create_temp_dir("ranged");

    let downloader = Downloader::new(test_config(out.path())).unwrap();
    let result = downloader
        .download(&get_file_url(&server), "payload.bin")
        .await
        .unwrap();

    assert_eq!(result.strategy, Strategy::Ranged);
    assert_eq!(result.size, content.len() as u64);
    assert_eq!(result.resumed_chunks, 0);
    assert_eq!(std::fs::read(&result.path).unwrap(), content);

    let mut ranges = state.chunk_requests();
    ranges.sort();
    let mut expected: Vec<_> = (0..4).map(|i| chunk_range(i, content.len())).collect();
    expected.sort();
    assert_eq!(ranges, expected);

    assert!(!out.path().join("payload.bin.downloading").exists());
    assert!(!out.path().join("payload.bin.downloading.metadata").exists());
}

#[tokio::test]
async fn existing_file_is_skipped_without_requests() {
    let state = AppState::new(payload(CHUNK * 2), true);
    let server = create_test_server(state.clone());
    let out = create_temp_dir("skip");
    std::fs::write(out.path().join("payload.bin"), b"already here").unwrap();

    let downloader = Downloader::new(test_config(out.path())).unwrap();
    let result = downloader
        .download(&get_file_url(&server), "payload.bin")
        .await
        .unwrap();

    assert_eq!(result.strategy, Strategy::Skipped);
    assert_eq!(result.size, 12);
    assert_eq!(state.request_count(), 0);
    assert_eq!(
        std::fs::read(out.path().join("payload.bin")).unwrap(),
        b"already here"
    );
}

#[tokio::test]
async fn overwrite_replaces_existing_file() {
    let content = payload(CHUNK * 2);
    let state = AppState::new(content.clone(), true);
    let server = create_test_server(state.clone());
    let out = create_temp_dir("overwrite");
    std::fs::write(out.path().join("payload.bin"), b"stale").unwrap();

    let config = DownloaderConfig {
        overwrite_existing: true,
        ..test_config(out.path())
    };
    let result = Downloader::new(config)
        .unwrap()
        .download(&get_file_url(&server), "payload.bin")
        .await
        .unwrap();

    assert_eq!(result.strategy, Strategy::Ranged);
    assert_eq!(std::fs::read(out.path().join("payload.bin")).unwrap(), content);
}

#[tokio::test]
async fn resume_fetches_only_missing_chunk() {
    let content = payload(CHUNK * 3);
    let state = AppState::new(content.clone(), true);
    let server = create_test_server(state.clone());
    let out = create_temp_dir("resume");

    // First two chunks already on disk, third still zeroed.
    let mut partial = content[..CHUNK * 2].to_vec();
    partial.resize(content.len(), 0);
    std::fs::write(out.path().join("payload.bin.downloading"), &partial).unwrap();
    std::fs::write(
        out.path().join("payload.bin.downloading.metadata"),
        br#"{"0":true,"1":true,"chunk_size":1024}"#,
    )
    .unwrap();

    let result = Downloader::new(test_config(out.path()))
        .unwrap()
        .download(&get_file_url(&server), "payload.bin")
        .await
        .unwrap();

    assert_eq!(result.strategy, Strategy::Ranged);
    assert_eq!(result.resumed_chunks, 2);
    assert_eq!(state.chunk_requests(), vec![chunk_range(2, content.len())]);
    assert_eq!(std::fs::read(out.path().join("payload.bin")).unwrap(), content);
    assert!(!out.path().join("payload.bin.downloading.metadata").exists());
}

#[tokio::test]
async fn rate_limited_chunk_is_retried() {
    let content = payload(CHUNK * 3);
    let state = AppState::new(content.clone(), true);
    let range = chunk_range(1, content.len());
    state.script(&range, &[
        StatusCode::TOO_MANY_REQUESTS,
        StatusCode::TOO_MANY_REQUESTS,
    ]);
    let server = create_test_server(state.clone());
    let out = create_temp_dir("rate-limit");

    let result = Downloader::new(test_config(out.path()))
        .unwrap()
        .download(&get_file_url(&server), "payload.bin")
        .await
        .unwrap();

    assert_eq!(state.count_for(&range), 3);
    assert_eq!(std::fs::read(&result.path).unwrap(), content);
}

#[tokio::test]
async fn server_errors_are_retried() {
    let content = payload(CHUNK * 2);
    let state = AppState::new(content.clone(), true);
    let range = chunk_range(0, content.len());
    state.script(&range, &[
        StatusCode::INTERNAL_SERVER_ERROR,
        StatusCode::BAD_GATEWAY,
    ]);
    let server = create_test_server(state.clone());
    let out = create_temp_dir("server-error");

    let result = Downloader::new(test_config(out.path()))
        .unwrap()
        .download(&get_file_url(&server), "payload.bin")
        .await
        .unwrap();

    assert_eq!(state.count_for(&range), 3);
    assert_eq!(std::fs::read(&result.path).unwrap(), content);
}

#[tokio::test]
async fn client_error_abandons_chunk_and_keeps_artifacts() {
    let content = payload(CHUNK * 3);
    let state = AppState::new(content.clone(), true);
    let range = chunk_range(1, content.len());
    state.script(&range, &[StatusCode::NOT_FOUND]);
    let server = create_test_server(state.clone());
    let out = create_temp_dir("not-found");

    let err = Downloader::new(test_config(out.path()))
        .unwrap()
        .download(&get_file_url(&server), "payload.bin")
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::Incomplete {
        expected:  3,
        completed: 2,
    }));
    assert_eq!(err.missing_chunks(), Some(1));
    assert_eq!(state.count_for(&range), 1);

    assert!(!out.path().join("payload.bin").exists());
    assert!(out.path().join("payload.bin.downloading").exists());
    let sidecar = read_sidecar(out.path(), "payload.bin");
    assert_eq!(sidecar.get("0"), Some(&true));
    assert_eq!(sidecar.get("2"), Some(&true));
    assert!(!sidecar.contains_key("1"));
}

#[tokio::test]
async fn exhausted_retries_leave_chunk_incomplete() {
    let content = payload(CHUNK * 2);
    let state = AppState::new(content.clone(), true);
    let range = chunk_range(1, content.len());
    state.script(&range, &[StatusCode::SERVICE_UNAVAILABLE; 3]);
    let server = create_test_server(state.clone());
    let out = create_temp_dir("exhausted");

    let config = DownloaderConfig {
        max_retries: 3,
        ..test_config(out.path())
    };
    let err = Downloader::new(config)
        .unwrap()
        .download(&get_file_url(&server), "payload.bin")
        .await
        .unwrap_err();

    assert_eq!(err.missing_chunks(), Some(1));
    assert_eq!(state.count_for(&range), 3);

    // The next run picks up the missing chunk only.
    let result = Downloader::new(test_config(out.path()))
        .unwrap()
        .download(&get_file_url(&server), "payload.bin")
        .await
        .unwrap();
    assert_eq!(result.resumed_chunks, 1);
    assert_eq!(state.count_for(&range), 4);
    assert_eq!(std::fs::read(&result.path).unwrap(), content);
}

#[tokio::test]
async fn unranged_source_uses_single_stream() {
    let content = payload(CHUNK * 3 + 17);
    let state = AppState::new(content.clone(), false);
    let server = create_test_server(state.clone());
    let out = create_temp_dir("unranged");

    let result = Downloader::new(test_config(out.path()))
        .unwrap()
        .download(&get_file_url(&server), "payload.bin")
        .await
        .unwrap();

    assert_eq!(result.strategy, Strategy::SingleStream);
    assert_eq!(result.size, content.len() as u64);
    assert_eq!(std::fs::read(&result.path).unwrap(), content);
    // Probe plus one plain GET.
    assert_eq!(state.request_count(), 2);
    assert!(state.chunk_requests().is_empty());
    assert!(!out.path().join("payload.bin.downloading").exists());
    assert!(!out.path().join("payload.bin.downloading.metadata").exists());
}

#[tokio::test]
async fn small_ranged_file_uses_single_stream() {
    let content = payload(CHUNK / 2);
    let state = AppState::new(content.clone(), true);
    let server = create_test_server(state.clone());
    let out = create_temp_dir("small");

    let result = Downloader::new(test_config(out.path()))
        .unwrap()
        .download(&get_file_url(&server), "payload.bin")
        .await
        .unwrap();

    assert_eq!(result.strategy, Strategy::SingleStream);
    assert_eq!(std::fs::read(&result.path).unwrap(), content);
}

#[tokio::test]
async fn single_stream_removes_stale_progress() {
    let content = payload(CHUNK);
    let state = AppState::new(content.clone(), false);
    let server = create_test_server(state.clone());
    let out = create_temp_dir("stale");
    std::fs::write(
        out.path().join("payload.bin.downloading.metadata"),
        br#"{"0":true}"#,
    )
    .unwrap();

    Downloader::new(test_config(out.path()))
        .unwrap()
        .download(&get_file_url(&server), "payload.bin")
        .await
        .unwrap();

    assert_eq!(std::fs::read(out.path().join("payload.bin")).unwrap(), content);
    assert!(!out.path().join("payload.bin.downloading.metadata").exists());
}

#[tokio::test]
async fn single_stream_error_status_fails() {
    let state = AppState {
        required_header: Some(("x-token", "secret")),
        ..AppState::new(payload(CHUNK), false)
    };
    let server = create_test_server(state.clone());
    let out = create_temp_dir("fallback-error");

    let config = DownloaderConfig {
        headers: BTreeMap::from([("x-token".to_string(), "wrong".to_string())]),
        ..test_config(out.path())
    };
    let err = Downloader::new(config)
        .unwrap()
        .download(&get_file_url(&server), "payload.bin")
        .await
        .unwrap_err();

    // A refused probe downgrades to the plain GET, which then fails.
    assert!(matches!(err, DownloadError::Http { status: 403, .. }));
    assert_eq!(state.request_count(), 2);
    assert!(!out.path().join("payload.bin").exists());
    assert!(!out.path().join("payload.bin.downloading").exists());
}

#[tokio::test]
async fn caller_headers_reach_every_request() {
    let content = payload(CHUNK * 2);
    let state = AppState {
        required_header: Some(("x-token", "secret")),
        ..AppState::new(content.clone(), true)
    };
    let server = create_test_server(state.clone());
    let out = create_temp_dir("headers");

    let config = DownloaderConfig {
        headers: BTreeMap::from([("x-token".to_string(), "secret".to_string())]),
        ..test_config(out.path())
    };
    let result = Downloader::new(config)
        .unwrap()
        .download(&get_file_url(&server), "payload.bin")
        .await
        .unwrap();

    assert_eq!(result.strategy, Strategy::Ranged);
    assert_eq!(std::fs::read(&result.path).unwrap(), content);
}

#[tokio::test]
async fn changed_remote_length_discards_progress() {
    let content = payload(CHUNK * 3);
    let state = AppState::new(content.clone(), true);
    let server = create_test_server(state.clone());
    let out = create_temp_dir("mismatch");
    std::fs::write(out.path().join("payload.bin.downloading"), vec![0u8; CHUNK * 2]).unwrap();
    std::fs::write(
        out.path().join("payload.bin.downloading.metadata"),
        br#"{"0":true,"chunk_size":1024}"#,
    )
    .unwrap();

    let downloader = Downloader::new(test_config(out.path())).unwrap();
    let err = downloader
        .download(&get_file_url(&server), "payload.bin")
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::LengthMismatch { .. }));
    assert!(!out.path().join("payload.bin.downloading").exists());
    assert!(!out.path().join("payload.bin.downloading.metadata").exists());
    assert!(state.chunk_requests().is_empty());

    // The next attempt starts from scratch.
    let result = downloader
        .download(&get_file_url(&server), "payload.bin")
        .await
        .unwrap();
    assert_eq!(result.resumed_chunks, 0);
    assert_eq!(std::fs::read(&result.path).unwrap(), content);
}

#[tokio::test]
async fn cancelled_download_returns_cancelled() {
    let state = AppState::new(payload(CHUNK * 3), true);
    let server = create_test_server(state.clone());
    let out = create_temp_dir("cancel");

    let token = CancellationToken::new();
    token.cancel();
    let err = Downloader::new(test_config(out.path()))
        .unwrap()
        .download_with_cancel(&get_file_url(&server), "payload.bin", token)
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::Cancelled));
    assert!(!out.path().join("payload.bin").exists());
}

#[tokio::test]
async fn empty_name_is_taken_from_url() {
    let content = payload(CHUNK * 2);
    let state = AppState::new(content.clone(), true);
    let server = create_test_server(state);
    let out = create_temp_dir("derived-name");

    let request = DownloadRequest::builder()
        .url(format!("{}?token=abc", get_file_url(&server)))
        .build();
    let result = Downloader::new(test_config(out.path()))
        .unwrap()
        .download_request(request, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.path, out.path().join("payload.bin"));
    assert_eq!(std::fs::read(&result.path).unwrap(), content);
}

#[tokio::test]
async fn cleanup_removes_partial_artifacts() {
    let out = create_temp_dir("cleanup");
    std::fs::write(out.path().join("payload.bin.downloading"), b"partial").unwrap();
    std::fs::write(
        out.path().join("payload.bin.downloading.metadata"),
        br#"{"0":true}"#,
    )
    .unwrap();

    let downloader = Downloader::new(test_config(out.path())).unwrap();
    downloader.cleanup("payload.bin").await.unwrap();
    assert!(!out.path().join("payload.bin.downloading").exists());
    assert!(!out.path().join("payload.bin.downloading.metadata").exists());

    // Nothing left to remove is not an error.
    downloader.cleanup("payload.bin").await.unwrap();
}

#[tokio::test]
async fn wrong_body_length_is_retried() {
    let content = payload(CHUNK * 3);
    let state = AppState::new(content.clone(), true);
    let range = chunk_range(1, content.len());
    state.script_replies(&range, &[Reply::FullBody, Reply::ShortBody]);
    let server = create_test_server(state.clone());
    let out = create_temp_dir("body-length");

    let result = Downloader::new(test_config(out.path()))
        .unwrap()
        .download(&get_file_url(&server), "payload.bin")
        .await
        .unwrap();

    assert_eq!(state.count_for(&range), 3);
    assert_eq!(std::fs::read(&result.path).unwrap(), content);
}

#[tokio::test]
async fn wrong_body_length_never_completes_chunk() {
    let content = payload(CHUNK * 3);
    let state = AppState::new(content.clone(), true);
    let range = chunk_range(1, content.len());
    state.script_replies(&range, &[Reply::FullBody; 3]);
    let server = create_test_server(state.clone());
    let out = create_temp_dir("body-length-exhausted");

    let config = DownloaderConfig {
        max_retries: 3,
        ..test_config(out.path())
    };
    let err = Downloader::new(config)
        .unwrap()
        .download(&get_file_url(&server), "payload.bin")
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::Incomplete {
        expected:  3,
        completed: 2,
    }));
    assert_eq!(state.count_for(&range), 3);
    assert!(!out.path().join("payload.bin").exists());
    let sidecar = read_sidecar(out.path(), "payload.bin");
    assert!(!sidecar.contains_key("1"));
}

#[tokio::test]
async fn cancel_during_fetch_keeps_progress() {
    let content = payload(CHUNK * 3);
    let state = AppState::new(content.clone(), true);
    let last = chunk_range(2, content.len());
    state.script_replies(&last, &[Reply::Stall]);
    let server = create_test_server(state.clone());
    let out = create_temp_dir("cancel-fetch");
    let url = get_file_url(&server);

    // One worker, so chunks 0 and 1 are done before chunk 2 is requested.
    let config = DownloaderConfig {
        max_workers: 1,
        ..test_config(out.path())
    };
    let downloader = Downloader::new(config).unwrap();
    let cancel = CancellationToken::new();
    let (result, ()) = tokio::join!(
        downloader.download_with_cancel(&url, "payload.bin", cancel.clone()),
        async {
            state.stalled.notified().await;
            cancel.cancel();
        }
    );

    assert!(matches!(result, Err(DownloadError::Cancelled)));
    assert!(!out.path().join("payload.bin").exists());
    assert!(out.path().join("payload.bin.downloading").exists());
    let sidecar = read_sidecar(out.path(), "payload.bin");
    assert_eq!(sidecar.get("0"), Some(&true));
    assert_eq!(sidecar.get("1"), Some(&true));
    assert!(!sidecar.contains_key("2"));

    let result = downloader.download(&url, "payload.bin").await.unwrap();
    assert_eq!(result.resumed_chunks, 2);
    assert_eq!(state.count_for(&chunk_range(0, content.len())), 1);
    assert_eq!(state.count_for(&chunk_range(1, content.len())), 1);
    assert_eq!(state.count_for(&last), 2);
    assert_eq!(std::fs::read(&result.path).unwrap(), content);
}

#[tokio::test]
async fn changed_chunk_size_refetches_everything() {
    let content = payload(CHUNK * 4);
    let state = AppState::new(content.clone(), true);
    state.script("bytes=0-2047", &[StatusCode::NOT_FOUND]);
    let server = create_test_server(state.clone());
    let out = create_temp_dir("chunk-size");
    let url = get_file_url(&server);

    let config = DownloaderConfig {
        chunk_size: ReadableSize::kb(2),
        ..test_config(out.path())
    };
    let err = Downloader::new(config)
        .unwrap()
        .download(&url, "payload.bin")
        .await
        .unwrap_err();
    assert_eq!(err.missing_chunks(), Some(1));
    assert_eq!(read_sidecar(out.path(), "payload.bin").get("1"), Some(&true));

    // Index 1 of the 2KiB layout is not index 1 of the 1KiB layout.
    let result = Downloader::new(test_config(out.path()))
        .unwrap()
        .download(&url, "payload.bin")
        .await
        .unwrap();
    assert_eq!(result.resumed_chunks, 0);
    assert_eq!(std::fs::read(&result.path).unwrap(), content);
    for index in 0..4 {
        assert_eq!(state.count_for(&chunk_range(index, content.len())), 1);
    }
    assert!(!out.path().join("payload.bin.downloading.metadata").exists());
}

#[tokio::test]
async fn unremovable_stale_progress_does_not_fail_single_stream() {
    let content = payload(CHUNK);
    let state = AppState::new(content.clone(), false);
    let server = create_test_server(state);
    let out = create_temp_dir("stale-dir");
    // A directory where the side-car should be cannot be removed as a file.
    std::fs::create_dir(out.path().join("payload.bin.downloading.metadata")).unwrap();

    let result = Downloader::new(test_config(out.path()))
        .unwrap()
        .download(&get_file_url(&server), "payload.bin")
        .await
        .unwrap();

    assert_eq!(result.strategy, Strategy::SingleStream);
    assert_eq!(std::fs::read(&result.path).unwrap(), content);
}
