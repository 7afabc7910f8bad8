//! Integration tests for the download engine and the dispatch/ledger flow.
//!
//! Each test stands up an in-process axum server so the engine exercises
//! real HTTP range requests without external prerequisites.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use axum::routing::{get, head};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use fetchkit::config::TransferConfig;
use fetchkit::engine::{DownloadEngine, EngineError, FetchError, ProgressSink};
use fetchkit::handlers::{ProtocolRegistry, TransferStatus};
use fetchkit::ledger::DownloadLedger;
use fetchkit::manager::TransferManager;

/// Deterministic pseudo-random payload.
fn test_content(len: usize) -> Vec<u8> {
    let mut state = 0x2545F491_4F6CDD1Du64;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 56) as u8
        })
        .collect()
}

fn parse_range(headers: &HeaderMap) -> Option<(u64, u64)> {
    let raw = headers.get(header::RANGE)?.to_str().ok()?;
    let (start, end) = raw.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

fn file_response(content: &[u8], headers: &HeaderMap) -> Response {
    let total = content.len() as u64;
    match parse_range(headers) {
        Some((start, end)) if start < total => {
            let end = end.min(total - 1);
            let body = content[start as usize..=end as usize].to_vec();
            Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_LENGTH, body.len())
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {start}-{end}/{total}"),
                )
                .header(header::ACCEPT_RANGES, "bytes")
                .body(Body::from(body))
                .unwrap()
        }
        _ => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, total)
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(Body::from(content.to_vec()))
            .unwrap(),
    }
}

/// Serves the payload with correct Range support.
async fn serve_file(State(content): State<Arc<Vec<u8>>>, headers: HeaderMap) -> Response {
    file_response(&content, &headers)
}

/// Range-serving state that tracks how many requests overlap.
#[derive(Clone)]
struct CountedState {
    content: Arc<Vec<u8>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl CountedState {
    fn new(content: Vec<u8>) -> Self {
        Self {
            content: Arc::new(content),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Serves the payload while recording the peak number of overlapping
/// requests. The sleep widens the overlap window so concurrent
/// transfers are actually observed as concurrent.
async fn serve_file_counted(State(state): State<CountedState>, headers: HeaderMap) -> Response {
    let current = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.peak.fetch_max(current, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(150)).await;
    let response = file_response(&state.content, &headers);
    state.in_flight.fetch_sub(1, Ordering::SeqCst);
    response
}

/// Always fails with a retryable status, counting the attempts.
async fn serve_transient_failure(State(hits): State<Arc<AtomicUsize>>) -> StatusCode {
    hits.fetch_add(1, Ordering::SeqCst);
    StatusCode::INTERNAL_SERVER_ERROR
}

/// Streams the first half of the payload immediately and stalls two
/// seconds before the second half, leaving a wide mid-transfer window.
async fn serve_two_phase(State(content): State<Arc<Vec<u8>>>) -> Response {
    let half = content.len() / 2;
    let first = bytes::Bytes::copy_from_slice(&content[..half]);
    let second = bytes::Bytes::copy_from_slice(&content[half..]);
    let total = content.len();
    let stream = futures::stream::unfold(0u8, move |phase| {
        let first = first.clone();
        let second = second.clone();
        async move {
            match phase {
                0 => Some((Ok::<_, std::convert::Infallible>(first), 1)),
                1 => {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    Some((Ok(second), 2))
                }
                _ => None,
            }
        }
    });
    Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(header::CONTENT_LENGTH, total)
        .body(Body::from_stream(stream))
        .unwrap()
}

/// Serves range responses cut off halfway, with a matching short
/// Content-Length so the stream ends cleanly.
async fn serve_truncated(State(content): State<Arc<Vec<u8>>>, headers: HeaderMap) -> Response {
    let total = content.len() as u64;
    match parse_range(&headers) {
        Some((start, end)) if start < total => {
            let end = end.min(total - 1);
            let full = &content[start as usize..=end as usize];
            let body = full[..full.len() / 2].to_vec();
            Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_LENGTH, body.len())
                .body(Body::from(body))
                .unwrap()
        }
        _ => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, total)
            .header(header::ACCEPT_RANGES, "bytes")
            .body(Body::from(content.as_ref().clone()))
            .unwrap(),
    }
}

async fn head_with_length() -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, 10 * 1024)
        .header(header::ACCEPT_RANGES, "bytes")
        .body(Body::empty())
        .unwrap()
}

async fn get_not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Trickles the body forever; used to test cancellation.
async fn serve_stalling() -> Response {
    let stream = futures::stream::unfold((), |()| async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Some((
            Ok::<_, std::convert::Infallible>(bytes::Bytes::from(vec![0u8; 16])),
            (),
        ))
    })
    .take(100_000);
    Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .body(Body::from_stream(stream))
        .unwrap()
}

async fn start_server(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn test_config() -> TransferConfig {
    TransferConfig {
        max_retries: 1,
        ..TransferConfig::default()
    }
}

#[tokio::test]
async fn test_multi_connection_download_matches_source() {
    let content = test_content(1 << 20);
    let router = Router::new()
        .route("/file.bin", get(serve_file))
        .with_state(Arc::new(content.clone()));
    let addr = start_server(router).await;
    let url = format!("http://{addr}/file.bin");

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("nested/out.bin");
    let engine = DownloadEngine::new(test_config()).unwrap();
    let cancel = CancellationToken::new();

    let sink = ProgressSink::new();
    let record = engine
        .download(&url, &dest, Some(4), &sink, &cancel)
        .await
        .unwrap();
    assert_eq!(record.status, TransferStatus::Completed);
    assert_eq!(record.progress, 100.0);
    assert_eq!(record.file_size, Some(content.len() as u64));
    assert!(record.completed_at.is_some());
    assert!(record.speed.is_some());

    // The sink was bound to the transfer and saw every byte.
    let snapshot = sink.snapshot().unwrap();
    assert_eq!(snapshot.bytes_done, content.len() as u64);
    assert_eq!(snapshot.percent, 100.0);

    let written = tokio::fs::read(&dest).await.unwrap();
    assert_eq!(written, content);

    let digest = hex::encode(Sha256::digest(&content));
    assert!(engine.verify_checksum(&dest, &digest).await.unwrap());

    // Re-running end-to-end with a different fan-out is byte-identical.
    engine
        .download(&url, &dest, Some(7), &ProgressSink::new(), &cancel)
        .await
        .unwrap();
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), content);
}

#[tokio::test]
async fn test_checksum_mismatch_is_reported_not_thrown() {
    let content = test_content(64 * 1024);
    let router = Router::new()
        .route("/file.bin", get(serve_file))
        .with_state(Arc::new(content.clone()));
    let addr = start_server(router).await;
    let url = format!("http://{addr}/file.bin");

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("out.bin");
    let engine = DownloadEngine::new(test_config()).unwrap();
    let cancel = CancellationToken::new();
    engine
        .download(&url, &dest, Some(2), &ProgressSink::new(), &cancel)
        .await
        .unwrap();

    let wrong = hex::encode(Sha256::digest(b"something else"));
    assert!(!engine.verify_checksum(&dest, &wrong).await.unwrap());
}

#[tokio::test]
async fn test_fetch_metadata_reports_headers() {
    let content = test_content(4096);
    let router = Router::new()
        .route("/file.bin", get(serve_file))
        .with_state(Arc::new(content));
    let addr = start_server(router).await;

    let engine = DownloadEngine::new(test_config()).unwrap();
    let metadata = engine
        .fetch_metadata(&format!("http://{addr}/file.bin"))
        .await
        .unwrap();

    assert_eq!(metadata.size, Some(4096));
    assert!(metadata.resume_support);
    assert_eq!(metadata.filename.as_deref(), Some("file.bin"));
}

#[tokio::test]
async fn test_metadata_error_on_probe_failure() {
    let content = test_content(16);
    let router = Router::new()
        .route("/file.bin", get(serve_file))
        .with_state(Arc::new(content));
    let addr = start_server(router).await;

    let engine = DownloadEngine::new(test_config()).unwrap();
    let err = engine
        .fetch_metadata(&format!("http://{addr}/missing.bin"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Metadata(_)));
}

#[tokio::test]
async fn test_fatal_chunk_failure_removes_partial_output() {
    let router = Router::new().route("/gone.bin", head(head_with_length).get(get_not_found));
    let addr = start_server(router).await;
    let url = format!("http://{addr}/gone.bin");

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("gone.bin");
    let engine = DownloadEngine::new(test_config()).unwrap();
    let cancel = CancellationToken::new();

    let err = engine
        .download(&url, &dest, Some(3), &ProgressSink::new(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::ChunkFetch(FetchError::Permanent(_))
    ));
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_truncated_range_response_fails_and_cleans_up() {
    let content = test_content(64 * 1024);
    let router = Router::new()
        .route("/trunc.bin", get(serve_truncated))
        .with_state(Arc::new(content));
    let addr = start_server(router).await;
    let url = format!("http://{addr}/trunc.bin");

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("trunc.bin");
    let config = TransferConfig {
        max_retries: 0,
        ..TransferConfig::default()
    };
    let engine = DownloadEngine::new(config).unwrap();
    let cancel = CancellationToken::new();

    let err = engine
        .download(&url, &dest, Some(4), &ProgressSink::new(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::ChunkFetch(FetchError::Transient(_))
    ));
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_cancellation_propagates_and_cleans_up() {
    let router = Router::new().route("/slow.bin", head(head_with_length).get(serve_stalling));
    let addr = start_server(router).await;
    let url = format!("http://{addr}/slow.bin");

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("slow.bin");
    let engine = DownloadEngine::new(test_config()).unwrap();
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });

    let err = engine
        .download(&url, &dest, Some(2), &ProgressSink::new(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ChunkFetch(FetchError::Cancelled)));
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_manager_flow_persists_terminal_record() {
    let content = test_content(128 * 1024);
    let router = Router::new()
        .route("/file.bin", get(serve_file))
        .with_state(Arc::new(content.clone()));
    let addr = start_server(router).await;
    let url = format!("http://{addr}/file.bin");

    let dir = TempDir::new().unwrap();
    let state_dir = TempDir::new().unwrap();
    let config = test_config();
    let engine = Arc::new(DownloadEngine::new(config.clone()).unwrap());
    let registry = Arc::new(ProtocolRegistry::with_defaults(engine));
    let ledger = Arc::new(DownloadLedger::open(state_dir.path()).await.unwrap());
    let manager = TransferManager::new(registry, Arc::clone(&ledger), &config);

    let dest = dir.path().join("file.bin");
    let record = manager.submit(&url, &dest).await.unwrap();
    assert_eq!(record.status, TransferStatus::Completed);
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), content);

    let history = ledger.query_history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, TransferStatus::Completed);
    assert_eq!(history[0].progress, 100.0);
    assert_eq!(history[0].url, url);

    let active = ledger.query_active().await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].status, TransferStatus::Completed);
}

#[tokio::test]
async fn test_manager_records_opaque_handler_failure() {
    let config = test_config();
    let engine = Arc::new(DownloadEngine::new(config.clone()).unwrap());
    let registry = Arc::new(ProtocolRegistry::with_defaults(engine));
    let state_dir = TempDir::new().unwrap();
    let ledger = Arc::new(DownloadLedger::open(state_dir.path()).await.unwrap());
    let manager = TransferManager::new(registry, Arc::clone(&ledger), &config);

    let dir = TempDir::new().unwrap();
    let record = manager
        .submit("magnet:?xt=urn:btih:abc", &dir.path().join("t"))
        .await
        .unwrap();
    assert_eq!(record.status, TransferStatus::Failed);
    assert_eq!(record.protocol, "torrent");
    assert!(record.error.is_some());

    let history = ledger.query_history().await;
    assert_eq!(history[0].status, TransferStatus::Failed);
    assert!(history[0].error.is_some());
}

#[tokio::test]
async fn test_manager_surfaces_no_handler() {
    let config = test_config();
    let engine = Arc::new(DownloadEngine::new(config.clone()).unwrap());
    let registry = Arc::new(ProtocolRegistry::with_defaults(engine));
    let state_dir = TempDir::new().unwrap();
    let ledger = Arc::new(DownloadLedger::open(state_dir.path()).await.unwrap());
    let manager = TransferManager::new(registry, Arc::clone(&ledger), &config);

    let dir = TempDir::new().unwrap();
    let result = manager
        .submit("gopher://example.com/file.bin", &dir.path().join("f"))
        .await;
    assert!(result.is_err());
    // No partial state is created for an unroutable URL.
    assert!(ledger.query_history().await.is_empty());
}

#[tokio::test]
async fn test_download_all_bounds_concurrency_and_keeps_order() {
    let content = test_content(32 * 1024);
    let state = CountedState::new(content.clone());
    let router = Router::new()
        .route("/{name}", get(serve_file_counted))
        .with_state(state.clone());
    let addr = start_server(router).await;

    // One connection per file makes requests map one-to-one to
    // transfers, so the server-side peak is the transfer concurrency.
    let config = TransferConfig {
        max_concurrent_downloads: 2,
        max_connections_per_file: 1,
        ..test_config()
    };
    let engine = Arc::new(DownloadEngine::new(config.clone()).unwrap());
    let registry = Arc::new(ProtocolRegistry::with_defaults(engine));
    let state_dir = TempDir::new().unwrap();
    let ledger = Arc::new(DownloadLedger::open(state_dir.path()).await.unwrap());
    let manager = TransferManager::new(registry, ledger, &config);

    let dir = TempDir::new().unwrap();
    let urls: Vec<String> = (0..4)
        .map(|i| format!("http://{addr}/part-{i}.bin"))
        .collect();
    let results = manager.download_all(urls.clone(), dir.path()).await;

    assert_eq!(results.len(), 4);
    for (i, result) in results.iter().enumerate() {
        let record = result.as_ref().unwrap();
        assert_eq!(record.url, urls[i]);
        assert_eq!(record.status, TransferStatus::Completed);
    }
    for i in 0..4 {
        let written = tokio::fs::read(dir.path().join(format!("part-{i}.bin")))
            .await
            .unwrap();
        assert_eq!(written, content);
    }
    assert!(state.peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_transient_failures_retry_exactly_max_retries_times() {
    let hits = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route("/flaky.bin", head(head_with_length).get(serve_transient_failure))
        .with_state(Arc::clone(&hits));
    let addr = start_server(router).await;

    let config = TransferConfig {
        max_retries: 1,
        ..TransferConfig::default()
    };
    let engine = DownloadEngine::new(config).unwrap();
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("flaky.bin");

    let err = engine
        .download(
            &format!("http://{addr}/flaky.bin"),
            &dest,
            Some(1),
            &ProgressSink::new(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::ChunkFetch(FetchError::Transient(_))
    ));
    // One initial attempt plus max_retries retries.
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_manager_reports_in_flight_progress() {
    let content = test_content(10 * 1024);
    let router = Router::new()
        .route("/phased.bin", head(head_with_length).get(serve_two_phase))
        .with_state(Arc::new(content.clone()));
    let addr = start_server(router).await;
    let url = format!("http://{addr}/phased.bin");

    let config = TransferConfig {
        max_connections_per_file: 1,
        ..test_config()
    };
    let engine = Arc::new(DownloadEngine::new(config.clone()).unwrap());
    let registry = Arc::new(ProtocolRegistry::with_defaults(engine));
    let state_dir = TempDir::new().unwrap();
    let ledger = Arc::new(DownloadLedger::open(state_dir.path()).await.unwrap());
    let manager = TransferManager::new(registry, Arc::clone(&ledger), &config);

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("phased.bin");
    let task = tokio::spawn({
        let manager = manager.clone();
        let url = url.clone();
        let dest = dest.clone();
        async move { manager.submit(&url, &dest).await }
    });

    // The first half lands immediately and the second stalls for two
    // seconds, while the ledger is fed every 250ms.
    tokio::time::sleep(Duration::from_millis(1000)).await;
    let active = ledger.query_active().await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].status, TransferStatus::Downloading);
    assert!(active[0].progress > 0.0 && active[0].progress < 100.0);
    assert!(active[0].speed.is_some());

    let record = task.await.unwrap().unwrap();
    assert_eq!(record.status, TransferStatus::Completed);
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), content);
}
