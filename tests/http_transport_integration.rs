//! End-to-end transfers through the reqwest transport against a mock server.

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use download_manager::{
    DownloadRequest, HttpTransport, SessionConfig, SessionCoordinator, StartOutcome,
};
use support::socket_guard::start_mock_server_or_skip;
use tempfile::TempDir;
use tokio::sync::oneshot;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

const WAIT: Duration = Duration::from_secs(10);

fn coordinator_for(root: &TempDir) -> (SessionCoordinator, HttpTransport) {
    let config = SessionConfig::with_caches_root(root.path());
    let transport = HttpTransport::new(&config).expect("transport should build");
    (
        SessionCoordinator::new(config, transport.clone()),
        transport,
    )
}

/// Starts `request` and waits for its completion result.
async fn run(coordinator: &SessionCoordinator, request: DownloadRequest) -> bool {
    let (tx, rx) = oneshot::channel();
    let outcome = coordinator.start(request.on_completion(move |success| {
        let _ = tx.send(success);
    }));
    assert_eq!(outcome, StartOutcome::Started);
    tokio::time::timeout(WAIT, rx)
        .await
        .expect("completion should fire before timeout")
        .expect("completion sender dropped")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_http_download_lands_under_caches_root() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let body = vec![7u8; 64 * 1024];
    Mock::given(method("GET"))
        .and(path("/files/a.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let root = TempDir::new().unwrap();
    let (coordinator, transport) = coordinator_for(&root);
    let source = Url::parse(&format!("{}/files/a.bin", server.uri())).unwrap();

    let fractions = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&fractions);
    let ok = run(
        &coordinator,
        DownloadRequest::new(source.clone(), "files")
            .on_progress(move |fraction| sink.lock().unwrap().push(fraction)),
    )
    .await;

    assert!(ok, "download should succeed");
    let placed = root.path().join("files").join("a.bin");
    assert_eq!(std::fs::read(&placed).unwrap(), body);
    assert!(!coordinator.is_active(&source));

    let fractions = fractions.lock().unwrap();
    assert!(!fractions.is_empty(), "progress should be reported");
    assert!(
        fractions.windows(2).all(|pair| pair[0] <= pair[1]),
        "progress must not decrease: {fractions:?}"
    );
    assert!((fractions.last().copied().unwrap() - 1.0).abs() < f64::EPSILON);

    let leftovers = std::fs::read_dir(transport.temp_dir()).unwrap().count();
    assert_eq!(leftovers, 0, "temp dir should be empty after finalization");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_http_404_reports_failure_and_places_nothing() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/missing.bin"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;

    let root = TempDir::new().unwrap();
    let (coordinator, transport) = coordinator_for(&root);
    let source = Url::parse(&format!("{}/missing.bin", server.uri())).unwrap();

    let ok = run(&coordinator, DownloadRequest::new(source, "files")).await;

    assert!(!ok, "404 must fail the transfer");
    assert!(!root.path().join("files").join("missing.bin").exists());
    let leftovers = std::fs::read_dir(transport.temp_dir()).unwrap().count();
    assert_eq!(leftovers, 0, "failed body must be discarded");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_http_connection_refused_reports_failure() {
    let root = TempDir::new().unwrap();
    let (coordinator, _transport) = coordinator_for(&root);
    let source = Url::parse("http://127.0.0.1:9/never.bin").unwrap();

    let ok = run(&coordinator, DownloadRequest::new(source.clone(), "files")).await;

    assert!(!ok);
    assert!(!coordinator.is_active(&source));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_http_background_download_drains_queue() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/bg.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"background".to_vec()))
        .mount(&server)
        .await;

    let root = TempDir::new().unwrap();
    let (coordinator, transport) = coordinator_for(&root);
    let drained = Arc::new(AtomicUsize::new(0));
    let (drained_tx, drained_rx) = oneshot::channel();
    let counter = Arc::clone(&drained);
    coordinator.set_background_completion_handler(
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = drained_tx.send(());
        },
        None,
    );

    let source = Url::parse(&format!("{}/bg.bin", server.uri())).unwrap();
    let ok = run(
        &coordinator,
        DownloadRequest::new(source, "bg").background(true),
    )
    .await;
    assert!(ok);

    tokio::time::timeout(WAIT, drained_rx)
        .await
        .expect("drain should be reported")
        .unwrap();
    assert_eq!(drained.load(Ordering::SeqCst), 1);
    assert_eq!(transport.background_outstanding(), 0);
    assert!(root.path().join("bg").join("bg.bin").is_file());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_http_cancel_all_stops_slow_transfer() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/slow.bin"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"slow".to_vec())
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let root = TempDir::new().unwrap();
    let (coordinator, _transport) = coordinator_for(&root);
    let source = Url::parse(&format!("{}/slow.bin", server.uri())).unwrap();

    let (tx, rx) = oneshot::channel();
    coordinator.start(
        DownloadRequest::new(source.clone(), "files").on_completion(move |success| {
            let _ = tx.send(success);
        }),
    );
    assert!(coordinator.is_active(&source));

    assert_eq!(coordinator.cancel_all(), 1);
    let ok = tokio::time::timeout(WAIT, rx).await.unwrap().unwrap();
    assert!(!ok);
    assert!(coordinator.active_urls().is_empty());
    assert!(!root.path().join("files").join("slow.bin").exists());
}
