//! Cache proxy tests against an in-process origin server.

mod common;

use common::{local_client, open_store, origin_http, start_origin};
use core_playback::cache::CacheConfig;
use core_playback::proxy::{CacheProxyServer, ProxyConfig, ProxySession};
use core_runtime::events::{CoreEvent, EventBus, ProxyEvent};
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

async fn proxy_for(dir: &TempDir, config: CacheConfig) -> CacheProxyServer {
    let store = open_store(dir, config).await;
    CacheProxyServer::bind(ProxyConfig::default(), store, origin_http(), None)
        .await
        .unwrap()
}

/// Sends a plain GET for the whole resource and never reads the response.
async fn stalled_reader(proxy: &CacheProxyServer, session: &ProxySession) -> TcpStream {
    let mut stream = TcpStream::connect(proxy.local_addr()).await.unwrap();
    let request = format!(
        "GET /stream/{} HTTP/1.1\r\nHost: {}\r\n\r\n",
        session.id(),
        proxy.local_addr()
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    stream
}

async fn wait_for_origin_gets(origin: &common::Origin, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while origin.range_get_count() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("origin was never asked for bytes");
}

#[tokio::test]
async fn test_full_request_then_served_from_cache() {
    let origin = start_origin(100_000, Duration::ZERO).await;
    let dir = TempDir::new().unwrap();
    let proxy = proxy_for(&dir, CacheConfig::default()).await;
    let session = proxy.start_session(&origin.url());
    let client = local_client();

    let response = client.get(session.local_url()).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[CONTENT_LENGTH].to_str().unwrap(),
        "100000"
    );
    let body = response.bytes().await.unwrap();
    assert_eq!(body, origin.data);
    assert_eq!(origin.range_get_count(), 1);

    let body = client
        .get(session.local_url())
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(body, origin.data);
    assert_eq!(origin.range_get_count(), 1, "second read must not hit the origin");
    assert_eq!(proxy.store().size_in_bytes(), 100_000);

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_partial_request_fetches_only_missing_bytes() {
    let origin = start_origin(50_000, Duration::ZERO).await;
    let dir = TempDir::new().unwrap();
    let proxy = proxy_for(&dir, CacheConfig::default()).await;
    let session = proxy.start_session(&origin.url());
    let client = local_client();

    let response = client
        .get(session.local_url())
        .header(RANGE, "bytes=10000-19999")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers()[CONTENT_RANGE].to_str().unwrap(),
        "bytes 10000-19999/50000"
    );
    let body = response.bytes().await.unwrap();
    assert_eq!(body, origin.data.slice(10_000..20_000));

    // Overlapping request: only the uncovered tail goes to the origin.
    let body = client
        .get(session.local_url())
        .header(RANGE, "bytes=15000-29999")
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(body, origin.data.slice(15_000..30_000));

    let fetched = origin.range_gets.lock().clone();
    assert_eq!(fetched, vec!["bytes=10000-19999", "bytes=20000-29999"]);

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_requests_share_one_origin_fetch() {
    let origin = start_origin(64 * 1024, Duration::from_millis(5)).await;
    let dir = TempDir::new().unwrap();
    let proxy = proxy_for(&dir, CacheConfig::default()).await;
    let session = proxy.start_session(&origin.url());
    let client = local_client();

    let first = client.get(session.local_url()).send();
    let second = client.get(session.local_url()).send();
    let (first, second) = tokio::join!(first, second);
    let (first, second) = tokio::join!(first.unwrap().bytes(), second.unwrap().bytes());

    assert_eq!(first.unwrap(), origin.data);
    assert_eq!(second.unwrap(), origin.data);
    assert_eq!(origin.range_get_count(), 1);

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_range_past_end_is_unsatisfiable() {
    let origin = start_origin(4_000, Duration::ZERO).await;
    let dir = TempDir::new().unwrap();
    let proxy = proxy_for(&dir, CacheConfig::default()).await;
    let session = proxy.start_session(&origin.url());

    let response = local_client()
        .get(session.local_url())
        .header(RANGE, "bytes=5000-")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(
        response.headers()[CONTENT_RANGE].to_str().unwrap(),
        "bytes */4000"
    );
    assert_eq!(origin.range_get_count(), 0);

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_superseded_session_is_gone() {
    let origin = start_origin(8_000, Duration::ZERO).await;
    let dir = TempDir::new().unwrap();
    let bus = Arc::new(EventBus::new(16));
    let mut events = bus.subscribe();
    let store = open_store(&dir, CacheConfig::default()).await;
    let proxy = CacheProxyServer::bind(ProxyConfig::default(), store, origin_http(), Some(bus))
        .await
        .unwrap();

    let old = proxy.start_session(&origin.url());
    let new = proxy.start_session(&origin.url());
    assert!(!old.is_active());
    assert!(new.is_active());

    let client = local_client();
    let response = client.get(old.local_url()).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::GONE);
    let response = client.get(new.local_url()).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut superseded = false;
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Proxy(ProxyEvent::SessionSuperseded { session_id }) = event {
            assert_eq!(session_id, old.id().to_string());
            superseded = true;
        }
    }
    assert!(superseded);

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_origin_failure_fails_only_that_request() {
    let origin = start_origin(8_000, Duration::ZERO).await;
    let dir = TempDir::new().unwrap();
    let proxy = proxy_for(&dir, CacheConfig::default()).await;
    let client = local_client();

    let broken = proxy.start_session(&origin.broken_url());
    let response = client.get(broken.local_url()).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    // The server keeps working for the next session.
    let session = proxy.start_session(&origin.url());
    let body = client
        .get(session.local_url())
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(body, origin.data);

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_oversized_resource_is_still_served() {
    let origin = start_origin(40_000, Duration::ZERO).await;
    let dir = TempDir::new().unwrap();
    let proxy = proxy_for(&dir, CacheConfig::default().with_max_size_bytes(1_000)).await;
    let session = proxy.start_session(&origin.url());
    let client = local_client();

    let body = client
        .get(session.local_url())
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(body, origin.data);
    assert!(proxy.store().size_in_bytes() <= 1_000);

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_head_reports_length() {
    let origin = start_origin(12_345, Duration::ZERO).await;
    let dir = TempDir::new().unwrap();
    let proxy = proxy_for(&dir, CacheConfig::default()).await;
    let session = proxy.start_session(&origin.url());

    let response = local_client().head(session.local_url()).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_LENGTH].to_str().unwrap(), "12345");
    assert_eq!(origin.heads.load(std::sync::atomic::Ordering::SeqCst), 1);

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_long_gap_is_fetched_in_windows() {
    let origin = start_origin(50_000, Duration::ZERO).await;
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, CacheConfig::default()).await;
    let config = ProxyConfig {
        fetch_window_bytes: 16 * 1024,
        ..ProxyConfig::default()
    };
    let proxy = CacheProxyServer::bind(config, store, origin_http(), None)
        .await
        .unwrap();
    let session = proxy.start_session(&origin.url());

    let body = local_client()
        .get(session.local_url())
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(body, origin.data);

    let fetched = origin.range_gets.lock().clone();
    assert_eq!(
        fetched,
        vec![
            "bytes=0-16383",
            "bytes=16384-32767",
            "bytes=32768-49151",
            "bytes=49152-49999",
        ]
    );
    assert_eq!(proxy.store().size_in_bytes(), 50_000);

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_in_flight_response_stops_when_session_is_superseded() {
    let origin = start_origin(400_000, Duration::from_millis(5)).await;
    let dir = TempDir::new().unwrap();
    let proxy = proxy_for(&dir, CacheConfig::default()).await;
    let old = proxy.start_session(&origin.url());

    let mut response = local_client().get(old.local_url()).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let mut received = response.chunk().await.unwrap().unwrap().len();

    proxy.start_session(&origin.url());

    let ended_with_error = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => received += chunk.len(),
                Ok(None) => return false,
                Err(_) => return true,
            }
        }
    })
    .await
    .expect("old response kept streaming after the new session started");

    assert!(ended_with_error);
    assert!(received < 400_000, "old session received all {} bytes", received);

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_new_session_is_not_held_up_by_stalled_reader() {
    let origin = start_origin(2 * 1024 * 1024, Duration::from_millis(2)).await;
    let dir = TempDir::new().unwrap();
    let proxy = proxy_for(&dir, CacheConfig::default()).await;

    let old = proxy.start_session(&origin.url());
    let stalled = stalled_reader(&proxy, &old).await;
    wait_for_origin_gets(&origin, 1).await;

    // Same resource, so the same cache key, and a range inside the window
    // the old session was fetching.
    let new = proxy.start_session(&origin.url());
    let response = tokio::time::timeout(
        Duration::from_secs(5),
        local_client()
            .get(new.local_url())
            .header(RANGE, "bytes=500000-500999")
            .send(),
    )
    .await
    .expect("new session request timed out")
    .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);

    let body = tokio::time::timeout(Duration::from_secs(5), response.bytes())
        .await
        .expect("new session body timed out")
        .unwrap();
    assert_eq!(body, origin.data.slice(500_000..501_000));

    drop(stalled);
    proxy.shutdown().await;
}

#[tokio::test]
async fn test_tail_request_is_not_held_up_by_stalled_reader() {
    let len = 6 * 1024 * 1024;
    let origin = start_origin(len, Duration::from_millis(1)).await;
    let dir = TempDir::new().unwrap();
    let proxy = proxy_for(&dir, CacheConfig::default()).await;
    let session = proxy.start_session(&origin.url());

    let stalled = stalled_reader(&proxy, &session).await;
    wait_for_origin_gets(&origin, 1).await;

    let tail = format!("bytes={}-{}", len - 1_000, len - 1);
    let body = tokio::time::timeout(Duration::from_secs(5), async {
        local_client()
            .get(session.local_url())
            .header(RANGE, tail.as_str())
            .send()
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap()
    })
    .await
    .expect("tail request timed out behind the stalled reader");
    assert_eq!(body, origin.data.slice(len - 1_000..len));
    assert!(origin.range_gets.lock().contains(&tail));

    drop(stalled);
    proxy.shutdown().await;
}
