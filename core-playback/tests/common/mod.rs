//! In-process origin server and store fixtures shared by the integration tests.

#![allow(dead_code)]

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bridge_desktop::{ReqwestHttpClient, TokioFileSystem};
use bridge_traits::time::SystemClock;
use bytes::Bytes;
use core_playback::cache::{CacheConfig, CacheStore};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Observable origin serving one in-memory resource at `/media.mp3`.
pub struct Origin {
    pub addr: SocketAddr,
    pub data: Bytes,
    pub range_gets: Arc<Mutex<Vec<String>>>,
    pub heads: Arc<AtomicUsize>,
}

#[derive(Clone)]
struct OriginState {
    data: Bytes,
    chunk_delay: Duration,
    range_gets: Arc<Mutex<Vec<String>>>,
    heads: Arc<AtomicUsize>,
}

impl Origin {
    pub fn url(&self) -> String {
        format!("http://{}/media.mp3", self.addr)
    }

    pub fn broken_url(&self) -> String {
        format!("http://{}/broken.mp3", self.addr)
    }

    pub fn range_get_count(&self) -> usize {
        self.range_gets.lock().len()
    }
}

/// Resource bytes: a repeating, position-dependent pattern.
pub fn media_bytes(len: usize) -> Bytes {
    Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>())
}

pub async fn start_origin(len: usize, chunk_delay: Duration) -> Origin {
    let state = OriginState {
        data: media_bytes(len),
        chunk_delay,
        range_gets: Arc::new(Mutex::new(Vec::new())),
        heads: Arc::new(AtomicUsize::new(0)),
    };

    let app = Router::new()
        .route("/media.mp3", get(serve_media).head(head_media))
        .route(
            "/broken.mp3",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR })
                .head(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        )
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Origin {
        addr,
        data: state.data,
        range_gets: state.range_gets,
        heads: state.heads,
    }
}

async fn head_media(State(state): State<OriginState>) -> Response {
    state.heads.fetch_add(1, Ordering::SeqCst);
    Response::builder()
        .header(header::CONTENT_LENGTH, state.data.len().to_string())
        .header(header::CONTENT_TYPE, "audio/mpeg")
        .header(header::ACCEPT_RANGES, "bytes")
        .body(Body::empty())
        .unwrap()
}

async fn serve_media(State(state): State<OriginState>, headers: HeaderMap) -> Response {
    let total = state.data.len() as u64;
    let Some(range) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) else {
        return (StatusCode::OK, state.data.clone()).into_response();
    };
    state.range_gets.lock().push(range.to_string());

    let (start, end) = range
        .strip_prefix("bytes=")
        .and_then(|r| r.split_once('-'))
        .map(|(a, b)| {
            let start: u64 = a.parse().unwrap();
            let end: u64 = if b.is_empty() { total - 1 } else { b.parse().unwrap() };
            (start, end.min(total - 1))
        })
        .unwrap();

    let slice = state.data.slice(start as usize..=end as usize);
    let delay = state.chunk_delay;
    let body = async_stream::stream! {
        for chunk in slice.chunks(4096) {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            yield Ok::<_, std::io::Error>(Bytes::copy_from_slice(chunk));
        }
    };

    Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(header::CONTENT_TYPE, "audio/mpeg")
        .header(header::CONTENT_LENGTH, (end - start + 1).to_string())
        .header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", start, end, total),
        )
        .body(Body::from_stream(body))
        .unwrap()
}

/// HTTP client that ignores system proxy settings.
pub fn local_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

pub fn origin_http() -> Arc<ReqwestHttpClient> {
    Arc::new(ReqwestHttpClient::with_client(local_client()))
}

pub async fn open_store(dir: &TempDir, config: CacheConfig) -> Arc<CacheStore> {
    let fs = Arc::new(TokioFileSystem::with_cache_directory(dir.path().to_path_buf()));
    Arc::new(
        CacheStore::open(
            config,
            dir.path().join("audio-cache"),
            fs,
            Arc::new(SystemClock),
        )
        .await
        .unwrap(),
    )
}
