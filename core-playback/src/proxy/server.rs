//! # Cache Proxy Server
//!
//! Local HTTP endpoint the player reads from. Each request is served from the
//! cache where possible; missing gaps are fetched from the origin exactly
//! once, stored, and streamed to the player as they arrive.
//!
//! Gaps are fetched in bounded windows, each by a task of its own. A window
//! fetch keeps going when the request that started it stops reading, and it
//! ends when its session is superseded. In-flight windows are tracked per
//! session, so a new session never waits on an old one's fetch.

use crate::cache::CacheStore;
use crate::error::{PlaybackError, Result};
use crate::proxy::coalesce::{Claim, FetchGuard, FetchProgress, FetchRegistry, FetchWaiter};
use crate::proxy::origin::OriginClient;
use crate::proxy::range::{content_range, parse_range_header, RangeRequest};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bridge_traits::http::HttpClient;
use bytes::Bytes;
use core_runtime::events::{CoreEvent, EventBus, ProxyEvent};
use core_runtime::logging::redact_url;
use futures::{Stream, StreamExt, TryStreamExt};
use parking_lot::RwLock;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
/// How long `shutdown` lets open connections drain before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Network settings of the proxy.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub host: IpAddr,
    /// `0` binds an ephemeral port.
    pub port: u16,
    /// Timeout for length-discovery requests.
    pub probe_timeout: Duration,
    /// Most bytes one origin request asks for.
    pub fetch_window_bytes: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            probe_timeout: Duration::from_secs(10),
            fetch_window_bytes: 1024 * 1024,
        }
    }
}

/// The currently proxied resource.
#[derive(Debug, Clone)]
pub struct ProxySession {
    id: Uuid,
    origin_url: String,
    cache_key: String,
    local_url: String,
    connections: Arc<AtomicUsize>,
    closed: CancellationToken,
}

impl ProxySession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn origin_url(&self) -> &str {
        &self.origin_url
    }

    /// Key of the resource in the cache store.
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    /// URL the player should open.
    pub fn local_url(&self) -> &str {
        &self.local_url
    }

    /// Requests currently being served for this session.
    pub fn active_connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        !self.closed.is_cancelled()
    }
}

/// Counts a request against its session for as long as it is served.
struct ConnectionGuard(Arc<AtomicUsize>);

impl ConnectionGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Cache key for an origin URL: surrounding whitespace and any fragment are
/// not part of the resource identity.
pub fn cache_key(url: &str) -> String {
    let url = url.trim();
    match url.split_once('#') {
        Some((resource, _)) => resource.to_string(),
        None => url.to_string(),
    }
}

struct ProxyState {
    store: Arc<CacheStore>,
    origin: OriginClient,
    registry: Arc<FetchRegistry>,
    session: RwLock<Option<ProxySession>>,
    event_bus: Option<Arc<EventBus>>,
    base_url: String,
    fetch_window_bytes: u64,
}

impl ProxyState {
    fn session(&self, id: &str) -> Option<ProxySession> {
        let session = self.session.read();
        session
            .as_ref()
            .filter(|s| s.is_active() && s.id.to_string() == id)
            .cloned()
    }

    fn emit(&self, event: ProxyEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Proxy(event));
        }
    }

    fn report_fetch_failure(&self, session: &ProxySession, gap: &Range<u64>, error: &PlaybackError) {
        warn!(
            session_id = %session.id,
            range_start = gap.start,
            range_end = gap.end,
            error = %error,
            "Origin fetch failed"
        );
        self.emit(ProxyEvent::OriginFetchFailed {
            session_id: session.id.to_string(),
            range_start: gap.start,
            range_end: gap.end,
            message: error.to_string(),
        });
    }

    /// Total length of the session's resource, probing the origin once when
    /// the store does not know it yet.
    async fn resolve_length(&self, session: &ProxySession) -> Result<Option<u64>> {
        if let Some(total) = self.store.total_length(&session.cache_key) {
            return Ok(Some(total));
        }

        let info = self.origin.probe(&session.origin_url).await?;
        if let Some(total) = info.total_length {
            self.store
                .set_total_length(&session.cache_key, total, info.content_type)
                .await;
        }
        Ok(info.total_length)
    }
}

/// Local HTTP server fronting the cache store.
pub struct CacheProxyServer {
    state: Arc<ProxyState>,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl CacheProxyServer {
    /// Bind the listener and start serving in the background.
    #[instrument(skip(store, http, event_bus))]
    pub async fn bind(
        config: ProxyConfig,
        store: Arc<CacheStore>,
        http: Arc<dyn HttpClient>,
        event_bus: Option<Arc<EventBus>>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::new(config.host, config.port))
            .await
            .map_err(|e| PlaybackError::Io(format!("Failed to bind cache proxy: {}", e)))?;
        let local_addr = listener.local_addr()?;

        let state = Arc::new(ProxyState {
            store,
            origin: OriginClient::new(http, config.probe_timeout),
            registry: Arc::new(FetchRegistry::new()),
            session: RwLock::new(None),
            event_bus,
            base_url: format!("http://{}", local_addr),
            fetch_window_bytes: config.fetch_window_bytes.max(1),
        });

        let app = Self::create_router(state.clone());
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();

        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
            {
                error!("Cache proxy server error: {}", e);
            }
        });

        info!(%local_addr, "Cache proxy listening");

        Ok(Self {
            state,
            local_addr,
            shutdown,
            task: parking_lot::Mutex::new(Some(task)),
        })
    }

    fn create_router(state: Arc<ProxyState>) -> Router {
        Router::new()
            .route(
                "/stream/:session_id",
                get(Self::serve_stream).head(Self::serve_stream_head),
            )
            .with_state(state)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.state.store
    }

    /// Start proxying `origin_url`, superseding the previous session. Once
    /// this returns, requests for the old session are refused and its
    /// in-flight responses stop.
    pub fn start_session(&self, origin_url: &str) -> ProxySession {
        let id = Uuid::new_v4();
        let session = ProxySession {
            id,
            origin_url: origin_url.trim().to_string(),
            cache_key: cache_key(origin_url),
            local_url: format!("{}/stream/{}", self.state.base_url, id),
            connections: Arc::new(AtomicUsize::new(0)),
            closed: CancellationToken::new(),
        };

        let previous = self.state.session.write().replace(session.clone());
        if let Some(previous) = previous {
            self.close(previous);
        }

        info!(
            session_id = %id,
            origin = %redact_url(origin_url),
            local_url = %session.local_url,
            "Proxy session started"
        );
        self.state.emit(ProxyEvent::SessionStarted {
            session_id: id.to_string(),
            local_url: session.local_url.clone(),
        });

        session
    }

    /// Stop serving the current session without starting another.
    pub fn end_session(&self) {
        let previous = self.state.session.write().take();
        if let Some(previous) = previous {
            self.close(previous);
        }
    }

    pub fn current_session(&self) -> Option<ProxySession> {
        self.state.session.read().clone()
    }

    fn close(&self, session: ProxySession) {
        session.closed.cancel();
        debug!(
            session_id = %session.id,
            connections = session.active_connections(),
            "Proxy session superseded"
        );
        self.state.emit(ProxyEvent::SessionSuperseded {
            session_id: session.id.to_string(),
        });
    }

    /// Stop accepting connections and wait for the server task. Connections
    /// still open after a grace period are dropped.
    pub async fn shutdown(&self) {
        self.end_session();
        self.shutdown.cancel();
        let task = self.task.lock().take();
        if let Some(mut task) = task {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Cache proxy task ended abnormally: {}", e),
                Err(_) => {
                    warn!("Cache proxy connections did not drain, aborting");
                    task.abort();
                }
            }
        }
        info!("Cache proxy stopped");
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    async fn serve_stream(
        Path(session_id): Path<String>,
        State(state): State<Arc<ProxyState>>,
        headers: HeaderMap,
    ) -> Response {
        let Some(session) = state.session(&session_id) else {
            debug!(session_id, "Request for inactive session");
            return StatusCode::GONE.into_response();
        };
        let connection = ConnectionGuard::new(&session.connections);

        let total_length = match state.resolve_length(&session).await {
            Ok(total) => total,
            Err(e) => {
                state.report_fetch_failure(&session, &(0..0), &e);
                return error_response(&e);
            }
        };

        let range_header = headers.get(header::RANGE).and_then(|v| v.to_str().ok());

        let Some(total_length) = total_length else {
            return serve_passthrough(state, session, range_header, connection).await;
        };

        let (status, range) = match range_header.map(|h| parse_range_header(h, total_length)) {
            Some(RangeRequest::Partial(range)) => (StatusCode::PARTIAL_CONTENT, range),
            Some(RangeRequest::Unsatisfiable) => {
                return Response::builder()
                    .status(StatusCode::RANGE_NOT_SATISFIABLE)
                    .header(header::CONTENT_RANGE, format!("bytes */{}", total_length))
                    .body(Body::empty())
                    .unwrap_or_else(|_| StatusCode::RANGE_NOT_SATISFIABLE.into_response());
            }
            Some(RangeRequest::Full) | None => (StatusCode::OK, 0..total_length),
        };

        debug!(
            session_id = %session.id,
            range_start = range.start,
            range_end = range.end,
            "Serving range"
        );

        let content_type = state
            .store
            .content_type(&session.cache_key)
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        let mut builder = Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::CONTENT_LENGTH, (range.end - range.start).to_string());
        if status == StatusCode::PARTIAL_CONTENT {
            builder = builder.header(header::CONTENT_RANGE, content_range(&range, total_length));
        }

        if range.start >= range.end {
            return builder
                .body(Body::empty())
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
        }

        let mut body = Box::pin(cached_body(state.clone(), session, range, connection));

        // Fail the whole request while nothing has been sent yet.
        let first = match body.next().await {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => return error_response(&e),
            None => Bytes::new(),
        };
        let body = futures::stream::once(async move { Ok::<_, PlaybackError>(first) }).chain(body);

        builder
            .body(Body::from_stream(body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }

    async fn serve_stream_head(
        Path(session_id): Path<String>,
        State(state): State<Arc<ProxyState>>,
    ) -> Response {
        let Some(session) = state.session(&session_id) else {
            return StatusCode::GONE.into_response();
        };
        let _connection = ConnectionGuard::new(&session.connections);

        match state.resolve_length(&session).await {
            Ok(Some(total_length)) => {
                let content_type = state
                    .store
                    .content_type(&session.cache_key)
                    .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
                Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, content_type)
                    .header(header::ACCEPT_RANGES, "bytes")
                    .header(header::CONTENT_LENGTH, total_length.to_string())
                    .body(Body::empty())
                    .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
            }
            Ok(None) => StatusCode::OK.into_response(),
            Err(e) => error_response(&e),
        }
    }
}

fn error_response(error: &PlaybackError) -> Response {
    let status = match error {
        PlaybackError::Transport(_) => StatusCode::BAD_GATEWAY,
        PlaybackError::SessionClosed => StatusCode::GONE,
        PlaybackError::InvalidRange(_) => StatusCode::RANGE_NOT_SATISFIABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, error.to_string()).into_response()
}

/// Proxy the request straight through when the resource length is unknown.
async fn serve_passthrough(
    state: Arc<ProxyState>,
    session: ProxySession,
    range_header: Option<&str>,
    connection: ConnectionGuard,
) -> Response {
    warn!(session_id = %session.id, "Resource length unknown, serving uncached");
    state.emit(ProxyEvent::PassthroughFallback {
        session_id: session.id.to_string(),
        reason: "unknown resource length".to_string(),
    });

    let response = match state
        .origin
        .passthrough(&session.origin_url, range_header)
        .await
    {
        Ok(response) => response,
        Err(e) => {
            state.report_fetch_failure(&session, &(0..0), &e);
            return error_response(&e);
        }
    };

    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);
    let mut builder = Response::builder().status(status);
    for name in ["content-type", "content-length", "content-range", "accept-ranges"] {
        if let Some(value) = response.header(name) {
            builder = builder.header(name, value);
        }
    }

    let closed = session.closed.clone();
    let mut upstream = Box::pin(
        response
            .body
            .map_err(PlaybackError::transport)
            .take_until(async move { closed.cancelled().await }),
    );
    let body = async_stream::stream! {
        let _connection = connection;
        while let Some(item) = upstream.next().await {
            yield item;
        }
    };

    builder
        .body(Body::from_stream(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Registry scope of a session's fetches for its resource.
fn fetch_scope(session: &ProxySession) -> String {
    format!("{}/{}", session.id, session.cache_key)
}

/// Bytes of `range`, from the store where present and from the origin for
/// each gap. Gap fetches are coalesced with other requests of the same
/// session.
fn cached_body(
    state: Arc<ProxyState>,
    session: ProxySession,
    range: Range<u64>,
    connection: ConnectionGuard,
) -> impl Stream<Item = Result<Bytes>> + Send + 'static {
    async_stream::stream! {
        let _connection = connection;
        let key = session.cache_key.clone();
        let scope = fetch_scope(&session);
        let chunk_size = state.store.config().read_chunk_size as u64;
        let mut cursor = range.start;
        let mut waiter: Option<FetchWaiter> = None;

        while cursor < range.end {
            if !session.is_active() {
                yield Err(PlaybackError::SessionClosed);
                return;
            }

            let covered = state.store.lookup(&key, cursor..range.end);

            // Cached bytes at the cursor.
            if let Some(run) = covered.first().filter(|r| r.start == cursor).cloned() {
                let lease = state.store.lease(&key);
                let mut read_failed = false;
                while cursor < run.end && session.is_active() {
                    let piece = cursor..(cursor + chunk_size).min(run.end);
                    let read = match &lease {
                        Some(lease) => lease.read(piece.clone()).await,
                        None => Err(PlaybackError::Io("cache entry evicted".to_string())),
                    };
                    match read {
                        Ok(bytes) => {
                            cursor = piece.end;
                            yield Ok(bytes);
                        }
                        Err(e) => {
                            warn!(key = %redact_url(&key), error = %e, "Cache read failed, fetching uncached");
                            read_failed = true;
                            break;
                        }
                    }
                }
                drop(lease);

                if read_failed {
                    let gap = cursor..run.end;
                    let mut body = match state.origin.fetch_gap(&session.origin_url, gap.clone()).await {
                        Ok(body) => body,
                        Err(e) => {
                            state.report_fetch_failure(&session, &gap, &e);
                            yield Err(e);
                            return;
                        }
                    };
                    loop {
                        let item = tokio::select! {
                            _ = session.closed.cancelled() => Some(Err(PlaybackError::SessionClosed)),
                            item = body.next() => item,
                        };
                        match item {
                            Some(Ok(bytes)) => {
                                cursor += bytes.len() as u64;
                                yield Ok(bytes);
                            }
                            Some(Err(PlaybackError::SessionClosed)) => {
                                yield Err(PlaybackError::SessionClosed);
                                return;
                            }
                            Some(Err(e)) => {
                                state.report_fetch_failure(&session, &gap, &e);
                                yield Err(e);
                                return;
                            }
                            None => break,
                        }
                    }
                    if cursor < gap.end {
                        yield Err(PlaybackError::Transport("origin closed the connection early".to_string()));
                        return;
                    }
                }
                continue;
            }

            let gap_end = covered.first().map(|r| r.start).unwrap_or(range.end);
            let window = cursor..gap_end.min(cursor.saturating_add(state.fetch_window_bytes));

            // Another request of this session is fetching an overlapping
            // window: wait for its progress.
            if let Some(current) = waiter.as_mut() {
                let overlaps = current.range().start < window.end && window.start < current.range().end;
                if overlaps {
                    let progress = tokio::select! {
                        _ = session.closed.cancelled() => None,
                        progress = current.next() => Some(progress),
                    };
                    match progress {
                        None => {
                            yield Err(PlaybackError::SessionClosed);
                            return;
                        }
                        Some(FetchProgress::Running { .. }) => {}
                        Some(FetchProgress::Done) => waiter = None,
                        Some(FetchProgress::Failed(message)) => {
                            yield Err(PlaybackError::Transport(message));
                            return;
                        }
                    }
                    continue;
                }
                waiter = None;
            }

            let guard = match state.registry.claim(&scope, window.clone()) {
                Claim::Wait(next) => {
                    waiter = Some(next);
                    continue;
                }
                Claim::Owner(guard) => guard,
            };

            let mut fetched = spawn_window_fetch(state.clone(), session.clone(), guard);
            loop {
                let item = tokio::select! {
                    _ = session.closed.cancelled() => Some(Err(PlaybackError::SessionClosed)),
                    item = fetched.recv() => item,
                };
                match item {
                    Some(Ok(chunk)) => {
                        cursor += chunk.len() as u64;
                        yield Ok(chunk);
                    }
                    Some(Err(e)) => {
                        yield Err(e);
                        return;
                    }
                    None => break,
                }
            }

            if cursor < window.end {
                yield Err(PlaybackError::Transport(format!(
                    "origin fetch of bytes {}-{} ended early",
                    window.start, window.end
                )));
                return;
            }
        }
    }
}

/// Fetch the window `guard` owns in a task of its own.
///
/// The task admits bytes to the store and reports progress to waiters
/// whether or not anyone drains the returned channel, which holds at most one
/// window of bytes. It stops when its session closes.
fn spawn_window_fetch(
    state: Arc<ProxyState>,
    session: ProxySession,
    guard: FetchGuard,
) -> mpsc::UnboundedReceiver<Result<Bytes>> {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let window = guard.range().clone();
        let outcome = tokio::select! {
            _ = session.closed.cancelled() => Err(PlaybackError::SessionClosed),
            outcome = fetch_window(&state, &session, &guard, &tx) => outcome,
        };

        match outcome {
            Ok(()) => drop(guard),
            Err(PlaybackError::SessionClosed) => {
                debug!(
                    session_id = %session.id,
                    range_start = window.start,
                    range_end = window.end,
                    "Window fetch cancelled"
                );
                guard.fail("proxy session closed");
            }
            Err(e) => {
                state.report_fetch_failure(&session, &window, &e);
                guard.fail(e.to_string());
                let _ = tx.send(Err(e));
            }
        }
    });

    rx
}

async fn fetch_window(
    state: &ProxyState,
    session: &ProxySession,
    guard: &FetchGuard,
    tx: &mpsc::UnboundedSender<Result<Bytes>>,
) -> Result<()> {
    let window = guard.range().clone();
    let mut body = state
        .origin
        .fetch_gap(&session.origin_url, window.clone())
        .await?;

    let mut cursor = window.start;
    let mut caching = true;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        let len = chunk.len() as u64;

        if caching {
            match state.store.admit(&session.cache_key, cursor, chunk.clone()).await {
                Ok(_) => guard.stored_to(cursor + len),
                Err(e) => {
                    warn!(
                        session_id = %session.id,
                        error = %e,
                        "Caching failed, continuing uncached"
                    );
                    state.emit(ProxyEvent::PassthroughFallback {
                        session_id: session.id.to_string(),
                        reason: e.to_string(),
                    });
                    caching = false;
                }
            }
        }

        cursor += len;
        // The requester may be gone; the window still fills the cache.
        let _ = tx.send(Ok(chunk));
    }

    if cursor < window.end {
        return Err(PlaybackError::Transport(format!(
            "origin closed after {} of {} bytes",
            cursor - window.start,
            window.end - window.start
        )));
    }
    Ok(())
}
