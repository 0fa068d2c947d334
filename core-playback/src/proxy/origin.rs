//! Origin requests: length discovery and single-range gap fetches.

use crate::error::{PlaybackError, Result};
use bridge_traits::http::{ByteStream, HttpClient, HttpMethod, HttpRequest};
use bytes::Bytes;
use core_runtime::logging::redact_url;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// What the origin told us about a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OriginInfo {
    pub total_length: Option<u64>,
    pub content_type: Option<String>,
}

/// Body of a gap fetch, already trimmed to exactly the requested bytes.
pub type GapStream = BoxStream<'static, Result<Bytes>>;

/// Thin wrapper over the injected [`HttpClient`].
#[derive(Clone)]
pub struct OriginClient {
    http: Arc<dyn HttpClient>,
    probe_timeout: Duration,
}

impl OriginClient {
    pub fn new(http: Arc<dyn HttpClient>, probe_timeout: Duration) -> Self {
        Self {
            http,
            probe_timeout,
        }
    }

    /// Discover the total length and content type of `url`.
    ///
    /// Tries `HEAD` first and falls back to a one-byte ranged `GET`, whose
    /// `Content-Range` carries the total.
    #[instrument(skip(self, url), fields(url = %redact_url(url)))]
    pub async fn probe(&self, url: &str) -> Result<OriginInfo> {
        let head = HttpRequest::new(HttpMethod::Head, url).timeout(self.probe_timeout);
        match self.http.execute(head).await {
            Ok(response) if response.is_success() => {
                if let Some(total_length) = response.content_length() {
                    return Ok(OriginInfo {
                        total_length: Some(total_length),
                        content_type: response.header("content-type").map(str::to_string),
                    });
                }
                debug!("HEAD carried no length, probing with a ranged GET");
            }
            Ok(response) => debug!(status = response.status, "HEAD rejected"),
            Err(e) => debug!(error = %e, "HEAD failed"),
        }

        let get = HttpRequest::new(HttpMethod::Get, url)
            .byte_range(0, 0)
            .timeout(self.probe_timeout);
        let response = self
            .http
            .execute_stream(get)
            .await
            .map_err(PlaybackError::transport)?;

        if !response.is_success() {
            return Err(PlaybackError::Transport(format!(
                "origin answered probe with status {}",
                response.status
            )));
        }

        Ok(OriginInfo {
            total_length: response.total_length(),
            content_type: response.header("content-type").map(str::to_string),
        })
    }

    /// Fetch exactly `gap` from the origin with one ranged `GET`.
    ///
    /// A `200` answer to the ranged request is tolerated: the prefix before
    /// `gap.start` is skipped. The stream never yields bytes past `gap.end`.
    #[instrument(skip(self, url), fields(url = %redact_url(url), range_start = gap.start, range_end = gap.end))]
    pub async fn fetch_gap(&self, url: &str, gap: Range<u64>) -> Result<GapStream> {
        if gap.start >= gap.end {
            return Err(PlaybackError::InvalidRange(format!(
                "empty gap {}-{}",
                gap.start, gap.end
            )));
        }

        let request = HttpRequest::new(HttpMethod::Get, url).byte_range(gap.start, gap.end - 1);
        let response = self
            .http
            .execute_stream(request)
            .await
            .map_err(PlaybackError::transport)?;

        if !response.is_success() {
            return Err(PlaybackError::Transport(format!(
                "origin answered range request with status {}",
                response.status
            )));
        }

        let skip = if response.is_partial() { 0 } else { gap.start };
        if skip > 0 {
            debug!(skip, "Origin ignored the range, skipping prefix");
        }

        Ok(trim_body(response.body, skip, gap.end - gap.start))
    }

    /// Stream the resource straight from the origin without caching,
    /// forwarding the player's `Range` header as sent. Returns the status and
    /// headers the origin answered with.
    pub async fn passthrough(
        &self,
        url: &str,
        range_header: Option<&str>,
    ) -> Result<bridge_traits::http::HttpStreamResponse> {
        let mut request = HttpRequest::new(HttpMethod::Get, url);
        if let Some(range) = range_header {
            request = request.header("Range", range);
        }

        let response = self
            .http
            .execute_stream(request)
            .await
            .map_err(PlaybackError::transport)?;

        if !response.is_success() {
            return Err(PlaybackError::Transport(format!(
                "origin answered passthrough with status {}",
                response.status
            )));
        }
        Ok(response)
    }
}

fn trim_body(body: ByteStream, skip: u64, limit: u64) -> GapStream {
    Box::pin(async_stream::try_stream! {
        let mut body = body;
        let mut skip = skip;
        let mut remaining = limit;

        while remaining > 0 {
            let Some(chunk) = body.next().await else {
                break;
            };
            let mut chunk = chunk.map_err(PlaybackError::transport)?;

            if skip > 0 {
                let n = skip.min(chunk.len() as u64);
                chunk = chunk.slice(n as usize..);
                skip -= n;
            }
            if chunk.is_empty() {
                continue;
            }
            if chunk.len() as u64 > remaining {
                chunk.truncate(remaining as usize);
            }
            remaining -= chunk.len() as u64;
            yield chunk;
        }
    })
}
