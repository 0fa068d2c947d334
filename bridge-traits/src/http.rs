//! HTTP Client Abstraction
//!
//! Provides async origin requests, either buffered or with a streamed body.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{BridgeError, Result};

/// HTTP method types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
}

/// HTTP request builder
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            timeout: None,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Request the inclusive byte range `start..=end`.
    pub fn byte_range(self, start: u64, end_inclusive: u64) -> Self {
        self.header("Range", format!("bytes={}-{}", start, end_inclusive))
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }
}

/// Case-insensitive header lookup shared by both response types.
fn find_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Parse the total length out of a `Content-Range: bytes a-b/total` value.
///
/// Returns `None` for `*` totals or malformed values.
pub fn content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.trim().rsplit_once('/')?;
    total.trim().parse().ok()
}

/// HTTP response with a fully buffered body
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    /// Get response body as UTF-8 string
    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.to_vec())
            .map_err(|e| BridgeError::OperationFailed(format!("Invalid UTF-8: {}", e)))
    }

    /// Check if response status is successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// `Content-Length` parsed as a number, if present.
    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length")?.trim().parse().ok()
    }
}

/// Streamed response body.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// HTTP response whose body is delivered chunk by chunk as it arrives.
pub struct HttpStreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: ByteStream,
}

impl HttpStreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// True for `206 Partial Content`.
    pub fn is_partial(&self) -> bool {
        self.status == 206
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length")?.trim().parse().ok()
    }

    /// Total resource length, from `Content-Range` on a partial response or
    /// `Content-Length` on a full one.
    pub fn total_length(&self) -> Option<u64> {
        if self.is_partial() {
            self.header("content-range").and_then(content_range_total)
        } else {
            self.content_length()
        }
    }
}

impl std::fmt::Debug for HttpStreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpStreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Async HTTP client trait
///
/// This trait abstracts origin requests to allow platform-specific implementations.
/// Implementations should handle:
/// - TLS certificate validation
/// - Connection pooling and keep-alive
/// - Redirect following
///
/// Implementations must not retry on their own: a failed fetch is reported to
/// the caller immediately so the proxy can fail just that range.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::http::{HttpClient, HttpRequest, HttpMethod};
///
/// async fn first_kilobyte(client: &dyn HttpClient, url: &str) -> Result<u16> {
///     let request = HttpRequest::new(HttpMethod::Get, url).byte_range(0, 1023);
///     let response = client.execute_stream(request).await?;
///     Ok(response.status)
/// }
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Execute an HTTP request and buffer the whole body
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Network connection fails
    /// - TLS validation fails
    /// - Request times out
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// Execute an HTTP request and return as soon as the headers arrive.
    ///
    /// Non-2xx statuses are returned as responses, not errors.
    async fn execute_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse>;
}
