//! HTTP Client Implementation using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, HttpStreamResponse},
};
use futures_util::TryStreamExt;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Reqwest-based HTTP client implementation
///
/// Provides HTTP operations with:
/// - Connection pooling via reqwest
/// - TLS support by default
/// - Streamed bodies for media ranges
///
/// No client-wide request timeout is set: a media range may legitimately take
/// minutes to download. Use [`HttpRequest::timeout`] for short probes.
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    /// Create a new HTTP client with default configuration
    pub fn new() -> Result<Self> {
        Self::with_connect_timeout(Duration::from_secs(10))
    }

    /// Create a new HTTP client with a custom connect timeout
    pub fn with_connect_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .pool_max_idle_per_host(4)
            .user_agent(concat!("audio-streamer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                BridgeError::OperationFailed(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self { client })
    }

    /// Create a new HTTP client with custom configuration
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Convert bridge HttpMethod to reqwest Method
    fn convert_method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Head => reqwest::Method::HEAD,
        }
    }

    /// Build reqwest request from bridge request
    fn build_request(&self, request: HttpRequest) -> reqwest::RequestBuilder {
        let method = Self::convert_method(request.method);
        let mut req = self.client.request(method, &request.url);

        for (key, value) in request.headers {
            req = req.header(key, value);
        }

        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }

        req
    }

    async fn send(&self, request: HttpRequest) -> Result<reqwest::Response> {
        debug!(
            method = ?request.method,
            range = request.headers.get("Range").map(String::as_str),
            "Executing HTTP request"
        );

        self.build_request(request).send().await.map_err(|e| {
            warn!(error = %e, "HTTP request failed");
            Self::map_reqwest_error(e)
        })
    }

    fn map_reqwest_error(e: reqwest::Error) -> BridgeError {
        if e.is_timeout() {
            BridgeError::Network("Request timed out".to_string())
        } else if e.is_connect() {
            BridgeError::Network(format!("Connection failed: {}", e))
        } else {
            BridgeError::Network(e.to_string())
        }
    }

    fn collect_headers(response: &reqwest::Response) -> HashMap<String, String> {
        response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let response = self.send(request).await?;
        let status = response.status().as_u16();
        let headers = Self::collect_headers(&response);

        let body = response.bytes().await.map_err(Self::map_reqwest_error)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn execute_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse> {
        let response = self.send(request).await?;
        let status = response.status().as_u16();
        let headers = Self::collect_headers(&response);

        debug!(status, "Received response headers");

        let body = response
            .bytes_stream()
            .map_err(Self::map_reqwest_error);

        Ok(HttpStreamResponse {
            status,
            headers,
            body: Box::pin(body),
        })
    }
}
