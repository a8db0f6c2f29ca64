use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Bytes,
    http::{HeaderMap, Method, StatusCode},
};
use thiserror::Error;

/// Custom error type for outbound HTTP operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Error when connection to a backend fails
    #[error("connection error: {0}")]
    Connection(String),

    /// Error when a request exceeds its deadline
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Error when the request could not be constructed
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type alias for outbound HTTP operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// A request ready to be forwarded to a backend server.
#[derive(Debug)]
pub struct ForwardRequest {
    pub method: Method,
    /// Path plus query string, e.g. `/api/items?page=2`
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// The backend's answer to a forwarded request.
#[derive(Debug)]
pub struct ForwardResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// HttpClient defines the port (interface) for talking to backend servers.
///
/// Both concerns the balancer has with the outside world go through it:
/// forwarding routed requests and probing health endpoints. Probes carry
/// their own deadline; expiry is reported as [`HttpClientError::Timeout`].
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Forward a request to `target`, returning the backend's response.
    async fn forward(
        &self,
        target: &str,
        request: ForwardRequest,
    ) -> HttpClientResult<ForwardResponse>;

    /// Probe `url`, resolving to true when the backend answers with a
    /// success status within `timeout`.
    async fn health_check(&self, url: &str, timeout: Duration) -> HttpClientResult<bool>;
}
