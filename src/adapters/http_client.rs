use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, header};
use eyre::{Result, WrapErr};

use crate::ports::http_client::{
    ForwardRequest, ForwardResponse, HttpClient, HttpClientError, HttpClientResult,
};

/// Ceiling on how long a forwarded request may take end to end.
const FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

/// Headers that must not travel across the proxy hop.
const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

/// HTTP client adapter backed by a pooled `reqwest` client (rustls).
///
/// Responsibilities:
/// * Forwards routed requests, copying method, path+query, headers and body
/// * Strips hop-by-hop headers in both directions
/// * Performs GET health probes bounded by a per-request timeout
///
/// Retries and circuit breaking are deliberately absent; the balancer core
/// treats every transport failure as a failed outcome and moves on.
pub struct HttpClientAdapter {
    client: reqwest::Client,
}

impl HttpClientAdapter {
    /// Create a new HTTP client adapter with connection pooling.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .wrap_err("Failed to build reqwest client")?;
        Ok(Self { client })
    }

    /// Copy headers, dropping the hop-by-hop set and anything the client
    /// library computes itself.
    fn filter_headers(headers: &HeaderMap) -> HeaderMap {
        let mut filtered = HeaderMap::new();
        for (name, value) in headers {
            let lowered = name.as_str().to_ascii_lowercase();
            if HOP_BY_HOP_HEADERS.contains(&lowered.as_str()) || lowered == "content-length" {
                continue;
            }
            filtered.append(name.clone(), value.clone());
        }
        filtered
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn forward(
        &self,
        target: &str,
        request: ForwardRequest,
    ) -> HttpClientResult<ForwardResponse> {
        let url = format!("{}{}", target, request.path_and_query);

        let mut headers = Self::filter_headers(&request.headers);
        if !headers.contains_key(header::USER_AGENT) {
            headers.insert(header::USER_AGENT, HeaderValue::from_static("Rudder-LB/0.1"));
        }

        let response = self
            .client
            .request(request.method, &url)
            .headers(headers)
            .body(request.body)
            .timeout(FORWARD_TIMEOUT)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    HttpClientError::Timeout(FORWARD_TIMEOUT)
                } else if err.is_builder() || err.is_request() {
                    HttpClientError::InvalidRequest(err.to_string())
                } else {
                    HttpClientError::Connection(err.to_string())
                }
            })?;

        let status = response.status();
        let headers = Self::filter_headers(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|err| HttpClientError::Connection(err.to_string()))?;

        Ok(ForwardResponse {
            status,
            headers,
            body,
        })
    }

    async fn health_check(&self, url: &str, timeout: Duration) -> HttpClientResult<bool> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    HttpClientError::Timeout(timeout)
                } else {
                    HttpClientError::Connection(err.to_string())
                }
            })?;

        Ok(response.status().is_success())
    }
}
