//! Reverse-proxy entry point.
//!
//! The fallback handler for every non-admin path. Per request it resolves
//! the client identity, asks the balancer for a target, forwards through
//! the HTTP-client port and reports the outcome back exactly once —
//! success meaning the backend answered with a non-server-error status,
//! transport failures always counting as failure. When no server is UP the
//! client is answered directly with 503 and nothing is reported.
use std::{net::SocketAddr, sync::Arc, time::Instant};

use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::json;

use crate::{
    core::{BalancerError, BalancerService},
    ports::http_client::{ForwardRequest, HttpClient},
};

/// Cap on buffered request bodies; larger uploads are rejected with 413.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

const FALLBACK_CLIENT: &str = "0.0.0.0";

#[derive(Clone)]
pub struct ProxyState {
    pub service: Arc<BalancerService>,
    pub http_client: Arc<dyn HttpClient>,
}

impl ProxyState {
    pub fn new(service: Arc<BalancerService>, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            service,
            http_client,
        }
    }
}

pub async fn proxy_handler(State(state): State<ProxyState>, request: Request) -> Response {
    let client = client_identity(&request);
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| path.clone());

    let routed = match state.service.route(&client, method.as_str(), &path) {
        Ok(routed) => routed,
        Err(BalancerError::Unavailable) => {
            tracing::error!(%client, %method, %path, "No available servers");
            return unavailable_response();
        }
        Err(err) => {
            tracing::error!(%err, "Routing failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response();
        }
    };
    let target = routed.target.as_str().to_string();

    let mut headers = request.headers().clone();
    headers.insert("x-load-balancer", HeaderValue::from_static("Rudder-LB"));
    if let Ok(value) = HeaderValue::from_str(routed.algorithm.as_str()) {
        headers.insert("x-lb-algorithm", value);
    }

    let started = Instant::now();
    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(err) => {
            // Already routed, so the outcome must still be reported.
            state
                .service
                .complete(&target, &client, elapsed_ms(started), false);
            tracing::warn!(%err, %client, "Failed to buffer request body");
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(json!({ "error": "request body too large" })),
            )
                .into_response();
        }
    };

    let forward = ForwardRequest {
        method,
        path_and_query,
        headers,
        body,
    };

    match state.http_client.forward(&target, forward).await {
        Ok(backend_response) => {
            let latency_ms = elapsed_ms(started);
            let success = backend_response.status.as_u16() < 500;
            state.service.complete(&target, &client, latency_ms, success);

            let mut response = Response::builder().status(backend_response.status);
            if let Some(response_headers) = response.headers_mut() {
                response_headers.extend(backend_response.headers);
                annotate(response_headers, &target, latency_ms, &routed.algorithm.to_string());
            }
            match response.body(Body::from(backend_response.body)) {
                Ok(response) => response,
                Err(err) => {
                    tracing::error!(%err, "Failed to assemble proxied response");
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            }
        }
        Err(err) => {
            let latency_ms = elapsed_ms(started);
            state.service.complete(&target, &client, latency_ms, false);
            tracing::error!(%err, %target, %client, "Forwarding failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": "Bad Gateway",
                    "message": format!("failed to reach backend server: {err}"),
                    "timestamp": Utc::now().to_rfc3339(),
                })),
            )
                .into_response()
        }
    }
}

/// Resolve a stable client identity: forwarded-for chain first, then the
/// real-ip header, then the peer address.
fn client_identity(request: &Request) -> String {
    let from_header = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    from_header("x-forwarded-for")
        .or_else(|| from_header("x-real-ip"))
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip().to_string())
        })
        .unwrap_or_else(|| FALLBACK_CLIENT.to_string())
}

fn annotate(headers: &mut axum::http::HeaderMap, target: &str, latency_ms: u64, algorithm: &str) {
    if let Ok(value) = HeaderValue::from_str(target) {
        headers.insert("x-served-by", value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("{latency_ms}ms")) {
        headers.insert("x-response-time", value);
    }
    if let Ok(value) = HeaderValue::from_str(algorithm) {
        headers.insert("x-lb-algorithm", value);
    }
}

fn unavailable_response() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "success": false,
            "error": "Service Unavailable",
            "message": "All backend servers are currently unavailable. Please try again later.",
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
        .into_response()
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
