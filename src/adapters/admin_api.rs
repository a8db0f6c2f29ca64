//! Administrative HTTP surface.
//!
//! Everything a dashboard or CLI needs lives under `/admin`: pool state,
//! metrics, client distribution, algorithm control, server management,
//! reset, analysis and a Server-Sent-Events feed of routing activity.
//! Responses are JSON; CORS is open so external dashboards can poll.
use std::{convert::Infallible, sync::Arc};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures_util::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::{StreamExt, wrappers::{BroadcastStream, errors::BroadcastStreamRecvError}};
use tower_http::cors::{Any, CorsLayer};

use crate::core::{BalancerError, BalancerService, strategy::Algorithm};

/// Build the `/admin` router.
pub fn admin_router(service: Arc<BalancerService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/pool", get(get_pool))
        .route("/metrics", get(get_metrics))
        .route("/clients", get(get_clients))
        .route("/algorithm", get(get_algorithm).post(set_algorithm))
        .route(
            "/servers",
            post(add_server).delete(remove_server).patch(reweight_server),
        )
        .route("/reset", post(reset_metrics))
        .route("/analyze", get(get_analysis))
        .route("/info", get(get_info))
        .route("/events", get(events))
        .layer(cors)
        .with_state(service)
}

#[derive(Debug, Deserialize)]
struct SetAlgorithmRequest {
    algorithm: String,
}

#[derive(Debug, Deserialize)]
struct AddServerRequest {
    url: String,
    weight: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RemoveServerRequest {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ReweightServerRequest {
    url: String,
    weight: u32,
}

async fn get_pool(State(service): State<Arc<BalancerService>>) -> Response {
    Json(service.pool().snapshots()).into_response()
}

async fn get_metrics(State(service): State<Arc<BalancerService>>) -> Response {
    Json(service.metrics_snapshot()).into_response()
}

async fn get_clients(State(service): State<Arc<BalancerService>>) -> Response {
    Json(service.client_distribution()).into_response()
}

async fn get_algorithm(State(service): State<Arc<BalancerService>>) -> Response {
    Json(service.algorithm_info()).into_response()
}

async fn set_algorithm(
    State(service): State<Arc<BalancerService>>,
    Json(request): Json<SetAlgorithmRequest>,
) -> Response {
    match service.set_algorithm(&request.algorithm) {
        Ok(algorithm) => Json(json!({
            "message": format!("Algorithm changed to {algorithm}"),
            "algorithm": algorithm,
        }))
        .into_response(),
        Err(err) => error_response(err),
    }
}

async fn add_server(
    State(service): State<Arc<BalancerService>>,
    Json(request): Json<AddServerRequest>,
) -> Response {
    let weight = request.weight.unwrap_or(1);
    match service.add_server(&request.url, weight) {
        Ok(created) => {
            let status = if created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            (
                status,
                Json(json!({
                    "message": format!("Server {} added with weight {weight}", request.url),
                    "server": request.url,
                })),
            )
                .into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn remove_server(
    State(service): State<Arc<BalancerService>>,
    Json(request): Json<RemoveServerRequest>,
) -> Response {
    match service.remove_server(&request.url) {
        Ok(()) => Json(json!({
            "message": format!("Server {} removed", request.url),
            "server": request.url,
        }))
        .into_response(),
        Err(err) => error_response(err),
    }
}

async fn reweight_server(
    State(service): State<Arc<BalancerService>>,
    Json(request): Json<ReweightServerRequest>,
) -> Response {
    match service.set_server_weight(&request.url, request.weight) {
        Ok(old_weight) => Json(json!({
            "message": format!("Server {} weight updated to {}", request.url, request.weight),
            "server": request.url,
            "old_weight": old_weight,
            "new_weight": request.weight,
        }))
        .into_response(),
        Err(err) => error_response(err),
    }
}

async fn reset_metrics(State(service): State<Arc<BalancerService>>) -> Response {
    service.reset_metrics();
    Json(json!({ "message": "Metrics reset" })).into_response()
}

async fn get_analysis(State(service): State<Arc<BalancerService>>) -> Response {
    Json(service.analyze()).into_response()
}

async fn get_info(State(service): State<Arc<BalancerService>>) -> Response {
    let config = service.config();
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "listen_addr": config.listen_addr,
        "algorithm": service.algorithm(),
        "health_check_interval_secs": config.health_check.interval_secs,
        "available_algorithms": Algorithm::ALL.iter().map(|a| a.as_str()).collect::<Vec<_>>(),
    }))
    .into_response()
}

/// Live feed of routed/completed events. Best-effort: a subscriber that
/// falls behind skips the events it lost instead of slowing routing down.
async fn events(
    State(service): State<Arc<BalancerService>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = service.subscribe_events();

    let hello = tokio_stream::once(Ok(Event::default()
        .data(json!({"type": "connected", "message": "event stream established"}).to_string())));

    let feed = BroadcastStream::new(receiver).filter_map(|event| match event {
        Ok(event) => serde_json::to_string(&event)
            .ok()
            .map(|data| Ok(Event::default().data(data))),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::debug!(skipped, "Event feed subscriber lagged");
            None
        }
    });

    Sse::new(hello.chain(feed)).keep_alive(KeepAlive::default())
}

/// Map a domain error onto its HTTP shape.
fn error_response(err: BalancerError) -> Response {
    let status = match &err {
        BalancerError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        BalancerError::NotFound(_) => StatusCode::NOT_FOUND,
        BalancerError::InvalidAlgorithm { .. } | BalancerError::InvalidConfiguration(_) => {
            StatusCode::BAD_REQUEST
        }
    };

    let body = match &err {
        BalancerError::InvalidAlgorithm { .. } => json!({
            "error": err.to_string(),
            "available_algorithms":
                Algorithm::ALL.iter().map(|a| a.as_str()).collect::<Vec<_>>(),
        }),
        _ => json!({ "error": err.to_string() }),
    };

    (status, Json(body)).into_response()
}
