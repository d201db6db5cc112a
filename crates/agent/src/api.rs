//! HTTP API for health checks, Prometheus metrics and read-only queries

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use forecast_lib::{ComponentStatus, ForecastService, HealthRegistry};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Readings returned when `n` is not given
pub const DEFAULT_READINGS_LIMIT: usize = 100;

/// Upper bound on `n` for `/api/readings`
pub const MAX_READINGS_LIMIT: usize = 10_000;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: Arc<HealthRegistry>,
    pub service: ForecastService,
}

impl AppState {
    pub fn new(health_registry: Arc<HealthRegistry>, service: ForecastService) -> Self {
        Self {
            health_registry,
            service,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn query_failed(e: anyhow::Error) -> Response {
    warn!(error = %e, "Query failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: e.to_string(),
        }),
    )
        .into_response()
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still serving the last good artifact
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return query_failed(e.into());
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct ReadingsQuery {
    pub n: Option<usize>,
}

async fn readings(State(state): State<Arc<AppState>>, Query(query): Query<ReadingsQuery>) -> Response {
    let n = query
        .n
        .unwrap_or(DEFAULT_READINGS_LIMIT)
        .min(MAX_READINGS_LIMIT);
    match state.service.latest_readings(n) {
        Ok(readings) => Json(readings).into_response(),
        Err(e) => query_failed(e),
    }
}

async fn latest_predictions(State(state): State<Arc<AppState>>) -> Response {
    match state.service.latest_predictions() {
        Ok(predictions) => Json(predictions).into_response(),
        Err(e) => query_failed(e),
    }
}

async fn accuracy(State(state): State<Arc<AppState>>) -> Response {
    match state.service.accuracy_summary() {
        Ok(records) => Json(records).into_response(),
        Err(e) => query_failed(e),
    }
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.service.status().await)
}

async fn statistics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.service.reading_statistics().await)
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/readings", get(readings))
        .route("/api/predictions/latest", get(latest_predictions))
        .route("/api/accuracy", get(accuracy))
        .route("/api/status", get(status))
        .route("/api/statistics", get(statistics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
