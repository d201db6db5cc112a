//! Integration tests for the agent API endpoints

use airq_agent::api::{create_router, AppState};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use forecast_lib::{
    health::components,
    ingest::ChannelSource,
    store::{MemoryStore, TabularStore},
    ForecastConfig, ForecastMetrics, ForecastRuntime, ModelFamily, Prediction, RuntimeHandles,
    SensorReading, TargetValues,
};
use std::sync::Arc;
use tower::ServiceExt;

fn t(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + ChronoDuration::seconds(secs)
}

fn reading(secs: i64, pm2_5: f64) -> SensorReading {
    SensorReading {
        timestamp: t(secs),
        pm2_5,
        pm10: 30.0,
        temperature: 21.5,
        humidity: 48.0,
        gas_level: 210.0,
    }
}

async fn setup_test_app(store: Arc<MemoryStore>) -> (Router, RuntimeHandles) {
    let (_tx, source) = ChannelSource::new(1);
    let handles = ForecastRuntime::new(ForecastConfig::default(), store)
        .start(Box::new(source))
        .await
        .unwrap();
    let state = Arc::new(AppState::new(
        handles.health.clone(),
        handles.service.clone(),
    ));
    (create_router(state), handles)
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, handles) = setup_test_app(Arc::new(MemoryStore::new())).await;

    let (status, health) = get_json(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["components"].as_object().unwrap().len(), 5);

    handles.shutdown("test").await;
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, handles) = setup_test_app(Arc::new(MemoryStore::new())).await;
    handles
        .health
        .set_degraded(components::TRAINER, "training failed")
        .await;

    let (status, health) = get_json(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["components"]["trainer"]["message"], "training failed");

    handles.shutdown("test").await;
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, handles) = setup_test_app(Arc::new(MemoryStore::new())).await;
    handles
        .health
        .set_unhealthy(components::INGESTION, "10 consecutive failures")
        .await;

    let (status, health) = get_json(app.clone(), "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");

    let (status, readiness) = get_json(app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);

    handles.shutdown("test").await;
}

#[tokio::test]
async fn test_readyz_follows_runtime_lifecycle() {
    let (app, handles) = setup_test_app(Arc::new(MemoryStore::new())).await;

    let (status, readiness) = get_json(app.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);

    handles.health.set_ready(false).await;
    let (status, _) = get_json(app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    handles.shutdown("test").await;
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, handles) = setup_test_app(Arc::new(MemoryStore::new())).await;
    ForecastMetrics::new().inc_readings_ingested();

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/plain; charset=utf-8"
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("airq_readings_ingested_total"));
    assert!(text.contains("airq_prediction_latency_seconds_bucket"));

    handles.shutdown("test").await;
}

#[tokio::test]
async fn test_readings_endpoint_honours_limit() {
    let store = Arc::new(MemoryStore::new());
    for i in 0..5 {
        store.append_reading(&reading(i * 5, 10.0 + i as f64)).unwrap();
    }
    let (app, handles) = setup_test_app(store).await;

    let (status, body) = get_json(app.clone(), "/api/readings?n=2").await;
    assert_eq!(status, StatusCode::OK);
    let readings = body.as_array().unwrap();
    assert_eq!(readings.len(), 2);
    assert_eq!(readings[1]["pm2_5"], 14.0);

    let (_, body) = get_json(app, "/api/readings").await;
    assert_eq!(body.as_array().unwrap().len(), 5);

    handles.shutdown("test").await;
}

#[tokio::test]
async fn test_prediction_and_accuracy_queries() {
    let store = Arc::new(MemoryStore::new());
    let predicted = TargetValues {
        pm2_5: 12.0,
        pm10: 30.0,
        temperature: 20.0,
        humidity: 55.0,
    };
    for horizon in [1, 3] {
        store
            .record_prediction(&Prediction {
                issue_timestamp: t(0),
                target_timestamp: t(horizon as i64 * 3600),
                horizon_hours: horizon,
                model_family: ModelFamily::Ensemble,
                predicted,
                actual: None,
            })
            .unwrap();
    }
    let (app, handles) = setup_test_app(store).await;

    let (status, body) = get_json(app.clone(), "/api/predictions/latest").await;
    assert_eq!(status, StatusCode::OK);
    let predictions = body.as_array().unwrap();
    assert_eq!(predictions.len(), 2);
    assert!(predictions.iter().all(|p| p["actual"].is_null()));

    let (status, body) = get_json(app, "/api/accuracy").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());

    handles.shutdown("test").await;
}

#[tokio::test]
async fn test_status_and_statistics() {
    let store = Arc::new(MemoryStore::new());
    store.append_reading(&reading(0, 10.0)).unwrap();
    store.append_reading(&reading(5, 20.0)).unwrap();
    let (app, handles) = setup_test_app(store).await;

    let (status, body) = get_json(app.clone(), "/api/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["history_len"], 2);
    assert_eq!(body["sequence_disabled"], false);
    assert_eq!(body["artifacts"].as_array().unwrap().len(), 3);

    let (status, body) = get_json(app, "/api/statistics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["fields"][0]["field"], "pm2_5");
    assert_eq!(body["fields"][0]["mean"], 15.0);

    handles.shutdown("test").await;
}
