//! HTTP server for health and metrics endpoints
//!
//! Read-only view over the checkpoint store and the Prometheus registry.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use eyre::eyre;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use tracing::info;

use crate::checkpoint::CheckpointStore;
use crate::health::{ChainHealth, SharedHealthReport};
use crate::metrics::Metrics;
use crate::types::{ChainSide, Direction};

/// Combined app state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<CheckpointStore>,
    pub metrics: Arc<Metrics>,
    pub health: SharedHealthReport,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub locks_relayed: u64,
    pub unlocks_relayed: u64,
    pub benign_rejections: u64,
    pub errors: u64,
    pub processed_locks: usize,
    pub processed_unlocks: usize,
    pub watermark_a: Option<u64>,
    pub watermark_b: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub chains: Vec<ChainHealth>,
}

async fn build_health(store: &CheckpointStore, health: &SharedHealthReport) -> HealthResponse {
    let stats = store.stats().await;
    let report = health.read().await.clone();
    let status = match &report {
        None => "starting",
        Some(r) if r.is_healthy() => "healthy",
        Some(_) => "degraded",
    };
    HealthResponse {
        status: status.to_string(),
        locks_relayed: stats.locks_relayed,
        unlocks_relayed: stats.unlocks_relayed,
        benign_rejections: stats.benign_rejections,
        errors: stats.errors,
        processed_locks: store.processed_count(Direction::Lock).await,
        processed_unlocks: store.processed_count(Direction::Unlock).await,
        watermark_a: store.watermark(ChainSide::A).await,
        watermark_b: store.watermark(ChainSide::B).await,
        uptime_secs: (Utc::now() - stats.started_at).num_seconds(),
        started_at: stats.started_at,
        last_checked_at: report.as_ref().map(|r| r.checked_at),
        chains: report.map(|r| r.chains).unwrap_or_default(),
    }
}

/// Health check endpoint handler
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(build_health(&state.store, &state.health).await)
}

/// Liveness probe (always returns OK if server is running)
async fn liveness() -> &'static str {
    "OK"
}

/// Readiness probe: both chains have an initialised watermark
async fn readiness(State(state): State<AppState>) -> Response {
    let a = state.store.watermark(ChainSide::A).await;
    let b = state.store.watermark(ChainSide::B).await;
    if a.is_some() && b.is_some() {
        "OK".into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT_READY").into_response()
    }
}

/// Prometheus metrics endpoint
async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    for side in [ChainSide::A, ChainSide::B] {
        if let Some(watermark) = state.store.watermark(side).await {
            state
                .metrics
                .watermark
                .with_label_values(&[side.as_str()])
                .set(watermark as i64);
        }
    }

    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry.gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }

    match Response::builder()
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
    {
        Ok(resp) => resp,
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to build metrics response",
        )
            .into_response(),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

/// Start the HTTP server for health and metrics
pub async fn start_server(
    bind_address: &str,
    port: u16,
    store: Arc<CheckpointStore>,
    metrics: Arc<Metrics>,
    health: SharedHealthReport,
) -> eyre::Result<()> {
    let app = router(AppState {
        store,
        metrics,
        health,
    });

    let addr: SocketAddr = format!("{}:{}", bind_address, port)
        .parse()
        .map_err(|e| eyre!("Invalid bind address {}:{}: {}", bind_address, port, e))?;
    info!("Status server listening on {}", addr);
    info!("  /health  - Relay stats (JSON)");
    info!("  /metrics - Prometheus metrics");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
