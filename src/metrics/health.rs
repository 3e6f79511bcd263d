//! HTTP endpoints: liveness, Prometheus metrics, queue stats and room polling

use crate::metrics::collector::MetricsCollector;
use crate::service::app::AppState;
use crate::service::health::{HealthCheck, HealthStatus};
use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const SERVICE_NAME: &str = "trivia-duel";

/// Health server configuration
#[derive(Debug, Clone)]
pub struct HealthServerConfig {
    /// Port to bind the HTTP server to
    pub port: u16,
    /// Host address to bind to
    pub host: String,
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct HealthServerState {
    /// Source of the `/metrics` payload
    pub metrics_collector: Arc<MetricsCollector>,
    /// Engine access for stats, queue and room routes; absent in metrics-only mode
    pub app_state: Option<Arc<AppState>>,
}

/// HTTP server for health checks, metrics and room polling
pub struct HealthServer {
    config: HealthServerConfig,
    state: HealthServerState,
    shutdown_tx: broadcast::Sender<()>,
}

impl HealthServer {
    pub fn new(config: HealthServerConfig, metrics_collector: Arc<MetricsCollector>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            state: HealthServerState {
                metrics_collector,
                app_state: None,
            },
            shutdown_tx,
        }
    }

    pub fn with_app_state(mut self, app_state: Arc<AppState>) -> Self {
        self.state.app_state = Some(app_state);
        self
    }

    /// Sender that stops the server when signalled
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Serve until a shutdown signal arrives
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Invalid health server address")?;

        let app = self.create_router();
        let listener = TcpListener::bind(addr).await?;

        info!("HTTP server listening on http://{}", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("HTTP server shutdown signal received");
            })
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }

    pub fn create_router(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/alive", get(alive_handler))
            .route("/metrics", get(metrics_handler))
            .route("/stats", get(stats_handler))
            .route("/queue", get(queue_handler))
            .route("/rooms/{room_id}", get(room_handler))
            .with_state(self.state.clone())
    }

    pub async fn stop(&self) -> Result<()> {
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal to HTTP server: {}", e);
        }
        Ok(())
    }
}

fn not_initialized() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "service": SERVICE_NAME,
            "status": "unhealthy",
            "error": "Service not initialized"
        })),
    )
        .into_response()
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "/health",
            "/ready",
            "/alive",
            "/metrics",
            "/stats",
            "/queue",
            "/rooms/{room_id}"
        ]
    }))
}

async fn health_handler(State(state): State<HealthServerState>) -> Response {
    debug!("Health check requested");

    let Some(app_state) = &state.app_state else {
        return not_initialized();
    };

    let (code, status) = match HealthCheck::liveness_check(app_state.clone()).await {
        Ok(HealthStatus::Healthy) => (StatusCode::OK, "healthy"),
        Ok(HealthStatus::Degraded) => (StatusCode::OK, "degraded"),
        Ok(HealthStatus::Unhealthy) | Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
    };

    (
        code,
        Json(json!({
            "status": status,
            "service": SERVICE_NAME,
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
        .into_response()
}

async fn ready_handler(State(state): State<HealthServerState>) -> Response {
    let Some(app_state) = &state.app_state else {
        return not_initialized();
    };

    match HealthCheck::readiness_check(app_state.clone()).await {
        Ok(HealthStatus::Healthy) => (StatusCode::OK, "Ready").into_response(),
        Ok(HealthStatus::Degraded) => (StatusCode::OK, "Degraded but ready").into_response(),
        Ok(HealthStatus::Unhealthy) => {
            (StatusCode::SERVICE_UNAVAILABLE, "Not ready").into_response()
        }
        Err(e) => {
            error!("Readiness check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "Not ready").into_response()
        }
    }
}

async fn alive_handler(State(state): State<HealthServerState>) -> Response {
    let Some(app_state) = &state.app_state else {
        return not_initialized();
    };

    match HealthCheck::liveness_check(app_state.clone()).await {
        Ok(HealthStatus::Healthy) => (StatusCode::OK, "Alive").into_response(),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "Not alive").into_response(),
    }
}

async fn metrics_handler(State(state): State<HealthServerState>) -> Response {
    let metric_families = state.metrics_collector.registry().gather();
    let encoder = TextEncoder::new();

    match encoder.encode_to_string(&metric_families) {
        Ok(metrics_output) => {
            debug!("Serving {} metric families", metric_families.len());
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, encoder.format_type().to_string())],
                metrics_output,
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics".to_string(),
            )
                .into_response()
        }
    }
}

async fn stats_handler(State(state): State<HealthServerState>) -> Response {
    let Some(app_state) = &state.app_state else {
        return not_initialized();
    };

    let engine_stats = app_state.engine().stats().await;
    match HealthCheck::check(app_state.clone()).await {
        Ok(health) => (
            StatusCode::OK,
            Json(json!({
                "service": {
                    "name": SERVICE_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                    "status": health.status,
                    "uptime_seconds": health.stats.uptime_seconds
                },
                "queue": engine_stats.queue,
                "matchmaking": engine_stats.queue_counters,
                "rooms": engine_stats.rooms,
                "question_sources": engine_stats.sources,
                "question_cache": engine_stats.cache,
                "sessions": engine_stats.sessions,
                "components": health.checks,
                "timestamp": chrono::Utc::now()
            })),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to get stats: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "service": { "name": SERVICE_NAME, "status": "error" },
                    "error": "Failed to get service stats",
                    "timestamp": chrono::Utc::now()
                })),
            )
                .into_response()
        }
    }
}

async fn queue_handler(State(state): State<HealthServerState>) -> Response {
    match &state.app_state {
        Some(app_state) => Json(app_state.engine().queue_stats()).into_response(),
        None => not_initialized(),
    }
}

/// Room snapshot for client polling
async fn room_handler(
    State(state): State<HealthServerState>,
    Path(room_id): Path<String>,
) -> Response {
    let Some(app_state) = &state.app_state else {
        return not_initialized();
    };

    let Ok(room_id) = Uuid::parse_str(&room_id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("invalid room id: {}", room_id) })),
        )
            .into_response();
    };

    match app_state.engine().room_snapshot(room_id).await {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("room {} not found", room_id) })),
        )
            .into_response(),
    }
}
