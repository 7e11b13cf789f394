//! HTTP API for health checks, status, and swap lookups

use crate::config::ApiConfig;
use crate::error::{WatchtowerError, WatchtowerResult};
use crate::repository::SharedRepository;
use crate::swap::Swap;
use crate::tracker::{Dispatcher, QueueDepths};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub repository: SharedRepository,
    pub dispatcher: Dispatcher,
    pub instance_id: String,
    pub currencies: Vec<String>,
    pub started_at: Arc<Instant>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/status", get(get_status))
        .route("/swaps/:id", get(get_swap))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server until `cancel` fires
pub async fn run_server(config: ApiConfig, state: AppState, cancel: CancellationToken) -> WatchtowerResult<()> {
    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| WatchtowerError::Internal(format!("api bind {}: {}", addr, e)))?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| WatchtowerError::Internal(format!("api server: {}", e)))
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - storage must answer
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match state.repository.health_check().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Readiness check failed: {}", e);
            false
        }
    };

    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready: database,
            database,
        }),
    )
}

async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        instance_id: state.instance_id.clone(),
        mode: state.dispatcher.mode().as_str().to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        queues: state.dispatcher.depths(),
        currencies: state.currencies.clone(),
    })
}

async fn get_swap(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.repository.get_swap(id).await {
        Ok(Some(swap)) => Json::<Swap>(swap).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("swap {} not found", id),
            }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse { error: e.to_string() }),
        )
            .into_response(),
    }
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    database: bool,
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    instance_id: String,
    mode: String,
    uptime_seconds: u64,
    queues: QueueDepths,
    currencies: Vec<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}
