//! HTTP request handlers for the relay service.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::messaging::{StatsSnapshot, SupervisorStats};

/// Application state shared across handlers.
pub struct AppState {
    pub stats: Arc<SupervisorStats>,
    pub broker_address: String,
    pub queues: Vec<String>,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
    connected: bool,
    active_listeners: usize,
}

/// Health check endpoint. Degraded while the broker connection is down.
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let snapshot = state.stats.snapshot();
    let (code, status) = if snapshot.connected {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            connected: snapshot.connected,
            active_listeners: snapshot.active_listeners,
        }),
    )
}

/// Supervisor statistics response.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    broker: String,
    queues: Vec<String>,
    #[serde(flatten)]
    stats: StatsSnapshot,
}

/// Current supervisor counters.
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        broker: state.broker_address.clone(),
        queues: state.queues.clone(),
        stats: state.stats.snapshot(),
    })
}
