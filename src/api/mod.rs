//! Health and stats HTTP surface.

pub mod handlers;

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use handlers::AppState;

/// Build the HTTP routes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/stats", get(handlers::get_stats))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
