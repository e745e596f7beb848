use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::{handlers, middleware, ws};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health, status, config, metrics
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::get_status))
        .route("/config", get(handlers::get_config))
        .route("/metrics", get(handlers::get_metrics))
        // Admission control
        .route("/control/pause", post(handlers::pause))
        .route("/control/resume", post(handlers::resume))
        // Autofocus
        .route("/autofocus", post(handlers::request_autofocus))
        .route("/autofocus", delete(handlers::cancel_autofocus))
        // Tasks
        .route("/tasks/{id}", delete(handlers::remove_task))
        // Real-time status stream
        .route("/ws", get(ws::ws_handler))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(axum::middleware::from_fn(middleware::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
