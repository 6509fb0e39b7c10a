use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{
    audit, batches, callbacks, content, deliveries, handlers, middleware::metrics_middleware,
};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health, config and diagnostics
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/status", get(handlers::get_status))
        .route("/metrics", get(handlers::metrics))
        // Audit
        .route("/audit", get(audit::query_audit))
        .route("/tasks/{id}/timeline", get(audit::task_timeline))
        // Dead-lettered callbacks
        .route("/deliveries/failed", get(deliveries::list_failed))
        .route("/deliveries/failed/{id}", get(deliveries::get_failed))
        .route("/deliveries/failed/{id}/replay", post(deliveries::replay))
        // Content generation
        .route("/content/generate", post(content::generate))
        .route("/content/callbacks/keywords", post(callbacks::keywords_ready))
        // Batches
        .route("/batches", get(batches::list_batches))
        .route(
            "/batches/{id}",
            get(batches::get_batch).delete(batches::cancel_batch),
        )
        .layer(middleware::from_fn(metrics_middleware))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
}
