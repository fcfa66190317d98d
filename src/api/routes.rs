//! API route definitions

use crate::lifecycle::LifecycleManager;
use crate::registry::ModelRegistry;
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: LifecycleManager,
    pub registry: Arc<ModelRegistry>,
    pub prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
}

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health and status
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/service-info", get(handlers::service_info))
        // OpenAI-compatible inference
        .route("/v1/models", get(handlers::list_models))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/raw_completion", post(handlers::raw_completion))
        // Model management
        .route("/switch_model", post(handlers::switch_model))
        .route("/admin/unload", post(handlers::unload_model))
        .route(
            "/admin/lifecycle",
            get(handlers::get_lifecycle).put(handlers::set_lifecycle),
        )
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}
