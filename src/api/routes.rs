//! Router assembly

use super::handlers::{self, AppState};
use axum::{
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Build the API router with tracing and a request body limit
pub fn build_router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/api/v1/chat", post(handlers::chat))
        .route(
            "/api/v1/strategy",
            get(handlers::get_default_strategy).put(handlers::set_default_strategy),
        )
        .route("/api/v1/sessions/:id", axum::routing::delete(handlers::clear_session))
        .route("/api/v1/sessions/:id/messages", post(handlers::add_message))
        .route("/api/v1/sessions/:id/context", get(handlers::get_context))
        .route("/api/v1/sessions/:id/state", get(handlers::get_state))
        .route("/api/v1/sessions/:id/strategy", put(handlers::bind_session))
        .route("/api/v1/sessions/:id/rehydrate", post(handlers::rehydrate))
        .route("/api/v1/sessions/:id/topics/:topic", get(handlers::topic_messages))
        .route("/api/v1/evaluate", post(handlers::evaluate))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(max_body_bytes)),
        )
        .with_state(state)
}
