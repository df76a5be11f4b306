//! HTTP handlers over the context manager and chat service

use super::models::*;
use crate::chat::{ChatReply, ChatService};
use crate::context::TokenCounter;
use crate::error::ContextError;
use crate::evaluation::{evaluate_conversation, EvaluationReport};
use crate::manager::ContextManager;
use crate::metrics::METRICS;
use crate::strategy::{StrategyKind, StrategySnapshot};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ContextManager>,
    pub chat: Arc<ChatService>,
    pub counter: Arc<dyn TokenCounter>,
    pub rehydrate_limit: usize,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

fn validation(message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiError::new(error_codes::VALIDATION_ERROR, message)),
    )
}

/// Map a crate error onto a status code and error body
pub fn error_response(e: ContextError) -> (StatusCode, Json<ApiError>) {
    let (status, code) = match &e {
        e if e.is_collaborator_failure() => (StatusCode::BAD_GATEWAY, error_codes::UPSTREAM_ERROR),
        ContextError::InvariantViolation(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, error_codes::INVARIANT_VIOLATION)
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, error_codes::INTERNAL_ERROR),
    };
    error!("Request failed: {}", e);
    (status, Json(ApiError::new(code, e.to_string())))
}

/// Resolve an optional strategy override; unknown names are rejected here
/// because the caller asked for that strategy explicitly
fn resolve(state: &AppState, session_id: &str, name: Option<&str>) -> ApiResult<StrategyKind> {
    match name {
        None => Ok(state.manager.strategy_for(session_id)),
        Some(name) => name.parse().map_err(|e: crate::strategy::UnknownStrategy| {
            (
                StatusCode::BAD_REQUEST,
                Json(ApiError::new(error_codes::UNKNOWN_STRATEGY, e.to_string())),
            )
        }),
    }
}

/// Run one chat turn
///
/// POST /api/v1/chat
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<ChatReply>> {
    if request.session_id.trim().is_empty() {
        return Err(validation("session_id cannot be empty"));
    }
    if request.message.trim().is_empty() {
        return Err(validation("message cannot be empty"));
    }

    state
        .chat
        .handle_user_message(&request.session_id, &request.message)
        .await
        .map(Json)
        .map_err(error_response)
}

/// Record a message without generating a reply
///
/// POST /api/v1/sessions/:id/messages
pub async fn add_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<AddMessageRequest>,
) -> ApiResult<StatusCode> {
    let kind = resolve(&state, &session_id, request.strategy.as_deref())?;
    state
        .manager
        .add_message_with(kind, &session_id, request.into_message())
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Rendered context for the session
///
/// GET /api/v1/sessions/:id/context
pub async fn get_context(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<StrategyQuery>,
) -> ApiResult<Json<ContextResponse>> {
    let kind = resolve(&state, &session_id, query.strategy.as_deref())?;
    let context = state
        .manager
        .get_context_with(kind, &session_id)
        .await
        .map_err(error_response)?;

    let rendered = context.render();
    Ok(Json(ContextResponse {
        token_count: state.counter.count(&rendered),
        session_id,
        strategy: kind,
        rendered,
        items: context.items,
    }))
}

/// Strategy-internal snapshot of the session
///
/// GET /api/v1/sessions/:id/state
pub async fn get_state(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<StrategyQuery>,
) -> ApiResult<Json<StrategySnapshot>> {
    let kind = resolve(&state, &session_id, query.strategy.as_deref())?;
    state
        .manager
        .get_internal_state_with(kind, &session_id)
        .await
        .map(Json)
        .map_err(error_response)
}

/// Pin the session to a strategy
///
/// PUT /api/v1/sessions/:id/strategy
pub async fn bind_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<StrategyRequest>,
) -> Json<StrategyResponse> {
    let applied = state.manager.bind_session(&session_id, &request.strategy);
    Json(StrategyResponse {
        strategy: state.manager.strategy_for(&session_id),
        applied,
        available: state.manager.available().to_vec(),
    })
}

/// Forget the session in every strategy
///
/// DELETE /api/v1/sessions/:id
pub async fn clear_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<StatusCode> {
    state
        .manager
        .clear_session(&session_id)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Reload recent logged messages into the batched summary stack
///
/// POST /api/v1/sessions/:id/rehydrate
pub async fn rehydrate(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    request: Option<Json<RehydrateRequest>>,
) -> ApiResult<Json<RehydrateResponse>> {
    let limit = request
        .and_then(|Json(r)| r.limit)
        .unwrap_or(state.rehydrate_limit);
    let restored = state
        .manager
        .rehydrate(&session_id, limit)
        .await
        .map_err(error_response)?;
    Ok(Json(RehydrateResponse {
        session_id,
        restored,
    }))
}

/// Messages currently assigned to a topic
///
/// GET /api/v1/sessions/:id/topics/:topic
pub async fn topic_messages(
    State(state): State<AppState>,
    Path((session_id, topic)): Path<(String, usize)>,
) -> Json<Vec<crate::context::Message>> {
    Json(state.manager.topic_messages(&session_id, topic).await)
}

/// GET /api/v1/strategy
pub async fn get_default_strategy(State(state): State<AppState>) -> Json<StrategyResponse> {
    Json(StrategyResponse {
        strategy: state.manager.active_strategy(),
        applied: true,
        available: state.manager.available().to_vec(),
    })
}

/// Change the default strategy; unknown names leave it unchanged
///
/// PUT /api/v1/strategy
pub async fn set_default_strategy(
    State(state): State<AppState>,
    Json(request): Json<StrategyRequest>,
) -> Json<StrategyResponse> {
    let applied = state.manager.set_active_strategy(&request.strategy);
    if !applied {
        warn!("Ignoring unknown default strategy {:?}", request.strategy);
    }
    Json(StrategyResponse {
        strategy: state.manager.active_strategy(),
        applied,
        available: state.manager.available().to_vec(),
    })
}

/// Replay a conversation through every strategy
///
/// POST /api/v1/evaluate
pub async fn evaluate(
    State(state): State<AppState>,
    Json(request): Json<EvaluateRequest>,
) -> ApiResult<Json<EvaluationReport>> {
    if request.conversation.is_empty() {
        return Err(validation("conversation cannot be empty"));
    }
    info!("Evaluating conversation of {} messages", request.conversation.len());
    Ok(Json(
        evaluate_conversation(&state.manager, &request.conversation, state.counter.as_ref()).await,
    ))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        default_strategy: state.manager.active_strategy(),
    })
}

/// GET /metrics
pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        METRICS.export_prometheus(),
    )
}
