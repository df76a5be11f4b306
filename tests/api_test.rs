//! HTTP API round trips through the router

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chat_context::api::{build_router, AppState};
use chat_context::strategy::StrategyKind;
use chat_context::ChatService;
use common::{manager, word_counter, DownResponder, FixedResponder};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app_with(responder: Arc<dyn chat_context::chat::Responder>) -> Router {
    let manager = Arc::new(manager(StrategyKind::SlidingWindow));
    let counter = word_counter();
    let chat = Arc::new(ChatService::new(manager.clone(), responder, counter.clone()));
    build_router(
        AppState {
            manager,
            chat,
            counter,
            rehydrate_limit: 20,
        },
        64 * 1024,
    )
}

fn app() -> Router {
    app_with(Arc::new(FixedResponder("Sure.".to_string())))
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let response = app().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["default_strategy"], "sliding_window");
}

#[tokio::test]
async fn test_add_message_then_read_context() {
    let app = app();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/sessions/s1/messages",
            json!({"role": "user", "content": "hello world"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(get("/api/v1/sessions/s1/context"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["strategy"], "sliding_window");
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["items"][0]["content"], "hello world");
    assert!(body["token_count"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_explicit_unknown_strategy_is_rejected() {
    let response = app()
        .oneshot(get("/api/v1/sessions/s1/context?strategy=telepathy"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["code"], "UNKNOWN_STRATEGY");
}

#[tokio::test]
async fn test_unknown_default_strategy_leaves_it_unchanged() {
    let app = app();

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            "/api/v1/strategy",
            json!({"strategy": "telepathy"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["applied"], false);
    assert_eq!(body["strategy"], "sliding_window");

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            "/api/v1/strategy",
            json!({"strategy": "keyword"}),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["applied"], true);
    assert_eq!(body["strategy"], "keyword_importance");

    let body = body_json(app.oneshot(get("/api/v1/strategy")).await.unwrap()).await;
    assert_eq!(body["strategy"], "keyword_importance");
    assert_eq!(body["available"].as_array().unwrap().len(), 6);
}

#[tokio::test]
async fn test_chat_round_trip_and_state() {
    let app = app();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/chat",
            json!({"session_id": "c1", "message": "Can you help?"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["response"], "Sure.");

    let body = body_json(
        app.oneshot(get("/api/v1/sessions/c1/state"))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(body["strategy"], "sliding_window");
    assert_eq!(body["window"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_chat_validation_and_upstream_errors() {
    let response = app()
        .oneshot(json_request(
            "POST",
            "/api/v1/chat",
            json!({"session_id": "c1", "message": "  "}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");

    let response = app_with(Arc::new(DownResponder))
        .oneshot(json_request(
            "POST",
            "/api/v1/chat",
            json!({"session_id": "c1", "message": "hi"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(response).await["code"], "UPSTREAM_ERROR");
}

#[tokio::test]
async fn test_clear_session() {
    let app = app();
    app.clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/sessions/gone/messages",
            json!({"role": "user", "content": "bye"}),
        ))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/v1/sessions/gone")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let body = body_json(
        app.oneshot(get("/api/v1/sessions/gone/context"))
            .await
            .unwrap(),
    )
    .await;
    assert!(body["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_evaluate_rejects_empty_conversation() {
    let response = app()
        .oneshot(json_request(
            "POST",
            "/api/v1/evaluate",
            json!({"conversation": []}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
