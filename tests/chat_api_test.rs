//! HTTP 接口集成测试：用 Mock LLM 驱动完整路由

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use kaiyo::config::AppConfig;
use kaiyo::core::{ShutdownManager, ShutdownReason};
use kaiyo::llm::{LlmError, MockLlmClient, MockTurn};
use kaiyo::server::{create_router, sse, AppState, CHAT_ID_HEADER};
use kaiyo::tools::{ToolExecutor, ToolRegistry, SAVE_ITINERARY};
use serde_json::{json, Value};
use tower::ServiceExt;

const ITINERARY: &str = r#"{"destination": "Paris", "currency": "EUR", "days": [{"day": 1, "items": [{"title": "Louvre", "lat": 48.8606, "lon": 2.3376}]}]}"#;

fn app_state(mock: Arc<MockLlmClient>, shutdown: ShutdownManager) -> Arc<AppState> {
    let tools = Arc::new(ToolExecutor::new(ToolRegistry::new(), 5, 3));
    Arc::new(AppState::new(&AppConfig::default(), mock, tools, shutdown))
}

fn app_with(turns: Vec<MockTurn>) -> (Router, Arc<MockLlmClient>, ShutdownManager) {
    let mock = Arc::new(MockLlmClient::scripted(turns));
    let shutdown = ShutdownManager::new();
    let state = app_state(mock.clone(), shutdown.clone());
    (create_router(state), mock, shutdown)
}

fn post_turn(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/chats/")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(res: axum::response::Response) -> Value {
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_and_welcome() {
    let (app, _, _) = app_with(vec![]);
    let res = app.clone().oneshot(get("/api/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json_body(res).await, json!({"status": "ok"}));

    let res = app.oneshot(get("/")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_empty_content_is_rejected() {
    let (app, mock, _) = app_with(vec![]);
    let res = app.oneshot(post_turn(json!({"content": "   ", "chatID": "t1"}))).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(res).await["error"].as_str().unwrap().contains("content"));
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn test_turn_streams_fragments_then_saves_itinerary() {
    let (app, mock, _) = app_with(vec![
        MockTurn::text("Looking up Paris."),
        MockTurn::stream(&["Day 1:\n", "Visit the ", "Louvre"]),
        MockTurn::tool_call("save_1", SAVE_ITINERARY, ITINERARY),
    ]);

    let res = app
        .clone()
        .oneshot(post_turn(json!({"content": "Plan a day in Paris", "chatID": "trip-1"})))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(res.headers()[CHAT_ID_HEADER], "trip-1");

    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let body = String::from_utf8(bytes.to_vec()).unwrap();
    assert_eq!(body.matches("\n\n").count(), 3);
    assert_eq!(sse::parse_data_frames(&body), vec!["Day 1:\n", "Visit the ", "Louvre"]);

    // 抽取在响应体结束后仍持有对话锁，读取会等到它完成
    let res = app.clone().oneshot(get("/api/v1/chats/itinerary/trip-1")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let itinerary = json_body(res).await;
    assert_eq!(itinerary["destination"], "Paris");
    assert_eq!(itinerary["days"][0]["items"][0]["title"], "Louvre");

    let res = app.oneshot(get("/api/v1/chats/history/trip-1")).await.unwrap();
    let history = json_body(res).await;
    let roles: Vec<&str> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["role"].as_str().unwrap())
        .collect();
    assert_eq!(roles.first(), Some(&"system"));
    assert_eq!(roles[1], "user");
    assert!(roles.contains(&"tool"));
    assert_eq!(mock.calls().len(), 3);
}

#[tokio::test]
async fn test_missing_chat_id_uses_default_conversation() {
    let (app, _, _) = app_with(vec![]);
    let res = app.clone().oneshot(post_turn(json!({"Content": "Hello"}))).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[CHAT_ID_HEADER], "default");
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let fragments = sse::parse_data_frames(std::str::from_utf8(&bytes).unwrap());
    assert!(fragments.len() > 1);
    assert!(fragments.concat().starts_with("Echo from Mock: "));

    let res = app.oneshot(get("/api/v1/chats/itinerary/default")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json_body(res).await, Value::Null);
}

#[tokio::test]
async fn test_unknown_chat_is_not_found() {
    let (app, _, _) = app_with(vec![]);
    let res = app.clone().oneshot(get("/api/v1/chats/history/nope")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = app.oneshot(get("/api/v1/chats/itinerary/nope")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_planning_failure_is_bad_gateway() {
    let (app, mock, _) = app_with(vec![MockTurn::Fail(LlmError::Api("upstream down".into()))]);
    let res = app
        .clone()
        .oneshot(post_turn(json!({"content": "Plan Rome", "chatID": "t2"})))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    let error = json_body(res).await["error"].as_str().unwrap().to_string();
    assert!(error.contains("planning"));
    assert_eq!(mock.calls().len(), 1);

    // 用户消息已写入历史
    let res = app.oneshot(get("/api/v1/chats/history/t2")).await.unwrap();
    let history = json_body(res).await;
    assert_eq!(history[1]["content"], "Plan Rome");
}

#[tokio::test]
async fn test_narration_failure_aborts_the_body() {
    let (app, _, _) = app_with(vec![
        MockTurn::text("ok"),
        MockTurn::StreamThenFail(vec!["Day ".into()], LlmError::Stream("reset".into())),
        MockTurn::text("nothing to save"),
    ]);
    let res = app
        .oneshot(post_turn(json!({"content": "Plan Kyoto", "chatID": "t3"})))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(to_bytes(res.into_body(), usize::MAX).await.is_err());
}

#[tokio::test]
async fn test_turn_after_shutdown_is_unavailable() {
    let (app, mock, shutdown) = app_with(vec![]);
    shutdown.shutdown(ShutdownReason::Signal);
    let res = app
        .oneshot(post_turn(json!({"content": "Plan Lisbon", "chatID": "t4"})))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn test_idle_conversation_is_cleaned_up() {
    let mock = Arc::new(MockLlmClient::scripted(vec![]));
    let state = app_state(mock, ShutdownManager::new());
    let app = create_router(state.clone());

    let res = app
        .clone()
        .oneshot(post_turn(json!({"content": "Plan Oslo", "chatID": "t5"})))
        .await
        .unwrap();
    to_bytes(res.into_body(), usize::MAX).await.unwrap();

    // 读取历史会等抽取完成释放对话锁
    let res = app.clone().oneshot(get("/api/v1/chats/history/t5")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(state.sessions.cleanup_expired(Duration::from_secs(3600)).await, 0);

    assert_eq!(state.sessions.cleanup_expired(Duration::ZERO).await, 1);
    let res = app.oneshot(get("/api/v1/chats/history/t5")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
