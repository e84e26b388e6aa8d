//! HTTP 处理函数
//!
//! - POST /api/v1/chats/：一个回合，SSE 流式返回叙述片段
//! - GET /api/v1/chats/history/:chat_id：完整历史
//! - GET /api/v1/chats/itinerary/:chat_id：当前行程（可能为 null）

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::core::{ChatError, DEFAULT_CHAT_ID};
use crate::memory::{Itinerary, Message};
use crate::server::stream::{spawn_turn, sse_body, StreamEvent};
use crate::server::AppState;

/// 响应头：回显实际使用的 chat id
pub const CHAT_ID_HEADER: &str = "x-chat-id";

/// ChatError → HTTP 状态码 + {"error": ...}
#[derive(Debug)]
pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ChatError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Llm { .. } => StatusCode::BAD_GATEWAY,
            // 客户端还在时只可能是服务正在关闭
            ChatError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            ChatError::Integrity(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// 入站回合；字段名兼容 Web 客户端的大小写写法
#[derive(Debug, Deserialize)]
pub struct InboundTurn {
    #[serde(default, alias = "Content")]
    pub content: String,
    #[serde(default, rename = "chatID", alias = "ChatID", alias = "chatId", alias = "chat_id")]
    pub chat_id: Option<String>,
    #[serde(default, rename = "userID", alias = "UserID", alias = "userId", alias = "user_id")]
    pub user_id: Option<String>,
}

impl InboundTurn {
    pub fn resolved_chat_id(&self) -> String {
        self.chat_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(DEFAULT_CHAT_ID)
            .to_string()
    }
}

/// GET /
pub async fn welcome() -> &'static str {
    "Welcome to Kaiyo AI! POST /api/v1/chats/ to start planning a trip."
}

/// GET /api/health
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// POST /api/v1/chats/：在第一个事件到达前出错返回错误状态码，之后的错误只能中断响应体
pub async fn post_chat(
    State(state): State<Arc<AppState>>,
    Json(turn): Json<InboundTurn>,
) -> Result<Response, ApiError> {
    let content = turn.content.trim().to_string();
    if content.is_empty() {
        return Err(ChatError::InvalidInput("content is required".to_string()).into());
    }
    let chat_id = turn.resolved_chat_id();
    info!(chat_id = %chat_id, user_id = ?turn.user_id, chars = content.chars().count(), "chat turn");

    let conversation = state.sessions.get_or_create(&chat_id).await;
    let cancel = state.shutdown.child_token();
    // 处理函数或响应体被 drop 都会取消回合
    let guard = cancel.clone().drop_guard();
    let mut stream = spawn_turn(
        state.orchestrator.clone(),
        conversation,
        content,
        cancel,
        state.stream_buffer,
    );

    let first = stream.next_event().await;
    if let Some(StreamEvent::Failed(e)) = first {
        if !matches!(e, ChatError::Cancelled) {
            // 叙述阶段的失败仍会继续抽取，不能随 guard 一起取消
            let _ = guard.disarm();
        }
        return Err(e.into());
    }

    let mut res = sse_body(first, stream, guard, state.surface_planning_cutoff).into_response();
    if let Ok(value) = HeaderValue::from_str(&chat_id) {
        res.headers_mut().insert(CHAT_ID_HEADER, value);
    }
    Ok(res)
}

/// GET /api/v1/chats/history/:chat_id
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(chat_id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let conversation = state.sessions.get(&chat_id).await?;
    let conv = conversation.lock().await;
    Ok(Json(conv.messages().to_vec()))
}

/// GET /api/v1/chats/itinerary/:chat_id
pub async fn get_itinerary(
    State(state): State<Arc<AppState>>,
    Path(chat_id): Path<String>,
) -> Result<Json<Option<Itinerary>>, ApiError> {
    let conversation = state.sessions.get(&chat_id).await?;
    let conv = conversation.lock().await;
    Ok(Json(conv.itinerary().cloned()))
}
