//! HTTP 服务：共享状态与路由

pub mod handlers;
pub mod sse;
pub mod stream;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::config::AppConfig;
use crate::core::{ChatSessions, Orchestrator, ShutdownManager};
use crate::llm::LlmClient;
use crate::memory::ModelProfile;
use crate::tools::ToolExecutor;

pub use handlers::{ApiError, InboundTurn, CHAT_ID_HEADER};
pub use stream::{spawn_turn, sse_body, StreamEvent, TurnStream};

/// 所有请求共享的状态
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub sessions: Arc<ChatSessions>,
    pub shutdown: ShutdownManager,
    pub stream_buffer: usize,
    pub surface_planning_cutoff: bool,
}

impl AppState {
    /// 由配置与已创建的 LLM 客户端、工具执行器组装
    pub fn new(
        cfg: &AppConfig,
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolExecutor>,
        shutdown: ShutdownManager,
    ) -> Self {
        let profile = ModelProfile {
            name: cfg.llm.model.clone(),
            system_prompt: cfg.llm.resolve_system_prompt(),
        };
        Self {
            orchestrator: Arc::new(Orchestrator::new(llm, tools, &cfg.chat)),
            sessions: Arc::new(ChatSessions::new(profile)),
            shutdown,
            stream_buffer: cfg.server.stream_buffer,
            surface_planning_cutoff: cfg.server.surface_planning_cutoff,
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::welcome))
        .route("/api/health", get(handlers::health))
        .route("/api/v1/chats/", post(handlers::post_chat))
        .route("/api/v1/chats/history/:chat_id", get(handlers::get_history))
        .route("/api/v1/chats/itinerary/:chat_id", get(handlers::get_itinerary))
        .with_state(state)
}
