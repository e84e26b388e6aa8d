//! Kaiyo - 旅行行程 AI 对话后端
//!
//! 入口：加载配置、初始化日志、组装 LLM 客户端与工具执行器，启动 HTTP 服务。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use kaiyo::config::{load_config, AppConfig};
use kaiyo::core::ShutdownManager;
use kaiyo::llm::create_llm_client;
use kaiyo::server::{create_router, AppState};
use kaiyo::tools::create_tool_executor;
use tracing::{info, warn};

/// `--config <path>` 优先，其次 KAIYO_CONFIG
fn config_path() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    std::env::var_os("KAIYO_CONFIG").map(PathBuf::from)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (cfg, load_error) = match load_config(config_path()) {
        Ok(cfg) => (cfg, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };
    kaiyo::observability::init(&cfg.app.log_level);
    if let Some(e) = load_error {
        warn!(error = %e, "failed to load config, using defaults");
    }

    let llm = create_llm_client(&cfg.llm);
    let tools = Arc::new(create_tool_executor(&cfg.tools));
    let shutdown = ShutdownManager::new();
    shutdown.install_signal_handlers();

    let state = Arc::new(AppState::new(&cfg, llm, tools, shutdown.clone()));
    if let Some(idle) = cfg.server.session_idle() {
        state
            .sessions
            .spawn_sweeper(idle, cfg.server.session_sweep(), shutdown.child_token());
    }
    let app = create_router(state);

    let addr = cfg.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, model = %cfg.llm.model, provider = %cfg.llm.provider, "{} listening", cfg.app.name);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().wait_for_shutdown())
        .await
        .context("Server failed")?;

    info!(reason = ?shutdown.reason(), "server stopped");
    Ok(())
}
