//! 工具执行器
//!
//! 持有 ToolRegistry、单次调用超时与并发池。invoke 在超时内调用 registry.invoke，并与回合的取消令牌竞争；
//! 超时与取消同样转为 ToolOutcome::Failure，每个调用都有结果。每次调用输出结构化审计日志（JSON）。
//! invoke_batch 并发执行同一批调用，结果顺序与请求顺序一致。

use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::core::TaskScheduler;
use crate::memory::ToolCallRequest;
use crate::tools::{ToolError, ToolOutcome, ToolRegistry, ToolSpec};

/// 工具执行器：超时 + 并发限制 + 审计日志
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
    scheduler: TaskScheduler,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64, max_concurrent: usize) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
            scheduler: TaskScheduler::new(max_concurrent),
        }
    }

    /// 所有已注册工具的签名（规划阶段附在请求上）
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.registry.specs()
    }

    /// 执行一次调用；取消或超时都返回 Failure，输出 JSON 审计日志
    pub async fn invoke(&self, call: &ToolCallRequest, cancel: &CancellationToken) -> ToolOutcome {
        let start = Instant::now();
        let (outcome, label): (ToolOutcome, &str) = tokio::select! {
            biased;
            _ = cancel.cancelled() => (ToolOutcome::from(ToolError::Cancelled(call.name.clone())), "cancelled"),
            result = self.run(call) => result,
        };

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name,
            "call_id": call.id,
            "ok": outcome.is_success(),
            "outcome": label,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&call.arguments),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        outcome
    }

    async fn run(&self, call: &ToolCallRequest) -> (ToolOutcome, &'static str) {
        let _permit = match self.scheduler.acquire_tool().await {
            Ok(permit) => permit,
            Err(e) => return (ToolError::Upstream(e.to_string()).into(), "error"),
        };
        match timeout(self.timeout, self.registry.invoke(&call.name, &call.arguments)).await {
            Ok(outcome) => {
                let label = if outcome.is_success() { "ok" } else { "error" };
                (outcome, label)
            }
            Err(_) => (ToolError::Timeout(call.name.clone()).into(), "timeout"),
        }
    }

    /// 并发执行同一批调用（受并发池限制），按请求顺序返回结果
    pub async fn invoke_batch(&self, calls: &[ToolCallRequest], cancel: &CancellationToken) -> Vec<ToolOutcome> {
        join_all(calls.iter().map(|call| self.invoke(call, cancel))).await
    }
}

fn args_preview(args: &str) -> String {
    if args.chars().count() > 200 {
        format!("{}...", args.chars().take(200).collect::<String>())
    } else {
        args.to_string()
    }
}
