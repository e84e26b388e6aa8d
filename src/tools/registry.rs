//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / call），由 ToolRegistry 按名注册与查找。
//! invoke 对任意工具名都是全函数：未知工具、参数错误、上游失败都变成 ToolOutcome::Failure，
//! 结果作为 tool 消息写回历史，对话得以继续。超时与取消由 ToolExecutor 在外层处理。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// 提供给 LLM 的工具签名
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema（object）
    pub parameters: Value,
}

/// 工具分发错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Upstream failure: {0}")]
    Upstream(String),

    #[error("Tool timed out: {0}")]
    Timeout(String),

    #[error("Tool call cancelled: {0}")]
    Cancelled(String),
}

/// 一次工具调用的结果：成功载荷或结构化错误
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ToolOutcome {
    Success(Value),
    Failure { error: String },
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success(_))
    }

    /// 作为 tool 消息内容写回历史的 JSON 文本
    pub fn to_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }
}

impl From<ToolError> for ToolOutcome {
    fn from(e: ToolError) -> Self {
        ToolOutcome::Failure {
            error: e.to_string(),
        }
    }
}

impl From<Result<Value, ToolError>> for ToolOutcome {
    fn from(result: Result<Value, ToolError>) -> Self {
        match result {
            Ok(value) => ToolOutcome::Success(value),
            Err(e) => e.into(),
        }
    }
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步调用（参数为提供方给出的原始 JSON 文本）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（LLM 发起调用时使用）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具；参数由工具按自己的类型解码
    async fn call(&self, arguments: &str) -> Result<Value, ToolError>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// 所有工具签名，按名称排序，保证每次请求的工具列表一致
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// 全函数分发：任何失败都以 ToolOutcome::Failure 返回
    pub async fn invoke(&self, name: &str, arguments: &str) -> ToolOutcome {
        match self.get(name) {
            Some(tool) => tool.call(arguments).await.into(),
            None => ToolError::UnknownTool(name.to_string()).into(),
        }
    }
}
