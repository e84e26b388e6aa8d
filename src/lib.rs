//! Kaiyo - 旅行行程 AI 对话后端
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 回合编排、回合状态、会话表、工具并发、优雅关闭
//! - **llm**: LLM 客户端抽象与实现（OpenAI / Azure OpenAI / Mock）
//! - **memory**: 对话历史与结构化行程
//! - **observability**: 日志初始化
//! - **server**: HTTP 路由、SSE 流式响应
//! - **tools**: 工具注册表、执行器、地理编码工具、行程 Schema

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod server;
pub mod tools;
