//! 对话回合错误类型
//!
//! 只有输入错误与早期阶段（Planning / Narrating）的 LLM 错误会被 HTTP 调用方看到；
//! 工具失败与抽取失败以值的形式吸收进历史或日志，不走这里。

use thiserror::Error;

use crate::core::TurnPhase;
use crate::llm::LlmError;

/// 一个回合中可能出现、需要向上传播的错误
#[derive(Error, Debug)]
pub enum ChatError {
    /// 输入校验失败（如 content 为空），不修改任何状态
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Chat not found: {0}")]
    NotFound(String),

    /// LLM 调用失败，附带发生的阶段
    #[error("LLM error during {phase}: {source}")]
    Llm {
        phase: TurnPhase,
        #[source]
        source: LlmError,
    },

    /// 历史的引用完整性被破坏（tool 消息找不到对应调用、重复 system 消息）
    #[error("Conversation integrity violation: {0}")]
    Integrity(String),

    /// 客户端断开或服务关闭，回合被取消
    #[error("Turn cancelled")]
    Cancelled,
}

impl ChatError {
    pub fn llm(phase: TurnPhase, source: LlmError) -> Self {
        Self::Llm { phase, source }
    }
}
