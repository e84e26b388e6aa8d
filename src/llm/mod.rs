//! LLM 层：客户端抽象、流式片段累加与实现（OpenAI 兼容 / Azure / Mock）

pub mod accumulator;
pub mod mock;
pub mod openai;
pub mod traits;
pub mod wire;

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::LlmSection;

pub use accumulator::DeltaAccumulator;
pub use mock::{MockCall, MockLlmClient, MockTurn};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{
    AssistantReply, ChatRequest, DeltaStream, LlmClient, LlmError, StreamDelta, ToolCallDelta, Usage,
};

/// 按 [llm].provider 与环境变量中的 API Key 创建客户端；没有 Key 时退回 Mock
pub fn create_llm_client(llm: &LlmSection) -> Arc<dyn LlmClient> {
    let key_var = match llm.provider.as_str() {
        "mock" => {
            info!("LLM provider: mock");
            return Arc::new(MockLlmClient::new());
        }
        "azure" => "AZURE_OPEN_AI_API_KEY",
        _ => "OPENAI_API_KEY",
    };

    match std::env::var(key_var).ok().filter(|k| !k.is_empty()) {
        Some(key) if llm.provider == "azure" => {
            info!(model = %llm.model, "LLM provider: azure");
            Arc::new(OpenAiClient::azure(llm, &key))
        }
        Some(key) => {
            info!(model = %llm.model, base_url = ?llm.base_url(), "LLM provider: openai-compatible");
            Arc::new(OpenAiClient::new(llm, &key))
        }
        None => {
            warn!(provider = %llm.provider, "{} not set, falling back to mock LLM", key_var);
            Arc::new(MockLlmClient::new())
        }
    }
}
