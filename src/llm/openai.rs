//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）或 Azure OpenAI 部署。
//! 请求由 wire::build_request 用类型化构建器拼装，响应与流式片段由 wire 转回领域类型。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::{AzureConfig, OpenAIConfig};
use async_openai::types::chat::{
    CreateChatCompletionRequest, CreateChatCompletionResponse, CreateChatCompletionStreamResponse,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::{stream, Stream, StreamExt};
use tracing::debug;

use crate::config::LlmSection;
use crate::llm::wire;
use crate::llm::{AssistantReply, ChatRequest, DeltaStream, LlmClient, LlmError, Usage};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    fn record(&self, usage: Usage) {
        self.add(usage.prompt_tokens, usage.completion_tokens);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

enum Backend {
    OpenAi(Client<OpenAIConfig>),
    Azure(Client<AzureConfig>),
}

/// OpenAI 兼容客户端：持有 async_openai Client、超时设置与累计用量
pub struct OpenAiClient {
    backend: Backend,
    request_timeout: Duration,
    stream_idle: Duration,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    /// OpenAI 或任意兼容端点
    pub fn new(llm: &LlmSection, api_key: &str) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(url) = llm.base_url() {
            config = config.with_api_base(url);
        }
        Self::with_backend(Backend::OpenAi(Client::with_config(config)), llm)
    }

    /// Azure OpenAI 部署；endpoint / api_version 可由环境变量覆盖
    pub fn azure(llm: &LlmSection, api_key: &str) -> Self {
        let endpoint = std::env::var("AZURE_OPEN_AI_ENDPOINT")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| llm.azure.endpoint.clone());
        let api_version = std::env::var("AZURE_OPEN_AI_API_VERSION")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| llm.azure.api_version.clone());
        let deployment = if llm.azure.deployment.is_empty() {
            llm.model.clone()
        } else {
            llm.azure.deployment.clone()
        };

        let config = AzureConfig::new()
            .with_api_base(endpoint)
            .with_api_version(api_version)
            .with_deployment_id(deployment)
            .with_api_key(api_key);
        Self::with_backend(Backend::Azure(Client::with_config(config)), llm)
    }

    fn with_backend(backend: Backend, llm: &LlmSection) -> Self {
        Self {
            backend,
            request_timeout: llm.timeouts.request(),
            stream_idle: llm.timeouts.stream_idle(),
            usage: TokenUsage::new(),
        }
    }

    async fn create(&self, request: CreateChatCompletionRequest) -> Result<CreateChatCompletionResponse, LlmError> {
        let result = match &self.backend {
            Backend::OpenAi(client) => client.chat().create(request).await,
            Backend::Azure(client) => client.chat().create(request).await,
        };
        result.map_err(|e| LlmError::Api(e.to_string()))
    }

    async fn create_stream(&self, request: CreateChatCompletionRequest) -> Result<DeltaStream, LlmError> {
        match &self.backend {
            Backend::OpenAi(client) => {
                let inner = client
                    .chat()
                    .create_stream(request)
                    .await
                    .map_err(|e| LlmError::Api(e.to_string()))?;
                Ok(bridge_stream(inner, self.stream_idle, self.usage.clone()))
            }
            Backend::Azure(client) => {
                let inner = client
                    .chat()
                    .create_stream(request)
                    .await
                    .map_err(|e| LlmError::Api(e.to_string()))?;
                Ok(bridge_stream(inner, self.stream_idle, self.usage.clone()))
            }
        }
    }
}

/// 将 async_openai 的片段流转为 DeltaStream：每个片段都受空闲超时约束，出错后流即结束
fn bridge_stream<S, E>(inner: S, idle: Duration, usage: TokenUsage) -> DeltaStream
where
    S: Stream<Item = Result<CreateChatCompletionStreamResponse, E>> + Send + Unpin + 'static,
    E: std::fmt::Display,
{
    let deltas = stream::unfold(Some(inner), move |state| {
        let usage = usage.clone();
        async move {
            let mut inner = state?;
            match tokio::time::timeout(idle, inner.next()).await {
                Err(_) => Some((Err(LlmError::Timeout(idle.as_secs())), None)),
                Ok(None) => None,
                Ok(Some(Err(e))) => Some((Err(LlmError::Stream(e.to_string())), None)),
                Ok(Some(Ok(chunk))) => {
                    let delta = wire::from_chunk(chunk);
                    if let Some(u) = delta.usage {
                        usage.record(u);
                    }
                    Some((Ok(delta), Some(inner)))
                }
            }
        }
    });
    Box::pin(deltas)
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, request: ChatRequest) -> Result<AssistantReply, LlmError> {
        let body = wire::build_request(&request, false)?;
        debug!(model = %request.model, messages = request.messages.len(), tools = request.tools.len(), "chat completion");

        let response = tokio::time::timeout(self.request_timeout, self.create(body))
            .await
            .map_err(|_| LlmError::Timeout(self.request_timeout.as_secs()))??;

        let (reply, usage) = wire::from_response(response)?;
        if let Some(u) = usage {
            self.usage.record(u);
        }
        Ok(reply)
    }

    async fn complete_stream(&self, request: ChatRequest) -> Result<DeltaStream, LlmError> {
        let body = wire::build_request(&request, true)?;
        debug!(model = %request.model, messages = request.messages.len(), "streaming chat completion");

        tokio::time::timeout(self.request_timeout, self.create_stream(body))
            .await
            .map_err(|_| LlmError::Timeout(self.request_timeout.as_secs()))?
    }
}
