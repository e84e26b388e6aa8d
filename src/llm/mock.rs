//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! 按脚本依次返回预设回合（普通回复 / 工具调用 / 流式片段 / 失败），并记录每次调用；
//! 脚本耗尽后回显最后一条 User 消息。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};

use crate::llm::{AssistantReply, ChatRequest, DeltaStream, LlmClient, LlmError, StreamDelta};
use crate::memory::{Message, Role, ToolCallRequest};

/// 一次预设的提供方回合
#[derive(Debug, Clone)]
pub enum MockTurn {
    /// 非流式回复（可带工具调用）
    Reply(AssistantReply),
    /// 流式回复的文本片段
    Stream(Vec<String>),
    /// 先输出片段，随后流以错误结束
    StreamThenFail(Vec<String>, LlmError),
    /// 先输出片段，之后永远不结束（用于断开连接的场景）
    StreamThenHang(Vec<String>),
    /// 调用本身失败
    Fail(LlmError),
}

impl MockTurn {
    pub fn text(content: &str) -> Self {
        MockTurn::Reply(AssistantReply::text(content))
    }

    /// 单个工具调用的回复
    pub fn tool_call(id: &str, name: &str, arguments: &str) -> Self {
        Self::tool_calls(vec![(id, name, arguments)])
    }

    pub fn tool_calls(calls: Vec<(&str, &str, &str)>) -> Self {
        MockTurn::Reply(AssistantReply {
            content: String::new(),
            tool_calls: calls
                .into_iter()
                .map(|(id, name, arguments)| ToolCallRequest {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                })
                .collect(),
        })
    }

    pub fn stream(fragments: &[&str]) -> Self {
        MockTurn::Stream(fragments.iter().map(|f| f.to_string()).collect())
    }
}

/// 被记录下来的一次调用
#[derive(Debug, Clone)]
pub struct MockCall {
    pub streaming: bool,
    pub model: String,
    /// 本次调用提供给模型的工具名
    pub tools: Vec<String>,
    pub messages: Vec<Message>,
}

/// Mock 客户端：脚本化回合 + 调用记录
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<MockTurn>>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(turns: Vec<MockTurn>) -> Self {
        Self {
            script: Mutex::new(turns.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 目前为止的所有调用
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, request: &ChatRequest, streaming: bool) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(MockCall {
                streaming,
                model: request.model.clone(),
                tools: request.tools.iter().map(|t| t.name.clone()).collect(),
                messages: request.messages.clone(),
            });
        }
    }

    fn next_turn(&self) -> Option<MockTurn> {
        self.script.lock().ok().and_then(|mut s| s.pop_front())
    }

    fn echo(messages: &[Message]) -> String {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        format!("Echo from Mock: {last_user}")
    }
}

fn fragment_stream(fragments: Vec<String>) -> impl futures_util::Stream<Item = Result<StreamDelta, LlmError>> {
    stream::iter(fragments.into_iter().map(|f| Ok(StreamDelta::text(f))))
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: ChatRequest) -> Result<AssistantReply, LlmError> {
        self.record(&request, false);
        match self.next_turn() {
            Some(MockTurn::Reply(reply)) => Ok(reply),
            Some(MockTurn::Fail(err)) => Err(err),
            Some(MockTurn::Stream(fragments))
            | Some(MockTurn::StreamThenFail(fragments, _))
            | Some(MockTurn::StreamThenHang(fragments)) => Ok(AssistantReply::text(fragments.concat())),
            None => Ok(AssistantReply::text(Self::echo(&request.messages))),
        }
    }

    async fn complete_stream(&self, request: ChatRequest) -> Result<DeltaStream, LlmError> {
        self.record(&request, true);
        match self.next_turn() {
            Some(MockTurn::Stream(fragments)) => Ok(Box::pin(fragment_stream(fragments))),
            Some(MockTurn::StreamThenFail(fragments, err)) => Ok(Box::pin(
                fragment_stream(fragments).chain(stream::once(async move { Err(err) })),
            )),
            Some(MockTurn::StreamThenHang(fragments)) => {
                Ok(Box::pin(fragment_stream(fragments).chain(stream::pending())))
            }
            Some(MockTurn::Fail(err)) => Err(err),
            Some(MockTurn::Reply(reply)) => Ok(Box::pin(fragment_stream(vec![reply.content]))),
            None => {
                let echo = Self::echo(&request.messages);
                let words: Vec<String> = echo.split_inclusive(' ').map(String::from).collect();
                Ok(Box::pin(fragment_stream(words)))
            }
        }
    }
}
