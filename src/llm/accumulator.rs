//! 流式片段累加器
//!
//! 逐个吃进 StreamDelta：文本片段直接拼接（同时交给调用方转发），工具调用按 index 归并。
//! 流何时结束由调用方根据 complete_stream 的返回决定，累加器只负责拼装。

use std::collections::BTreeMap;

use crate::llm::{AssistantReply, StreamDelta, Usage};
use crate::memory::ToolCallRequest;

/// 正在拼装的工具调用
#[derive(Debug, Clone, Default)]
struct ToolCallState {
    id: String,
    name: String,
    args: String,
}

#[derive(Debug, Default)]
pub struct DeltaAccumulator {
    text: String,
    fragments: usize,
    tool_calls: BTreeMap<u32, ToolCallState>,
    usage: Option<Usage>,
}

impl DeltaAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 吃进一个片段，返回其中需要转发的非空文本
    pub fn push<'a>(&mut self, delta: &'a StreamDelta) -> Option<&'a str> {
        for call in &delta.tool_calls {
            let state = self.tool_calls.entry(call.index).or_default();
            if let Some(id) = call.id.as_deref().filter(|id| !id.is_empty()) {
                if state.id.is_empty() {
                    state.id = id.to_string();
                }
            }
            if let Some(name) = call.name.as_deref().filter(|n| !n.is_empty()) {
                if state.name.is_empty() {
                    state.name = name.to_string();
                }
            }
            if let Some(args) = call.arguments.as_deref() {
                state.args.push_str(args);
            }
        }
        if delta.usage.is_some() {
            self.usage = delta.usage;
        }

        let text = delta.content.as_deref().filter(|t| !t.is_empty())?;
        self.text.push_str(text);
        self.fragments += 1;
        Some(text)
    }

    /// 目前为止拼接出的文本
    pub fn text(&self) -> &str {
        &self.text
    }

    /// 非空文本片段数
    pub fn fragments(&self) -> usize {
        self.fragments
    }

    pub fn usage(&self) -> Option<Usage> {
        self.usage
    }

    /// 流结束后得到完整的 assistant 消息；缺少名称的工具调用片段被丢弃
    pub fn finish(self) -> AssistantReply {
        let tool_calls = self
            .tool_calls
            .into_values()
            .filter(|c| !c.name.is_empty())
            .map(|c| ToolCallRequest {
                id: c.id,
                name: c.name,
                arguments: c.args,
            })
            .collect();
        AssistantReply {
            content: self.text,
            tool_calls,
        }
    }
}
