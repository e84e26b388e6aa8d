//! 领域类型与 async-openai chat-completions 类型之间的转换
//!
//! 请求用 async-openai 的 *Args 构建器拼装；响应与流式片段直接读取其类型化字段。

use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionStreamOptions, ChatCompletionTool, ChatCompletionTools,
    CompletionUsage, CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    CreateChatCompletionStreamResponse, FunctionCall, FunctionObjectArgs,
};

use crate::llm::{AssistantReply, ChatRequest, LlmError, StreamDelta, ToolCallDelta, Usage};
use crate::memory::{Message, Role, ToolCallRequest};
use crate::tools::ToolSpec;

fn invalid_request(e: OpenAIError) -> LlmError {
    LlmError::InvalidRequest(e.to_string())
}

impl From<&CompletionUsage> for Usage {
    fn from(u: &CompletionUsage) -> Self {
        Usage {
            prompt_tokens: u64::from(u.prompt_tokens),
            completion_tokens: u64::from(u.completion_tokens),
        }
    }
}

/// 构建请求；stream 为 true 时要求提供方在最后一个片段附带 usage
pub fn build_request(request: &ChatRequest, stream: bool) -> Result<CreateChatCompletionRequest, LlmError> {
    let messages = request
        .messages
        .iter()
        .map(to_request_message)
        .collect::<Result<Vec<_>, _>>()?;

    let mut args = CreateChatCompletionRequestArgs::default();
    args.model(request.model.clone()).messages(messages);
    if !request.tools.is_empty() {
        let tools = request.tools.iter().map(to_tool).collect::<Result<Vec<_>, _>>()?;
        args.tools(tools);
    }
    if stream {
        args.stream(true).stream_options(ChatCompletionStreamOptions {
            include_usage: Some(true),
            include_obfuscation: None,
        });
    }
    args.build().map_err(invalid_request)
}

fn to_tool(spec: &ToolSpec) -> Result<ChatCompletionTools, LlmError> {
    let function = FunctionObjectArgs::default()
        .name(spec.name.clone())
        .description(spec.description.clone())
        .parameters(spec.parameters.clone())
        .build()
        .map_err(invalid_request)?;
    Ok(ChatCompletionTools::Function(ChatCompletionTool { function }))
}

fn to_request_message(message: &Message) -> Result<ChatCompletionRequestMessage, LlmError> {
    let built: ChatCompletionRequestMessage = match message.role {
        Role::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(message.content.clone())
            .build()
            .map_err(invalid_request)?
            .into(),
        Role::User => ChatCompletionRequestUserMessageArgs::default()
            .content(message.content.clone())
            .build()
            .map_err(invalid_request)?
            .into(),
        Role::Tool => ChatCompletionRequestToolMessageArgs::default()
            .content(message.content.clone())
            .tool_call_id(message.tool_call_id.clone().unwrap_or_default())
            .build()
            .map_err(invalid_request)?
            .into(),
        Role::Assistant => {
            let mut args = ChatCompletionRequestAssistantMessageArgs::default();
            // 带工具调用时 content 可以省略
            if message.tool_calls.is_empty() || !message.content.is_empty() {
                args.content(message.content.clone());
            }
            if !message.tool_calls.is_empty() {
                let calls: Vec<ChatCompletionMessageToolCalls> = message
                    .tool_calls
                    .iter()
                    .map(|c| {
                        ChatCompletionMessageToolCalls::Function(ChatCompletionMessageToolCall {
                            id: c.id.clone(),
                            function: FunctionCall {
                                name: c.name.clone(),
                                arguments: c.arguments.clone(),
                            },
                        })
                    })
                    .collect();
                args.tool_calls(calls);
            }
            args.build().map_err(invalid_request)?.into()
        }
    };
    Ok(built)
}

/// 读取非流式响应的第一个 choice
pub fn from_response(response: CreateChatCompletionResponse) -> Result<(AssistantReply, Option<Usage>), LlmError> {
    let usage = response.usage.as_ref().map(Usage::from);
    let message = response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| LlmError::InvalidResponse("response has no choices".to_string()))?;

    let tool_calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .filter_map(|call| match call {
            ChatCompletionMessageToolCalls::Function(call) => Some(ToolCallRequest {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            }),
            ChatCompletionMessageToolCalls::Custom(_) => None,
        })
        .collect();

    Ok((
        AssistantReply {
            content: message.content.unwrap_or_default(),
            tool_calls,
        },
        usage,
    ))
}

/// 读取一个流式片段；没有 choices 的片段（如只带 usage）得到空 delta
pub fn from_chunk(chunk: CreateChatCompletionStreamResponse) -> StreamDelta {
    let usage = chunk.usage.as_ref().map(Usage::from);
    let (content, tool_calls) = match chunk.choices.into_iter().next() {
        Some(choice) => {
            let calls = choice
                .delta
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|c| {
                    let (name, arguments) = match c.function {
                        Some(f) => (f.name, f.arguments),
                        None => (None, None),
                    };
                    ToolCallDelta {
                        index: c.index,
                        id: c.id,
                        name,
                        arguments,
                    }
                })
                .collect();
            (choice.delta.content, calls)
        }
        None => (None, Vec::new()),
    };

    StreamDelta {
        content,
        tool_calls,
        usage,
    }
}
