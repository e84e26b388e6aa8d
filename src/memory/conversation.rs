//! 短期记忆：单个聊天会话的对话状态
//!
//! 历史只追加、不重排、不删除：创建时写入唯一一条 system 消息，之后每个阶段的消息按顺序追加。
//! 同时持有当前模型配置与最近一次抽取成功的行程（整体替换，不做合并）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::ChatError;
use crate::memory::Itinerary;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// assistant 消息中的一次工具调用请求；arguments 为提供方给出的原始 JSON 文本
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// 仅 tool 消息：所回应的调用 id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// 带工具调用请求的 assistant 消息（content 可为空）
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, content)
        }
    }

    /// 工具结果消息，必须带上所回应的调用 id
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }
}

/// 会话使用的模型：模型名 + 固定的 system prompt
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelProfile {
    pub name: String,
    pub system_prompt: String,
}

/// 对话状态：有序历史、模型配置、当前行程
#[derive(Clone, Debug)]
pub struct Conversation {
    id: String,
    model: ModelProfile,
    messages: Vec<Message>,
    itinerary: Option<Itinerary>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, model: ModelProfile) -> Self {
        let seed = Message::system(model.system_prompt.clone());
        Self {
            id: id.into(),
            model,
            messages: vec![seed],
            itinerary: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model(&self) -> &ModelProfile {
        &self.model
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn itinerary(&self) -> Option<&Itinerary> {
        self.itinerary.as_ref()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// 追加一条消息。system 只能出现在开头；tool 消息必须回应此前某条 assistant 消息中的调用 id。
    pub fn push(&mut self, message: Message) -> Result<(), ChatError> {
        match message.role {
            Role::System => {
                return Err(ChatError::Integrity(
                    "system message may only seed the conversation".to_string(),
                ));
            }
            Role::Tool => {
                let call_id = message.tool_call_id.as_deref().ok_or_else(|| {
                    ChatError::Integrity("tool message without tool_call_id".to_string())
                })?;
                if !self.has_tool_call(call_id) {
                    return Err(ChatError::Integrity(format!(
                        "tool result for unknown call id: {call_id}"
                    )));
                }
            }
            Role::User | Role::Assistant => {}
        }
        self.messages.push(message);
        Ok(())
    }

    /// 整体替换行程（只在抽取并校验成功后调用）
    pub fn replace_itinerary(&mut self, itinerary: Itinerary) {
        self.itinerary = Some(itinerary);
    }

    fn has_tool_call(&self, call_id: &str) -> bool {
        self.messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .flat_map(|m| m.tool_calls.iter())
            .any(|c| c.id == call_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> ModelProfile {
        ModelProfile {
            name: "gpt-4o-mini".to_string(),
            system_prompt: "You plan trips.".to_string(),
        }
    }

    fn call(id: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_string(),
            name: "get_geocode_data".to_string(),
            arguments: "{}".to_string(),
        }
    }

    #[test]
    fn test_new_conversation_is_seeded_with_system_prompt() {
        let conv = Conversation::new("c1", profile());
        assert_eq!(conv.len(), 1);
        assert_eq!(conv.messages()[0].role, Role::System);
        assert_eq!(conv.messages()[0].content, "You plan trips.");
        assert!(conv.itinerary().is_none());
    }

    #[test]
    fn test_second_system_message_is_rejected() {
        let mut conv = Conversation::new("c1", profile());
        let err = conv.push(Message::system("again")).unwrap_err();
        assert!(matches!(err, ChatError::Integrity(_)));
        assert_eq!(conv.len(), 1);
    }

    #[test]
    fn test_tool_message_must_reference_earlier_call() {
        let mut conv = Conversation::new("c1", profile());
        conv.push(Message::user("Paris for 2 days")).unwrap();
        assert!(conv.push(Message::tool("call_1", "[]")).is_err());

        conv.push(Message::assistant_with_tools("", vec![call("call_1")]))
            .unwrap();
        conv.push(Message::tool("call_1", "[]")).unwrap();
        assert_eq!(conv.len(), 4);
        assert_eq!(conv.messages()[3].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_message_serializes_without_empty_tool_fields() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "hi");
        assert!(json.get("tool_calls").is_none());
        assert!(json.get("tool_call_id").is_none());
        assert!(json.get("created_at").is_some());
    }
}
