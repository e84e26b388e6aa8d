//! 记忆层：单个聊天的对话状态与结构化行程

pub mod conversation;
pub mod itinerary;

pub use conversation::{Conversation, Message, ModelProfile, Role, ToolCallRequest};
pub use itinerary::{DayItem, DayPlan, Itinerary, ItineraryError};
