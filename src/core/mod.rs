//! 核心编排层：错误、回合状态、编排器、会话表、工具并发、优雅关闭

pub mod error;
pub mod orchestrator;
pub mod sessions;
pub mod shutdown;
pub mod state;
pub mod task_scheduler;

pub use error::ChatError;
pub use orchestrator::{should_extract, Orchestrator};
pub use sessions::{ChatSessions, ConversationHandle, DEFAULT_CHAT_ID};
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::{
    ExtractionOutcome, NarrationReport, PlanningReport, ReplyReport, TurnPhase, TurnReport,
};
pub use task_scheduler::TaskScheduler;
