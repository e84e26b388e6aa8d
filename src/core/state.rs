//! 回合状态：阶段枚举与回合统计
//!
//! 每个回合都从 Idle 开始：Idle → Planning → Narrating → Extracting → Idle。

use std::fmt;

use serde::Serialize;

/// 回合所处阶段（日志与错误中使用）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnPhase {
    Idle,
    Planning,
    Narrating,
    Extracting,
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnPhase::Idle => "idle",
            TurnPhase::Planning => "planning",
            TurnPhase::Narrating => "narrating",
            TurnPhase::Extracting => "extracting",
        };
        f.write_str(name)
    }
}

/// Planning 阶段结果
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlanningReport {
    /// 实际发起的规划调用次数（≥1，≤上限）
    pub iterations: usize,
    /// 分发的工具调用总数
    pub tool_calls: usize,
    /// 迭代预算用尽时模型仍在请求工具
    pub cutoff: bool,
}

/// Narrating 阶段结果
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NarrationReport {
    /// 已转发给客户端的字符数
    pub chars: usize,
    /// 转发的片段数
    pub fragments: usize,
}

/// Extracting 阶段结果；任何一种都不会影响客户端已收到的回复
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExtractionOutcome {
    /// 解析并校验成功，行程已整体替换
    Updated,
    /// 模型没有调用抽取工具
    NoToolCall,
    /// 参数无法解析或未通过校验，保留原行程
    Rejected(String),
    /// 抽取调用本身失败
    ProviderFailed(String),
    /// 回合已取消，跳过抽取
    Skipped,
}

impl ExtractionOutcome {
    pub fn updated(&self) -> bool {
        matches!(self, ExtractionOutcome::Updated)
    }
}

/// 客户端可见部分（Planning + Narrating）的统计
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplyReport {
    pub planning: PlanningReport,
    pub narration: NarrationReport,
}

/// 一个完整回合的统计
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnReport {
    pub planning: PlanningReport,
    pub narration: NarrationReport,
    pub extraction: ExtractionOutcome,
}
