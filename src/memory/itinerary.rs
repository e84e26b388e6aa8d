//! 结构化行程：抽取阶段 save_itinerary 工具的参数类型
//!
//! JSON 字段使用 camelCase（startDate / startTime 等），与前端一致。
//! 解析成功后还要通过 validate：至少一天、day 从 1 开始、标题与目的地非空。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 行程
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Itinerary {
    /// 目的地，如 "Coorg"
    pub destination: String,
    /// ISO 日期，如 "2025-11-01"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    /// 货币代码，如 "INR"、"USD"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// 按天的安排
    #[schemars(length(min = 1))]
    pub days: Vec<DayPlan>,
}

/// 某一天的安排
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DayPlan {
    /// 从 1 开始的天序号
    #[schemars(range(min = 1))]
    pub day: u32,
    /// 可选标签，如 "Arrival"、"Trek day"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub items: Vec<DayItem>,
}

/// 当天的一个活动 / 停留点
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DayItem {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    /// 景点 / POI 名称
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place: Option<String>,
    /// 如 "sightseeing"、"food"、"trek"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// "09:00"（24 小时制）或 ISO 时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
}

/// 行程解析 / 校验错误
#[derive(Error, Debug)]
pub enum ItineraryError {
    #[error("Malformed itinerary payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid itinerary: {0}")]
    Invalid(String),
}

impl Itinerary {
    /// 从工具调用的原始参数文本解析并校验
    pub fn from_arguments(arguments: &str) -> Result<Self, ItineraryError> {
        let itinerary: Itinerary = serde_json::from_str(arguments)?;
        itinerary.validate()?;
        Ok(itinerary)
    }

    pub fn validate(&self) -> Result<(), ItineraryError> {
        if self.destination.trim().is_empty() {
            return Err(ItineraryError::Invalid("destination is empty".to_string()));
        }
        if self.days.is_empty() {
            return Err(ItineraryError::Invalid("itinerary has no days".to_string()));
        }
        for plan in &self.days {
            if plan.day < 1 {
                return Err(ItineraryError::Invalid(format!(
                    "day index must start at 1, got {}",
                    plan.day
                )));
            }
            if plan.items.iter().any(|item| item.title.trim().is_empty()) {
                return Err(ItineraryError::Invalid(format!(
                    "day {} has an item without a title",
                    plan.day
                )));
            }
        }
        Ok(())
    }
}
