//! 工具参数 JSON Schema 生成（schemars 自动生成）
//!
//! 子 schema 全部内联（draft-07，无 $ref），便于提供方直接使用；
//! save_itinerary 的参数即 Itinerary 类型本身。

use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde_json::Value;

use crate::memory::Itinerary;
use crate::tools::ToolSpec;

/// 抽取阶段唯一提供的工具名
pub const SAVE_ITINERARY: &str = "save_itinerary";

/// 生成类型 T 的内联 JSON Schema（去掉 $schema / title 等元信息）
pub fn schema_for_type<T: JsonSchema>() -> Value {
    let generator = SchemaSettings::draft07()
        .with(|s| s.inline_subschemas = true)
        .into_generator();
    let root = generator.into_root_schema_for::<T>();
    let mut value = serde_json::to_value(root).unwrap_or_else(|_| serde_json::json!({"type": "object"}));
    if let Some(map) = value.as_object_mut() {
        map.remove("$schema");
        map.remove("title");
        map.remove("definitions");
    }
    value
}

/// save_itinerary 工具签名
pub fn save_itinerary_spec() -> ToolSpec {
    ToolSpec {
        name: SAVE_ITINERARY.to_string(),
        description: "Call this ONLY when a finalized itinerary is ready.".to_string(),
        parameters: schema_for_type::<Itinerary>(),
    }
}
