pub mod executor;
pub mod geocode;
pub mod registry;
pub mod schema;

pub use executor::ToolExecutor;
pub use geocode::{GeoPlace, GeocodeArgs, GeocodeEntry, GeocodeTool, LocationQuery, GET_GEOCODE_DATA};
pub use registry::{Tool, ToolError, ToolOutcome, ToolRegistry, ToolSpec};
pub use schema::{save_itinerary_spec, schema_for_type, SAVE_ITINERARY};

use crate::config::ToolsSection;

/// 按配置注册全部工具并包装成执行器
pub fn create_tool_executor(config: &ToolsSection) -> ToolExecutor {
    let mut registry = ToolRegistry::new();
    registry.register(GeocodeTool::new(&config.geocode));
    ToolExecutor::new(registry, config.tool_timeout_secs, config.max_concurrent)
}
