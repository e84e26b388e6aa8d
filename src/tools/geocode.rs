//! 地理编码工具：批量把地点描述转成经纬度
//!
//! 每个描述发一次 GET（Nominatim 兼容的结构化查询，只带非空字段，format=json），带超时与固定 User-Agent。
//! 描述按顺序查询；单个描述失败只在结果数组里记一条 {"error", "location"}，不影响其余描述。
//! 没有 amenity 时只保留第一条匹配，有 amenity 时保留全部匹配。

use async_trait::async_trait;
use reqwest::Client;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::GeocodeSection;
use crate::tools::schema::schema_for_type;
use crate::tools::{Tool, ToolError};

pub const GET_GEOCODE_DATA: &str = "get_geocode_data";

/// 工具参数
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GeocodeArgs {
    /// Array of location objects to geocode
    pub locations: Vec<LocationQuery>,
}

/// 单个地点描述
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct LocationQuery {
    /// Optional: specific venue or building
    #[serde(default)]
    pub amenity: Option<String>,
    /// Optional: street address
    #[serde(default)]
    pub street: Option<String>,
    pub city: String,
    /// Optional: state/province
    #[serde(default)]
    pub state: Option<String>,
    pub country: String,
}

impl LocationQuery {
    fn fields(&self) -> [(&'static str, &str); 5] {
        [
            ("amenity", self.amenity.as_deref().unwrap_or_default()),
            ("street", self.street.as_deref().unwrap_or_default()),
            ("city", self.city.as_str()),
            ("state", self.state.as_deref().unwrap_or_default()),
            ("country", self.country.as_str()),
        ]
    }

    /// 查询参数：format=json 加上所有非空字段
    pub fn query_params(&self) -> Vec<(&'static str, &str)> {
        let mut params = vec![("format", "json")];
        params.extend(self.fields().into_iter().filter(|(_, v)| !v.trim().is_empty()));
        params
    }

    /// 失败条目里的 location：非空字段以空格连接
    pub fn label(&self) -> String {
        self.fields()
            .iter()
            .map(|(_, v)| v.trim())
            .filter(|v| !v.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn has_amenity(&self) -> bool {
        self.amenity.as_deref().is_some_and(|a| !a.trim().is_empty())
    }
}

/// 一条匹配结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoPlace {
    pub display_name: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub importance: Option<f64>,
}

/// 结果数组中的一项
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GeocodeEntry {
    Place(GeoPlace),
    Failed { error: String, location: String },
}

/// 服务端返回的原始条目；lat / lon 在 Nominatim 中是字符串
#[derive(Deserialize)]
struct RawPlace {
    #[serde(default)]
    display_name: String,
    lat: Value,
    lon: Value,
    #[serde(default, alias = "category")]
    class: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    importance: Option<f64>,
}

fn coordinate(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl RawPlace {
    fn into_place(self) -> Option<GeoPlace> {
        Some(GeoPlace {
            lat: coordinate(&self.lat)?,
            lon: coordinate(&self.lon)?,
            display_name: self.display_name,
            category: self.class,
            kind: self.kind,
            importance: self.importance,
        })
    }
}

/// Geocode 工具：base_url / User-Agent / 超时由配置决定
pub struct GeocodeTool {
    client: Client,
    base_url: String,
}

impl GeocodeTool {
    pub fn new(config: &GeocodeSection) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: config.base_url.clone(),
        }
    }

    /// 查询单个描述
    pub async fn lookup(&self, query: &LocationQuery) -> Result<Vec<GeoPlace>, ToolError> {
        let resp = self
            .client
            .get(&self.base_url)
            .query(&query.query_params())
            .send()
            .await
            .map_err(|e| ToolError::Upstream(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ToolError::Upstream(format!("unexpected status {}", status.as_u16())));
        }

        let raw: Vec<RawPlace> = resp
            .json()
            .await
            .map_err(|e| ToolError::Upstream(format!("invalid response: {e}")))?;
        let mut places: Vec<GeoPlace> = raw.into_iter().filter_map(RawPlace::into_place).collect();
        if places.is_empty() {
            return Err(ToolError::Upstream("no results".to_string()));
        }
        if !query.has_amenity() {
            places.truncate(1);
        }
        Ok(places)
    }

    /// 按顺序查询一批描述，得到扁平的结果数组
    pub async fn lookup_all(&self, queries: &[LocationQuery]) -> Vec<GeocodeEntry> {
        let mut entries = Vec::with_capacity(queries.len());
        for query in queries {
            match self.lookup(query).await {
                Ok(places) => {
                    debug!(location = %query.label(), matches = places.len(), "geocoded");
                    entries.extend(places.into_iter().map(GeocodeEntry::Place));
                }
                Err(e) => {
                    warn!(location = %query.label(), error = %e, "geocode lookup failed");
                    entries.push(GeocodeEntry::Failed {
                        error: e.to_string(),
                        location: query.label(),
                    });
                }
            }
        }
        entries
    }
}

#[async_trait]
impl Tool for GeocodeTool {
    fn name(&self) -> &str {
        GET_GEOCODE_DATA
    }

    fn description(&self) -> &str {
        "Convert multiple place names to latitude/longitude in a single batch call. Pass an array of location objects."
    }

    fn parameters_schema(&self) -> Value {
        schema_for_type::<GeocodeArgs>()
    }

    async fn call(&self, arguments: &str) -> Result<Value, ToolError> {
        let args: GeocodeArgs =
            serde_json::from_str(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        if args.locations.is_empty() {
            return Err(ToolError::InvalidArguments("locations must not be empty".to_string()));
        }
        let entries = self.lookup_all(&args.locations).await;
        serde_json::to_value(entries).map_err(|e| ToolError::Upstream(e.to_string()))
    }
}
