//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `KAIYO__*` 覆盖（双下划线表示嵌套，如 `KAIYO__LLM__PROVIDER=azure`）。
//! 每个字段都有默认值，空配置也能启动。API Key 只从环境变量读取，不写进配置文件。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 内置 system prompt；配置与 config/prompts/system.md 都没有时使用
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Kaiyo, a travel planning assistant. \
Help the user plan trips day by day. Use the get_geocode_data tool to look up coordinates \
for the places you recommend. Keep answers concise and well structured.";

const DEFAULT_NARRATION_INSTRUCTION: &str = "Using the information gathered so far, write your \
final answer to the user as a clear day-by-day travel plan. Do not call any tools.";

const DEFAULT_EXTRACTION_INSTRUCTION: &str = "If the conversation now contains a finalized \
itinerary, call save_itinerary with it, including coordinates for places you geocoded. \
Otherwise reply with a short acknowledgement and do not call any tool.";

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub server: ServerSection,
    pub llm: LlmSection,
    pub chat: ChatSection,
    pub tools: ToolsSection,
}

/// [app] 段：应用名与默认日志级别（RUST_LOG 优先）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    pub log_level: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "kaiyo".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// [server] 段：监听地址与流式输出
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// 片段通道容量（有界）
    pub stream_buffer: usize,
    /// 规划被截断时，在流末尾追加一个 SSE 注释帧
    pub surface_planning_cutoff: bool,
    /// 对话空闲多少秒后被清理，0 表示永不清理
    pub session_idle_secs: u64,
    /// 清扫间隔（秒）
    pub session_sweep_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            stream_buffer: 16,
            surface_planning_cutoff: false,
            session_idle_secs: 3600,
            session_sweep_secs: 60,
        }
    }
}

impl ServerSection {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 对话空闲阈值；未启用清理时为 None
    pub fn session_idle(&self) -> Option<Duration> {
        (self.session_idle_secs > 0).then(|| Duration::from_secs(self.session_idle_secs))
    }

    pub fn session_sweep(&self) -> Duration {
        Duration::from_secs(self.session_sweep_secs.max(1))
    }
}

/// [llm] 段：后端选择、模型与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / azure / mock
    pub provider: String,
    pub model: String,
    /// OpenAI 兼容端点，空字符串表示官方地址
    pub base_url: Option<String>,
    pub system_prompt: Option<String>,
    pub azure: AzureSection,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            system_prompt: None,
            azure: AzureSection::default(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

impl LlmSection {
    /// system prompt：配置 > config/prompts/system.md > 内置
    pub fn resolve_system_prompt(&self) -> String {
        if let Some(prompt) = self.system_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            return prompt.to_string();
        }
        ["config/prompts/system.md", "../config/prompts/system.md"]
            .iter()
            .find_map(|path| std::fs::read_to_string(path).ok())
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref().filter(|u| !u.is_empty())
    }
}

/// [llm.azure] 段：Azure OpenAI 部署
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AzureSection {
    pub endpoint: String,
    pub api_version: String,
    /// 为空时使用 [llm].model 作为部署名
    pub deployment: String,
}

impl Default for AzureSection {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_version: "2024-08-01-preview".to_string(),
            deployment: String::new(),
        }
    }
}

/// [llm.timeouts] 段（秒）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次非流式调用
    pub request: u64,
    /// 两个流式片段之间允许的最长间隔
    pub stream_idle: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: 60,
            stream_idle: 120,
        }
    }
}

impl LlmTimeoutsSection {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request)
    }

    pub fn stream_idle(&self) -> Duration {
        Duration::from_secs(self.stream_idle)
    }
}

/// [chat] 段：回合编排参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatSection {
    /// 规划阶段最多调用几次 LLM（最小 1）
    pub max_planning_iterations: usize,
    pub narration_instruction: String,
    pub extraction_instruction: String,
}

impl Default for ChatSection {
    fn default() -> Self {
        Self {
            max_planning_iterations: 3,
            narration_instruction: DEFAULT_NARRATION_INSTRUCTION.to_string(),
            extraction_instruction: DEFAULT_EXTRACTION_INSTRUCTION.to_string(),
        }
    }
}

/// [tools] 段：工具超时与并发
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    /// 同一批工具调用的最大并发
    pub max_concurrent: usize,
    pub geocode: GeocodeSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            max_concurrent: 3,
            geocode: GeocodeSection::default(),
        }
    }
}

/// [tools.geocode] 段：Nominatim 兼容的搜索接口
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeocodeSection {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for GeocodeSection {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org/search".to_string(),
            user_agent: "kaiyo-ai/1.0".to_string(),
            timeout_secs: 15,
        }
    }
}

/// 从 config 目录加载配置，环境变量 KAIYO__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 KAIYO__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("KAIYO")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
