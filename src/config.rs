//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `STAGEHAND__*` 覆盖（双下划线表示嵌套，如 `STAGEHAND__SERVER__TRANSPORT=stdio`）。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub bridge: BridgeSection,
    pub agent: AgentSection,
    /// 模型名 -> 单价；未列出的模型视为不计价
    pub pricing: HashMap<String, ModelPrice>,
}

impl AppConfig {
    /// 定价表：配置为空时使用内置默认表
    pub fn pricing_table(&self) -> HashMap<String, ModelPrice> {
        if self.pricing.is_empty() {
            default_pricing()
        } else {
            self.pricing.clone()
        }
    }
}

/// 传输方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Tcp,
    Stdio,
}

/// [server] 段：服务身份、协议版本、监听地址、工具超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
    pub transport: Transport,
    pub bind_addr: String,
    /// 单次 tools/call 超时（秒）
    pub tool_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            name: "stagehand".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: "2024-11-05".to_string(),
            transport: Transport::Tcp,
            bind_addr: "127.0.0.1:8765".to_string(),
            tool_timeout_secs: 30,
        }
    }
}

/// [bridge] 段：主线程每回合批量上限、后台线程空闲休眠、模拟宿主 tick 间隔、关闭时 join 超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeSection {
    pub main_batch_size: usize,
    pub background_idle_ms: u64,
    pub tick_interval_ms: u64,
    pub join_timeout_ms: u64,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            main_batch_size: 10,
            background_idle_ms: 5,
            tick_interval_ms: 16,
            join_timeout_ms: 2000,
        }
    }
}

/// [agent] 段：记忆容量、上下文组装、规划估算
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub short_term_capacity: usize,
    pub long_term_capacity: usize,
    /// 短期记忆访问次数超过该值才进入上下文
    pub access_threshold: u32,
    pub max_relevant_memories: usize,
    pub recent_actions: usize,
    pub chars_per_token: usize,
    pub tokens_per_step: u64,
    /// 规划使用的模型
    pub model: String,
    /// 单个目标允许的最大调整次数
    pub max_adaptations: usize,
    /// 额外的规划模板文件（TOML），追加在内置模板之后
    pub templates_file: Option<PathBuf>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            short_term_capacity: 50,
            long_term_capacity: 100,
            access_threshold: 2,
            max_relevant_memories: 5,
            recent_actions: 10,
            chars_per_token: 4,
            tokens_per_step: 500,
            model: "gpt-4o-mini".to_string(),
            max_adaptations: 3,
            templates_file: None,
        }
    }
}

/// [pricing.<model>]：每千 token 单价（美元）
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Default)]
pub struct ModelPrice {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl ModelPrice {
    pub fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }
}

fn default_pricing() -> HashMap<String, ModelPrice> {
    [
        ("gpt-4o", ModelPrice::new(0.0025, 0.01)),
        ("gpt-4o-mini", ModelPrice::new(0.00015, 0.0006)),
        ("claude-3-5-sonnet", ModelPrice::new(0.003, 0.015)),
        ("claude-3-haiku", ModelPrice::new(0.00025, 0.00125)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// 从 config 目录加载配置，环境变量 STAGEHAND__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 STAGEHAND__*（双下划线表示嵌套键）
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
        } else {
            tracing::warn!(path = %path.display(), "config file not found, ignored");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("STAGEHAND")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
