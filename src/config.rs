//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DRILL__*` 覆盖（双下划线表示嵌套，如 `DRILL__LLM__MODEL=gpt-4o`）。
//! 所有字段都有默认值，空配置也可启动（此时推理走 Mock，平台走内存实现）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub reasoning: ReasoningSection,
    pub dispatch: DispatchSection,
    pub dedup: DedupSection,
    pub poller: PollerSection,
    pub slack: SlackSection,
    pub personas: Vec<PersonaEntry>,
    pub server: ServerSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// 场景定义目录，未设置时按默认位置查找
    pub scenarios_dir: Option<PathBuf>,
    /// 推理指令文件（markdown），不存在时用内置指令
    pub instructions_path: Option<PathBuf>,
    pub max_history: usize,
    pub apology_text: String,
    /// 发道歉消息的人设 id
    pub system_persona: String,
    /// 频道建好后发送预置消息前的等待（毫秒）
    pub settle_delay_ms: u64,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "drill".to_string(),
            scenarios_dir: None,
            instructions_path: None,
            max_history: 20,
            apology_text: "Sorry, I'm having trouble responding right now. Please send your message again."
                .to_string(),
            system_persona: "system".to_string(),
            settle_delay_ms: 2000,
        }
    }
}

/// [llm] 段：OpenAI 兼容后端
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub base_url: Option<String>,
    pub model: String,
    /// 存放 API Key 的环境变量名；变量为空时使用 Mock 客户端
    pub api_key_env: String,
    /// 是否以 strict 模式提交 JSON Schema
    pub strict_schema: bool,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: None,
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            strict_schema: false,
        }
    }
}

/// [reasoning] 段：重试与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReasoningSection {
    /// 总尝试次数（含首次）
    pub max_attempts: u32,
    /// 指数退避基数（毫秒）
    pub base_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for ReasoningSection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            request_timeout_secs: 30,
        }
    }
}

impl ReasoningSection {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// [dispatch] 段：人设投递的频道校验 / 发送重试（线性退避）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchSection {
    pub attempts: u32,
    pub backoff_step_ms: u64,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_step_ms: 1000,
        }
    }
}

/// [dedup] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupSection {
    pub retention_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for DedupSection {
    fn default() -> Self {
        Self {
            retention_secs: 60,
            sweep_interval_secs: 30,
        }
    }
}

/// [poller] 段：兜底轮询
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollerSection {
    pub enabled: bool,
    pub interval_secs: u64,
    pub channels_per_tick: usize,
    pub fetch_limit: usize,
}

impl Default for PollerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 5,
            channels_per_tick: 3,
            fetch_limit: 5,
        }
    }
}

/// [slack] 段：管理 token 用于查用户、开通 / 归档频道与轮询
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SlackSection {
    pub base_url: Option<String>,
    pub bot_token_env: String,
    pub channel_prefix: String,
}

impl Default for SlackSection {
    fn default() -> Self {
        Self {
            base_url: None,
            bot_token_env: "SLACK_BOT_TOKEN".to_string(),
            channel_prefix: "drill".to_string(),
        }
    }
}

/// [[personas]]：每个人设是独立的 bot 身份
#[derive(Debug, Clone, Deserialize)]
pub struct PersonaEntry {
    pub id: String,
    #[serde(default)]
    pub role: String,
    /// 存放该人设 bot token 的环境变量名；未设置时复用管理 token
    pub token_env: Option<String>,
}

/// [server] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// 从 config 目录加载配置，环境变量 DRILL__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DRILL__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("DRILL")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
