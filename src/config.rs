//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PERICOPE__*` 覆盖（双下划线表示嵌套，如 `PERICOPE__LLM__MODEL=gpt-4o`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::llm::{CompletionOptions, RetryConfig};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub analysis: AnalysisSection,
    pub corpus: CorpusSection,
    pub store: StoreSection,
}

/// [llm] 段：后端选择、模型与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai（任意 OpenAI 兼容端点）/ mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 读取 API Key 的环境变量名
    pub api_key_env: String,
    pub temperature: f32,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.3,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

impl LlmSection {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次模型请求超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 120 }
    }
}

/// [analysis] 段：重试策略与各阶段 token 上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisSection {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub phase1_max_tokens: u32,
    pub phase2_max_tokens: u32,
    pub grouping_max_tokens: u32,
    /// 覆盖内置 system prompt 的目录（phase1.txt / phase2.txt / grouping.txt）
    pub prompts_dir: Option<PathBuf>,
}

impl Default for AnalysisSection {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 3000,
            phase1_max_tokens: 8000,
            phase2_max_tokens: 16000,
            grouping_max_tokens: 4000,
            prompts_dir: Some(PathBuf::from("config/prompts")),
        }
    }
}

impl AnalysisSection {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.max_retries, Duration::from_millis(self.base_delay_ms))
    }
}

/// 各调用点使用的模型参数
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseOptions {
    pub phase1: CompletionOptions,
    pub phase2: CompletionOptions,
    pub grouping: CompletionOptions,
}

impl Default for PhaseOptions {
    fn default() -> Self {
        AppConfig::default().phase_options()
    }
}

/// [corpus] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorpusSection {
    pub path: PathBuf,
}

impl Default for CorpusSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/clauses.json"),
        }
    }
}

/// [store] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub database_url: String,
    pub max_connections: u32,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            database_url: "sqlite:data/pericope.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

impl AppConfig {
    pub fn phase_options(&self) -> PhaseOptions {
        let base = CompletionOptions::default()
            .with_model(self.llm.model.clone())
            .with_temperature(self.llm.temperature);
        PhaseOptions {
            phase1: base.clone().with_max_tokens(self.analysis.phase1_max_tokens),
            phase2: base.clone().with_max_tokens(self.analysis.phase2_max_tokens),
            grouping: base.with_max_tokens(self.analysis.grouping_max_tokens),
        }
    }
}

/// 从 config 目录加载配置，环境变量 PERICOPE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PERICOPE__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("PERICOPE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
