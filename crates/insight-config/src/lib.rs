use serde::{Deserialize, Serialize};
use thiserror::Error;

const CONFIG_SCHEMA: &str = include_str!("../../../config/config.schema.json");

pub const ENV_BASE_URL: &str = "INSIGHT_LLM_BASE_URL";
pub const ENV_MODEL: &str = "INSIGHT_LLM_MODEL";
pub const ENV_MAX_TOKENS: &str = "INSIGHT_LLM_MAX_TOKENS";
pub const ENV_DIGEST_CACHE_TTL_MS: &str = "INSIGHT_DIGEST_CACHE_TTL_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Read(String),
    #[error("parse config failed: {0}")]
    Parse(String),
    #[error("schema load failed: {0}")]
    SchemaLoad(String),
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: Server,
    #[serde(default)]
    pub llm: Llm,
    #[serde(default)]
    pub cache: Cache,
    #[serde(default)]
    pub prompt: Prompt,
    #[serde(default)]
    pub invocation_log: InvocationLog,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Llm {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Resolved from `api_key_env`; never read from or written to the file.
    #[serde(skip)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cache {
    #[serde(default = "default_digest_ttl_ms")]
    pub digest_ttl_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationLog {
    #[serde(default = "default_sink")]
    pub sink: String,
    #[serde(default)]
    pub jsonl_path: Option<String>,
    #[serde(default)]
    pub sqlite_path: Option<String>,
}

impl Default for Llm {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            timeout_ms: default_timeout_ms(),
            api_key_env: default_api_key_env(),
            api_key: None,
        }
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            digest_ttl_ms: default_digest_ttl_ms(),
        }
    }
}

impl Default for Prompt {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
        }
    }
}

impl Default for InvocationLog {
    fn default() -> Self {
        Self {
            sink: default_sink(),
            jsonl_path: None,
            sqlite_path: None,
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    700
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_api_key_env() -> String {
    "INSIGHT_LLM_API_KEY".to_string()
}

fn default_digest_ttl_ms() -> u64 {
    5 * 60 * 1000
}

fn default_max_items() -> usize {
    5
}

fn default_sink() -> String {
    "none".to_string()
}

pub fn load_and_validate(path: &str) -> Result<Config, ConfigError> {
    load_with_env(path, |key| std::env::var(key).ok())
}

pub fn load_with_env<F>(path: &str, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let config_text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&config_text).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let instance = serde_json::to_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_against_schema(&instance)?;

    let mut cfg: Config =
        serde_json::from_value(instance).map_err(|e| ConfigError::Parse(e.to_string()))?;
    apply_env_overrides(&mut cfg, lookup)?;
    validate_runtime_support(&cfg)?;
    Ok(cfg)
}

/// Environment wins over the file. Blank values are treated as unset.
pub fn apply_env_overrides<F>(cfg: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    cfg.llm.api_key = get(&cfg.llm.api_key_env);
    if let Some(v) = get(ENV_BASE_URL) {
        cfg.llm.base_url = v;
    }
    if let Some(v) = get(ENV_MODEL) {
        cfg.llm.model = v;
    }
    if let Some(v) = get(ENV_MAX_TOKENS) {
        cfg.llm.max_tokens = v
            .trim()
            .parse()
            .map_err(|e| ConfigError::Parse(format!("{ENV_MAX_TOKENS}={v}: {e}")))?;
    }
    if let Some(v) = get(ENV_DIGEST_CACHE_TTL_MS) {
        cfg.cache.digest_ttl_ms = v
            .trim()
            .parse()
            .map_err(|e| ConfigError::Parse(format!("{ENV_DIGEST_CACHE_TTL_MS}={v}: {e}")))?;
    }
    Ok(())
}

fn validate_against_schema(instance: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(CONFIG_SCHEMA).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;

    let validator =
        jsonschema::validator_for(&schema).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    if let Err(first) = validator.validate(instance) {
        return Err(ConfigError::SchemaValidation(first.to_string()));
    }
    Ok(())
}

fn validate_runtime_support(cfg: &Config) -> Result<(), ConfigError> {
    let base_url = cfg.llm.base_url.trim();
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(ConfigError::UnsupportedConfig(format!(
            "llm.base_url={} must be an http(s) URL",
            cfg.llm.base_url
        )));
    }
    if cfg.llm.model.trim().is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "llm.model must not be empty".to_string(),
        ));
    }
    if cfg.llm.max_tokens == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "llm.max_tokens must be >= 1".to_string(),
        ));
    }
    if cfg.llm.timeout_ms == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "llm.timeout_ms must be >= 1".to_string(),
        ));
    }
    if cfg.prompt.max_items == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "prompt.max_items must be >= 1".to_string(),
        ));
    }
    match cfg.invocation_log.sink.as_str() {
        "none" | "jsonl" | "sqlite" => {}
        other => {
            return Err(ConfigError::UnsupportedConfig(format!(
                "invocation_log.sink={other} is not implemented; supported: none, jsonl, sqlite"
            )))
        }
    }
    Ok(())
}
