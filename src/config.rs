//! Runtime configuration, read from the environment (and `.env`).

use crate::error::{NlqError, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.0,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    pub host: String,
    pub port: Option<u16>,
    pub user: String,
    pub password: String,
    pub secure: bool,
    pub database: Option<String>,
    pub timeout: Duration,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: None,
            user: "default".to_string(),
            password: String::new(),
            secure: false,
            database: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl ClickHouseConfig {
    /// Base URL of the HTTP interface. A host that already carries a scheme
    /// is used as-is; otherwise the scheme and default port follow `secure`.
    pub fn url(&self) -> String {
        let host = self.host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            return match self.port {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            };
        }
        let (scheme, default_port) = if self.secure { ("https", 8443) } else { ("http", 8123) };
        format!("{}://{}:{}", scheme, host, self.port.unwrap_or(default_port))
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub clickhouse: ClickHouseConfig,
    pub max_retries: u32,
    pub prompts_path: Option<PathBuf>,
    pub server_addr: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            clickhouse: ClickHouseConfig::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            prompts_path: None,
            server_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl AppConfig {
    /// Load `.env` (if present) and read the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup. Unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = AppConfig::default();

        let llm = LlmConfig {
            api_key: get("OPENAI_API_KEY").unwrap_or_default(),
            base_url: get("OPENAI_BASE_URL").unwrap_or(defaults.llm.base_url),
            model: get("OPENAI_MODEL").unwrap_or(defaults.llm.model),
            temperature: parse_opt("LLM_TEMPERATURE", get("LLM_TEMPERATURE"))?
                .unwrap_or(defaults.llm.temperature),
            timeout: parse_opt::<u64>("LLM_TIMEOUT_SECS", get("LLM_TIMEOUT_SECS"))?
                .map(Duration::from_secs)
                .unwrap_or(defaults.llm.timeout),
        };

        let clickhouse = ClickHouseConfig {
            host: get("CLICKHOUSE_HOST").unwrap_or(defaults.clickhouse.host),
            port: parse_opt("CLICKHOUSE_PORT", get("CLICKHOUSE_PORT"))?,
            user: get("CLICKHOUSE_USER").unwrap_or(defaults.clickhouse.user),
            password: get("CLICKHOUSE_PASSWORD").unwrap_or_default(),
            secure: get("CLICKHOUSE_SECURE")
                .map(|v| parse_bool("CLICKHOUSE_SECURE", &v))
                .transpose()?
                .unwrap_or(defaults.clickhouse.secure),
            database: get("CLICKHOUSE_DATABASE"),
            timeout: parse_opt::<u64>("CLICKHOUSE_TIMEOUT_SECS", get("CLICKHOUSE_TIMEOUT_SECS"))?
                .map(Duration::from_secs)
                .unwrap_or(defaults.clickhouse.timeout),
        };

        Ok(Self {
            llm,
            clickhouse,
            max_retries: parse_opt("NLQ_MAX_RETRIES", get("NLQ_MAX_RETRIES"))?
                .unwrap_or(defaults.max_retries),
            prompts_path: get("NLQ_PROMPTS_PATH").map(PathBuf::from),
            server_addr: get("SERVER_ADDR").unwrap_or(defaults.server_addr),
        })
    }
}

fn parse_opt<T: FromStr>(key: &str, value: Option<String>) -> Result<Option<T>> {
    value
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| NlqError::Config(format!("{} has an invalid value: '{}'", key, v)))
        })
        .transpose()
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(NlqError::Config(format!("{} has an invalid value: '{}'", key, value))),
    }
}
