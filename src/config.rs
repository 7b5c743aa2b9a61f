use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

fn default_max_file_size() -> usize {
    // 10 MB in bytes
    10 * 1024 * 1024
}

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_TTL_HOURS: u64 = 24;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60 * 60;
const DEFAULT_TABLE_CACHE_CAPACITY: u64 = 16;

const DEFAULT_LLM_API_BASE: &str = "https://api.groq.com/openai/v1";
const DEFAULT_LLM_MODEL: &str = "llama-3.3-70b-versatile";
const DEFAULT_LLM_MAX_TOKENS: u16 = 512;
const DEFAULT_LLM_TEMPERATURE: f32 = 0.3;
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 30;

/// Where tables live on disk and how long they are kept.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub directory: PathBuf,
    pub ttl: Duration,
    pub sweep_interval: Duration,
    pub cache_capacity: u64,
}

impl StorageConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ttl: Duration::from_secs(DEFAULT_TTL_HOURS * 60 * 60),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            cache_capacity: DEFAULT_TABLE_CACHE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub max_tokens: u16,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_LLM_API_BASE.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            max_tokens: DEFAULT_LLM_MAX_TOKENS,
            temperature: DEFAULT_LLM_TEMPERATURE,
            timeout: Duration::from_secs(DEFAULT_LLM_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub max_file_size: usize,
    pub storage: StorageConfig,
    pub database_path: PathBuf,
    pub llm: LlmConfig,
    pub cors_allow_origin: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Load .env file first
        dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let default_addr: SocketAddr = DEFAULT_BIND_ADDR.parse()?;
        let bind_addr = parse_or(&get, "BIND_ADDR", default_addr)?;
        let max_file_size: usize = parse_or(&get, "MAX_FILE_SIZE", default_max_file_size())?;

        let directory = get("DATA_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let ttl_hours: u64 = parse_or(&get, "DATASET_TTL_HOURS", DEFAULT_TTL_HOURS)?;
        let sweep_secs: u64 = parse_or(&get, "CLEANUP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS)?;
        if sweep_secs == 0 {
            anyhow::bail!("CLEANUP_INTERVAL_SECS must be greater than zero");
        }
        let cache_capacity = parse_or(&get, "TABLE_CACHE_CAPACITY", DEFAULT_TABLE_CACHE_CAPACITY)?;

        let database_path = get("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| directory.join("datasets.sqlite3"));

        let llm = LlmConfig {
            api_key: get("GROQ_API_KEY"),
            api_base: get("LLM_API_BASE").unwrap_or_else(|| DEFAULT_LLM_API_BASE.to_string()),
            model: get("LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            max_tokens: parse_or(&get, "LLM_MAX_TOKENS", DEFAULT_LLM_MAX_TOKENS)?,
            temperature: parse_or(&get, "LLM_TEMPERATURE", DEFAULT_LLM_TEMPERATURE)?,
            timeout: Duration::from_secs(parse_or(&get, "LLM_TIMEOUT_SECS", DEFAULT_LLM_TIMEOUT_SECS)?),
        };

        Ok(Config {
            bind_addr,
            max_file_size,
            storage: StorageConfig {
                directory,
                ttl: Duration::from_secs(ttl_hours * 60 * 60),
                sweep_interval: Duration::from_secs(sweep_secs),
                cache_capacity,
            },
            database_path,
            llm,
            cors_allow_origin: get("CORS_ALLOW_ORIGIN"),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("Failed to parse {}={:?}", key, raw)),
        None => Ok(default),
    }
}
