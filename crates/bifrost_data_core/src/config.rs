use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_URL: &str = "https://psychonautwiki.org/w/api.php";
pub const DEFAULT_USER_AGENT: &str = "Bifrost/4.0 redirect-fetcher";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_PAGE_DELAY_MS: u64 = 500;
pub const DEFAULT_BATCH_DELAY_MS: u64 = 300;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BifrostConfig {
    #[serde(default)]
    pub harvest: HarvestSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct HarvestSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub page_delay_ms: Option<u64>,
    pub batch_delay_ms: Option<u64>,
}

/// Effective settings for one harvest run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub page_delay: Duration,
    pub batch_delay: Duration,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            page_delay: Duration::from_millis(DEFAULT_PAGE_DELAY_MS),
            batch_delay: Duration::from_millis(DEFAULT_BATCH_DELAY_MS),
        }
    }
}

impl HarvestConfig {
    /// Resolve settings: env > config file > defaults.
    pub fn from_config(config: &BifrostConfig) -> Result<Self> {
        Self::from_config_with_lookup(config, |key| env::var(key).ok())
    }

    fn from_config_with_lookup<F>(config: &BifrostConfig, lookup_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let section = &config.harvest;
        let defaults = Self::default();

        let api_url = env_string(&lookup_env, "BIFROST_WIKI_API_URL")
            .or_else(|| section.api_url.clone())
            .unwrap_or(defaults.api_url);
        let user_agent = env_string(&lookup_env, "BIFROST_WIKI_USER_AGENT")
            .or_else(|| section.user_agent.clone())
            .unwrap_or(defaults.user_agent);
        let timeout_ms = match env_string(&lookup_env, "BIFROST_HTTP_TIMEOUT_MS") {
            Some(value) => value
                .parse::<u64>()
                .with_context(|| format!("invalid BIFROST_HTTP_TIMEOUT_MS: {value}"))?,
            None => section.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
        };
        let max_attempts = section.max_attempts.unwrap_or(defaults.max_attempts);
        if max_attempts == 0 {
            bail!("harvest.max_attempts must be at least 1");
        }

        Ok(Self {
            api_url,
            user_agent,
            timeout: Duration::from_millis(timeout_ms),
            max_attempts,
            retry_base_delay: section
                .retry_base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            page_delay: section
                .page_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.page_delay),
            batch_delay: section
                .batch_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.batch_delay),
        })
    }
}

/// Load and parse a BifrostConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<BifrostConfig> {
    if !config_path.exists() {
        return Ok(BifrostConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: BifrostConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn env_string<F>(lookup_env: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup_env(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
