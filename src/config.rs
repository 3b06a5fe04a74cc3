use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::prompts;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Openrouter,
    Ollama,
    Openai,
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::Openrouter => write!(f, "openrouter"),
            LlmProvider::Ollama => write!(f, "ollama"),
            LlmProvider::Openai => write!(f, "openai"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    pub model: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl LlmConfig {
    /// Returns the effective base_url: if the stored value is empty,
    /// fall back to the canonical URL for the configured provider.
    pub fn effective_base_url(&self) -> &str {
        if !self.base_url.is_empty() {
            return &self.base_url;
        }
        match self.provider {
            LlmProvider::Openrouter => "https://openrouter.ai/api/v1",
            LlmProvider::Ollama => "http://localhost:11434/v1",
            LlmProvider::Openai => "https://api.openai.com/v1",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub twitter: TwitterConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub bot_token: String,
    /// Empty means every user may talk to the bot.
    #[serde(default)]
    pub allowed_user_ids: Vec<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TwitterConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub access_secret: String,
    /// Accepted for completeness; writes are signed with OAuth 1.0a.
    #[serde(default)]
    pub bearer_token: String,
    #[serde(default)]
    pub rapidapi_key: String,
    #[serde(default = "default_rapidapi_host")]
    pub rapidapi_host: String,
    #[serde(default = "default_twitter_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub accounts_to_monitor: Vec<String>,
    /// Seconds between poll cycles, also the mention lookback window.
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for TwitterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            api_secret: String::new(),
            access_token: String::new(),
            access_secret: String::new(),
            bearer_token: String::new(),
            rapidapi_key: String::new(),
            rapidapi_host: default_rapidapi_host(),
            api_base: default_twitter_api_base(),
            accounts_to_monitor: Vec::new(),
            polling_interval: default_polling_interval(),
            max_retries: default_max_retries(),
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_system_prompt() -> String {
    prompts::SYSTEM_INSTRUCTION.trim().to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_rapidapi_host() -> String {
    "twitter241.p.rapidapi.com".to_string()
}

fn default_twitter_api_base() -> String {
    "https://api.twitter.com/2".to_string()
}

fn default_polling_interval() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;

        if !config.telegram.enabled && !config.twitter.enabled {
            anyhow::bail!("No channel enabled: set [telegram].enabled or [twitter].enabled");
        }

        if config.twitter.polling_interval == 0 {
            anyhow::bail!("[twitter].polling_interval must be at least 1 second");
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let config = Config::parse(
            r#"
            [llm]
            model = "some/model"

            [twitter]
            enabled = true
            accounts_to_monitor = ["@flare"]
            "#,
        )
        .unwrap();

        assert_eq!(config.llm.provider, LlmProvider::Openrouter);
        assert_eq!(config.llm.effective_base_url(), "https://openrouter.ai/api/v1");
        assert!(!config.llm.system_prompt.is_empty());
        assert_eq!(config.twitter.polling_interval, 30);
        assert_eq!(config.twitter.max_retries, 3);
        assert_eq!(config.twitter.rapidapi_host, "twitter241.p.rapidapi.com");
        assert!(!config.telegram.enabled);
        assert!(config.telegram.allowed_user_ids.is_empty());
    }

    #[test]
    fn test_rejects_no_enabled_channel() {
        let err = Config::parse(
            r#"
            [llm]
            model = "some/model"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("No channel enabled"));
    }

    #[test]
    fn test_rejects_zero_polling_interval() {
        let result = Config::parse(
            r#"
            [llm]
            model = "m"

            [twitter]
            enabled = true
            polling_interval = 0
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_explicit_base_url_wins() {
        let config = Config::parse(
            r#"
            [llm]
            provider = "ollama"
            model = "llama3"
            base_url = "http://gpu-box:11434/v1"

            [telegram]
            enabled = true
            bot_token = "123:abc"
            allowed_user_ids = [42]
            "#,
        )
        .unwrap();
        assert_eq!(config.llm.provider, LlmProvider::Ollama);
        assert_eq!(config.llm.effective_base_url(), "http://gpu-box:11434/v1");
        assert_eq!(config.telegram.allowed_user_ids, vec![42]);
    }
}
