//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::time::Duration;

use crate::llm::voter::RetryPolicy;
use crate::types::{AugurError, VoterConfig};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub openrouter: OpenRouterConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub voters: Vec<VoterConfig>,
    #[serde(default)]
    pub polymarket: PolymarketConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

/// Pass intervals for the scheduler loop.
#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    #[serde(default = "default_market_poll_secs")]
    pub market_poll_interval_secs: u64,
    #[serde(default = "default_prediction_secs")]
    pub prediction_interval_secs: u64,
    #[serde(default = "default_odds_secs")]
    pub odds_interval_secs: u64,
    #[serde(default = "default_resolution_secs")]
    pub resolution_interval_secs: u64,
}

fn default_market_poll_secs() -> u64 {
    300
}
fn default_prediction_secs() -> u64 {
    300
}
fn default_odds_secs() -> u64 {
    60
}
fn default_resolution_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenRouterConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResearchConfig {
    pub enabled: bool,
    #[serde(default)]
    pub model: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: None,
            timeout_secs: 60,
            temperature: 0.2,
            max_tokens: 2000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PolymarketConfig {
    #[serde(default)]
    pub gamma_url: Option<String>,
    #[serde(default)]
    pub market_limit: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub database_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://augur.db".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8000,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), AugurError> {
        if self.retry.max_attempts == 0 {
            return Err(AugurError::Config("retry.max_attempts must be at least 1".into()));
        }
        let mut seen = HashSet::new();
        for v in &self.voters {
            if v.name.trim().is_empty() || v.model_id.trim().is_empty() {
                return Err(AugurError::Config("every voter needs a name and a model_id".into()));
            }
            if !seen.insert(v.name.as_str()) {
                return Err(AugurError::Config(format!("duplicate voter name: {}", v.name)));
            }
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// The OpenRouter API key, read from the configured env var.
    pub fn openrouter_api_key(&self) -> Result<SecretString> {
        Ok(SecretString::new(Self::resolve_env(&self.openrouter.api_key_env)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [agent]
        name = "AUGUR-TEST"

        [openrouter]
        api_key_env = "AUGUR_TEST_KEY"
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg: AppConfig = toml::from_str(MINIMAL).unwrap();
        assert_eq!(cfg.agent.odds_interval_secs, 60);
        assert_eq!(cfg.agent.resolution_interval_secs, 3600);
        assert_eq!(cfg.retry.policy(), RetryPolicy::default());
        assert!(cfg.research.enabled);
        assert!(cfg.voters.is_empty());
        assert_eq!(cfg.storage.database_url, "sqlite://augur.db");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_voters_and_overrides() {
        let cfg: AppConfig = toml::from_str(&format!(
            r#"{MINIMAL}
            [retry]
            max_attempts = 5
            base_delay_ms = 100
            max_delay_ms = 1000

            [[voters]]
            name = "claude"
            model_id = "anthropic/claude-sonnet-4"

            [[voters]]
            name = "grok"
            model_id = "x-ai/grok-4"
            enabled = false
            "#
        ))
        .unwrap();
        assert_eq!(cfg.voters.len(), 2);
        assert!(cfg.voters[0].enabled);
        assert!(!cfg.voters[1].enabled);
        assert_eq!(cfg.retry.policy().max_attempts, 5);
        assert_eq!(cfg.retry.policy().max_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_duplicate_voters_rejected() {
        let mut cfg: AppConfig = toml::from_str(MINIMAL).unwrap();
        let v = VoterConfig {
            name: "gpt".into(),
            model_id: "openai/gpt-4o".into(),
            enabled: true,
        };
        cfg.voters = vec![v.clone(), v];
        assert!(matches!(cfg.validate(), Err(AugurError::Config(_))));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut cfg: AppConfig = toml::from_str(MINIMAL).unwrap();
        cfg.retry.max_attempts = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_missing_api_key_env() {
        let cfg: AppConfig = toml::from_str(MINIMAL).unwrap();
        assert!(cfg.openrouter_api_key().is_err());
    }

    #[test]
    fn test_load_shipped_config() {
        // Only meaningful when run from the crate root.
        if let Ok(cfg) = AppConfig::load("config.toml") {
            assert_eq!(cfg.agent.name, "AUGUR-001");
            assert!(!cfg.voters.is_empty());
        }
    }
}
