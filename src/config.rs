//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (the session cookie) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::engine::ingest::EngineConfig;
use crate::fetch::rate_limit::ThrottlePolicy;
use crate::storage::DEFAULT_HISTORY_FILE;
use crate::types::LedgerError;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MarketConfig {
    /// History render endpoint (without query string).
    pub endpoint: String,
    pub page_size: u32,
    pub search_query: String,
    /// Env var holding the authenticated `Cookie` header value.
    pub session_cookie_env: String,
    pub request_timeout_secs: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://steamcommunity.com/market/myhistory/render/".to_string(),
            page_size: 100,
            search_query: String::new(),
            session_cookie_env: "MARKET_SESSION_COOKIE".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PacingConfig {
    pub inter_page_delay_ms: u64,
    pub throttle_cooldown_secs: u64,
    pub backoff_multiplier: f64,
    pub max_cooldown_secs: u64,
    pub max_throttle_retries: Option<u32>,
    pub max_consecutive_skips: Option<u32>,
    pub max_run_secs: Option<u64>,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            inter_page_delay_ms: 1500,
            throttle_cooldown_secs: 30,
            backoff_multiplier: 1.0,
            max_cooldown_secs: 300,
            max_throttle_retries: None,
            max_consecutive_skips: None,
            max_run_secs: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub history_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            history_file: DEFAULT_HISTORY_FILE.to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), LedgerError> {
        if self.market.page_size == 0 {
            return Err(LedgerError::Config("market.page_size must be positive".into()));
        }
        if self.market.endpoint.trim().is_empty() {
            return Err(LedgerError::Config("market.endpoint must be set".into()));
        }
        if !self.pacing.backoff_multiplier.is_finite() || self.pacing.backoff_multiplier < 1.0 {
            return Err(LedgerError::Config(
                "pacing.backoff_multiplier must be a finite value >= 1.0".into(),
            ));
        }
        if self.pacing.throttle_cooldown_secs.saturating_mul(1000) <= self.pacing.inter_page_delay_ms {
            return Err(LedgerError::Config(
                "pacing.throttle_cooldown_secs must be longer than pacing.inter_page_delay_ms".into(),
            ));
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// The session cookie, if its env var is set.
    pub fn session_cookie(&self) -> Option<SecretString> {
        Self::resolve_env(&self.market.session_cookie_env)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(SecretString::new)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            page_size: self.market.page_size,
            inter_page_delay: Duration::from_millis(self.pacing.inter_page_delay_ms),
            max_consecutive_skips: self.pacing.max_consecutive_skips,
            max_run_duration: self.pacing.max_run_secs.map(Duration::from_secs),
        }
    }

    pub fn throttle_policy(&self) -> ThrottlePolicy {
        ThrottlePolicy {
            cooldown: Duration::from_secs(self.pacing.throttle_cooldown_secs),
            multiplier: self.pacing.backoff_multiplier,
            max_cooldown: Duration::from_secs(self.pacing.max_cooldown_secs),
            max_retries: self.pacing.max_throttle_retries,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.market.request_timeout_secs)
    }
}
