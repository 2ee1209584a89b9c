//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` (or the file named by `VOLWATCH_CONFIG`) and
//! deserializes into strongly-typed structs. Secrets (database URL, Slack
//! webhook, provider API key) are referenced by env-var name in the config
//! and resolved at runtime.

use anyhow::{bail, Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;

use crate::types::{AssetSymbol, Subscription};

/// Env var overriding the config file path.
pub const CONFIG_PATH_ENV: &str = "VOLWATCH_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
/// Any value switches log output to JSON.
pub const LOG_JSON_ENV: &str = "VOLWATCH_LOG_JSON";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrackerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Run a single tick and exit (cron-style invocation).
    #[serde(default)]
    pub run_once: bool,
    pub assets: Vec<AssetConfig>,
}

/// A tracked asset and its identifier at the price provider.
#[derive(Debug, Deserialize, Clone)]
pub struct AssetConfig {
    pub symbol: AssetSymbol,
    pub provider_id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_source_url")]
    pub base_url: String,
    #[serde(default = "default_quote_currency")]
    pub quote_currency: String,
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
    pub api_key_env: Option<String>,
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_source_url(),
            quote_currency: default_quote_currency(),
            timeout_secs: default_source_timeout(),
            api_key_env: None,
            api_key_header: default_api_key_header(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StatsConfig {
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: u32,
    /// Tail length for the short-window volatility.
    #[serde(default = "default_volatility_samples")]
    pub volatility_samples: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            lookback_hours: default_lookback_hours(),
            volatility_samples: default_volatility_samples(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertsConfig {
    /// Global variation threshold, in percent.
    pub threshold_pct: f64,
    /// Number of most recent samples scanned for crossings.
    #[serde(default = "default_detection_window")]
    pub detection_window_samples: usize,
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    #[serde(default = "default_database_url_env")]
    pub database_url_env: String,
    /// Used when the env var above is unset.
    #[serde(default = "default_database_url")]
    pub default_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            database_url_env: default_database_url_env(),
            default_url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifierConfig {
    #[serde(default = "default_webhook_env")]
    pub slack_webhook_env: String,
    #[serde(default = "default_notifier_timeout")]
    pub timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            slack_webhook_env: default_webhook_env(),
            timeout_secs: default_notifier_timeout(),
        }
    }
}

fn default_interval_secs() -> u64 {
    300
}

fn default_source_url() -> String {
    "https://api.coingecko.com/api/v3".to_string()
}

fn default_quote_currency() -> String {
    "usd".to_string()
}

fn default_source_timeout() -> u64 {
    15
}

fn default_api_key_header() -> String {
    "x-cg-demo-api-key".to_string()
}

fn default_lookback_hours() -> u32 {
    24
}

fn default_volatility_samples() -> usize {
    6
}

fn default_detection_window() -> usize {
    50
}

fn default_backend() -> StorageBackend {
    StorageBackend::Sqlite
}

fn default_database_url_env() -> String {
    "DATABASE_URL".to_string()
}

fn default_database_url() -> String {
    "sqlite://volwatch.db".to_string()
}

fn default_max_connections() -> u32 {
    4
}

fn default_webhook_env() -> String {
    "SLACK_WEBHOOK_URL".to_string()
}

fn default_notifier_timeout() -> u64 {
    10
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Invalid config file: {path}"))
    }

    /// Load from `VOLWATCH_CONFIG`, falling back to `config.toml`.
    pub fn load_default() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(&path)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.tracker.assets.is_empty() {
            bail!("tracker.assets must list at least one asset");
        }
        let mut seen = BTreeSet::new();
        for asset in &self.tracker.assets {
            if !seen.insert(asset.symbol.clone()) {
                bail!("duplicate asset symbol: {}", asset.symbol);
            }
            if asset.provider_id.trim().is_empty() {
                bail!("asset {} has an empty provider_id", asset.symbol);
            }
        }
        if self.tracker.interval_secs == 0 {
            bail!("tracker.interval_secs must be positive");
        }
        if !(self.alerts.threshold_pct.is_finite() && self.alerts.threshold_pct > 0.0) {
            bail!("alerts.threshold_pct must be a positive number");
        }
        if self.alerts.detection_window_samples < 2 {
            bail!("alerts.detection_window_samples must be at least 2");
        }
        if self.stats.lookback_hours == 0 {
            bail!("stats.lookback_hours must be positive");
        }
        if self.stats.volatility_samples < 2 {
            bail!("stats.volatility_samples must be at least 2");
        }
        for sub in &self.alerts.subscriptions {
            if !seen.contains(&sub.asset) {
                bail!("subscription for {} targets an untracked asset", sub.subscriber);
            }
            if !(sub.threshold_pct.is_finite() && sub.threshold_pct > 0.0) {
                bail!("subscription for {} has a non-positive threshold", sub.subscriber);
            }
            if sub.window_minutes == 0 {
                bail!("subscription for {} has an empty window", sub.subscriber);
            }
        }
        Ok(())
    }

    /// The set of tracked asset symbols.
    pub fn asset_set(&self) -> BTreeSet<AssetSymbol> {
        self.tracker.assets.iter().map(|a| a.symbol.clone()).collect()
    }

    /// Database URL from the configured env var, else the default.
    pub fn database_url(&self) -> String {
        std::env::var(&self.storage.database_url_env)
            .unwrap_or_else(|_| self.storage.default_url.clone())
    }

    /// Resolve an optional secret; unset or empty variables yield `None`.
    pub fn resolve_secret(env_name: &str) -> Option<SecretString> {
        std::env::var(env_name)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(SecretString::new)
    }
}
