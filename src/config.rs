//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (the Telegram token) are referenced by env-var name in the
//! config and resolved at runtime, wrapped in `SecretString`.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;

use crate::strategy::dedup::DedupConfig;
use crate::strategy::indicators::IndicatorParams;
use crate::strategy::risk::RiskConfig;
use crate::strategy::scoring::ScoringConfig;
use crate::types::SwingError;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub universe: UniverseConfig,
    pub market_data: MarketDataConfig,
    pub indicators: IndicatorParams,
    pub scoring: ScoringConfig,
    pub risk: RiskConfig,
    pub dedup: DedupConfig,
    pub persistence: PersistenceConfig,
    pub dashboard: DashboardConfig,
    pub alerts: AlertsConfig,
    pub process: ProcessConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub initial_capital: f64,
    pub scan_interval_secs: u64,
    pub supervisor_interval_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "SWINGWATCH".to_string(),
            initial_capital: 10_000.0,
            scan_interval_secs: 3600,
            supervisor_interval_secs: 300,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct UniverseConfig {
    /// Symbols scanned every cycle, in universe order.
    pub symbols: Vec<String>,
    /// Tie-break order for equally strong candidates.
    pub priority: Vec<String>,
    /// Reference asset for relative strength.
    pub reference: String,
}

impl Default for UniverseConfig {
    fn default() -> Self {
        let symbols: Vec<String> = [
            "BTC/USDT", "ETH/USDT", "SOL/USDT", "BNB/USDT", "XRP/USDT", "ADA/USDT",
            "DOGE/USDT", "AVAX/USDT", "LINK/USDT", "DOT/USDT",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        Self {
            priority: symbols[..4].to_vec(),
            symbols,
            reference: "BTC/USDT".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MarketDataConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub retry_delay_ms: u64,
    /// Bars requested per 1H / 4H fetch (one extra for the forming bar).
    pub history_bars: usize,
    /// Symbols fetched concurrently.
    pub concurrency: usize,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.com".to_string(),
            timeout_secs: 10,
            retry_delay_ms: 500,
            history_bars: 300,
            concurrency: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PersistenceConfig {
    pub state_file: String,
    pub write_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            state_file: "swingwatch_state.json".to_string(),
            write_retries: 3,
            retry_backoff_ms: 200,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AlertsConfig {
    pub telegram_bot_token_env: Option<String>,
    pub telegram_chat_id_env: Option<String>,
    /// Long-poll timeout for `getUpdates`.
    pub poll_timeout_secs: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            telegram_bot_token_env: Some("TELEGRAM_BOT_TOKEN".to_string()),
            telegram_chat_id_env: Some("TELEGRAM_CHAT_ID".to_string()),
            poll_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProcessConfig {
    /// Program + args spawned by the `restart` command.
    pub restart_command: Vec<String>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            restart_command: vec![
                "systemctl".to_string(),
                "restart".to_string(),
                "swingwatch".to_string(),
            ],
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    /// Parse and validate TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Range checks that serde cannot express.
    pub fn validate(&self) -> Result<(), SwingError> {
        let err = SwingError::Config;
        if !(self.agent.initial_capital.is_finite() && self.agent.initial_capital > 0.0) {
            return Err(err("agent.initial_capital must be positive".into()));
        }
        if self.agent.scan_interval_secs == 0 || self.agent.supervisor_interval_secs == 0 {
            return Err(err("agent intervals must be non-zero".into()));
        }
        if self.universe.symbols.is_empty() {
            return Err(err("universe.symbols must not be empty".into()));
        }
        if self.market_data.history_bars <= self.indicators.min_bars {
            return Err(err(format!(
                "market_data.history_bars ({}) must exceed indicators.min_bars ({})",
                self.market_data.history_bars, self.indicators.min_bars
            )));
        }
        if self.market_data.concurrency == 0 {
            return Err(err("market_data.concurrency must be at least 1".into()));
        }
        if self.dedup.ttl_hours <= 0 {
            return Err(err("dedup.ttl_hours must be positive".into()));
        }
        self.scoring.validate().map_err(err)?;
        self.risk.validate().map_err(err)?;
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Telegram token, if configured and present in the environment.
    pub fn telegram_token(&self) -> Option<SecretString> {
        let name = self.alerts.telegram_bot_token_env.as_deref()?;
        Self::resolve_env(name).ok().map(SecretString::new)
    }

    /// Default chat id from the environment, before any `/start`.
    pub fn telegram_chat_id(&self) -> Option<i64> {
        let name = self.alerts.telegram_chat_id_env.as_deref()?;
        Self::resolve_env(name).ok()?.trim().parse().ok()
    }

    /// Symbols to fetch: the universe plus the reference asset.
    pub fn fetch_symbols(&self) -> Vec<String> {
        let mut symbols = self.universe.symbols.clone();
        if !symbols.contains(&self.universe.reference) {
            symbols.push(self.universe.reference.clone());
        }
        symbols
    }
}
