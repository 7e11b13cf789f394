//! Configuration management for the swap watchtower
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub tracker: TrackerConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub upstream: UpstreamConfig,
    pub currencies: BTreeMap<String, CurrencyConfig>,
    #[serde(default)]
    pub wallet: WalletConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub instance_id: String,
    #[serde(default)]
    pub mode: TrackerMode,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_db_poll_interval")]
    pub db_poll_interval_secs: u64,
    #[serde(default = "default_upstream_poll_interval")]
    pub upstream_poll_interval_secs: u64,
    #[serde(default = "default_waiting_interval")]
    pub waiting_interval_secs: u64,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrackerMode {
    /// Worker pool running one searcher pass per dequeue
    #[default]
    Tracker,
    /// One scheduler pipeline per swap
    Guard,
}

impl TrackerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerMode::Tracker => "tracker",
            TrackerMode::Guard => "guard",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: DatabaseBackend,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    #[default]
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub enabled: bool,
    #[serde(default)]
    pub api_url: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default = "default_upstream_limit")]
    pub limit: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WalletConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// Chain family a currency is watched with
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CurrencyFamily {
    Bitcoin,
    Ethereum,
    Erc20,
    Tezos,
    Fa12,
}

impl CurrencyFamily {
    pub fn is_bitcoin_based(&self) -> bool {
        matches!(self, CurrencyFamily::Bitcoin)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrencyConfig {
    pub family: CurrencyFamily,
    pub digits_multiplier: Decimal,
    #[serde(default = "default_secret_size")]
    pub secret_size: usize,
    /// ERC20 / FA1.2 token contract
    pub token_contract: Option<String>,

    // UTXO network parameters
    #[serde(default)]
    pub p2pkh_prefix: u8,
    #[serde(default = "default_p2sh_prefix")]
    pub p2sh_prefix: u8,
    #[serde(default)]
    pub insight: Vec<IndexerConfig>,
    #[serde(default)]
    pub blockcypher: Vec<IndexerConfig>,

    #[serde(default)]
    pub etherscan: Vec<EtherScanConfig>,
    #[serde(default)]
    pub tzkt: Vec<TzktConfig>,
}

impl CurrencyConfig {
    /// Number of providers configured for the currency's family
    pub fn provider_count(&self) -> usize {
        match self.family {
            CurrencyFamily::Bitcoin => self.insight.len() + self.blockcypher.len(),
            CurrencyFamily::Ethereum | CurrencyFamily::Erc20 => self.etherscan.len(),
            CurrencyFamily::Tezos | CurrencyFamily::Fa12 => self.tzkt.len(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexerConfig {
    pub base_uri: String,
    #[serde(default = "default_utxo_delay")]
    pub min_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EtherScanConfig {
    pub base_uri: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default = "default_etherscan_delay")]
    pub min_delay_ms: u64,
    pub contracts: Vec<EvmContractConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvmContractConfig {
    pub address: String,
    #[serde(default)]
    pub start_block: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TzktConfig {
    pub base_uri: String,
    #[serde(default = "default_tzkt_delay")]
    pub min_delay_ms: u64,
    pub contracts: Vec<String>,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
}

fn default_workers() -> usize {
    4
}

fn default_db_poll_interval() -> u64 {
    10
}

fn default_upstream_poll_interval() -> u64 {
    10
}

fn default_waiting_interval() -> u64 {
    20
}

fn default_health_check_interval() -> u64 {
    30
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_upstream_limit() -> u32 {
    100
}

fn default_secret_size() -> usize {
    32
}

fn default_p2sh_prefix() -> u8 {
    5
}

fn default_utxo_delay() -> u64 {
    1000
}

fn default_etherscan_delay() -> u64 {
    500
}

fn default_tzkt_delay() -> u64 {
    200
}

fn default_cache_ttl() -> u64 {
    30
}

fn default_cache_capacity() -> u64 {
    1024
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("WATCHTOWER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    fn parse(raw: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(raw);

        let mut settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        if settings.tracker.instance_id.is_empty() {
            settings.tracker.instance_id = format!("watchtower-{}", uuid::Uuid::new_v4());
        }

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.currencies.is_empty() {
            anyhow::bail!("At least one currency must be configured");
        }

        if self.tracker.workers == 0 {
            anyhow::bail!("tracker.workers must be greater than zero");
        }

        if self.database.backend == DatabaseBackend::Postgres && self.database.url.is_empty() {
            anyhow::bail!("database.url is required for the postgres backend");
        }

        if self.upstream.enabled && self.upstream.api_url.is_empty() {
            anyhow::bail!("upstream.api_url is required when upstream is enabled");
        }

        for (name, currency) in &self.currencies {
            if currency.provider_count() == 0 {
                anyhow::bail!("Currency {} has no indexer providers configured", name);
            }

            if currency.digits_multiplier <= Decimal::ZERO {
                anyhow::bail!("Currency {} has a non-positive digits_multiplier", name);
            }

            if matches!(currency.family, CurrencyFamily::Erc20 | CurrencyFamily::Fa12)
                && currency.token_contract.is_none()
            {
                anyhow::bail!("Token currency {} has no token_contract", name);
            }

            for etherscan in &currency.etherscan {
                if etherscan.contracts.is_empty() {
                    tracing::warn!("Currency {} has an etherscan provider without contracts", name);
                }
            }
        }

        Ok(())
    }

    /// Get currency config by symbol
    pub fn currency(&self, name: &str) -> Option<&CurrencyConfig> {
        self.currencies.get(name)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
    }

    ENV_VAR
        .replace_all(input, |cap: &regex::Captures| {
            env::var(&cap[1]).unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[tracker]
mode = "guard"
workers = 2

[database]
backend = "memory"

[api]
host = "127.0.0.1"
port = 8080

[metrics]
enabled = false
port = 9090

[upstream]
enabled = true
api_url = "https://api.example.com/"
api_token = "${WATCHTOWER_TEST_TOKEN}"

[currencies.BTC]
family = "bitcoin"
digits_multiplier = 100000000
p2pkh_prefix = 0

[[currencies.BTC.insight]]
base_uri = "https://insight.example.com/"

[currencies.ETH]
family = "ethereum"
digits_multiplier = 1000000000

[[currencies.ETH.etherscan]]
base_uri = "https://api.etherscan.io/"
api_token = "key"
contracts = [{ address = "0xe9c251cbb4881f9e056e40135e7d3ea9a7d037df", start_block = 8168569 }]
"#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("WATCHTOWER_SUBST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${WATCHTOWER_SUBST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_load_from_file() {
        env::set_var("WATCHTOWER_TEST_TOKEN", "secret-token");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let settings = Settings::load_from(file.path()).unwrap();

        assert_eq!(settings.tracker.mode, TrackerMode::Guard);
        assert_eq!(settings.tracker.workers, 2);
        assert_eq!(settings.tracker.waiting_interval_secs, 20);
        assert!(settings.tracker.instance_id.starts_with("watchtower-"));
        assert_eq!(settings.upstream.api_token, "secret-token");
        assert_eq!(settings.upstream.limit, 100);

        let btc = settings.currency("BTC").unwrap();
        assert_eq!(btc.family, CurrencyFamily::Bitcoin);
        assert_eq!(btc.secret_size, 32);
        assert_eq!(btc.insight[0].min_delay_ms, 1000);

        let eth = settings.currency("ETH").unwrap();
        assert_eq!(eth.etherscan[0].min_delay_ms, 500);
        assert_eq!(eth.etherscan[0].contracts[0].start_block, 8168569);
    }

    #[test]
    fn test_currency_without_providers_is_rejected() {
        let raw = SAMPLE.replace(
            "[[currencies.BTC.insight]]\nbase_uri = \"https://insight.example.com/\"",
            "",
        );
        assert!(Settings::parse(&raw).is_err());
    }
}
