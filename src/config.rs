//! Configuration management for the bridge relayer
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::env;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub relayer: RelayerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    pub wallet: WalletConfig,
    pub chains: HashMap<String, ChainConfig>,
}

/// Process-wide relay settings
#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    /// Capacity of the shared message queue fed by all listeners
    #[serde(default = "default_message_queue_size")]
    pub message_queue_size: usize,
    /// Seconds between chain and database health checks
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            message_queue_size: default_message_queue_size(),
            health_check_interval_secs: default_health_check_interval_secs(),
        }
    }
}

/// Postgres checkpoint store
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Connection string
    pub url: String,
    /// Pool upper bound
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Connections kept open while idle
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Prometheus endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    /// Serve `/metrics`
    #[serde(default)]
    pub enabled: bool,
    /// Listen port on all interfaces
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Relayer signing key source
#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Name of the environment variable holding the hex private key
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
}

/// When the gas station resolver asks the chain for a gas estimate
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GasEstimationPolicy {
    /// Estimate only after the price oracle answered
    #[default]
    AfterOracle,
    /// Estimate whenever calldata is available, oracle or not
    Always,
    /// Always use the configured gas limit
    Never,
}

/// One EVM chain served by the relayer
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Bridge domain identity of this chain
    pub domain_id: u8,
    /// Human-readable name used in logs
    pub name: String,
    /// RPC endpoints, tried in order on failure
    pub rpc_urls: Vec<String>,
    /// Bridge contract address (hex)
    pub bridge_address: String,
    /// Fungible token handler contract
    pub erc20_handler: Option<String>,
    /// Non-fungible token handler contract
    pub erc721_handler: Option<String>,
    /// Generic data handler contract
    pub generic_handler: Option<String>,
    /// Fallback gas limit for votes
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    /// Fallback gas price in wei
    #[serde(default = "default_max_gas_price")]
    pub max_gas_price: u64,
    /// Safety multiplier applied to chain gas estimates
    #[serde(default = "default_gas_multiplier")]
    pub gas_multiplier: f64,
    /// When to ask the chain for a gas estimate
    #[serde(default)]
    pub gas_estimation: GasEstimationPolicy,
    /// Gas station endpoint; unset means configured prices only
    pub gas_station_url: Option<String>,
    /// Gas station request timeout
    #[serde(default = "default_gas_station_timeout_ms")]
    pub gas_station_timeout_ms: u64,
    /// Submit type-2 transactions when the oracle reports a priority fee
    #[serde(default)]
    pub dynamic_fees: bool,
    /// Lowest block the listener may start from
    pub start_block: Option<u64>,
    /// Ignore the stored checkpoint and start at `start_block`
    #[serde(default)]
    pub fresh_start: bool,
    /// Start at the chain head, ignoring checkpoints and `start_block`
    #[serde(default)]
    pub latest_block: bool,
    /// Blocks a deposit must be buried under before it is relayed
    #[serde(default = "default_block_confirmations")]
    pub block_confirmations: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Largest block span per log query
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
    /// How long to wait for a vote receipt
    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ChainConfig {
    /// Parsed bridge contract address
    pub fn bridge(&self) -> Result<Address> {
        parse_address("bridge_address", &self.bridge_address)
    }

    /// Configured handler addresses, in fungible / non-fungible / generic order
    pub fn handlers(&self) -> Result<[Option<Address>; 3]> {
        let parse = |field: &str, value: &Option<String>| -> Result<Option<Address>> {
            value
                .as_deref()
                .map(|v| parse_address(field, v))
                .transpose()
        };
        Ok([
            parse("erc20_handler", &self.erc20_handler)?,
            parse("erc721_handler", &self.erc721_handler)?,
            parse("generic_handler", &self.generic_handler)?,
        ])
    }
}

#[cfg(test)]
impl ChainConfig {
    /// Local chain with short timeouts and no confirmation lag
    pub(crate) fn for_tests(domain_id: u8) -> Self {
        Self {
            domain_id,
            name: format!("chain-{}", domain_id),
            rpc_urls: vec!["http://127.0.0.1:8545".into()],
            bridge_address: format!("{:?}", Address::repeat_byte(0x0b)),
            erc20_handler: None,
            erc721_handler: None,
            generic_handler: None,
            gas_limit: default_gas_limit(),
            max_gas_price: default_max_gas_price(),
            gas_multiplier: default_gas_multiplier(),
            gas_estimation: GasEstimationPolicy::default(),
            gas_station_url: None,
            gas_station_timeout_ms: 1_000,
            dynamic_fees: false,
            start_block: None,
            fresh_start: false,
            latest_block: false,
            block_confirmations: 0,
            poll_interval_ms: 10,
            max_block_range: 100,
            receipt_timeout_secs: 1,
            receipt_poll_interval_ms: 10,
            enabled: true,
        }
    }
}

fn parse_address(field: &str, value: &str) -> Result<Address> {
    value
        .parse::<Address>()
        .with_context(|| format!("Invalid address in {}: {}", field, value))
}

fn default_message_queue_size() -> usize {
    1000
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_private_key_env() -> String {
    "RELAYER_PRIVATE_KEY".to_string()
}

fn default_gas_limit() -> u64 {
    2_000_000
}

fn default_max_gas_price() -> u64 {
    20_000_000_000
}

fn default_gas_multiplier() -> f64 {
    10.0
}

fn default_gas_station_timeout_ms() -> u64 {
    5_000
}

fn default_block_confirmations() -> u64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_max_block_range() -> u64 {
    1_000
}

fn default_receipt_timeout_secs() -> u64 {
    250
}

fn default_receipt_poll_interval_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

impl Settings {
    /// Load settings from the file named by `RELAYER_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("RELAYER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load, substitute `${VAR}` references, and validate
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        let mut domains = HashSet::new();
        for (name, chain) in self.enabled_chains() {
            if !domains.insert(chain.domain_id) {
                anyhow::bail!("Duplicate domain id {} (chain {})", chain.domain_id, name);
            }
            if chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} has no RPC URLs configured", name);
            }
            if chain.gas_limit == 0 {
                anyhow::bail!("Chain {} has a zero gas limit", name);
            }
            if chain.max_gas_price == 0 {
                anyhow::bail!("Chain {} has a zero max gas price", name);
            }
            if !chain.gas_multiplier.is_finite() || chain.gas_multiplier <= 0.0 {
                anyhow::bail!(
                    "Chain {} has an invalid gas multiplier: {}",
                    name,
                    chain.gas_multiplier
                );
            }
            chain.bridge()?;
            let handlers = chain.handlers()?;
            if handlers.iter().all(Option::is_none) {
                tracing::warn!("Chain {} has no message handlers - votes will fail", name);
            }
            if chain.gas_station_url.is_none() {
                tracing::warn!("Chain {} has no gas station - using configured gas price", name);
            }
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static regex");
    }

    let mut result = input.to_string();
    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
