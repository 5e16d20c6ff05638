//! Configuration loading
//!
//! TOML file plus `AUTOTRADER__*` environment overrides. Secrets (the wallet
//! private key) stay in the environment and are only referenced by name here.

use crate::error::{Result, TraderError};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub wallet: WalletConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub controls: ControlsConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    pub chains: Vec<ChainConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WalletConfig {
    /// Name of the environment variable holding the hex private key.
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
}

fn default_private_key_env() -> String {
    "TRADER_PRIVATE_KEY".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TradingConfig {
    /// Take-profit offset as a fraction of entry price.
    #[serde(default = "default_tp_pct")]
    pub take_profit_pct: Decimal,
    /// Stop-loss offset as a fraction of entry price.
    #[serde(default = "default_sl_pct")]
    pub stop_loss_pct: Decimal,
    /// Native balance that must survive every swap, per chain.
    #[serde(default = "default_gas_reserve")]
    pub gas_reserve_native: Decimal,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
    #[serde(default = "default_price_cache_ttl")]
    pub price_cache_ttl_secs: u64,
    #[serde(default = "default_swap_gas_limit")]
    pub swap_gas_limit: u64,
    #[serde(default = "default_swap_deadline")]
    pub swap_deadline_secs: u64,
    #[serde(default = "default_price_retries")]
    pub price_retry_attempts: u32,
    #[serde(default = "default_price_backoff")]
    pub price_retry_backoff_ms: u64,
}

fn default_tp_pct() -> Decimal {
    dec!(0.02)
}
fn default_sl_pct() -> Decimal {
    dec!(0.02)
}
fn default_gas_reserve() -> Decimal {
    dec!(0.01)
}
fn default_tick_interval() -> u64 {
    5
}
fn default_status_interval() -> u64 {
    15
}
fn default_price_cache_ttl() -> u64 {
    15
}
fn default_swap_gas_limit() -> u64 {
    600_000
}
fn default_swap_deadline() -> u64 {
    300
}
fn default_price_retries() -> u32 {
    3
}
fn default_price_backoff() -> u64 {
    500
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            take_profit_pct: default_tp_pct(),
            stop_loss_pct: default_sl_pct(),
            gas_reserve_native: default_gas_reserve(),
            tick_interval_secs: default_tick_interval(),
            status_interval_secs: default_status_interval(),
            price_cache_ttl_secs: default_price_cache_ttl(),
            swap_gas_limit: default_swap_gas_limit(),
            swap_deadline_secs: default_swap_deadline(),
            price_retry_attempts: default_price_retries(),
            price_retry_backoff_ms: default_price_backoff(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DashboardConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_true() -> bool {
    true
}
fn default_bind() -> String {
    "127.0.0.1:4000".to_string()
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_bind(),
        }
    }
}

/// Flag files kept for operator compatibility; the loop itself only sees
/// the signals they raise.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlsConfig {
    pub stop_flag: Option<String>,
    pub sell_all_flag: Option<String>,
    #[serde(default = "default_flag_poll")]
    pub poll_interval_secs: u64,
}

fn default_flag_poll() -> u64 {
    2
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            stop_flag: None,
            sell_all_flag: None,
            poll_interval_secs: default_flag_poll(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScannerConfig {
    /// How many recent inbound transfers to inspect per scan.
    #[serde(default = "default_max_transfers")]
    pub max_transfers: u32,
    /// Balances below this (human units) are ignored as dust.
    #[serde(default = "default_dust")]
    pub dust_threshold: Decimal,
    /// Etherscan-style API key for the HTTP fallback source.
    pub etherscan_api_key: Option<String>,
}

fn default_max_transfers() -> u32 {
    100
}
fn default_dust() -> Decimal {
    dec!(0.000001)
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_transfers: default_max_transfers(),
            dust_threshold: default_dust(),
            etherscan_api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: String,
    pub universal_router: String,
    pub v3_factory: String,
    /// V4 pool manager; optional on chains where only V3 pools are priced.
    pub pool_manager: Option<String>,
    pub weth: String,
    pub usdc: String,
    #[serde(default = "default_usdc_decimals")]
    pub usdc_decimals: u8,
    #[serde(default)]
    pub testnet: bool,
    /// Mainnet chain used for pricing when this chain is a testnet.
    pub price_chain_id: Option<u64>,
    /// Etherscan-compatible API base for the transfer-scan fallback.
    pub explorer_api_url: Option<String>,
}

fn default_usdc_decimals() -> u8 {
    6
}

impl ChainConfig {
    /// Chain whose pools are read for pricing: self for mainnets, the
    /// configured mainnet for testnets.
    pub fn pricing_chain_id(&self) -> u64 {
        self.price_chain_id.unwrap_or(self.chain_id)
    }
}

impl Config {
    /// Load from a TOML file, then apply `AUTOTRADER__SECTION__KEY`
    /// environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("AUTOTRADER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| TraderError::Config(e.to_string()))?;

        let mut cfg: Config = settings
            .try_deserialize()
            .map_err(|e| TraderError::Config(e.to_string()))?;

        cfg.database.path = shellexpand::tilde(&cfg.database.path).into_owned();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chains.is_empty() {
            return Err(TraderError::Config("no chains configured".into()));
        }
        for chain in &self.chains {
            if chain.testnet && chain.price_chain_id.is_none() {
                return Err(TraderError::Config(format!(
                    "testnet chain {} needs price_chain_id for mainnet pricing",
                    chain.chain_id
                )));
            }
        }
        if self.trading.take_profit_pct <= Decimal::ZERO
            || self.trading.stop_loss_pct <= Decimal::ZERO
        {
            return Err(TraderError::Config(
                "take_profit_pct and stop_loss_pct must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the wallet private key from the configured environment
    /// variable.
    pub fn private_key(&self) -> Result<String> {
        std::env::var(&self.wallet.private_key_env).map_err(|_| {
            TraderError::Config(format!(
                "environment variable {} is not set",
                self.wallet.private_key_env
            ))
        })
    }

    pub fn chain(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }
}
