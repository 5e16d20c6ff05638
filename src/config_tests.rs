//! Tests for configuration

#[cfg(test)]
mod tests {
    use super::super::config::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_trading_config_default() {
        let config = TradingConfig::default();
        assert_eq!(config.take_profit_pct, dec!(0.02));
        assert_eq!(config.stop_loss_pct, dec!(0.02));
        assert_eq!(config.gas_reserve_native, dec!(0.01));
        assert_eq!(config.tick_interval_secs, 5);
        assert_eq!(config.status_interval_secs, 15);
        assert_eq!(config.price_cache_ttl_secs, 15);
        assert_eq!(config.swap_gas_limit, 600_000);
        assert_eq!(config.swap_deadline_secs, 300);
        assert_eq!(config.price_retry_attempts, 3);
        assert_eq!(config.price_retry_backoff_ms, 500);
    }

    #[test]
    fn test_trading_config_deserialize() {
        let toml_str = r#"
take_profit_pct = 0.05
stop_loss_pct = 0.03
gas_reserve_native = 0.02
tick_interval_secs = 10
"#;
        let config: TradingConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.take_profit_pct, dec!(0.05));
        assert_eq!(config.stop_loss_pct, dec!(0.03));
        assert_eq!(config.gas_reserve_native, dec!(0.02));
        assert_eq!(config.tick_interval_secs, 10);
        // Unspecified fields keep their defaults
        assert_eq!(config.swap_gas_limit, 600_000);
    }

    #[test]
    fn test_chain_config_mainnet() {
        let toml_str = r#"
chain_id = 8453
name = "Base"
rpc_url = "https://mainnet.base.org"
universal_router = "0x6ff5693b99212da76ad316178a184ab56d299b43"
v3_factory = "0x33128a8fc17869897dc3909d720d955ed65a9e44"
weth = "0x4200000000000000000000000000000000000006"
usdc = "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913"
"#;
        let config: ChainConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.chain_id, 8453);
        assert!(!config.testnet);
        assert_eq!(config.usdc_decimals, 6);
        assert!(config.pool_manager.is_none());
        // Mainnets price against themselves
        assert_eq!(config.pricing_chain_id(), 8453);
    }

    #[test]
    fn test_chain_config_testnet_pricing_chain() {
        let toml_str = r#"
chain_id = 84532
name = "Base Sepolia"
rpc_url = "https://sepolia.base.org"
universal_router = "0x0000000000000000000000000000000000000001"
v3_factory = "0x0000000000000000000000000000000000000002"
weth = "0x0000000000000000000000000000000000000003"
usdc = "0x0000000000000000000000000000000000000004"
testnet = true
price_chain_id = 8453
"#;
        let config: ChainConfig = toml::from_str(toml_str).unwrap();
        assert!(config.testnet);
        assert_eq!(config.pricing_chain_id(), 8453);
    }

    #[test]
    fn test_dashboard_config_defaults() {
        let config: DashboardConfig = toml::from_str("").unwrap();
        assert!(config.enabled);
        assert_eq!(config.bind, "127.0.0.1:4000");
    }

    #[test]
    fn test_controls_config_defaults() {
        let config: ControlsConfig = toml::from_str("").unwrap();
        assert!(config.stop_flag.is_none());
        assert!(config.sell_all_flag.is_none());
        assert_eq!(config.poll_interval_secs, 2);
    }

    #[test]
    fn test_scanner_config_defaults() {
        let config: ScannerConfig = toml::from_str("").unwrap();
        assert_eq!(config.max_transfers, 100);
        assert_eq!(config.dust_threshold, dec!(0.000001));
        assert!(config.etherscan_api_key.is_none());
    }

    #[test]
    fn test_wallet_config_default_env_name() {
        let config: WalletConfig = toml::from_str("").unwrap();
        assert_eq!(config.private_key_env, "TRADER_PRIVATE_KEY");
    }

    fn full_config(trading: &str) -> Config {
        let toml_str = format!(
            r#"
[wallet]

[database]
path = "data/trader.db"

[trading]
{trading}

[[chains]]
chain_id = 1
name = "Ethereum"
rpc_url = "https://eth.example"
universal_router = "0x0000000000000000000000000000000000000001"
v3_factory = "0x0000000000000000000000000000000000000002"
weth = "0x0000000000000000000000000000000000000003"
usdc = "0x0000000000000000000000000000000000000004"
"#
        );
        toml::from_str(&toml_str).unwrap()
    }

    #[test]
    fn test_validate_accepts_sane_config() {
        let config = full_config("");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_nonpositive_thresholds() {
        let config = full_config("take_profit_pct = 0.0");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_testnet_without_price_chain() {
        let mut config = full_config("");
        config.chains[0].testnet = true;
        config.chains[0].price_chain_id = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_chain_lookup() {
        let config = full_config("");
        assert!(config.chain(1).is_some());
        assert!(config.chain(10).is_none());
    }
}
