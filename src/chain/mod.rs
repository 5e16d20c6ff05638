//! Per-chain connections and contract handles
//!
//! Each configured chain gets its own provider, signer, and bound router /
//! factory / Permit2 instances. Positions carry a chain id so the right
//! context is used for exits; pricing goes through the registry's
//! testnet → mainnet mapping.

pub mod contracts;

use crate::config::ChainConfig;
use crate::error::{Result, TraderError};
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockNumber, U256};
use parking_lot::Mutex;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use self::contracts::{Erc20, Permit2, PoolManager, UniswapV3Factory, UniswapV3Pool, UniversalRouter};

/// Permit2 is deployed at the same address on every chain.
pub fn permit2_address() -> Address {
    Address::from([
        0x00, 0x00, 0x00, 0x00, 0x00, 0x22, 0xd4, 0x73, 0x03, 0x0f, 0x11, 0x6d, 0xde, 0xe9, 0xf6,
        0xb4, 0x3a, 0xc7, 0x8b, 0xa3,
    ])
}

pub type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Gas parameters for one submission, cached for a short window per chain.
#[derive(Debug, Clone, Copy)]
pub enum GasFees {
    Eip1559 { max_fee: U256, priority: U256 },
    Legacy { gas_price: U256 },
}

impl GasFees {
    /// Upper bound on the per-gas price actually charged.
    pub fn cap(&self) -> U256 {
        match self {
            GasFees::Eip1559 { max_fee, .. } => *max_fee,
            GasFees::Legacy { gas_price } => *gas_price,
        }
    }

    pub fn apply_to(&self, tx: &mut TypedTransaction) {
        match (self, &mut *tx) {
            (GasFees::Eip1559 { max_fee, priority }, TypedTransaction::Eip1559(inner)) => {
                inner.max_fee_per_gas = Some(*max_fee);
                inner.max_priority_fee_per_gas = Some(*priority);
            }
            (fees, tx) => {
                tx.set_gas_price(fees.cap());
            }
        }
    }
}

const GAS_CACHE_TTL: Duration = Duration::from_secs(10);
const PRIORITY_FEE_WEI: u64 = 1_000_000_000; // 1 gwei

/// Lossy but monotone conversion, good enough for pricing and gas math.
pub fn u256_to_f64(value: U256) -> f64 {
    value.to_string().parse::<f64>().unwrap_or(f64::MAX)
}

/// Wei → native units as a Decimal, for reserve checks and reporting.
pub fn wei_to_native(wei: U256) -> Decimal {
    Decimal::from_f64(u256_to_f64(wei) / 1e18).unwrap_or(Decimal::ZERO)
}

/// Holds one chain's provider, signer, and bound contracts.
pub struct ChainContext {
    pub cfg: ChainConfig,
    pub provider: Arc<Provider<Http>>,
    pub client: Arc<SignerClient>,
    pub router_address: Address,
    pub factory_address: Address,
    pub pool_manager_address: Option<Address>,
    pub weth: Address,
    pub usdc: Address,
    wallet_address: Address,
    gas_cache: Mutex<Option<(Instant, GasFees)>>,
}

fn parse_address(s: &str, what: &str) -> Result<Address> {
    s.parse::<Address>()
        .map_err(|e| TraderError::Config(format!("invalid {what} address {s}: {e}")))
}

impl ChainContext {
    pub async fn connect(
        cfg: ChainConfig,
        private_key: &str,
        rpc_timeout: Duration,
    ) -> Result<Self> {
        let url = reqwest::Url::parse(&cfg.rpc_url)
            .map_err(|e| TraderError::Config(format!("invalid rpc_url for {}: {e}", cfg.name)))?;
        let http_client = reqwest::Client::builder()
            .timeout(rpc_timeout)
            .build()
            .map_err(|e| TraderError::Rpc(e.to_string()))?;
        let provider = Arc::new(Provider::new(Http::new_with_client(url, http_client)));

        let reported = provider.get_chainid().await?;
        if reported != U256::from(cfg.chain_id) {
            return Err(TraderError::Config(format!(
                "rpc for {} reports chain {} but config says {}",
                cfg.name, reported, cfg.chain_id
            )));
        }

        let wallet: LocalWallet = private_key
            .trim_start_matches("0x")
            .parse()
            .map_err(|e| TraderError::Config(format!("invalid private key: {e}")))?;
        let wallet = wallet.with_chain_id(cfg.chain_id);
        let wallet_address = wallet.address();
        let client = Arc::new(SignerMiddleware::new(provider.as_ref().clone(), wallet));

        let router_address = parse_address(&cfg.universal_router, "universal_router")?;
        let factory_address = parse_address(&cfg.v3_factory, "v3_factory")?;
        let pool_manager_address = match &cfg.pool_manager {
            Some(addr) => Some(parse_address(addr, "pool_manager")?),
            None => None,
        };
        let weth = parse_address(&cfg.weth, "weth")?;
        let usdc = parse_address(&cfg.usdc, "usdc")?;

        Ok(Self {
            cfg,
            provider,
            client,
            router_address,
            factory_address,
            pool_manager_address,
            weth,
            usdc,
            wallet_address,
            gas_cache: Mutex::new(None),
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.cfg.chain_id
    }

    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    pub fn wallet_address(&self) -> Address {
        self.wallet_address
    }

    /// Quote assets never treated as tradeable tokens on this chain.
    pub fn quote_assets(&self) -> [Address; 2] {
        [self.weth, self.usdc]
    }

    pub fn erc20(&self, token: Address) -> Erc20<SignerClient> {
        Erc20::new(token, self.client.clone())
    }

    pub fn factory(&self) -> UniswapV3Factory<SignerClient> {
        UniswapV3Factory::new(self.factory_address, self.client.clone())
    }

    pub fn pool(&self, pool: Address) -> UniswapV3Pool<SignerClient> {
        UniswapV3Pool::new(pool, self.client.clone())
    }

    pub fn pool_manager(&self) -> Option<PoolManager<SignerClient>> {
        self.pool_manager_address
            .map(|addr| PoolManager::new(addr, self.client.clone()))
    }

    pub fn router(&self) -> UniversalRouter<SignerClient> {
        UniversalRouter::new(self.router_address, self.client.clone())
    }

    pub fn permit2(&self) -> Permit2<SignerClient> {
        Permit2::new(permit2_address(), self.client.clone())
    }

    pub async fn native_balance(&self) -> Result<U256> {
        Ok(self
            .provider
            .get_balance(self.wallet_address, None)
            .await?)
    }

    /// ERC-20 balance as (human units, raw units, decimals).
    pub async fn token_balance(&self, token: Address) -> Result<(Decimal, U256, u8)> {
        let erc20 = self.erc20(token);
        let decimals = erc20
            .decimals()
            .call()
            .await
            .map_err(|e| TraderError::Rpc(e.to_string()))?;
        let raw = erc20
            .balance_of(self.wallet_address)
            .call()
            .await
            .map_err(|e| TraderError::Rpc(e.to_string()))?;
        let human = Decimal::from_f64(u256_to_f64(raw) / 10f64.powi(decimals as i32))
            .unwrap_or(Decimal::ZERO);
        Ok((human, raw, decimals))
    }

    pub async fn token_symbol(&self, token: Address) -> Result<String> {
        self.erc20(token)
            .symbol()
            .call()
            .await
            .map_err(|e| TraderError::Rpc(e.to_string()))
    }

    /// EIP-1559 fees (base * 2 + 1 gwei priority) with a legacy fallback,
    /// cached for ten seconds.
    pub async fn gas_fees(&self) -> Result<GasFees> {
        if let Some((at, fees)) = *self.gas_cache.lock() {
            if at.elapsed() < GAS_CACHE_TTL {
                return Ok(fees);
            }
        }

        let fees = match self.provider.get_block(BlockNumber::Latest).await {
            Ok(Some(block)) if block.base_fee_per_gas.is_some() => {
                let base = block.base_fee_per_gas.unwrap_or_default();
                let priority = U256::from(PRIORITY_FEE_WEI);
                GasFees::Eip1559 {
                    max_fee: base * 2 + priority,
                    priority,
                }
            }
            _ => {
                let gas_price = self.provider.get_gas_price().await?;
                GasFees::Legacy {
                    gas_price: gas_price * 2,
                }
            }
        };

        *self.gas_cache.lock() = Some((Instant::now(), fees));
        Ok(fees)
    }

    /// Worst-case cost of a swap at current fees, in native units.
    pub async fn estimate_swap_gas_native(&self, gas_limit: u64) -> Result<Decimal> {
        let fees = self.gas_fees().await?;
        Ok(wei_to_native(fees.cap() * U256::from(gas_limit)))
    }
}

/// All connected chains, keyed by chain id.
pub struct ChainRegistry {
    chains: BTreeMap<u64, Arc<ChainContext>>,
    wallet_address: Address,
}

impl ChainRegistry {
    /// Connect every configured chain. Chains that fail to connect are
    /// skipped with a warning; at least one must succeed.
    pub async fn connect(
        configs: &[ChainConfig],
        private_key: &str,
        rpc_timeout: Duration,
    ) -> Result<Self> {
        let mut chains = BTreeMap::new();
        let mut wallet_address = None;

        for cfg in configs {
            let name = cfg.name.clone();
            match ChainContext::connect(cfg.clone(), private_key, rpc_timeout).await {
                Ok(ctx) => {
                    tracing::info!(chain = %name, chain_id = ctx.chain_id(), "chain connected");
                    wallet_address.get_or_insert(ctx.wallet_address());
                    chains.insert(ctx.chain_id(), Arc::new(ctx));
                }
                Err(e) => {
                    tracing::warn!(chain = %name, error = %e, "chain connection failed, skipping");
                }
            }
        }

        let wallet_address =
            wallet_address.ok_or_else(|| TraderError::Config("no chain connected".into()))?;

        Ok(Self {
            chains,
            wallet_address,
        })
    }

    pub fn get(&self, chain_id: u64) -> Result<&Arc<ChainContext>> {
        self.chains
            .get(&chain_id)
            .ok_or(TraderError::UnknownChain(chain_id))
    }

    /// Context used for pricing a position on `chain_id`: the chain itself
    /// for mainnets, the mapped mainnet for testnets.
    pub fn pricing_context(&self, chain_id: u64) -> Result<&Arc<ChainContext>> {
        let ctx = self.get(chain_id)?;
        let pricing_id = ctx.cfg.pricing_chain_id();
        self.get(pricing_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ChainContext>> {
        self.chains.values()
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        self.chains.keys().copied().collect()
    }

    pub fn wallet_address(&self) -> Address {
        self.wallet_address
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}
