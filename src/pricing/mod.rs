//! On-chain pool pricing
//!
//! Spot prices come from the pool's own slot0 state, read on the pricing
//! chain (mainnet even for testnet-executed positions). There is no
//! off-chain feed and no fallback: a failed read is an error the caller
//! retries, never a substituted price.


use crate::chain::{u256_to_f64, ChainContext, ChainRegistry};
use crate::error::{Result, TraderError};
use crate::storage::Database;
use crate::types::{address_key, DexKind, PoolRef, QuoteToken};
use async_trait::async_trait;
use ethers::abi::{encode, Token};
use ethers::types::{Address, U256};
use ethers::utils::keccak256;
use parking_lot::RwLock;
use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fee tier of the WETH/USDC reference pool used for the ETH → USD leg.
const ETH_USD_FEE_TIER: u32 = 500;

/// Tick spacing implied by a V4 fee tier.
pub fn tick_spacing_for_fee(fee: u32) -> i32 {
    match fee {
        100 => 1,
        500 => 10,
        3000 => 60,
        10_000 => 200,
        _ => 60,
    }
}

/// V4 pool id: keccak of the ABI-encoded PoolKey, currencies sorted
/// ascending by address.
pub fn v4_pool_id(token_a: Address, token_b: Address, fee: u32, hooks: Address) -> [u8; 32] {
    let (currency0, currency1) = if token_a < token_b {
        (token_a, token_b)
    } else {
        (token_b, token_a)
    };
    let encoded = encode(&[
        Token::Address(currency0),
        Token::Address(currency1),
        Token::Uint(U256::from(fee)),
        Token::Int(U256::from(tick_spacing_for_fee(fee) as u64)),
        Token::Address(hooks),
    ]);
    keccak256(encoded)
}

/// Convert a sqrt-price (X96 fixed point) into a human price of the token
/// in quote units. `token_is_0` says which side of the pool the priced
/// token sits on; decimals are the ERC-20 decimals of each side's asset.
pub fn price_from_sqrt_x96(
    sqrt_price_x96: U256,
    token_is_0: bool,
    token_decimals: u8,
    quote_decimals: u8,
) -> Option<Decimal> {
    if sqrt_price_x96.is_zero() {
        return None;
    }

    let sqrt = u256_to_f64(sqrt_price_x96);
    let ratio = (sqrt / 2f64.powi(96)).powi(2);

    let (d0, d1) = if token_is_0 {
        (token_decimals as i32, quote_decimals as i32)
    } else {
        (quote_decimals as i32, token_decimals as i32)
    };
    let human = ratio * 10f64.powi(d0 - d1);

    let price = if token_is_0 {
        human
    } else {
        if human <= 0.0 {
            return None;
        }
        1.0 / human
    };

    if !price.is_finite() || price <= 0.0 {
        return None;
    }
    Decimal::from_f64(price)
}

/// Anything that can produce a USD price for a (chain, token) pair.
///
/// The engine talks to this trait so monitoring logic can be exercised
/// without a live chain.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn usd_price(&self, chain_id: u64, token: Address, token_decimals: u8)
        -> Result<Decimal>;
}

/// Bounded-retry policy for price reads. No exit decision is ever made on
/// a read that exhausted its retries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_backoff: Duration::from_millis(500),
        }
    }
}

/// Read a price, retrying transient failures with jittered backoff.
/// Returns `None` when no fresh price could be obtained; the caller must
/// skip its decision for this pass. A missing pool is not retried: that
/// token is simply excluded from monitoring.
pub async fn read_price_with_retry<P: PriceSource + ?Sized>(
    source: &P,
    chain_id: u64,
    token: Address,
    token_decimals: u8,
    policy: RetryPolicy,
) -> Option<Decimal> {
    for attempt in 1..=policy.attempts.max(1) {
        match source.usd_price(chain_id, token, token_decimals).await {
            Ok(price) => return Some(price),
            Err(TraderError::NoPool { .. }) => {
                tracing::debug!(token = %address_key(token), chain_id, "no pool, excluded from monitoring");
                return None;
            }
            Err(e) => {
                tracing::warn!(
                    token = %address_key(token),
                    chain_id,
                    attempt,
                    error = %e,
                    "price read failed"
                );
                if attempt < policy.attempts {
                    let jitter: f64 = rand::rng().random_range(0.5..1.5);
                    let backoff = policy.base_backoff.mul_f64(attempt as f64 * jitter);
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
    None
}

/// Reads pool state on the pricing chain and converts to USD.
pub struct PoolPriceReader {
    registry: Arc<ChainRegistry>,
    db: Database,
    cache: RwLock<HashMap<(u64, Address), (Instant, Decimal)>>,
    ttl: Duration,
}

impl PoolPriceReader {
    pub fn new(registry: Arc<ChainRegistry>, db: Database, cache_ttl: Duration) -> Self {
        Self {
            registry,
            db,
            cache: RwLock::new(HashMap::new()),
            ttl: cache_ttl,
        }
    }

    fn cached(&self, key: (u64, Address)) -> Option<Decimal> {
        let cache = self.cache.read();
        let (at, price) = cache.get(&key)?;
        (at.elapsed() < self.ttl).then_some(*price)
    }

    fn store(&self, key: (u64, Address), price: Decimal) {
        self.cache.write().insert(key, (Instant::now(), price));
    }

    /// ETH price in USD from the pricing chain's WETH/USDC reference pool.
    pub async fn eth_usd_price(&self, ctx: &ChainContext) -> Result<Decimal> {
        let key = (ctx.chain_id(), ctx.weth);
        if let Some(price) = self.cached(key) {
            return Ok(price);
        }

        let pool_addr = ctx
            .factory()
            .get_pool(ctx.weth, ctx.usdc, ETH_USD_FEE_TIER)
            .call()
            .await
            .map_err(|e| TraderError::Pricing(format!("reference pool lookup: {e}")))?;
        if pool_addr == Address::zero() {
            return Err(TraderError::Pricing(format!(
                "no WETH/USDC reference pool on {}",
                ctx.name()
            )));
        }

        let price = self
            .v3_pool_price(ctx, pool_addr, ctx.weth, 18, ctx.cfg.usdc_decimals)
            .await?;
        self.store(key, price);
        Ok(price)
    }

    /// USD price of `token` for a position on `position_chain`, read from
    /// `pool` on the pricing chain.
    pub async fn token_usd_price(
        &self,
        position_chain: u64,
        token: Address,
        token_decimals: u8,
        pool: &PoolRef,
    ) -> Result<Decimal> {
        let key = (position_chain, token);
        if let Some(price) = self.cached(key) {
            return Ok(price);
        }

        let position_ctx = self.registry.get(position_chain)?;
        let pricing_ctx = self.registry.pricing_context(position_chain)?;

        // Testnet quote addresses are remapped to their mainnet
        // equivalents so the mainnet pool can be found.
        let quote_address = if position_ctx.cfg.testnet {
            match pool.quote_token {
                QuoteToken::Weth => pricing_ctx.weth,
                QuoteToken::Usdc => pricing_ctx.usdc,
            }
        } else {
            pool.quote_token_address
        };
        let quote_decimals = match pool.quote_token {
            QuoteToken::Weth => 18,
            QuoteToken::Usdc => pricing_ctx.cfg.usdc_decimals,
        };

        let price_in_quote = match pool.dex {
            DexKind::UniswapV3 => {
                let pricing_pool = pricing_ctx
                    .factory()
                    .get_pool(token, quote_address, pool.fee_tier)
                    .call()
                    .await
                    .map_err(|e| TraderError::Pricing(format!("factory lookup: {e}")))?;
                if pricing_pool == Address::zero() {
                    return Err(TraderError::Pricing(format!(
                        "token {} has no pool on pricing chain {}",
                        address_key(token),
                        pricing_ctx.name()
                    )));
                }
                self.v3_pool_price(pricing_ctx, pricing_pool, token, token_decimals, quote_decimals)
                    .await?
            }
            DexKind::UniswapV4 => {
                self.v4_pool_price(
                    pricing_ctx,
                    token,
                    quote_address,
                    pool.fee_tier,
                    token_decimals,
                    quote_decimals,
                )
                .await?
            }
        };

        let usd = if pool.quote_token.is_stable() {
            price_in_quote
        } else {
            price_in_quote * self.eth_usd_price(pricing_ctx).await?
        };

        if usd <= Decimal::ZERO {
            return Err(TraderError::Pricing(format!(
                "non-positive price for {}",
                address_key(token)
            )));
        }

        self.store(key, usd);
        Ok(usd)
    }

    async fn v3_pool_price(
        &self,
        ctx: &ChainContext,
        pool_addr: Address,
        token: Address,
        token_decimals: u8,
        quote_decimals: u8,
    ) -> Result<Decimal> {
        let pool = ctx.pool(pool_addr);
        let (sqrt_price_x96, ..) = pool
            .slot_0()
            .call()
            .await
            .map_err(|e| TraderError::Pricing(format!("slot0 read: {e}")))?;
        let token0 = pool
            .token_0()
            .call()
            .await
            .map_err(|e| TraderError::Pricing(format!("token0 read: {e}")))?;

        price_from_sqrt_x96(sqrt_price_x96, token == token0, token_decimals, quote_decimals)
            .ok_or_else(|| {
                TraderError::Pricing(format!("unusable slot0 state in {}", address_key(pool_addr)))
            })
    }

    async fn v4_pool_price(
        &self,
        ctx: &ChainContext,
        token: Address,
        quote: Address,
        fee: u32,
        token_decimals: u8,
        quote_decimals: u8,
    ) -> Result<Decimal> {
        let manager = ctx.pool_manager().ok_or_else(|| {
            TraderError::Pricing(format!("no pool manager configured on {}", ctx.name()))
        })?;
        let pool_id = v4_pool_id(token, quote, fee, Address::zero());
        let (sqrt_price_x96, ..) = manager
            .get_slot_0(pool_id)
            .call()
            .await
            .map_err(|e| TraderError::Pricing(format!("getSlot0 read: {e}")))?;

        price_from_sqrt_x96(sqrt_price_x96, token < quote, token_decimals, quote_decimals)
            .ok_or_else(|| {
                TraderError::Pricing(format!("unusable v4 slot0 for {}", address_key(token)))
            })
    }
}

#[async_trait]
impl PriceSource for PoolPriceReader {
    async fn usd_price(
        &self,
        chain_id: u64,
        token: Address,
        token_decimals: u8,
    ) -> Result<Decimal> {
        let pool = self
            .db
            .best_pool(chain_id, token)
            .await?
            .ok_or(TraderError::NoPool {
                chain_id,
                token: address_key(token),
            })?;
        self.token_usd_price(chain_id, token, token_decimals, &pool)
            .await
    }
}
