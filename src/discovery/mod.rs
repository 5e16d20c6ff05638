//! On-chain pool discovery
//!
//! Maps a token to its canonical pool through the factory, trying WETH and
//! USDC quotes across the standard fee tiers. Results are appended to the
//! registry and reused; discovery never runs twice for a cached token.

use crate::chain::ChainContext;
use crate::error::Result;
use crate::storage::Database;
use crate::types::{address_key, DexKind, PoolRef, QuoteToken};
use chrono::Utc;
use ethers::types::Address;

pub const FEE_TIERS: [u32; 3] = [500, 3000, 10_000];

pub struct PoolDiscovery {
    db: Database,
}

impl PoolDiscovery {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Canonical pool for `token` on `ctx`'s chain. Cached mappings win;
    /// otherwise every (quote, fee) combination is probed on-chain and all
    /// existing pools are recorded. Returns `None` when the token has no
    /// discoverable pool; such tokens are excluded from monitoring.
    pub async fn canonical_pool(
        &self,
        ctx: &ChainContext,
        token: Address,
    ) -> Result<Option<PoolRef>> {
        if let Some(cached) = self.db.best_pool(ctx.chain_id(), token).await? {
            return Ok(Some(cached));
        }

        let factory = ctx.factory();
        let quotes = [
            (ctx.weth, QuoteToken::Weth),
            (ctx.usdc, QuoteToken::Usdc),
        ];

        let mut found_any = false;
        for (quote_addr, quote) in quotes {
            if token == quote_addr {
                continue;
            }
            for fee in FEE_TIERS {
                let pool_addr = match factory.get_pool(token, quote_addr, fee).call().await {
                    Ok(addr) => addr,
                    Err(e) => {
                        tracing::debug!(
                            token = %address_key(token),
                            chain = ctx.name(),
                            fee,
                            error = %e,
                            "factory getPool failed"
                        );
                        continue;
                    }
                };
                if pool_addr == Address::zero() {
                    continue;
                }

                self.db
                    .add_pool(&PoolRef {
                        chain_id: ctx.chain_id(),
                        token,
                        pool_address: pool_addr,
                        dex: DexKind::UniswapV3,
                        fee_tier: fee,
                        quote_token: quote,
                        quote_token_address: quote_addr,
                        discovered_at: Utc::now(),
                    })
                    .await?;
                found_any = true;
                tracing::info!(
                    token = %address_key(token),
                    chain = ctx.name(),
                    pool = %address_key(pool_addr),
                    quote = quote.as_str(),
                    fee,
                    "pool discovered"
                );
            }
        }

        if !found_any {
            tracing::debug!(
                token = %address_key(token),
                chain = ctx.name(),
                "no pool found for token"
            );
            return Ok(None);
        }
        self.db.best_pool(ctx.chain_id(), token).await
    }
}
