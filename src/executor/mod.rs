//! Exit swap execution
//!
//! Submits token exits through the universal router with the two-step
//! Permit2 approval chain. Every submission is preceded by the gas-reserve
//! projection; a breach refuses the swap outright.

pub mod encoding;

#[cfg(test)]
mod tests;

use crate::chain::{wei_to_native, ChainContext};
use crate::config::TradingConfig;
use crate::error::{Result, TraderError};
use crate::types::{address_key, PoolRef, QuoteToken};
use chrono::Utc;
use encoding::encode_v4_swap;
use ethers::types::{Address, U256};
use rust_decimal::Decimal;

/// Approvals below this threshold are considered spent and re-issued.
fn approval_floor() -> U256 {
    U256::from(1) << 128
}

fn permit2_max_amount() -> U256 {
    (U256::from(1) << 160) - 1
}

const PERMIT2_EXPIRY_SECS: u64 = 30 * 86_400;
const PERMIT2_EXPIRY_SLACK_SECS: u64 = 3_600;
const APPROVAL_GAS_LIMIT: u64 = 100_000;

/// True when the post-swap native balance projection stays at or above the
/// reserve floor.
pub fn reserve_allows_swap(balance: Decimal, estimated_gas: Decimal, reserve: Decimal) -> bool {
    balance - estimated_gas >= reserve
}

/// Result of one confirmed (or simulated) swap.
#[derive(Debug, Clone)]
pub struct SwapOutcome {
    /// None in dry-run mode.
    pub tx_hash: Option<String>,
    /// Gas actually spent, in native units of the execution chain.
    pub gas_native: Decimal,
}

pub struct SwapExecutor {
    gas_reserve: Decimal,
    gas_limit: u64,
    deadline_secs: u64,
    dry_run: bool,
}

impl SwapExecutor {
    pub fn new(trading: &TradingConfig, dry_run: bool) -> Self {
        Self {
            gas_reserve: trading.gas_reserve_native,
            gas_limit: trading.swap_gas_limit,
            deadline_secs: trading.swap_deadline_secs,
            dry_run,
        }
    }

    /// Refuse the swap when the projected post-swap native balance would
    /// fall below the reserve floor. Fails closed on balance-read errors.
    pub async fn check_gas_reserve(&self, ctx: &ChainContext) -> Result<()> {
        let balance = wei_to_native(ctx.native_balance().await?);
        let estimated = ctx.estimate_swap_gas_native(self.gas_limit).await?;
        if !reserve_allows_swap(balance, estimated, self.gas_reserve) {
            return Err(TraderError::GasReserve {
                chain_id: ctx.chain_id(),
                balance: balance.to_string(),
                reserve: self.gas_reserve.to_string(),
            });
        }
        Ok(())
    }

    /// Estimated cost of one exit swap in native units, for entry guards.
    pub async fn estimated_exit_gas(&self, ctx: &ChainContext) -> Result<Decimal> {
        ctx.estimate_swap_gas_native(self.gas_limit).await
    }

    /// Two-step approval: ERC20 → Permit2, then Permit2 → router. Each
    /// step is skipped when the existing allowance still covers it.
    pub async fn ensure_permit2_approval(&self, ctx: &ChainContext, token: Address) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }

        let wallet = ctx.wallet_address();
        let permit2_addr = crate::chain::permit2_address();
        let erc20 = ctx.erc20(token);

        let erc20_allowance = erc20
            .allowance(wallet, permit2_addr)
            .call()
            .await
            .map_err(|e| TraderError::Execution(format!("allowance read: {e}")))?;
        if erc20_allowance < approval_floor() {
            let fees = ctx.gas_fees().await?;
            let mut call = erc20.approve(permit2_addr, U256::MAX);
            call.tx.set_gas(U256::from(APPROVAL_GAS_LIMIT));
            fees.apply_to(&mut call.tx);
            let pending = call
                .send()
                .await
                .map_err(|e| TraderError::Execution(format!("erc20 approve: {e}")))?;
            let receipt = pending
                .await
                .map_err(|e| TraderError::Execution(format!("erc20 approve receipt: {e}")))?
                .ok_or_else(|| TraderError::Execution("erc20 approve tx dropped".into()))?;
            if receipt.status != Some(1u64.into()) {
                return Err(TraderError::Execution(format!(
                    "erc20 → permit2 approval reverted for {}",
                    address_key(token)
                )));
            }
            tracing::info!(token = %address_key(token), chain = ctx.name(), "erc20 → permit2 approved");
        }

        let permit2 = ctx.permit2();
        let (amount, expiration, _nonce) = permit2
            .allowance(wallet, token, ctx.router_address)
            .call()
            .await
            .map_err(|e| TraderError::Execution(format!("permit2 allowance read: {e}")))?;
        let now = Utc::now().timestamp() as u64;
        if amount < approval_floor() || expiration < now + PERMIT2_EXPIRY_SLACK_SECS {
            let fees = ctx.gas_fees().await?;
            let mut call = permit2.approve(
                token,
                ctx.router_address,
                permit2_max_amount(),
                now + PERMIT2_EXPIRY_SECS,
            );
            call.tx.set_gas(U256::from(APPROVAL_GAS_LIMIT));
            fees.apply_to(&mut call.tx);
            let pending = call
                .send()
                .await
                .map_err(|e| TraderError::Execution(format!("permit2 approve: {e}")))?;
            let receipt = pending
                .await
                .map_err(|e| TraderError::Execution(format!("permit2 approve receipt: {e}")))?
                .ok_or_else(|| TraderError::Execution("permit2 approve tx dropped".into()))?;
            if receipt.status != Some(1u64.into()) {
                return Err(TraderError::Execution(format!(
                    "permit2 → router approval reverted for {}",
                    address_key(token)
                )));
            }
            tracing::info!(token = %address_key(token), chain = ctx.name(), "permit2 → router approved");
        }

        Ok(())
    }

    /// Sell `amount_raw` of `token` into USDC on the pool's chain, routing
    /// through WETH when the discovered pool quotes in WETH.
    pub async fn sell_for_usdc(
        &self,
        ctx: &ChainContext,
        token: Address,
        amount_raw: U256,
        pool: &PoolRef,
        label: &str,
    ) -> Result<SwapOutcome> {
        match pool.quote_token {
            QuoteToken::Usdc => {
                self.execute_swap(ctx, token, ctx.usdc, amount_raw, pool.fee_tier, label)
                    .await
            }
            QuoteToken::Weth => {
                let first = self
                    .execute_swap(ctx, token, ctx.weth, amount_raw, pool.fee_tier, label)
                    .await?;
                let mut total_gas = first.gas_native;

                // Second leg: whatever WETH we now hold goes to USDC.
                let (_, weth_raw, _) = ctx.token_balance(ctx.weth).await?;
                if !weth_raw.is_zero() {
                    let second = self
                        .execute_swap(ctx, ctx.weth, ctx.usdc, weth_raw, 500, "WETH→USDC")
                        .await?;
                    total_gas += second.gas_native;
                }

                Ok(SwapOutcome {
                    tx_hash: first.tx_hash,
                    gas_native: total_gas,
                })
            }
        }
    }

    async fn execute_swap(
        &self,
        ctx: &ChainContext,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        fee_tier: u32,
        label: &str,
    ) -> Result<SwapOutcome> {
        // Hard gas-reserve guard: never spend into the reserve.
        self.check_gas_reserve(ctx).await?;
        self.ensure_permit2_approval(ctx, token_in).await?;

        let call_data = encode_v4_swap(
            token_in,
            token_out,
            amount_in,
            U256::zero(),
            fee_tier,
            Address::zero(),
        );
        let deadline = U256::from(Utc::now().timestamp() as u64 + self.deadline_secs);

        if self.dry_run {
            tracing::info!(
                label,
                chain = ctx.name(),
                amount_in = %amount_in,
                "DRY RUN: would submit exit swap"
            );
            return Ok(SwapOutcome {
                tx_hash: None,
                gas_native: Decimal::ZERO,
            });
        }

        let fees = ctx.gas_fees().await?;
        let router = ctx.router();
        let mut call = router.execute(call_data.commands, call_data.inputs, deadline);
        call.tx.set_gas(U256::from(self.gas_limit));
        fees.apply_to(&mut call.tx);

        let pending = call
            .send()
            .await
            .map_err(|e| TraderError::Execution(format!("{label}: {e}")))?;
        let tx_hash = format!("{:#x}", pending.tx_hash());
        tracing::info!(label, chain = ctx.name(), tx = %tx_hash, "swap submitted");

        let receipt = pending
            .await
            .map_err(|e| TraderError::Execution(format!("{label} receipt: {e}")))?
            .ok_or_else(|| TraderError::Execution(format!("{label}: tx dropped")))?;

        if receipt.status != Some(1u64.into()) {
            return Err(TraderError::Execution(format!(
                "{label} reverted on-chain (tx {tx_hash})"
            )));
        }

        let gas_wei = receipt.gas_used.unwrap_or_default()
            * receipt.effective_gas_price.unwrap_or_default();
        let gas_native = wei_to_native(gas_wei);
        tracing::info!(label, tx = %tx_hash, gas = %gas_native, "swap confirmed");

        Ok(SwapOutcome {
            tx_hash: Some(tx_hash),
            gas_native,
        })
    }
}
