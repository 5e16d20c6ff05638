//! The control loop
//!
//! Single-threaded and event-triggered: one startup scan, TP/SL
//! evaluation on a tick, and exactly one rescan after each executed trade.
//! There is no timer-driven wallet rescan anywhere in this module; that
//! is a deliberate scheduler rule, not an accident of implementation.
//!
//! All position mutations flow through this task, serialized per tick, so
//! an exit submission can never race a concurrent rescan.

use crate::chain::{ChainContext, ChainRegistry};
use crate::config::Config;
use crate::controls::ControlSignals;
use crate::dashboard::{SharedStatus, StatusSnapshot};
use crate::discovery::PoolDiscovery;
use crate::error::{Result, TraderError};
use crate::executor::SwapExecutor;
use crate::monitor::check_position;
use crate::pricing::{read_price_with_retry, PoolPriceReader, RetryPolicy};
use crate::scanner::{NewHolding, ScanTrigger, WalletScanner};
use crate::storage::Database;
use crate::types::{
    address_key, ExitReason, Position, PositionStatus, Side, TradeRecord,
};
use chrono::Utc;
use ethers::types::U256;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct Trader {
    config: Config,
    registry: Arc<ChainRegistry>,
    db: Database,
    pricing: Arc<PoolPriceReader>,
    discovery: PoolDiscovery,
    scanner: WalletScanner,
    executor: SwapExecutor,
    controls: ControlSignals,
    status: SharedStatus,
    retry: RetryPolicy,
    started_at: Instant,
}

impl Trader {
    pub fn new(
        config: Config,
        registry: Arc<ChainRegistry>,
        db: Database,
        controls: ControlSignals,
        status: SharedStatus,
        dry_run: bool,
    ) -> Self {
        let pricing = Arc::new(PoolPriceReader::new(
            registry.clone(),
            db.clone(),
            Duration::from_secs(config.trading.price_cache_ttl_secs),
        ));
        let retry = RetryPolicy {
            attempts: config.trading.price_retry_attempts,
            base_backoff: Duration::from_millis(config.trading.price_retry_backoff_ms),
        };

        Self {
            discovery: PoolDiscovery::new(db.clone()),
            scanner: WalletScanner::new(db.clone(), config.scanner.clone()),
            executor: SwapExecutor::new(&config.trading, dry_run),
            pricing,
            retry,
            config,
            registry,
            db,
            controls,
            status,
            started_at: Instant::now(),
        }
    }

    pub async fn run(&self) -> Result<()> {
        let chains: Vec<String> = self
            .registry
            .iter()
            .map(|c| format!("{} ({})", c.name(), c.chain_id()))
            .collect();
        tracing::info!(
            wallet = %address_key(self.registry.wallet_address()),
            chains = %chains.join(", "),
            tp_pct = %self.config.trading.take_profit_pct,
            sl_pct = %self.config.trading.stop_loss_pct,
            gas_reserve = %self.config.trading.gas_reserve_native,
            "trader starting"
        );

        // The one startup scan. Every later scan is trade-triggered.
        self.rescan(ScanTrigger::Startup).await;

        let tick = Duration::from_secs(self.config.trading.tick_interval_secs.max(1));
        let status_every = Duration::from_secs(self.config.trading.status_interval_secs.max(1));
        let mut last_status_log = Instant::now();

        loop {
            if self.controls.stop_requested() {
                tracing::warn!("stop signal received, shutting down");
                break;
            }

            if self.controls.take_sell_all() {
                if self.sell_all().await {
                    self.rescan(ScanTrigger::PostTrade).await;
                }
            }

            let traded = self.evaluate_positions().await;
            if traded {
                self.rescan(ScanTrigger::PostTrade).await;
            }

            self.update_status().await;
            if last_status_log.elapsed() >= status_every {
                last_status_log = Instant::now();
                self.log_status().await;
            }

            tokio::time::sleep(tick).await;
        }

        Ok(())
    }

    /// Scan every connected chain for new whitelisted holdings. A chain
    /// whose scan fails is skipped for this pass.
    async fn rescan(&self, trigger: ScanTrigger) {
        for ctx in self.registry.iter() {
            let holdings = match self.scanner.scan_chain(ctx, trigger).await {
                Ok(h) => h,
                Err(e) => {
                    tracing::warn!(
                        chain = ctx.name(),
                        trigger = trigger.as_str(),
                        error = %e,
                        "wallet scan failed, skipping chain this pass"
                    );
                    continue;
                }
            };
            for holding in holdings {
                if let Err(e) = self.enter_holding(ctx, &holding).await {
                    tracing::warn!(
                        chain = ctx.name(),
                        token = %address_key(holding.token),
                        error = %e,
                        "could not enter holding"
                    );
                }
            }
        }
    }

    /// Open a Holding position for a scanned balance: discover the pool,
    /// price the entry from it, and record the position. No swap happens
    /// on entry, since the tokens are already held.
    async fn enter_holding(&self, ctx: &Arc<ChainContext>, holding: &NewHolding) -> Result<()> {
        let pool = match self.discovery.canonical_pool(ctx, holding.token).await? {
            Some(pool) => pool,
            None => {
                tracing::info!(
                    token = %address_key(holding.token),
                    symbol = %holding.symbol,
                    chain = ctx.name(),
                    "no pool discovered, token excluded from monitoring"
                );
                return Ok(());
            }
        };

        let entry_price = match read_price_with_retry(
            self.pricing.as_ref(),
            ctx.chain_id(),
            holding.token,
            holding.decimals,
            self.retry,
        )
        .await
        {
            Some(price) => price,
            None => {
                tracing::warn!(
                    symbol = %holding.symbol,
                    chain = ctx.name(),
                    "cannot price entry from pool, skipping"
                );
                return Ok(());
            }
        };

        // Entry guard: on real chains, don't open a position whose
        // take-profit exit would be eaten by gas.
        if !ctx.cfg.testnet {
            let expected_tp_profit =
                entry_price * holding.quantity * self.config.trading.take_profit_pct;
            let est_gas_usd = self.estimated_gas_usd(ctx).await;
            if est_gas_usd >= expected_tp_profit {
                tracing::info!(
                    symbol = %holding.symbol,
                    chain = ctx.name(),
                    est_gas_usd = %est_gas_usd,
                    expected_tp_profit = %expected_tp_profit,
                    "skipping entry: exit gas exceeds take-profit upside"
                );
                return Ok(());
            }
        }

        let position = Position {
            id: uuid::Uuid::new_v4().to_string(),
            chain_id: ctx.chain_id(),
            token: holding.token,
            symbol: holding.symbol.clone(),
            decimals: holding.decimals,
            entry_price,
            quantity: holding.quantity,
            quantity_raw: holding.quantity_raw.to_string(),
            take_profit_pct: self.config.trading.take_profit_pct,
            stop_loss_pct: self.config.trading.stop_loss_pct,
            status: PositionStatus::Holding,
            opened_at: Utc::now(),
            exit_reason: None,
            exit_price: None,
            exit_tx: None,
            closed_at: None,
        };

        match self.db.open_position(&position).await {
            Ok(()) => {}
            Err(TraderError::PositionExists { .. }) => return Ok(()),
            Err(e) => return Err(e),
        }

        self.record_trade(&position, Side::Buy, entry_price, Decimal::ZERO, Decimal::ZERO, None)
            .await;

        tracing::info!(
            symbol = %position.symbol,
            chain = ctx.name(),
            quantity = %position.quantity,
            entry_price = %entry_price,
            tp = %position.take_profit_price(),
            sl = %position.stop_loss_price(),
            "HOLD position opened"
        );

        // Pre-approve so a later threshold exit doesn't wait on approvals.
        if let Err(e) = self
            .executor
            .ensure_permit2_approval(ctx, holding.token)
            .await
        {
            tracing::warn!(
                symbol = %position.symbol,
                error = %e,
                "pre-approval failed, will retry at exit time"
            );
        }

        Ok(())
    }

    /// One TP/SL pass over every open position. Returns whether any exit
    /// swap executed (which then triggers the single post-trade rescan).
    async fn evaluate_positions(&self) -> bool {
        let positions = match self.db.open_positions().await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "cannot load open positions");
                return false;
            }
        };

        let mut traded = false;
        for position in positions {
            let ctx = match self.registry.get(position.chain_id) {
                Ok(ctx) => ctx.clone(),
                Err(_) => continue,
            };

            // Freshly read pool price, retried on failure. No decision is
            // ever made without one.
            let current_price = match read_price_with_retry(
                self.pricing.as_ref(),
                position.chain_id,
                position.token,
                position.decimals,
                self.retry,
            )
            .await
            {
                Some(price) => price,
                None => continue,
            };

            self.status
                .write()
                .await
                .last_prices
                .insert(position.id.clone(), current_price);

            match position.status {
                PositionStatus::Holding => {
                    let reason = match check_position(&position, current_price) {
                        Some(reason) => reason,
                        None => continue,
                    };
                    if self.exit_position(&ctx, &position, reason, current_price, true).await {
                        traded = true;
                    }
                }
                PositionStatus::ExitPending => {
                    // A previous exit attempt was interrupted or reverted;
                    // finish the job at the current price.
                    let reason = position.exit_reason.unwrap_or(ExitReason::Liquidation);
                    if self.exit_position(&ctx, &position, reason, current_price, false).await {
                        traded = true;
                    }
                }
                PositionStatus::Closed => {}
            }
        }
        traded
    }

    /// Drive one position through ExitPending to Closed via an exit swap.
    /// Returns true only when a swap actually executed.
    async fn exit_position(
        &self,
        ctx: &Arc<ChainContext>,
        position: &Position,
        reason: ExitReason,
        current_price: Decimal,
        mark_pending: bool,
    ) -> bool {
        if mark_pending {
            if let Err(e) = self.db.mark_exit_pending(&position.id, reason).await {
                tracing::error!(position = %position.id, error = %e, "cannot mark exit pending");
                return false;
            }
        }

        let pool = match self.db.best_pool(position.chain_id, position.token).await {
            Ok(Some(pool)) => pool,
            _ => {
                tracing::error!(
                    position = %position.id,
                    "pool reference lost, position stays exit-pending"
                );
                return false;
            }
        };

        // Sell what we actually hold, capped by the recorded quantity.
        let (_, balance_raw, _) = match ctx.token_balance(position.token).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(position = %position.id, error = %e, "balance read failed");
                return false;
            }
        };
        let recorded_raw =
            U256::from_dec_str(&position.quantity_raw).unwrap_or(balance_raw);
        let sell_amount = balance_raw.min(recorded_raw);

        if sell_amount.is_zero() {
            // Nothing left to sell (moved externally); close the book.
            tracing::warn!(
                position = %position.id,
                symbol = %position.symbol,
                "no balance left to exit, closing position without swap"
            );
            if let Err(e) = self.db.close_position(&position.id, current_price, None).await {
                tracing::error!(position = %position.id, error = %e, "close failed");
            }
            return false;
        }

        let label = format!("{} {}→USDC", reason.tag(), position.symbol);
        let outcome = match self
            .executor
            .sell_for_usdc(ctx, position.token, sell_amount, &pool, &label)
            .await
        {
            Ok(outcome) => outcome,
            Err(TraderError::GasReserve { .. }) => {
                tracing::warn!(
                    position = %position.id,
                    chain = ctx.name(),
                    "gas reserve would be breached, exit refused"
                );
                return false;
            }
            Err(e) => {
                tracing::error!(
                    position = %position.id,
                    error = %e,
                    "exit swap failed, position stays exit-pending"
                );
                return false;
            }
        };

        let gross_pnl = position.unrealized_pnl(current_price);
        let gas_usd = self.gas_to_usd(ctx, outcome.gas_native).await;
        let net_pnl = gross_pnl - gas_usd;

        if let Err(e) = self
            .db
            .close_position(&position.id, current_price, outcome.tx_hash.as_deref())
            .await
        {
            tracing::error!(position = %position.id, error = %e, "close failed after swap");
            return true;
        }

        self.record_trade(
            position,
            Side::Sell,
            current_price,
            net_pnl,
            outcome.gas_native,
            outcome.tx_hash.clone(),
        )
        .await;

        let change_pct = if position.entry_price > Decimal::ZERO {
            (current_price / position.entry_price - Decimal::ONE) * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };
        tracing::info!(
            tag = reason.tag(),
            symbol = %position.symbol,
            chain = ctx.name(),
            price = %current_price,
            entry = %position.entry_price,
            change_pct = %change_pct.round_dp(2),
            net_pnl = %net_pnl.round_dp(4),
            "position exited"
        );

        true
    }

    /// Liquidate every open position to USDC. Chains below the gas
    /// reserve are skipped, not forced. Returns whether any swap ran.
    async fn sell_all(&self) -> bool {
        tracing::warn!("SELL-ALL: liquidating all open positions");

        let positions = match self.db.open_positions().await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "cannot load positions for liquidation");
                return false;
            }
        };
        let mut traded = false;

        for position in positions {
            let ctx = match self.registry.get(position.chain_id) {
                Ok(ctx) => ctx.clone(),
                Err(e) => {
                    tracing::warn!(position = %position.id, error = %e, "no chain context, skipping");
                    continue;
                }
            };

            let mark_pending = position.status == PositionStatus::Holding;

            // Liquidation still prices from the pool when it can; the
            // entry price is only a bookkeeping fallback, never an input
            // to any threshold decision.
            let price = read_price_with_retry(
                self.pricing.as_ref(),
                position.chain_id,
                position.token,
                position.decimals,
                self.retry,
            )
            .await
            .unwrap_or(position.entry_price);

            if self
                .exit_position(&ctx, &position, ExitReason::Liquidation, price, mark_pending)
                .await
            {
                traded = true;
            }
        }

        tracing::warn!("SELL-ALL: liquidation pass complete");
        traded
    }

    async fn estimated_gas_usd(&self, ctx: &Arc<ChainContext>) -> Decimal {
        let gas_native = match self.executor.estimated_exit_gas(ctx).await {
            Ok(g) => g,
            Err(_) => return Decimal::ZERO,
        };
        self.gas_to_usd(ctx, gas_native).await
    }

    /// Convert native gas spend to USD via the pricing chain's reference
    /// pool. Failure degrades the conversion to zero with a warning;
    /// gas accounting must not block an exit that already happened.
    async fn gas_to_usd(&self, ctx: &Arc<ChainContext>, gas_native: Decimal) -> Decimal {
        if gas_native.is_zero() {
            return Decimal::ZERO;
        }
        let pricing_ctx = match self.registry.pricing_context(ctx.chain_id()) {
            Ok(c) => c,
            Err(_) => return Decimal::ZERO,
        };
        match self.pricing.eth_usd_price(pricing_ctx).await {
            Ok(eth_usd) => gas_native * eth_usd,
            Err(e) => {
                tracing::warn!(error = %e, "eth/usd read failed, gas recorded unpriced");
                Decimal::ZERO
            }
        }
    }

    async fn record_trade(
        &self,
        position: &Position,
        side: Side,
        price: Decimal,
        pnl: Decimal,
        gas_native: Decimal,
        tx_hash: Option<String>,
    ) {
        let trade = TradeRecord {
            id: uuid::Uuid::new_v4().to_string(),
            chain_id: position.chain_id,
            token: position.token,
            symbol: position.symbol.clone(),
            side,
            price,
            amount: position.quantity,
            pnl,
            gas_native,
            tx_hash,
            executed_at: Utc::now(),
        };
        if let Err(e) = self.db.record_trade(&trade).await {
            tracing::error!(error = %e, "trade record failed");
        }
    }

    async fn update_status(&self) {
        let open = self.db.open_positions().await.unwrap_or_default();
        let total_pnl = self.db.total_pnl().await.unwrap_or(Decimal::ZERO);
        let trade_count = self.db.trade_count().await.unwrap_or(0);

        let mut status = self.status.write().await;
        let open_ids: std::collections::HashSet<&str> =
            open.iter().map(|p| p.id.as_str()).collect();
        status.last_prices.retain(|id, _| open_ids.contains(id.as_str()));

        status.wallet = address_key(self.registry.wallet_address());
        status.chains = self.registry.iter().map(|c| c.name().to_string()).collect();
        status.open_positions = open.len() as u64;
        status.total_pnl = total_pnl;
        status.trade_count = trade_count;
        status.uptime_secs = self.started_at.elapsed().as_secs();
        status.updated = Some(Utc::now());
    }

    async fn log_status(&self) {
        let status = self.status.read().await;
        tracing::info!(
            open_positions = status.open_positions,
            total_pnl = %status.total_pnl.round_dp(4),
            trades = status.trade_count,
            uptime_secs = status.uptime_secs,
            "status"
        );
    }
}

impl StatusSnapshot {
    /// Seed a snapshot before the first tick so the API has something to
    /// serve during startup scans.
    pub fn initial(wallet: String, chains: Vec<String>) -> Self {
        Self {
            wallet,
            chains,
            updated: Some(Utc::now()),
            ..Self::default()
        }
    }
}
