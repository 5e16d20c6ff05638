//! Core domain types

use chrono::{DateTime, Utc};
use ethers::types::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle of a held position. Transitions are monotonic:
/// Holding → ExitPending → Closed, nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Holding,
    ExitPending,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Holding => "holding",
            PositionStatus::ExitPending => "exit_pending",
            PositionStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "holding" => Some(PositionStatus::Holding),
            "exit_pending" => Some(PositionStatus::ExitPending),
            "closed" => Some(PositionStatus::Closed),
            _ => None,
        }
    }

    /// Whether `self → next` is a legal edge of the lifecycle.
    pub fn can_transition_to(&self, next: PositionStatus) -> bool {
        matches!(
            (self, next),
            (PositionStatus::Holding, PositionStatus::ExitPending)
                | (PositionStatus::ExitPending, PositionStatus::Closed)
        )
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, PositionStatus::Closed)
    }
}

/// Why a position was (or is being) exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    Liquidation,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::Liquidation => "liquidation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "take_profit" => Some(ExitReason::TakeProfit),
            "stop_loss" => Some(ExitReason::StopLoss),
            "liquidation" => Some(ExitReason::Liquidation),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "TP",
            ExitReason::StopLoss => "SL",
            ExitReason::Liquidation => "LIQ",
        }
    }
}

/// One held token balance tracked for exit.
///
/// `entry_price` is immutable once recorded; the storage layer exposes no
/// way to rewrite it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub chain_id: u64,
    pub token: Address,
    pub symbol: String,
    pub decimals: u8,
    /// Entry price in USD per token unit, read from the pool at open.
    pub entry_price: Decimal,
    /// Human-unit quantity held.
    pub quantity: Decimal,
    /// Raw on-chain quantity (10^decimals scaled), decimal string.
    pub quantity_raw: String,
    /// Take-profit offset, fraction of entry price (0.02 = +2%).
    pub take_profit_pct: Decimal,
    /// Stop-loss offset, fraction of entry price (0.02 = -2%).
    pub stop_loss_pct: Decimal,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub exit_reason: Option<ExitReason>,
    pub exit_price: Option<Decimal>,
    pub exit_tx: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    /// Price at or above which take-profit trips.
    pub fn take_profit_price(&self) -> Decimal {
        self.entry_price * (Decimal::ONE + self.take_profit_pct)
    }

    /// Price at or below which stop-loss trips.
    pub fn stop_loss_price(&self) -> Decimal {
        self.entry_price * (Decimal::ONE - self.stop_loss_pct)
    }

    /// Unrealized PnL in USD at `current` price, gross of gas.
    pub fn unrealized_pnl(&self, current: Decimal) -> Decimal {
        (current - self.entry_price) * self.quantity
    }

    /// Position value in USD at entry.
    pub fn entry_value(&self) -> Decimal {
        self.entry_price * self.quantity
    }
}

/// Which pool flavor a discovered pool belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DexKind {
    UniswapV3,
    UniswapV4,
}

impl DexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DexKind::UniswapV3 => "uniswap_v3",
            DexKind::UniswapV4 => "uniswap_v4",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uniswap_v3" => Some(DexKind::UniswapV3),
            "uniswap_v4" => Some(DexKind::UniswapV4),
            _ => None,
        }
    }
}

/// Quote side of a discovered pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QuoteToken {
    Weth,
    Usdc,
}

impl QuoteToken {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteToken::Weth => "WETH",
            QuoteToken::Usdc => "USDC",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "WETH" => Some(QuoteToken::Weth),
            "USDC" => Some(QuoteToken::Usdc),
            _ => None,
        }
    }

    /// Stables price directly in USD; WETH quotes need the ETH/USD leg.
    pub fn is_stable(&self) -> bool {
        matches!(self, QuoteToken::Usdc)
    }

    pub fn decimals(&self) -> u8 {
        match self {
            QuoteToken::Weth => 18,
            QuoteToken::Usdc => 6,
        }
    }
}

/// (chain, token, pool) mapping discovered once via the factory and cached
/// append-only. Never re-derived off-chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolRef {
    pub chain_id: u64,
    pub token: Address,
    pub pool_address: Address,
    pub dex: DexKind,
    pub fee_tier: u32,
    pub quote_token: QuoteToken,
    pub quote_token_address: Address,
    pub discovered_at: DateTime<Utc>,
}

/// A sender authorized to trigger position creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub address: Address,
    pub label: Option<String>,
    pub active: bool,
    pub added_at: DateTime<Utc>,
}

/// Token metadata captured at discovery time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenMeta {
    pub address: Address,
    pub chain_id: u64,
    pub symbol: String,
    pub name: Option<String>,
    pub decimals: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// One executed entry or exit, as recorded for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub chain_id: u64,
    pub token: Address,
    pub symbol: String,
    pub side: Side,
    /// Pool price at execution time, USD per token unit.
    pub price: Decimal,
    pub amount: Decimal,
    /// Net PnL in USD (gross minus gas), zero for entries.
    pub pnl: Decimal,
    /// Gas spent in native units of the execution chain.
    pub gas_native: Decimal,
    pub tx_hash: Option<String>,
    pub executed_at: DateTime<Utc>,
}

/// Lowercase hex form used as the canonical storage key for addresses.
pub fn address_key(addr: Address) -> String {
    format!("{:#x}", addr)
}
