//! Position monitoring
//!
//! Decides, per open position, whether the freshly read pool price has
//! crossed the configured exit thresholds. The decision is pure: callers
//! are responsible for supplying a price that actually came from the
//! mainnet pool this pass.

#[cfg(test)]
mod tests;

use crate::types::{ExitReason, Position};
use rust_decimal::Decimal;

/// Evaluate the exit thresholds for an entry price against the current
/// pool price. Take-profit wins if both trip at once (can only happen on
/// degenerate threshold configs).
pub fn evaluate_exit(
    entry_price: Decimal,
    current_price: Decimal,
    take_profit_pct: Decimal,
    stop_loss_pct: Decimal,
) -> Option<ExitReason> {
    if entry_price <= Decimal::ZERO {
        return None;
    }

    let tp_price = entry_price * (Decimal::ONE + take_profit_pct);
    let sl_price = entry_price * (Decimal::ONE - stop_loss_pct);

    if current_price >= tp_price {
        Some(ExitReason::TakeProfit)
    } else if current_price <= sl_price {
        Some(ExitReason::StopLoss)
    } else {
        None
    }
}

/// Exit decision for one position at a current price.
pub fn check_position(position: &Position, current_price: Decimal) -> Option<ExitReason> {
    evaluate_exit(
        position.entry_price,
        current_price,
        position.take_profit_pct,
        position.stop_loss_pct,
    )
}

/// A decided exit, carried from evaluation to execution.
#[derive(Debug, Clone)]
pub struct ExitDecision {
    pub position_id: String,
    pub reason: ExitReason,
    /// Pool price that triggered the exit, kept for PnL reporting.
    pub trigger_price: Decimal,
}
