//! Unit tests for exit evaluation

use super::*;
use crate::types::{ExitReason, Position, PositionStatus};
use chrono::Utc;
use ethers::types::Address;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn position(entry: Decimal, tp: Decimal, sl: Decimal) -> Position {
    Position {
        id: "pos-1".to_string(),
        chain_id: 1,
        token: Address::repeat_byte(0xaa),
        symbol: "TKN".to_string(),
        decimals: 18,
        entry_price: entry,
        quantity: dec!(5),
        quantity_raw: "5000000000000000000".to_string(),
        take_profit_pct: tp,
        stop_loss_pct: sl,
        status: PositionStatus::Holding,
        opened_at: Utc::now(),
        exit_reason: None,
        exit_price: None,
        exit_tx: None,
        closed_at: None,
    }
}

#[test]
fn test_take_profit_at_default_threshold() {
    // Entry 100, default 2% thresholds: 102 trips take-profit
    assert_eq!(
        evaluate_exit(dec!(100), dec!(102), dec!(0.02), dec!(0.02)),
        Some(ExitReason::TakeProfit)
    );
}

#[test]
fn test_stop_loss_at_default_threshold() {
    // Entry 100, default 2% thresholds: 98 trips stop-loss
    assert_eq!(
        evaluate_exit(dec!(100), dec!(98), dec!(0.02), dec!(0.02)),
        Some(ExitReason::StopLoss)
    );
}

#[test]
fn test_inside_band_triggers_nothing() {
    // Entry 100: 100.5 is inside the band
    assert_eq!(evaluate_exit(dec!(100), dec!(100.5), dec!(0.02), dec!(0.02)), None);
    assert_eq!(evaluate_exit(dec!(100), dec!(99.5), dec!(0.02), dec!(0.02)), None);
    assert_eq!(evaluate_exit(dec!(100), dec!(100), dec!(0.02), dec!(0.02)), None);
}

#[test]
fn test_thresholds_are_inclusive() {
    assert_eq!(
        evaluate_exit(dec!(100), dec!(102.0), dec!(0.02), dec!(0.02)),
        Some(ExitReason::TakeProfit)
    );
    assert_eq!(
        evaluate_exit(dec!(100), dec!(98.0), dec!(0.02), dec!(0.02)),
        Some(ExitReason::StopLoss)
    );
    // Just inside either bound
    assert_eq!(
        evaluate_exit(dec!(100), dec!(101.999999), dec!(0.02), dec!(0.02)),
        None
    );
    assert_eq!(
        evaluate_exit(dec!(100), dec!(98.000001), dec!(0.02), dec!(0.02)),
        None
    );
}

#[test]
fn test_asymmetric_thresholds() {
    // 5% TP, 1% SL
    assert_eq!(
        evaluate_exit(dec!(200), dec!(210), dec!(0.05), dec!(0.01)),
        Some(ExitReason::TakeProfit)
    );
    assert_eq!(
        evaluate_exit(dec!(200), dec!(198), dec!(0.05), dec!(0.01)),
        Some(ExitReason::StopLoss)
    );
    assert_eq!(evaluate_exit(dec!(200), dec!(206), dec!(0.05), dec!(0.01)), None);
}

#[test]
fn test_small_prices_keep_precision() {
    // Micro-cap style prices must not lose the band to rounding
    assert_eq!(
        evaluate_exit(dec!(0.00004), dec!(0.0000408), dec!(0.02), dec!(0.02)),
        Some(ExitReason::TakeProfit)
    );
    assert_eq!(
        evaluate_exit(dec!(0.00004), dec!(0.0000399), dec!(0.02), dec!(0.02)),
        None
    );
}

#[test]
fn test_nonpositive_entry_never_triggers() {
    assert_eq!(evaluate_exit(dec!(0), dec!(10), dec!(0.02), dec!(0.02)), None);
    assert_eq!(evaluate_exit(dec!(-1), dec!(10), dec!(0.02), dec!(0.02)), None);
}

#[test]
fn test_check_position_uses_position_thresholds() {
    let pos = position(dec!(100), dec!(0.10), dec!(0.02));
    // 2% up is not enough with a 10% TP on this position
    assert_eq!(check_position(&pos, dec!(102)), None);
    assert_eq!(check_position(&pos, dec!(110)), Some(ExitReason::TakeProfit));
    assert_eq!(check_position(&pos, dec!(98)), Some(ExitReason::StopLoss));
}
