//! Storage tests over a throwaway SQLite file

use super::*;
use crate::types::{DexKind, ExitReason, PoolRef, Position, PositionStatus, QuoteToken, Side, TradeRecord};
use chrono::Utc;
use ethers::types::Address;
use rust_decimal_macros::dec;
use tempfile::TempDir;

async fn test_db() -> (Database, TempDir) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("trader.db");
    let db = Database::connect(path.to_str().unwrap()).await.unwrap();
    (db, dir)
}

fn token(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

fn make_position(id: &str, chain_id: u64, tok: Address) -> Position {
    Position {
        id: id.to_string(),
        chain_id,
        token: tok,
        symbol: "TKN".to_string(),
        decimals: 18,
        entry_price: dec!(1.25),
        quantity: dec!(100),
        quantity_raw: "100000000000000000000".to_string(),
        take_profit_pct: dec!(0.02),
        stop_loss_pct: dec!(0.02),
        status: PositionStatus::Holding,
        opened_at: Utc::now(),
        exit_reason: None,
        exit_price: None,
        exit_tx: None,
        closed_at: None,
    }
}

fn make_pool(chain_id: u64, tok: Address, pool: Address, quote: QuoteToken) -> PoolRef {
    PoolRef {
        chain_id,
        token: tok,
        pool_address: pool,
        dex: DexKind::UniswapV3,
        fee_tier: 3000,
        quote_token: quote,
        quote_token_address: token(0xee),
        discovered_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_open_position_roundtrip() {
    let (db, _dir) = test_db().await;
    let pos = make_position("p1", 1, token(0x11));
    db.open_position(&pos).await.unwrap();

    let loaded = db.get_position("p1").await.unwrap().unwrap();
    assert_eq!(loaded.status, PositionStatus::Holding);
    assert_eq!(loaded.entry_price, dec!(1.25));
    assert_eq!(loaded.quantity, dec!(100));
    assert_eq!(loaded.token, token(0x11));
}

#[tokio::test]
async fn test_one_open_position_per_pair() {
    let (db, _dir) = test_db().await;
    db.open_position(&make_position("p1", 1, token(0x11)))
        .await
        .unwrap();

    let err = db
        .open_position(&make_position("p2", 1, token(0x11)))
        .await
        .unwrap_err();
    assert!(matches!(err, TraderError::PositionExists { .. }));

    // Same token on another chain is a different pair
    db.open_position(&make_position("p3", 10, token(0x11)))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_full_lifecycle() {
    let (db, _dir) = test_db().await;
    db.open_position(&make_position("p1", 1, token(0x11)))
        .await
        .unwrap();

    db.mark_exit_pending("p1", ExitReason::TakeProfit)
        .await
        .unwrap();
    let pending = db.get_position("p1").await.unwrap().unwrap();
    assert_eq!(pending.status, PositionStatus::ExitPending);
    assert_eq!(pending.exit_reason, Some(ExitReason::TakeProfit));

    db.close_position("p1", dec!(1.28), Some("0xabc")).await.unwrap();
    let closed = db.get_position("p1").await.unwrap().unwrap();
    assert_eq!(closed.status, PositionStatus::Closed);
    assert_eq!(closed.exit_price, Some(dec!(1.28)));
    assert_eq!(closed.exit_tx.as_deref(), Some("0xabc"));
    assert!(closed.closed_at.is_some());
}

#[tokio::test]
async fn test_entry_price_survives_transitions() {
    let (db, _dir) = test_db().await;
    db.open_position(&make_position("p1", 1, token(0x11)))
        .await
        .unwrap();
    db.mark_exit_pending("p1", ExitReason::StopLoss).await.unwrap();
    db.close_position("p1", dec!(0.9), None).await.unwrap();

    let closed = db.get_position("p1").await.unwrap().unwrap();
    assert_eq!(closed.entry_price, dec!(1.25));
}

#[tokio::test]
async fn test_no_reverse_or_skip_transitions() {
    let (db, _dir) = test_db().await;
    db.open_position(&make_position("p1", 1, token(0x11)))
        .await
        .unwrap();

    // Closing straight from Holding is refused
    let err = db.close_position("p1", dec!(1.3), None).await.unwrap_err();
    assert!(matches!(err, TraderError::InvalidTransition { .. }));

    db.mark_exit_pending("p1", ExitReason::TakeProfit)
        .await
        .unwrap();
    // Re-marking an ExitPending position is refused
    let err = db
        .mark_exit_pending("p1", ExitReason::StopLoss)
        .await
        .unwrap_err();
    assert!(matches!(err, TraderError::InvalidTransition { .. }));

    db.close_position("p1", dec!(1.3), None).await.unwrap();
    // Closed is terminal
    let err = db
        .mark_exit_pending("p1", ExitReason::TakeProfit)
        .await
        .unwrap_err();
    assert!(matches!(err, TraderError::InvalidTransition { .. }));
    let err = db.close_position("p1", dec!(1.3), None).await.unwrap_err();
    assert!(matches!(err, TraderError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_reopen_after_close() {
    let (db, _dir) = test_db().await;
    db.open_position(&make_position("p1", 1, token(0x11)))
        .await
        .unwrap();
    db.mark_exit_pending("p1", ExitReason::TakeProfit)
        .await
        .unwrap();
    db.close_position("p1", dec!(1.3), None).await.unwrap();

    // A fresh position on the same pair is fine once the old one closed
    db.open_position(&make_position("p2", 1, token(0x11)))
        .await
        .unwrap();
    let open = db.open_position_for(1, token(0x11)).await.unwrap().unwrap();
    assert_eq!(open.id, "p2");
}

#[tokio::test]
async fn test_open_positions_excludes_closed() {
    let (db, _dir) = test_db().await;
    db.open_position(&make_position("p1", 1, token(0x11)))
        .await
        .unwrap();
    db.open_position(&make_position("p2", 1, token(0x22)))
        .await
        .unwrap();
    db.mark_exit_pending("p1", ExitReason::StopLoss).await.unwrap();
    db.close_position("p1", dec!(1.0), None).await.unwrap();

    let open = db.open_positions().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, "p2");
}

#[tokio::test]
async fn test_pools_append_only() {
    let (db, _dir) = test_db().await;
    let pool = make_pool(1, token(0x11), token(0xaa), QuoteToken::Usdc);
    db.add_pool(&pool).await.unwrap();
    // Re-adding the same pool is a no-op, not an error
    db.add_pool(&pool).await.unwrap();

    let best = db.best_pool(1, token(0x11)).await.unwrap().unwrap();
    assert_eq!(best.pool_address, token(0xaa));
}

#[tokio::test]
async fn test_best_pool_prefers_weth_quote() {
    let (db, _dir) = test_db().await;
    db.add_pool(&make_pool(1, token(0x11), token(0xaa), QuoteToken::Usdc))
        .await
        .unwrap();
    db.add_pool(&make_pool(1, token(0x11), token(0xbb), QuoteToken::Weth))
        .await
        .unwrap();

    let best = db.best_pool(1, token(0x11)).await.unwrap().unwrap();
    assert_eq!(best.quote_token, QuoteToken::Weth);
    assert_eq!(best.pool_address, token(0xbb));
}

#[tokio::test]
async fn test_best_pool_missing_token() {
    let (db, _dir) = test_db().await;
    assert!(db.best_pool(1, token(0x99)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_whitelist_add_remove_audited() {
    let (db, _dir) = test_db().await;
    let sender = token(0x44);

    db.add_whitelisted(sender, Some("treasury")).await.unwrap();
    assert_eq!(db.whitelisted_senders().await.unwrap(), vec![sender]);

    // Duplicate add changes nothing and writes no audit row
    db.add_whitelisted(sender, Some("treasury")).await.unwrap();
    assert_eq!(db.whitelist_audit_rows(sender).await.unwrap().len(), 1);

    db.remove_whitelisted(sender).await.unwrap();
    assert!(db.whitelisted_senders().await.unwrap().is_empty());

    let audit = db.whitelist_audit_rows(sender).await.unwrap();
    assert_eq!(audit.len(), 2);
    assert_eq!(audit[0].0, "added");
    assert_eq!(audit[1].0, "removed");
}

#[tokio::test]
async fn test_token_metadata_roundtrip() {
    let (db, _dir) = test_db().await;
    let meta = TokenMeta {
        address: token(0x11),
        chain_id: 8453,
        symbol: "TKN".to_string(),
        name: Some("Token".to_string()),
        decimals: 9,
    };
    db.upsert_token(&meta).await.unwrap();

    let loaded = db.get_token(8453, token(0x11)).await.unwrap().unwrap();
    assert_eq!(loaded.symbol, "TKN");
    assert_eq!(loaded.decimals, 9);
    assert!(db.get_token(1, token(0x11)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_trades_and_pnl() {
    let (db, _dir) = test_db().await;
    let trade = |id: &str, side, pnl| TradeRecord {
        id: id.to_string(),
        chain_id: 1,
        token: token(0x11),
        symbol: "TKN".to_string(),
        side,
        price: dec!(1.3),
        amount: dec!(100),
        pnl,
        gas_native: dec!(0.0004),
        tx_hash: Some("0xdead".to_string()),
        executed_at: Utc::now(),
    };
    db.record_trade(&trade("t1", Side::Buy, dec!(0))).await.unwrap();
    db.record_trade(&trade("t2", Side::Sell, dec!(2.5))).await.unwrap();
    db.record_trade(&trade("t3", Side::Sell, dec!(-1.0))).await.unwrap();

    assert_eq!(db.trade_count().await.unwrap(), 3);
    let total = db.total_pnl().await.unwrap();
    assert_eq!(total, dec!(1.5));

    let recent = db.recent_trades(2).await.unwrap();
    assert_eq!(recent.len(), 2);
}
