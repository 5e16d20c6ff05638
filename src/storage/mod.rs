//! SQLite-backed registry
//!
//! Single writer path for tokens, pools, whitelist, positions, and trades.
//! Position lifecycle rules live here: one open position per (chain,
//! token), monotonic status transitions, immutable entry price (no update
//! statement ever touches it).

#[cfg(test)]
mod tests;

use crate::error::{Result, TraderError};
use crate::types::{
    address_key, DexKind, ExitReason, PoolRef, Position, PositionStatus, QuoteToken, Side,
    TokenMeta, TradeRecord, WhitelistEntry,
};
use chrono::{DateTime, Utc};
use ethers::types::Address;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS tokens (
        address TEXT NOT NULL,
        chain_id INTEGER NOT NULL,
        symbol TEXT NOT NULL,
        name TEXT,
        decimals INTEGER NOT NULL,
        PRIMARY KEY (chain_id, address)
    )",
    "CREATE TABLE IF NOT EXISTS pools (
        chain_id INTEGER NOT NULL,
        token TEXT NOT NULL,
        pool_address TEXT NOT NULL,
        dex TEXT NOT NULL,
        fee_tier INTEGER NOT NULL,
        quote_token TEXT NOT NULL,
        quote_token_address TEXT NOT NULL,
        discovered_at TEXT NOT NULL,
        PRIMARY KEY (chain_id, token, pool_address)
    )",
    "CREATE TABLE IF NOT EXISTS whitelist (
        address TEXT PRIMARY KEY,
        label TEXT,
        active INTEGER NOT NULL DEFAULT 1,
        added_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS whitelist_audit (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        address TEXT NOT NULL,
        action TEXT NOT NULL,
        at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS positions (
        id TEXT PRIMARY KEY,
        chain_id INTEGER NOT NULL,
        token TEXT NOT NULL,
        symbol TEXT NOT NULL,
        decimals INTEGER NOT NULL,
        entry_price TEXT NOT NULL,
        quantity TEXT NOT NULL,
        quantity_raw TEXT NOT NULL,
        take_profit_pct TEXT NOT NULL,
        stop_loss_pct TEXT NOT NULL,
        status TEXT NOT NULL,
        opened_at TEXT NOT NULL,
        exit_reason TEXT,
        exit_price TEXT,
        exit_tx TEXT,
        closed_at TEXT
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_positions_open
        ON positions (chain_id, token) WHERE status != 'closed'",
    "CREATE TABLE IF NOT EXISTS trades (
        id TEXT PRIMARY KEY,
        chain_id INTEGER NOT NULL,
        token TEXT NOT NULL,
        symbol TEXT NOT NULL,
        side TEXT NOT NULL,
        price TEXT NOT NULL,
        amount TEXT NOT NULL,
        pnl TEXT NOT NULL,
        gas_native TEXT NOT NULL,
        tx_hash TEXT,
        executed_at TEXT NOT NULL
    )",
];

fn decode_err(msg: impl Into<String>) -> sqlx::Error {
    sqlx::Error::Decode(msg.into().into())
}

fn parse_decimal(row: &SqliteRow, column: &str) -> std::result::Result<Decimal, sqlx::Error> {
    let s: String = row.try_get(column)?;
    Decimal::from_str(&s).map_err(|e| decode_err(format!("bad decimal in {column}: {e}")))
}

fn parse_opt_decimal(
    row: &SqliteRow,
    column: &str,
) -> std::result::Result<Option<Decimal>, sqlx::Error> {
    let s: Option<String> = row.try_get(column)?;
    s.map(|s| Decimal::from_str(&s).map_err(|e| decode_err(format!("bad decimal in {column}: {e}"))))
        .transpose()
}

fn parse_address(row: &SqliteRow, column: &str) -> std::result::Result<Address, sqlx::Error> {
    let s: String = row.try_get(column)?;
    s.parse()
        .map_err(|e| decode_err(format!("bad address in {column}: {e}")))
}

fn position_from_row(row: &SqliteRow) -> std::result::Result<Position, sqlx::Error> {
    let status_raw: String = row.try_get("status")?;
    let status = PositionStatus::parse(&status_raw)
        .ok_or_else(|| decode_err(format!("unknown position status {status_raw}")))?;
    let exit_reason: Option<String> = row.try_get("exit_reason")?;
    Ok(Position {
        id: row.try_get("id")?,
        chain_id: row.try_get::<i64, _>("chain_id")? as u64,
        token: parse_address(row, "token")?,
        symbol: row.try_get("symbol")?,
        decimals: row.try_get::<i64, _>("decimals")? as u8,
        entry_price: parse_decimal(row, "entry_price")?,
        quantity: parse_decimal(row, "quantity")?,
        quantity_raw: row.try_get("quantity_raw")?,
        take_profit_pct: parse_decimal(row, "take_profit_pct")?,
        stop_loss_pct: parse_decimal(row, "stop_loss_pct")?,
        status,
        opened_at: row.try_get("opened_at")?,
        exit_reason: exit_reason.as_deref().and_then(ExitReason::parse),
        exit_price: parse_opt_decimal(row, "exit_price")?,
        exit_tx: row.try_get("exit_tx")?,
        closed_at: row.try_get("closed_at")?,
    })
}

fn pool_from_row(row: &SqliteRow) -> std::result::Result<PoolRef, sqlx::Error> {
    let dex_raw: String = row.try_get("dex")?;
    let quote_raw: String = row.try_get("quote_token")?;
    Ok(PoolRef {
        chain_id: row.try_get::<i64, _>("chain_id")? as u64,
        token: parse_address(row, "token")?,
        pool_address: parse_address(row, "pool_address")?,
        dex: DexKind::parse(&dex_raw)
            .ok_or_else(|| decode_err(format!("unknown dex kind {dex_raw}")))?,
        fee_tier: row.try_get::<i64, _>("fee_tier")? as u32,
        quote_token: QuoteToken::parse(&quote_raw)
            .ok_or_else(|| decode_err(format!("unknown quote token {quote_raw}")))?,
        quote_token_address: parse_address(row, "quote_token_address")?,
        discovered_at: row.try_get("discovered_at")?,
    })
}

fn trade_from_row(row: &SqliteRow) -> std::result::Result<TradeRecord, sqlx::Error> {
    let side_raw: String = row.try_get("side")?;
    let side = match side_raw.as_str() {
        "BUY" => Side::Buy,
        "SELL" => Side::Sell,
        other => return Err(decode_err(format!("unknown trade side {other}"))),
    };
    Ok(TradeRecord {
        id: row.try_get("id")?,
        chain_id: row.try_get::<i64, _>("chain_id")? as u64,
        token: parse_address(row, "token")?,
        symbol: row.try_get("symbol")?,
        side,
        price: parse_decimal(row, "price")?,
        amount: parse_decimal(row, "amount")?,
        pnl: parse_decimal(row, "pnl")?,
        gas_native: parse_decimal(row, "gas_native")?,
        tx_hash: row.try_get("tx_hash")?,
        executed_at: row.try_get("executed_at")?,
    })
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| TraderError::Config(format!("cannot create {parent:?}: {e}")))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    // -- Tokens --

    pub async fn upsert_token(&self, meta: &TokenMeta) -> Result<()> {
        sqlx::query(
            "INSERT INTO tokens (address, chain_id, symbol, name, decimals)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (chain_id, address) DO UPDATE SET
                 symbol = excluded.symbol,
                 name = excluded.name,
                 decimals = excluded.decimals",
        )
        .bind(address_key(meta.address))
        .bind(meta.chain_id as i64)
        .bind(&meta.symbol)
        .bind(&meta.name)
        .bind(meta.decimals as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_token(&self, chain_id: u64, token: Address) -> Result<Option<TokenMeta>> {
        let row = sqlx::query(
            "SELECT address, chain_id, symbol, name, decimals FROM tokens
             WHERE chain_id = ? AND address = ?",
        )
        .bind(chain_id as i64)
        .bind(address_key(token))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(TokenMeta {
                address: parse_address(&row, "address")?,
                chain_id: row.try_get::<i64, _>("chain_id")? as u64,
                symbol: row.try_get("symbol")?,
                name: row.try_get("name")?,
                decimals: row.try_get::<i64, _>("decimals")? as u8,
            })
        })
        .transpose()
        .map_err(TraderError::Storage)
    }

    // -- Pools (append-only) --

    pub async fn add_pool(&self, pool_ref: &PoolRef) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO pools
             (chain_id, token, pool_address, dex, fee_tier, quote_token,
              quote_token_address, discovered_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(pool_ref.chain_id as i64)
        .bind(address_key(pool_ref.token))
        .bind(address_key(pool_ref.pool_address))
        .bind(pool_ref.dex.as_str())
        .bind(pool_ref.fee_tier as i64)
        .bind(pool_ref.quote_token.as_str())
        .bind(address_key(pool_ref.quote_token_address))
        .bind(pool_ref.discovered_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Canonical pool for a token: WETH-quoted first, then USDC, oldest
    /// discovery wins inside a quote class.
    pub async fn best_pool(&self, chain_id: u64, token: Address) -> Result<Option<PoolRef>> {
        let row = sqlx::query(
            "SELECT * FROM pools WHERE chain_id = ? AND token = ?
             ORDER BY CASE quote_token WHEN 'WETH' THEN 0 ELSE 1 END, rowid
             LIMIT 1",
        )
        .bind(chain_id as i64)
        .bind(address_key(token))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| pool_from_row(&row))
            .transpose()
            .map_err(TraderError::Storage)
    }

    // -- Whitelist (audited on change) --

    pub async fn add_whitelisted(&self, address: Address, label: Option<&str>) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO whitelist (address, label, active, added_at)
             VALUES (?, ?, 1, ?)
             ON CONFLICT (address) DO UPDATE SET active = 1
             WHERE whitelist.active = 0",
        )
        .bind(address_key(address))
        .bind(label)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            self.audit_whitelist(address, "added", now).await?;
        }
        Ok(())
    }

    pub async fn remove_whitelisted(&self, address: Address) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query("UPDATE whitelist SET active = 0 WHERE address = ? AND active = 1")
            .bind(address_key(address))
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            self.audit_whitelist(address, "removed", now).await?;
        }
        Ok(())
    }

    async fn audit_whitelist(
        &self,
        address: Address,
        action: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("INSERT INTO whitelist_audit (address, action, at) VALUES (?, ?, ?)")
            .bind(address_key(address))
            .bind(action)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn whitelisted_senders(&self) -> Result<Vec<Address>> {
        let rows = sqlx::query("SELECT address FROM whitelist WHERE active = 1")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| parse_address(row, "address").map_err(TraderError::Storage))
            .collect()
    }

    pub async fn whitelist_entries(&self) -> Result<Vec<WhitelistEntry>> {
        let rows = sqlx::query("SELECT address, label, active, added_at FROM whitelist")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(WhitelistEntry {
                    address: parse_address(row, "address")?,
                    label: row.try_get("label")?,
                    active: row.try_get::<i64, _>("active")? != 0,
                    added_at: row.try_get("added_at")?,
                })
            })
            .collect::<std::result::Result<_, sqlx::Error>>()
            .map_err(TraderError::Storage)
    }

    pub async fn whitelist_audit_rows(&self, address: Address) -> Result<Vec<(String, DateTime<Utc>)>> {
        let rows = sqlx::query(
            "SELECT action, at FROM whitelist_audit WHERE address = ? ORDER BY id",
        )
        .bind(address_key(address))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok((row.try_get::<String, _>("action")?, row.try_get("at")?))
            })
            .collect::<std::result::Result<_, sqlx::Error>>()
            .map_err(TraderError::Storage)
    }

    // -- Positions --

    /// Open a new Holding position. Exactly one open position per
    /// (chain, token) is allowed; a second open is refused.
    pub async fn open_position(&self, position: &Position) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO positions
             (id, chain_id, token, symbol, decimals, entry_price, quantity,
              quantity_raw, take_profit_pct, stop_loss_pct, status, opened_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&position.id)
        .bind(position.chain_id as i64)
        .bind(address_key(position.token))
        .bind(&position.symbol)
        .bind(position.decimals as i64)
        .bind(position.entry_price.to_string())
        .bind(position.quantity.to_string())
        .bind(&position.quantity_raw)
        .bind(position.take_profit_pct.to_string())
        .bind(position.stop_loss_pct.to_string())
        .bind(PositionStatus::Holding.as_str())
        .bind(position.opened_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("UNIQUE") => Err(TraderError::PositionExists {
                chain_id: position.chain_id,
                token: address_key(position.token),
            }),
            Err(e) => Err(TraderError::Storage(e)),
        }
    }

    pub async fn get_position(&self, id: &str) -> Result<Option<Position>> {
        let row = sqlx::query("SELECT * FROM positions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| position_from_row(&row))
            .transpose()
            .map_err(TraderError::Storage)
    }

    /// All positions not yet Closed, oldest first.
    pub async fn open_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            "SELECT * FROM positions WHERE status != 'closed' ORDER BY opened_at",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| position_from_row(row).map_err(TraderError::Storage))
            .collect()
    }

    pub async fn open_position_for(
        &self,
        chain_id: u64,
        token: Address,
    ) -> Result<Option<Position>> {
        let row = sqlx::query(
            "SELECT * FROM positions WHERE chain_id = ? AND token = ? AND status != 'closed'",
        )
        .bind(chain_id as i64)
        .bind(address_key(token))
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| position_from_row(&row))
            .transpose()
            .map_err(TraderError::Storage)
    }

    /// Holding → ExitPending. Any other starting state is refused.
    pub async fn mark_exit_pending(&self, id: &str, reason: ExitReason) -> Result<()> {
        let result = sqlx::query(
            "UPDATE positions SET status = 'exit_pending', exit_reason = ?
             WHERE id = ? AND status = 'holding'",
        )
        .bind(reason.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, PositionStatus::ExitPending).await);
        }
        Ok(())
    }

    /// ExitPending → Closed, recording the confirmed exit. Entry price is
    /// deliberately absent from the SET list.
    pub async fn close_position(
        &self,
        id: &str,
        exit_price: Decimal,
        exit_tx: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE positions SET status = 'closed', exit_price = ?, exit_tx = ?, closed_at = ?
             WHERE id = ? AND status = 'exit_pending'",
        )
        .bind(exit_price.to_string())
        .bind(exit_tx)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, PositionStatus::Closed).await);
        }
        Ok(())
    }

    async fn transition_error(&self, id: &str, to: PositionStatus) -> TraderError {
        let from = match self.get_position(id).await {
            Ok(Some(p)) => p.status.as_str().to_string(),
            _ => "missing".to_string(),
        };
        TraderError::InvalidTransition {
            from,
            to: to.as_str().to_string(),
        }
    }

    // -- Trades --

    pub async fn record_trade(&self, trade: &TradeRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO trades
             (id, chain_id, token, symbol, side, price, amount, pnl,
              gas_native, tx_hash, executed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&trade.id)
        .bind(trade.chain_id as i64)
        .bind(address_key(trade.token))
        .bind(&trade.symbol)
        .bind(trade.side.as_str())
        .bind(trade.price.to_string())
        .bind(trade.amount.to_string())
        .bind(trade.pnl.to_string())
        .bind(trade.gas_native.to_string())
        .bind(&trade.tx_hash)
        .bind(trade.executed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent_trades(&self, limit: u32) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query("SELECT * FROM trades ORDER BY executed_at DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| trade_from_row(row).map_err(TraderError::Storage))
            .collect()
    }

    pub async fn total_pnl(&self) -> Result<Decimal> {
        let row = sqlx::query("SELECT COALESCE(SUM(CAST(pnl AS REAL)), 0.0) AS total FROM trades")
            .fetch_one(&self.pool)
            .await?;
        let total: f64 = row.try_get("total")?;
        Ok(rust_decimal::prelude::FromPrimitive::from_f64(total).unwrap_or(Decimal::ZERO))
    }

    pub async fn trade_count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM trades")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }
}
