//! REST status and control surface
//!
//! JSON endpoints consumed by operator tooling: current status, open
//! positions with last evaluated prices, recent trades, and the stop /
//! sell-all controls. No HTML is served here.

use crate::controls::ControlSignals;
use crate::storage::Database;
use crate::types::Position;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub type SharedStatus = Arc<RwLock<StatusSnapshot>>;

/// Snapshot written by the engine each tick, read by the handlers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    pub wallet: String,
    pub chains: Vec<String>,
    pub open_positions: u64,
    pub total_pnl: Decimal,
    pub trade_count: u64,
    pub uptime_secs: u64,
    /// Last evaluated pool price per position id.
    pub last_prices: HashMap<String, Decimal>,
    pub updated: Option<DateTime<Utc>>,
}

pub fn new_shared_status() -> SharedStatus {
    Arc::new(RwLock::new(StatusSnapshot::default()))
}

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub controls: ControlSignals,
    pub status: SharedStatus,
}

/// Open position plus the price the monitor last evaluated it at.
#[derive(Debug, Clone, Serialize)]
pub struct PositionView {
    #[serde(flatten)]
    pub position: Position,
    pub current_price: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/positions", get(get_positions))
        .route("/api/trades", get(get_trades))
        .route("/api/control/stop", post(post_stop))
        .route("/api/control/sell-all", post(post_sell_all))
        .with_state(state)
}

pub async fn serve(state: AppState, bind: String) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(bind = %bind, "status API listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn get_status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.status.read().await.clone())
}

async fn get_positions(
    State(state): State<AppState>,
) -> Result<Json<Vec<PositionView>>, StatusCode> {
    let positions = state
        .db
        .open_positions()
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "positions query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let prices = state.status.read().await.last_prices.clone();
    let views = positions
        .into_iter()
        .map(|position| {
            let current_price = prices.get(&position.id).copied();
            let unrealized_pnl = current_price.map(|p| position.unrealized_pnl(p));
            PositionView {
                position,
                current_price,
                unrealized_pnl,
            }
        })
        .collect();
    Ok(Json(views))
}

async fn get_trades(
    State(state): State<AppState>,
) -> Result<Json<Vec<crate::types::TradeRecord>>, StatusCode> {
    state
        .db
        .recent_trades(50)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!(error = %e, "trades query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn post_stop(State(state): State<AppState>) -> Json<serde_json::Value> {
    tracing::warn!("stop requested via API");
    state.controls.request_stop();
    Json(json!({ "ok": true, "action": "stop" }))
}

async fn post_sell_all(State(state): State<AppState>) -> Json<serde_json::Value> {
    tracing::warn!("sell-all requested via API");
    state.controls.request_sell_all();
    Json(json!({ "ok": true, "action": "sell_all" }))
}
