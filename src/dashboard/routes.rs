//! Dashboard API route handlers.
//!
//! All endpoints return JSON read from the ledger; nothing here mutates.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

use crate::engine::ledger::Ledger;
use crate::types::{BotMode, ClosedTrade, Counters, Position};

/// Most recent closed trades returned by `/api/trades`.
const TRADE_HISTORY_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct DashboardState {
    pub ledger: Arc<Ledger>,
    pub max_positions: usize,
    pub started_at: DateTime<Utc>,
}

impl DashboardState {
    pub fn new(ledger: Arc<Ledger>, max_positions: usize) -> Self {
        Self {
            ledger,
            max_positions,
            started_at: Utc::now(),
        }
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub mode: BotMode,
    pub equity: Decimal,
    pub cash_available: Decimal,
    pub tied_capital: Decimal,
    pub realized_pnl: Decimal,
    pub open_positions: usize,
    pub max_positions: usize,
    pub win_rate: f64,
    pub counters: Counters,
    pub dedup_records: usize,
    pub last_saved_at: DateTime<Utc>,
    pub uptime_secs: i64,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snap = state.ledger.snapshot().await;
    let pf = &snap.portfolio;
    Json(StatusResponse {
        mode: snap.mode,
        equity: pf.equity,
        cash_available: pf.cash_available,
        tied_capital: pf.tied_capital(),
        realized_pnl: pf.total_realized_pnl(),
        open_positions: pf.positions.len(),
        max_positions: state.max_positions,
        win_rate: snap.counters.win_rate(),
        counters: snap.counters.clone(),
        dedup_records: snap.dedup.len(),
        last_saved_at: snap.saved_at,
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

/// GET /api/positions
pub async fn get_positions(State(state): State<AppState>) -> Json<Vec<Position>> {
    Json(state.ledger.positions().await)
}

/// GET /api/trades
pub async fn get_trades(State(state): State<AppState>) -> Json<Vec<ClosedTrade>> {
    let snap = state.ledger.snapshot().await;
    let trades = snap.portfolio.closed_trades;
    let start = trades.len().saturating_sub(TRADE_HISTORY_LIMIT);
    Json(trades[start..].to_vec())
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ledger::tests::{candidate, now, temp_state_path, test_config};
    use crate::types::{Direction, ExitReason};
    use rust_decimal_macros::dec;

    fn state() -> (AppState, std::path::PathBuf) {
        let path = temp_state_path();
        let ledger = Arc::new(Ledger::cold_start(dec!(10000), test_config(path.clone())));
        (Arc::new(DashboardState::new(ledger, 10)), path)
    }

    #[tokio::test]
    async fn test_status_on_cold_start() {
        let (state, _) = state();
        let Json(resp) = get_status(State(state)).await;
        assert_eq!(resp.equity, dec!(10000));
        assert_eq!(resp.tied_capital, Decimal::ZERO);
        assert_eq!(resp.open_positions, 0);
        assert_eq!(resp.mode, BotMode::Active);
        assert_eq!(resp.win_rate, 0.0);
    }

    #[tokio::test]
    async fn test_positions_and_trades_follow_ledger() {
        let (state, path) = state();
        let ledger = state.ledger.clone();
        ledger.admit(&candidate("ETH/USDT", Direction::Long), now()).await.unwrap();
        ledger.admit(&candidate("SOL/USDT", Direction::Short), now()).await.unwrap();

        let Json(positions) = get_positions(State(state.clone())).await;
        assert_eq!(positions.len(), 2);

        ledger
            .close("ETH/USDT", 103.0, ExitReason::ReverseCross, now())
            .await
            .unwrap();
        let Json(trades) = get_trades(State(state.clone())).await;
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].symbol, "ETH/USDT");

        let Json(status) = get_status(State(state)).await;
        assert_eq!(status.open_positions, 1);
        assert_eq!(status.counters.positions_closed, 1);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_status_response_serializes() {
        let resp = StatusResponse {
            mode: BotMode::Paused,
            equity: dec!(10012.50),
            cash_available: dec!(9012.50),
            tied_capital: dec!(1000),
            realized_pnl: dec!(12.50),
            open_positions: 1,
            max_positions: 10,
            win_rate: 100.0,
            counters: Counters::default(),
            dedup_records: 3,
            last_saved_at: now(),
            uptime_secs: 3600,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["mode"], "paused");
        assert_eq!(json["equity"], "10012.50");
        assert_eq!(json["counters"]["scan_cycles"], 0);
    }
}
