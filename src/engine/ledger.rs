//! Position ledger - sole owner and mutator of the portfolio.
//!
//! Every public mutation takes the lock once, applies the change to a copy
//! of the state, persists the copy, and only then swaps it in. A failed
//! write leaves memory untouched and surfaces `SwingError::Persistence`.
//! Reads (`snapshot`, `positions`, `mode`) clone under the same lock so
//! callers always see one consistent state.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::storage::{self, Snapshot, SNAPSHOT_VERSION};
use crate::strategy::dedup::SignalDeduplicator;
use crate::strategy::risk::{self, RiskConfig};
use crate::types::{
    BotMode, Candidate, ClosedTrade, Counters, ExitReason, Portfolio, Position, PositionState,
    RiskLevels, SwingError,
};

// ---------------------------------------------------------------------------
// Configuration & state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub state_path: PathBuf,
    pub write_retries: u32,
    pub retry_backoff: Duration,
    pub risk: RiskConfig,
    pub dedup_ttl: chrono::Duration,
}

impl LedgerConfig {
    pub fn from_app(cfg: &AppConfig) -> Self {
        Self {
            state_path: PathBuf::from(&cfg.persistence.state_file),
            write_retries: cfg.persistence.write_retries,
            retry_backoff: Duration::from_millis(cfg.persistence.retry_backoff_ms),
            risk: cfg.risk.clone(),
            dedup_ttl: chrono::Duration::hours(cfg.dedup.ttl_hours),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct LedgerState {
    portfolio: Portfolio,
    dedup: SignalDeduplicator,
    counters: Counters,
    mode: BotMode,
    chat_id: Option<i64>,
}

impl LedgerState {
    fn to_snapshot(&self, now: DateTime<Utc>) -> Snapshot {
        Snapshot {
            version: SNAPSHOT_VERSION,
            saved_at: now,
            portfolio: self.portfolio.clone(),
            dedup: self.dedup.clone(),
            counters: self.counters.clone(),
            mode: self.mode,
            chat_id: self.chat_id,
        }
    }
}

/// State updates applied by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionPatch {
    /// TP1 touched at `price`: realize the configured fraction and move
    /// the stop to entry.
    ArmBreakeven { price: f64 },
}

/// Result of a successful `ArmBreakeven`.
#[derive(Debug, Clone)]
pub struct BreakevenArmed {
    pub position: Position,
    pub partial: ClosedTrade,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

pub struct Ledger {
    state: Mutex<LedgerState>,
    cfg: LedgerConfig,
}

impl Ledger {
    /// Fresh portfolio with `initial_capital`, nothing written yet.
    pub fn cold_start(initial_capital: Decimal, cfg: LedgerConfig) -> Self {
        Self {
            state: Mutex::new(LedgerState {
                portfolio: Portfolio::new(initial_capital),
                dedup: SignalDeduplicator::new(),
                counters: Counters::default(),
                mode: BotMode::Active,
                chat_id: None,
            }),
            cfg,
        }
    }

    /// Resume from a loaded snapshot; positions keep their recorded state.
    pub fn from_snapshot(snapshot: Snapshot, cfg: LedgerConfig) -> Self {
        Self {
            state: Mutex::new(LedgerState {
                portfolio: snapshot.portfolio,
                dedup: snapshot.dedup,
                counters: snapshot.counters,
                mode: snapshot.mode,
                chat_id: snapshot.chat_id,
            }),
            cfg,
        }
    }

    /// Load from `cfg.state_path`, or cold-start when no file exists.
    pub fn restore(initial_capital: Decimal, cfg: LedgerConfig) -> Result<Self, SwingError> {
        match storage::load_snapshot(&cfg.state_path, cfg.risk.max_positions)? {
            Some(snapshot) => Ok(Self::from_snapshot(snapshot, cfg)),
            None => Ok(Self::cold_start(initial_capital, cfg)),
        }
    }

    // -- reads --------------------------------------------------------------

    pub async fn snapshot(&self) -> Snapshot {
        self.state.lock().await.to_snapshot(Utc::now())
    }

    pub async fn positions(&self) -> Vec<Position> {
        self.state.lock().await.portfolio.positions.clone()
    }

    pub async fn mode(&self) -> BotMode {
        self.state.lock().await.mode
    }

    pub async fn chat_id(&self) -> Option<i64> {
        self.state.lock().await.chat_id
    }

    // -- write-through core -------------------------------------------------

    /// Apply `f` to a copy, validate, persist, then commit. Unchanged state
    /// is not rewritten.
    async fn commit<T>(
        &self,
        f: impl FnOnce(&mut LedgerState) -> Result<T, SwingError>,
    ) -> Result<T, SwingError> {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        let out = f(&mut next)?;

        if next == *guard {
            return Ok(out);
        }

        next.portfolio
            .check_invariants(self.cfg.risk.max_positions)
            .map_err(|reason| {
                error!(%reason, "Mutation rejected, portfolio invariant would break");
                SwingError::InvariantBreach(reason)
            })?;

        self.persist(&next).await?;
        *guard = next;
        Ok(out)
    }

    async fn persist(&self, state: &LedgerState) -> Result<(), SwingError> {
        let snapshot = Arc::new(state.to_snapshot(Utc::now()));
        let mut attempt = 0;
        loop {
            match self.write_snapshot(snapshot.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.cfg.write_retries => {
                    attempt += 1;
                    warn!(attempt, error = %e, "Snapshot write failed, retrying");
                    tokio::time::sleep(self.cfg.retry_backoff * attempt).await;
                }
                Err(e) => {
                    error!(error = %e, attempts = attempt + 1, "Snapshot write failed, mutation not committed");
                    return Err(e);
                }
            }
        }
    }

    /// File I/O and fsync run on the blocking pool; the state lock stays held.
    async fn write_snapshot(&self, snapshot: Arc<Snapshot>) -> Result<(), SwingError> {
        let path = self.cfg.state_path.clone();
        tokio::task::spawn_blocking(move || storage::save_snapshot(&snapshot, &path))
            .await
            .map_err(|e| SwingError::Persistence(format!("snapshot writer task failed: {e}")))?
    }

    /// Write the current state as-is (e.g. first save after a cold start).
    pub async fn flush(&self) -> Result<(), SwingError> {
        let guard = self.state.lock().await;
        self.persist(&guard).await
    }

    // -- mutations ----------------------------------------------------------

    /// Dedup check → capacity → risk levels → open → dedup record, as one
    /// critical section.
    pub async fn admit(
        &self,
        candidate: &Candidate,
        now: DateTime<Utc>,
    ) -> Result<Position, SwingError> {
        let risk = self.cfg.risk.clone();
        let ttl = self.cfg.dedup_ttl;
        let position = self
            .commit(|st| {
                if st.mode == BotMode::Paused {
                    return Err(SwingError::Paused);
                }
                if !st.dedup.accept(&candidate.trigger, now, ttl) {
                    return Err(SwingError::DuplicateSignal(candidate.trigger.key()));
                }
                check_capacity(&st.portfolio, &candidate.symbol, risk.max_positions)?;
                let levels = risk::levels_for(candidate, &risk)?;
                let position = open_position(st, candidate, levels, &risk, now)?;
                st.dedup.record(&candidate.trigger, now);
                st.counters.signals_alerted += 1;
                Ok(position)
            })
            .await?;

        info!(
            symbol = %position.symbol,
            direction = %position.direction,
            path = %position.path,
            entry = position.entry_price,
            stop = position.stop_loss,
            tp1 = position.take_profit1,
            size = format!("${:.2}", position.size),
            "Position opened"
        );
        Ok(position)
    }

    /// Apply a forward-only state update to an open position.
    pub async fn mutate(
        &self,
        symbol: &str,
        patch: PositionPatch,
        now: DateTime<Utc>,
    ) -> Result<BreakevenArmed, SwingError> {
        let risk = self.cfg.risk.clone();
        let armed = self
            .commit(|st| match patch {
                PositionPatch::ArmBreakeven { price } => arm_breakeven(st, symbol, price, &risk, now),
            })
            .await?;

        info!(
            symbol,
            stop = armed.position.stop_loss,
            realized = format!("${:.2}", armed.partial.pnl),
            remaining = format!("${:.2}", armed.position.size),
            "Breakeven armed"
        );
        Ok(armed)
    }

    /// Close a position, realize PnL net of fees, archive it and reset the
    /// symbol's dedup records.
    pub async fn close(
        &self,
        symbol: &str,
        exit_price: f64,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Result<ClosedTrade, SwingError> {
        let fee = self.cfg.risk.fee_pct;
        let trade = self
            .commit(|st| close_position(st, symbol, exit_price, reason, fee, now))
            .await?;

        info!(
            symbol,
            reason = %reason,
            exit = exit_price,
            pnl = format!("${:.2}", trade.pnl),
            "Position closed"
        );
        Ok(trade)
    }

    /// Switch mode, returning the previous one.
    pub async fn set_mode(&self, mode: BotMode) -> Result<BotMode, SwingError> {
        self.commit(|st| Ok(std::mem::replace(&mut st.mode, mode)))
            .await
    }

    /// Register `chat_id` only when no chat is on record yet. Returns the
    /// chat that ends up registered.
    pub async fn seed_chat(&self, chat_id: i64) -> Result<i64, SwingError> {
        self.commit(|st| Ok(*st.chat_id.get_or_insert(chat_id)))
            .await
    }

    pub async fn register_chat(&self, chat_id: i64) -> Result<(), SwingError> {
        self.commit(|st| {
            st.chat_id = Some(chat_id);
            Ok(())
        })
        .await
    }

    /// Drop dedup records whose trigger is no longer active.
    pub async fn prune_dedup(
        &self,
        evaluated: &HashSet<String>,
        active: &HashSet<String>,
    ) -> Result<usize, SwingError> {
        self.commit(|st| Ok(st.dedup.prune_inactive(evaluated, active)))
            .await
    }

    pub async fn expire_dedup(&self, now: DateTime<Utc>) -> Result<usize, SwingError> {
        let ttl = self.cfg.dedup_ttl;
        self.commit(|st| Ok(st.dedup.expire(now, ttl))).await
    }

    pub async fn record_scan_cycle(&self) -> Result<u64, SwingError> {
        self.commit(|st| {
            st.counters.scan_cycles += 1;
            Ok(st.counters.scan_cycles)
        })
        .await
    }

    pub async fn record_supervisor_cycle(&self) -> Result<u64, SwingError> {
        self.commit(|st| {
            st.counters.supervisor_cycles += 1;
            Ok(st.counters.supervisor_cycles)
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Pure state transitions
// ---------------------------------------------------------------------------

fn check_capacity(pf: &Portfolio, symbol: &str, max: usize) -> Result<(), SwingError> {
    if pf.positions.len() >= max {
        return Err(SwingError::AtCapacity { max });
    }
    if pf.position(symbol).is_some() {
        return Err(SwingError::SymbolAlreadyOpen(symbol.to_string()));
    }
    Ok(())
}

fn open_position(
    st: &mut LedgerState,
    candidate: &Candidate,
    levels: RiskLevels,
    risk: &RiskConfig,
    now: DateTime<Utc>,
) -> Result<Position, SwingError> {
    check_capacity(&st.portfolio, &candidate.symbol, risk.max_positions)?;

    let pct = Decimal::from_f64(risk.position_size_pct).unwrap_or(Decimal::ZERO);
    let size = (st.portfolio.equity * pct).round_dp(2);
    if size <= Decimal::ZERO || size > st.portfolio.cash_available {
        return Err(SwingError::InsufficientCash {
            needed: size,
            available: st.portfolio.cash_available,
        });
    }

    let position = Position {
        symbol: candidate.symbol.clone(),
        direction: candidate.direction,
        path: candidate.path,
        entry_price: candidate.entry_price,
        stop_loss: levels.stop_loss,
        take_profit1: levels.take_profit1,
        initial_risk: levels.risk,
        size,
        state: PositionState::Open,
        opened_at: now,
        breakeven_moved: false,
        entry_histogram: candidate.entry_histogram,
        trigger_cross_at: candidate.trigger.cross_at,
    };
    st.portfolio.cash_available -= size;
    st.portfolio.positions.push(position.clone());
    st.counters.positions_opened += 1;
    Ok(position)
}

fn realized(
    position: &Position,
    amount: Decimal,
    price: f64,
    fee: f64,
) -> Result<Decimal, SwingError> {
    let pnl = position
        .pnl_for(amount, price, fee)
        .ok_or_else(|| SwingError::Validation {
            symbol: position.symbol.clone(),
            reason: format!("cannot realize at price {price}"),
        })?;
    // Paper losses are capped at the allocated cash
    Ok(pnl.max(-amount))
}

fn trade_row(
    position: &Position,
    size: Decimal,
    exit_price: f64,
    pnl: Decimal,
    reason: ExitReason,
    now: DateTime<Utc>,
) -> ClosedTrade {
    ClosedTrade {
        id: uuid::Uuid::new_v4().to_string(),
        symbol: position.symbol.clone(),
        direction: position.direction,
        path: position.path,
        entry_price: position.entry_price,
        exit_price,
        size,
        pnl,
        reason,
        opened_at: position.opened_at,
        closed_at: now,
    }
}

fn arm_breakeven(
    st: &mut LedgerState,
    symbol: &str,
    price: f64,
    risk: &RiskConfig,
    now: DateTime<Utc>,
) -> Result<BreakevenArmed, SwingError> {
    let pf = &mut st.portfolio;
    let position = pf
        .position_mut(symbol)
        .ok_or_else(|| SwingError::PositionNotFound(symbol.to_string()))?;

    if !position.state.can_advance_to(PositionState::BreakevenArmed) {
        return Err(SwingError::InvalidTransition {
            symbol: symbol.to_string(),
            from: position.state,
            to: PositionState::BreakevenArmed,
        });
    }

    let fraction = Decimal::from_f64(risk.tp1_close_fraction).unwrap_or(Decimal::ZERO);
    let partial = (position.size * fraction).round_dp(2).min(position.size);
    let pnl = realized(position, partial, price, risk.fee_pct)?;

    position.size -= partial;
    position.stop_loss = position.entry_price;
    position.breakeven_moved = true;
    position.state = PositionState::BreakevenArmed;

    let row = trade_row(position, partial, price, pnl, ExitReason::TakeProfit1, now);
    let armed = BreakevenArmed {
        position: position.clone(),
        partial: row.clone(),
    };

    pf.cash_available += partial + pnl;
    pf.equity += pnl;
    pf.closed_trades.push(row);
    Ok(armed)
}

fn close_position(
    st: &mut LedgerState,
    symbol: &str,
    exit_price: f64,
    reason: ExitReason,
    fee: f64,
    now: DateTime<Utc>,
) -> Result<ClosedTrade, SwingError> {
    let pf = &mut st.portfolio;
    let idx = pf
        .positions
        .iter()
        .position(|p| p.symbol == symbol)
        .ok_or_else(|| SwingError::PositionNotFound(symbol.to_string()))?;

    let position = &pf.positions[idx];
    if !position.state.can_advance_to(PositionState::Closed) {
        return Err(SwingError::InvalidTransition {
            symbol: symbol.to_string(),
            from: position.state,
            to: PositionState::Closed,
        });
    }

    let pnl = realized(position, position.size, exit_price, fee)?;
    let row = trade_row(position, position.size, exit_price, pnl, reason, now);

    // Earlier TP1 partial counts toward the trade's outcome
    let earlier: Decimal = pf
        .closed_trades
        .iter()
        .filter(|t| t.symbol == position.symbol && t.opened_at == position.opened_at)
        .map(|t| t.pnl)
        .sum();

    pf.cash_available += position.size + pnl;
    pf.equity += pnl;
    pf.positions.remove(idx);
    pf.closed_trades.push(row.clone());

    st.counters.positions_closed += 1;
    if earlier + pnl > Decimal::ZERO {
        st.counters.wins += 1;
    } else {
        st.counters.losses += 1;
    }
    st.dedup.reset_symbol(symbol);
    Ok(row)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
