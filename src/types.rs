//! Shared types for the SWINGWATCH agent.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that strategy, engine, storage
//! and alert modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Direction, path, timeframe
// ---------------------------------------------------------------------------

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

impl Direction {
    /// +1.0 for long, -1.0 for short.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    /// Direction implied by the sign of a value. Zero (or NaN) has no direction.
    pub fn from_sign(value: f64) -> Option<Self> {
        if value > 0.0 {
            Some(Direction::Long)
        } else if value < 0.0 {
            Some(Direction::Short)
        } else {
            None
        }
    }
}

/// Which entry path produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPath {
    /// With the 4H regime: EMA ordering + fresh MACD cross.
    TrendAligned,
    /// Against the 4H regime under strict joint confirmation.
    Countertrend,
}

impl fmt::Display for EntryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryPath::TrendAligned => write!(f, "TREND"),
            EntryPath::Countertrend => write!(f, "COUNTERTREND"),
        }
    }
}

/// Candle timeframes used by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M5,
    H1,
    H4,
}

impl Timeframe {
    /// Exchange-style interval string.
    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::M5 => "5m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
        }
    }

    pub fn duration(self) -> chrono::Duration {
        match self {
            Timeframe::M5 => chrono::Duration::minutes(5),
            Timeframe::H1 => chrono::Duration::hours(1),
            Timeframe::H4 => chrono::Duration::hours(4),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Candles
// ---------------------------------------------------------------------------

/// One OHLCV bar. `open_time` is the bar's start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Wick on the side that works against `direction`
    /// (upper wick for longs, lower wick for shorts).
    pub fn adverse_wick(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Long => self.high - self.open.max(self.close),
            Direction::Short => self.open.min(self.close) - self.low,
        }
    }

    /// Whether the bar had fully closed by `now`.
    pub fn is_closed(&self, timeframe: Timeframe, now: DateTime<Utc>) -> bool {
        self.open_time + timeframe.duration() <= now
    }
}

/// Split a series into closed bars and the still-forming bar (if any).
pub fn split_closed(
    candles: &[Candle],
    timeframe: Timeframe,
    now: DateTime<Utc>,
) -> (&[Candle], Option<&Candle>) {
    match candles.last() {
        Some(last) if !last.is_closed(timeframe, now) => {
            (&candles[..candles.len() - 1], Some(last))
        }
        _ => (candles, None),
    }
}

// ---------------------------------------------------------------------------
// Candidates & risk levels
// ---------------------------------------------------------------------------

/// Points awarded per scoring pillar.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PillarBreakdown {
    /// 0–40
    pub momentum: f64,
    /// 0–25
    pub structure: f64,
    /// 0–20
    pub cleanliness: f64,
    /// 0–15
    pub context: f64,
}

impl PillarBreakdown {
    pub fn total(&self) -> f64 {
        self.momentum + self.structure + self.cleanliness + self.context
    }
}

impl fmt::Display for PillarBreakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "M {:.1}/40 | S {:.1}/25 | C {:.1}/20 | X {:.1}/15",
            self.momentum, self.structure, self.cleanliness, self.context
        )
    }
}

/// Identity of the MACD cross that justified a signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSignature {
    pub symbol: String,
    pub direction: Direction,
    /// Open time of the first bar of the current histogram run.
    pub cross_at: DateTime<Utc>,
}

impl TriggerSignature {
    /// Dedup key: one record per symbol+direction.
    pub fn key(&self) -> String {
        format!("{}_{}", self.symbol, self.direction)
    }
}

/// A scored entry opportunity produced by a scan cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub symbol: String,
    pub direction: Direction,
    pub path: EntryPath,
    pub score: f64,
    pub pillars: PillarBreakdown,
    pub entry_price: f64,
    pub atr: f64,
    /// 1H MACD histogram at signal time (momentum-fade reference).
    pub entry_histogram: f64,
    /// Direction-signed close change minus the reference asset's change.
    pub relative_strength: f64,
    pub trigger: TriggerSignature,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}] score={:.0} entry={} rs={:+.2}%",
            self.symbol,
            self.direction,
            self.path,
            self.score,
            fmt_price(self.entry_price),
            self.relative_strength * 100.0,
        )
    }
}

/// Stop / target levels derived from ATR.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskLevels {
    pub stop_loss: f64,
    pub take_profit1: f64,
    /// |entry − stop|, the R unit.
    pub risk: f64,
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

/// Supervisory state of a position. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionState {
    Open,
    BreakevenArmed,
    Closed,
}

impl PositionState {
    /// Forward-only transition check; CLOSED is terminal.
    pub fn can_advance_to(self, next: PositionState) -> bool {
        self != PositionState::Closed && next > self
    }
}

impl fmt::Display for PositionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionState::Open => write!(f, "OPEN"),
            PositionState::BreakevenArmed => write!(f, "BREAKEVEN_ARMED"),
            PositionState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// A tracked (paper) position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub direction: Direction,
    pub path: EntryPath,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit1: f64,
    /// Initial R (entry to original stop).
    pub initial_risk: f64,
    /// Cash currently allocated.
    pub size: Decimal,
    pub state: PositionState,
    pub opened_at: DateTime<Utc>,
    pub breakeven_moved: bool,
    pub entry_histogram: f64,
    pub trigger_cross_at: DateTime<Utc>,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}] entry={} sl={} tp1={} size=${:.2}",
            self.symbol,
            self.direction,
            self.state,
            fmt_price(self.entry_price),
            fmt_price(self.stop_loss),
            fmt_price(self.take_profit1),
            self.size,
        )
    }
}

impl Position {
    /// Whether the stop has been crossed by a bar's extreme or the live price.
    pub fn stop_breached(&self, low: f64, high: f64, price: f64) -> bool {
        match self.direction {
            Direction::Long => low <= self.stop_loss || price <= self.stop_loss,
            Direction::Short => high >= self.stop_loss || price >= self.stop_loss,
        }
    }

    /// Whether TP1 has been reached by a bar's extreme or the live price.
    pub fn tp1_touched(&self, low: f64, high: f64, price: f64) -> bool {
        match self.direction {
            Direction::Long => high >= self.take_profit1 || price >= self.take_profit1,
            Direction::Short => low <= self.take_profit1 || price <= self.take_profit1,
        }
    }

    /// Stop on the loss side of entry (at entry once breakeven is armed),
    /// TP1 on the profit side.
    pub fn check_level_sides(&self) -> Result<(), String> {
        let sign = self.direction.sign();
        let stop_distance = (self.entry_price - self.stop_loss) * sign;
        let stop_ok = match self.state {
            PositionState::Open => stop_distance > 0.0,
            _ => stop_distance >= 0.0,
        };
        if !stop_ok {
            return Err(format!(
                "{} {} stop {} is on the wrong side of entry {}",
                self.symbol, self.direction, self.stop_loss, self.entry_price
            ));
        }
        if (self.take_profit1 - self.entry_price) * sign <= 0.0 {
            return Err(format!(
                "{} {} TP1 {} is on the wrong side of entry {}",
                self.symbol, self.direction, self.take_profit1, self.entry_price
            ));
        }
        Ok(())
    }

    /// Fractional return from entry to `price` in the position's favour.
    pub fn return_at(&self, price: f64) -> f64 {
        (price - self.entry_price) / self.entry_price * self.direction.sign()
    }

    /// Realized PnL for closing `amount` of this position at `price`,
    /// net of the round-trip fee.
    pub fn pnl_for(&self, amount: Decimal, price: f64, fee_pct: f64) -> Option<Decimal> {
        let net = Decimal::from_f64(self.return_at(price) - fee_pct)?;
        Some((amount * net).round_dp(8))
    }
}

/// Why a position (or part of one) was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    BreakevenStop,
    ReverseCross,
    MomentumFade,
    /// Partial realization at TP1.
    TakeProfit1,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "stop-loss"),
            ExitReason::BreakevenStop => write!(f, "breakeven stop"),
            ExitReason::ReverseCross => write!(f, "MACD reverse cross"),
            ExitReason::MomentumFade => write!(f, "momentum fade"),
            ExitReason::TakeProfit1 => write!(f, "TP1 partial"),
        }
    }
}

/// Archived realization (full close or TP1 partial).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    pub path: EntryPath,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: Decimal,
    pub pnl: Decimal,
    pub reason: ExitReason,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

impl fmt::Display for ClosedTrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.pnl >= Decimal::ZERO { "+" } else { "" };
        write!(
            f,
            "{} {} {} → {} ({}) {sign}${:.2}",
            self.symbol,
            self.direction,
            fmt_price(self.entry_price),
            fmt_price(self.exit_price),
            self.reason,
            self.pnl,
        )
    }
}

// ---------------------------------------------------------------------------
// Portfolio
// ---------------------------------------------------------------------------

/// The single portfolio aggregate. Only the ledger mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    /// Realized total capital.
    pub equity: Decimal,
    pub cash_available: Decimal,
    pub positions: Vec<Position>,
    pub closed_trades: Vec<ClosedTrade>,
}

impl Portfolio {
    pub fn new(initial_capital: Decimal) -> Self {
        Self {
            equity: initial_capital,
            cash_available: initial_capital,
            positions: Vec::new(),
            closed_trades: Vec::new(),
        }
    }

    /// Cash tied up in open positions.
    pub fn tied_capital(&self) -> Decimal {
        self.positions.iter().map(|p| p.size).sum()
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.symbol == symbol)
    }

    pub fn position_mut(&mut self, symbol: &str) -> Option<&mut Position> {
        self.positions.iter_mut().find(|p| p.symbol == symbol)
    }

    pub fn total_realized_pnl(&self) -> Decimal {
        self.closed_trades.iter().map(|t| t.pnl).sum()
    }

    /// Check the structural invariants; returns a description of the first violation.
    pub fn check_invariants(&self, max_positions: usize) -> Result<(), String> {
        if self.cash_available < Decimal::ZERO {
            return Err(format!("negative cash: {}", self.cash_available));
        }
        if self.positions.len() > max_positions {
            return Err(format!(
                "{} open positions exceeds max {max_positions}",
                self.positions.len()
            ));
        }
        let tied = self.tied_capital();
        if self.cash_available + tied != self.equity {
            return Err(format!(
                "cash {} + tied {} != equity {}",
                self.cash_available, tied, self.equity
            ));
        }
        for (i, p) in self.positions.iter().enumerate() {
            if self.positions[..i].iter().any(|q| q.symbol == p.symbol) {
                return Err(format!("duplicate open position for {}", p.symbol));
            }
            if !p.stop_loss.is_finite() || !p.take_profit1.is_finite() {
                return Err(format!("{} has non-finite risk levels", p.symbol));
            }
            p.check_level_sides()?;
            if p.state == PositionState::Closed {
                return Err(format!("{} is CLOSED but still open", p.symbol));
            }
        }
        Ok(())
    }
}

/// Whether new entries are being issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotMode {
    #[default]
    Active,
    /// AFK: scans run for visibility only.
    Paused,
}

impl fmt::Display for BotMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotMode::Active => write!(f, "🟢 READY"),
            BotMode::Paused => write!(f, "😴 AFK"),
        }
    }
}

/// Lifetime counters, persisted with the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub scan_cycles: u64,
    pub supervisor_cycles: u64,
    pub signals_alerted: u64,
    pub positions_opened: u64,
    pub positions_closed: u64,
    pub wins: u64,
    pub losses: u64,
}

impl Counters {
    /// Win rate over fully closed positions, as a percentage.
    pub fn win_rate(&self) -> f64 {
        let resolved = self.wins + self.losses;
        if resolved == 0 {
            0.0
        } else {
            self.wins as f64 / resolved as f64 * 100.0
        }
    }
}

/// Why a candidate did not become a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    BelowThreshold,
    Duplicate,
    AtCapacity,
    SymbolAlreadyOpen,
    InsufficientCash,
    InvalidRisk,
    Paused,
    /// The mutation would have broken a portfolio invariant.
    InvariantBreach,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectReason::BelowThreshold => "below threshold",
            RejectReason::Duplicate => "already sent",
            RejectReason::AtCapacity => "max positions",
            RejectReason::SymbolAlreadyOpen => "open pos",
            RejectReason::InsufficientCash => "insufficient cash",
            RejectReason::InvalidRisk => "invalid risk levels",
            RejectReason::Paused => "AFK",
            RejectReason::InvariantBreach => "ledger invariant",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for SWINGWATCH.
#[derive(Debug, thiserror::Error)]
pub enum SwingError {
    #[error("Data unavailable ({symbol}): {reason}")]
    DataUnavailable { symbol: String, reason: String },

    #[error("Validation failed ({symbol}): {reason}")]
    Validation { symbol: String, reason: String },

    #[error("Max open positions reached ({max})")]
    AtCapacity { max: usize },

    #[error("Position already open: {0}")]
    SymbolAlreadyOpen(String),

    #[error("Insufficient cash: need ${needed:.2}, have ${available:.2}")]
    InsufficientCash { needed: Decimal, available: Decimal },

    #[error("Duplicate signal: {0}")]
    DuplicateSignal(String),

    #[error("Entries paused (AFK)")]
    Paused,

    #[error("Portfolio invariant violated: {0}")]
    InvariantBreach(String),

    #[error("Position not found: {0}")]
    PositionNotFound(String),

    #[error("Invalid transition for {symbol}: {from} → {to}")]
    InvalidTransition {
        symbol: String,
        from: PositionState,
        to: PositionState,
    },

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Corrupt state file: {0}")]
    CorruptState(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SwingError {
    /// Persistence and corrupt-state errors stop the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SwingError::Persistence(_) | SwingError::CorruptState(_))
    }

    /// Map an admission error to the reject reason reported in scan summaries.
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            SwingError::Validation { .. } => Some(RejectReason::InvalidRisk),
            SwingError::AtCapacity { .. } => Some(RejectReason::AtCapacity),
            SwingError::SymbolAlreadyOpen(_) => Some(RejectReason::SymbolAlreadyOpen),
            SwingError::InsufficientCash { .. } => Some(RejectReason::InsufficientCash),
            SwingError::DuplicateSignal(_) => Some(RejectReason::Duplicate),
            SwingError::Paused => Some(RejectReason::Paused),
            SwingError::InvariantBreach(_) => Some(RejectReason::InvariantBreach),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

/// Adaptive price formatting across price magnitudes.
pub fn fmt_price(price: f64) -> String {
    let abs = price.abs();
    if price == 0.0 {
        "$0".to_string()
    } else if abs >= 1.0 {
        format!("${price:.2}")
    } else if abs >= 0.01 {
        format!("${price:.4}")
    } else if abs >= 0.0001 {
        format!("${price:.6}")
    } else {
        format!("${price:.8}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
