//! Position supervisor.
//!
//! Every tick, for each open position: read the last closed 5m bar plus
//! the live price, refresh the 1H snapshot, and apply at most one action,
//! in priority order:
//!
//! 1. stop breached → close (stop-loss, or breakeven stop once armed)
//! 2. TP1 touched while OPEN → realize the TP1 fraction, stop to entry
//! 3. 1H MACD crossed against the position → close
//! 4. countertrend only: histogram faded or flipped → close
//!
//! A symbol whose data cannot be fetched is skipped for the tick; the
//! other symbols are still evaluated.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::alerts::{self, Notifier};
use crate::config::AppConfig;
use crate::engine::ledger::{Ledger, PositionPatch};
use crate::market::{fetch_with_retry, CandleSource, FetchPolicy};
use crate::strategy::indicators::{compute_snapshot, IndicatorSnapshot};
use crate::types::{
    split_closed, Direction, EntryPath, ExitReason, Position, PositionState, SwingError, Timeframe,
};

/// Price extremes seen since the last tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceQuote {
    /// Last closed 5m bar low / high (live price when no closed bar).
    pub low: f64,
    pub high: f64,
    pub price: f64,
}

impl PriceQuote {
    pub fn at(price: f64) -> Self {
        Self {
            low: price,
            high: price,
            price,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SupervisorAction {
    Close { price: f64, reason: ExitReason },
    ArmBreakeven { price: f64 },
}

/// Decide the single action for this tick. Pure.
pub fn decide(
    position: &Position,
    quote: &PriceQuote,
    h1: Option<&IndicatorSnapshot>,
    fade_fraction: f64,
) -> Option<SupervisorAction> {
    if position.state == PositionState::Closed {
        return None;
    }

    if position.stop_breached(quote.low, quote.high, quote.price) {
        let reason = if position.breakeven_moved {
            ExitReason::BreakevenStop
        } else {
            ExitReason::StopLoss
        };
        return Some(SupervisorAction::Close {
            price: position.stop_loss,
            reason,
        });
    }

    if position.state == PositionState::Open
        && position.tp1_touched(quote.low, quote.high, quote.price)
    {
        return Some(SupervisorAction::ArmBreakeven {
            price: position.take_profit1,
        });
    }

    let h1 = h1?;
    if h1.crossed_toward(position.direction.opposite()) {
        return Some(SupervisorAction::Close {
            price: quote.price,
            reason: ExitReason::ReverseCross,
        });
    }

    if position.path == EntryPath::Countertrend && momentum_faded(position, h1, fade_fraction) {
        return Some(SupervisorAction::Close {
            price: quote.price,
            reason: ExitReason::MomentumFade,
        });
    }
    None
}

/// Histogram flipped against the position, or shrank below
/// `fraction` × its entry magnitude.
pub fn momentum_faded(position: &Position, h1: &IndicatorSnapshot, fraction: f64) -> bool {
    let flipped = match Direction::from_sign(h1.histogram) {
        Some(dir) => dir != position.direction,
        None => true,
    };
    flipped || h1.histogram.abs() < fraction * position.entry_histogram.abs()
}

/// Outcome of one supervisor tick.
#[derive(Debug, Clone, Default)]
pub struct SupervisorReport {
    pub checked: usize,
    pub actions: Vec<(String, SupervisorAction)>,
    /// (symbol, reason) for data or ledger failures.
    pub skipped: Vec<(String, String)>,
}

pub struct PositionSupervisor {
    source: Arc<dyn CandleSource>,
    ledger: Arc<Ledger>,
    notifier: Arc<dyn Notifier>,
    cfg: Arc<AppConfig>,
    policy: FetchPolicy,
}

impl PositionSupervisor {
    pub fn new(
        source: Arc<dyn CandleSource>,
        ledger: Arc<Ledger>,
        notifier: Arc<dyn Notifier>,
        cfg: Arc<AppConfig>,
    ) -> Self {
        let policy = FetchPolicy::from_config(&cfg.market_data);
        Self {
            source,
            ledger,
            notifier,
            cfg,
            policy,
        }
    }

    async fn quote(&self, symbol: &str, now: DateTime<Utc>) -> Result<PriceQuote, SwingError> {
        let bars = fetch_with_retry(self.source.as_ref(), symbol, Timeframe::M5, 2, self.policy).await?;
        let (closed, forming) = split_closed(&bars, Timeframe::M5, now);
        let price = forming
            .or(closed.last())
            .map(|b| b.close)
            .filter(|p| p.is_finite() && *p > 0.0)
            .ok_or_else(|| SwingError::DataUnavailable {
                symbol: symbol.to_string(),
                reason: "no 5m price".to_string(),
            })?;
        Ok(match closed.last() {
            Some(bar) => PriceQuote {
                low: bar.low.min(price),
                high: bar.high.max(price),
                price,
            },
            None => PriceQuote::at(price),
        })
    }

    async fn h1_snapshot(&self, symbol: &str, now: DateTime<Utc>) -> Result<IndicatorSnapshot, SwingError> {
        let limit = self.cfg.market_data.history_bars + 1;
        let bars = fetch_with_retry(self.source.as_ref(), symbol, Timeframe::H1, limit, self.policy).await?;
        let (closed, _) = split_closed(&bars, Timeframe::H1, now);
        compute_snapshot(closed, &self.cfg.indicators).ok_or_else(|| SwingError::DataUnavailable {
            symbol: symbol.to_string(),
            reason: format!("1h: {} closed bars, no snapshot", closed.len()),
        })
    }

    /// Evaluate every open position once. Persistence failures abort the
    /// tick; everything else is isolated per symbol.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<SupervisorReport, SwingError> {
        let positions = self.ledger.positions().await;
        let mut report = SupervisorReport::default();
        if positions.is_empty() {
            return Ok(report);
        }

        let data = join_all(positions.iter().map(|p| async move {
            tokio::join!(self.quote(&p.symbol, now), self.h1_snapshot(&p.symbol, now))
        }))
        .await;

        for (position, (quote, h1)) in positions.iter().zip(data) {
            let symbol = position.symbol.clone();
            let quote = match quote {
                Ok(quote) => quote,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Position check skipped");
                    report.skipped.push((symbol, e.to_string()));
                    continue;
                }
            };
            // Stop and TP1 still run without the 1H snapshot
            let h1 = match h1 {
                Ok(snap) => Some(snap),
                Err(e) => {
                    debug!(symbol = %symbol, error = %e, "1H snapshot unavailable");
                    None
                }
            };
            report.checked += 1;

            let Some(action) = decide(position, &quote, h1.as_ref(), self.cfg.risk.fade_fraction) else {
                continue;
            };

            match self.apply(&symbol, action, now).await {
                Ok(()) => report.actions.push((symbol, action)),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Position update rejected");
                    report.skipped.push((symbol, e.to_string()));
                }
            }
        }

        self.ledger.record_supervisor_cycle().await?;
        info!(
            checked = report.checked,
            actions = report.actions.len(),
            skipped = report.skipped.len(),
            "Supervisor cycle complete"
        );
        Ok(report)
    }

    async fn apply(&self, symbol: &str, action: SupervisorAction, now: DateTime<Utc>) -> Result<(), SwingError> {
        let message = match action {
            SupervisorAction::ArmBreakeven { price } => {
                let armed = self
                    .ledger
                    .mutate(symbol, PositionPatch::ArmBreakeven { price }, now)
                    .await?;
                alerts::format_breakeven(&armed)
            }
            SupervisorAction::Close { price, reason } => {
                let trade = self.ledger.close(symbol, price, reason, now).await?;
                alerts::format_exit(&trade)
            }
        };
        if let Err(e) = self.notifier.send(&message).await {
            warn!(symbol, error = %e, "Supervisor alert failed");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::scoring::tests::snapshot;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn position(direction: Direction, path: EntryPath) -> Position {
        let t = Utc.with_ymd_and_hms(2026, 10, 1, 8, 0, 0).unwrap();
        let short = direction == Direction::Short;
        Position {
            symbol: "ETH/USDT".into(),
            direction,
            path,
            entry_price: 100.0,
            stop_loss: if short { 102.0 } else { 98.0 },
            take_profit1: if short { 97.0 } else { 103.0 },
            initial_risk: 2.0,
            size: dec!(1000),
            state: PositionState::Open,
            opened_at: t,
            breakeven_moved: false,
            entry_histogram: direction.sign() * 0.5,
            trigger_cross_at: t,
        }
    }

    /// 1H snapshot with the histogram still on the position's side.
    fn healthy(direction: Direction) -> IndicatorSnapshot {
        let mut s = snapshot(100.0);
        s.macd = direction.sign() * 0.8;
        s.macd_signal = direction.sign() * 0.3;
        s.prev_macd = s.macd;
        s.prev_macd_signal = s.macd_signal;
        s.histogram = s.macd - s.macd_signal;
        s
    }

    #[test]
    fn test_short_touching_tp1_arms_breakeven() {
        let p = position(Direction::Short, EntryPath::TrendAligned);
        let quote = PriceQuote { low: 97.0, high: 99.5, price: 98.0 };
        let action = decide(&p, &quote, Some(&healthy(Direction::Short)), 0.4);
        assert_eq!(action, Some(SupervisorAction::ArmBreakeven { price: 97.0 }));
    }

    #[test]
    fn test_stop_beats_tp1_on_same_tick() {
        let p = position(Direction::Long, EntryPath::TrendAligned);
        // Wild bar tagged both levels: stop wins
        let quote = PriceQuote { low: 97.5, high: 103.5, price: 100.0 };
        assert_eq!(
            decide(&p, &quote, None, 0.4),
            Some(SupervisorAction::Close { price: 98.0, reason: ExitReason::StopLoss })
        );
    }

    #[test]
    fn test_breakeven_stop_reason_after_arm() {
        let mut p = position(Direction::Long, EntryPath::TrendAligned);
        p.state = PositionState::BreakevenArmed;
        p.breakeven_moved = true;
        p.stop_loss = 100.0;
        let quote = PriceQuote::at(99.9);
        assert_eq!(
            decide(&p, &quote, None, 0.4),
            Some(SupervisorAction::Close { price: 100.0, reason: ExitReason::BreakevenStop })
        );
    }

    #[test]
    fn test_armed_position_does_not_rearm() {
        let mut p = position(Direction::Long, EntryPath::TrendAligned);
        p.state = PositionState::BreakevenArmed;
        p.stop_loss = 100.0;
        let quote = PriceQuote::at(104.0);
        assert_eq!(decide(&p, &quote, Some(&healthy(Direction::Long)), 0.4), None);
    }

    #[test]
    fn test_reverse_cross_closes_at_live_price() {
        let p = position(Direction::Long, EntryPath::TrendAligned);
        let mut h1 = healthy(Direction::Long);
        h1.prev_macd = 0.5;
        h1.prev_macd_signal = 0.4;
        h1.macd = 0.3;
        h1.macd_signal = 0.35;
        h1.histogram = -0.05;
        let quote = PriceQuote::at(101.2);
        assert_eq!(
            decide(&p, &quote, Some(&h1), 0.4),
            Some(SupervisorAction::Close { price: 101.2, reason: ExitReason::ReverseCross })
        );
    }

    #[test]
    fn test_fade_only_for_countertrend() {
        let mut h1 = healthy(Direction::Short);
        // Still bearish but only 0.1 vs 0.5 at entry
        h1.macd = -0.4;
        h1.macd_signal = -0.3;
        h1.prev_macd = -0.45;
        h1.prev_macd_signal = -0.3;
        h1.histogram = -0.1;
        let quote = PriceQuote::at(99.0);

        let ct = position(Direction::Short, EntryPath::Countertrend);
        assert_eq!(
            decide(&ct, &quote, Some(&h1), 0.4),
            Some(SupervisorAction::Close { price: 99.0, reason: ExitReason::MomentumFade })
        );

        let trend = position(Direction::Short, EntryPath::TrendAligned);
        assert_eq!(decide(&trend, &quote, Some(&h1), 0.4), None);
    }

    #[test]
    fn test_momentum_faded_on_flip() {
        let p = position(Direction::Long, EntryPath::Countertrend);
        let mut h1 = healthy(Direction::Long);
        assert!(!momentum_faded(&p, &h1, 0.4));
        h1.histogram = -0.6;
        assert!(momentum_faded(&p, &h1, 0.4));
    }

    #[test]
    fn test_no_snapshot_no_indicator_exits() {
        let p = position(Direction::Short, EntryPath::Countertrend);
        assert_eq!(decide(&p, &PriceQuote::at(99.0), None, 0.4), None);
    }
}
