//! Risk calculator.
//!
//! Derives stop-loss and first take-profit from ATR, and the AFK
//! safety levels shown for open positions while entries are paused.

use serde::Deserialize;

use crate::types::{Candidate, Direction, RiskLevels, SwingError};

/// Hard cap on concurrently open positions.
pub const MAX_OPEN_POSITIONS: usize = 10;

/// TP1 distance in R. Fixed: alerts and the supervisor assume 1.5R.
pub const TP1_RR_RATIO: f64 = 1.5;

/// Risk and sizing parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Stop distance in ATR.
    pub atr_multiplier: f64,
    /// TP1 distance in R.
    pub tp1_rr_ratio: f64,
    /// Fraction of the position realized at TP1.
    pub tp1_close_fraction: f64,
    /// Share of equity allocated per position.
    pub position_size_pct: f64,
    /// Round-trip fee, as a fraction of notional.
    pub fee_pct: f64,
    pub max_positions: usize,
    /// Countertrend fade exit: |hist| below this fraction of the entry value.
    pub fade_fraction: f64,
    /// AFK safety stop distance from the current price.
    pub safety_stop_pct: f64,
    /// AFK safety target distance from the current price.
    pub safety_target_pct: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            atr_multiplier: 1.5,
            tp1_rr_ratio: TP1_RR_RATIO,
            tp1_close_fraction: 0.5,
            position_size_pct: 0.10,
            fee_pct: 0.002,
            max_positions: MAX_OPEN_POSITIONS,
            fade_fraction: 0.4,
            safety_stop_pct: 0.04,
            safety_target_pct: 0.10,
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), String> {
        let positive = [
            ("atr_multiplier", self.atr_multiplier),
            ("safety_stop_pct", self.safety_stop_pct),
            ("safety_target_pct", self.safety_target_pct),
        ];
        for (name, v) in positive {
            if !(v.is_finite() && v > 0.0) {
                return Err(format!("risk.{name} must be positive"));
            }
        }
        let fractions = [
            ("tp1_close_fraction", self.tp1_close_fraction),
            ("position_size_pct", self.position_size_pct),
            ("fade_fraction", self.fade_fraction),
        ];
        for (name, v) in fractions {
            if !(v > 0.0 && v <= 1.0) {
                return Err(format!("risk.{name} must be within (0, 1]"));
            }
        }
        if !(0.0..0.1).contains(&self.fee_pct) {
            return Err("risk.fee_pct must be within [0, 0.1)".into());
        }
        if self.tp1_rr_ratio != TP1_RR_RATIO {
            return Err(format!("risk.tp1_rr_ratio must be {TP1_RR_RATIO}, got {}", self.tp1_rr_ratio));
        }
        if !(1..=MAX_OPEN_POSITIONS).contains(&self.max_positions) {
            return Err(format!(
                "risk.max_positions must be within 1..={MAX_OPEN_POSITIONS}, got {}",
                self.max_positions
            ));
        }
        Ok(())
    }
}

/// Stop and TP1 for an entry. Fails on non-finite or non-positive inputs,
/// and whenever the stop does not land strictly on the loss side.
pub fn compute_levels(
    symbol: &str,
    direction: Direction,
    entry: f64,
    atr: f64,
    cfg: &RiskConfig,
) -> Result<RiskLevels, SwingError> {
    let invalid = |reason: String| SwingError::Validation {
        symbol: symbol.to_string(),
        reason,
    };

    for (name, v) in [
        ("entry", entry),
        ("atr", atr),
        ("multiplier", cfg.atr_multiplier),
        ("rr", cfg.tp1_rr_ratio),
    ] {
        if !v.is_finite() || v <= 0.0 {
            return Err(invalid(format!("{name} must be finite and positive, got {v}")));
        }
    }

    let sign = direction.sign();
    let stop_loss = entry - sign * atr * cfg.atr_multiplier;
    let risk = (entry - stop_loss).abs();
    let take_profit1 = entry + sign * risk * cfg.tp1_rr_ratio;

    let loss_side = match direction {
        Direction::Long => stop_loss < entry,
        Direction::Short => stop_loss > entry,
    };
    if !loss_side || stop_loss <= 0.0 || !take_profit1.is_finite() || take_profit1 <= 0.0 {
        return Err(invalid(format!(
            "stop {stop_loss} / tp1 {take_profit1} invalid for {direction} entry {entry}"
        )));
    }

    Ok(RiskLevels {
        stop_loss,
        take_profit1,
        risk,
    })
}

/// Levels for a scored candidate.
pub fn levels_for(candidate: &Candidate, cfg: &RiskConfig) -> Result<RiskLevels, SwingError> {
    compute_levels(
        &candidate.symbol,
        candidate.direction,
        candidate.entry_price,
        candidate.atr,
        cfg,
    )
}

/// Safety stop/target around the current price, surfaced while AFK.
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyLevels {
    pub symbol: String,
    pub direction: Direction,
    pub price: f64,
    pub stop: f64,
    pub target: f64,
}

pub fn safety_levels(symbol: &str, direction: Direction, price: f64, cfg: &RiskConfig) -> SafetyLevels {
    let sign = direction.sign();
    SafetyLevels {
        symbol: symbol.to_string(),
        direction,
        price,
        stop: price * (1.0 - sign * cfg.safety_stop_pct),
        target: price * (1.0 + sign * cfg.safety_target_pct),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
