//! Scoring engine.
//!
//! Classifies the 4H regime and the 1H entry path, then scores the
//! setup on four capped pillars:
//!
//! | Pillar      | Max | Sub-metrics                                         |
//! |-------------|-----|-----------------------------------------------------|
//! | Momentum    | 40  | histogram persistence, delta pct, magnitude pct     |
//! | Structure   | 25  | EMA alignment, breakout, minus anti-chase penalty   |
//! | Cleanliness | 20  | volume percentile, wick-to-body safety              |
//! | Context     | 15  | regime agreement, relative strength vs reference   |
//!
//! Every sub-metric goes through a linear `Ramp` onto its point budget.
//! The ramps live in `ScoringConfig` so they can be tuned from
//! `config.toml` and pinned in tests.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::indicators::{percentile_rank, IndicatorSnapshot};
use crate::types::{Candidate, Direction, EntryPath, PillarBreakdown, TriggerSignature};

// ---------------------------------------------------------------------------
// Point budgets
// ---------------------------------------------------------------------------

pub const MOMENTUM_MAX: f64 = 40.0;
pub const STRUCTURE_MAX: f64 = 25.0;
pub const CLEANLINESS_MAX: f64 = 20.0;
pub const CONTEXT_MAX: f64 = 15.0;

const PERSISTENCE_POINTS: f64 = 15.0;
const DELTA_POINTS: f64 = 10.0;
const MAGNITUDE_POINTS: f64 = 15.0;
const EMA_ALIGNED_BASE: f64 = 4.0;
const EMA_SPREAD_POINTS: f64 = 6.0;
const BREAKOUT_POINTS: f64 = 15.0;
const CHASE_PENALTY_MAX: f64 = 10.0;
const VOLUME_POINTS: f64 = 12.0;
const WICK_POINTS: f64 = 8.0;
const REGIME_POINTS: f64 = 7.0;
const RS_POINTS: f64 = 8.0;

// ---------------------------------------------------------------------------
// Scaling
// ---------------------------------------------------------------------------

/// Monotonic linear scaling: `lo` → 0, `hi` → 1, clamped outside.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Ramp {
    pub lo: f64,
    pub hi: f64,
}

impl Ramp {
    pub const fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    pub fn fraction(&self, x: f64) -> f64 {
        if !x.is_finite() {
            return 0.0;
        }
        if self.hi <= self.lo {
            return if x >= self.hi { 1.0 } else { 0.0 };
        }
        ((x - self.lo) / (self.hi - self.lo)).clamp(0.0, 1.0)
    }

    pub fn points(&self, x: f64, max: f64) -> f64 {
        self.fraction(x) * max
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Entry thresholds and scaling curves.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Minimum composite score for a candidate to be admitted.
    pub acceptance_threshold: f64,
    /// Histogram bars of confirmation required on the trend path.
    pub min_confirm_bars: usize,
    /// Oldest cross (in bars) still considered fresh.
    pub max_cross_age: usize,
    /// Countertrend: |histogram| percentile floor.
    pub countertrend_hist_percentile: f64,
    /// Countertrend: minimum histogram run.
    pub countertrend_min_persistence: usize,
    /// Countertrend: volume percentile floor.
    pub countertrend_volume_percentile: f64,

    pub persistence_ramp: Ramp,
    pub delta_ramp: Ramp,
    pub magnitude_ramp: Ramp,
    /// EMA fast/slow spread, percent of the slow EMA.
    pub ema_spread_ramp: Ramp,
    /// Close beyond the prior range, in ATR.
    pub breakout_ramp: Ramp,
    /// Close distance past the fast EMA, in ATR (penalty).
    pub chase_ramp: Ramp,
    pub volume_ramp: Ramp,
    /// 1 − adverse wick / bar range.
    pub wick_ramp: Ramp,
    /// Direction-signed change minus reference change.
    pub relative_strength_ramp: Ramp,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 55.0,
            min_confirm_bars: 2,
            max_cross_age: 3,
            countertrend_hist_percentile: 90.0,
            countertrend_min_persistence: 3,
            countertrend_volume_percentile: 70.0,
            persistence_ramp: Ramp::new(1.0, 5.0),
            delta_ramp: Ramp::new(40.0, 100.0),
            magnitude_ramp: Ramp::new(50.0, 100.0),
            ema_spread_ramp: Ramp::new(0.0, 2.0),
            breakout_ramp: Ramp::new(-0.5, 1.0),
            chase_ramp: Ramp::new(1.5, 4.0),
            volume_ramp: Ramp::new(30.0, 95.0),
            wick_ramp: Ramp::new(0.0, 1.0),
            relative_strength_ramp: Ramp::new(-0.05, 0.05),
        }
    }
}

impl ScoringConfig {
    /// All ramps must rise (`hi > lo`) so every sub-score stays monotonic.
    pub fn validate(&self) -> Result<(), String> {
        let ramps = [
            ("persistence_ramp", self.persistence_ramp),
            ("delta_ramp", self.delta_ramp),
            ("magnitude_ramp", self.magnitude_ramp),
            ("ema_spread_ramp", self.ema_spread_ramp),
            ("breakout_ramp", self.breakout_ramp),
            ("chase_ramp", self.chase_ramp),
            ("volume_ramp", self.volume_ramp),
            ("wick_ramp", self.wick_ramp),
            ("relative_strength_ramp", self.relative_strength_ramp),
        ];
        for (name, r) in ramps {
            if !(r.lo.is_finite() && r.hi.is_finite() && r.hi > r.lo) {
                return Err(format!("scoring.{name}: hi must exceed lo"));
            }
        }
        if !(0.0..=100.0).contains(&self.acceptance_threshold) {
            return Err("scoring.acceptance_threshold must be within 0–100".into());
        }
        if self.min_confirm_bars == 0 || self.max_cross_age < self.min_confirm_bars {
            return Err("scoring.max_cross_age must be ≥ min_confirm_bars ≥ 1".into());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// 4H regime: sign of (close − EMA200).
pub fn regime(h4: &IndicatorSnapshot) -> Option<Direction> {
    Direction::from_sign(h4.close() - h4.ema_trend)
}

/// Trend-aligned path: EMA ordering matches the regime, histogram on the
/// regime's side for a fresh, confirmed run.
pub fn trend_entry(h1: &IndicatorSnapshot, regime: Direction, cfg: &ScoringConfig) -> bool {
    let ema_ordered = match regime {
        Direction::Long => h1.ema_fast > h1.ema_slow,
        Direction::Short => h1.ema_fast < h1.ema_slow,
    };
    ema_ordered
        && h1.histogram_direction() == Some(regime)
        && h1.histogram_run >= cfg.min_confirm_bars
        && h1.histogram_run <= cfg.max_cross_age
}

/// The four joint countertrend conditions, kept separate for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountertrendChecks {
    pub magnitude: bool,
    pub persistence: bool,
    pub breakout: bool,
    pub volume: bool,
}

impl CountertrendChecks {
    /// No partial credit: every condition must hold.
    pub fn all(&self) -> bool {
        self.magnitude && self.persistence && self.breakout && self.volume
    }
}

pub fn countertrend_checks(
    h1: &IndicatorSnapshot,
    direction: Direction,
    cfg: &ScoringConfig,
) -> CountertrendChecks {
    let breakout = match direction {
        Direction::Long => h1.close() > h1.range_high,
        Direction::Short => h1.close() < h1.range_low,
    };
    CountertrendChecks {
        magnitude: magnitude_percentile(h1) >= cfg.countertrend_hist_percentile,
        persistence: h1.histogram_direction() == Some(direction)
            && h1.histogram_run >= cfg.countertrend_min_persistence,
        breakout,
        volume: h1.volume_percentile >= cfg.countertrend_volume_percentile,
    }
}

/// Decide the entry direction and path, if any.
pub fn classify(
    h4: &IndicatorSnapshot,
    h1: &IndicatorSnapshot,
    cfg: &ScoringConfig,
) -> Option<(Direction, EntryPath)> {
    let regime = regime(h4)?;
    if trend_entry(h1, regime, cfg) {
        return Some((regime, EntryPath::TrendAligned));
    }
    let against = regime.opposite();
    if countertrend_checks(h1, against, cfg).all() {
        return Some((against, EntryPath::Countertrend));
    }
    None
}

// ---------------------------------------------------------------------------
// Pillars
// ---------------------------------------------------------------------------

/// Raw sub-metrics feeding the pillars.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PillarInputs {
    /// Histogram run length in bars.
    pub persistence: f64,
    /// Percentile of the latest |histogram| change.
    pub delta_percentile: f64,
    /// Percentile of the latest |histogram|.
    pub magnitude_percentile: f64,
    pub ema_aligned: bool,
    /// |EMA fast − EMA slow| / EMA slow, in percent.
    pub ema_spread_pct: f64,
    /// Close beyond the prior range in the trade direction, in ATR.
    pub breakout_atr: f64,
    /// Close past the fast EMA in the trade direction, in ATR.
    pub chase_atr: f64,
    pub volume_percentile: f64,
    /// 1 − adverse wick / range, in [0, 1].
    pub wick_safety: f64,
    pub regime_agrees: bool,
    pub relative_strength: f64,
}

fn magnitude_percentile(h1: &IndicatorSnapshot) -> f64 {
    let magnitudes: Vec<f64> = h1.histogram_history.iter().map(|h| h.abs()).collect();
    percentile_rank(h1.histogram.abs(), &magnitudes)
}

/// Extract pillar inputs for a direction from the 1H snapshot.
pub fn pillar_inputs(
    h1: &IndicatorSnapshot,
    direction: Direction,
    regime: Direction,
    reference_change: f64,
) -> PillarInputs {
    let sign = direction.sign();
    let close = h1.close();

    let deltas = h1.histogram_deltas();
    let delta_percentile = deltas
        .last()
        .map(|d| percentile_rank(*d, &deltas))
        .unwrap_or(50.0);

    let ema_aligned = (h1.ema_fast - h1.ema_slow) * sign > 0.0;
    let ema_spread_pct = if h1.ema_slow != 0.0 {
        (h1.ema_fast - h1.ema_slow).abs() / h1.ema_slow.abs() * 100.0
    } else {
        0.0
    };

    let (breakout_atr, chase_atr) = if h1.atr > 0.0 {
        let beyond = match direction {
            Direction::Long => close - h1.range_high,
            Direction::Short => h1.range_low - close,
        };
        (beyond / h1.atr, (close - h1.ema_fast) * sign / h1.atr)
    } else {
        (0.0, 0.0)
    };

    let range = h1.last.range();
    let wick_safety = if range > 0.0 {
        (1.0 - h1.last.adverse_wick(direction) / range).clamp(0.0, 1.0)
    } else {
        1.0
    };

    PillarInputs {
        persistence: h1.histogram_run as f64,
        delta_percentile,
        magnitude_percentile: magnitude_percentile(h1),
        ema_aligned,
        ema_spread_pct,
        breakout_atr,
        chase_atr,
        volume_percentile: h1.volume_percentile,
        wick_safety,
        regime_agrees: direction == regime,
        relative_strength: (h1.change - reference_change) * sign,
    }
}

/// Map raw inputs onto the capped pillars.
pub fn score_pillars(inputs: &PillarInputs, cfg: &ScoringConfig) -> PillarBreakdown {
    let momentum = cfg.persistence_ramp.points(inputs.persistence, PERSISTENCE_POINTS)
        + cfg.delta_ramp.points(inputs.delta_percentile, DELTA_POINTS)
        + cfg.magnitude_ramp.points(inputs.magnitude_percentile, MAGNITUDE_POINTS);

    let alignment = if inputs.ema_aligned {
        EMA_ALIGNED_BASE + cfg.ema_spread_ramp.points(inputs.ema_spread_pct, EMA_SPREAD_POINTS)
    } else {
        0.0
    };
    let structure = alignment + cfg.breakout_ramp.points(inputs.breakout_atr, BREAKOUT_POINTS)
        - cfg.chase_ramp.points(inputs.chase_atr, CHASE_PENALTY_MAX);

    let cleanliness = cfg.volume_ramp.points(inputs.volume_percentile, VOLUME_POINTS)
        + cfg.wick_ramp.points(inputs.wick_safety, WICK_POINTS);

    let regime_points = if inputs.regime_agrees { REGIME_POINTS } else { 0.0 };
    let context = regime_points
        + cfg
            .relative_strength_ramp
            .points(inputs.relative_strength, RS_POINTS);

    PillarBreakdown {
        momentum: momentum.clamp(0.0, MOMENTUM_MAX),
        structure: structure.clamp(0.0, STRUCTURE_MAX),
        cleanliness: cleanliness.clamp(0.0, CLEANLINESS_MAX),
        context: context.clamp(0.0, CONTEXT_MAX),
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Full evaluation of one symbol. Pure: no I/O, no state.
pub fn evaluate(
    symbol: &str,
    h4: &IndicatorSnapshot,
    h1: &IndicatorSnapshot,
    reference_change: f64,
    cfg: &ScoringConfig,
    now: DateTime<Utc>,
) -> Option<Candidate> {
    let regime = regime(h4)?;
    let (direction, path) = classify(h4, h1, cfg)?;
    let inputs = pillar_inputs(h1, direction, regime, reference_change);
    let pillars = score_pillars(&inputs, cfg);
    let score = pillars.total();

    debug!(
        symbol,
        direction = %direction,
        path = %path,
        score = format!("{score:.1}"),
        pillars = %pillars,
        "Candidate scored"
    );

    Some(Candidate {
        symbol: symbol.to_string(),
        direction,
        path,
        score,
        pillars,
        entry_price: h1.close(),
        atr: h1.atr,
        entry_histogram: h1.histogram,
        relative_strength: inputs.relative_strength,
        trigger: TriggerSignature {
            symbol: symbol.to_string(),
            direction,
            cross_at: h1.run_started_at,
        },
        timestamp: now,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::Candle;
    use chrono::TimeZone;

    pub(crate) fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 10, h, 0, 0).unwrap()
    }

    /// Neutral 1H snapshot around price 100; tests tweak fields.
    pub(crate) fn snapshot(close: f64) -> IndicatorSnapshot {
        IndicatorSnapshot {
            last: Candle {
                open_time: ts(10),
                open: close,
                high: close + 0.5,
                low: close - 0.5,
                close,
                volume: 1000.0,
            },
            ema_fast: close,
            ema_slow: close,
            ema_trend: close,
            macd: 0.0,
            macd_signal: 0.0,
            histogram: 0.0,
            prev_macd: 0.0,
            prev_macd_signal: 0.0,
            histogram_history: vec![0.1, -0.1, 0.2, -0.2, 0.3, -0.3],
            histogram_run: 0,
            run_started_at: ts(10),
            rsi: 50.0,
            atr: 2.0,
            volume_percentile: 50.0,
            range_high: close + 3.0,
            range_low: close - 3.0,
            change: 0.0,
        }
    }

    /// Short regime on 4H, bearish trend setup on 1H (2 bars of confirmation).
    pub(crate) fn short_trend_setup() -> (IndicatorSnapshot, IndicatorSnapshot) {
        let mut h4 = snapshot(100.0);
        h4.ema_trend = 110.0;

        let mut h1 = snapshot(100.0);
        h1.ema_fast = 101.0;
        h1.ema_slow = 102.0;
        h1.macd = -0.6;
        h1.macd_signal = -0.4;
        h1.histogram = -0.2;
        h1.prev_macd = -0.45;
        h1.prev_macd_signal = -0.4;
        h1.histogram_history = vec![0.05, 0.02, -0.05, -0.2];
        h1.histogram_run = 2;
        h1.run_started_at = ts(9);
        (h4, h1)
    }

    /// Long regime, strong bearish countertrend setup meeting all four conditions.
    fn countertrend_setup() -> (IndicatorSnapshot, IndicatorSnapshot) {
        let mut h4 = snapshot(100.0);
        h4.ema_trend = 90.0;

        let mut h1 = snapshot(95.0);
        h1.ema_fast = 97.0;
        h1.ema_slow = 96.0;
        h1.histogram = -0.9;
        h1.histogram_history = vec![0.1, 0.2, -0.1, -0.3, -0.5, -0.9];
        h1.histogram_run = 4;
        h1.range_low = 96.0;
        h1.volume_percentile = 85.0;
        (h4, h1)
    }

    #[test]
    fn test_ramp_is_monotonic_and_clamped() {
        let r = Ramp::new(10.0, 20.0);
        assert_eq!(r.fraction(5.0), 0.0);
        assert_eq!(r.fraction(15.0), 0.5);
        assert_eq!(r.fraction(25.0), 1.0);
        assert_eq!(r.fraction(f64::NAN), 0.0);
        let mut prev = 0.0;
        for i in 0..50 {
            let f = r.fraction(i as f64);
            assert!(f >= prev);
            prev = f;
        }
        assert_eq!(r.points(15.0, 8.0), 4.0);
    }

    #[test]
    fn test_default_config_validates() {
        assert!(ScoringConfig::default().validate().is_ok());
        let bad = ScoringConfig {
            volume_ramp: Ramp::new(50.0, 50.0),
            ..ScoringConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_regime_sign() {
        let (h4, _) = short_trend_setup();
        assert_eq!(regime(&h4), Some(Direction::Short));
        let flat = snapshot(100.0);
        assert_eq!(regime(&flat), None);
    }

    #[test]
    fn test_short_trend_aligned_scenario() {
        let (h4, h1) = short_trend_setup();
        let cfg = ScoringConfig::default();
        assert_eq!(
            classify(&h4, &h1, &cfg),
            Some((Direction::Short, EntryPath::TrendAligned))
        );

        let c = evaluate("ETH/USDT", &h4, &h1, 0.0, &cfg, ts(11)).unwrap();
        assert_eq!(c.direction, Direction::Short);
        assert_eq!(c.path, EntryPath::TrendAligned);
        assert_eq!(c.trigger.cross_at, ts(9));
        assert!((c.score - c.pillars.total()).abs() < 1e-12);
    }

    #[test]
    fn test_hand_computed_reference_score() {
        let inputs = PillarInputs {
            persistence: 2.0,          // (2-1)/4 * 15 = 3.75
            delta_percentile: 70.0,    // (70-40)/60 * 10 = 5
            magnitude_percentile: 75.0, // (75-50)/50 * 15 = 7.5
            ema_aligned: true,
            ema_spread_pct: 1.0,       // 4 + 0.5 * 6 = 7
            breakout_atr: 0.25,        // 0.75/1.5 * 15 = 7.5
            chase_atr: 2.75,           // penalty 0.5 * 10 = 5
            volume_percentile: 62.5,   // 32.5/65 * 12 = 6
            wick_safety: 0.75,         // 0.75 * 8 = 6
            regime_agrees: true,       // 7
            relative_strength: 0.0,    // 0.5 * 8 = 4
        };
        let p = score_pillars(&inputs, &ScoringConfig::default());
        assert!((p.momentum - 16.25).abs() < 1e-9);
        assert!((p.structure - 9.5).abs() < 1e-9);
        assert!((p.cleanliness - 12.0).abs() < 1e-9);
        assert!((p.context - 11.0).abs() < 1e-9);
        assert!((p.total() - 48.75).abs() < 1e-9);
    }

    #[test]
    fn test_stale_cross_is_not_trend_entry() {
        let (h4, mut h1) = short_trend_setup();
        h1.histogram_run = 6;
        assert!(classify(&h4, &h1, &ScoringConfig::default()).is_none());
    }

    #[test]
    fn test_single_confirmation_bar_is_not_enough() {
        let (h4, mut h1) = short_trend_setup();
        h1.histogram_run = 1;
        assert!(!trend_entry(&h1, Direction::Short, &ScoringConfig::default()));
    }

    #[test]
    fn test_ema_misordered_blocks_trend_path() {
        let (_, mut h1) = short_trend_setup();
        h1.ema_fast = 103.0;
        assert!(!trend_entry(&h1, Direction::Short, &ScoringConfig::default()));
    }

    #[test]
    fn test_countertrend_requires_all_four() {
        let cfg = ScoringConfig::default();
        let (h4, h1) = countertrend_setup();
        assert_eq!(
            classify(&h4, &h1, &cfg),
            Some((Direction::Short, EntryPath::Countertrend))
        );

        let mut weak_magnitude = h1.clone();
        weak_magnitude.histogram = -0.25;
        let mut short_run = h1.clone();
        short_run.histogram_run = 2;
        let mut no_breakout = h1.clone();
        no_breakout.range_low = 94.0;
        let mut thin_volume = h1.clone();
        thin_volume.volume_percentile = 40.0;

        for variant in [weak_magnitude, short_run, no_breakout, thin_volume] {
            let checks = countertrend_checks(&variant, Direction::Short, &cfg);
            assert!(!checks.all());
            assert!(classify(&h4, &variant, &cfg).is_none());
        }
    }

    #[test]
    fn test_countertrend_never_with_regime() {
        let cfg = ScoringConfig::default();
        let (mut h4, h1) = countertrend_setup();
        // Flip regime to short: the bearish setup is now with-trend, but the
        // EMA order (fast > slow) blocks the trend path and the countertrend
        // path only looks long.
        h4.ema_trend = 120.0;
        assert!(classify(&h4, &h1, &cfg).is_none());
    }

    #[test]
    fn test_pillars_bounded_for_extreme_inputs() {
        let cfg = ScoringConfig::default();
        let extremes = [-1e9, -1.0, 0.0, 0.5, 1.0, 50.0, 1e9, f64::NAN];
        for &x in &extremes {
            for aligned in [true, false] {
                let inputs = PillarInputs {
                    persistence: x,
                    delta_percentile: x,
                    magnitude_percentile: x,
                    ema_aligned: aligned,
                    ema_spread_pct: x,
                    breakout_atr: x,
                    chase_atr: -x,
                    volume_percentile: x,
                    wick_safety: x,
                    regime_agrees: aligned,
                    relative_strength: x,
                };
                let p = score_pillars(&inputs, &cfg);
                assert!((0.0..=MOMENTUM_MAX).contains(&p.momentum));
                assert!((0.0..=STRUCTURE_MAX).contains(&p.structure));
                assert!((0.0..=CLEANLINESS_MAX).contains(&p.cleanliness));
                assert!((0.0..=CONTEXT_MAX).contains(&p.context));
                assert!((0.0..=100.0).contains(&p.total()));
            }
        }
    }

    #[test]
    fn test_pillar_inputs_signed_by_direction() {
        let (_, mut h1) = short_trend_setup();
        h1.change = -0.03;
        let inputs = pillar_inputs(&h1, Direction::Short, Direction::Short, 0.01);
        // Coin fell 3%, reference rose 1% → +4% in the short's favour
        assert!((inputs.relative_strength - 0.04).abs() < 1e-12);
        assert!(inputs.ema_aligned);
        assert!(inputs.regime_agrees);
        // close 100 vs range_low 97 → 3 below the breakout level, ATR 2
        assert!((inputs.breakout_atr + 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_evaluate_none_without_regime() {
        let (_, h1) = short_trend_setup();
        let flat = snapshot(100.0);
        assert!(evaluate("X", &flat, &h1, 0.0, &ScoringConfig::default(), ts(1)).is_none());
    }
}
