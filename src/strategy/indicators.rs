//! Indicator engine.
//!
//! Derives EMA / MACD / RSI / ATR / volume percentile readings from a
//! closed-bar candle series and packs the latest values into an
//! `IndicatorSnapshot`. Series helpers return `NaN` during warmup.
//! A snapshot is only produced when history is long enough and every
//! reading is finite; otherwise the caller skips the symbol.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::types::{Candle, Direction};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Indicator periods and windows.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndicatorParams {
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub ema_trend: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub rsi_period: usize,
    pub atr_period: usize,
    /// Bars used to rank the latest volume.
    pub volume_window: usize,
    /// Histogram values kept for percentile ranking.
    pub histogram_window: usize,
    /// Prior bars whose range a breakout must clear.
    pub breakout_lookback: usize,
    /// Bars over which relative strength is measured.
    pub rs_lookback: usize,
    /// Minimum closed bars required for a snapshot.
    pub min_bars: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            ema_fast: 20,
            ema_slow: 50,
            ema_trend: 200,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            rsi_period: 14,
            atr_period: 14,
            volume_window: 50,
            histogram_window: 50,
            breakout_lookback: 12,
            rs_lookback: 16,
            min_bars: 201,
        }
    }
}

// ---------------------------------------------------------------------------
// Series helpers
// ---------------------------------------------------------------------------

/// Exponential moving average, seeded with the SMA of the first `period`
/// finite values. Leading `NaN`s (e.g. MACD warmup) are skipped.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 {
        return out;
    }

    let Some(start) = values.iter().position(|v| v.is_finite()) else {
        return out;
    };
    let seed_end = start + period;
    if seed_end > n {
        return out;
    }

    let seed_window = &values[start..seed_end];
    if seed_window.iter().any(|v| !v.is_finite()) {
        return out;
    }
    let mut ema = seed_window.iter().sum::<f64>() / period as f64;
    out[seed_end - 1] = ema;

    let k = 2.0 / (period as f64 + 1.0);
    for i in seed_end..n {
        ema += k * (values[i] - ema);
        out[i] = ema;
    }
    out
}

/// MACD line, signal line and histogram.
pub struct MacdSeries {
    pub line: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd_series(closes: &[f64], fast: usize, slow: usize, signal: usize) -> MacdSeries {
    let ema_fast = ema_series(closes, fast);
    let ema_slow = ema_series(closes, slow);
    let line: Vec<f64> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema_series(&line, signal);
    let histogram = line.iter().zip(&signal_line).map(|(l, s)| l - s).collect();
    MacdSeries {
        line,
        signal: signal_line,
        histogram,
    }
}

/// Wilder smoothing (alpha = 1/period) seeded with the mean of
/// `values[start..start + period]`.
pub fn wilder_smooth(values: &[f64], period: usize, start: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || start + period > n {
        return out;
    }

    let mut avg = values[start..start + period].iter().sum::<f64>() / period as f64;
    out[start + period - 1] = avg;
    let p = period as f64;
    for i in (start + period)..n {
        avg = (avg * (p - 1.0) + values[i]) / p;
        out[i] = avg;
    }
    out
}

/// True range. TR[0] = high − low (no previous close).
pub fn true_range(bars: &[Candle]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, b)| {
            if i == 0 {
                b.high - b.low
            } else {
                let pc = bars[i - 1].close;
                (b.high - b.low)
                    .max((b.high - pc).abs())
                    .max((b.low - pc).abs())
            }
        })
        .collect()
}

/// Average true range with Wilder smoothing, seeded from TR[1..=period].
pub fn atr_series(bars: &[Candle], period: usize) -> Vec<f64> {
    wilder_smooth(&true_range(bars), period, 1)
}

/// Wilder RSI. avg_loss == 0 → 100; avg_gain == 0 → 0.
pub fn rsi_series(closes: &[f64], period: usize) -> Vec<f64> {
    let n = closes.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n < period + 1 {
        return out;
    }

    let mut gains = vec![0.0; n];
    let mut losses = vec![0.0; n];
    for i in 1..n {
        let ch = closes[i] - closes[i - 1];
        if ch > 0.0 {
            gains[i] = ch;
        } else {
            losses[i] = -ch;
        }
    }

    let avg_gain = wilder_smooth(&gains, period, 1);
    let avg_loss = wilder_smooth(&losses, period, 1);
    for i in period..n {
        let (g, l) = (avg_gain[i], avg_loss[i]);
        out[i] = if l == 0.0 {
            100.0
        } else if g == 0.0 {
            0.0
        } else {
            100.0 - 100.0 / (1.0 + g / l)
        };
    }
    out
}

/// Percentile rank (0–100) of `value` within `window`: the share of
/// window values at or below it. Empty window → 50.
pub fn percentile_rank(value: f64, window: &[f64]) -> f64 {
    if window.is_empty() {
        return 50.0;
    }
    let at_or_below = window.iter().filter(|&&v| v <= value).count();
    at_or_below as f64 / window.len() as f64 * 100.0
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Latest indicator readings for one symbol + timeframe.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSnapshot {
    /// Last closed bar.
    pub last: Candle,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub ema_trend: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub histogram: f64,
    pub prev_macd: f64,
    pub prev_macd_signal: f64,
    /// Recent histogram values, oldest first, ending with `histogram`.
    pub histogram_history: Vec<f64>,
    /// Consecutive bars (including the last) with the histogram's current sign.
    pub histogram_run: usize,
    /// Open time of the first bar of that run.
    pub run_started_at: DateTime<Utc>,
    pub rsi: f64,
    pub atr: f64,
    /// Percentile of the last bar's volume within the volume window.
    pub volume_percentile: f64,
    /// High / low of the `breakout_lookback` bars before the last one.
    pub range_high: f64,
    pub range_low: f64,
    /// Close change over `rs_lookback` bars, as a fraction.
    pub change: f64,
}

impl IndicatorSnapshot {
    pub fn close(&self) -> f64 {
        self.last.close
    }

    /// Direction of the histogram (MACD above/below signal).
    pub fn histogram_direction(&self) -> Option<Direction> {
        Direction::from_sign(self.histogram)
    }

    /// MACD line crossed its signal line on the last bar, toward `direction`.
    pub fn crossed_toward(&self, direction: Direction) -> bool {
        match direction {
            Direction::Long => {
                self.prev_macd <= self.prev_macd_signal && self.macd > self.macd_signal
            }
            Direction::Short => {
                self.prev_macd >= self.prev_macd_signal && self.macd < self.macd_signal
            }
        }
    }

    /// Bar-over-bar changes in histogram magnitude, for delta ranking.
    pub fn histogram_deltas(&self) -> Vec<f64> {
        self.histogram_history
            .windows(2)
            .map(|w| w[1].abs() - w[0].abs())
            .collect()
    }
}

/// Compute a snapshot from closed bars (oldest first). `None` when history
/// is too short or any reading is non-finite.
pub fn compute_snapshot(bars: &[Candle], params: &IndicatorParams) -> Option<IndicatorSnapshot> {
    let needed = params
        .min_bars
        .max(params.ema_trend)
        .max(params.macd_slow + params.macd_signal)
        .max(params.breakout_lookback + 1)
        .max(params.rs_lookback + 1)
        .max(2);
    if bars.len() < needed {
        return None;
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let last_idx = bars.len() - 1;

    let ema_fast = *ema_series(&closes, params.ema_fast).last()?;
    let ema_slow = *ema_series(&closes, params.ema_slow).last()?;
    let ema_trend = *ema_series(&closes, params.ema_trend).last()?;
    let macd = macd_series(&closes, params.macd_fast, params.macd_slow, params.macd_signal);
    let rsi = *rsi_series(&closes, params.rsi_period).last()?;
    let atr = *atr_series(bars, params.atr_period).last()?;

    let histogram = macd.histogram[last_idx];
    let finite_hist: Vec<f64> = macd.histogram.iter().copied().filter(|h| h.is_finite()).collect();
    let hist_start = finite_hist.len().saturating_sub(params.histogram_window.max(2));
    let histogram_history = finite_hist[hist_start..].to_vec();

    let mut histogram_run = 0;
    if let Some(dir) = Direction::from_sign(histogram) {
        for h in macd.histogram.iter().rev() {
            if Direction::from_sign(*h) == Some(dir) {
                histogram_run += 1;
            } else {
                break;
            }
        }
    }
    let run_started_at = bars[last_idx + 1 - histogram_run.max(1)].open_time;

    let vol_start = bars.len().saturating_sub(params.volume_window.max(1));
    let volumes: Vec<f64> = bars[vol_start..].iter().map(|b| b.volume).collect();
    let volume_percentile = percentile_rank(bars[last_idx].volume, &volumes);

    let prior = &bars[last_idx - params.breakout_lookback..last_idx];
    let range_high = prior.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let range_low = prior.iter().map(|b| b.low).fold(f64::MAX, f64::min);

    let base = closes[last_idx - params.rs_lookback];
    let change = if base > 0.0 { closes[last_idx] / base - 1.0 } else { f64::NAN };

    let snapshot = IndicatorSnapshot {
        last: bars[last_idx],
        ema_fast,
        ema_slow,
        ema_trend,
        macd: macd.line[last_idx],
        macd_signal: macd.signal[last_idx],
        histogram,
        prev_macd: macd.line[last_idx - 1],
        prev_macd_signal: macd.signal[last_idx - 1],
        histogram_history,
        histogram_run,
        run_started_at,
        rsi,
        atr,
        volume_percentile,
        range_high,
        range_low,
        change,
    };

    let readings = [
        snapshot.ema_fast,
        snapshot.ema_slow,
        snapshot.ema_trend,
        snapshot.macd,
        snapshot.macd_signal,
        snapshot.histogram,
        snapshot.prev_macd,
        snapshot.prev_macd_signal,
        snapshot.rsi,
        snapshot.atr,
        snapshot.change,
    ];
    if readings.iter().all(|v| v.is_finite()) {
        Some(snapshot)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
