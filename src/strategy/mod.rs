//! Strategy engine: indicators → scoring → ranking, plus risk levels and
//! signal deduplication.

pub mod dedup;
pub mod indicators;
pub mod ranker;
pub mod risk;
pub mod scoring;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::types::{Candidate, Candle, SwingError};
use indicators::{compute_snapshot, IndicatorParams, IndicatorSnapshot};
use scoring::ScoringConfig;

/// Indicator snapshot or a per-symbol `DataUnavailable`.
pub fn snapshot_or_skip(
    symbol: &str,
    closed_bars: &[Candle],
    params: &IndicatorParams,
    label: &str,
) -> Result<IndicatorSnapshot, SwingError> {
    compute_snapshot(closed_bars, params).ok_or_else(|| SwingError::DataUnavailable {
        symbol: symbol.to_string(),
        reason: format!(
            "{label}: {} closed bars, need {} with finite readings",
            closed_bars.len(),
            params.min_bars
        ),
    })
}

/// Score one symbol from closed 4H and 1H bars.
///
/// `Ok(None)` means the data was fine but there is no setup.
pub fn evaluate_symbol(
    symbol: &str,
    h4_bars: &[Candle],
    h1_bars: &[Candle],
    reference_change: f64,
    params: &IndicatorParams,
    cfg: &ScoringConfig,
    now: DateTime<Utc>,
) -> Result<Option<Candidate>, SwingError> {
    let h4 = snapshot_or_skip(symbol, h4_bars, params, "4h")?;
    let h1 = snapshot_or_skip(symbol, h1_bars, params, "1h")?;

    let candidate = scoring::evaluate(symbol, &h4, &h1, reference_change, cfg, now);
    if candidate.is_none() {
        debug!(symbol, regime = ?scoring::regime(&h4), "No setup");
    }
    Ok(candidate)
}
