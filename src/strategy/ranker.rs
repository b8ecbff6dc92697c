//! Candidate ranker.
//!
//! Filters same-cycle candidates by the acceptance threshold and orders
//! them: stronger direction-signed relative strength first, then the
//! configured priority list, then universe order.

use std::cmp::Ordering;

use crate::types::{Candidate, RejectReason};

/// Accepted candidates in admission order, plus those below threshold.
#[derive(Debug, Clone, Default)]
pub struct Ranked {
    pub ordered: Vec<Candidate>,
    pub below_threshold: Vec<(Candidate, RejectReason)>,
}

fn index_of(list: &[String], symbol: &str) -> usize {
    list.iter().position(|s| s == symbol).unwrap_or(usize::MAX)
}

pub fn rank(
    candidates: Vec<Candidate>,
    threshold: f64,
    priority: &[String],
    universe: &[String],
) -> Ranked {
    let (mut ordered, below): (Vec<_>, Vec<_>) =
        candidates.into_iter().partition(|c| c.score >= threshold);

    // Stable: exact ties keep arrival order
    ordered.sort_by(|a, b| {
        b.relative_strength
            .partial_cmp(&a.relative_strength)
            .unwrap_or(Ordering::Equal)
            .then_with(|| index_of(priority, &a.symbol).cmp(&index_of(priority, &b.symbol)))
            .then_with(|| index_of(universe, &a.symbol).cmp(&index_of(universe, &b.symbol)))
    });

    Ranked {
        ordered,
        below_threshold: below
            .into_iter()
            .map(|c| (c, RejectReason::BelowThreshold))
            .collect(),
    }
}
