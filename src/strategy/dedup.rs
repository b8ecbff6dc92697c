//! Signal deduplicator.
//!
//! One record per `symbol_direction`. A candidate is a duplicate while its
//! trigger signature matches the record and the record has not expired.
//! Records reset on position close, on a new cross, when the trigger is no
//! longer active, and after a TTL.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use crate::types::{Direction, TriggerSignature};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Records older than this are dropped regardless of trigger state.
    pub ttl_hours: i64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { ttl_hours: 24 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupRecord {
    pub symbol: String,
    pub direction: Direction,
    pub last_trigger: TriggerSignature,
    pub recorded_at: DateTime<Utc>,
}

/// Persisted with the portfolio snapshot. `BTreeMap` keeps the JSON stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalDeduplicator {
    records: BTreeMap<String, DedupRecord>,
}

impl SignalDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[cfg(test)]
    pub fn records(&self) -> impl Iterator<Item = &DedupRecord> {
        self.records.values()
    }

    /// False when the same trigger was already alerted and is still live.
    pub fn accept(&self, trigger: &TriggerSignature, now: DateTime<Utc>, ttl: Duration) -> bool {
        match self.records.get(&trigger.key()) {
            Some(rec) => rec.last_trigger != *trigger || now - rec.recorded_at >= ttl,
            None => true,
        }
    }

    /// Record an alerted trigger, replacing any earlier cross for the key.
    pub fn record(&mut self, trigger: &TriggerSignature, now: DateTime<Utc>) {
        self.records.insert(
            trigger.key(),
            DedupRecord {
                symbol: trigger.symbol.clone(),
                direction: trigger.direction,
                last_trigger: trigger.clone(),
                recorded_at: now,
            },
        );
    }

    /// Drop both directions for a symbol (its position closed).
    pub fn reset_symbol(&mut self, symbol: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| r.symbol != symbol);
        before - self.records.len()
    }

    /// Drop records for evaluated symbols whose trigger is no longer active.
    /// Symbols not evaluated this cycle (fetch failures) are left alone.
    pub fn prune_inactive(&mut self, evaluated: &HashSet<String>, active: &HashSet<String>) -> usize {
        let before = self.records.len();
        self.records.retain(|key, r| {
            let keep = !evaluated.contains(&r.symbol) || active.contains(key);
            if !keep {
                debug!(key = %key, "Dedup record pruned: trigger inactive");
            }
            keep
        });
        before - self.records.len()
    }

    pub fn expire(&mut self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| now - r.recorded_at < ttl);
        before - self.records.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
