//! Persistence layer.
//!
//! One JSON document holds the portfolio, dedup records, counters, mode and
//! chat id. Writes go to `<path>.tmp`, are fsynced, then renamed over the
//! live file, so a crash mid-write leaves the last good snapshot intact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::strategy::dedup::SignalDeduplicator;
use crate::types::{BotMode, Counters, Portfolio, SwingError};

pub const SNAPSHOT_VERSION: u32 = 1;

/// Everything that survives a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub portfolio: Portfolio,
    pub dedup: SignalDeduplicator,
    pub counters: Counters,
    pub mode: BotMode,
    pub chat_id: Option<i64>,
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Atomically replace the snapshot at `path`.
pub fn save_snapshot(snapshot: &Snapshot, path: &Path) -> Result<(), SwingError> {
    let persist = |what: &str, e: std::io::Error| {
        SwingError::Persistence(format!("{what} {}: {e}", path.display()))
    };

    let json = serde_json::to_vec_pretty(snapshot)
        .map_err(|e| SwingError::Persistence(format!("serialise snapshot: {e}")))?;

    let tmp = tmp_path(path);
    {
        let mut file = File::create(&tmp).map_err(|e| persist("create temp for", e))?;
        file.write_all(&json).map_err(|e| persist("write temp for", e))?;
        file.sync_all().map_err(|e| persist("fsync temp for", e))?;
    }
    fs::rename(&tmp, path).map_err(|e| persist("rename onto", e))?;

    // Make the rename itself durable
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if let Ok(d) = File::open(dir) {
            let _ = d.sync_all();
        }
    }

    debug!(
        path = %path.display(),
        equity = %snapshot.portfolio.equity,
        positions = snapshot.portfolio.positions.len(),
        "Snapshot saved"
    );
    Ok(())
}

/// Load the snapshot. `Ok(None)` when no file exists (cold start).
/// Unreadable, unparseable or inconsistent files are `CorruptState`.
pub fn load_snapshot(path: &Path, max_positions: usize) -> Result<Option<Snapshot>, SwingError> {
    if !path.exists() {
        info!(path = %path.display(), "No saved state found, starting fresh");
        return Ok(None);
    }

    let json = fs::read_to_string(path)
        .map_err(|e| SwingError::CorruptState(format!("read {}: {e}", path.display())))?;
    let snapshot: Snapshot = serde_json::from_str(&json)
        .map_err(|e| SwingError::CorruptState(format!("parse {}: {e}", path.display())))?;

    if snapshot.version != SNAPSHOT_VERSION {
        return Err(SwingError::CorruptState(format!(
            "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
            snapshot.version
        )));
    }
    snapshot
        .portfolio
        .check_invariants(max_positions)
        .map_err(SwingError::CorruptState)?;

    info!(
        path = %path.display(),
        equity = %snapshot.portfolio.equity,
        positions = snapshot.portfolio.positions.len(),
        closed = snapshot.portfolio.closed_trades.len(),
        mode = ?snapshot.mode,
        "State loaded from disk"
    );
    Ok(Some(snapshot))
}

/// Delete the state file (for testing or reset).
pub fn delete_snapshot(path: &Path) -> std::io::Result<()> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
