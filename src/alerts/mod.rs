//! Alerts.
//!
//! The `Notifier` trait is the outbound half of the messaging channel.
//! Message bodies are built here so every transport sends identical text.
//!
//! Hierarchy, by leading marker:
//! - 🚨 ACTION REQUIRED: new entries and full closes
//! - ⚡ UPDATE: TP1 partials and stop moves
//! - ℹ️ INFO: status, heartbeat, scan summaries

pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::fmt::Write as _;
use tracing::info;

use crate::engine::ledger::BreakevenArmed;
use crate::engine::scanner::ScanReport;
use crate::engine::supervisor::SupervisorReport;
use crate::storage::Snapshot;
use crate::strategy::risk::SafetyLevels;
use crate::strategy::scoring::{CLEANLINESS_MAX, CONTEXT_MAX, MOMENTUM_MAX, STRUCTURE_MAX};
use crate::types::{fmt_price, BotMode, Candidate, ClosedTrade, ExitReason, Position};

/// Outbound message sink.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;
}

/// Writes alerts to the log; used when no chat transport is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        info!(alert = %text, "Alert");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Building blocks
// ---------------------------------------------------------------------------

pub fn score_label(score: f64) -> &'static str {
    if score >= 80.0 {
        "🔥 Very Strong"
    } else if score >= 60.0 {
        "💪 Strong"
    } else if score >= 40.0 {
        "📊 Moderate"
    } else if score >= 20.0 {
        "⚠️ Weak"
    } else {
        "❄️ Very Weak"
    }
}

/// `███████░░░` for `value` out of `max`.
pub fn bar(value: f64, max: f64, width: usize) -> String {
    let ratio = if max > 0.0 { (value / max).clamp(0.0, 1.0) } else { 0.0 };
    let filled = (ratio * width as f64).round() as usize;
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
}

fn signed_pct(x: f64) -> String {
    format!("{:+.1}%", x * 100.0)
}

fn money(x: Decimal) -> String {
    format!("${:.2}", x)
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

pub fn format_signal(candidate: &Candidate, position: &Position) -> String {
    let p = &candidate.pillars;
    format!(
        "🚨 ACTION REQUIRED: {dir} Signal 🚨\n\
         Symbol: {sym} [{path}]\n\
         Score: {score:.0}/100 ({label})\n\
         \x20 Momentum    {mb} {m:.1}/40\n\
         \x20 Structure   {sb} {s:.1}/25\n\
         \x20 Cleanliness {cb} {c:.1}/20\n\
         \x20 Context     {xb} {x:.1}/15\n\
         vs reference: {rs}\n\
         Entry Price: {entry}\n\
         Stop Loss: {stop}\n\
         TP1 (1.5R): {tp1}\n\
         Order Size: {size}",
        dir = candidate.direction,
        sym = candidate.symbol,
        path = candidate.path,
        score = candidate.score,
        label = score_label(candidate.score),
        mb = bar(p.momentum, MOMENTUM_MAX, 10),
        m = p.momentum,
        sb = bar(p.structure, STRUCTURE_MAX, 10),
        s = p.structure,
        cb = bar(p.cleanliness, CLEANLINESS_MAX, 10),
        c = p.cleanliness,
        xb = bar(p.context, CONTEXT_MAX, 10),
        x = p.context,
        rs = signed_pct(candidate.relative_strength),
        entry = fmt_price(position.entry_price),
        stop = fmt_price(position.stop_loss),
        tp1 = fmt_price(position.take_profit1),
        size = money(position.size),
    )
}

pub fn format_breakeven(armed: &BreakevenArmed) -> String {
    format!(
        "⚡ UPDATE: TP1 Hit for {sym}!\n\
         Filled: {price}\n\
         Realized: {pnl} on {part}\n\
         Stop moved to break-even: {stop}\n\
         Remaining: {rest}",
        sym = armed.position.symbol,
        price = fmt_price(armed.partial.exit_price),
        pnl = money(armed.partial.pnl),
        part = money(armed.partial.size),
        stop = fmt_price(armed.position.stop_loss),
        rest = money(armed.position.size),
    )
}

pub fn format_exit(trade: &ClosedTrade) -> String {
    let headline = match trade.reason {
        ExitReason::StopLoss => "SL Breach",
        ExitReason::BreakevenStop => "Break-even Stop",
        ExitReason::ReverseCross | ExitReason::MomentumFade => "Momentum Exit",
        ExitReason::TakeProfit1 => "TP1 Partial",
    };
    let sign = if trade.pnl >= Decimal::ZERO { "+" } else { "" };
    format!(
        "🚨 ACTION REQUIRED: {headline} for {sym} ({dir})\n\
         Reason: {reason}\n\
         Entry: {entry} → Exit: {exit}\n\
         PnL: {sign}{pnl}\n\
         Close remaining position.",
        sym = trade.symbol,
        dir = trade.direction,
        reason = trade.reason,
        entry = fmt_price(trade.entry_price),
        exit = fmt_price(trade.exit_price),
        pnl = money(trade.pnl),
    )
}

pub fn format_safety_levels(levels: &[SafetyLevels]) -> String {
    let mut msg = String::from("😴 AFK Mode Active. Signals paused.\n");
    if levels.is_empty() {
        msg.push_str("No open positions.");
        return msg;
    }
    msg.push_str("\nSafety levels for open positions:\n");
    for l in levels {
        let _ = write!(
            msg,
            "\n- {} ({}) @ {}\n  Safety SL: {}\n  Moon-shot TP: {}\n",
            l.symbol,
            l.direction,
            fmt_price(l.price),
            fmt_price(l.stop),
            fmt_price(l.target),
        );
    }
    msg
}

pub fn format_status(snapshot: &Snapshot, max_positions: usize) -> String {
    let pf = &snapshot.portfolio;
    let c = &snapshot.counters;
    let mut msg = format!(
        "📊 Portfolio Status [{mode}]\n\
         Total Equity: {equity}\n\
         Available Cash: {cash}\n\
         Tied in Assets: {tied}\n\
         Open Positions: {open}/{max_positions}\n\
         Realized PnL: {pnl} | Win rate: {wr:.0}% ({w}W/{l}L)\n",
        mode = snapshot.mode,
        equity = money(pf.equity),
        cash = money(pf.cash_available),
        tied = money(pf.tied_capital()),
        open = pf.positions.len(),
        pnl = money(pf.total_realized_pnl()),
        wr = c.win_rate(),
        w = c.wins,
        l = c.losses,
    );

    if pf.positions.is_empty() {
        msg.push_str("\nNo active positions.");
        return msg;
    }
    msg.push_str("\nActive Positions:\n");
    for p in &pf.positions {
        let tp1 = if p.breakeven_moved { "✅ Hit" } else { "⏳ Pending" };
        let _ = write!(
            msg,
            "- {} ({}) [{}]\n  Entry: {} | SL: {}\n  TP1: {} [{}] | Size: {}\n",
            p.symbol,
            p.direction,
            p.state,
            fmt_price(p.entry_price),
            fmt_price(p.stop_loss),
            fmt_price(p.take_profit1),
            tp1,
            money(p.size),
        );
    }
    msg
}

pub fn format_scan_summary(report: &ScanReport) -> String {
    let when = report.started_at.format("%H:%M UTC");
    let mut msg = if report.candidates.is_empty() {
        format!("✅ Heartbeat: scan ran at {when}, no signals found.\n")
    } else {
        format!(
            "ℹ️ Scan at {when}: {} candidate(s), {} opened.\n",
            report.candidates.len(),
            report.opened.len()
        )
    };

    let _ = write!(
        msg,
        "Evaluated {}/{} symbols",
        report.evaluated,
        report.evaluated + report.skipped.len()
    );
    if !report.skipped.is_empty() {
        let names: Vec<&str> = report.skipped.iter().map(|(s, _)| s.as_str()).collect();
        let _ = write!(msg, " (skipped: {})", names.join(", "));
    }
    msg.push('\n');

    if report.mode == BotMode::Paused {
        msg.push_str("😴 AFK: candidates shown for visibility only.\n");
    }

    for c in &report.candidates {
        let _ = writeln!(
            msg,
            "• {} {} [{}] {:.0} ({}) rs {}",
            c.symbol,
            c.direction,
            c.path,
            c.score,
            score_label(c.score),
            signed_pct(c.relative_strength)
        );
    }

    let counts = report.reject_counts();
    if !counts.is_empty() {
        let parts: Vec<String> = counts.iter().map(|(r, n)| format!("{n} {r}")).collect();
        let _ = writeln!(msg, "Rejected: {}", parts.join(", "));
    }

    if !report.safety_levels.is_empty() {
        msg.push('\n');
        msg.push_str(&format_safety_levels(&report.safety_levels));
    }
    msg.trim_end().to_string()
}

pub fn format_supervisor_failures(report: &SupervisorReport) -> Option<String> {
    if report.skipped.is_empty() {
        return None;
    }
    let mut msg = String::from("ℹ️ Position check incomplete:\n");
    for (symbol, reason) in &report.skipped {
        let _ = writeln!(msg, "- {symbol}: {reason}");
    }
    Some(msg.trim_end().to_string())
}

pub fn help_text() -> &'static str {
    "🦈 SWINGWATCH Swing Assistant\n\n\
     1H/4H swing scanner for USDT pairs. 4H EMA200 sets the regime, 1H EMA20/50 + MACD \
     time the entry, ATR sets the stop, TP1 sits at 1.5R.\n\n\
     Notification hierarchy:\n\
     🚨 ACTION REQUIRED: entries and full closures\n\
     ⚡ UPDATE: TP1 partials and stop moves\n\
     ℹ️ INFO: status and heartbeat\n\n\
     Commands:\n\
     /status - portfolio overview\n\
     /afk - pause entries, get safety SL (4%) and TP (10%) levels\n\
     /ready - resume entries\n\
     /scan - run a market scan now\n\
     /restart - restart the service\n\
     /start - register this chat for alerts\n\
     /help - this message"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
