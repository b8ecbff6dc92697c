//! Chat command interface.
//!
//! Commands arrive as `/name[@bot] [args]`. Each one maps onto a ledger
//! read or mutation (or a scan) and produces the reply text. The poll loop
//! owns the Telegram transport; `CommandHandler` is transport-free so it
//! can be driven directly in tests.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::alerts::{self, telegram::TelegramClient};
use crate::config::AppConfig;
use crate::engine::ledger::Ledger;
use crate::engine::scanner::ScanOrchestrator;
use crate::types::{BotMode, SwingError};

/// Gives the reply time to leave before the service goes down.
const RESTART_DELAY: Duration = Duration::from_secs(2);

/// Back-off after a failed `getUpdates`.
const POLL_ERROR_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Status,
    Scan,
    Afk,
    Ready,
    Restart,
    Help,
}

impl Command {
    /// Parse `/status`, `/status@swing_bot`, `/STATUS extra args`.
    /// Text that is not a slash command yields `None`.
    pub fn parse(text: &str) -> Option<Result<Self, String>> {
        let word = text.split_whitespace().next()?;
        let name = word.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or(name).to_lowercase();
        let cmd = match name.as_str() {
            "start" => Command::Start,
            "status" => Command::Status,
            "scan" => Command::Scan,
            "afk" | "pause" => Command::Afk,
            "ready" | "resume" => Command::Ready,
            "restart" => Command::Restart,
            "help" => Command::Help,
            _ => return Some(Err(name)),
        };
        Some(Ok(cmd))
    }
}

pub struct CommandHandler {
    ledger: Arc<Ledger>,
    scanner: Arc<ScanOrchestrator>,
    cfg: Arc<AppConfig>,
}

impl CommandHandler {
    pub fn new(ledger: Arc<Ledger>, scanner: Arc<ScanOrchestrator>, cfg: Arc<AppConfig>) -> Self {
        Self {
            ledger,
            scanner,
            cfg,
        }
    }

    /// Whether a message from `chat_id` should be served. Until a chat is
    /// registered, anyone may talk to the bot; after that only that chat.
    pub async fn accepts(&self, chat_id: i64) -> bool {
        match self.ledger.chat_id().await {
            Some(registered) => registered == chat_id,
            None => true,
        }
    }

    /// Execute one command and return the reply.
    pub async fn handle(
        &self,
        cmd: Command,
        chat_id: i64,
        now: DateTime<Utc>,
    ) -> Result<String, SwingError> {
        if cmd == Command::Start || self.ledger.chat_id().await.is_none() {
            self.ledger.register_chat(chat_id).await?;
            info!(chat_id, "Chat registered for alerts");
        }

        let reply = match cmd {
            Command::Start => format!(
                "👋 {} online. This chat will receive alerts.\nMode: {}\n\nSend /help for commands.",
                self.cfg.agent.name,
                self.ledger.mode().await
            ),
            Command::Help => alerts::help_text().to_string(),
            Command::Status => {
                let snapshot = self.ledger.snapshot().await;
                alerts::format_status(&snapshot, self.cfg.risk.max_positions)
            }
            Command::Scan => {
                let report = self.scanner.run_cycle(now).await?;
                alerts::format_scan_summary(&report)
            }
            Command::Afk => {
                let previous = self.ledger.set_mode(BotMode::Paused).await?;
                if previous != BotMode::Paused {
                    info!("Entries paused");
                }
                let levels = self.scanner.safety_levels(&HashMap::new()).await;
                alerts::format_safety_levels(&levels)
            }
            Command::Ready => {
                let previous = self.ledger.set_mode(BotMode::Active).await?;
                if previous == BotMode::Active {
                    "🟢 Already READY. Scanning for entries.".to_string()
                } else {
                    info!("Entries resumed");
                    "🟢 READY. Entries resumed; next scan will open positions.".to_string()
                }
            }
            Command::Restart => self.restart(),
        };
        Ok(reply)
    }

    /// Spawn the configured restart command after a short delay.
    fn restart(&self) -> String {
        let Some((program, args)) = self.cfg.process.restart_command.split_first() else {
            return "⚠️ No restart command configured.".to_string();
        };
        let program = program.clone();
        let args = args.to_vec();
        warn!(program = %program, ?args, "Restart requested");

        tokio::spawn(async move {
            tokio::time::sleep(RESTART_DELAY).await;
            match tokio::process::Command::new(&program).args(&args).spawn() {
                Ok(mut child) => {
                    if let Err(e) = child.wait().await {
                        error!(error = %e, "Restart command failed");
                    }
                }
                Err(e) => error!(program = %program, error = %e, "Failed to spawn restart command"),
            }
        });
        "♻️ Restarting. State is saved; back in a moment.".to_string()
    }
}

// ---------------------------------------------------------------------------
// Poll loop
// ---------------------------------------------------------------------------

/// Long-poll Telegram for commands until `shutdown` flips. Returns an error
/// only when a command hit a fatal ledger failure.
pub async fn run_command_loop(
    telegram: Arc<TelegramClient>,
    handler: Arc<CommandHandler>,
    poll_timeout_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), SwingError> {
    let mut offset = 0i64;
    info!("Command loop started");

    loop {
        let messages = tokio::select! {
            res = telegram.poll(offset, poll_timeout_secs) => res,
            _ = shutdown.changed() => break,
        };

        let messages = match messages {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "Telegram poll failed");
                tokio::time::sleep(POLL_ERROR_DELAY).await;
                continue;
            }
        };

        for msg in messages {
            offset = offset.max(msg.update_id + 1);

            let cmd = match Command::parse(&msg.text) {
                None => continue,
                Some(Err(name)) => {
                    let _ = telegram
                        .send_to(msg.chat_id, &format!("Unknown command /{name}. Send /help."))
                        .await;
                    continue;
                }
                Some(Ok(cmd)) => cmd,
            };
            if !handler.accepts(msg.chat_id).await {
                warn!(chat_id = msg.chat_id, ?cmd, "Command from unregistered chat ignored");
                continue;
            }
            info!(chat_id = msg.chat_id, ?cmd, "Command received");

            let reply = match handler.handle(cmd, msg.chat_id, Utc::now()).await {
                Ok(text) => {
                    telegram.set_chat_id(msg.chat_id);
                    text
                }
                Err(e) if e.is_fatal() => {
                    let _ = telegram.send_to(msg.chat_id, &format!("🛑 Fatal: {e}")).await;
                    return Err(e);
                }
                Err(e) => format!("⚠️ {e}"),
            };
            if let Err(e) = telegram.send_to(msg.chat_id, &reply).await {
                warn!(error = %e, "Failed to send command reply");
            }
        }
    }

    info!("Command loop stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
