//! Telegram Bot API transport.
//!
//! Outbound: `sendMessage` to the registered chat. Inbound: `getUpdates`
//! long polling, yielding text messages for the command loop. The bot
//! token stays inside `SecretString` and is never logged.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, warn};

use super::Notifier;

const BASE_URL: &str = "https://api.telegram.org";

/// Telegram caps a message at 4096 UTF-16 units; stay well below.
const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

/// A text message received from a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub update_id: i64,
    pub chat_id: i64,
    pub text: String,
}

pub struct TelegramClient {
    http: Client,
    token: SecretString,
    chat_id: RwLock<Option<i64>>,
}

impl TelegramClient {
    pub fn new(token: SecretString, chat_id: Option<i64>, poll_timeout_secs: u64) -> Result<Self> {
        // HTTP timeout must outlast the long-poll window
        let http = Client::builder()
            .timeout(Duration::from_secs(poll_timeout_secs + 10))
            .user_agent("SWINGWATCH/0.1.0 (swing-signal-scanner)")
            .build()
            .context("Failed to build HTTP client for Telegram")?;

        Ok(Self {
            http,
            token,
            chat_id: RwLock::new(chat_id),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{BASE_URL}/bot{}/{method}", self.token.expose_secret())
    }

    pub fn set_chat_id(&self, chat_id: i64) {
        if let Ok(mut guard) = self.chat_id.write() {
            *guard = Some(chat_id);
        }
    }

    pub fn chat_id(&self) -> Option<i64> {
        self.chat_id.read().ok().and_then(|g| *g)
    }

    /// Send `text` to a specific chat, splitting long messages.
    pub async fn send_to(&self, chat_id: i64, text: &str) -> Result<()> {
        for chunk in split_message(text, MAX_MESSAGE_CHARS) {
            let resp = self
                .http
                .post(self.url("sendMessage"))
                .json(&json!({
                    "chat_id": chat_id,
                    "text": chunk,
                    "disable_web_page_preview": true,
                }))
                .send()
                .await
                .context("Telegram sendMessage request failed")?;

            let status = resp.status();
            let body: ApiResponse<serde_json::Value> = resp
                .json()
                .await
                .context("Failed to parse Telegram sendMessage response")?;
            if !status.is_success() || !body.ok {
                anyhow::bail!(
                    "Telegram sendMessage error {status}: {}",
                    body.description.unwrap_or_default()
                );
            }
        }
        debug!(chat_id, chars = text.len(), "Telegram message sent");
        Ok(())
    }

    /// Long-poll for new messages after `offset`.
    pub async fn poll(&self, offset: i64, timeout_secs: u64) -> Result<Vec<IncomingMessage>> {
        let resp = self
            .http
            .get(self.url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", timeout_secs.to_string()),
                ("allowed_updates", "[\"message\"]".to_string()),
            ])
            .send()
            .await
            .context("Telegram getUpdates request failed")?;

        let body: ApiResponse<Vec<Update>> = resp
            .json()
            .await
            .context("Failed to parse Telegram getUpdates response")?;
        if !body.ok {
            anyhow::bail!(
                "Telegram getUpdates error: {}",
                body.description.unwrap_or_default()
            );
        }
        Ok(parse_updates(body.result.unwrap_or_default()))
    }
}

fn parse_updates(updates: Vec<Update>) -> Vec<IncomingMessage> {
    updates
        .into_iter()
        .filter_map(|u| {
            let message = u.message?;
            Some(IncomingMessage {
                update_id: u.update_id,
                chat_id: message.chat.id,
                text: message.text?,
            })
        })
        .collect()
}

/// Split on line boundaries into chunks of at most `max` chars.
fn split_message(text: &str, max: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if !current.is_empty() && current.chars().count() + line.chars().count() + 1 > max {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[async_trait]
impl Notifier for TelegramClient {
    async fn send(&self, text: &str) -> Result<()> {
        match self.chat_id() {
            Some(chat_id) => self.send_to(chat_id, text).await,
            None => {
                warn!("No Telegram chat registered yet (send /start), alert dropped");
                Ok(())
            }
        }
    }
}
