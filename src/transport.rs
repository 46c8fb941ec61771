// src/transport.rs
//! Telegram Bot API client and the transport seam used by the dispatcher.
//!
//! Send failures are classified at this boundary: a blocked or deleted
//! chat is permanent (`Unreachable`), everything else is retryable in a
//! later cycle (`Transient`).

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

use crate::types::RecipientId;

#[derive(Debug, Clone, Error)]
pub enum SendError {
    #[error("recipient unreachable: {0}")]
    Unreachable(String),
    #[error("transient send failure: {0}")]
    Transient(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, recipient: RecipientId, text: &str) -> Result<(), SendError>;
}

// --- Telegram API types ---

#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
}

pub struct TelegramApi {
    http: reqwest::Client,
    token: String,
    base: String,
}

impl TelegramApi {
    pub fn new(token: String) -> Self {
        Self::with_base(token, "https://api.telegram.org".to_string())
    }

    /// Custom API base, used by tests against a local stub server.
    pub fn with_base(token: String, base: String) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("market-digest-bot/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(40))
            .build()
            .expect("reqwest client");
        Self { http, token, base }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base, self.token, method)
    }

    pub async fn get_me(&self) -> Result<TelegramUser> {
        let resp = self
            .http
            .get(self.url("getMe"))
            .send()
            .await
            .context("getMe request")?;
        let body: ApiResponse<TelegramUser> = resp.json().await.context("getMe body")?;
        body.result
            .ok_or_else(|| anyhow!("getMe failed: {}", body.description.unwrap_or_default()))
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<TelegramUpdate>> {
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
            .context("getUpdates request")?;
        let body: ApiResponse<Vec<TelegramUpdate>> =
            resp.json().await.context("getUpdates body")?;
        if !body.ok {
            return Err(anyhow!(
                "getUpdates failed: {}",
                body.description.unwrap_or_default()
            ));
        }
        Ok(body.result.unwrap_or_default())
    }

    /// Send one message and classify the outcome.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), SendError> {
        let payload = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });

        let resp = self
            .http
            .post(self.url("sendMessage"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| SendError::Transient(format!("sendMessage: {e}")))?;

        let status = resp.status();
        let body: ApiResponse<serde_json::Value> = resp
            .json()
            .await
            .map_err(|e| SendError::Transient(format!("sendMessage body: {e}")))?;

        if body.ok {
            return Ok(());
        }

        let description = body.description.unwrap_or_else(|| status.to_string());
        if is_unreachable(status.as_u16(), &description) {
            Err(SendError::Unreachable(description))
        } else {
            Err(SendError::Transient(description))
        }
    }
}

/// Permanent recipient-side failures per the Bot API: the recipient
/// blocked the bot, deactivated their account, or the chat is gone.
fn is_unreachable(status: u16, description: &str) -> bool {
    if status == 403 {
        return true;
    }
    let d = description.to_ascii_lowercase();
    d.contains("blocked") || d.contains("deactivated") || d.contains("chat not found")
}

pub struct TelegramTransport {
    api: Arc<TelegramApi>,
}

impl TelegramTransport {
    pub fn new(api: Arc<TelegramApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send(&self, recipient: RecipientId, text: &str) -> Result<(), SendError> {
        self.api.send_message(recipient, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_status_is_unreachable() {
        assert!(is_unreachable(403, "Forbidden: bot was blocked by the user"));
        assert!(is_unreachable(400, "Bad Request: chat not found"));
        assert!(is_unreachable(403, "Forbidden: user is deactivated"));
    }

    #[test]
    fn rate_and_server_errors_are_transient() {
        assert!(!is_unreachable(429, "Too Many Requests: retry after 5"));
        assert!(!is_unreachable(500, "Internal Server Error"));
        assert!(!is_unreachable(400, "Bad Request: message is too long"));
    }
}
