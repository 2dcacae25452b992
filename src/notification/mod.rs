//! Notification - Outbound alert transports
//!
//! ## Responsibilities
//!
//! - `NotificationTransport` seam used by the alert workers
//! - Telegram Bot API transport
//! - Log-only transport when no credentials are configured

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Delivers one text message. Failures are reported, never retried here.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    /// Send to `chat_id`, or to the configured operator chat when `None`
    async fn send(&self, chat_id: Option<&str>, message: &str) -> Result<()>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Telegram Bot API client
pub struct TelegramTransport {
    client: reqwest::Client,
    base_url: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramTransport {
    pub fn new(bot_token: String, chat_id: String) -> Result<Self> {
        Self::with_base_url("https://api.telegram.org".to_string(), bot_token, chat_id)
    }

    /// Point at a different API host (local bot API server)
    pub fn with_base_url(base_url: String, bot_token: String, chat_id: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url,
            bot_token,
            chat_id,
        })
    }
}

#[async_trait]
impl NotificationTransport for TelegramTransport {
    async fn send(&self, chat_id: Option<&str>, message: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.bot_token);
        let body = SendMessageRequest {
            chat_id: chat_id.unwrap_or(&self.chat_id),
            text: message,
        };

        let resp = self.client.post(&url).json(&body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Notification(format!(
                "Telegram sendMessage failed: {} - {}",
                status, text
            )));
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}

/// Writes messages to the log instead of sending them
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl NotificationTransport for LogTransport {
    async fn send(&self, chat_id: Option<&str>, message: &str) -> Result<()> {
        tracing::info!(
            chat_id = chat_id.unwrap_or("operator"),
            message = message,
            "Notification (log only)"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_transport_always_succeeds() {
        let transport = LogTransport;
        assert!(transport.send(None, "hello").await.is_ok());
        assert!(transport.send(Some("5550101"), "hello").await.is_ok());
        assert_eq!(transport.name(), "log");
    }

    #[tokio::test]
    async fn test_telegram_unreachable_host_is_error() {
        let transport = TelegramTransport::with_base_url(
            "http://127.0.0.1:1".to_string(),
            "token".to_string(),
            "42".to_string(),
        )
        .unwrap();
        assert!(transport.send(None, "hello").await.is_err());
    }
}
