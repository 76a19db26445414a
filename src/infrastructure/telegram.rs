//! Telegram status notifier.

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::domain::error::{AppError, Result};
use crate::infrastructure::config::TelegramConfig;

/// Operator-channel delivery of the run status message.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> Result<()>;
}

pub struct TelegramNotifier {
    http: reqwest::Client,
    config: TelegramConfig,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        info!("Sending status notification");
        let url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.config.bot_token
        );
        let response = self
            .http
            .post(&url)
            .json(&message_payload(self.config.chat_id, message))
            .send()
            .await
            .map_err(|e| AppError::Delivery(format!("notification request failed: {}", e)))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Delivery(format!(
                "notifier rejected message ({}): {}",
                status, text
            )));
        }
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::Delivery(format!("notifier response unreadable: {}", e)))?;
        if !json["ok"].as_bool().unwrap_or(false) {
            return Err(AppError::Delivery(format!(
                "notifier reported failure: {}",
                json["description"]
            )));
        }
        Ok(())
    }
}

fn message_payload(chat_id: i64, message: &str) -> serde_json::Value {
    json!({
        "chat_id": chat_id,
        "text": message,
        "parse_mode": "HTML",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_payload_uses_html_parse_mode() {
        let payload = message_payload(-100200300, "<b>report.csv</b>");
        assert_eq!(payload["chat_id"], -100200300);
        assert_eq!(payload["parse_mode"], "HTML");
        assert_eq!(payload["text"], "<b>report.csv</b>");
    }
}
