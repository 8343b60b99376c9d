use async_trait::async_trait;

use crate::{Alert, NotificationChannel, NotificationError};

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Sends alerts as Markdown messages through a Telegram bot.
pub struct TelegramNotifier {
    token: String,
    chat_id: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(token: &str, chat_id: &str) -> Result<Self, NotificationError> {
        if token.trim().is_empty() {
            return Err(NotificationError::Config("TELEGRAM_BOT_TOKEN is empty".into()));
        }
        if chat_id.trim().is_empty() {
            return Err(NotificationError::Config("TELEGRAM_CHAT_ID is empty".into()));
        }
        Ok(Self {
            token: token.to_string(),
            chat_id: chat_id.to_string(),
            client: reqwest::Client::new(),
        })
    }

    fn payload(&self, alert: &Alert) -> serde_json::Value {
        serde_json::json!({
            "chat_id": self.chat_id,
            "text": format!("*{}*\n{}", alert.title, alert.message),
            "parse_mode": "Markdown",
            "disable_web_page_preview": true,
        })
    }
}

#[async_trait]
impl NotificationChannel for TelegramNotifier {
    async fn send(&self, alert: &Alert) -> Result<(), NotificationError> {
        let url = format!("{}/bot{}/sendMessage", TELEGRAM_API, self.token);
        let response = self
            .client
            .post(&url)
            .json(&self.payload(alert))
            .send()
            .await
            .map_err(|e| NotificationError::Telegram(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotificationError::Telegram(format!(
                "HTTP {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "telegram"
    }
}
