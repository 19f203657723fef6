//! Outbound notification of generated prep packs.

use crate::error::OrchestrationError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::info;

/// Telegram rejects messages longer than this many characters.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

const TRUNCATION_NOTE: &str = "\n\n_[Report truncated - view full version in web app]_";

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_prep_pack(&self, client_name: &str, report_markdown: &str) -> Result<()>;
}

pub struct TelegramNotifier {
    client: Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| OrchestrationError::Notification(e.to_string()))?;

        Ok(Self {
            client,
            bot_token,
            chat_id,
        })
    }

    /// Both settings are required; otherwise notifications stay off.
    pub fn from_settings(bot_token: Option<&str>, chat_id: Option<&str>) -> Option<Result<Self>> {
        match (bot_token, chat_id) {
            (Some(token), Some(chat)) => Some(Self::new(token.to_string(), chat.to_string())),
            _ => None,
        }
    }
}

/// Header plus as much of the report as fits in one Telegram message.
pub fn format_prep_pack_message(client_name: &str, report_markdown: &str) -> String {
    let header = format!(
        "📊 *Prep Pack Generated*\n\n*Client:* {}\n━━━━━━━━━━━━━━━━━━━━\n\n",
        client_name
    );

    let budget = TELEGRAM_MESSAGE_LIMIT
        .saturating_sub(header.chars().count())
        .saturating_sub(TRUNCATION_NOTE.chars().count());

    if report_markdown.chars().count() <= budget {
        return format!("{}{}", header, report_markdown);
    }

    let content: String = report_markdown.chars().take(budget).collect();
    format!("{}{}{}", header, content, TRUNCATION_NOTE)
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_prep_pack(&self, client_name: &str, report_markdown: &str) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let body = json!({
            "chat_id": self.chat_id,
            "text": format_prep_pack_message(client_name, report_markdown),
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| OrchestrationError::Notification(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(OrchestrationError::Notification(format!(
                "Telegram API error {}: {}",
                status, text
            )));
        }

        info!(client = %client_name, "Telegram notification sent");
        Ok(())
    }
}
