//! Inbound Telegram channel
//!
//! Long-polls the Bot API and routes banker messages into the conversation
//! service. Each Telegram chat is one conversation session.

use crate::conversation::ConversationService;
use crate::error::OrchestrationError;
use crate::notifier::TELEGRAM_MESSAGE_LIMIT;
use crate::Result;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const SESSION_PREFIX: &str = "telegram_";

/// Seconds Telegram holds a getUpdates call open.
const POLL_TIMEOUT_SECS: u64 = 30;
const RETRY_DELAY: Duration = Duration::from_secs(5);

pub const WELCOME_MESSAGE: &str = "👋 Welcome to your banking copilot!

I can help you with:
✓ Generate prep packs
✓ Create reminders
✓ Log client updates
✓ Submit meeting notes

Example commands:
• \"Prepare a prep pack for SOTUPLAST\"
• \"Create a reminder for ATB-SME-001 about a loan in summer 2026\"
• \"Client sent their financial statements yesterday\"

Simply send your message in natural language.";

pub const HELP_MESSAGE: &str = "📖 User guide

1️⃣ Generate Prep Pack
   Example: \"Prepare a meeting with SOTUPLAST\"

2️⃣ Create Reminder
   Example: \"Remind me to contact ATB-SME-001 about a loan next month\"

3️⃣ Log Client Update
   Example: \"Client SOTUPLAST sent financial documents\"

4️⃣ Submit Notes
   Example: \"Meeting with SOTUPLAST: client agreed to increase credit line\"

Speak naturally, French and English both work.";

pub const ACTION_CONFIRMATION: &str = "✅ Action executed successfully!";

#[derive(Debug, Clone, PartialEq)]
pub struct IncomingText {
    pub update_id: i64,
    pub chat_id: i64,
    pub text: String,
}

pub fn session_id_for(chat_id: i64) -> String {
    format!("{}{}", SESSION_PREFIX, chat_id)
}

/// Text messages in a getUpdates body, plus the offset for the next poll.
/// The offset advances past every update, text or not.
pub fn parse_updates(body: &Value, offset: i64) -> (Vec<IncomingText>, i64) {
    let mut next = offset;
    let mut messages = Vec::new();

    let Some(results) = body.get("result").and_then(Value::as_array) else {
        return (messages, next);
    };

    for update in results {
        let Some(update_id) = update.get("update_id").and_then(Value::as_i64) else {
            continue;
        };
        next = next.max(update_id + 1);

        let Some(message) = update.get("message") else {
            continue;
        };
        let text = message.get("text").and_then(Value::as_str);
        let chat_id = message
            .get("chat")
            .and_then(|chat| chat.get("id"))
            .and_then(Value::as_i64);

        if let (Some(text), Some(chat_id)) = (text, chat_id) {
            messages.push(IncomingText {
                update_id,
                chat_id,
                text: text.to_string(),
            });
        }
    }

    (messages, next)
}

pub struct TelegramBot {
    client: Client,
    bot_token: String,
    conversation: Arc<ConversationService>,
}

impl TelegramBot {
    pub fn new(bot_token: String, conversation: Arc<ConversationService>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .build()?;

        Ok(Self {
            client,
            bot_token,
            conversation,
        })
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{}", self.bot_token, method)
    }

    /// Replies for one incoming text, in sending order. Unknown commands
    /// and blank messages get none.
    pub async fn replies_for(&self, chat_id: i64, text: &str) -> Vec<String> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }

        if let Some(command) = text.strip_prefix('/') {
            let name = command
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .split('@')
                .next()
                .unwrap_or_default();
            return match name {
                "start" => vec![WELCOME_MESSAGE.to_string()],
                "help" => vec![HELP_MESSAGE.to_string()],
                other => {
                    debug!(chat_id, command = other, "Ignoring unknown command");
                    Vec::new()
                }
            };
        }

        let session_id = session_id_for(chat_id);
        match self
            .conversation
            .process_session_message(&session_id, text)
            .await
        {
            Ok(reply) => {
                let executed = reply.result.as_ref().is_some_and(|outcome| outcome.success);
                let mut replies = vec![reply.response];
                if executed {
                    replies.push(ACTION_CONFIRMATION.to_string());
                }
                replies
            }
            Err(e) => {
                warn!(session_id = %session_id, kind = e.kind(), "Chat turn failed: {}", e);
                vec![format!("❌ Error: {}", e)]
            }
        }
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let text: String = text.chars().take(TELEGRAM_MESSAGE_LIMIT).collect();
        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&json!({"chat_id": chat_id, "text": text}))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestrationError::Notification(format!(
                "Telegram sendMessage returned {}: {}",
                status, body
            )));
        }
        Ok(())
    }

    async fn poll(&self, offset: i64) -> Result<Value> {
        let response = self
            .client
            .post(self.api_url("getUpdates"))
            .json(&json!({
                "offset": offset,
                "timeout": POLL_TIMEOUT_SECS,
                "allowed_updates": ["message"],
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestrationError::Notification(format!(
                "Telegram getUpdates returned {}: {}",
                status, body
            )));
        }
        Ok(response.json().await?)
    }

    /// Poll forever. Transport errors are logged and retried after a pause.
    pub async fn run(&self) {
        let mut offset: i64 = 0;
        info!("Telegram bot listening for messages");

        loop {
            let body = match self.poll(offset).await {
                Ok(body) => body,
                Err(e) => {
                    warn!("Telegram poll error: {}", e);
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                }
            };

            let (messages, next) = parse_updates(&body, offset);
            offset = next;

            for message in messages {
                info!(chat_id = message.chat_id, update_id = message.update_id, "Telegram message received");
                for reply in self.replies_for(message.chat_id, &message.text).await {
                    if let Err(e) = self.send_message(message.chat_id, &reply).await {
                        warn!(chat_id = message.chat_id, "Telegram reply failed: {}", e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{ScriptedGenerator, CONVERSATION_AGENT};
    use crate::app::Copilot;
    use crate::config::Config;
    use crate::conversation::SessionStore;
    use crate::store::{InMemoryRecordStore, RecordStore};
    use crate::test_support::{self, SAMPLE_CLIENT};

    async fn bot() -> (TelegramBot, Arc<ScriptedGenerator>, Arc<InMemoryRecordStore>) {
        let generator = test_support::pipeline_generator();
        let (orchestrator, store) = test_support::orchestrator(Arc::clone(&generator)).await;
        let copilot = Copilot::assemble(
            orchestrator,
            generator.clone(),
            SessionStore::in_memory(Duration::from_secs(600)),
            &Config::default(),
        );
        let bot = TelegramBot::new("test-token".to_string(), copilot.conversation).unwrap();
        (bot, generator, store)
    }

    fn extraction(intent: &str, params: Value, response: &str) -> Value {
        json!({
            "intent": intent,
            "extracted_params": params,
            "missing_slots": [],
            "response": response
        })
    }

    #[test]
    fn test_parse_updates_keeps_text_and_advances_offset() {
        let body = json!({
            "ok": true,
            "result": [
                {"update_id": 10, "message": {"chat": {"id": 42}, "text": "hello"}},
                {"update_id": 11, "message": {"chat": {"id": 42}, "photo": []}},
                {"update_id": 12, "edited_message": {"chat": {"id": 7}, "text": "edit"}}
            ]
        });

        let (messages, offset) = parse_updates(&body, 0);

        assert_eq!(
            messages,
            vec![IncomingText {
                update_id: 10,
                chat_id: 42,
                text: "hello".to_string()
            }]
        );
        assert_eq!(offset, 13);
        assert_eq!(parse_updates(&json!({"ok": false}), 13).1, 13);
    }

    #[tokio::test]
    async fn test_commands() {
        let (bot, generator, _store) = bot().await;

        assert_eq!(bot.replies_for(42, "/start").await, vec![WELCOME_MESSAGE]);
        assert_eq!(bot.replies_for(42, "/help@CopilotBot").await, vec![HELP_MESSAGE]);
        assert!(bot.replies_for(42, "/settings").await.is_empty());
        assert!(bot.replies_for(42, "   ").await.is_empty());
        assert!(generator.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_text_goes_to_the_chat_session() {
        let (bot, generator, _store) = bot().await;
        generator
            .push_response(CONVERSATION_AGENT, extraction("none", json!({}), "Bonjour!"))
            .await;

        let replies = bot.replies_for(42, "bonjour").await;

        assert_eq!(replies, vec!["Bonjour!"]);
        let session = bot
            .conversation
            .sessions()
            .load_or_create("telegram_42", test_support::fixed_now())
            .await
            .unwrap();
        assert_eq!(session.message_count(), 2);
    }

    #[tokio::test]
    async fn test_executed_action_is_confirmed() {
        let (bot, generator, store) = bot().await;
        generator
            .push_response(
                CONVERSATION_AGENT,
                extraction(
                    "log_update",
                    json!({
                        "client_id": SAMPLE_CLIENT,
                        "update_type": "documents",
                        "message": "Financial statements received"
                    }),
                    "Logged.",
                ),
            )
            .await;

        let replies = bot
            .replies_for(7, "SOTUPLAST sent their financial statements")
            .await;

        assert_eq!(replies, vec!["Logged.", ACTION_CONFIRMATION]);
        let log = store.load_interactions(SAMPLE_CLIENT).await.unwrap();
        assert_eq!(log.len(), 2);
    }
}
