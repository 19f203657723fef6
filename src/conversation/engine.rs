//! Slot-filling step
//!
//! One classifier call per message. The merge rules live here; the model
//! only proposes an intent, parameters and the slots it thinks are missing.

use super::intents::{is_filled, Intent, IntentCatalog, NO_INTENT};
use super::session::{ChatMessage, SessionState};
use crate::agents::{generate_structured, AgentOutput, StructuredGenerator, CONVERSATION_AGENT};
use crate::models::JsonMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const FALLBACK_RESPONSE: &str = "Sorry, I didn't understand. Could you rephrase your request?";

/// Messages of history shown to the classifier.
pub const PROMPT_HISTORY: usize = 3;

/// What the classifier returns for one message.
#[derive(Debug, Clone, Deserialize)]
pub struct IntentExtraction {
    pub intent: String,
    #[serde(default)]
    pub extracted_params: JsonMap,
    #[serde(default)]
    pub missing_slots: Vec<String>,
    pub response: String,
    #[serde(default)]
    pub reasoning: String,
}

impl AgentOutput for IntentExtraction {
    fn schema() -> Value {
        json!({
            "intent": "action_name or none",
            "extracted_params": {"<slot>": "value"},
            "missing_slots": ["string"],
            "response": "Your natural language response to the user in English",
            "reasoning": "Brief explanation of your analysis"
        })
    }

    fn validate(&self) -> Result<(), String> {
        if self.response.trim().is_empty() {
            return Err("classifier returned an empty response".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub response_text: String,
    /// Set only when every required slot is collected.
    pub action: Option<Intent>,
    pub params: JsonMap,
    pub missing_slots: Vec<String>,
    pub updated_state: SessionState,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reasoning: String,
}

impl TurnOutcome {
    fn fallback(state: &SessionState) -> Self {
        Self {
            response_text: FALLBACK_RESPONSE.to_string(),
            action: None,
            params: JsonMap::new(),
            missing_slots: Vec::new(),
            updated_state: state.clone(),
            reasoning: String::new(),
        }
    }
}

pub struct ConversationEngine {
    generator: Arc<dyn StructuredGenerator>,
    catalog: Arc<IntentCatalog>,
    /// Display name → client id, offered to the classifier.
    client_aliases: Vec<(String, String)>,
    timeout: Duration,
}

impl ConversationEngine {
    pub fn new(
        generator: Arc<dyn StructuredGenerator>,
        catalog: Arc<IntentCatalog>,
        timeout: Duration,
    ) -> Self {
        Self {
            generator,
            catalog,
            client_aliases: Vec::new(),
            timeout,
        }
    }

    pub fn with_client_aliases(mut self, aliases: Vec<(String, String)>) -> Self {
        self.client_aliases = aliases;
        self
    }

    pub fn catalog(&self) -> &IntentCatalog {
        &self.catalog
    }

    fn build_prompt(&self, message: &str, history: &[ChatMessage], state: &SessionState) -> String {
        let skip = history.len().saturating_sub(PROMPT_HISTORY);
        let recent: Vec<Value> = history
            .iter()
            .skip(skip)
            .map(|m| json!({"role": m.role, "content": m.content}))
            .collect();

        let state_json = serde_json::to_string_pretty(state).unwrap_or_else(|_| "{}".to_string());
        let recent_json = serde_json::to_string_pretty(&recent).unwrap_or_else(|_| "[]".to_string());

        let aliases = if self.client_aliases.is_empty() {
            String::new()
        } else {
            let lines: Vec<String> = self
                .client_aliases
                .iter()
                .map(|(name, id)| format!("- \"{}\" → client_id \"{}\"", name, id))
                .collect();
            format!(
                "\nIf a client name is mentioned, map it to its client_id:\n{}\n",
                lines.join("\n")
            )
        };

        format!(
            r#"You are an AI assistant for a Tunisian banker. Analyze the user's message and determine their intent.

Available actions:
{actions}

Current conversation state: {state}
Recent messages: {recent}

User's message: "{message}"
{aliases}
Instructions:
1. Detect the user's intent (which action they want), or "{none}" if no action applies.
2. Extract any mentioned parameters (client name/ID, dates as YYYY-MM-DD, priorities high/medium/low, etc.).
3. Identify missing required parameters.
4. Generate a natural, helpful response in English."#,
            actions = self.catalog.prompt_listing(),
            state = state_json,
            recent = recent_json,
            message = message,
            aliases = aliases,
            none = NO_INTENT,
        )
    }

    /// Classify one message and merge it into `state`.
    ///
    /// Never fails: any extraction problem yields the fallback utterance with
    /// the state unchanged.
    pub async fn process_message(
        &self,
        message: &str,
        history: &[ChatMessage],
        state: &SessionState,
    ) -> TurnOutcome {
        let prompt = self.build_prompt(message, history, state);

        let extraction: IntentExtraction = match generate_structured(
            self.generator.as_ref(),
            CONVERSATION_AGENT,
            prompt,
            self.timeout,
        )
        .await
        {
            Ok(extraction) => extraction,
            Err(e) => {
                warn!("Intent extraction failed: {}", e);
                return TurnOutcome::fallback(state);
            }
        };

        let intent = if extraction.intent.trim().eq_ignore_ascii_case(NO_INTENT) {
            None
        } else {
            match self.catalog.resolve(&extraction.intent) {
                Some(intent) => Some(intent),
                None => {
                    warn!(intent = %extraction.intent, "Classifier returned an unknown intent");
                    return TurnOutcome::fallback(state);
                }
            }
        };

        let mut updated_state = state.clone();
        if let Some(intent) = intent {
            updated_state.intent = Some(intent);
            for (slot, value) in extraction.extracted_params {
                if is_filled(&value) {
                    updated_state.collected_params.insert(slot, value);
                }
            }
        }

        let mut missing = match updated_state.intent {
            Some(current) => self
                .catalog
                .missing_slots(current, &updated_state.collected_params),
            None => Vec::new(),
        };
        for slot in extraction.missing_slots {
            if !missing.contains(&slot) {
                missing.push(slot);
            }
        }

        if intent.is_some() {
            updated_state.missing_slots = missing.clone();
        }

        let ready = intent.is_some() && missing.is_empty();

        info!(
            intent = %intent.map(|i| i.wire_name()).unwrap_or(NO_INTENT),
            collected = updated_state.collected_params.len(),
            missing = missing.len(),
            ready,
            "Conversation turn classified"
        );
        debug!(reasoning = %extraction.reasoning, "Classifier reasoning");

        TurnOutcome {
            response_text: extraction.response,
            action: if ready { intent } else { None },
            params: if ready {
                updated_state.collected_params.clone()
            } else {
                JsonMap::new()
            },
            missing_slots: missing,
            updated_state,
            reasoning: extraction.reasoning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::ScriptedGenerator;
    use crate::conversation::session::MessageRole;
    use chrono::Utc;

    fn engine(generator: Arc<ScriptedGenerator>) -> ConversationEngine {
        ConversationEngine::new(
            generator,
            Arc::new(IntentCatalog::standard()),
            Duration::from_secs(5),
        )
    }

    fn extraction(intent: &str, params: Value, missing: Value) -> Value {
        json!({
            "intent": intent,
            "extracted_params": params,
            "missing_slots": missing,
            "response": "Noted.",
            "reasoning": "test"
        })
    }

    #[tokio::test]
    async fn test_three_turn_merge() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator
            .push_response(
                CONVERSATION_AGENT,
                extraction(
                    "create_reminder",
                    json!({"client_id": "ATB-SME-001"}),
                    json!(["reminder_text", "due_date", "priority"]),
                ),
            )
            .await;
        generator
            .push_response(CONVERSATION_AGENT, extraction("none", json!({"client_id": "OTHER"}), json!([])))
            .await;
        generator
            .push_response(
                CONVERSATION_AGENT,
                extraction(
                    "create_reminder",
                    json!({"reminder_text": "Call about loan", "due_date": "2026-06-01", "priority": "high"}),
                    json!([]),
                ),
            )
            .await;
        let engine = engine(generator);

        // Turn 1: intent detected, slots still missing.
        let first = engine
            .process_message("Remind me about SOTUPLAST", &[], &SessionState::default())
            .await;
        assert_eq!(first.action, None);
        assert_eq!(first.updated_state.intent, Some(Intent::CreateReminder));
        assert_eq!(first.updated_state.collected_params["client_id"], "ATB-SME-001");
        assert_eq!(first.missing_slots, vec!["reminder_text", "due_date", "priority"]);

        // Turn 2: no intent, state untouched.
        let second = engine
            .process_message("what's the weather?", &[], &first.updated_state)
            .await;
        assert_eq!(second.updated_state, first.updated_state);
        assert_eq!(second.action, None);

        // Turn 3: remaining slots arrive, action is ready.
        let third = engine
            .process_message("high priority, June 1st, about the loan", &[], &second.updated_state)
            .await;
        assert_eq!(third.action, Some(Intent::CreateReminder));
        assert!(third.missing_slots.is_empty());
        assert_eq!(third.params["client_id"], "ATB-SME-001");
        assert_eq!(third.params["priority"], "high");
        assert_eq!(third.params.len(), 4);
    }

    #[tokio::test]
    async fn test_partial_turns_accumulate_under_one_intent() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator
            .push_response(
                CONVERSATION_AGENT,
                extraction(
                    "create_reminder",
                    json!({"client_id": "ATB-SME-001"}),
                    json!(["reminder_text", "due_date", "priority"]),
                ),
            )
            .await;
        generator
            .push_response(
                CONVERSATION_AGENT,
                extraction(
                    "create_reminder",
                    json!({"due_date": "2026-06-01", "priority": "high"}),
                    json!(["reminder_text"]),
                ),
            )
            .await;
        generator
            .push_response(
                CONVERSATION_AGENT,
                extraction(
                    "create_reminder",
                    json!({"reminder_text": "Call about the loan"}),
                    json!([]),
                ),
            )
            .await;
        let engine = engine(generator);

        let first = engine
            .process_message("Remind me about ATB-SME-001", &[], &SessionState::default())
            .await;
        assert_eq!(first.action, None);

        // Turn 2: same intent, two more slots, one still missing.
        let second = engine
            .process_message("June 1st, high priority", &[], &first.updated_state)
            .await;
        let collected = &second.updated_state.collected_params;
        assert_eq!(second.updated_state.intent, Some(Intent::CreateReminder));
        assert_eq!(collected["client_id"], "ATB-SME-001");
        assert_eq!(collected["due_date"], "2026-06-01");
        assert_eq!(collected["priority"], "high");
        assert_eq!(collected.len(), 3);
        assert_eq!(second.missing_slots, vec!["reminder_text"]);
        assert_eq!(second.updated_state.missing_slots, vec!["reminder_text"]);
        assert_eq!(second.action, None);
        assert!(second.params.is_empty());

        // Turn 3: the last slot makes the action ready.
        let third = engine
            .process_message("it's about the loan", &[], &second.updated_state)
            .await;
        assert_eq!(third.action, Some(Intent::CreateReminder));
        assert!(third.missing_slots.is_empty());
        assert_eq!(third.params.len(), 4);
        assert_eq!(third.params["reminder_text"], "Call about the loan");
        assert_eq!(third.params["client_id"], "ATB-SME-001");
    }

    #[tokio::test]
    async fn test_new_values_win_on_collision() {
        let generator = Arc::new(ScriptedGenerator::new().with_response(
            CONVERSATION_AGENT,
            extraction("log_update", json!({"client_id": "ATB-SME-002", "update_type": null}), json!([])),
        ));
        let engine = engine(generator);

        let mut state = SessionState {
            intent: Some(Intent::LogUpdate),
            ..Default::default()
        };
        state.collected_params.insert("client_id".into(), json!("ATB-SME-001"));
        state.collected_params.insert("update_type".into(), json!("call"));

        let outcome = engine.process_message("actually it's ATB-SME-002", &[], &state).await;

        assert_eq!(outcome.updated_state.collected_params["client_id"], "ATB-SME-002");
        assert_eq!(outcome.updated_state.collected_params["update_type"], "call");
        // The model said nothing is missing, but "message" was never collected.
        assert_eq!(outcome.missing_slots, vec!["message"]);
        assert_eq!(outcome.action, None);
    }

    #[tokio::test]
    async fn test_agent_reported_slots_are_kept() {
        let generator = Arc::new(ScriptedGenerator::new().with_response(
            CONVERSATION_AGENT,
            extraction("generate_briefing", json!({"client_id": "ATB-SME-001"}), json!(["language"])),
        ));
        let engine = engine(generator);

        let outcome = engine
            .process_message("brief me on SOTUPLAST", &[], &SessionState::default())
            .await;

        assert_eq!(outcome.updated_state.intent, Some(Intent::GeneratePrepPack));
        assert_eq!(outcome.missing_slots, vec!["language"]);
        assert_eq!(outcome.action, None);
    }

    #[tokio::test]
    async fn test_failures_fall_back_without_touching_state() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push_failure(CONVERSATION_AGENT, "upstream 503").await;
        generator
            .push_response(CONVERSATION_AGENT, json!({"intent": "create_reminder"}))
            .await;
        generator
            .push_response(CONVERSATION_AGENT, extraction("wire_money", json!({}), json!([])))
            .await;
        let engine = engine(generator);

        let mut state = SessionState {
            intent: Some(Intent::SubmitNotes),
            ..Default::default()
        };
        state.collected_params.insert("client_id".into(), json!("ATB-SME-001"));

        for _ in 0..3 {
            let outcome = engine.process_message("???", &[], &state).await;
            assert_eq!(outcome.response_text, FALLBACK_RESPONSE);
            assert_eq!(outcome.action, None);
            assert_eq!(outcome.updated_state, state);
        }
    }

    #[tokio::test]
    async fn test_prompt_shows_last_three_messages_and_aliases() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .with_response(CONVERSATION_AGENT, extraction("none", json!({}), json!([]))),
        );
        let engine = engine(Arc::clone(&generator))
            .with_client_aliases(vec![("SOTUPLAST".to_string(), "ATB-SME-001".to_string())]);

        let history: Vec<ChatMessage> = (1..=5)
            .map(|i| ChatMessage {
                role: MessageRole::User,
                content: format!("message {}", i),
                timestamp: Utc::now(),
            })
            .collect();

        engine.process_message("hello", &history, &SessionState::default()).await;

        let prompt = &generator.calls().await[0].prompt;
        assert!(!prompt.contains("message 2"));
        assert!(prompt.contains("message 3"));
        assert!(prompt.contains("message 5"));
        assert!(prompt.contains("\"SOTUPLAST\" → client_id \"ATB-SME-001\""));
        assert!(prompt.contains("submit_notes"));
    }
}
