//! Action dispatcher
//!
//! Maps a fully-slotted intent onto its side-effecting operation. Handlers
//! are registered per catalog intent; slots are checked against the
//! catalog before a handler runs.

use crate::conversation::intents::{Intent, IntentCatalog};
use crate::error::OrchestrationError;
use crate::models::{InteractionEntry, JsonMap, MeetingInput, Reminder};
use crate::orchestrator::{Orchestrator, DEFAULT_LANGUAGE};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub mod actions;

pub use actions::{ClientActions, ReminderRequest, UpdateRequest};

/// Result of one dispatch, success or structured failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl DispatchOutcome {
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_kind: None,
        }
    }

    pub fn failure(error: &OrchestrationError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind().to_string()),
        }
    }
}

/// One side-effecting operation behind a catalog intent.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn intent(&self) -> Intent;
    async fn handle(&self, params: &JsonMap) -> Result<Value>;
}

pub struct Dispatcher {
    catalog: Arc<IntentCatalog>,
    handlers: HashMap<Intent, Arc<dyn ActionHandler>>,
    actions: Arc<ClientActions>,
}

impl Dispatcher {
    /// Registers the standard handler for every catalog intent.
    pub fn new(catalog: Arc<IntentCatalog>, orchestrator: Arc<Orchestrator>) -> Self {
        let actions = Arc::new(ClientActions::new(
            orchestrator.store(),
            orchestrator.locks().clone(),
            orchestrator.clock(),
        ));

        let mut dispatcher = Self {
            catalog,
            handlers: HashMap::new(),
            actions: Arc::clone(&actions),
        };

        dispatcher.register(Arc::new(PrepPackHandler {
            orchestrator: Arc::clone(&orchestrator),
        }));
        dispatcher.register(Arc::new(ReminderHandler {
            actions: Arc::clone(&actions),
        }));
        dispatcher.register(Arc::new(UpdateHandler { actions }));
        dispatcher.register(Arc::new(NotesHandler { orchestrator }));

        dispatcher
    }

    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(handler.intent(), handler);
    }

    pub fn catalog(&self) -> &IntentCatalog {
        &self.catalog
    }

    /// Run the handler for `intent` (wire name or alias).
    pub async fn execute(&self, intent: &str, params: &JsonMap) -> DispatchOutcome {
        match self.try_execute(intent, params).await {
            Ok(data) => DispatchOutcome::success(data),
            Err(e) => {
                warn!(intent = %intent, kind = e.kind(), "Dispatch failed: {}", e);
                DispatchOutcome::failure(&e)
            }
        }
    }

    async fn try_execute(&self, intent: &str, params: &JsonMap) -> Result<Value> {
        let resolved = self.catalog.resolve(intent).ok_or_else(|| {
            OrchestrationError::Validation(format!("unknown intent '{}'", intent))
        })?;

        let handler = self.handlers.get(&resolved).ok_or_else(|| {
            OrchestrationError::Validation(format!("no handler registered for '{}'", resolved))
        })?;

        let missing = self.catalog.missing_slots(resolved, params);
        if !missing.is_empty() {
            return Err(OrchestrationError::Validation(format!(
                "missing required parameters for {}: {}",
                resolved,
                missing.join(", ")
            )));
        }

        info!(intent = %resolved, "Dispatching action");
        handler.handle(params).await
    }

    pub async fn create_reminder(&self, request: ReminderRequest) -> Result<Reminder> {
        self.actions.create_reminder(request).await
    }

    pub async fn log_update(&self, request: UpdateRequest) -> Result<InteractionEntry> {
        self.actions.log_update(request).await
    }
}

// ===== Slot readers =====

/// Slot value as text. Numbers and booleans are accepted as written.
fn slot_text(params: &JsonMap, slot: &str) -> Result<String> {
    let text = match params.get(slot) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    };

    if text.is_empty() {
        return Err(OrchestrationError::Validation(format!(
            "parameter '{}' is missing or empty",
            slot
        )));
    }
    Ok(text)
}

fn optional_text(params: &JsonMap, slot: &str) -> Option<String> {
    slot_text(params, slot).ok()
}

/// Notes arrive as one string (one note per line) or a list of strings.
fn slot_notes(params: &JsonMap, slot: &str) -> Result<Vec<String>> {
    let notes: Vec<String> = match params.get(slot) {
        Some(Value::String(s)) => s.lines().map(str::to_string).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };

    let notes: Vec<String> = notes
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect();

    if notes.is_empty() {
        return Err(OrchestrationError::Validation(format!(
            "parameter '{}' is missing or empty",
            slot
        )));
    }
    Ok(notes)
}

// ===== Handlers =====

struct PrepPackHandler {
    orchestrator: Arc<Orchestrator>,
}

#[async_trait]
impl ActionHandler for PrepPackHandler {
    fn intent(&self) -> Intent {
        Intent::GeneratePrepPack
    }

    async fn handle(&self, params: &JsonMap) -> Result<Value> {
        let client_id = slot_text(params, "client_id")?;
        let language = optional_text(params, "language").unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

        let output = self.orchestrator.build_prep_pack(&client_id, &language).await?;
        Ok(serde_json::to_value(output)?)
    }
}

struct ReminderHandler {
    actions: Arc<ClientActions>,
}

#[async_trait]
impl ActionHandler for ReminderHandler {
    fn intent(&self) -> Intent {
        Intent::CreateReminder
    }

    async fn handle(&self, params: &JsonMap) -> Result<Value> {
        let request = ReminderRequest {
            client_id: slot_text(params, "client_id")?,
            reminder_text: slot_text(params, "reminder_text")?,
            due_date: slot_text(params, "due_date")?,
            priority: slot_text(params, "priority")?,
            linked_task_id: optional_text(params, "linked_task_id"),
        };

        let reminder = self.actions.create_reminder(request).await?;
        Ok(serde_json::to_value(reminder)?)
    }
}

struct UpdateHandler {
    actions: Arc<ClientActions>,
}

#[async_trait]
impl ActionHandler for UpdateHandler {
    fn intent(&self) -> Intent {
        Intent::LogUpdate
    }

    async fn handle(&self, params: &JsonMap) -> Result<Value> {
        let request = UpdateRequest {
            client_id: slot_text(params, "client_id")?,
            update_type: slot_text(params, "update_type")?,
            message: slot_text(params, "message")?,
            date: optional_text(params, "date"),
        };

        let entry = self.actions.log_update(request).await?;
        Ok(serde_json::to_value(entry)?)
    }
}

struct NotesHandler {
    orchestrator: Arc<Orchestrator>,
}

#[async_trait]
impl ActionHandler for NotesHandler {
    fn intent(&self) -> Intent {
        Intent::SubmitNotes
    }

    /// Takes no client lock itself; the orchestrator locks around its write.
    async fn handle(&self, params: &JsonMap) -> Result<Value> {
        let client_id = slot_text(params, "client_id")?;
        let meeting = MeetingInput {
            meeting_date: slot_text(params, "meeting_date")?,
            meeting_type: slot_text(params, "meeting_type")?,
            banker_notes: slot_notes(params, "notes")?,
        };

        let result = self
            .orchestrator
            .update_case_after_meeting(&client_id, meeting)
            .await?;
        Ok(serde_json::to_value(result)?)
    }
}
