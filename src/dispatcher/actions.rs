//! Direct client actions: reminders and informal updates.
//!
//! Inputs are validated before any side effect. Each write is a
//! read-modify-write under the client's lock, saved only once the new
//! record is fully built.

use crate::clock::Clock;
use crate::error::OrchestrationError;
use crate::knowledge::reminder_dates;
use crate::models::{mint_id, InteractionEntry, JsonMap, Priority, Reminder, ReminderStatus};
use crate::store::{validate_client_id, KeyedLocks, RecordStore};
use crate::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

pub const UPDATE_OUTCOME: &str = "Logged via copilot.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderRequest {
    pub client_id: String,
    pub reminder_text: String,
    pub due_date: String,
    pub priority: String,
    #[serde(default)]
    pub linked_task_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub client_id: String,
    pub update_type: String,
    pub message: String,
    /// Defaults to today.
    #[serde(default)]
    pub date: Option<String>,
}

pub struct ClientActions {
    store: Arc<dyn RecordStore>,
    locks: KeyedLocks,
    clock: Arc<dyn Clock>,
}

pub fn parse_date(field: &str, raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        OrchestrationError::Validation(format!("{} '{}' must be YYYY-MM-DD", field, raw))
    })
}

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(OrchestrationError::Validation(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(())
}

impl ClientActions {
    pub fn new(store: Arc<dyn RecordStore>, locks: KeyedLocks, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            locks,
            clock,
        }
    }

    pub async fn create_reminder(&self, request: ReminderRequest) -> Result<Reminder> {
        validate_client_id(&request.client_id)?;
        require_text("reminder_text", &request.reminder_text)?;
        let due = parse_date("due_date", &request.due_date)?;
        let priority: Priority = request
            .priority
            .parse()
            .map_err(OrchestrationError::Validation)?;

        self.store.load_client_record(&request.client_id).await?;

        let due_date = due.format("%Y-%m-%d").to_string();
        let reminder = Reminder {
            id: mint_id("rem"),
            client_id: request.client_id.clone(),
            message: request.reminder_text.trim().to_string(),
            trigger_dates: reminder_dates(&due_date),
            due_date,
            priority,
            status: ReminderStatus::Pending,
            linked_task_id: request.linked_task_id,
            created_at: Some(self.clock.now()),
        };

        let _guard = self.locks.acquire(&request.client_id).await;
        let mut reminders = self.store.load_reminders(&request.client_id).await?;
        reminders.push(reminder.clone());
        self.store
            .save_reminders(&request.client_id, &reminders)
            .await?;

        info!(
            client_id = %request.client_id,
            reminder_id = %reminder.id,
            due_date = %reminder.due_date,
            priority = %reminder.priority,
            "Reminder created"
        );

        Ok(reminder)
    }

    pub async fn log_update(&self, request: UpdateRequest) -> Result<InteractionEntry> {
        validate_client_id(&request.client_id)?;
        require_text("update_type", &request.update_type)?;
        require_text("message", &request.message)?;
        let date = match request.date.as_deref().filter(|d| !d.trim().is_empty()) {
            Some(raw) => parse_date("date", raw)?,
            None => self.clock.today(),
        };

        self.store.load_client_record(&request.client_id).await?;

        let entry = InteractionEntry {
            date: date.format("%Y-%m-%d").to_string(),
            interaction_type: request.update_type.trim().to_string(),
            summary: request.message.trim().to_string(),
            outcome: UPDATE_OUTCOME.to_string(),
            extra: JsonMap::new(),
        };

        let _guard = self.locks.acquire(&request.client_id).await;
        let mut entries = self.store.load_interactions(&request.client_id).await?;
        entries.insert(0, entry.clone());
        self.store
            .save_interactions(&request.client_id, &entries)
            .await?;

        info!(
            client_id = %request.client_id,
            update_type = %entry.interaction_type,
            "Client update logged"
        );

        Ok(entry)
    }
}
