//! Derived updates that follow a committed case file write.
//!
//! Each stage is independent: a failure is logged and collected, never
//! propagated, and never undoes the case file.

use crate::clock::Clock;
use crate::error::OrchestrationError;
use crate::knowledge::reminder_dates;
use crate::models::{
    mint_id, AfterMeetingResult, InteractionEntry, JsonMap, MeetingInput, Reminder, ReminderStatus,
};
use crate::store::RecordStore;
use crate::Result;
use serde_json::Value;
use tracing::{debug, warn};

pub const SUMMARY_LIMIT: usize = 300;
pub const INTERACTION_OUTCOME: &str = "See Client Case for full minutes.";
pub const VALIDATED_STATUS: &str = "validated";

const RECEIVED_MARKERS: [&str; 2] = ["received", "reçu"];
const STATEMENT_MARKERS: [&str; 2] = ["financial statements", "états financiers"];

pub struct DerivedUpdates<'a> {
    store: &'a dyn RecordStore,
    clock: &'a dyn Clock,
}

impl<'a> DerivedUpdates<'a> {
    pub fn new(store: &'a dyn RecordStore, clock: &'a dyn Clock) -> Self {
        Self { store, clock }
    }

    /// Run every stage. Returns the failures, already logged.
    pub async fn apply(
        &self,
        client_id: &str,
        meeting: &MeetingInput,
        result: &AfterMeetingResult,
    ) -> Vec<OrchestrationError> {
        let outcomes = [
            (
                "interaction_log",
                self.log_interaction(client_id, meeting, &result.official_minutes)
                    .await,
            ),
            (
                "document_vault",
                self.refresh_vault(client_id, &result.official_minutes).await,
            ),
            (
                "reminders",
                self.schedule_reminders(client_id, &result.new_reminders)
                    .await,
            ),
        ];

        let mut failures = Vec::new();
        for (stage, outcome) in outcomes {
            if let Err(e) = outcome {
                let error = OrchestrationError::BestEffort(format!("{}: {}", stage, e));
                warn!(client_id = %client_id, stage, "Derived update failed: {}", e);
                failures.push(error);
            }
        }
        failures
    }

    async fn log_interaction(
        &self,
        client_id: &str,
        meeting: &MeetingInput,
        minutes: &str,
    ) -> Result<()> {
        let mut entries = self.store.load_interactions(client_id).await?;
        entries.insert(
            0,
            InteractionEntry {
                date: meeting.meeting_date.clone(),
                interaction_type: meeting.meeting_type.clone(),
                summary: truncate_summary(minutes),
                outcome: INTERACTION_OUTCOME.to_string(),
                extra: JsonMap::new(),
            },
        );
        self.store.save_interactions(client_id, &entries).await
    }

    async fn refresh_vault(&self, client_id: &str, minutes: &str) -> Result<()> {
        let Some(mut vault) = self.store.load_document_vault(client_id).await? else {
            return Ok(());
        };

        if apply_vault_heuristic(minutes, &mut vault, self.clock.current_year()) {
            debug!(client_id = %client_id, "Financial statements marked validated");
            self.store.save_document_vault(client_id, &vault).await?;
        }
        Ok(())
    }

    async fn schedule_reminders(&self, client_id: &str, proposed: &[Reminder]) -> Result<()> {
        if proposed.is_empty() {
            return Ok(());
        }

        let mut reminders = self.store.load_reminders(client_id).await?;
        let now = self.clock.now();

        for reminder in proposed {
            reminders.push(Reminder {
                id: mint_id("rem"),
                client_id: client_id.to_string(),
                status: ReminderStatus::Pending,
                trigger_dates: reminder_dates(&reminder.due_date),
                created_at: Some(now),
                ..reminder.clone()
            });
        }

        self.store.save_reminders(client_id, &reminders).await
    }
}

/// First 300 characters of the minutes, with "..." when cut.
pub fn truncate_summary(minutes: &str) -> String {
    if minutes.chars().count() <= SUMMARY_LIMIT {
        return minutes.to_string();
    }
    let head: String = minutes.chars().take(SUMMARY_LIMIT).collect();
    format!("{}...", head)
}

/// Marks this year's financial statements as validated when the minutes say
/// they were received. Returns whether the vault changed.
pub fn apply_vault_heuristic(minutes: &str, vault: &mut Value, fiscal_year: i32) -> bool {
    let lower = minutes.to_lowercase();
    let received = RECEIVED_MARKERS.iter().any(|m| lower.contains(m));
    let statements = STATEMENT_MARKERS.iter().any(|m| lower.contains(m));
    if !(received && statements) {
        return false;
    }

    let year = fiscal_year.to_string();
    let Some(docs) = vault.get_mut("financial_docs").and_then(Value::as_array_mut) else {
        return false;
    };

    let mut updated = false;
    for doc in docs.iter_mut() {
        let matches = doc
            .get("doc_name")
            .and_then(Value::as_str)
            .map_or(false, |name| name.contains(&year));

        if let (true, Some(fields)) = (matches, doc.as_object_mut()) {
            fields.insert("status".to_string(), Value::String(VALIDATED_STATUS.to_string()));
            updated = true;
        }
    }
    updated
}
