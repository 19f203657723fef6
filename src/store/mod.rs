//! Record persistence layer
//!
//! Durable per-client records: raw fixtures, case file, reminders,
//! interaction log, document vault, and rendered reports.
//! Collections default to empty when absent rather than failing.

use crate::error::OrchestrationError;
use crate::models::{CaseFile, InteractionEntry, RawClientRecord, Reminder};
use crate::Result;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub mod file;
pub mod locks;
pub mod memory;

pub use file::FileRecordStore;
pub use locks::KeyedLocks;
pub use memory::InMemoryRecordStore;

pub const CASE_GROUP: &str = "client_case";
pub const INTERACTIONS_GROUP: &str = "interactions_log";
pub const VAULT_GROUP: &str = "document_vault_index";
pub const REMINDERS_GROUP: &str = "reminders";

/// Trait for record persistence.
///
/// Implementations do not lock. Callers wrap every load → mutate → save
/// cycle in a [`KeyedLocks`] guard for the client id.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Fails with `NotFound` when the client has no backing storage.
    async fn load_client_record(&self, client_id: &str) -> Result<RawClientRecord>;

    async fn load_case_file(&self, client_id: &str) -> Result<Option<CaseFile>>;
    async fn save_case_file(&self, case: &CaseFile) -> Result<()>;

    async fn load_reminders(&self, client_id: &str) -> Result<Vec<Reminder>>;
    async fn save_reminders(&self, client_id: &str, reminders: &[Reminder]) -> Result<()>;

    async fn load_interactions(&self, client_id: &str) -> Result<Vec<InteractionEntry>>;
    async fn save_interactions(&self, client_id: &str, entries: &[InteractionEntry]) -> Result<()>;

    async fn load_document_vault(&self, client_id: &str) -> Result<Option<Value>>;
    async fn save_document_vault(&self, client_id: &str, vault: &Value) -> Result<()>;

    /// Persist a rendered report, one per client per day. Returns its location.
    async fn save_report(&self, client_id: &str, day: NaiveDate, markdown: &str) -> Result<String>;
}

/// File name of the report for a client and day.
pub fn report_file_name(client_id: &str, day: NaiveDate) -> String {
    format!("prep_pack_{}_{}.md", client_id, day.format("%Y%m%d"))
}

/// Client ids become directory names, so anything path-like is rejected.
pub fn validate_client_id(client_id: &str) -> Result<()> {
    let trimmed = client_id.trim();
    if trimmed.is_empty() {
        return Err(OrchestrationError::Validation(
            "client_id must not be empty".to_string(),
        ));
    }
    if trimmed != client_id
        || client_id.contains(['/', '\\'])
        || client_id.contains("..")
    {
        return Err(OrchestrationError::Validation(format!(
            "invalid client_id '{}'",
            client_id
        )));
    }
    Ok(())
}

/// Decode a stored list. An empty object or null counts as an empty list,
/// since fixtures for absent groups are written as `{}`.
pub(crate) fn decode_list<T: DeserializeOwned>(value: Value, what: &str) -> Result<Vec<T>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Object(ref map) if map.is_empty() => Ok(Vec::new()),
        Value::Array(_) => serde_json::from_value(value).map_err(|e| {
            OrchestrationError::Storage(format!("Malformed {}: {}", what, e))
        }),
        other => Err(OrchestrationError::Storage(format!(
            "Expected a list for {}, found {}",
            what,
            kind_of(&other)
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
