//! In-memory record store for development and tests.
//!
//! Mirrors the file layout: each client is a map of data groups holding the
//! same JSON the file store would write, so derived updates show up in the
//! next `load_client_record`.

use super::{
    decode_list, report_file_name, validate_client_id, RecordStore, CASE_GROUP,
    INTERACTIONS_GROUP, REMINDERS_GROUP, VAULT_GROUP,
};
use crate::error::OrchestrationError;
use crate::models::{CaseFile, InteractionEntry, RawClientRecord, Reminder};
use crate::Result;
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryRecordStore {
    clients: Arc<RwLock<HashMap<String, BTreeMap<String, Value>>>>,
    reports: Arc<RwLock<BTreeMap<String, String>>>,
    failing_groups: Arc<RwLock<HashSet<String>>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client with its raw data groups.
    pub async fn seed_client(&self, client_id: &str, groups: BTreeMap<String, Value>) {
        let mut clients = self.clients.write().await;
        clients.insert(client_id.to_string(), groups);
    }

    /// Make every later write to `group` fail. Used to exercise failure paths.
    pub async fn fail_writes_to(&self, group: &str) {
        self.failing_groups.write().await.insert(group.to_string());
    }

    pub async fn report(&self, location: &str) -> Option<String> {
        self.reports.read().await.get(location).cloned()
    }

    pub async fn report_count(&self) -> usize {
        self.reports.read().await.len()
    }

    pub async fn group(&self, client_id: &str, group: &str) -> Option<Value> {
        let clients = self.clients.read().await;
        clients.get(client_id).and_then(|groups| groups.get(group)).cloned()
    }

    async fn put_group(&self, client_id: &str, group: &str, value: Value) -> Result<()> {
        validate_client_id(client_id)?;

        if self.failing_groups.read().await.contains(group) {
            return Err(OrchestrationError::Storage(format!(
                "write to {} for {} rejected",
                group, client_id
            )));
        }

        let mut clients = self.clients.write().await;
        clients
            .entry(client_id.to_string())
            .or_default()
            .insert(group.to_string(), value);
        Ok(())
    }
}

#[async_trait::async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn load_client_record(&self, client_id: &str) -> Result<RawClientRecord> {
        let clients = self.clients.read().await;
        let groups = clients.get(client_id).ok_or_else(|| {
            OrchestrationError::NotFound(format!("Client data not found for {}", client_id))
        })?;

        Ok(RawClientRecord::new(client_id, groups.clone()))
    }

    async fn load_case_file(&self, client_id: &str) -> Result<Option<CaseFile>> {
        match self.group(client_id, CASE_GROUP).await {
            None => Ok(None),
            Some(Value::Object(map)) if map.is_empty() => Ok(None),
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                OrchestrationError::Storage(format!("Malformed case file for {}: {}", client_id, e))
            }),
        }
    }

    async fn save_case_file(&self, case: &CaseFile) -> Result<()> {
        let value = serde_json::to_value(case)?;
        self.put_group(&case.client_id, CASE_GROUP, value).await
    }

    async fn load_reminders(&self, client_id: &str) -> Result<Vec<Reminder>> {
        match self.group(client_id, REMINDERS_GROUP).await {
            Some(value) => decode_list(value, "reminders"),
            None => Ok(Vec::new()),
        }
    }

    async fn save_reminders(&self, client_id: &str, reminders: &[Reminder]) -> Result<()> {
        let value = serde_json::to_value(reminders)?;
        self.put_group(client_id, REMINDERS_GROUP, value).await
    }

    async fn load_interactions(&self, client_id: &str) -> Result<Vec<InteractionEntry>> {
        match self.group(client_id, INTERACTIONS_GROUP).await {
            Some(value) => decode_list(value, "interaction log"),
            None => Ok(Vec::new()),
        }
    }

    async fn save_interactions(&self, client_id: &str, entries: &[InteractionEntry]) -> Result<()> {
        let value = serde_json::to_value(entries)?;
        self.put_group(client_id, INTERACTIONS_GROUP, value).await
    }

    async fn load_document_vault(&self, client_id: &str) -> Result<Option<Value>> {
        Ok(self.group(client_id, VAULT_GROUP).await)
    }

    async fn save_document_vault(&self, client_id: &str, vault: &Value) -> Result<()> {
        self.put_group(client_id, VAULT_GROUP, vault.clone()).await
    }

    async fn save_report(&self, client_id: &str, day: NaiveDate, markdown: &str) -> Result<String> {
        validate_client_id(client_id)?;
        let location = format!("memory://reports/{}", report_file_name(client_id, day));
        let mut reports = self.reports.write().await;
        reports.insert(location.clone(), markdown.to_string());
        Ok(location)
    }
}
