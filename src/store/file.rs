//! JSON fixture store: one directory per client, one file per data group.

use super::{
    decode_list, report_file_name, validate_client_id, RecordStore, CASE_GROUP,
    INTERACTIONS_GROUP, REMINDERS_GROUP, VAULT_GROUP,
};
use crate::error::OrchestrationError;
use crate::models::{CaseFile, InteractionEntry, RawClientRecord, Reminder, CLIENT_DATA_GROUPS};
use crate::Result;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

pub struct FileRecordStore {
    data_path: PathBuf,
    output_dir: PathBuf,
}

impl FileRecordStore {
    pub fn new(data_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            output_dir: output_dir.into(),
        }
    }

    fn client_dir(&self, client_id: &str) -> Result<PathBuf> {
        validate_client_id(client_id)?;
        Ok(self.data_path.join(client_id))
    }

    fn group_path(&self, client_id: &str, group: &str) -> Result<PathBuf> {
        Ok(self.client_dir(client_id)?.join(format!("{}.json", group)))
    }

    async fn read_group(&self, client_id: &str, group: &str) -> Result<Option<Value>> {
        let path = self.group_path(client_id, group)?;
        read_json(&path).await
    }

    async fn write_group<T: Serialize + ?Sized>(
        &self,
        client_id: &str,
        group: &str,
        data: &T,
    ) -> Result<()> {
        let path = self.group_path(client_id, group)?;
        let content = serde_json::to_string_pretty(data)?;
        write_atomic(&path, &content).await
    }
}

async fn read_json(path: &Path) -> Result<Option<Value>> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => serde_json::from_str(&raw).map(Some).map_err(|e| {
            OrchestrationError::Storage(format!("Malformed JSON in {}: {}", path.display(), e))
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write to a sibling temp file, then rename over the target.
/// Readers see either the old or the new content, never a torn file.
/// Every write gets its own temp file, so concurrent writers of one path
/// only race on the rename.
async fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".{}.tmp", Uuid::new_v4().simple()));
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, content).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }

    debug!(path = %path.display(), bytes = content.len(), "Record written");
    Ok(())
}

#[async_trait::async_trait]
impl RecordStore for FileRecordStore {
    async fn load_client_record(&self, client_id: &str) -> Result<RawClientRecord> {
        let dir = self.client_dir(client_id)?;
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(OrchestrationError::NotFound(format!(
                "Client data not found for {} at {}",
                client_id,
                dir.display()
            )));
        }

        let mut groups = BTreeMap::new();
        for group in CLIENT_DATA_GROUPS {
            if let Some(value) = self.read_group(client_id, group).await? {
                groups.insert(group.to_string(), value);
            }
        }

        Ok(RawClientRecord::new(client_id, groups))
    }

    async fn load_case_file(&self, client_id: &str) -> Result<Option<CaseFile>> {
        match self.read_group(client_id, CASE_GROUP).await? {
            None => Ok(None),
            Some(Value::Object(map)) if map.is_empty() => Ok(None),
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                OrchestrationError::Storage(format!("Malformed case file for {}: {}", client_id, e))
            }),
        }
    }

    async fn save_case_file(&self, case: &CaseFile) -> Result<()> {
        self.write_group(&case.client_id, CASE_GROUP, case).await
    }

    async fn load_reminders(&self, client_id: &str) -> Result<Vec<Reminder>> {
        match self.read_group(client_id, REMINDERS_GROUP).await? {
            Some(value) => decode_list(value, "reminders"),
            None => Ok(Vec::new()),
        }
    }

    async fn save_reminders(&self, client_id: &str, reminders: &[Reminder]) -> Result<()> {
        self.write_group(client_id, REMINDERS_GROUP, reminders).await
    }

    async fn load_interactions(&self, client_id: &str) -> Result<Vec<InteractionEntry>> {
        match self.read_group(client_id, INTERACTIONS_GROUP).await? {
            Some(value) => decode_list(value, "interaction log"),
            None => Ok(Vec::new()),
        }
    }

    async fn save_interactions(&self, client_id: &str, entries: &[InteractionEntry]) -> Result<()> {
        self.write_group(client_id, INTERACTIONS_GROUP, entries).await
    }

    async fn load_document_vault(&self, client_id: &str) -> Result<Option<Value>> {
        self.read_group(client_id, VAULT_GROUP).await
    }

    async fn save_document_vault(&self, client_id: &str, vault: &Value) -> Result<()> {
        self.write_group(client_id, VAULT_GROUP, vault).await
    }

    async fn save_report(&self, client_id: &str, day: NaiveDate, markdown: &str) -> Result<String> {
        validate_client_id(client_id)?;
        let path = self.output_dir.join(report_file_name(client_id, day));
        write_atomic(&path, markdown).await?;
        Ok(path.display().to_string())
    }
}
