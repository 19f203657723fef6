//! Pipeline orchestrator
//!
//! PREP PACK:    LOAD → NORMALIZE → BRIEF → RISK → OPPORTUNITIES → RENDER → SAVE → NOTIFY?
//! AFTER MEETING: MINUTES → CASE FILE (primary) → DERIVED UPDATES (best effort)

use crate::agents::RelationshipAgents;
use crate::clock::{Clock, SystemClock};
use crate::error::OrchestrationError;
use crate::models::{
    mint_id, AfterMeetingResult, CaseFile, CaseHistoryEntry, DraftEmail, MeetingInput, PrepPack,
    PrepPackOutput,
};
use crate::notifier::Notifier;
use crate::store::{validate_client_id, KeyedLocks, RecordStore};
use crate::Result;
use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub mod derived;
pub mod report;

pub use derived::DerivedUpdates;
pub use report::render_report;

pub const DEFAULT_LANGUAGE: &str = "fr";

/// Main orchestrator that coordinates the agent pipeline and case updates
pub struct Orchestrator {
    agents: RelationshipAgents,
    store: Arc<dyn RecordStore>,
    locks: KeyedLocks,
    clock: Arc<dyn Clock>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl Orchestrator {
    pub fn new(agents: RelationshipAgents, store: Arc<dyn RecordStore>) -> Self {
        Self {
            agents,
            store,
            locks: KeyedLocks::new(),
            clock: Arc::new(SystemClock),
            notifier: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn agents(&self) -> &RelationshipAgents {
        &self.agents
    }

    pub fn store(&self) -> Arc<dyn RecordStore> {
        Arc::clone(&self.store)
    }

    /// Per-client write locks, shared with the dispatcher.
    pub fn locks(&self) -> &KeyedLocks {
        &self.locks
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Run the five-stage pipeline and persist the rendered report.
    /// Any stage failure aborts; nothing partial is saved.
    pub async fn build_prep_pack(&self, client_id: &str, language: &str) -> Result<PrepPackOutput> {
        validate_client_id(client_id)?;
        let language = if language.trim().is_empty() {
            DEFAULT_LANGUAGE
        } else {
            language
        };

        let start_time = Instant::now();
        info!(client_id = %client_id, language, "Orchestrator: building prep pack");

        // === NORMALIZE ===
        let record = self.store.load_client_record(client_id).await?;
        let mut snapshot = self.agents.normalize(&record).await?;
        if snapshot.client_id != client_id {
            debug!(
                reported = %snapshot.client_id,
                client_id = %client_id,
                "Pinning snapshot client_id"
            );
            snapshot.client_id = client_id.to_string();
        }

        // === BRIEF ===
        let brief = self.agents.brief(&snapshot, language).await?;

        // === RISK ===
        let mut risk_assessment = self.agents.assess_risk(&snapshot, &brief).await?;
        risk_assessment.requires_human_approval = true;

        // === OPPORTUNITIES ===
        let opportunities = self.agents.plan_opportunities(&snapshot, &brief).await?;

        let prep_pack = PrepPack {
            snapshot,
            fiche_visite: brief,
            risk_assessment,
            opportunities,
            generated_at: self.clock.now(),
        };

        // === RENDER & SAVE ===
        let report_markdown = render_report(&prep_pack, client_id);
        let report_location = {
            let _guard = self.locks.acquire(client_id).await;
            self.store
                .save_report(client_id, self.clock.today(), &report_markdown)
                .await?
        };

        info!(
            client_id = %client_id,
            location = %report_location,
            risk_flags = prep_pack.risk_assessment.risk_flags.len(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Prep pack generated"
        );

        // === NOTIFY ===
        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier
                .send_prep_pack(&prep_pack.snapshot.company_name, &report_markdown)
                .await
            {
                warn!(client_id = %client_id, "Prep pack notification failed: {}", e);
            }
        }

        Ok(PrepPackOutput {
            prep_pack,
            report_markdown,
            report_location,
        })
    }

    /// Turn banker notes into minutes and merge them into the case file.
    ///
    /// The agent runs before the client lock is taken. The case file write
    /// is the primary mutation; the derived updates run after it under the
    /// same lock and never fail the call.
    pub async fn update_case_after_meeting(
        &self,
        client_id: &str,
        meeting: MeetingInput,
    ) -> Result<AfterMeetingResult> {
        validate_client_id(client_id)?;
        validate_meeting(&meeting)?;

        info!(
            client_id = %client_id,
            meeting_date = %meeting.meeting_date,
            notes = meeting.banker_notes.len(),
            "Orchestrator: updating case after meeting"
        );

        // Unknown clients fail before any agent call.
        self.store.load_client_record(client_id).await?;

        let mut result = self.agents.after_meeting(client_id, &meeting).await?;

        let _guard = self.locks.acquire(client_id).await;

        let mut case = self
            .store
            .load_case_file(client_id)
            .await?
            .unwrap_or_else(|| CaseFile::new(client_id));

        case.case_history.push(CaseHistoryEntry {
            date: meeting.meeting_date.clone(),
            meeting_type: meeting.meeting_type.clone(),
            minutes: result.official_minutes.clone(),
            draft_email: DraftEmail {
                subject: result.draft_email_subject.clone(),
                body: result.draft_email_body.clone(),
            },
        });

        for task in result.updated_tasks.iter_mut() {
            task.id = mint_id("task");
            task.origin_key = Some(task_origin_key(
                client_id,
                &task.description,
                &meeting.meeting_date,
            ));
        }
        case.current_tasks.extend(result.updated_tasks.iter().cloned());

        self.store.save_case_file(&case).await?;

        info!(
            client_id = %client_id,
            history_entries = case.case_history.len(),
            open_tasks = case.current_tasks.len(),
            "Case file updated"
        );

        let failures = DerivedUpdates::new(self.store.as_ref(), self.clock.as_ref())
            .apply(client_id, &meeting, &result)
            .await;
        if !failures.is_empty() {
            debug!(client_id = %client_id, failed = failures.len(), "Derived updates incomplete");
        }

        Ok(result)
    }
}

fn validate_meeting(meeting: &MeetingInput) -> Result<()> {
    NaiveDate::parse_from_str(meeting.meeting_date.trim(), "%Y-%m-%d").map_err(|_| {
        OrchestrationError::Validation(format!(
            "meeting_date '{}' must be YYYY-MM-DD",
            meeting.meeting_date
        ))
    })?;

    if meeting.meeting_type.trim().is_empty() {
        return Err(OrchestrationError::Validation(
            "meeting_type must not be empty".to_string(),
        ));
    }

    if meeting.banker_notes.iter().all(|note| note.trim().is_empty()) {
        return Err(OrchestrationError::Validation(
            "banker_notes must contain at least one note".to_string(),
        ));
    }

    Ok(())
}

/// Stable key for a task across retries of the same meeting.
pub fn task_origin_key(client_id: &str, description: &str, meeting_date: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [client_id, description, meeting_date] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{
        AFTER_MEETING_AGENT, CLIENT_BRIEF_AGENT, DATA_RETRIEVER_AGENT,
        OPPORTUNITY_AGENT, RISK_COMPLIANCE_AGENT,
    };
    use crate::store::{InMemoryRecordStore, CASE_GROUP, INTERACTIONS_GROUP};
    use crate::test_support::{self, SAMPLE_CLIENT};
    use serde_json::json;

    #[tokio::test]
    async fn test_prep_pack_pins_client_id_and_names_company() {
        let generator = test_support::pipeline_generator();
        generator
            .push_response(
                DATA_RETRIEVER_AGENT,
                json!({"client_id": "WRONG-ID", "company_name": "SOTUPLAST", "segment": "SME"}),
            )
            .await;
        let (orchestrator, _store) = test_support::orchestrator(generator).await;

        let output = orchestrator.build_prep_pack(SAMPLE_CLIENT, "fr").await.unwrap();

        assert_eq!(output.prep_pack.snapshot.client_id, SAMPLE_CLIENT);
        assert!(output.report_markdown.contains("SOTUPLAST"));
    }

    #[tokio::test]
    async fn test_prep_pack_forces_human_approval() {
        let generator = test_support::pipeline_generator();
        generator
            .push_response(
                RISK_COMPLIANCE_AGENT,
                json!({"risk_flags": [], "requires_human_approval": false}),
            )
            .await;
        let (orchestrator, _store) = test_support::orchestrator(generator).await;

        let output = orchestrator.build_prep_pack(SAMPLE_CLIENT, "fr").await.unwrap();

        assert!(output.prep_pack.risk_assessment.requires_human_approval);
        assert!(output.report_markdown.contains(report::HUMAN_APPROVAL_BANNER));
    }

    #[tokio::test]
    async fn test_prep_pack_calls_agents_in_order() {
        let generator = test_support::pipeline_generator();
        let (orchestrator, _store) = test_support::orchestrator(Arc::clone(&generator)).await;

        orchestrator.build_prep_pack(SAMPLE_CLIENT, "").await.unwrap();

        assert_eq!(
            generator.agents_called().await,
            vec![
                DATA_RETRIEVER_AGENT,
                CLIENT_BRIEF_AGENT,
                RISK_COMPLIANCE_AGENT,
                OPPORTUNITY_AGENT
            ]
        );
        let calls = generator.calls().await;
        assert!(calls[1].prompt.contains("Output language: fr"));
    }

    #[tokio::test]
    async fn test_same_day_rebuild_overwrites_report_and_leaves_case_alone() {
        let generator = test_support::pipeline_generator();
        let (orchestrator, store) = test_support::orchestrator(generator).await;
        let case_before = store.group(SAMPLE_CLIENT, CASE_GROUP).await;

        let first = orchestrator.build_prep_pack(SAMPLE_CLIENT, "fr").await.unwrap();
        let second = orchestrator.build_prep_pack(SAMPLE_CLIENT, "fr").await.unwrap();

        assert_eq!(first.report_location, second.report_location);
        assert!(first.report_location.ends_with("prep_pack_ATB-SME-001_20250314.md"));
        assert_eq!(store.report_count().await, 1);
        assert_eq!(
            store.report(&second.report_location).await.unwrap(),
            second.report_markdown
        );
        assert_eq!(store.group(SAMPLE_CLIENT, CASE_GROUP).await, case_before);
        assert_eq!(second.prep_pack.generated_at, test_support::fixed_now());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_same_day_prep_packs_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let client_dir = dir.path().join("clients").join(SAMPLE_CLIENT);
        std::fs::create_dir_all(&client_dir).unwrap();
        std::fs::write(
            client_dir.join("crm_profile.json"),
            r#"{"company_name": "SOTUPLAST", "segment": "SME"}"#,
        )
        .unwrap();

        let agents = RelationshipAgents::new(
            test_support::pipeline_generator(),
            Arc::new(crate::knowledge::KnowledgeBase::default()),
            std::time::Duration::from_secs(5),
        );
        let store = Arc::new(crate::store::FileRecordStore::new(
            dir.path().join("clients"),
            dir.path().join("outputs"),
        ));
        let orchestrator = Arc::new(
            Orchestrator::new(agents, store)
                .with_clock(Arc::new(crate::clock::FixedClock(test_support::fixed_now()))),
        );

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let orchestrator = Arc::clone(&orchestrator);
                tokio::spawn(async move { orchestrator.build_prep_pack(SAMPLE_CLIENT, "fr").await })
            })
            .collect();

        let mut locations = Vec::new();
        for handle in handles {
            locations.push(handle.await.unwrap().unwrap().report_location);
        }
        locations.dedup();
        assert_eq!(locations.len(), 1);

        let written = std::fs::read_to_string(&locations[0]).unwrap();
        assert!(written.starts_with("# Client Prep Pack: SOTUPLAST (ATB-SME-001)"));
    }

    #[tokio::test]
    async fn test_stage_failure_aborts_without_report() {
        let generator = test_support::pipeline_generator();
        generator.push_failure(OPPORTUNITY_AGENT, "quota exceeded").await;
        let (orchestrator, store) = test_support::orchestrator(generator).await;

        let err = orchestrator.build_prep_pack(SAMPLE_CLIENT, "fr").await.unwrap_err();

        assert_eq!(err.kind(), "generation_error");
        assert_eq!(store.report_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_client_is_not_found_before_any_agent() {
        let generator = test_support::pipeline_generator();
        let (orchestrator, _store) = test_support::orchestrator(Arc::clone(&generator)).await;

        let err = orchestrator.build_prep_pack("ATB-SME-999", "fr").await.unwrap_err();

        assert_eq!(err.kind(), "not_found");
        assert!(generator.agents_called().await.is_empty());
    }

    #[tokio::test]
    async fn test_notifier_failure_is_not_surfaced() {
        let generator = test_support::pipeline_generator();
        let (orchestrator, _store) = test_support::orchestrator(generator).await;
        let notifier = Arc::new(test_support::RecordingNotifier::failing());
        let orchestrator = orchestrator.with_notifier(notifier.clone());

        assert!(orchestrator.build_prep_pack(SAMPLE_CLIENT, "fr").await.is_ok());
        assert_eq!(notifier.sent().await, vec!["SOTUPLAST".to_string()]);
    }

    #[tokio::test]
    async fn test_n_meetings_append_n_history_entries() {
        let generator = test_support::pipeline_generator();
        for minutes in ["Minutes one", "Minutes two", "Minutes three"] {
            generator
                .push_response(AFTER_MEETING_AGENT, test_support::after_meeting_json(minutes))
                .await;
        }
        let (orchestrator, store) = test_support::orchestrator(generator).await;

        for day in ["2025-03-10", "2025-03-11", "2025-03-12"] {
            orchestrator
                .update_case_after_meeting(SAMPLE_CLIENT, test_support::meeting(day))
                .await
                .unwrap();
        }

        let case = store.load_case_file(SAMPLE_CLIENT).await.unwrap().unwrap();
        let minutes: Vec<&str> = case.case_history.iter().map(|h| h.minutes.as_str()).collect();
        assert_eq!(minutes, vec!["Minutes one", "Minutes two", "Minutes three"]);
        assert_eq!(case.case_history[2].date, "2025-03-12");
        assert_eq!(case.extra["relationship_manager"], "A. Ben Salah");

        // One task per meeting, each with a fresh id and no de-duplication.
        assert_eq!(case.current_tasks.len(), 4);
        let mut ids: Vec<&str> = case.current_tasks.iter().map(|t| t.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }

    #[tokio::test]
    async fn test_tasks_get_ids_and_origin_keys() {
        let generator = test_support::pipeline_generator();
        let (orchestrator, _store) = test_support::orchestrator(generator).await;

        let result = orchestrator
            .update_case_after_meeting(SAMPLE_CLIENT, test_support::meeting("2025-03-14"))
            .await
            .unwrap();

        let task = &result.updated_tasks[0];
        assert!(task.id.starts_with("task_"));
        assert_eq!(
            task.origin_key.as_deref(),
            Some(task_origin_key(SAMPLE_CLIENT, &task.description, "2025-03-14").as_str())
        );
    }

    #[tokio::test]
    async fn test_missing_case_file_is_initialized() {
        let generator = test_support::pipeline_generator();
        let store = Arc::new(InMemoryRecordStore::new());
        store
            .seed_client("ATB-SME-002", Default::default())
            .await;
        let orchestrator = test_support::orchestrator_with_store(generator, store.clone());

        orchestrator
            .update_case_after_meeting("ATB-SME-002", test_support::meeting("2025-03-14"))
            .await
            .unwrap();

        let case = store.load_case_file("ATB-SME-002").await.unwrap().unwrap();
        assert_eq!(case.client_id, "ATB-SME-002");
        assert_eq!(case.case_history.len(), 1);
    }

    #[tokio::test]
    async fn test_case_write_failure_is_surfaced() {
        let generator = test_support::pipeline_generator();
        let (orchestrator, store) = test_support::orchestrator(generator).await;
        store.fail_writes_to(CASE_GROUP).await;

        let err = orchestrator
            .update_case_after_meeting(SAMPLE_CLIENT, test_support::meeting("2025-03-14"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "storage_error");
        // Derived stages never ran.
        assert_eq!(store.load_interactions(SAMPLE_CLIENT).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_derived_failure_keeps_case_update() {
        let generator = test_support::pipeline_generator();
        let (orchestrator, store) = test_support::orchestrator(generator).await;
        store.fail_writes_to(INTERACTIONS_GROUP).await;

        let result = orchestrator
            .update_case_after_meeting(SAMPLE_CLIENT, test_support::meeting("2025-03-14"))
            .await;

        assert!(result.is_ok());
        let case = store.load_case_file(SAMPLE_CLIENT).await.unwrap().unwrap();
        assert_eq!(case.case_history.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_meeting_is_rejected_before_agent() {
        let generator = test_support::pipeline_generator();
        let (orchestrator, _store) = test_support::orchestrator(Arc::clone(&generator)).await;

        let mut meeting = test_support::meeting("14/03/2025");
        let err = orchestrator
            .update_case_after_meeting(SAMPLE_CLIENT, meeting.clone())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");

        meeting.meeting_date = "2025-03-14".to_string();
        meeting.banker_notes = vec!["  ".to_string()];
        assert!(orchestrator
            .update_case_after_meeting(SAMPLE_CLIENT, meeting)
            .await
            .is_err());

        assert!(generator.agents_called().await.is_empty());
    }

    #[test]
    fn test_origin_key_is_deterministic() {
        let a = task_origin_key("ATB-SME-001", "Collect balance sheet", "2025-03-14");
        let b = task_origin_key("ATB-SME-001", "Collect balance sheet", "2025-03-14");
        let c = task_origin_key("ATB-SME-001", "Collect balance sheet", "2025-03-15");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
