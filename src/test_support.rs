//! Shared fixtures for unit tests: a seeded client and canned agent answers.

use crate::agents::{
    RelationshipAgents, ScriptedGenerator, AFTER_MEETING_AGENT, CLIENT_BRIEF_AGENT,
    DATA_RETRIEVER_AGENT, OPPORTUNITY_AGENT, RISK_COMPLIANCE_AGENT,
};
use crate::clock::FixedClock;
use crate::knowledge::KnowledgeBase;
use crate::models::MeetingInput;
use crate::notifier::Notifier;
use crate::orchestrator::Orchestrator;
use crate::store::InMemoryRecordStore;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const SAMPLE_CLIENT: &str = "ATB-SME-001";

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap()
}

pub fn sample_groups() -> BTreeMap<String, Value> {
    let mut groups = BTreeMap::new();
    groups.insert(
        "crm_profile".to_string(),
        json!({"company_name": "SOTUPLAST", "segment": "SME", "sector": "Plastics"}),
    );
    groups.insert(
        "account_summary".to_string(),
        json!({"turnover_n": 4_200_000, "currency": "TND"}),
    );
    groups.insert(
        "client_case".to_string(),
        json!({
            "client_id": SAMPLE_CLIENT,
            "case_history": [],
            "current_tasks": [{
                "id": "task_seed0001",
                "description": "Renew KYC file",
                "status": "pending",
                "priority": "medium"
            }],
            "relationship_manager": "A. Ben Salah"
        }),
    );
    groups.insert(
        "interactions_log".to_string(),
        json!([{"date": "2025-01-10", "type": "call", "summary": "Intro call", "outcome": "ok"}]),
    );
    groups.insert(
        "document_vault_index".to_string(),
        json!({"financial_docs": [{"doc_name": "Etats financiers 2025", "status": "missing"}]}),
    );
    groups
}

pub async fn seeded_store() -> Arc<InMemoryRecordStore> {
    let store = Arc::new(InMemoryRecordStore::new());
    store.seed_client(SAMPLE_CLIENT, sample_groups()).await;
    store
}

pub fn after_meeting_json(minutes: &str) -> Value {
    json!({
        "official_minutes": minutes,
        "updated_tasks": [{
            "description": "Collect 2025 balance sheet",
            "status": "pending",
            "due_date": "2025-04-01",
            "priority": "high"
        }],
        "draft_email_subject": "Suite à notre visite",
        "draft_email_body": "Madame, Monsieur, ...",
        "new_reminders": [],
        "action_committee_required": false
    })
}

/// Answers every pipeline agent with a small valid payload.
pub fn pipeline_generator() -> Arc<ScriptedGenerator> {
    Arc::new(
        ScriptedGenerator::new()
            .with_response(
                DATA_RETRIEVER_AGENT,
                json!({
                    "client_id": SAMPLE_CLIENT,
                    "company_name": "SOTUPLAST",
                    "segment": "SME",
                    "financial_summary": {"turnover_n": "4.2M TND"},
                    "centrale_risques": {
                        "total_commitment_market": 1_500_000.0,
                        "worst_class": 0,
                        "unpaid_amount": 0.0,
                        "bct_notes": ""
                    }
                }),
            )
            .with_response(
                CLIENT_BRIEF_AGENT,
                json!({
                    "objective": "Renouvellement dossier",
                    "situation_summary": "Stable plastics manufacturer.",
                    "key_figures": [{"label": "CA N", "value": "4.2M TND"}],
                    "vigilance_points": [],
                    "agenda": ["Review activity"],
                    "discovery_questions": ["Export plans?"]
                }),
            )
            .with_response(
                RISK_COMPLIANCE_AGENT,
                json!({
                    "risk_flags": [{
                        "risk_type": "KYC",
                        "description": "KYC file due for renewal",
                        "severity": "medium",
                        "impact": "Renewal blocked until updated"
                    }],
                    "verification_checklist": ["Check RNE extract"],
                    "guardrails": ["Do not promise approval"],
                    "compliance_notes": "",
                    "requires_human_approval": true
                }),
            )
            .with_response(
                OPPORTUNITY_AGENT,
                json!({
                    "recommended_structure": [{
                        "product_name": "Crédit de Gestion",
                        "amount_proposal": "300,000 TND",
                        "purpose": "Working capital",
                        "financial_justification": "Covered by operating cash flow",
                        "mitigation_factors": "Receivables assignment"
                    }],
                    "quick_checklist": [],
                    "next_actions": [],
                    "missing_data": []
                }),
            )
            .with_response(AFTER_MEETING_AGENT, after_meeting_json("Visit held; statements pending.")),
    )
}

pub fn meeting(date: &str) -> MeetingInput {
    MeetingInput {
        meeting_date: date.to_string(),
        meeting_type: "visit".to_string(),
        banker_notes: vec!["Met the CFO".to_string(), "Wants a credit line".to_string()],
    }
}

pub fn orchestrator_with_store(
    generator: Arc<ScriptedGenerator>,
    store: Arc<InMemoryRecordStore>,
) -> Orchestrator {
    let agents = RelationshipAgents::new(
        generator,
        Arc::new(KnowledgeBase::default()),
        Duration::from_secs(5),
    );
    Orchestrator::new(agents, store).with_clock(Arc::new(FixedClock(fixed_now())))
}

pub async fn orchestrator(
    generator: Arc<ScriptedGenerator>,
) -> (Orchestrator, Arc<InMemoryRecordStore>) {
    let store = seeded_store().await;
    (orchestrator_with_store(generator, Arc::clone(&store)), store)
}

/// Records the client names it was asked to notify about.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub async fn sent(&self) -> Vec<String> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_prep_pack(&self, client_name: &str, _report_markdown: &str) -> Result<()> {
        self.sent.lock().await.push(client_name.to_string());
        if self.fail {
            return Err(crate::error::OrchestrationError::Notification(
                "channel unavailable".to_string(),
            ));
        }
        Ok(())
    }
}
