//! Core data models for the relationship copilot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

pub type JsonMap = Map<String, Value>;

/// Data sources that make up a raw client record.
pub const CLIENT_DATA_GROUPS: [&str; 7] = [
    "crm_profile",
    "account_summary",
    "products_owned",
    "interactions_log",
    "document_vault_index",
    "client_case",
    "centrale_des_risques",
];

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[serde(alias = "High", alias = "HIGH")]
    High,
    #[serde(alias = "Medium", alias = "MEDIUM")]
    Medium,
    #[serde(alias = "Low", alias = "LOW")]
    Low,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[serde(alias = "High", alias = "HIGH")]
    High,
    #[default]
    #[serde(alias = "Medium", alias = "MEDIUM")]
    Medium,
    #[serde(alias = "Low", alias = "LOW")]
    Low,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Done,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    #[default]
    Pending,
    Sent,
    Dismissed,
}

//
// ================= Raw data =================
//

/// Snapshot of every data group stored for a client, as of load time.
/// A missing group is an empty object, never an absent key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawClientRecord {
    pub client_id: String,
    pub groups: BTreeMap<String, Value>,
}

impl RawClientRecord {
    pub fn new(client_id: impl Into<String>, mut groups: BTreeMap<String, Value>) -> Self {
        for name in CLIENT_DATA_GROUPS {
            groups
                .entry(name.to_string())
                .or_insert_with(|| Value::Object(JsonMap::new()));
        }

        Self {
            client_id: client_id.into(),
            groups,
        }
    }

    pub fn group(&self, name: &str) -> Option<&Value> {
        self.groups.get(name)
    }
}

//
// ================= Agent 1: Data retriever =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CentraleDesRisques {
    pub total_commitment_market: f64,
    /// 0 = sound, 1 = watch, 2 = uncertain, 3 = worrying, 4 = compromised
    pub worst_class: u8,
    pub unpaid_amount: f64,
    #[serde(default)]
    pub bct_notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedSnapshot {
    pub client_id: String,
    pub company_name: String,
    pub segment: String,
    #[serde(default)]
    pub crm_data: JsonMap,
    #[serde(default)]
    pub financial_summary: JsonMap,
    #[serde(default)]
    pub products_held: Vec<Value>,
    #[serde(default)]
    pub recent_interactions: Vec<Value>,
    #[serde(default)]
    pub document_status: JsonMap,
    #[serde(default)]
    pub centrale_risques: Option<CentraleDesRisques>,
    #[serde(default)]
    pub missing_data: Vec<String>,
}

//
// ================= Agent 2: Fiche de visite =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyFigure {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FicheDeVisite {
    pub objective: String,
    pub situation_summary: String,
    /// Kept in the order the agent produced them.
    #[serde(default)]
    pub key_figures: Vec<KeyFigure>,
    #[serde(default)]
    pub vigilance_points: Vec<String>,
    #[serde(default)]
    pub agenda: Vec<String>,
    #[serde(default)]
    pub discovery_questions: Vec<String>,
}

//
// ================= Agent 3: Risk & compliance =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFlag {
    pub risk_type: String,
    pub description: String,
    pub severity: Severity,
    pub impact: String,
    #[serde(default)]
    pub regulation_reference: Option<String>,
}

fn always_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    #[serde(default)]
    pub risk_flags: Vec<RiskFlag>,
    #[serde(default)]
    pub verification_checklist: Vec<String>,
    /// "Do not do" guardrails for the banker.
    #[serde(default)]
    pub guardrails: Vec<String>,
    #[serde(default)]
    pub compliance_notes: String,
    #[serde(default = "always_true")]
    pub requires_human_approval: bool,
}

//
// ================= Agent 4: Opportunities =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditProposal {
    pub product_name: String,
    #[serde(default)]
    pub amount_proposal: Option<String>,
    pub purpose: String,
    pub financial_justification: String,
    #[serde(default)]
    pub mitigation_factors: String,
    #[serde(default)]
    pub estimated_revenue: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunityPlan {
    #[serde(default)]
    pub recommended_structure: Vec<CreditProposal>,
    #[serde(default)]
    pub quick_checklist: Vec<String>,
    #[serde(default)]
    pub next_actions: Vec<Task>,
    #[serde(default)]
    pub missing_data: Vec<String>,
}

//
// ================= Tasks & reminders =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    #[serde(default)]
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    /// Hash of client id, description and meeting date. Recorded only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reminder {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub client_id: String,
    pub message: String,
    pub due_date: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: ReminderStatus,
    #[serde(default)]
    pub trigger_dates: Vec<String>,
    #[serde(default)]
    pub linked_task_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

//
// ================= Agent 5: After meeting =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AfterMeetingResult {
    pub official_minutes: String,
    #[serde(default)]
    pub updated_tasks: Vec<Task>,
    pub draft_email_subject: String,
    pub draft_email_body: String,
    #[serde(default)]
    pub new_reminders: Vec<Reminder>,
    #[serde(default)]
    pub action_committee_required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingInput {
    pub meeting_date: String,
    #[serde(default = "default_meeting_type")]
    pub meeting_type: String,
    #[serde(default)]
    pub banker_notes: Vec<String>,
}

fn default_meeting_type() -> String {
    "visit".to_string()
}

//
// ================= Prep pack =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepPack {
    pub snapshot: NormalizedSnapshot,
    pub fiche_visite: FicheDeVisite,
    pub risk_assessment: RiskAssessment,
    pub opportunities: OpportunityPlan,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepPackOutput {
    pub prep_pack: PrepPack,
    pub report_markdown: String,
    pub report_location: String,
}

//
// ================= Durable records =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DraftEmail {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseHistoryEntry {
    pub date: String,
    #[serde(rename = "type")]
    pub meeting_type: String,
    pub minutes: String,
    pub draft_email: DraftEmail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseFile {
    pub client_id: String,
    #[serde(default)]
    pub case_history: Vec<CaseHistoryEntry>,
    #[serde(default)]
    pub current_tasks: Vec<Task>,
    /// Fields written by other tools are carried through untouched.
    #[serde(flatten)]
    pub extra: JsonMap,
}

impl CaseFile {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            case_history: Vec::new(),
            current_tasks: Vec::new(),
            extra: JsonMap::new(),
        }
    }
}

/// One line of the client's interaction log (newest first on disk).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionEntry {
    pub date: String,
    #[serde(rename = "type")]
    pub interaction_type: String,
    pub summary: String,
    #[serde(default)]
    pub outcome: String,
    #[serde(flatten)]
    pub extra: JsonMap,
}

/// Mint an identifier like `task_3f9a12bc`. Not checked for collisions.
pub fn mint_id(prefix: &str) -> String {
    let raw = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &raw[..8])
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(format!("priority '{}' must be high, medium or low", other)),
        }
    }
}
