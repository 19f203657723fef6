//! Output schemas the agents are asked to follow.
//!
//! Each skeleton mirrors the serde shape of the target type; the model
//! sees it verbatim in the prompt.

use super::AgentOutput;
use crate::models::{
    AfterMeetingResult, FicheDeVisite, NormalizedSnapshot, OpportunityPlan, RiskAssessment,
};
use serde_json::{json, Value};

fn task_schema() -> Value {
    json!({
        "description": "string",
        "status": "pending | in_progress | done",
        "due_date": "YYYY-MM-DD or null",
        "priority": "high | medium | low"
    })
}

impl AgentOutput for NormalizedSnapshot {
    fn schema() -> Value {
        json!({
            "client_id": "string",
            "company_name": "string",
            "segment": "string",
            "crm_data": {"<field>": "any"},
            "financial_summary": {"<metric>": "any"},
            "products_held": [{"<field>": "any"}],
            "recent_interactions": [{"<field>": "any"}],
            "document_status": {"<document>": "any"},
            "centrale_risques": {
                "total_commitment_market": "number",
                "worst_class": "integer 0-4 (0=Saine, 1=Surveiller, 2=Incertain, 3=Préoccupant, 4=Compromis)",
                "unpaid_amount": "number",
                "bct_notes": "string"
            },
            "missing_data": ["string"]
        })
    }

    fn validate(&self) -> Result<(), String> {
        if self.company_name.trim().is_empty() {
            return Err("snapshot has no company_name".to_string());
        }
        if let Some(report) = &self.centrale_risques {
            if report.worst_class > 4 {
                return Err(format!(
                    "centrale_risques.worst_class {} outside 0-4",
                    report.worst_class
                ));
            }
        }
        Ok(())
    }
}

impl AgentOutput for FicheDeVisite {
    fn schema() -> Value {
        json!({
            "objective": "string",
            "situation_summary": "string",
            "key_figures": [{"label": "string", "value": "string"}],
            "vigilance_points": ["string"],
            "agenda": ["string"],
            "discovery_questions": ["string"]
        })
    }

    fn validate(&self) -> Result<(), String> {
        if self.objective.trim().is_empty() {
            return Err("brief has no objective".to_string());
        }
        Ok(())
    }
}

impl AgentOutput for RiskAssessment {
    fn schema() -> Value {
        json!({
            "risk_flags": [{
                "risk_type": "string",
                "description": "string",
                "severity": "high | medium | low",
                "impact": "string",
                "regulation_reference": "string or null"
            }],
            "verification_checklist": ["string"],
            "guardrails": ["string"],
            "compliance_notes": "string",
            "requires_human_approval": true
        })
    }
}

impl AgentOutput for OpportunityPlan {
    fn schema() -> Value {
        json!({
            "recommended_structure": [{
                "product_name": "string",
                "amount_proposal": "string or null",
                "purpose": "string",
                "financial_justification": "string",
                "mitigation_factors": "string",
                "estimated_revenue": "string"
            }],
            "quick_checklist": ["string"],
            "next_actions": [task_schema()],
            "missing_data": ["string"]
        })
    }
}

impl AgentOutput for AfterMeetingResult {
    fn schema() -> Value {
        json!({
            "official_minutes": "string",
            "updated_tasks": [task_schema()],
            "draft_email_subject": "string",
            "draft_email_body": "string",
            "new_reminders": [{
                "message": "string",
                "due_date": "YYYY-MM-DD",
                "priority": "high | medium | low",
                "linked_task_id": "string or null"
            }],
            "action_committee_required": "boolean"
        })
    }

    fn validate(&self) -> Result<(), String> {
        if self.official_minutes.trim().is_empty() {
            return Err("after-meeting result has no official_minutes".to_string());
        }
        Ok(())
    }
}
