//! The five relationship-banking agents.
//!
//! Each method builds its task prompt from the upstream outputs and the
//! knowledge base, then delegates to `generate_structured`.

use super::{
    generate_structured, StructuredGenerator, AFTER_MEETING_AGENT, CLIENT_BRIEF_AGENT,
    DATA_RETRIEVER_AGENT, OPPORTUNITY_AGENT, RISK_COMPLIANCE_AGENT,
};
use crate::knowledge::{standard_simulations, KnowledgeBase};
use crate::models::{
    AfterMeetingResult, FicheDeVisite, MeetingInput, NormalizedSnapshot, OpportunityPlan,
    RawClientRecord, RiskAssessment,
};
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct RelationshipAgents {
    generator: Arc<dyn StructuredGenerator>,
    knowledge: Arc<KnowledgeBase>,
    timeout: Duration,
}

fn pretty<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

impl RelationshipAgents {
    pub fn new(
        generator: Arc<dyn StructuredGenerator>,
        knowledge: Arc<KnowledgeBase>,
        timeout: Duration,
    ) -> Self {
        Self {
            generator,
            knowledge,
            timeout,
        }
    }

    pub fn generator(&self) -> Arc<dyn StructuredGenerator> {
        Arc::clone(&self.generator)
    }

    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Agent 1: raw data groups → normalized snapshot.
    pub async fn normalize(&self, record: &RawClientRecord) -> Result<NormalizedSnapshot> {
        let prompt = format!(
            "Normalize the raw client data for {client_id} into a clean snapshot.\n\
             Raw Data:\n{raw}\n\
             Instructions:\n\
             - Extract key CRM info, financial summary (metrics), active products and recent interaction summaries.\n\
             - Include 'centrale_risques' data if available (this is CRITICAL).\n\
             - Identify any critical missing documents.\n\
             - Do NOT invent data. If something is missing, leave it empty or note it in 'missing_data'.",
            client_id = record.client_id,
            raw = pretty(&record.groups)?,
        );

        generate_structured(self.generator.as_ref(), DATA_RETRIEVER_AGENT, prompt, self.timeout)
            .await
    }

    /// Agent 2: snapshot → Fiche de Visite, written in `language`.
    pub async fn brief(&self, snapshot: &NormalizedSnapshot, language: &str) -> Result<FicheDeVisite> {
        let prompt = format!(
            "Act as a relationship manager (Chargé de Clientèle). Prepare the 'Fiche de Visite'.\n\
             Output language: {language}\n\
             Snapshot:\n{snapshot}\n\
             Instructions:\n\
             - 'objective': define the clear goal of the visit (e.g. 'Renouvellement dossier', 'Prospection').\n\
             - 'key_figures': extract turnover, total commitment and unpaid amounts (from the BCT report).\n\
             - 'vigilance_points': highlight expired documents or BCT anomalies.\n\
             - 'agenda': steps for the meeting.\n\
             - 'discovery_questions': sales questions.",
            language = language,
            snapshot = pretty(snapshot)?,
        );

        generate_structured(self.generator.as_ref(), CLIENT_BRIEF_AGENT, prompt, self.timeout)
            .await
    }

    /// Agent 3: snapshot + brief + BCT circulars → risk assessment.
    pub async fn assess_risk(
        &self,
        snapshot: &NormalizedSnapshot,
        brief: &FicheDeVisite,
    ) -> Result<RiskAssessment> {
        let regulations = self.knowledge.search_regulations(&[]);

        let prompt = format!(
            "Analyze risk and compliance.\n\
             Snapshot:\n{snapshot}\n\
             Brief:\n{brief}\n\
             Relevant BCT Regulations:\n{regulations}\n\
             Instructions:\n\
             - Flag risks (KYC, financial, behavioral).\n\
             - CITE specific BCT circulars in your risk flags where applicable.\n\
             - Create a strict verification checklist.\n\
             - List DO NOT DO actions (guardrails).\n\
             - Set requires_human_approval to true.",
            snapshot = pretty(snapshot)?,
            brief = pretty(brief)?,
            regulations = pretty(&regulations)?,
        );

        generate_structured(self.generator.as_ref(), RISK_COMPLIANCE_AGENT, prompt, self.timeout)
            .await
    }

    /// Agent 4: snapshot + brief + catalog + loan cheat sheet → credit proposals.
    pub async fn plan_opportunities(
        &self,
        snapshot: &NormalizedSnapshot,
        brief: &FicheDeVisite,
    ) -> Result<OpportunityPlan> {
        let prompt = format!(
            "Act as a Credit Analyst. Prepare arguments for the Credit Committee.\n\
             Snapshot:\n{snapshot}\n\
             Catalog:\n{catalog}\n\
             Financial Cheat Sheet:\n{simulations}\n\
             Fiche de Visite Summary: {summary}\n\
             Instructions:\n\
             - Propose a credit structure (amount, purpose).\n\
             - JUSTIFY the proposal with financial logic (cash flow vs repayment).\n\
             - Mention mitigation factors for any risk.\n\
             - List next actions as tasks.",
            snapshot = pretty(snapshot)?,
            catalog = pretty(self.knowledge.product_catalog())?,
            simulations = standard_simulations(),
            summary = brief.situation_summary,
        );

        generate_structured(self.generator.as_ref(), OPPORTUNITY_AGENT, prompt, self.timeout)
            .await
    }

    /// Agent 5: banker notes → minutes, tasks, draft email, reminders.
    pub async fn after_meeting(
        &self,
        client_id: &str,
        meeting: &MeetingInput,
    ) -> Result<AfterMeetingResult> {
        let prompt = format!(
            "Act as a Secretary. Finalize the file after the visit.\n\
             Client ID: {client_id}\n\
             Date: {date}\n\
             Meeting type: {meeting_type}\n\
             Notes:\n{notes}\n\
             Instructions:\n\
             - Write formal official minutes ('Compte-rendu de visite').\n\
             - List specific tasks (e.g. collect balance sheet, sign contracts).\n\
             - Draft an email to the client.\n\
             - Propose reminders for dated follow-ups.\n\
             - Set action_committee_required when new credit is requested.",
            client_id = client_id,
            date = meeting.meeting_date,
            meeting_type = meeting.meeting_type,
            notes = pretty(&meeting.banker_notes)?,
        );

        generate_structured(self.generator.as_ref(), AFTER_MEETING_AGENT, prompt, self.timeout)
            .await
    }
}
