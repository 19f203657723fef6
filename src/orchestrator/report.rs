//! Markdown rendering of a prep pack. Output depends only on the pack.

use crate::models::PrepPack;
use std::fmt::Write;

pub const HUMAN_APPROVAL_BANNER: &str = "> [!WARNING]\n> Human Verification Required\n\n";

pub fn render_report(pack: &PrepPack, client_id: &str) -> String {
    let snapshot = &pack.snapshot;
    let brief = &pack.fiche_visite;
    let risk = &pack.risk_assessment;
    let plan = &pack.opportunities;

    let mut md = String::new();

    // Writing into a String cannot fail.
    let _ = writeln!(
        md,
        "# Client Prep Pack: {} ({})\n",
        snapshot.company_name, client_id
    );
    let _ = writeln!(
        md,
        "**Date:** {} | **Segment:** {}\n",
        pack.generated_at.format("%Y-%m-%d"),
        snapshot.segment
    );

    // ===== Section 1 =====
    md.push_str("## 1. Fiche de Visite (Executive Brief)\n");
    let _ = writeln!(md, "**Objective:** {}\n", brief.objective);
    let _ = writeln!(md, "{}\n", brief.situation_summary);

    md.push_str("**Key Figures:**\n");
    for figure in &brief.key_figures {
        let _ = writeln!(md, "- **{}:** {}", figure.label, figure.value);
    }

    if !brief.vigilance_points.is_empty() {
        md.push_str("\n**Vigilance Points:**\n");
        for point in &brief.vigilance_points {
            let _ = writeln!(md, "- {}", point);
        }
    }

    // ===== Section 2 =====
    md.push_str("\n## 2. Risk & Compliance\n");
    if risk.requires_human_approval {
        md.push_str(HUMAN_APPROVAL_BANNER);
    }

    md.push_str("**Flags:**\n");
    for flag in &risk.risk_flags {
        let reference = flag
            .regulation_reference
            .as_deref()
            .filter(|r| !r.is_empty())
            .map(|r| format!(" (Ref: {})", r))
            .unwrap_or_default();
        let _ = writeln!(
            md,
            "- [{}] {}: {} (Impact: {}){}",
            flag.severity, flag.risk_type, flag.description, flag.impact, reference
        );
    }

    if !risk.verification_checklist.is_empty() {
        md.push_str("\n**Verification Checklist:**\n");
        for item in &risk.verification_checklist {
            let _ = writeln!(md, "- [ ] {}", item);
        }
    }

    if !risk.guardrails.is_empty() {
        md.push_str("\n**Do Not:**\n");
        for item in &risk.guardrails {
            let _ = writeln!(md, "- {}", item);
        }
    }

    // ===== Section 3 =====
    md.push_str("\n## 3. Credit Committee Proposals\n");
    for proposal in &plan.recommended_structure {
        let _ = writeln!(
            md,
            "### {} ({})",
            proposal.product_name,
            proposal.amount_proposal.as_deref().unwrap_or("TBD")
        );
        let _ = writeln!(md, "**Purpose:** {}", proposal.purpose);
        let _ = writeln!(md, "**Financial Logic:** {}", proposal.financial_justification);
        let _ = writeln!(md, "**Mitigation:** {}\n", proposal.mitigation_factors);
    }

    // ===== Section 4 =====
    md.push_str("\n## 4. Meeting Agenda & Questions\n");
    for item in &brief.agenda {
        let _ = writeln!(md, "- {}", item);
    }

    md.push_str("\n**Discovery Questions:**\n");
    for question in &brief.discovery_questions {
        let _ = writeln!(md, "- {}", question);
    }

    md
}
