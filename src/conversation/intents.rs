//! Intent catalog
//!
//! The fixed set of actions a banker can ask for, with the slots each one
//! needs before it can run. Consumed by the prompt builder and the
//! dispatcher alike.

use crate::models::JsonMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Wire name of "no actionable intent".
pub const NO_INTENT: &str = "none";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    #[serde(alias = "generate_briefing")]
    GeneratePrepPack,
    CreateReminder,
    LogUpdate,
    SubmitNotes,
}

impl Intent {
    pub fn wire_name(&self) -> &'static str {
        match self {
            Intent::GeneratePrepPack => "generate_prep_pack",
            Intent::CreateReminder => "create_reminder",
            Intent::LogUpdate => "log_update",
            Intent::SubmitNotes => "submit_notes",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

#[derive(Debug, Clone)]
pub struct IntentSpec {
    pub intent: Intent,
    pub aliases: &'static [&'static str],
    pub description: &'static str,
    pub required_slots: &'static [&'static str],
}

#[derive(Debug, Clone)]
pub struct IntentCatalog {
    specs: Vec<IntentSpec>,
}

impl Default for IntentCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl IntentCatalog {
    pub fn standard() -> Self {
        Self {
            specs: vec![
                IntentSpec {
                    intent: Intent::GeneratePrepPack,
                    aliases: &["generate_briefing"],
                    description: "Generate a client briefing",
                    required_slots: &["client_id"],
                },
                IntentSpec {
                    intent: Intent::CreateReminder,
                    aliases: &[],
                    description: "Set a future reminder",
                    required_slots: &["client_id", "reminder_text", "due_date", "priority"],
                },
                IntentSpec {
                    intent: Intent::LogUpdate,
                    aliases: &[],
                    description: "Log an informal client update",
                    required_slots: &["client_id", "update_type", "message"],
                },
                IntentSpec {
                    intent: Intent::SubmitNotes,
                    aliases: &[],
                    description: "Submit formal meeting notes",
                    required_slots: &["client_id", "meeting_date", "meeting_type", "notes"],
                },
            ],
        }
    }

    pub fn specs(&self) -> &[IntentSpec] {
        &self.specs
    }

    pub fn spec(&self, intent: Intent) -> Option<&IntentSpec> {
        self.specs.iter().find(|spec| spec.intent == intent)
    }

    /// Resolve a wire name or alias. Case and surrounding space are ignored.
    pub fn resolve(&self, name: &str) -> Option<Intent> {
        let name = name.trim().to_lowercase();
        self.specs
            .iter()
            .find(|spec| spec.intent.wire_name() == name || spec.aliases.contains(&name.as_str()))
            .map(|spec| spec.intent)
    }

    pub fn required_slots(&self, intent: Intent) -> &[&'static str] {
        self.spec(intent).map(|spec| spec.required_slots).unwrap_or(&[])
    }

    /// Required slots without a usable value, in catalog order.
    pub fn missing_slots(&self, intent: Intent, params: &JsonMap) -> Vec<String> {
        self.required_slots(intent)
            .iter()
            .filter(|slot| !params.get(**slot).map_or(false, is_filled))
            .map(|slot| slot.to_string())
            .collect()
    }

    /// Numbered action list for the classifier prompt.
    pub fn prompt_listing(&self) -> String {
        self.specs
            .iter()
            .enumerate()
            .map(|(i, spec)| {
                format!(
                    "{}. {}: {} (needs: {})",
                    i + 1,
                    spec.intent.wire_name(),
                    spec.description,
                    spec.required_slots.join(", ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A slot counts as collected unless it is null, blank, or an empty list.
pub fn is_filled(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}
