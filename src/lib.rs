//! Relationship Copilot
//!
//! A banker's assistant for SME client relationships that:
//! - Builds client prep packs through a pipeline of structured agents
//! - Updates the client case after a meeting, then derives the
//!   interaction log, document vault and reminders from it
//! - Fills action slots over a multi-turn conversation and dispatches
//!   the action once every required slot is collected, over HTTP or a
//!   Telegram chat
//!
//! PREP PACK:
//! RAW RECORD → NORMALIZE → BRIEF → RISK → OPPORTUNITIES → REPORT → NOTIFY

pub mod agents;
pub mod api;
pub mod app;
pub mod clock;
pub mod config;
pub mod conversation;
pub mod dispatcher;
pub mod error;
pub mod gemini;
pub mod knowledge;
pub mod models;
pub mod notifier;
pub mod orchestrator;
pub mod store;
pub mod telegram_bot;

#[cfg(test)]
mod test_support;

pub use error::Result;

// Re-export common types
pub use app::Copilot;
pub use config::Config;
pub use orchestrator::Orchestrator;
