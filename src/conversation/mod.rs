//! Conversational slot filling
//!
//! MESSAGE → CLASSIFY → MERGE → [READY?] → DISPATCH → RESET
//!
//! Turns on one session run one at a time. A failed dispatch leaves the
//! session exactly as it was before the turn.

use crate::clock::Clock;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::error::OrchestrationError;
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub mod engine;
pub mod intents;
pub mod session;

pub use engine::{ConversationEngine, TurnOutcome, FALLBACK_RESPONSE, PROMPT_HISTORY};
pub use intents::{Intent, IntentCatalog};
pub use session::{ConversationSession, MessageRole, Phase, SessionState, SessionStore};

/// Upper bound on the time between two expired-session sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Reply to one chat message.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub session_id: String,
    pub response: String,
    /// Intent that was dispatched this turn, if any.
    pub action: Option<Intent>,
    pub missing_slots: Vec<String>,
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<DispatchOutcome>,
}

pub struct ConversationService {
    engine: ConversationEngine,
    sessions: SessionStore,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
}

impl ConversationService {
    pub fn new(
        engine: ConversationEngine,
        sessions: SessionStore,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engine,
            sessions,
            dispatcher,
            clock,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Evict every session idle past the TTL, as of the service clock.
    pub async fn sweep_expired_sessions(&self) -> Result<usize> {
        let evicted = self.sessions.purge_expired(self.clock.now()).await?;
        if evicted > 0 {
            info!(evicted, "Expired sessions purged");
        }
        Ok(evicted)
    }

    /// Sweep expired sessions in the background, every TTL or
    /// `SWEEP_INTERVAL`, whichever is shorter.
    pub fn spawn_session_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        let every = self
            .sessions
            .ttl()
            .min(SWEEP_INTERVAL)
            .max(Duration::from_secs(1));
        debug!(every_secs = every.as_secs(), "Session sweeper started");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep_expired_sessions().await {
                    warn!(kind = e.kind(), "Session sweep failed: {}", e);
                }
            }
        })
    }

    pub async fn process_session_message(&self, session_id: &str, message: &str) -> Result<ChatReply> {
        if session_id.trim().is_empty() {
            return Err(OrchestrationError::Validation(
                "session_id must not be empty".to_string(),
            ));
        }
        if message.trim().is_empty() {
            return Err(OrchestrationError::Validation(
                "message must not be empty".to_string(),
            ));
        }

        let _turn = self.sessions.lock_turn(session_id).await;

        let mut session = self
            .sessions
            .load_or_create(session_id, self.clock.now())
            .await?;
        let history = session.recent_messages(PROMPT_HISTORY);
        let before = session.state.clone();

        let outcome = self
            .engine
            .process_message(message, &history, &before)
            .await;
        session.push_message(MessageRole::User, message, self.clock.now());

        let (response, result) = match outcome.action {
            Some(intent) => {
                let dispatched = self
                    .dispatcher
                    .execute(intent.wire_name(), &outcome.params)
                    .await;

                if dispatched.success {
                    info!(session_id = %session_id, intent = %intent, "Action completed, session reset");
                    session.state = SessionState::default();
                    (outcome.response_text.clone(), Some(dispatched))
                } else {
                    warn!(session_id = %session_id, intent = %intent, "Action failed, session state restored");
                    session.state = before;
                    let reason = dispatched.error.clone().unwrap_or_default();
                    (
                        format!("I couldn't complete {}: {}", intent, reason),
                        Some(dispatched),
                    )
                }
            }
            None => {
                session.state = outcome.updated_state.clone();
                (outcome.response_text.clone(), None)
            }
        };

        session.push_message(MessageRole::Assistant, response.clone(), self.clock.now());
        self.sessions.save(&session).await?;

        Ok(ChatReply {
            session_id: session_id.to_string(),
            response,
            action: if result.is_some() { outcome.action } else { None },
            missing_slots: outcome.missing_slots,
            phase: session.state.phase(),
            result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{ScriptedGenerator, CONVERSATION_AGENT};
    use crate::clock::FixedClock;
    use crate::store::{InMemoryRecordStore, RecordStore, REMINDERS_GROUP};
    use crate::test_support::{self, SAMPLE_CLIENT};
    use serde_json::{json, Value};
    use std::time::Duration;

    fn extraction(intent: &str, params: Value) -> Value {
        json!({
            "intent": intent,
            "extracted_params": params,
            "missing_slots": [],
            "response": "On it."
        })
    }

    async fn service() -> (ConversationService, Arc<ScriptedGenerator>, Arc<InMemoryRecordStore>) {
        let generator = test_support::pipeline_generator();
        let (orchestrator, store) = test_support::orchestrator(Arc::clone(&generator)).await;
        let catalog = Arc::new(IntentCatalog::standard());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&catalog), Arc::new(orchestrator)));
        let engine = ConversationEngine::new(generator.clone(), catalog, Duration::from_secs(5));

        let service = ConversationService::new(
            engine,
            SessionStore::in_memory(Duration::from_secs(3600)),
            dispatcher,
            Arc::new(FixedClock(test_support::fixed_now())),
        );
        (service, generator, store)
    }

    #[tokio::test]
    async fn test_successful_dispatch_resets_session() {
        let (service, generator, store) = service().await;
        generator
            .push_response(CONVERSATION_AGENT, extraction("create_reminder", json!({"client_id": SAMPLE_CLIENT})))
            .await;
        generator
            .push_response(
                CONVERSATION_AGENT,
                extraction(
                    "create_reminder",
                    json!({"reminder_text": "Loan follow-up", "due_date": "2026-06-01", "priority": "low"}),
                ),
            )
            .await;

        let first = service.process_session_message("s1", "remind me about SOTUPLAST").await.unwrap();
        assert_eq!(first.phase, Phase::Collecting);
        assert_eq!(first.action, None);

        let second = service.process_session_message("s1", "June 1st, low, loan").await.unwrap();
        assert_eq!(second.action, Some(Intent::CreateReminder));
        assert!(second.result.unwrap().success);
        assert_eq!(second.phase, Phase::Idle);
        assert_eq!(store.load_reminders(SAMPLE_CLIENT).await.unwrap().len(), 1);

        let session = service.sessions().load_or_create("s1", test_support::fixed_now()).await.unwrap();
        assert_eq!(session.state, SessionState::default());
        assert_eq!(session.message_count(), 4);
    }

    #[tokio::test]
    async fn test_failed_dispatch_restores_pre_turn_state() {
        let (service, generator, store) = service().await;
        store.fail_writes_to(REMINDERS_GROUP).await;
        generator
            .push_response(
                CONVERSATION_AGENT,
                extraction("create_reminder", json!({"client_id": SAMPLE_CLIENT, "reminder_text": "Loan"})),
            )
            .await;
        generator
            .push_response(
                CONVERSATION_AGENT,
                extraction("create_reminder", json!({"due_date": "2026-06-01", "priority": "high"})),
            )
            .await;

        service.process_session_message("s1", "remind me").await.unwrap();
        let before = service
            .sessions()
            .load_or_create("s1", test_support::fixed_now())
            .await
            .unwrap()
            .state;

        let reply = service.process_session_message("s1", "June 1st, high").await.unwrap();

        let result = reply.result.unwrap();
        assert!(!result.success);
        assert_eq!(result.error_kind.as_deref(), Some("storage_error"));
        assert!(reply.response.starts_with("I couldn't complete create_reminder"));

        let after = service
            .sessions()
            .load_or_create("s1", test_support::fixed_now())
            .await
            .unwrap()
            .state;
        assert_eq!(after, before);
        assert_eq!(after.collected_params.len(), 2);
    }

    #[tokio::test]
    async fn test_fallback_keeps_session_state() {
        let (service, generator, _store) = service().await;
        generator
            .push_response(CONVERSATION_AGENT, extraction("log_update", json!({"client_id": SAMPLE_CLIENT})))
            .await;
        generator.push_failure(CONVERSATION_AGENT, "timeout").await;

        service.process_session_message("s1", "log an update").await.unwrap();
        let reply = service.process_session_message("s1", "blah").await.unwrap();

        assert_eq!(reply.response, FALLBACK_RESPONSE);
        assert_eq!(reply.phase, Phase::Collecting);
    }

    #[tokio::test]
    async fn test_sweep_evicts_sessions_idle_past_ttl() {
        let generator = test_support::pipeline_generator();
        let (orchestrator, _store) = test_support::orchestrator(Arc::clone(&generator)).await;
        let catalog = Arc::new(IntentCatalog::standard());
        let sessions = SessionStore::in_memory(Duration::from_secs(60));

        let stale = test_support::fixed_now() - chrono::Duration::minutes(30);
        for id in ["a", "b", "c"] {
            sessions.save(&ConversationSession::new(id, stale)).await.unwrap();
        }
        assert_eq!(sessions.resident_count().await, Some(3));

        let service = Arc::new(ConversationService::new(
            ConversationEngine::new(generator, Arc::clone(&catalog), Duration::from_secs(5)),
            sessions,
            Arc::new(Dispatcher::new(catalog, Arc::new(orchestrator))),
            Arc::new(FixedClock(test_support::fixed_now())),
        ));

        let sweeper = Arc::clone(&service).spawn_session_sweeper();
        tokio::time::sleep(Duration::from_millis(50)).await;
        sweeper.abort();

        assert_eq!(service.sessions().resident_count().await, Some(0));
        assert_eq!(service.sweep_expired_sessions().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let (service, _generator, _store) = service().await;
        let err = service.process_session_message("s1", "   ").await.unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[tokio::test]
    async fn test_concurrent_turns_on_one_session_are_serialized() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .with_response(CONVERSATION_AGENT, extraction("none", json!({})))
                .with_delay(Duration::from_millis(30)),
        );
        let store = test_support::seeded_store().await;
        let orchestrator = Arc::new(test_support::orchestrator_with_store(generator.clone(), store));
        let catalog = Arc::new(IntentCatalog::standard());
        let service = Arc::new(ConversationService::new(
            ConversationEngine::new(generator.clone(), Arc::clone(&catalog), Duration::from_secs(5)),
            SessionStore::in_memory(Duration::from_secs(3600)),
            Arc::new(Dispatcher::new(catalog, orchestrator)),
            Arc::new(FixedClock(test_support::fixed_now())),
        ));

        let a = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.process_session_message("s1", "hello").await }
        });
        let b = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.process_session_message("s1", "hi again").await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        // The second turn saw the first turn's two messages.
        let session = service
            .sessions()
            .load_or_create("s1", test_support::fixed_now())
            .await
            .unwrap();
        assert_eq!(session.message_count(), 4);

        let calls = generator.calls().await;
        assert_eq!(calls.len(), 2);
        assert!(calls[1].prompt.contains("On it."));
    }
}
