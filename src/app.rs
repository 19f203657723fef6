//! Wiring of the copilot services from configuration.

use crate::agents::{GeminiGenerator, RelationshipAgents, StructuredGenerator};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::conversation::{ConversationEngine, ConversationService, IntentCatalog, SessionStore};
use crate::dispatcher::Dispatcher;
use crate::knowledge::KnowledgeBase;
use crate::notifier::TelegramNotifier;
use crate::orchestrator::Orchestrator;
use crate::store::{FileRecordStore, RecordStore};
use crate::Result;
use std::sync::Arc;
use tracing::{info, warn};

/// Every service behind the exposed surface, sharing one store and lock set.
#[derive(Clone)]
pub struct Copilot {
    pub orchestrator: Arc<Orchestrator>,
    pub dispatcher: Arc<Dispatcher>,
    pub conversation: Arc<ConversationService>,
    pub model: String,
}

impl Copilot {
    /// Assemble from already-built parts. Used by the binaries and by tests.
    pub fn assemble(
        orchestrator: Orchestrator,
        generator: Arc<dyn StructuredGenerator>,
        sessions: SessionStore,
        config: &Config,
    ) -> Self {
        let clock: Arc<dyn Clock> = orchestrator.clock();
        let orchestrator = Arc::new(orchestrator);
        let catalog = Arc::new(IntentCatalog::standard());

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&catalog),
            Arc::clone(&orchestrator),
        ));

        let engine = ConversationEngine::new(generator, catalog, config.agent_timeout)
            .with_client_aliases(config.client_aliases.clone());

        let conversation = Arc::new(ConversationService::new(
            engine,
            sessions,
            Arc::clone(&dispatcher),
            clock,
        ));

        Self {
            orchestrator,
            dispatcher,
            conversation,
            model: config.gemini_model.clone(),
        }
    }

    /// Gemini agents, JSON fixture store, optional Telegram notifier and
    /// Postgres sessions, all as configured.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.require_api_key()?;
        let generator: Arc<dyn StructuredGenerator> =
            Arc::new(GeminiGenerator::new(api_key.to_string(), &config.gemini_model)?);

        let knowledge =
            KnowledgeBase::load(&config.product_catalog_path, &config.regulations_path).await;
        let agents = RelationshipAgents::new(
            Arc::clone(&generator),
            Arc::new(knowledge),
            config.agent_timeout,
        );

        let store: Arc<dyn RecordStore> =
            Arc::new(FileRecordStore::new(&config.data_path, &config.output_dir));

        let mut orchestrator = Orchestrator::new(agents, store).with_clock(Arc::new(SystemClock));

        match TelegramNotifier::from_settings(
            config.telegram_bot_token.as_deref(),
            config.telegram_chat_id.as_deref(),
        ) {
            Some(Ok(notifier)) => {
                info!("Telegram notifications enabled");
                orchestrator = orchestrator.with_notifier(Arc::new(notifier));
            }
            Some(Err(e)) => warn!("Telegram notifier unavailable: {}", e),
            None => warn!("Telegram notifications disabled - missing TELEGRAM_BOT_TOKEN or TELEGRAM_CHAT_ID"),
        }

        let sessions =
            SessionStore::from_database_url(config.database_url.as_deref(), config.session_ttl);

        info!(
            model = %config.gemini_model,
            data_path = %config.data_path.display(),
            output_dir = %config.output_dir.display(),
            "Copilot initialized"
        );

        Ok(Self::assemble(orchestrator, generator, sessions, config))
    }
}
