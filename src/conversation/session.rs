//! Conversation sessions
//!
//! A session holds the bounded message history and the slot-filling state
//! for one chat. Sessions are created lazily, expire after an idle TTL and
//! are stored in memory or in Postgres when a database URL is configured.

use super::intents::Intent;
use crate::error::OrchestrationError;
use crate::models::JsonMap;
use crate::store::KeyedLocks;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OnceCell, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

/// Messages kept per session. Older ones are dropped first.
pub const MAX_HISTORY: usize = 20;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Collecting,
    Ready,
}

/// Slot-filling state carried between turns.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    #[serde(default)]
    pub intent: Option<Intent>,
    #[serde(default)]
    pub collected_params: JsonMap,
    #[serde(default)]
    pub missing_slots: Vec<String>,
}

impl SessionState {
    pub fn phase(&self) -> Phase {
        match self.intent {
            None => Phase::Idle,
            Some(_) if self.missing_slots.is_empty() => Phase::Ready,
            Some(_) => Phase::Collecting,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub session_id: String,
    pub state: SessionState,
    messages: VecDeque<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationSession {
    pub fn new(session_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            state: SessionState::default(),
            messages: VecDeque::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push_message(&mut self, role: MessageRole, content: impl Into<String>, now: DateTime<Utc>) {
        self.messages.push_back(ChatMessage {
            role,
            content: content.into(),
            timestamp: now,
        });
        while self.messages.len() > MAX_HISTORY {
            self.messages.pop_front();
        }
        self.updated_at = now;
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// The `n` most recent messages, oldest first.
    pub fn recent_messages(&self, n: usize) -> Vec<ChatMessage> {
        let skip = self.messages.len().saturating_sub(n);
        self.messages.iter().skip(skip).cloned().collect()
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        chrono::Duration::from_std(ttl)
            .map(|ttl| now - self.updated_at > ttl)
            .unwrap_or(false)
    }
}

enum SessionBackend {
    InMemory {
        sessions: Arc<RwLock<HashMap<String, ConversationSession>>>,
    },
    Postgres {
        pool: PgPool,
        schema_ready: Arc<OnceCell<()>>,
    },
}

/// Keyed session storage with idle expiry and one turn in flight per session.
pub struct SessionStore {
    backend: SessionBackend,
    ttl: Duration,
    turn_locks: KeyedLocks,
}

fn database_error(context: &str, e: impl std::fmt::Display) -> OrchestrationError {
    OrchestrationError::DatabaseError(format!("{}: {}", context, e))
}

/// An unreadable timestamp fails the load; it never passes for "now".
fn row_timestamp(
    value: std::result::Result<DateTime<Utc>, sqlx::Error>,
) -> Result<DateTime<Utc>> {
    value.map_err(|e| database_error("Malformed session row", e))
}

impl SessionStore {
    pub fn in_memory(ttl: Duration) -> Self {
        Self {
            backend: SessionBackend::InMemory {
                sessions: Arc::new(RwLock::new(HashMap::new())),
            },
            ttl,
            turn_locks: KeyedLocks::new(),
        }
    }

    /// Postgres when a URL is given and usable, in-memory otherwise.
    pub fn from_database_url(database_url: Option<&str>, ttl: Duration) -> Self {
        if let Some(url) = database_url {
            match sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect_lazy(url)
            {
                Ok(pool) => {
                    info!("Session store backend: postgres");
                    return Self {
                        backend: SessionBackend::Postgres {
                            pool,
                            schema_ready: Arc::new(OnceCell::new()),
                        },
                        ttl,
                        turn_locks: KeyedLocks::new(),
                    };
                }
                Err(error) => {
                    warn!(
                        "Failed to initialize postgres session backend, falling back to in-memory: {}",
                        error
                    );
                }
            }
        }

        info!("Session store backend: in-memory");
        Self::in_memory(ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Held for the whole turn; a second turn on the same session waits.
    pub async fn lock_turn(&self, session_id: &str) -> OwnedMutexGuard<()> {
        self.turn_locks.acquire(session_id).await
    }

    async fn ensure_schema_if_needed(&self) -> Result<()> {
        let SessionBackend::Postgres { pool, schema_ready } = &self.backend else {
            return Ok(());
        };

        schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS conversation_sessions (
                      session_id TEXT PRIMARY KEY,
                      state TEXT NOT NULL,
                      messages TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL,
                      updated_at TIMESTAMPTZ NOT NULL
                    );
                    "#,
                )
                .execute(pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| database_error("Failed to initialize session schema", e))?;

        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<ConversationSession>> {
        match &self.backend {
            SessionBackend::InMemory { sessions } => {
                Ok(sessions.read().await.get(session_id).cloned())
            }
            SessionBackend::Postgres { pool, .. } => {
                self.ensure_schema_if_needed().await?;

                let row = sqlx::query(
                    r#"
                    SELECT state, messages, created_at, updated_at
                    FROM conversation_sessions
                    WHERE session_id = $1
                    "#,
                )
                .bind(session_id)
                .fetch_optional(pool)
                .await
                .map_err(|e| database_error("Failed to load session", e))?;

                let Some(row) = row else {
                    return Ok(None);
                };

                let state: String = row
                    .try_get("state")
                    .map_err(|e| database_error("Malformed session row", e))?;
                let messages: String = row
                    .try_get("messages")
                    .map_err(|e| database_error("Malformed session row", e))?;

                Ok(Some(ConversationSession {
                    session_id: session_id.to_string(),
                    state: serde_json::from_str(&state)?,
                    messages: serde_json::from_str(&messages)?,
                    created_at: row_timestamp(row.try_get("created_at"))?,
                    updated_at: row_timestamp(row.try_get("updated_at"))?,
                }))
            }
        }
    }

    /// Current session, or a fresh one when absent or idle past the TTL.
    pub async fn load_or_create(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ConversationSession> {
        match self.load(session_id).await? {
            Some(session) if !session.is_expired(now, self.ttl) => Ok(session),
            Some(_) => {
                debug!(session_id = %session_id, "Session expired, starting fresh");
                Ok(ConversationSession::new(session_id, now))
            }
            None => Ok(ConversationSession::new(session_id, now)),
        }
    }

    /// Persist the session. The in-memory backend also drops every other
    /// session idle past the TTL at the saved session's `updated_at`.
    pub async fn save(&self, session: &ConversationSession) -> Result<()> {
        match &self.backend {
            SessionBackend::InMemory { sessions } => {
                let mut locked = sessions.write().await;
                let before = locked.len();
                locked.retain(|_, other| !other.is_expired(session.updated_at, self.ttl));
                let evicted = before - locked.len();
                if evicted > 0 {
                    debug!(evicted, "Expired sessions evicted");
                }
                locked.insert(session.session_id.clone(), session.clone());
                Ok(())
            }
            SessionBackend::Postgres { pool, .. } => {
                self.ensure_schema_if_needed().await?;

                sqlx::query(
                    r#"
                    INSERT INTO conversation_sessions
                      (session_id, state, messages, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (session_id) DO UPDATE
                      SET state = EXCLUDED.state,
                          messages = EXCLUDED.messages,
                          updated_at = EXCLUDED.updated_at
                    "#,
                )
                .bind(&session.session_id)
                .bind(serde_json::to_string(&session.state)?)
                .bind(serde_json::to_string(&session.messages)?)
                .bind(session.created_at)
                .bind(session.updated_at)
                .execute(pool)
                .await
                .map_err(|e| database_error("Failed to save session", e))?;

                Ok(())
            }
        }
    }

    /// Sessions currently held by the in-memory backend.
    pub async fn resident_count(&self) -> Option<usize> {
        match &self.backend {
            SessionBackend::InMemory { sessions } => Some(sessions.read().await.len()),
            SessionBackend::Postgres { .. } => None,
        }
    }

    /// Drop every session idle past the TTL. Returns how many were removed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        match &self.backend {
            SessionBackend::InMemory { sessions } => {
                let mut locked = sessions.write().await;
                let before = locked.len();
                locked.retain(|_, session| !session.is_expired(now, self.ttl));
                Ok(before - locked.len())
            }
            SessionBackend::Postgres { pool, .. } => {
                self.ensure_schema_if_needed().await?;

                let cutoff = chrono::Duration::from_std(self.ttl)
                    .map(|ttl| now - ttl)
                    .map_err(|e| OrchestrationError::Config(format!("session TTL too large: {}", e)))?;

                let result = sqlx::query("DELETE FROM conversation_sessions WHERE updated_at < $1")
                    .bind(cutoff)
                    .execute(pool)
                    .await
                    .map_err(|e| database_error("Failed to purge sessions", e))?;

                Ok(result.rows_affected() as usize)
            }
        }
    }
}
