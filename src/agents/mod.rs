//! Structured agent invocation boundary
//!
//! An agent call is a prompt plus a target schema. The generator returns
//! JSON; the result is accepted only if it deserializes into the target
//! type and passes that type's checks. No retries here.

use crate::error::OrchestrationError;
use crate::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

pub mod gemini;
pub mod relationship;
pub mod schemas;

pub use gemini::GeminiGenerator;
pub use relationship::RelationshipAgents;

pub const DATA_RETRIEVER_AGENT: &str = "data_retriever_agent";
pub const CLIENT_BRIEF_AGENT: &str = "client_brief_agent";
pub const RISK_COMPLIANCE_AGENT: &str = "risk_compliance_agent";
pub const OPPORTUNITY_AGENT: &str = "opportunity_agent";
pub const AFTER_MEETING_AGENT: &str = "after_meeting_agent";
pub const CONVERSATION_AGENT: &str = "conversation_agent";

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub agent: &'static str,
    pub prompt: String,
    /// JSON skeleton of the expected output.
    pub schema: Value,
}

/// Trait for structured generation (LLM controlled)
#[async_trait]
pub trait StructuredGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<Value>;
}

/// A type an agent can be asked to produce.
pub trait AgentOutput: DeserializeOwned + Send {
    fn schema() -> Value;

    /// Checks serde cannot express. Runs after deserialization.
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Invoke `agent` and validate its answer as `T`, bounded by `timeout`.
/// Every failure comes back as `OrchestrationError::Generation`.
pub async fn generate_structured<T: AgentOutput>(
    generator: &dyn StructuredGenerator,
    agent: &'static str,
    prompt: String,
    timeout: Duration,
) -> Result<T> {
    let request = GenerationRequest {
        agent,
        prompt,
        schema: T::schema(),
    };

    info!(agent, "Agent invoked");
    let started = Instant::now();

    let value = match tokio::time::timeout(timeout, generator.generate(&request)).await {
        Ok(Ok(value)) => value,
        Ok(Err(e @ OrchestrationError::Generation { .. })) => return Err(e),
        Ok(Err(e)) => return Err(OrchestrationError::generation(agent, e.to_string())),
        Err(_) => {
            warn!(agent, timeout_secs = timeout.as_secs(), "Agent timed out");
            return Err(OrchestrationError::generation(
                agent,
                format!("timed out after {}s", timeout.as_secs()),
            ));
        }
    };

    let output: T = serde_json::from_value(value).map_err(|e| {
        OrchestrationError::generation(agent, format!("output does not match schema: {}", e))
    })?;

    output
        .validate()
        .map_err(|reason| OrchestrationError::generation(agent, reason))?;

    info!(
        agent,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Agent finished successfully"
    );

    Ok(output)
}

/// Scripted generator for development & testing.
/// Keeps the system functional without LLM dependency.
///
/// Queued answers for an agent are consumed first, then its fixed answer.
#[derive(Default)]
pub struct ScriptedGenerator {
    fixed: HashMap<String, Value>,
    queued: Mutex<HashMap<String, VecDeque<std::result::Result<Value, String>>>>,
    calls: Mutex<Vec<GenerationCall>>,
    delay: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct GenerationCall {
    pub agent: String,
    pub prompt: String,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every call to `agent` with `value`.
    pub fn with_response(mut self, agent: &str, value: Value) -> Self {
        self.fixed.insert(agent.to_string(), value);
        self
    }

    /// Sleep before answering, to exercise timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answer the next call to `agent` with `value`.
    pub async fn push_response(&self, agent: &str, value: Value) {
        let mut queued = self.queued.lock().await;
        queued.entry(agent.to_string()).or_default().push_back(Ok(value));
    }

    /// Fail the next call to `agent`.
    pub async fn push_failure(&self, agent: &str, message: &str) {
        let mut queued = self.queued.lock().await;
        queued
            .entry(agent.to_string())
            .or_default()
            .push_back(Err(message.to_string()));
    }

    pub async fn calls(&self) -> Vec<GenerationCall> {
        self.calls.lock().await.clone()
    }

    pub async fn agents_called(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .map(|call| call.agent.clone())
            .collect()
    }
}

#[async_trait]
impl StructuredGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Value> {
        self.calls.lock().await.push(GenerationCall {
            agent: request.agent.to_string(),
            prompt: request.prompt.clone(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = {
            let mut queued = self.queued.lock().await;
            queued
                .get_mut(request.agent)
                .and_then(|queue| queue.pop_front())
        };

        match next {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(OrchestrationError::generation(request.agent, message)),
            None => self.fixed.get(request.agent).cloned().ok_or_else(|| {
                OrchestrationError::generation(request.agent, "no scripted response")
            }),
        }
    }
}
