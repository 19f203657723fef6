//! Gemini-backed structured generator
//!
//! Wraps the task prompt with the agent identity and its output schema,
//! then parses the model's answer as JSON.

use super::{GenerationRequest, StructuredGenerator};
use crate::error::OrchestrationError;
use crate::gemini::{strip_code_fence, GeminiClient};
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;

pub struct GeminiGenerator {
    client: GeminiClient,
}

impl GeminiGenerator {
    pub fn new(api_key: String, model: &str) -> Result<Self> {
        Ok(Self {
            client: GeminiClient::new(api_key, model)?,
        })
    }

    fn build_prompt(request: &GenerationRequest) -> String {
        format!(
            r#"You are the {agent}.
Your output must be strict JSON adhering to the following schema:
{schema}
Important: do not output markdown blocks like ```json ... ```. Just the raw JSON string.

Task:
{task}"#,
            agent = request.agent,
            schema = request.schema,
            task = request.prompt,
        )
    }
}

#[async_trait]
impl StructuredGenerator for GeminiGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Value> {
        let prompt = Self::build_prompt(request);
        let response = self.client.generate_json(request.agent, &prompt).await?;

        serde_json::from_str(strip_code_fence(&response)).map_err(|e| {
            OrchestrationError::generation(
                request.agent,
                format!("response is not valid JSON: {} | raw={}", e, response),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prompt_embeds_agent_and_schema() {
        let request = GenerationRequest {
            agent: "client_brief_agent",
            prompt: "Prepare the Fiche de Visite.".to_string(),
            schema: json!({"objective": "string"}),
        };

        let prompt = GeminiGenerator::build_prompt(&request);
        assert!(prompt.starts_with("You are the client_brief_agent."));
        assert!(prompt.contains(r#"{"objective":"string"}"#));
        assert!(prompt.ends_with("Prepare the Fiche de Visite."));
    }
}
