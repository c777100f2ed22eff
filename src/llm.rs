use crate::config::LlmConfig;
use crate::error::{NlqError, Result};
use crate::gateway::{Instruction, InstructionKind, ReasoningGateway};
use crate::prompts::PromptTemplates;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

const CLASSIFIER_SYSTEM_PROMPT: &str =
    "You are an expert at analyzing queries and returning results in JSON format.";

/// Structured verdict returned for `Instruction::Classify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub query_type: String,
    #[serde(default)]
    pub queries: Vec<String>,
}

impl Classification {
    pub const WRONG: &'static str = "wrong";

    /// Parse a classifier response. Markdown code fences are tolerated.
    pub fn parse(response: &str) -> Result<Self> {
        let cleaned = response
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();

        serde_json::from_str(cleaned).map_err(|e| {
            NlqError::InvalidResponse(format!(
                "Failed to parse classification: {}. Response: {}",
                e, cleaned
            ))
        })
    }

    /// Exact match on `"wrong"`; any other verdict proceeds.
    pub fn is_wrong(&self) -> bool {
        self.query_type == Self::WRONG
    }

    /// First candidate as given, or the original text when the list is empty.
    pub fn rephrased_or(&self, user_query: &str) -> String {
        self.queries
            .first()
            .map(String::as_str)
            .unwrap_or(user_query)
            .to_string()
    }
}

/// OpenAI-compatible chat-completions client.
#[derive(Clone)]
pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    templates: PromptTemplates,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: &LlmConfig, templates: PromptTemplates) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| NlqError::Config(format!("Failed to create HTTP client for LLM: {}", e)))?;

        Ok(Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            templates,
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_body(&self, instruction: &Instruction) -> serde_json::Value {
        let prompt = self.templates.render(instruction);
        match instruction.kind() {
            InstructionKind::Classify => serde_json::json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": CLASSIFIER_SYSTEM_PROMPT},
                    {"role": "user", "content": prompt}
                ],
                "temperature": self.temperature,
                "response_format": {"type": "json_object"}
            }),
            _ => serde_json::json!({
                "model": self.model,
                "messages": [
                    {"role": "user", "content": prompt}
                ],
                "temperature": self.temperature
            }),
        }
    }

    async fn call_llm(&self, body: &serde_json::Value) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| NlqError::GatewayUnavailable(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(NlqError::GatewayUnavailable(format!(
                "LLM API returned status {}: {}",
                status, text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| NlqError::InvalidResponse(format!("Failed to parse LLM response: {}", e)))?;

        response_json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| NlqError::InvalidResponse("No content in LLM response".to_string()))
    }
}

#[async_trait]
impl ReasoningGateway for LlmClient {
    async fn complete(&self, instruction: &Instruction) -> Result<String> {
        let kind = instruction.kind();
        info!("LLM {} request (model {})", kind, self.model);

        let body = self.build_body(instruction);
        match self.call_llm(&body).await {
            Ok(content) => {
                debug!("LLM {} response: {}", kind, content);
                Ok(content)
            }
            Err(e) => {
                error!("LLM {} request failed: {}", kind, e);
                Err(e)
            }
        }
    }
}
