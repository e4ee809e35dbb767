// Content Generator
// Collaborator used by regenerate strategies. The engine only depends on the
// trait; `ChatCompletionGenerator` is an OpenAI-compatible implementation.

use crate::models::{GenerationOutcome, GenerationRequest};
use crate::services::config_store::GeneratorConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

const GENERATOR_TIMEOUT_SECS: u64 = 80;

const REWRITE_SYSTEM_PROMPT: &str = "You rewrite technical marketing copy about materials and surface treatment. \
Keep every fact, number, and unit exactly as given. Return only the rewritten text.";

#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Missing content in response")]
    MissingContent,
    #[error("JSON parse error: {0}")]
    JsonError(String),
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> GenerationOutcome;
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: i32,
    temperature: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Option<Vec<ChatChoice>>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessageResponse>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

pub struct ChatCompletionGenerator {
    client: Client,
    config: GeneratorConfig,
    api_key: String,
}

impl ChatCompletionGenerator {
    pub fn new(config: GeneratorConfig, api_key: impl Into<String>) -> Result<Self, GeneratorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(GENERATOR_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            config,
            api_key: api_key.into(),
        })
    }

    async fn call_chat_api(&self, user: &str) -> Result<(String, i64), GeneratorError> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: REWRITE_SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let start = Instant::now();
        let response = self
            .client
            .post(&self.config.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let latency_ms = start.elapsed().as_millis() as i64;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeneratorError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }

        let data: ChatResponse = response
            .json()
            .await
            .map_err(|e| GeneratorError::JsonError(e.to_string()))?;

        let content = data
            .choices
            .as_ref()
            .and_then(|c| c.first())
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.clone())
            .filter(|c| !c.trim().is_empty())
            .ok_or(GeneratorError::MissingContent)?;

        Ok((content, latency_ms))
    }
}

/// Build the user prompt for a rewrite request
pub fn build_prompt(request: &GenerationRequest) -> String {
    let mut prompt = format!("Material: {}\n", request.material);
    if !request.author_info.name.is_empty() {
        prompt.push_str(&format!("Author: {}", request.author_info.name));
        if let Some(country) = &request.author_info.country {
            prompt.push_str(&format!(" ({})", country));
        }
        prompt.push('\n');
    }
    if let Some(expertise) = &request.author_info.expertise {
        prompt.push_str(&format!("Expertise: {}\n", expertise));
    }
    if !request.material_data.is_null() {
        prompt.push_str(&format!("Material data: {}\n", request.material_data));
    }
    if !request.directives.is_empty() {
        prompt.push_str("Directives:\n");
        for d in &request.directives {
            prompt.push_str(&format!("- {}\n", d));
        }
    }
    prompt.push_str("\nText:\n");
    prompt.push_str(&request.current_content);
    prompt
}

#[async_trait]
impl ContentGenerator for ChatCompletionGenerator {
    async fn generate(&self, request: &GenerationRequest) -> GenerationOutcome {
        match self.call_chat_api(&build_prompt(request)).await {
            Ok((content, latency_ms)) => {
                info!(
                    "[GENERATOR] model={} material={} latency_ms={} chars={}",
                    self.config.model,
                    request.material,
                    latency_ms,
                    content.chars().count()
                );
                GenerationOutcome::ok(content.trim())
            }
            Err(e) => {
                warn!("[GENERATOR] model={} material={} failed: {}", self.config.model, request.material, e);
                GenerationOutcome::failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuthorInfo;

    fn request() -> GenerationRequest {
        GenerationRequest {
            material: "Aluminum".to_string(),
            material_data: serde_json::json!({"density": "2.70 g/cm³"}),
            author_info: AuthorInfo {
                name: "Alessandro".to_string(),
                country: Some("Italy".to_string()),
                expertise: None,
            },
            current_content: "Aluminum cleans well.".to_string(),
            directives: vec!["Use first person".to_string()],
        }
    }

    #[test]
    fn test_prompt_contains_context() {
        let prompt = build_prompt(&request());
        assert!(prompt.contains("Material: Aluminum"));
        assert!(prompt.contains("Author: Alessandro (Italy)"));
        assert!(prompt.contains("2.70 g/cm³"));
        assert!(prompt.contains("- Use first person"));
        assert!(prompt.ends_with("Aluminum cleans well."));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_reports_failure() {
        let config = GeneratorConfig {
            url: "http://127.0.0.1:9/v1/chat/completions".to_string(),
            model: "test-model".to_string(),
            temperature: 0.7,
            max_tokens: 256,
        };
        let generator = ChatCompletionGenerator::new(config, "key").unwrap();
        let outcome = generator.generate(&request()).await;
        assert!(!outcome.success);
        assert!(outcome.content.is_empty());
        assert!(!outcome.error_message.is_empty());
    }
}
