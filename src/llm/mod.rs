pub mod demo;

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::{ConfigError, LlmConfig, LlmProvider};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Text generation request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Text generation returned no content")]
    EmptyResponse,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// One request to the text generation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    /// Producer asking; lets canned backends answer per producer
    pub producer: String,
    /// File under review, when the prompt is about a single file
    pub file: Option<String>,
}

/// A text generation backend. Output is free text; callers parse it leniently.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError>;
}

/// Chat completion client for OpenAI-compatible servers and the Anthropic
/// messages API.
pub struct HttpGenerator {
    client: reqwest::Client,
    provider: LlmProvider,
    model: String,
    api_key: Option<String>,
    endpoint: String,
    temperature: f32,
    max_tokens: u32,
}

impl HttpGenerator {
    pub fn from_config(config: &LlmConfig) -> Result<Self, GenerationError> {
        let provider = config.provider.ok_or(ConfigError::Missing("llm.provider"))?;
        let model = config.model.clone().ok_or(ConfigError::Missing("llm.model"))?;
        let endpoint = match (&config.base_url, provider) {
            (Some(base), LlmProvider::Anthropic) => {
                format!("{}/messages", base.trim_end_matches('/'))
            }
            (Some(base), _) => format!("{}/chat/completions", base.trim_end_matches('/')),
            (None, LlmProvider::Openai) => "https://api.openai.com/v1/chat/completions".to_string(),
            (None, LlmProvider::Anthropic) => "https://api.anthropic.com/v1/messages".to_string(),
            (None, LlmProvider::Local) => "http://localhost:11434/v1/chat/completions".to_string(),
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            provider,
            model,
            api_key: config.api_key.clone(),
            endpoint,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    async fn chat_completion(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        #[derive(Deserialize)]
        struct Message {
            content: Option<String>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: Message,
        }
        #[derive(Deserialize)]
        struct ChatResponse {
            choices: Vec<Choice>,
        }

        let payload = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
        });

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await?
            .error_for_status()?
            .json::<ChatResponse>()
            .await?;

        response
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .ok_or(GenerationError::EmptyResponse)
    }

    async fn anthropic_message(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        #[derive(Deserialize)]
        struct Block {
            #[serde(default)]
            text: Option<String>,
        }
        #[derive(Deserialize)]
        struct MessageResponse {
            content: Vec<Block>,
        }

        let payload = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "system": prompt.system,
            "messages": [{ "role": "user", "content": prompt.user }],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", self.api_key.as_deref().unwrap_or_default())
            .header("anthropic-version", "2023-06-01")
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json::<MessageResponse>()
            .await?;

        let text: String = response
            .content
            .into_iter()
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join("\n");
        if text.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(text)
    }
}

#[async_trait]
impl TextGenerator for HttpGenerator {
    #[instrument(
        skip(self, prompt),
        fields(producer = %prompt.producer, file = ?prompt.file, model = %self.model)
    )]
    async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        debug!(prompt_bytes = prompt.user.len(), "requesting completion");
        let text = match self.provider {
            LlmProvider::Anthropic => self.anthropic_message(prompt).await?,
            LlmProvider::Openai | LlmProvider::Local => self.chat_completion(prompt).await?,
        };
        debug!(response_bytes = text.len(), "received completion");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_selection() {
        let mut config = LlmConfig {
            provider: Some(LlmProvider::Anthropic),
            model: Some("m".to_string()),
            ..LlmConfig::default()
        };
        let generator = HttpGenerator::from_config(&config).unwrap();
        assert_eq!(generator.endpoint, "https://api.anthropic.com/v1/messages");

        config.provider = Some(LlmProvider::Local);
        config.base_url = Some("http://gpu-box:8000/v1/".to_string());
        let generator = HttpGenerator::from_config(&config).unwrap();
        assert_eq!(generator.endpoint, "http://gpu-box:8000/v1/chat/completions");
    }

    #[test]
    fn test_missing_model_is_config_error() {
        let config = LlmConfig {
            provider: Some(LlmProvider::Openai),
            ..LlmConfig::default()
        };
        assert!(matches!(
            HttpGenerator::from_config(&config),
            Err(GenerationError::Config(ConfigError::Missing("llm.model")))
        ));
    }
}
