use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info};

use crate::textgen::{map_reqwest_error, non_empty, TextGenError, TextGenerator};

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI chat-completions text generator.
#[derive(Debug)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
    max_tokens: u32,
    timeout_secs: u64,
}

impl OpenAiClient {
    pub fn new(api_key: String, model: String, max_tokens: u32, timeout_secs: u64) -> Result<Self, TextGenError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| TextGenError::Http(e.to_string()))?;
        Ok(Self { client, api_key, endpoint: DEFAULT_ENDPOINT.to_string(), model, max_tokens, timeout_secs })
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn extract_text(response: &ChatResponse) -> Result<String, TextGenError> {
        let content = response.choices.first().and_then(|c| c.message.content.as_deref());
        non_empty(content)
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    async fn generate(&self, prompt: &str) -> Result<String, TextGenError> {
        let payload = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": self.max_tokens,
        });

        info!("💬 Requesting message from OpenAI model {}", self.model);

        let response = self.client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout_secs))?;

        let status = response.status();
        let response_text = response.text().await.map_err(|e| map_reqwest_error(e, self.timeout_secs))?;

        if !status.is_success() {
            error!("❌ OpenAI request failed with status {}: {}", status, response_text);
            return Err(TextGenError::Api { status: status.as_u16(), body: response_text });
        }

        let parsed: ChatResponse = serde_json::from_str(&response_text)
            .map_err(|e| TextGenError::Malformed(format!("failed to parse response: {e}")))?;
        let text = Self::extract_text(&parsed)?;
        debug!(chars = text.chars().count(), "OpenAI message received");
        Ok(text)
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice { message: ChatMessage }

#[derive(Debug, Deserialize)]
struct ChatMessage { #[serde(default)] content: Option<String> }

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(raw: &str) -> ChatResponse {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn extracts_first_choice_content() {
        let resp = parse(r#"{"choices":[{"message":{"role":"assistant","content":"  Feliz Natal!  "}}]}"#);
        assert_eq!(OpenAiClient::extract_text(&resp).unwrap(), "Feliz Natal!");
    }

    #[test]
    fn missing_choices_is_malformed() {
        let resp = parse(r#"{"error":{"message":"quota"}}"#);
        assert!(matches!(OpenAiClient::extract_text(&resp), Err(TextGenError::Malformed(_))));
    }

    #[test]
    fn null_content_is_malformed() {
        let resp = parse(r#"{"choices":[{"message":{"content":null}}]}"#);
        assert!(OpenAiClient::extract_text(&resp).is_err());
    }
}
