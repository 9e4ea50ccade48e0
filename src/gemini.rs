use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, error};

use crate::textgen::{map_reqwest_error, non_empty, TextGenError, TextGenerator};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout_secs: u64,
}

impl GeminiClient {
    pub fn new(api_key: String, base_url: String, model: String, timeout_secs: u64) -> Result<Self, TextGenError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| TextGenError::Http(e.to_string()))?;
        Ok(Self { client, api_key, base_url, model, timeout_secs })
    }

    fn extract_text(resp: &GeminiResponse) -> Result<String, TextGenError> {
        let first_text = resp.candidates.first().and_then(|candidate| {
            candidate.content.parts.iter().find_map(|part| match part {
                Part::Text { text } => Some(text.as_str()),
                Part::Other(_) => None,
            })
        });
        non_empty(first_text)
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, TextGenError> {
        let url = format!("{}/models/{}:generateContent?key={}", self.base_url, self.model, self.api_key);
        info!("🔗 Making request to: {}", url.replace(&self.api_key, "***"));

        let payload = json!({
            "contents": [{
                "parts": [{"text": prompt}]
            }],
            "generationConfig": {
                "temperature": 0.7,
                "topK": 40,
                "topP": 0.95,
                "maxOutputTokens": 200
            }
        });

        let response = self.client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout_secs))?;

        let status = response.status();
        let response_text = response.text().await.map_err(|e| map_reqwest_error(e, self.timeout_secs))?;

        if !status.is_success() {
            error!("❌ Gemini API text generation failed with status {}: {}", status, response_text);
            return Err(TextGenError::Api { status: status.as_u16(), body: response_text });
        }

        let parsed: GeminiResponse = serde_json::from_str(&response_text)
            .map_err(|e| TextGenError::Malformed(format!("Failed to parse response: {}", e)))?;

        Self::extract_text(&parsed)
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate { #[serde(default)] content: Content }

#[derive(Debug, Deserialize, Default)]
struct Content { #[serde(default)] parts: Vec<Part> }

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    /// Inline data, function calls and other non-text parts.
    Other(serde::de::IgnoredAny),
}
