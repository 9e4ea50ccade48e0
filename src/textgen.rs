use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Gender, GenerationRequest};

#[derive(Debug, Error)]
pub enum TextGenError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("request timed out after {0}s")]
    Timeout(u64),
    #[error("provider returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Turns a prompt into generated text. Implementations must not return an
/// empty string on success.
#[async_trait]
pub trait TextGenerator: Send + Sync + std::fmt::Debug {
    async fn generate(&self, prompt: &str) -> Result<String, TextGenError>;
}

fn gender_label(gender: Gender) -> &'static str {
    match gender {
        Gender::Masc => "masculine",
        Gender::Fem => "feminine",
        Gender::Neutral => "neutral",
    }
}

/// Deterministic prompt for a validated request.
pub fn build_prompt(request: &GenerationRequest, language: &str) -> String {
    format!(
        "Create a short and inspiring message of {kind} in {language} for a {gender} {recipient} on the occasion: {category}.\n\
         Use these predefinitions chosen by the user as context for the message: {styles}.\n\
         The message should:\n\
         - Contain between 30 and 50 words.\n\
         - Convey positivity, gratitude, hope, and encouragement.\n\
         - Be culturally appropriate for the occasion.\n\
         - Use a warm and uplifting tone.\n\
         Reply with the message text only.",
        kind = request.kind,
        gender = gender_label(request.gender),
        recipient = request.recipient,
        category = request.category,
        styles = request.styles.join(", "),
    )
}

/// Shared post-processing for provider text: trims and rejects empty output.
pub(crate) fn non_empty(text: Option<&str>) -> Result<String, TextGenError> {
    match text.map(str::trim) {
        Some(t) if !t.is_empty() => Ok(t.to_string()),
        Some(_) => Err(TextGenError::Malformed("empty text".into())),
        None => Err(TextGenError::Malformed("missing text field".into())),
    }
}

pub(crate) fn map_reqwest_error(e: reqwest::Error, timeout_secs: u64) -> TextGenError {
    if e.is_timeout() { TextGenError::Timeout(timeout_secs) } else { TextGenError::Http(e.to_string()) }
}

/// Offline generator: always answers with the same message.
#[derive(Debug, Clone)]
pub struct StubTextGenerator {
    message: String,
}

impl StubTextGenerator {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl Default for StubTextGenerator {
    fn default() -> Self {
        Self::new("Bom dia! Feliz é aquele que tem gratidão por tudo que conquistou, esperança para sonhar cada vez mais alto e força para lutar pelos seus objetivos!")
    }
}

#[async_trait]
impl TextGenerator for StubTextGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, TextGenError> {
        Ok(self.message.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request() -> GenerationRequest {
        GenerationRequest {
            category: "aniversário".into(),
            recipient: "mãe".into(),
            gender: Gender::Fem,
            styles: vec!["carinhoso".into(), "religioso".into()],
            kind: "felicitação".into(),
        }
    }

    #[test]
    fn prompt_mentions_every_field() {
        let prompt = build_prompt(&request(), "Portuguese (Brazil)");
        assert!(prompt.starts_with("Create a short and inspiring message of felicitação in Portuguese (Brazil) for a feminine mãe on the occasion: aniversário."));
        assert!(prompt.contains("carinhoso, religioso"));
        assert!(prompt.contains("between 30 and 50 words"));
    }

    #[test]
    fn prompt_is_deterministic() {
        assert_eq!(build_prompt(&request(), "English"), build_prompt(&request(), "English"));
    }

    #[test]
    fn non_empty_trims_and_rejects_blank() {
        assert_eq!(non_empty(Some("  oi \n")).unwrap(), "oi");
        assert!(matches!(non_empty(Some("   ")), Err(TextGenError::Malformed(_))));
        assert!(matches!(non_empty(None), Err(TextGenError::Malformed(_))));
    }

    #[tokio::test]
    async fn stub_returns_fixed_message() {
        let stub = StubTextGenerator::new("Parabéns!");
        assert_eq!(stub.generate("whatever").await.unwrap(), "Parabéns!");
    }
}
