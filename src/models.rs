use serde::{Serialize, Deserialize};
use serde_with::{serde_as, StringWithSeparator, formats::CommaSeparator};
use chrono::{DateTime, Utc};
use std::{fmt, str::FromStr};

/// Pixel dimensions of the rendered artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

impl Default for Canvas {
    fn default() -> Self { Self { width: 600, height: 500 } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Masc,
    Fem,
    Neutral,
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "masc" | "masculino" | "male" | "m" => Ok(Gender::Masc),
            "fem" | "feminino" | "female" | "f" => Ok(Gender::Fem),
            "neutral" | "neutro" | "n" => Ok(Gender::Neutral),
            other => Err(format!("unknown gender: {other}")),
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Gender::Masc => "masc",
            Gender::Fem => "fem",
            Gender::Neutral => "neutral",
        })
    }
}

/// Request body as it arrives over the wire. Every field is optional here so
/// that a missing one is reported by validation rather than by the extractor.
#[serde_as]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerateImageBody {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    // serde_as adds `default` for Option fields itself
    #[serde_as(as = "Option<StringWithSeparator::<CommaSeparator, String>>")]
    pub styles: Option<Vec<String>>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// A validated request: all fields non-empty, at least one style tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub category: String,
    pub recipient: String,
    pub gender: Gender,
    pub styles: Vec<String>,
    pub kind: String,
}

/// Terminal, durable description of one successful run.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    pub file_name: String,
    pub locator: String,
    pub message: String,
    pub category: String,
    pub recipient: String,
    pub gender: Gender,
    #[serde_as(as = "StringWithSeparator::<CommaSeparator, String>")]
    pub styles: Vec<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResponse {
    pub message: String,
    pub image_url: String,
    pub metadata: ArtifactRecord,
}

/// Degraded response: the image is inlined and nothing is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewResponse {
    pub message: String,
    pub image: String,
}
