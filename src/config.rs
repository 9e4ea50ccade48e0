use std::{path::PathBuf, str::FromStr};

use anyhow::{bail, Result};

use crate::{
    background, gemini,
    models::Canvas,
    pipeline::PipelineSettings,
    storage::{SupabaseConfig, DEFAULT_MEMORY_LIMIT},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextProvider {
    OpenAi,
    Gemini,
    Stub,
}

impl FromStr for TextProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(TextProvider::OpenAi),
            "gemini" => Ok(TextProvider::Gemini),
            "stub" | "offline" => Ok(TextProvider::Stub),
            other => bail!("unknown TEXT_PROVIDER: {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub endpoint: Option<String>,
    pub model: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub supabase: Option<SupabaseConfig>,
    pub bucket: String,
    pub prefix: String,
    pub table: String,
    pub public_base_url: String,
    /// Cap on objects and records kept when Supabase is not configured.
    pub memory_limit: usize,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub text_provider: TextProvider,
    pub openai: Option<OpenAiSettings>,
    pub gemini: Option<GeminiSettings>,
    pub background_url: String,
    pub storage: StorageSettings,
    pub pipeline: PipelineSettings,
    pub font_file: Option<PathBuf>,
    pub request_timeout_secs: u64,
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e| anyhow::anyhow!("invalid {key}={raw}: {e}")),
        None => Ok(default),
    }
}

impl AppConfig {
    /// Reads the process environment; call after `dotenv` has run.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let port: u16 = parse_or(&lookup, "PORT", 3000)?;
        let request_timeout_secs: u64 = parse_or(&lookup, "REQUEST_TIMEOUT_SECS", 30)?;
        let canvas = Canvas {
            width: parse_or(&lookup, "CANVAS_WIDTH", Canvas::default().width)?,
            height: parse_or(&lookup, "CANVAS_HEIGHT", Canvas::default().height)?,
        };
        if canvas.width == 0 || canvas.height == 0 {
            bail!("canvas must have non-zero dimensions, got {}x{}", canvas.width, canvas.height);
        }

        let allowed_origins = get("ALLOWED_ORIGINS", "https://www.mensagempara.com.br,http://localhost:3000")
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();

        let text_provider: TextProvider = get("TEXT_PROVIDER", "openai").parse()?;
        let openai = lookup("OPENAI_API_KEY").map(|api_key| -> Result<OpenAiSettings> {
            Ok(OpenAiSettings {
                api_key,
                endpoint: lookup("OPENAI_ENDPOINT"),
                model: get("OPENAI_MODEL", "gpt-4o-mini"),
                max_tokens: parse_or(&lookup, "OPENAI_MAX_TOKENS", 200)?,
            })
        }).transpose()?;
        let gemini = lookup("GEMINI_API_KEY").map(|api_key| GeminiSettings {
            api_key,
            base_url: get("GEMINI_API_BASE", gemini::DEFAULT_BASE_URL),
            model: get("GEMINI_MODEL", gemini::DEFAULT_MODEL),
        });
        match text_provider {
            TextProvider::OpenAi if openai.is_none() => bail!("TEXT_PROVIDER=openai requires OPENAI_API_KEY"),
            TextProvider::Gemini if gemini.is_none() => bail!("TEXT_PROVIDER=gemini requires GEMINI_API_KEY"),
            _ => {}
        }

        let supabase = match (lookup("SUPABASE_URL"), lookup("SUPABASE_SERVICE_ROLE_KEY")) {
            (Some(url), Some(service_key)) => Some(SupabaseConfig { url, service_key, timeout_secs: request_timeout_secs }),
            (None, None) => None,
            _ => bail!("SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY must be set together"),
        };
        let storage = StorageSettings {
            supabase,
            bucket: get("STORAGE_BUCKET", "mensagempara"),
            prefix: get("STORAGE_PREFIX", "images"),
            table: get("MESSAGES_TABLE", "messages"),
            public_base_url: get("PUBLIC_BASE_URL", &format!("http://localhost:{port}")),
            memory_limit: parse_or(&lookup, "MEMORY_STORE_LIMIT", DEFAULT_MEMORY_LIMIT)?,
        };
        if storage.memory_limit == 0 {
            bail!("MEMORY_STORE_LIMIT must be at least 1");
        }

        let pipeline = PipelineSettings {
            canvas,
            watermark: get("WATERMARK_TEXT", "mensagempara.com.br"),
            language: get("MESSAGE_LANGUAGE", "Portuguese (Brazil)"),
        };

        let font_file = lookup("FONT_FILE").map(PathBuf::from);
        if let Some(path) = &font_file {
            if !path.exists() {
                bail!("FONT_FILE {} does not exist", path.display());
            }
        }

        Ok(Self {
            port,
            allowed_origins,
            text_provider,
            openai,
            gemini,
            background_url: get("BACKGROUND_URL", background::DEFAULT_BASE_URL),
            storage,
            pipeline,
            font_file,
            request_timeout_secs,
        })
    }
}
