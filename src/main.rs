mod background;
mod compose;
mod config;
mod error;
mod gemini;
mod models;
mod openai;
mod pipeline;
mod routes;
mod storage;
mod textgen;
mod wrap;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use crate::{
    background::{BackgroundSource, PicsumBackground},
    compose::Compositor,
    config::{AppConfig, TextProvider},
    gemini::GeminiClient,
    openai::OpenAiClient,
    pipeline::Orchestrator,
    routes::{router, AppState},
    storage::{ArtifactStore, MemoryArtifactStore, MemoryMetadataStore, MetadataStore, SupabaseArtifactStore, SupabaseMetadataStore},
    textgen::{StubTextGenerator, TextGenerator},
};

/// First characters of a secret, for startup logs.
fn key_preview(key: &str) -> String {
    key.chars().take(6).collect()
}

fn text_generator(config: &AppConfig) -> anyhow::Result<Arc<dyn TextGenerator>> {
    let timeout = config.request_timeout_secs;
    let generator: Arc<dyn TextGenerator> = match (config.text_provider, &config.openai, &config.gemini) {
        (TextProvider::OpenAi, Some(s), _) => {
            tracing::info!("Using OpenAI key: {}...", key_preview(&s.api_key));
            let mut client = OpenAiClient::new(s.api_key.clone(), s.model.clone(), s.max_tokens, timeout)?;
            if let Some(endpoint) = &s.endpoint {
                client = client.with_endpoint(endpoint.clone());
            }
            Arc::new(client)
        }
        (TextProvider::Gemini, _, Some(s)) => {
            tracing::info!("Using Gemini key: {}...", key_preview(&s.api_key));
            Arc::new(GeminiClient::new(s.api_key.clone(), s.base_url.clone(), s.model.clone(), timeout)?)
        }
        (TextProvider::Stub, _, _) => {
            tracing::warn!("⚠️ Using stub text generator, every message will be identical");
            Arc::new(StubTextGenerator::default())
        }
        (provider, _, _) => anyhow::bail!("no credentials for text provider {provider:?}"),
    };
    Ok(generator)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = AppConfig::from_env().context("loading configuration")?;

    let text = text_generator(&config)?;
    let background: Arc<dyn BackgroundSource> = Arc::new(PicsumBackground::new(
        config.background_url.clone(),
        config.pipeline.canvas,
        config.request_timeout_secs,
    )?);

    let artifacts: Arc<dyn ArtifactStore>;
    let metadata: Arc<dyn MetadataStore>;
    let mut local_artifacts = None;
    match &config.storage.supabase {
        Some(supabase) => {
            tracing::info!("☁️ Persisting to Supabase bucket {} and table {}", config.storage.bucket, config.storage.table);
            artifacts = Arc::new(SupabaseArtifactStore::new(supabase.clone(), config.storage.bucket.clone(), config.storage.prefix.clone())?);
            metadata = Arc::new(SupabaseMetadataStore::new(supabase.clone(), config.storage.table.clone())?);
        }
        None => {
            tracing::warn!("⚠️ Supabase not configured, artifacts are kept in memory");
            let limit = config.storage.memory_limit;
            let store = Arc::new(MemoryArtifactStore::with_limit(config.storage.public_base_url.clone(), limit));
            artifacts = store.clone();
            metadata = Arc::new(MemoryMetadataStore::with_limit(limit));
            local_artifacts = Some(store);
        }
    }

    let compositor = Arc::new(Compositor::new(config.font_file.as_deref()).context("loading fonts")?);

    let orchestrator = Orchestrator::new(text, background, artifacts, metadata, compositor, config.pipeline.clone());
    let state = AppState { orchestrator: Arc::new(orchestrator), local_artifacts };
    let app = router(state, &config.allowed_origins);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "Starting server");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}
