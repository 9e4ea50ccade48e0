//! Linear generation pipeline:
//! `Validating → GeneratingText → FetchingBackground → Composing → Uploading → RecordingMetadata → Done`.
//!
//! Every stage runs at most once. A failure stops the run and is reported as
//! `PipelineError { stage, cause }`; earlier stages are not rolled back, so a
//! metadata failure leaves the uploaded artifact orphaned.

use std::sync::Arc;

use base64::Engine;
use bytes::Bytes;
use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    background::BackgroundSource,
    compose::{fit_background, ComposeError, Compositor},
    error::{PipelineError, PipelineFailure, Stage},
    models::{ArtifactRecord, Canvas, GenerateImageBody, GenerationRequest, GenerationResponse, Gender, PreviewResponse},
    storage::{ArtifactStore, MetadataStore},
    textgen::{build_prompt, TextGenerator},
};

pub const ARTIFACT_EXTENSION: &str = "jpg";
pub const ARTIFACT_CONTENT_TYPE: &str = "image/jpeg";

/// Per-deployment knobs that shape the output.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub canvas: Canvas,
    pub watermark: String,
    pub language: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            canvas: Canvas::default(),
            watermark: "mensagempara.com.br".to_string(),
            language: "Portuguese (Brazil)".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Orchestrator {
    text: Arc<dyn TextGenerator>,
    background: Arc<dyn BackgroundSource>,
    artifacts: Arc<dyn ArtifactStore>,
    metadata: Arc<dyn MetadataStore>,
    compositor: Arc<Compositor>,
    settings: PipelineSettings,
}

fn required(value: Option<String>, field: &'static str) -> Result<String, PipelineFailure> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(PipelineFailure::MissingField(field)),
    }
}

/// Checks presence of all five fields and normalizes them.
pub fn validate(body: GenerateImageBody) -> Result<GenerationRequest, PipelineError> {
    let fail = |cause: PipelineFailure| PipelineError::new(Stage::Validating, cause);

    let category = required(body.category, "category").map_err(fail)?;
    let recipient = required(body.recipient, "recipient").map_err(fail)?;
    let gender = required(body.gender, "gender").map_err(fail)?;
    let styles: Vec<String> = body.styles.unwrap_or_default()
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if styles.is_empty() {
        return Err(fail(PipelineFailure::MissingField("styles")));
    }
    let kind = required(body.kind, "type").map_err(fail)?;
    let gender: Gender = gender
        .parse()
        .map_err(|message| fail(PipelineFailure::InvalidArgument { field: "gender", message }))?;

    Ok(GenerationRequest { category, recipient, gender, styles, kind })
}

pub fn artifact_name() -> String {
    format!("{}.{}", Uuid::new_v4(), ARTIFACT_EXTENSION)
}

impl Orchestrator {
    pub fn new(
        text: Arc<dyn TextGenerator>,
        background: Arc<dyn BackgroundSource>,
        artifacts: Arc<dyn ArtifactStore>,
        metadata: Arc<dyn MetadataStore>,
        compositor: Arc<Compositor>,
        settings: PipelineSettings,
    ) -> Self {
        Self { text, background, artifacts, metadata, compositor, settings }
    }

    /// Full run: returns the message, its public image URL and the stored record.
    pub async fn generate_image(&self, body: GenerateImageBody) -> Result<GenerationResponse, PipelineError> {
        let result = self.run(body).await;
        if let Err(e) = &result {
            log_failure(e);
        }
        result
    }

    /// Degraded run with no upload and no metadata; the image comes back inline.
    pub async fn preview(&self, body: GenerateImageBody) -> Result<PreviewResponse, PipelineError> {
        let result = self.run_preview(body).await;
        if let Err(e) = &result {
            log_failure(e);
        }
        result
    }

    async fn run_preview(&self, body: GenerateImageBody) -> Result<PreviewResponse, PipelineError> {
        let request = validate(body)?;
        let (message, image) = self.message_and_image(&request).await?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&image);
        Ok(PreviewResponse { message, image: format!("data:{ARTIFACT_CONTENT_TYPE};base64,{encoded}") })
    }

    async fn run(&self, body: GenerateImageBody) -> Result<GenerationResponse, PipelineError> {
        let request = validate(body)?;
        let (message, image) = self.message_and_image(&request).await?;

        info!("☁️ Stage {}", Stage::Uploading);
        let file_name = artifact_name();
        let locator = self.artifacts
            .put(image, &file_name, ARTIFACT_CONTENT_TYPE, false)
            .await
            .map_err(|e| PipelineError::new(Stage::Uploading, e))?;

        info!("🗄️ Stage {} for {}", Stage::RecordingMetadata, file_name);
        let record = ArtifactRecord {
            file_name,
            locator: locator.clone(),
            message: message.clone(),
            category: request.category,
            recipient: request.recipient,
            gender: request.gender,
            styles: request.styles,
            kind: request.kind,
            created_at: Utc::now(),
        };
        self.metadata
            .insert(&record)
            .await
            .map_err(|e| PipelineError::new(Stage::RecordingMetadata, e))?;

        info!("✅ Generated {}", locator);
        Ok(GenerationResponse { message, image_url: locator, metadata: record })
    }

    /// GeneratingText, FetchingBackground and Composing; shared by both runs.
    async fn message_and_image(&self, request: &GenerationRequest) -> Result<(String, Bytes), PipelineError> {
        info!("🚀 Stage {} ({} for {})", Stage::GeneratingText, request.category, request.recipient);
        let prompt = build_prompt(request, &self.settings.language);
        let message = self.text
            .generate(&prompt)
            .await
            .map_err(|e| PipelineError::new(Stage::GeneratingText, e))?;

        info!("🖼️ Stage {}", Stage::FetchingBackground);
        let background = self.background
            .fetch()
            .await
            .map_err(|e| PipelineError::new(Stage::FetchingBackground, e))?;

        info!("🎨 Stage {}", Stage::Composing);
        let compositor = Arc::clone(&self.compositor);
        let canvas = self.settings.canvas;
        let watermark = self.settings.watermark.clone();
        let body = message.clone();
        let image = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, ComposeError> {
            let fitted = fit_background(&background, canvas)?;
            compositor.compose(&fitted, canvas, &body, &watermark)
        })
        .await
        .map_err(|e| PipelineError::new(Stage::Composing, ComposeError::Encode(format!("compose task failed: {e}"))))?
        .map_err(|e| PipelineError::new(Stage::Composing, e))?;

        Ok((message, Bytes::from(image)))
    }
}

fn log_failure(e: &PipelineError) {
    if e.cause.is_client_error() {
        info!(stage = %e.stage, cause = %e.cause, "rejected request");
    } else {
        error!(stage = %e.stage, cause = %e.cause, "❌ pipeline failed");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::background::{FetchError, SolidBackground};
    use crate::storage::{MemoryArtifactStore, MemoryMetadataStore, PersistenceError, StorageError};
    use crate::textgen::TextGenError;
    use async_trait::async_trait;
    use base64::Engine;
    use image::GenericImageView;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::OnceLock;

    pub(crate) const CANVAS: Canvas = Canvas { width: 120, height: 100 };

    pub(crate) fn shared_compositor() -> Arc<Compositor> {
        static COMPOSITOR: OnceLock<Arc<Compositor>> = OnceLock::new();
        COMPOSITOR.get_or_init(|| Arc::new(Compositor::new(None).unwrap())).clone()
    }

    #[derive(Debug, Default)]
    pub(crate) struct CountingText {
        pub calls: AtomicUsize,
        pub fail: bool,
    }

    #[async_trait]
    impl TextGenerator for CountingText {
        async fn generate(&self, _prompt: &str) -> Result<String, TextGenError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TextGenError::Api { status: 429, body: "quota".into() });
            }
            Ok("Parabéns pela formatura! Que seu futuro seja brilhante.".into())
        }
    }

    #[derive(Debug)]
    pub(crate) struct CountingBackground {
        pub calls: AtomicUsize,
        pub fail: bool,
        inner: SolidBackground,
    }

    impl CountingBackground {
        pub(crate) fn new(fail: bool) -> Self {
            Self { calls: AtomicUsize::new(0), fail, inner: SolidBackground::new(CANVAS, [120, 160, 200]) }
        }
    }

    #[async_trait]
    impl crate::background::BackgroundSource for CountingBackground {
        async fn fetch(&self) -> Result<Bytes, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(FetchError::Status(503));
            }
            self.inner.fetch().await
        }
    }

    #[derive(Debug)]
    struct CountingStore {
        calls: AtomicUsize,
        inner: MemoryArtifactStore,
        always_conflict: bool,
    }

    #[async_trait]
    impl ArtifactStore for CountingStore {
        async fn put(&self, bytes: Bytes, name: &str, content_type: &str, overwrite: bool) -> Result<String, StorageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(!overwrite, "pipeline must never request overwrite");
            if self.always_conflict {
                return Err(StorageError::Conflict(name.to_string()));
            }
            self.inner.put(bytes, name, content_type, overwrite).await
        }

        fn public_locator(&self, name: &str) -> String {
            self.inner.public_locator(name)
        }
    }

    #[derive(Debug)]
    struct FailingMetadata;

    #[async_trait]
    impl MetadataStore for FailingMetadata {
        async fn insert(&self, _record: &ArtifactRecord) -> Result<(), PersistenceError> {
            Err(PersistenceError::Rejected { status: 500, body: "db down".into() })
        }
    }

    struct Harness {
        text: Arc<CountingText>,
        background: Arc<CountingBackground>,
        store: Arc<CountingStore>,
        metadata: MemoryMetadataStore,
        orchestrator: Orchestrator,
    }

    fn harness_with(text: CountingText, background: CountingBackground, always_conflict: bool, metadata: Option<Arc<dyn MetadataStore>>) -> Harness {
        let text = Arc::new(text);
        let background = Arc::new(background);
        let store = Arc::new(CountingStore {
            calls: AtomicUsize::new(0),
            inner: MemoryArtifactStore::new("http://localhost:3000"),
            always_conflict,
        });
        let memory = MemoryMetadataStore::default();
        let metadata_store: Arc<dyn MetadataStore> = metadata.unwrap_or_else(|| Arc::new(memory.clone()) as Arc<dyn MetadataStore>);
        let settings = PipelineSettings { canvas: CANVAS, ..PipelineSettings::default() };
        let orchestrator = Orchestrator::new(
            text.clone(),
            background.clone(),
            store.clone(),
            metadata_store,
            shared_compositor(),
            settings,
        );
        Harness { text, background, store, metadata: memory, orchestrator }
    }

    fn harness() -> Harness {
        harness_with(CountingText::default(), CountingBackground::new(false), false, None)
    }

    pub(crate) fn full_body() -> GenerateImageBody {
        GenerateImageBody {
            category: Some("formatura".into()),
            recipient: Some("filho".into()),
            gender: Some("masc".into()),
            styles: Some(vec!["orgulhoso".into(), " emocionante".into()]),
            kind: Some("mensagem".into()),
        }
    }

    fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn missing_field_fails_validation_without_external_calls() {
        for field in ["category", "recipient", "gender", "styles", "type"] {
            let h = harness();
            let mut body = full_body();
            match field {
                "category" => body.category = None,
                "recipient" => body.recipient = Some("  ".into()),
                "gender" => body.gender = None,
                "styles" => body.styles = Some(vec![" ".into()]),
                _ => body.kind = None,
            }
            let err = h.orchestrator.generate_image(body).await.unwrap_err();
            assert_eq!(err.stage, Stage::Validating);
            assert!(matches!(err.cause, PipelineFailure::MissingField(f) if f == field), "{field}: {err}");
            assert_eq!(calls(&h.text.calls), 0);
            assert_eq!(calls(&h.background.calls), 0);
            assert_eq!(calls(&h.store.calls), 0);
        }
    }

    #[tokio::test]
    async fn unknown_gender_is_invalid_argument() {
        let h = harness();
        let body = GenerateImageBody { gender: Some("robot".into()), ..full_body() };
        let err = h.orchestrator.generate_image(body).await.unwrap_err();
        assert_eq!(err.stage, Stage::Validating);
        assert!(matches!(err.cause, PipelineFailure::InvalidArgument { field: "gender", .. }));
        assert_eq!(calls(&h.text.calls), 0);
    }

    #[tokio::test]
    async fn successful_run_returns_generated_message_and_locator() {
        let h = harness();
        let resp = h.orchestrator.generate_image(full_body()).await.unwrap();

        assert_eq!(resp.message, "Parabéns pela formatura! Que seu futuro seja brilhante.");
        assert!(resp.image_url.starts_with("http://localhost:3000/artifacts/"));
        assert!(resp.image_url.ends_with(".jpg"));
        assert_eq!(resp.metadata.locator, resp.image_url);
        assert_eq!(resp.metadata.styles, vec!["orgulhoso", "emocionante"]);
        assert_eq!(resp.metadata.gender, Gender::Masc);

        let stored = h.store.inner.get(&resp.metadata.file_name).unwrap();
        assert_eq!(stored.content_type, "image/jpeg");
        assert_eq!(image::load_from_memory(&stored.bytes).unwrap().dimensions(), (CANVAS.width, CANVAS.height));

        assert_eq!(h.metadata.records(), vec![resp.metadata.clone()]);
        assert_eq!((calls(&h.text.calls), calls(&h.background.calls), calls(&h.store.calls)), (1, 1, 1));
    }

    #[tokio::test]
    async fn two_identical_requests_produce_distinct_artifacts() {
        let h = harness();
        let first = h.orchestrator.generate_image(full_body()).await.unwrap();
        let second = h.orchestrator.generate_image(full_body()).await.unwrap();
        assert_ne!(first.metadata.file_name, second.metadata.file_name);
        assert_ne!(first.image_url, second.image_url);
        assert_eq!(h.store.inner.object_count(), 2);
    }

    #[tokio::test]
    async fn text_failure_stops_before_fetch() {
        let h = harness_with(CountingText { fail: true, ..Default::default() }, CountingBackground::new(false), false, None);
        let err = h.orchestrator.generate_image(full_body()).await.unwrap_err();
        assert_eq!(err.stage, Stage::GeneratingText);
        assert!(matches!(err.cause, PipelineFailure::Upstream(_)));
        assert_eq!(calls(&h.text.calls), 1);
        assert_eq!(calls(&h.background.calls), 0);
    }

    #[tokio::test]
    async fn fetch_failure_is_reported_and_not_retried() {
        let h = harness_with(CountingText::default(), CountingBackground::new(true), false, None);
        let err = h.orchestrator.generate_image(full_body()).await.unwrap_err();
        assert_eq!(err.stage, Stage::FetchingBackground);
        assert!(matches!(err.cause, PipelineFailure::Fetch(FetchError::Status(503))));
        assert_eq!(calls(&h.background.calls), 1);
        assert_eq!(calls(&h.store.calls), 0);
    }

    #[tokio::test]
    async fn name_collision_surfaces_storage_error_without_retry() {
        let h = harness_with(CountingText::default(), CountingBackground::new(false), true, None);
        let err = h.orchestrator.generate_image(full_body()).await.unwrap_err();
        assert_eq!(err.stage, Stage::Uploading);
        assert!(matches!(err.cause, PipelineFailure::Storage(StorageError::Conflict(_))));
        assert_eq!(calls(&h.store.calls), 1);
        assert!(h.metadata.records().is_empty());
    }

    #[tokio::test]
    async fn metadata_failure_leaves_orphaned_artifact() {
        let h = harness_with(CountingText::default(), CountingBackground::new(false), false, Some(Arc::new(FailingMetadata)));
        let err = h.orchestrator.generate_image(full_body()).await.unwrap_err();
        assert_eq!(err.stage, Stage::RecordingMetadata);
        assert!(matches!(err.cause, PipelineFailure::Persistence(_)));
        assert_eq!(h.store.inner.object_count(), 1);
    }

    #[tokio::test]
    async fn undecodable_background_fails_composing() {
        #[derive(Debug)]
        struct Garbage;
        #[async_trait]
        impl crate::background::BackgroundSource for Garbage {
            async fn fetch(&self) -> Result<Bytes, FetchError> {
                Ok(Bytes::from_static(b"<html>not an image</html>"))
            }
        }
        let orchestrator = Orchestrator::new(
            Arc::new(CountingText::default()),
            Arc::new(Garbage),
            Arc::new(MemoryArtifactStore::new("http://x")),
            Arc::new(MemoryMetadataStore::default()),
            shared_compositor(),
            PipelineSettings { canvas: CANVAS, ..PipelineSettings::default() },
        );
        let err = orchestrator.generate_image(full_body()).await.unwrap_err();
        assert_eq!(err.stage, Stage::Composing);
        assert!(matches!(err.cause, PipelineFailure::ImageProcessing(_)));
    }

    #[tokio::test]
    async fn preview_inlines_image_and_persists_nothing() {
        let h = harness();
        let resp = h.orchestrator.preview(full_body()).await.unwrap();
        assert!(resp.image.starts_with("data:image/jpeg;base64,"));
        let raw = base64::engine::general_purpose::STANDARD
            .decode(resp.image.trim_start_matches("data:image/jpeg;base64,"))
            .unwrap();
        assert_eq!(image::load_from_memory(&raw).unwrap().dimensions(), (CANVAS.width, CANVAS.height));
        assert_eq!(calls(&h.store.calls), 0);
        assert!(h.metadata.records().is_empty());
    }

    #[test]
    fn artifact_names_are_unique_jpgs() {
        let a = artifact_name();
        let b = artifact_name();
        assert_ne!(a, b);
        assert!(a.ends_with(".jpg"));
        assert_eq!(a.len(), 36 + 4);
    }
}
