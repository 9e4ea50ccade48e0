use axum::{
    Json, Router,
    extract::{Path, State},
    http::{header, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::{
    error::PipelineError,
    models::{GenerateImageBody, GenerationResponse, PreviewResponse},
    pipeline::Orchestrator,
    storage::MemoryArtifactStore,
};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Present only when artifacts live in process memory and must be served from here.
    pub local_artifacts: Option<Arc<MemoryArtifactStore>>,
}

pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("⚠️ Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    Router::new()
        .route("/generate-image", post(generate_image))
        .route("/generate-image/preview", post(preview_image))
        .route("/artifacts/:name", get(get_artifact))
        .route("/health", get(health))
        .fallback(not_found)
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        )
        .with_state(state)
}

pub async fn generate_image(State(state): State<AppState>, Json(body): Json<GenerateImageBody>) -> Result<Json<GenerationResponse>, PipelineError> {
    state.orchestrator.generate_image(body).await.map(Json)
}

pub async fn preview_image(State(state): State<AppState>, Json(body): Json<GenerateImageBody>) -> Result<Json<PreviewResponse>, PipelineError> {
    state.orchestrator.preview(body).await.map(Json)
}

pub async fn get_artifact(Path(name): Path<String>, State(state): State<AppState>) -> Response {
    let Some(store) = &state.local_artifacts else { return StatusCode::NOT_FOUND.into_response() };
    match store.get(&name) {
        Some(object) => {
            let content_type = HeaderValue::from_str(&object.content_type)
                .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
            ([(header::CONTENT_TYPE, content_type)], object.bytes).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn not_found(method: Method, uri: Uri) -> Response {
    tracing::error!("Route not found: {} {}", method, uri);
    (StatusCode::NOT_FOUND, Json(json!({ "error": "route not found" }))).into_response()
}
