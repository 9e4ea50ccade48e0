use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use serde_json::json;
use std::fmt;
use thiserror::Error;

use crate::{background::FetchError, compose::ComposeError, storage::{PersistenceError, StorageError}, textgen::TextGenError};

/// Pipeline states, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validating,
    GeneratingText,
    FetchingBackground,
    Composing,
    Uploading,
    RecordingMetadata,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Validating => "validating",
            Stage::GeneratingText => "generating_text",
            Stage::FetchingBackground => "fetching_background",
            Stage::Composing => "composing",
            Stage::Uploading => "uploading",
            Stage::RecordingMetadata => "recording_metadata",
        })
    }
}

#[derive(Debug, Error)]
pub enum PipelineFailure {
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("invalid {field}: {message}")]
    InvalidArgument { field: &'static str, message: String },
    #[error("upstream error: {0}")]
    Upstream(#[from] TextGenError),
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),
    #[error("image processing error: {0}")]
    ImageProcessing(#[from] ComposeError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl PipelineFailure {
    pub fn is_client_error(&self) -> bool {
        matches!(self, PipelineFailure::MissingField(_) | PipelineFailure::InvalidArgument { .. })
    }
}

/// Terminal `Failed(stage, cause)` state of a pipeline run.
#[derive(Debug, Error)]
#[error("pipeline failed while {stage}: {cause}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub cause: PipelineFailure,
}

impl PipelineError {
    pub fn new(stage: Stage, cause: impl Into<PipelineFailure>) -> Self {
        Self { stage, cause: cause.into() }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        match &self.cause {
            PipelineFailure::MissingField(field) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "all parameters are required", "field": field })),
            ).into_response(),
            PipelineFailure::InvalidArgument { field, message } => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": message, "field": field })),
            ).into_response(),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal error while generating the image", "stage": self.stage })),
            ).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn client_errors_map_to_400() {
        let resp = PipelineError::new(Stage::Validating, PipelineFailure::MissingField("recipient")).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["field"], "recipient");
    }

    #[tokio::test]
    async fn invalid_argument_names_the_field() {
        let cause = PipelineFailure::InvalidArgument { field: "gender", message: "unknown gender: x".into() };
        assert!(cause.is_client_error());
        let resp = PipelineError::new(Stage::Validating, cause).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await, json!({ "error": "unknown gender: x", "field": "gender" }));
    }

    #[test]
    fn stage_failures_map_to_500() {
        let err = PipelineError::new(Stage::Uploading, StorageError::Conflict("a.jpg".into()));
        assert!(!err.cause.is_client_error());
        assert_eq!(err.to_string(), "pipeline failed while uploading: storage error: object already exists: a.jpg");
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
