use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::resume::CandidateSummary;

/// Error taxonomy shared by every pipeline stage.
///
/// Item-level variants are caught at the per-document / per-candidate boundary
/// and reported in a batch report; they only become HTTP errors when a
/// single-item endpoint (retailor, get, delete) fails.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("No text content extracted from {0}")]
    EmptyContent(String),

    #[error("Extraction failed: {0}")]
    ExtractionFailure(String),

    #[error("Generative backend timed out")]
    BackendTimeout,

    #[error("Generative backend rejected credentials: {0}")]
    BackendAuthError(String),

    #[error("Generative backend rate limited the request")]
    BackendRateLimited,

    #[error("Generative backend unreachable: {0}")]
    BackendUnavailable(String),

    #[error("Generative backend error: {0}")]
    Backend(String),

    #[error("Could not parse backend response: {0}")]
    ResponseParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Original document not found: {0}")]
    OriginalDocumentMissing(String),

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Run cancelled before this item completed")]
    Cancelled,
}

impl PipelineError {
    /// Stable machine-readable code, used in batch reports and HTTP bodies.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            PipelineError::EmptyContent(_) => "EMPTY_CONTENT",
            PipelineError::ExtractionFailure(_) => "EXTRACTION_FAILURE",
            PipelineError::BackendTimeout => "BACKEND_TIMEOUT",
            PipelineError::BackendAuthError(_) => "BACKEND_AUTH_ERROR",
            PipelineError::BackendRateLimited => "BACKEND_RATE_LIMITED",
            PipelineError::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
            PipelineError::Backend(_) => "BACKEND_ERROR",
            PipelineError::ResponseParseError(_) => "RESPONSE_PARSE_ERROR",
            PipelineError::ValidationError(_) => "VALIDATION_ERROR",
            PipelineError::OriginalDocumentMissing(_) => "ORIGINAL_DOCUMENT_MISSING",
            PipelineError::PersistenceError(_) => "PERSISTENCE_ERROR",
            PipelineError::NotFound(_) => "NOT_FOUND",
            PipelineError::Cancelled => "CANCELLED",
        }
    }

    /// Errors that will hit every remaining item of a batch the same way.
    /// The first one seen stops the whole batch.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::BackendAuthError(_) | PipelineError::BackendUnavailable(_)
        )
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(e: sqlx::Error) -> Self {
        PipelineError::PersistenceError(e.to_string())
    }
}

impl From<redis::RedisError> for PipelineError {
    fn from(e: redis::RedisError) -> Self {
        PipelineError::PersistenceError(format!("stage ledger: {e}"))
    }
}

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("More than one candidate matches the lookup")]
    AmbiguousCandidate(Vec<CandidateSummary>),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::AmbiguousCandidate(candidates) = &self {
            let body = Json(json!({
                "error": {
                    "code": "AMBIGUOUS_CANDIDATE",
                    "message": "Multiple candidates match; retry with an identity_key",
                    "candidates": candidates,
                }
            }));
            return (StatusCode::CONFLICT, body).into_response();
        }

        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Pipeline(e) => {
                let status = pipeline_status(e);
                if status.is_server_error() {
                    tracing::error!("Pipeline error: {e}");
                }
                (status, e.code(), e.to_string())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
            AppError::AmbiguousCandidate(_) => unreachable!("handled above"),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

fn pipeline_status(e: &PipelineError) -> StatusCode {
    match e {
        PipelineError::UnsupportedFormat(_) | PipelineError::ValidationError(_) => {
            StatusCode::BAD_REQUEST
        }
        PipelineError::EmptyContent(_) | PipelineError::ExtractionFailure(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        PipelineError::NotFound(_) | PipelineError::OriginalDocumentMissing(_) => {
            StatusCode::NOT_FOUND
        }
        PipelineError::BackendTimeout => StatusCode::GATEWAY_TIMEOUT,
        PipelineError::BackendRateLimited => StatusCode::TOO_MANY_REQUESTS,
        PipelineError::BackendAuthError(_)
        | PipelineError::BackendUnavailable(_)
        | PipelineError::Backend(_)
        | PipelineError::ResponseParseError(_) => StatusCode::BAD_GATEWAY,
        PipelineError::Cancelled => StatusCode::CONFLICT,
        PipelineError::PersistenceError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
