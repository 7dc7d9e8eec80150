//! Axum route handlers for uploads and corpus management.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::ingest::pipeline::{ProcessedDocument, RevalidatedRecord, UploadedFile};
use crate::models::resume::{to_download_json, StandardizedResume};
use crate::routes::json_attachment;
use crate::run::BatchReport;
use crate::state::AppState;
use crate::storage::Filter;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    /// Re-standardize even when an earlier result exists.
    #[serde(default)]
    pub force: bool,
    pub run_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct RunQuery {
    pub run_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct ResumeListResponse {
    pub count: usize,
    pub records: Vec<StandardizedResume>,
}

/// POST /api/v1/uploads
pub async fn handle_upload(
    State(state): State<AppState>,
    Query(params): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<Json<BatchReport<ProcessedDocument>>, AppError> {
    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?
    {
        let Some(filename) = field.file_name().map(base_name).filter(|f| !f.is_empty()) else {
            continue;
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Could not read {filename}: {e}")))?;
        files.push(UploadedFile { filename, bytes });
    }
    if files.is_empty() {
        return Err(AppError::Validation("Upload contains no files".into()));
    }

    info!(files = files.len(), force = params.force, "Upload received");
    let run = state.runs.start(params.run_id)?;
    let report = state
        .pipeline
        .process_batch(run.context(), files, params.force)
        .await?;
    Ok(Json(report))
}

/// POST /api/v1/resumes/revalidate
pub async fn handle_revalidate(
    State(state): State<AppState>,
    Query(params): Query<RunQuery>,
) -> Result<Json<BatchReport<RevalidatedRecord>>, AppError> {
    let run = state.runs.start(params.run_id)?;
    let report = state.pipeline.revalidate_corpus(run.context()).await?;
    Ok(Json(report))
}

/// GET /api/v1/resumes
pub async fn handle_list_resumes(
    State(state): State<AppState>,
) -> Result<Json<ResumeListResponse>, AppError> {
    let records = state.gateway.all().await?;
    Ok(Json(ResumeListResponse {
        count: records.len(),
        records,
    }))
}

/// GET /api/v1/resumes/search?field=&value=
pub async fn handle_search_resumes(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<ResumeListResponse>, AppError> {
    let filter = Filter::for_search(&params.field, &params.value)?;
    let records = state.gateway.find(&filter).await?;
    Ok(Json(ResumeListResponse {
        count: records.len(),
        records,
    }))
}

/// GET /api/v1/resumes/:identity_key
pub async fn handle_get_resume(
    State(state): State<AppState>,
    Path(identity_key): Path<Uuid>,
) -> Result<Json<StandardizedResume>, AppError> {
    Ok(Json(state.gateway.get(identity_key).await?))
}

/// GET /api/v1/resumes/:identity_key/download
pub async fn handle_download_resume(
    State(state): State<AppState>,
    Path(identity_key): Path<Uuid>,
) -> Result<Response, AppError> {
    let record = state.gateway.get(identity_key).await?;
    let body = to_download_json(&record)?;
    Ok(json_attachment(&record.download_name(""), body))
}

/// DELETE /api/v1/resumes/:identity_key
pub async fn handle_delete_resume(
    State(state): State<AppState>,
    Path(identity_key): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.gateway.delete(identity_key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Client-supplied filenames may carry directories; only the last component
/// names the document.
fn base_name(raw: &str) -> String {
    raw.rsplit(&['/', '\\'][..]).next().unwrap_or_default().trim().to_string()
}
