//! Axum route handlers for the read path.

use axum::{extract::State, response::Response, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::matching::keywords::JobInput;
use crate::models::matching::{JobKeywordSet, MatchResult, MatchStatus};
use crate::models::resume::{to_download_json, RetailoredResume, StandardizedResume};
use crate::routes::json_attachment;
use crate::run::BatchReport;
use crate::state::AppState;
use crate::storage::{Filter, ResumeGateway};

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct KeywordsRequest {
    pub job_description: String,
}

#[derive(Debug, Serialize)]
pub struct KeywordsResponse {
    pub keywords: JobKeywordSet,
}

#[derive(Debug, Deserialize)]
pub struct MatchRequest {
    pub job_description: Option<String>,
    pub keywords: Option<Vec<String>>,
    /// Drop rejected candidates from `items`. Counts still cover everyone.
    #[serde(default)]
    pub accepted_only: bool,
    pub run_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct MatchResponse {
    pub scorer_backend: &'static str,
    pub keywords: JobKeywordSet,
    pub accepted: usize,
    #[serde(flatten)]
    pub report: BatchReport<MatchResult>,
}

#[derive(Debug, Deserialize)]
pub struct RetailorRequest {
    pub identity_key: Option<Uuid>,
    /// Field to look the candidate up by when no identity_key is given.
    /// Defaults to `name`.
    pub search_field: Option<String>,
    pub search_value: Option<String>,
    pub job_description: Option<String>,
    pub keywords: Option<Vec<String>>,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/keywords
pub async fn handle_extract_keywords(
    State(state): State<AppState>,
    Json(req): Json<KeywordsRequest>,
) -> Result<Json<KeywordsResponse>, AppError> {
    let keywords = state.keyword_extractor.extract_keywords(&req.job_description).await?;
    Ok(Json(KeywordsResponse { keywords }))
}

/// POST /api/v1/match
///
/// Keywords are resolved once and reused for every candidate in the run.
pub async fn handle_match(
    State(state): State<AppState>,
    Json(req): Json<MatchRequest>,
) -> Result<Json<MatchResponse>, AppError> {
    let input = JobInput::from_parts(req.job_description, req.keywords)?;
    let run = state.runs.start(req.run_id)?;

    let keywords = state.keyword_extractor.resolve(&input).await?;
    let corpus = state.gateway.all().await?;
    let mut report = state
        .matcher
        .score_corpus(run.context(), &keywords, corpus)
        .await?;

    let accepted = report
        .items
        .iter()
        .filter(|r| r.status == MatchStatus::Accepted)
        .count();
    if req.accepted_only {
        report.items.retain(|r| r.status == MatchStatus::Accepted);
    }

    Ok(Json(MatchResponse {
        scorer_backend: state.matcher.backend_name(),
        keywords,
        accepted,
        report,
    }))
}

/// POST /api/v1/retailor
pub async fn handle_retailor(
    State(state): State<AppState>,
    Json(req): Json<RetailorRequest>,
) -> Result<Json<RetailoredResume>, AppError> {
    Ok(Json(retailor_for(&state, req).await?))
}

/// POST /api/v1/retailor/download
pub async fn handle_retailor_download(
    State(state): State<AppState>,
    Json(req): Json<RetailorRequest>,
) -> Result<Response, AppError> {
    let retailored = retailor_for(&state, req).await?;
    let body = to_download_json(&retailored)?;
    Ok(json_attachment(
        &retailored.resume.download_name("_retailored"),
        body,
    ))
}

async fn retailor_for(
    state: &AppState,
    req: RetailorRequest,
) -> Result<RetailoredResume, AppError> {
    let input = JobInput::from_parts(req.job_description, req.keywords)?;
    let record = find_candidate(
        &state.gateway,
        req.identity_key,
        req.search_field.as_deref(),
        req.search_value.as_deref(),
    )
    .await?;
    let keywords = state.keyword_extractor.resolve(&input).await?;
    Ok(state.retailor.retailor(&record, &keywords).await?)
}

/// By identity key, or by an anchored case-insensitive match on one field.
/// More than one hit is ambiguous; the caller picks an identity key.
async fn find_candidate(
    gateway: &ResumeGateway,
    identity_key: Option<Uuid>,
    field: Option<&str>,
    value: Option<&str>,
) -> Result<StandardizedResume, AppError> {
    if let Some(key) = identity_key {
        return Ok(gateway.get(key).await?);
    }

    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Validation("identity_key or search_value is required".into()))?;
    let field = field.map(str::trim).filter(|f| !f.is_empty()).unwrap_or("name");

    let mut hits = gateway.find(&Filter::exact_ci(field, value)?).await?;
    match hits.len() {
        0 => Err(AppError::NotFound(format!("No candidate with {field} = {value:?}"))),
        1 => Ok(hits.remove(0)),
        _ => Err(AppError::AmbiguousCandidate(
            hits.iter().map(StandardizedResume::summary).collect(),
        )),
    }
}
