pub mod health;
pub mod runs;

use axum::{
    extract::DefaultBodyLimit,
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};

use crate::ingest::handlers as ingest;
use crate::matching::handlers as matching;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.max_upload_bytes);

    Router::new()
        .route("/health", get(health::health_handler))
        // Write path
        .route(
            "/api/v1/uploads",
            post(ingest::handle_upload).layer(upload_limit),
        )
        .route("/api/v1/resumes", get(ingest::handle_list_resumes))
        .route("/api/v1/resumes/search", get(ingest::handle_search_resumes))
        .route("/api/v1/resumes/revalidate", post(ingest::handle_revalidate))
        .route(
            "/api/v1/resumes/:identity_key",
            get(ingest::handle_get_resume).delete(ingest::handle_delete_resume),
        )
        .route(
            "/api/v1/resumes/:identity_key/download",
            get(ingest::handle_download_resume),
        )
        // Read path
        .route("/api/v1/keywords", post(matching::handle_extract_keywords))
        .route("/api/v1/match", post(matching::handle_match))
        .route("/api/v1/retailor", post(matching::handle_retailor))
        .route(
            "/api/v1/retailor/download",
            post(matching::handle_retailor_download),
        )
        // Runs
        .route("/api/v1/runs/:run_id", get(runs::handle_run_progress))
        .route("/api/v1/runs/:run_id/cancel", post(runs::handle_cancel_run))
        .with_state(state)
}

/// Pretty JSON served as a file download.
pub fn json_attachment(filename: &str, body: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/json; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response()
}
