use std::sync::Arc;

use crate::ingest::IngestPipeline;
use crate::matching::{KeywordExtractor, Matcher, Retailor};
use crate::run::RunRegistry;
use crate::storage::ResumeGateway;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub gateway: ResumeGateway,
    pub pipeline: Arc<IngestPipeline>,
    pub keyword_extractor: KeywordExtractor,
    /// Evaluator backend chosen at startup via SCORER_BACKEND.
    pub matcher: Arc<Matcher>,
    pub retailor: Retailor,
    /// Active and recently finished batches, for progress polling and cancel.
    pub runs: RunRegistry,
    pub max_upload_bytes: usize,
}
