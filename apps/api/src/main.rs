mod config;
mod db;
mod errors;
mod extraction;
mod ingest;
mod llm_client;
mod matching;
mod models;
mod routes;
mod run;
mod state;
mod storage;

#[cfg(test)]
mod testing;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, ScorerBackend};
use crate::db::create_pool;
use crate::extraction::{NativeExtractor, OcrExtractor};
use crate::ingest::IngestPipeline;
use crate::llm_client::{LlmClient, TextBackend};
use crate::matching::{
    CandidateEvaluator, KeywordEvaluator, KeywordExtractor, LlmEvaluator, Matcher, Retailor,
};
use crate::routes::build_router;
use crate::run::RunRegistry;
use crate::state::AppState;
use crate::storage::{PgResumeStore, RedisStageLedger, ResumeGateway, S3ArtifactStore};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting screener v{}", env!("CARGO_PKG_VERSION"));

    // Corpus: PostgreSQL
    let db = create_pool(&config.database_url).await?;
    let gateway = ResumeGateway::new(Arc::new(PgResumeStore::new(db)));

    // Stage ledger: Redis
    let redis = redis::Client::open(config.redis_url.clone())?;
    let ledger = Arc::new(RedisStageLedger::new(redis));
    info!("Redis stage ledger initialized");

    // Artifacts: S3 / MinIO
    let s3 = build_s3_client(&config).await;
    let artifacts = Arc::new(S3ArtifactStore::new(s3, config.s3_bucket.clone()));
    info!("S3 artifact store initialized (bucket: {})", config.s3_bucket);

    // Text backend
    let llm: Arc<dyn TextBackend> = Arc::new(LlmClient::new(
        config.anthropic_api_key.clone(),
        Duration::from_secs(config.llm_timeout_secs),
        config.llm_max_attempts,
    ));
    info!(
        "LLM client initialized (model: {}, timeout: {}s, attempts: {})",
        llm_client::MODEL,
        config.llm_timeout_secs,
        config.llm_max_attempts
    );

    let ocr = Arc::new(OcrExtractor::new(
        &config.tesseract_bin,
        &config.pdftoppm_bin,
        &config.ocr_lang,
    ));
    let pipeline = IngestPipeline::new(
        Arc::new(NativeExtractor),
        ocr,
        llm.clone(),
        gateway.clone(),
        artifacts,
        ledger,
        config.ingest_concurrency,
    );

    let evaluator: Arc<dyn CandidateEvaluator> = match config.scorer_backend {
        ScorerBackend::Keyword => Arc::new(KeywordEvaluator),
        ScorerBackend::Llm => Arc::new(LlmEvaluator::new(llm.clone())),
    };
    info!(
        "Matcher initialized (scorer: {}, concurrency: {}, accept threshold: {})",
        evaluator.backend_name(),
        config.match_concurrency,
        config.accept_threshold
    );

    let state = AppState {
        gateway,
        pipeline: Arc::new(pipeline),
        keyword_extractor: KeywordExtractor::new(llm.clone()),
        matcher: Arc::new(Matcher::new(
            evaluator,
            config.match_concurrency,
            config.accept_threshold,
        )),
        retailor: Retailor::new(llm),
        runs: RunRegistry::new(),
        max_upload_bytes: config.max_upload_mb * 1024 * 1024,
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "screener-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    // MinIO serves buckets by path, not by virtual host.
    let s3_config = aws_sdk_s3::config::Builder::from(&s3_config)
        .force_path_style(true)
        .build();

    aws_sdk_s3::Client::from_conf(s3_config)
}
