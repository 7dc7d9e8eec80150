use std::str::FromStr;

use anyhow::{bail, Context, Result};

/// Which `CandidateEvaluator` the matcher uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScorerBackend {
    Keyword,
    Llm,
}

impl FromStr for ScorerBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyword" => Ok(ScorerBackend::Keyword),
            "llm" => Ok(ScorerBackend::Llm),
            other => bail!("unknown scorer backend '{other}' (expected 'keyword' or 'llm')"),
        }
    }
}

/// Application configuration loaded from environment variables.
/// Startup fails if a required variable is missing or a value is malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub anthropic_api_key: String,
    pub port: u16,
    pub rust_log: String,
    pub llm_timeout_secs: u64,
    /// 1 means no retry inside the client.
    pub llm_max_attempts: u32,
    pub ingest_concurrency: usize,
    pub match_concurrency: usize,
    pub accept_threshold: u8,
    pub scorer_backend: ScorerBackend,
    pub ocr_lang: String,
    pub tesseract_bin: String,
    pub pdftoppm_bin: String,
    pub max_upload_mb: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let accept_threshold: u8 = optional_env("ACCEPT_THRESHOLD", 60)?;
        if accept_threshold > 100 {
            bail!("ACCEPT_THRESHOLD must be between 0 and 100, got {accept_threshold}");
        }

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: require_env("REDIS_URL")?,
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            port: optional_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            llm_timeout_secs: optional_env("LLM_TIMEOUT_SECS", 120)?,
            llm_max_attempts: optional_env("LLM_MAX_ATTEMPTS", 1)?,
            ingest_concurrency: optional_env("INGEST_CONCURRENCY", 2)?,
            match_concurrency: optional_env("MATCH_CONCURRENCY", 4)?,
            accept_threshold,
            scorer_backend: optional_env("SCORER_BACKEND", ScorerBackend::Keyword)?,
            ocr_lang: std::env::var("OCR_LANG").unwrap_or_else(|_| "eng".to_string()),
            tesseract_bin: std::env::var("TESSERACT_BIN")
                .unwrap_or_else(|_| "tesseract".to_string()),
            pdftoppm_bin: std::env::var("PDFTOPPM_BIN").unwrap_or_else(|_| "pdftoppm".to_string()),
            max_upload_mb: optional_env("MAX_UPLOAD_MB", 25)?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("{key} has invalid value '{raw}': {e}"))
}
