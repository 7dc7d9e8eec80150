//! Keyword Extractor: job description → `JobKeywordSet`.

use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::errors::PipelineError;
use crate::llm_client::{complete_json, TextBackend};
use crate::matching::prompts::{KEYWORDS_PROMPT, KEYWORDS_SYSTEM};
use crate::models::matching::JobKeywordSet;

#[derive(Deserialize)]
struct KeywordsResponse {
    #[serde(default)]
    keywords: Vec<String>,
}

/// What a caller may hand to the read path: raw job text, or keywords it
/// already extracted and wants reused verbatim.
#[derive(Debug, Clone)]
pub enum JobInput {
    Description(String),
    Keywords(Vec<String>),
}

impl JobInput {
    /// Builds the input from request fields. Explicit keywords win.
    pub fn from_parts(
        job_description: Option<String>,
        keywords: Option<Vec<String>>,
    ) -> Result<Self, PipelineError> {
        match (keywords, job_description) {
            (Some(keywords), _) if !keywords.is_empty() => Ok(JobInput::Keywords(keywords)),
            (_, Some(text)) if !text.trim().is_empty() => Ok(JobInput::Description(text)),
            _ => Err(PipelineError::ValidationError(
                "either job_description or keywords is required".into(),
            )),
        }
    }
}

#[derive(Clone)]
pub struct KeywordExtractor {
    backend: Arc<dyn TextBackend>,
}

impl KeywordExtractor {
    pub fn new(backend: Arc<dyn TextBackend>) -> Self {
        Self { backend }
    }

    /// One backend call. Output is not guaranteed stable across calls, so a
    /// run resolves its keywords once and reuses them.
    pub async fn extract_keywords(
        &self,
        job_description: &str,
    ) -> Result<JobKeywordSet, PipelineError> {
        let text = job_description.trim();
        if text.is_empty() {
            return Err(PipelineError::ValidationError("job description is empty".into()));
        }

        let prompt = KEYWORDS_PROMPT.replace("{job_description}", text);
        let response: KeywordsResponse =
            complete_json(self.backend.as_ref(), &prompt, KEYWORDS_SYSTEM).await?;

        let set = JobKeywordSet::from_terms(response.keywords);
        if set.is_empty() {
            return Err(PipelineError::ResponseParseError(
                "backend returned no keywords".into(),
            ));
        }
        info!(keywords = set.len(), "Extracted job keywords");
        Ok(set)
    }

    pub async fn resolve(&self, input: &JobInput) -> Result<JobKeywordSet, PipelineError> {
        match input {
            JobInput::Description(text) => self.extract_keywords(text).await,
            JobInput::Keywords(terms) => {
                let set = JobKeywordSet::from_terms(terms);
                if set.is_empty() {
                    Err(PipelineError::ValidationError("keywords are all blank".into()))
                } else {
                    Ok(set)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;

    #[tokio::test]
    async fn test_keywords_are_normalized_and_deduplicated() {
        let backend = Arc::new(ScriptedBackend::fixed(
            "```json\n{\"keywords\": [\"Python\", \"SQL\", \"python \", \"Data Analysis\"]}\n```",
        ));
        let extractor = KeywordExtractor::new(backend.clone());

        let set = extractor
            .extract_keywords("We need a Python and SQL analyst.")
            .await
            .unwrap();

        assert_eq!(set.to_vec(), vec!["data analysis", "python", "sql"]);
        assert!(backend.prompts()[0].contains("We need a Python and SQL analyst."));
    }

    #[tokio::test]
    async fn test_empty_description_is_rejected_without_backend_call() {
        let backend = Arc::new(ScriptedBackend::fixed("{}"));
        let extractor = KeywordExtractor::new(backend.clone());

        let err = extractor.extract_keywords("  \n ").await.unwrap_err();

        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_explicit_keywords_skip_the_backend() {
        let backend = Arc::new(ScriptedBackend::fixed("{}"));
        let extractor = KeywordExtractor::new(backend.clone());
        let input = JobInput::from_parts(
            Some("ignored".into()),
            Some(vec!["Rust".into(), "rust".into()]),
        )
        .unwrap();

        let set = extractor.resolve(&input).await.unwrap();

        assert_eq!(set.to_vec(), vec!["rust"]);
        assert_eq!(backend.calls(), 0);
    }

    #[test]
    fn test_job_input_requires_something() {
        assert!(JobInput::from_parts(None, Some(vec![])).is_err());
        assert!(JobInput::from_parts(Some("   ".into()), None).is_err());
        assert!(matches!(
            JobInput::from_parts(Some("Rust dev".into()), None),
            Ok(JobInput::Description(_))
        ));
    }
}
