//! Standardizer: extracted content → `StandardizedResume` via one backend call.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::PipelineError;
use crate::extraction::{file_stem, ExtractedContent};
use crate::ingest::prompts::{STANDARDIZE_PROMPT, STANDARDIZE_SYSTEM};
use crate::llm_client::prompts::NO_FABRICATION_INSTRUCTION;
use crate::llm_client::{parse_json_response, TextBackend};
use crate::models::resume::{identity_key, CandidateProfile, StandardizedResume};
use crate::storage::artifacts::{self, ArtifactStore};
use crate::storage::{Checkpoint, StageLedger};

pub struct Standardized {
    pub record: StandardizedResume,
    /// True when an earlier standardization was reused without a backend call.
    pub reused: bool,
}

pub struct Standardizer {
    backend: Arc<dyn TextBackend>,
    artifacts: Arc<dyn ArtifactStore>,
    ledger: Arc<dyn StageLedger>,
}

impl Standardizer {
    pub fn new(
        backend: Arc<dyn TextBackend>,
        artifacts: Arc<dyn ArtifactStore>,
        ledger: Arc<dyn StageLedger>,
    ) -> Self {
        Self {
            backend,
            artifacts,
            ledger,
        }
    }

    /// Standardizes `content`, reusing the previous result for the same
    /// identity key unless `force` is set.
    pub async fn standardize(
        &self,
        content: &ExtractedContent,
        force: bool,
    ) -> Result<Standardized, PipelineError> {
        let key = identity_key(&content.source_filename, None)?;

        if !force {
            if let Some(record) = self.previous(key, &content.source_filename).await {
                debug!(
                    identity_key = %key,
                    file = %content.source_filename,
                    "Reusing standardized record"
                );
                return Ok(Standardized {
                    record,
                    reused: true,
                });
            }
        }

        let record = self.standardize_fresh(content, key).await?;
        Ok(Standardized {
            record,
            reused: false,
        })
    }

    /// Always calls the backend. Used directly by the repair pass, which must
    /// not be short-circuited by the reuse rule.
    ///
    /// Backend failures are returned as-is; this component never retries.
    pub async fn standardize_fresh(
        &self,
        content: &ExtractedContent,
        key: Uuid,
    ) -> Result<StandardizedResume, PipelineError> {
        if content.text.trim().is_empty() {
            return Err(PipelineError::EmptyContent(content.source_filename.clone()));
        }

        let prompt = build_prompt(content);
        let raw = self.backend.complete(&prompt, STANDARDIZE_SYSTEM).await?;

        let stem = file_stem(&content.source_filename);
        if let Err(e) = self
            .artifacts
            .put(
                &artifacts::raw_response_key(&stem),
                Bytes::from(raw.clone()),
                "text/markdown",
            )
            .await
        {
            warn!(file = %content.source_filename, "Could not store raw backend response: {e}");
        }

        let mut profile: CandidateProfile = parse_json_response(&raw)?;
        profile.normalize();

        let source_file = artifacts::standardized_key(&stem);
        let record = StandardizedResume {
            identity_key: key,
            valid: profile.has_valid_name(),
            profile,
            timestamp: Utc::now(),
            source_file: source_file.clone(),
            original_filename: content.source_filename.clone(),
            repair_attempted: false,
        };

        artifacts::put_json(self.artifacts.as_ref(), &source_file, &record).await?;
        if let Err(e) = self.ledger.mark(key, Checkpoint::Standardized).await {
            warn!(identity_key = %key, "Could not update stage ledger: {e}");
        }

        info!(
            identity_key = %key,
            file = %content.source_filename,
            name = %record.profile.name,
            "Standardized resume"
        );
        Ok(record)
    }

    /// The earlier record for `key`, if the ledger says standardization
    /// completed and the artifact is still there.
    async fn previous(&self, key: Uuid, filename: &str) -> Option<StandardizedResume> {
        let status = match self.ledger.status(key).await {
            Ok(status) => status,
            Err(e) => {
                warn!(identity_key = %key, "Stage ledger unavailable, standardizing afresh: {e}");
                return None;
            }
        };
        status.standardized?;

        let stored: Option<StandardizedResume> = artifacts::get_json(
            self.artifacts.as_ref(),
            &artifacts::standardized_key(&file_stem(filename)),
        )
        .await
        .ok()
        .flatten();
        stored.filter(|record| record.identity_key == key)
    }
}

fn build_prompt(content: &ExtractedContent) -> String {
    let links = if content.links.is_empty() {
        "(none)".to_string()
    } else {
        content.links.join("\n")
    };
    STANDARDIZE_PROMPT
        .replace("{resume_text}", content.text.trim())
        .replace("{links}", &links)
        .replace("{no_fabrication}", NO_FABRICATION_INSTRUCTION)
}
