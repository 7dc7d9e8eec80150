//! Validator/Reprocessor: enforces the name-validity invariant and runs at
//! most one OCR + re-standardization repair pass per record.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::errors::PipelineError;
use crate::extraction::{extract_blocking, file_stem, DocumentExtractor, RawDocument};
use crate::ingest::standardizer::Standardizer;
use crate::models::resume::StandardizedResume;
use crate::storage::artifacts::{self, ArtifactStore};
use crate::storage::{Checkpoint, ResumeGateway, StageLedger};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Passed the check without repair.
    Valid,
    /// Failed the check, passed after the repair pass.
    Repaired,
    /// Still failing. Kept and flagged, never retried.
    Invalid,
}

#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub record: StandardizedResume,
    pub verdict: Verdict,
    /// Why the repair pass could not run or failed. Non-fatal.
    pub repair_error: Option<PipelineError>,
    /// True when `record` differs from the input.
    pub changed: bool,
}

pub struct Reprocessor {
    ocr: Arc<dyn DocumentExtractor>,
    standardizer: Arc<Standardizer>,
    gateway: ResumeGateway,
    artifacts: Arc<dyn ArtifactStore>,
    ledger: Arc<dyn StageLedger>,
}

impl Reprocessor {
    pub fn new(
        ocr: Arc<dyn DocumentExtractor>,
        standardizer: Arc<Standardizer>,
        gateway: ResumeGateway,
        artifacts: Arc<dyn ArtifactStore>,
        ledger: Arc<dyn StageLedger>,
    ) -> Self {
        Self {
            ocr,
            standardizer,
            gateway,
            artifacts,
            ledger,
        }
    }

    /// Checks `record` and repairs it once if its name is invalid.
    ///
    /// `original` is the uploaded document when the caller still has it;
    /// otherwise the stored upload artifact for `record.original_filename`
    /// is used. A record that already went through a repair pass is flagged
    /// invalid without another attempt.
    pub async fn validate_and_repair(
        &self,
        record: StandardizedResume,
        original: Option<&RawDocument>,
    ) -> ValidationOutcome {
        let key = record.identity_key;
        let outcome = self.check(record, original).await;
        if outcome.changed {
            // Keep the artifact in step so a later reuse sees the repair flag.
            let artifact =
                artifacts::standardized_key(&file_stem(&outcome.record.original_filename));
            if let Err(e) =
                artifacts::put_json(self.artifacts.as_ref(), &artifact, &outcome.record).await
            {
                warn!(identity_key = %key, "Could not update standardized artifact: {e}");
            }
        }
        if let Err(e) = self.ledger.mark(key, Checkpoint::Validated).await {
            warn!(identity_key = %key, "Could not update stage ledger: {e}");
        }
        outcome
    }

    /// Validates a record already in the corpus and writes the result back
    /// under the same identity key when it changed.
    pub async fn revalidate_stored(
        &self,
        record: StandardizedResume,
    ) -> Result<ValidationOutcome, PipelineError> {
        let outcome = self.validate_and_repair(record, None).await;
        if outcome.changed {
            self.gateway.upsert(&outcome.record).await?;
        }
        Ok(outcome)
    }

    async fn check(
        &self,
        mut record: StandardizedResume,
        original: Option<&RawDocument>,
    ) -> ValidationOutcome {
        let key = record.identity_key;

        if record.profile.has_valid_name() {
            let changed = !record.valid;
            record.valid = true;
            return ValidationOutcome {
                record,
                verdict: Verdict::Valid,
                repair_error: None,
                changed,
            };
        }

        if record.repair_attempted {
            warn!(
                identity_key = %key,
                "Record still invalid after its repair pass; keeping it flagged"
            );
            let changed = record.valid;
            record.valid = false;
            return ValidationOutcome {
                record,
                verdict: Verdict::Invalid,
                repair_error: None,
                changed,
            };
        }

        warn!(
            identity_key = %key,
            file = %record.original_filename,
            name = %record.profile.name,
            "Invalid name, reprocessing with OCR"
        );

        let document = match original {
            Some(doc) => Ok(doc.clone()),
            None => self.load_original(&record.original_filename).await,
        };
        let document = match document {
            Ok(doc) => doc,
            Err(e) => {
                warn!(identity_key = %key, "Repair skipped: {e}");
                let changed = record.valid;
                record.valid = false;
                return ValidationOutcome {
                    record,
                    verdict: Verdict::Invalid,
                    repair_error: Some(e),
                    changed,
                };
            }
        };

        match self.repair(&record, document).await {
            Ok(mut repaired) => {
                repaired.repair_attempted = true;
                repaired.valid = repaired.profile.has_valid_name();
                let verdict = if repaired.valid {
                    info!(identity_key = %key, name = %repaired.profile.name, "Record repaired");
                    Verdict::Repaired
                } else {
                    warn!(identity_key = %key, "Repair pass did not produce a valid name");
                    Verdict::Invalid
                };
                ValidationOutcome {
                    record: repaired,
                    verdict,
                    repair_error: None,
                    changed: true,
                }
            }
            Err(e) => {
                warn!(identity_key = %key, "Repair pass failed: {e}");
                record.repair_attempted = true;
                record.valid = false;
                ValidationOutcome {
                    record,
                    verdict: Verdict::Invalid,
                    repair_error: Some(e),
                    changed: true,
                }
            }
        }
    }

    /// OCR extraction followed by exactly one fresh standardization, keeping
    /// the record's identity key.
    async fn repair(
        &self,
        record: &StandardizedResume,
        document: RawDocument,
    ) -> Result<StandardizedResume, PipelineError> {
        let stem = document.stem();
        let content = extract_blocking(self.ocr.clone(), document).await?;
        let key = artifacts::extracted_key(&stem);
        if let Err(e) = artifacts::put_json(self.artifacts.as_ref(), &key, &content).await {
            warn!(identity_key = %record.identity_key, "Could not store OCR extraction: {e}");
        }

        let mut repaired = self
            .standardizer
            .standardize_fresh(&content, record.identity_key)
            .await?;
        repaired.original_filename = record.original_filename.clone();
        Ok(repaired)
    }

    async fn load_original(&self, filename: &str) -> Result<RawDocument, PipelineError> {
        match self.artifacts.get(&artifacts::upload_key(filename)).await? {
            Some(bytes) => RawDocument::new(filename, bytes),
            None => Err(PipelineError::OriginalDocumentMissing(filename.to_string())),
        }
    }
}
