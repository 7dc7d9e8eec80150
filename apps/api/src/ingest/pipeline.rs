//! Write path: Extractor → Standardizer → Validator/Reprocessor → Gateway,
//! per document, under bounded concurrency.

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::PipelineError;
use crate::extraction::{
    extract_blocking, DocumentExtractor, DocumentFormat, ExtractedContent, ExtractionMethod,
    RawDocument,
};
use crate::ingest::standardizer::{Standardized, Standardizer};
use crate::ingest::validator::{Reprocessor, Verdict};
use crate::llm_client::TextBackend;
use crate::models::resume::{identity_key, StandardizedResume};
use crate::run::{AtStage, BatchReport, ItemFailure, KeyedLocks, RunContext, Stage, StageError};
use crate::storage::artifacts::{self, ArtifactStore};
use crate::storage::{Checkpoint, ResumeGateway, StageLedger};

pub struct UploadedFile {
    pub filename: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorSummary {
    pub code: &'static str,
    pub message: String,
}

impl From<&PipelineError> for ErrorSummary {
    fn from(e: &PipelineError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
        }
    }
}

/// Per-document outcome of a successful write.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedDocument {
    pub filename: String,
    pub identity_key: Uuid,
    pub name: String,
    pub valid: bool,
    pub verdict: Verdict,
    pub reused: bool,
    pub extraction: ExtractionMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair_error: Option<ErrorSummary>,
}

/// Per-record outcome of a corpus revalidation.
#[derive(Debug, Clone, Serialize)]
pub struct RevalidatedRecord {
    pub identity_key: Uuid,
    pub name: String,
    pub valid: bool,
    pub verdict: Verdict,
    pub updated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair_error: Option<ErrorSummary>,
}

pub struct IngestPipeline {
    extractor: Arc<dyn DocumentExtractor>,
    ocr: Arc<dyn DocumentExtractor>,
    standardizer: Arc<Standardizer>,
    reprocessor: Arc<Reprocessor>,
    gateway: ResumeGateway,
    artifacts: Arc<dyn ArtifactStore>,
    ledger: Arc<dyn StageLedger>,
    locks: KeyedLocks,
    concurrency: usize,
}

impl IngestPipeline {
    pub fn new(
        extractor: Arc<dyn DocumentExtractor>,
        ocr: Arc<dyn DocumentExtractor>,
        backend: Arc<dyn TextBackend>,
        gateway: ResumeGateway,
        artifacts: Arc<dyn ArtifactStore>,
        ledger: Arc<dyn StageLedger>,
        concurrency: usize,
    ) -> Self {
        let standardizer = Arc::new(Standardizer::new(
            backend,
            artifacts.clone(),
            ledger.clone(),
        ));
        let reprocessor = Arc::new(Reprocessor::new(
            ocr.clone(),
            standardizer.clone(),
            gateway.clone(),
            artifacts.clone(),
            ledger.clone(),
        ));
        Self {
            extractor,
            ocr,
            standardizer,
            reprocessor,
            gateway,
            artifacts,
            ledger,
            locks: KeyedLocks::new(),
            concurrency: concurrency.max(1),
        }
    }

    /// Runs every document through the write path. Per-document failures land
    /// in the report. An unreachable store aborts the batch before any
    /// document is touched; a backend that rejects credentials or cannot be
    /// reached aborts it at the first such failure.
    pub async fn process_batch(
        &self,
        ctx: &RunContext,
        files: Vec<UploadedFile>,
        force: bool,
    ) -> Result<BatchReport<ProcessedDocument>, PipelineError> {
        self.gateway.ping().await?;
        ctx.set_total(files.len());
        info!(run_id = %ctx.run_id(), documents = files.len(), force, "Starting ingest batch");

        let mut outcomes = stream::iter(files.into_iter().enumerate())
            .map(|(index, file)| async move {
                let filename = file.filename.clone();
                let key = identity_key(&filename, None).ok();
                let result = self.process_one(ctx, file, force).await;
                match &result {
                    Ok(_) => ctx.record_success(),
                    Err(e) => {
                        warn!(file = %filename, stage = ?e.stage, "Document failed: {}", e.error);
                        if e.error.is_batch_fatal() {
                            ctx.abort(e.error.clone());
                        }
                        ctx.record_failure();
                    }
                }
                (index, filename, key, result)
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;
        if let Some(reason) = ctx.abort_reason() {
            error!(run_id = %ctx.run_id(), "Ingest batch aborted: {reason}");
            return Err(reason);
        }
        outcomes.sort_by_key(|(index, ..)| *index);

        let mut items = Vec::new();
        let mut failures = Vec::new();
        for (_, filename, key, result) in outcomes {
            match result {
                Ok(doc) => items.push(doc),
                Err(e) => failures.push(ItemFailure::new(filename, key, &e)),
            }
        }

        let report = BatchReport::new(ctx.run_id(), items, failures, ctx.is_cancelled());
        info!(
            run_id = %ctx.run_id(),
            succeeded = report.succeeded,
            failed = report.failed,
            "Ingest batch finished"
        );
        Ok(report)
    }

    async fn process_one(
        &self,
        ctx: &RunContext,
        file: UploadedFile,
        force: bool,
    ) -> Result<ProcessedDocument, StageError> {
        ensure_running(ctx, Stage::Extract)?;
        let doc = RawDocument::new(file.filename, file.bytes).at(Stage::Extract)?;
        let key = identity_key(&doc.filename, None).at(Stage::Extract)?;

        // Single writer per identity key.
        let _guard = self.locks.acquire(key).await;

        if let Err(e) = self
            .artifacts
            .put(&artifacts::upload_key(&doc.filename), doc.bytes.clone(), content_type(doc.format))
            .await
        {
            warn!(identity_key = %key, "Could not store original upload: {e}");
        }

        let content = self.extract(&doc).await.at(Stage::Extract)?;
        if let Err(e) = artifacts::put_json(
            self.artifacts.as_ref(),
            &artifacts::extracted_key(&doc.stem()),
            &content,
        )
        .await
        {
            warn!(identity_key = %key, "Could not store extracted content: {e}");
        }
        self.checkpoint(key, Checkpoint::Extracted).await;

        ensure_running(ctx, Stage::Standardize)?;
        let Standardized { record, reused } = self
            .standardizer
            .standardize(&content, force)
            .await
            .at(Stage::Standardize)?;

        ensure_running(ctx, Stage::Validate)?;
        let record = self.carry_repair_flag(record).await.at(Stage::Validate)?;
        let outcome = self.reprocessor.validate_and_repair(record, Some(&doc)).await;

        ensure_running(ctx, Stage::Persist)?;
        self.gateway.upsert(&outcome.record).await.at(Stage::Persist)?;
        self.checkpoint(key, Checkpoint::Persisted).await;

        Ok(ProcessedDocument {
            filename: doc.filename,
            identity_key: key,
            name: outcome.record.profile.name.clone(),
            valid: outcome.record.valid,
            verdict: outcome.verdict,
            reused,
            extraction: content.method,
            repair_error: outcome.repair_error.as_ref().map(ErrorSummary::from),
        })
    }

    /// A fresh standardization starts with `repair_attempted` unset. The
    /// stored record remembers an earlier repair pass, so the flag is taken
    /// from it and the record is never repaired twice.
    async fn carry_repair_flag(
        &self,
        mut record: StandardizedResume,
    ) -> Result<StandardizedResume, PipelineError> {
        if !record.repair_attempted {
            if let Some(stored) = self.gateway.try_get(record.identity_key).await? {
                record.repair_attempted = stored.repair_attempted;
            }
        }
        Ok(record)
    }

    /// Primary extraction, escalating a PDF to OCR once when the text layer is
    /// missing or unreadable.
    async fn extract(&self, doc: &RawDocument) -> Result<ExtractedContent, PipelineError> {
        match extract_blocking(self.extractor.clone(), doc.clone()).await {
            Err(e @ (PipelineError::EmptyContent(_) | PipelineError::ExtractionFailure(_)))
                if doc.format == DocumentFormat::Pdf =>
            {
                warn!(file = %doc.filename, "Primary extraction failed ({e}), falling back to OCR");
                extract_blocking(self.ocr.clone(), doc.clone()).await
            }
            other => other,
        }
    }

    /// Runs the Validator/Reprocessor over every stored record.
    pub async fn revalidate_corpus(
        &self,
        ctx: &RunContext,
    ) -> Result<BatchReport<RevalidatedRecord>, PipelineError> {
        let records = self.gateway.all().await?;
        ctx.set_total(records.len());
        info!(run_id = %ctx.run_id(), records = records.len(), "Revalidating corpus");

        let mut outcomes = stream::iter(records.into_iter().enumerate())
            .map(|(index, record)| async move {
                let name = record.profile.name.clone();
                let key = record.identity_key;
                let result = async {
                    ensure_running(ctx, Stage::Validate)?;
                    let _guard = self.locks.acquire(key).await;
                    let outcome = self
                        .reprocessor
                        .revalidate_stored(record)
                        .await
                        .at(Stage::Persist)?;
                    Ok::<_, StageError>(RevalidatedRecord {
                        identity_key: key,
                        name: outcome.record.profile.name.clone(),
                        valid: outcome.record.valid,
                        verdict: outcome.verdict,
                        updated: outcome.changed,
                        repair_error: outcome.repair_error.as_ref().map(ErrorSummary::from),
                    })
                }
                .await;
                match &result {
                    Ok(_) => ctx.record_success(),
                    Err(_) => ctx.record_failure(),
                }
                (index, name, key, result)
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;
        outcomes.sort_by_key(|(index, ..)| *index);

        let mut items = Vec::new();
        let mut failures = Vec::new();
        for (_, name, key, result) in outcomes {
            match result {
                Ok(item) => items.push(item),
                Err(e) => failures.push(ItemFailure::new(name, Some(key), &e)),
            }
        }
        Ok(BatchReport::new(ctx.run_id(), items, failures, ctx.is_cancelled()))
    }

    async fn checkpoint(&self, key: Uuid, checkpoint: Checkpoint) {
        if let Err(e) = self.ledger.mark(key, checkpoint).await {
            warn!(
                identity_key = %key,
                checkpoint = checkpoint.as_str(),
                "Could not update stage ledger: {e}"
            );
        }
    }
}

fn ensure_running(ctx: &RunContext, stage: Stage) -> Result<(), StageError> {
    if ctx.should_stop() {
        Err(StageError {
            stage,
            error: PipelineError::Cancelled,
        })
    } else {
        Ok(())
    }
}

fn content_type(format: DocumentFormat) -> &'static str {
    match format {
        DocumentFormat::Pdf => "application/pdf",
        DocumentFormat::Docx => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        DocumentFormat::PlainText => "text/plain; charset=utf-8",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::LlmError;
    use crate::storage::ResumeStore;
    use crate::testing::{
        profile_json, sample_resume, DownLedger, DownResumeStore, MemoryArtifacts, MemoryLedger,
        MemoryResumeStore, ScriptedBackend, ScriptedExtractor,
    };

    struct Harness {
        pipeline: IngestPipeline,
        backend: Arc<ScriptedBackend>,
        ocr: Arc<ScriptedExtractor>,
        store: Arc<MemoryResumeStore>,
        artifacts: Arc<MemoryArtifacts>,
    }

    fn harness_with(primary: ScriptedExtractor, backend: ScriptedBackend) -> Harness {
        harness_with_ledger(primary, backend, Arc::new(MemoryLedger::default()))
    }

    fn harness_with_ledger(
        primary: ScriptedExtractor,
        backend: ScriptedBackend,
        ledger: Arc<dyn StageLedger>,
    ) -> Harness {
        let backend = Arc::new(backend);
        let ocr = Arc::new(ScriptedExtractor::echo(ExtractionMethod::Ocr));
        let store = Arc::new(MemoryResumeStore::default());
        let artifacts = Arc::new(MemoryArtifacts::default());
        let pipeline = IngestPipeline::new(
            Arc::new(primary),
            ocr.clone(),
            backend.clone(),
            ResumeGateway::new(store.clone()),
            artifacts.clone(),
            ledger,
            2,
        );
        Harness {
            pipeline,
            backend,
            ocr,
            store,
            artifacts,
        }
    }

    /// Backend that names the candidate after the first line of the resume.
    fn echo_name_backend() -> ScriptedBackend {
        ScriptedBackend::new(|prompt| {
            let name = prompt
                .split("RESUME TEXT:\n")
                .nth(1)
                .and_then(|rest| rest.lines().next())
                .unwrap_or_default()
                .to_string();
            Ok(profile_json(&name, &["Python"]))
        })
    }

    fn file(name: &str, text: &str) -> UploadedFile {
        UploadedFile {
            filename: name.to_string(),
            bytes: Bytes::from(text.to_string()),
        }
    }

    fn ctx() -> RunContext {
        RunContext::new(Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_distinct_filenames_same_person_make_two_records() {
        let extractor = ScriptedExtractor::echo(ExtractionMethod::Native);
        let h = harness_with(extractor, echo_name_backend());

        let report = h
            .pipeline
            .process_batch(
                &ctx(),
                vec![file("john_doe.pdf", "John Doe"), file("john-doe-v2.pdf", "John Doe")],
                false,
            )
            .await
            .unwrap();

        assert_eq!(report.succeeded, 2);
        assert_ne!(report.items[0].identity_key, report.items[1].identity_key);
        assert_eq!(h.store.len(), 2);
        assert!(h.artifacts.contains("uploads/john_doe.pdf"));
        assert!(h.artifacts.contains("extracted/john-doe-v2.json"));
    }

    #[tokio::test]
    async fn test_bad_document_does_not_abort_batch() {
        let extractor = ScriptedExtractor::echo(ExtractionMethod::Native);
        let h = harness_with(extractor, echo_name_backend());

        let report = h
            .pipeline
            .process_batch(
                &ctx(),
                vec![file("jane.pdf", "Jane Doe"), file("budget.xlsx", "1,2,3")],
                false,
            )
            .await
            .unwrap();

        assert_eq!((report.attempted, report.succeeded, report.failed), (2, 1, 1));
        assert_eq!(report.items[0].filename, "jane.pdf");
        assert_eq!(report.failures[0].item, "budget.xlsx");
        assert_eq!(report.failures[0].code, "UNSUPPORTED_FORMAT");
        assert_eq!(report.failures[0].stage, Stage::Extract);
    }

    #[tokio::test]
    async fn test_scanned_pdf_escalates_to_ocr() {
        let blank = ScriptedExtractor::new(ExtractionMethod::Native, |_| Ok(String::new()));
        let h = harness_with(blank, echo_name_backend());

        let report = h
            .pipeline
            .process_batch(&ctx(), vec![file("scan.pdf", "Ann Lee")], false)
            .await
            .unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.items[0].extraction, ExtractionMethod::Ocr);
        assert_eq!(report.items[0].name, "Ann Lee");
        assert_eq!(h.ocr.calls(), 1);
    }

    #[tokio::test]
    async fn test_rerun_reuses_and_updates_in_place() {
        let extractor = ScriptedExtractor::echo(ExtractionMethod::Native);
        let h = harness_with(extractor, echo_name_backend());

        h.pipeline
            .process_batch(&ctx(), vec![file("jane.pdf", "Jane Doe")], false)
            .await
            .unwrap();
        let second = h
            .pipeline
            .process_batch(&ctx(), vec![file("jane.pdf", "Jane Doe")], false)
            .await
            .unwrap();

        assert!(second.items[0].reused);
        assert_eq!(h.backend.calls(), 1);
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test]
    async fn test_unnamed_resume_is_stored_invalid_after_one_repair() {
        let h = harness_with(
            ScriptedExtractor::echo(ExtractionMethod::Native),
            ScriptedBackend::fixed(&profile_json("", &["SQL"])),
        );

        let report = h
            .pipeline
            .process_batch(&ctx(), vec![file("scan.pdf", "illegible")], false)
            .await
            .unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.items[0].verdict, Verdict::Invalid);
        assert!(!report.items[0].valid);
        assert_eq!(h.ocr.calls(), 1);
        assert_eq!(h.backend.calls(), 2);

        let stored = h
            .pipeline
            .gateway
            .get(report.items[0].identity_key)
            .await
            .unwrap();
        assert_eq!(stored.profile.name, "");
        assert!(stored.repair_attempted);
        assert!(!stored.valid);

        // A second batch reuses the flagged record and does not repair again.
        h.pipeline
            .process_batch(&ctx(), vec![file("scan.pdf", "illegible")], false)
            .await
            .unwrap();
        assert_eq!(h.ocr.calls(), 1);
        assert_eq!(h.backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_forced_reupload_never_repairs_a_flagged_record_again() {
        let h = harness_with(
            ScriptedExtractor::echo(ExtractionMethod::Native),
            ScriptedBackend::fixed(&profile_json("", &["SQL"])),
        );
        h.pipeline
            .process_batch(&ctx(), vec![file("scan.pdf", "illegible")], false)
            .await
            .unwrap();
        assert_eq!((h.ocr.calls(), h.backend.calls()), (1, 2));

        let report = h
            .pipeline
            .process_batch(&ctx(), vec![file("scan.pdf", "illegible")], true)
            .await
            .unwrap();

        // Re-standardized once, no second OCR + standardization pass.
        assert_eq!(h.ocr.calls(), 1);
        assert_eq!(h.backend.calls(), 3);
        assert_eq!(report.items[0].verdict, Verdict::Invalid);
        assert!(!report.items[0].reused);
        let stored = h.pipeline.gateway.get(report.items[0].identity_key).await.unwrap();
        assert!(stored.repair_attempted);
        assert!(!stored.valid);
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test]
    async fn test_ledger_outage_keeps_the_single_repair_bound() {
        let h = harness_with_ledger(
            ScriptedExtractor::echo(ExtractionMethod::Native),
            ScriptedBackend::fixed(&profile_json("", &["SQL"])),
            Arc::new(DownLedger),
        );

        for _ in 0..2 {
            let report = h
                .pipeline
                .process_batch(&ctx(), vec![file("scan.pdf", "illegible")], false)
                .await
                .unwrap();
            assert_eq!(report.succeeded, 1);
            assert_eq!(report.items[0].verdict, Verdict::Invalid);
        }

        // No reuse without the ledger, so the second batch standardizes
        // again, but the repair pass ran only during the first.
        assert_eq!(h.ocr.calls(), 1);
        assert_eq!(h.backend.calls(), 3);
    }

    #[tokio::test]
    async fn test_rejected_credentials_stop_the_batch() {
        let h = harness_with(
            ScriptedExtractor::echo(ExtractionMethod::Native),
            ScriptedBackend::new(|_| {
                Err(LlmError::Auth {
                    status: 401,
                    message: "invalid x-api-key".into(),
                })
            }),
        );
        let files = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|n| file(&format!("{n}.pdf"), "Ann Lee"))
            .collect();

        let err = h
            .pipeline
            .process_batch(&ctx(), files, false)
            .await
            .unwrap_err();

        assert_eq!(err, PipelineError::BackendAuthError("invalid x-api-key".into()));
        // At most the documents already in flight reached the backend.
        assert!(h.backend.calls() <= 2, "backend called {} times", h.backend.calls());
        assert_eq!(h.store.len(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_store_aborts_before_any_document() {
        let backend = Arc::new(echo_name_backend());
        let pipeline = IngestPipeline::new(
            Arc::new(ScriptedExtractor::echo(ExtractionMethod::Native)),
            Arc::new(ScriptedExtractor::echo(ExtractionMethod::Ocr)),
            backend.clone(),
            ResumeGateway::new(Arc::new(DownResumeStore)),
            Arc::new(MemoryArtifacts::default()),
            Arc::new(MemoryLedger::default()),
            2,
        );

        let err = pipeline
            .process_batch(&ctx(), vec![file("jane.pdf", "Jane Doe")], false)
            .await
            .unwrap_err();

        assert_eq!(err.code(), "PERSISTENCE_ERROR");
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_batch_reports_every_document() {
        let extractor = ScriptedExtractor::echo(ExtractionMethod::Native);
        let h = harness_with(extractor, echo_name_backend());
        let ctx = ctx();
        ctx.cancel();

        let report = h
            .pipeline
            .process_batch(&ctx, vec![file("a.pdf", "Ann Lee"), file("b.pdf", "Bo Chen")], false)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.failed, 2);
        assert!(report.failures.iter().all(|f| f.code == "CANCELLED"));
        assert_eq!(h.store.len(), 0);
        assert_eq!(h.backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_revalidate_corpus_repairs_from_stored_upload() {
        let h = harness_with(
            ScriptedExtractor::echo(ExtractionMethod::Native),
            ScriptedBackend::fixed(&profile_json("Jane Doe", &["Python"])),
        );
        let mut broken = sample_resume("jane.pdf", "", &[]);
        broken.valid = false;
        h.store.insert_or_update(&broken).await.unwrap();
        h.store
            .insert_or_update(&sample_resume("bob.pdf", "Bob Ray", &[]))
            .await
            .unwrap();
        h.artifacts
            .put("uploads/jane.pdf", Bytes::from_static(b"Jane Doe"), "application/pdf")
            .await
            .unwrap();

        let report = h.pipeline.revalidate_corpus(&ctx()).await.unwrap();

        assert_eq!(report.succeeded, 2);
        let jane = report
            .items
            .iter()
            .find(|r| r.identity_key == broken.identity_key)
            .unwrap();
        assert_eq!(jane.verdict, Verdict::Repaired);
        assert!(jane.updated);
        assert_eq!(h.store.len(), 2);
    }
}
