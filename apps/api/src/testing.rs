//! In-memory implementations of every boundary trait, for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use uuid::Uuid;

use crate::errors::PipelineError;
use crate::extraction::{DocumentExtractor, ExtractedContent, ExtractionMethod, RawDocument};
use crate::ingest::IngestPipeline;
use crate::llm_client::{LlmError, TextBackend};
use crate::matching::{KeywordEvaluator, KeywordExtractor, Matcher, Retailor};
use crate::models::resume::{identity_key, CandidateProfile, Experience, StandardizedResume};
use crate::run::RunRegistry;
use crate::state::AppState;
use crate::storage::{
    ArtifactStore, Checkpoint, Filter, ResumeGateway, ResumeStore, StageLedger, StageStatus,
};

// ────────────────────────────────────────────────────────────────────────────
// Backend
// ────────────────────────────────────────────────────────────────────────────

type Responder = dyn Fn(&str) -> Result<String, LlmError> + Send + Sync;

/// Backend whose answer is computed from the prompt by a closure.
pub struct ScriptedBackend {
    responder: Box<Responder>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(
        responder: impl Fn(&str) -> Result<String, LlmError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with the same text.
    pub fn fixed(response: &str) -> Self {
        let response = response.to_string();
        Self::new(move |_| Ok(response.clone()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextBackend for ScriptedBackend {
    async fn complete(&self, prompt: &str, _system: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        (self.responder)(prompt)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Extractor
// ────────────────────────────────────────────────────────────────────────────

type ExtractFn = dyn Fn(&RawDocument) -> Result<String, PipelineError> + Send + Sync;

pub struct ScriptedExtractor {
    method: ExtractionMethod,
    extract: Box<ExtractFn>,
    calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn new(
        method: ExtractionMethod,
        extract: impl Fn(&RawDocument) -> Result<String, PipelineError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            method,
            extract: Box::new(extract),
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns the document bytes as text.
    pub fn echo(method: ExtractionMethod) -> Self {
        Self::new(method, |doc| Ok(String::from_utf8_lossy(&doc.bytes).into_owned()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DocumentExtractor for ScriptedExtractor {
    fn method(&self) -> ExtractionMethod {
        self.method
    }

    fn extract(&self, doc: &RawDocument) -> Result<ExtractedContent, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = (self.extract)(doc)?;
        ExtractedContent::from_text(doc, text, Vec::new(), self.method)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stores
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryResumeStore {
    // identity_key → (row id, insertion order, record)
    rows: Mutex<HashMap<Uuid, (Uuid, usize, StandardizedResume)>>,
    inserted: AtomicUsize,
}

impl MemoryResumeStore {
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn row_id(&self, key: Uuid) -> Option<Uuid> {
        self.rows.lock().unwrap().get(&key).map(|(id, _, _)| *id)
    }
}

#[async_trait]
impl ResumeStore for MemoryResumeStore {
    async fn find(&self, filter: &Filter) -> Result<Vec<StandardizedResume>, PipelineError> {
        let rows = self.rows.lock().unwrap();
        let mut hits: Vec<(usize, StandardizedResume)> = rows
            .values()
            .filter(|(_, _, r)| filter.evaluate(&serde_json::to_value(r).unwrap()))
            .map(|(_, order, r)| (*order, r.clone()))
            .collect();
        hits.sort_by_key(|(order, _)| *order);
        Ok(hits.into_iter().map(|(_, r)| r).collect())
    }

    async fn insert_or_update(&self, record: &StandardizedResume) -> Result<Uuid, PipelineError> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&record.identity_key) {
            Some(existing) => existing.2 = record.clone(),
            None => {
                let order = self.inserted.fetch_add(1, Ordering::SeqCst);
                rows.insert(record.identity_key, (Uuid::new_v4(), order, record.clone()));
            }
        }
        Ok(record.identity_key)
    }

    async fn delete(&self, filter: &Filter) -> Result<u64, PipelineError> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|_, (_, _, r)| !filter.evaluate(&serde_json::to_value(&*r).unwrap()));
        Ok((before - rows.len()) as u64)
    }

    async fn ping(&self) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// Store that is unreachable.
pub struct DownResumeStore;

#[async_trait]
impl ResumeStore for DownResumeStore {
    async fn find(&self, _: &Filter) -> Result<Vec<StandardizedResume>, PipelineError> {
        Err(PipelineError::PersistenceError("connection refused".into()))
    }

    async fn insert_or_update(&self, _: &StandardizedResume) -> Result<Uuid, PipelineError> {
        Err(PipelineError::PersistenceError("connection refused".into()))
    }

    async fn delete(&self, _: &Filter) -> Result<u64, PipelineError> {
        Err(PipelineError::PersistenceError("connection refused".into()))
    }

    async fn ping(&self) -> Result<(), PipelineError> {
        Err(PipelineError::PersistenceError("connection refused".into()))
    }
}

#[derive(Default)]
pub struct MemoryArtifacts {
    objects: Mutex<HashMap<String, Bytes>>,
}

impl MemoryArtifacts {
    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn remove(&self, key: &str) {
        self.objects.lock().unwrap().remove(key);
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifacts {
    async fn put(&self, key: &str, body: Bytes, _content_type: &str) -> Result<(), PipelineError> {
        self.objects.lock().unwrap().insert(key.to_string(), body);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, PipelineError> {
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }
}

#[derive(Default)]
pub struct MemoryLedger {
    entries: Mutex<HashMap<Uuid, StageStatus>>,
}

#[async_trait]
impl StageLedger for MemoryLedger {
    async fn mark(&self, key: Uuid, checkpoint: Checkpoint) -> Result<(), PipelineError> {
        self.entries
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .set(checkpoint, Utc::now());
        Ok(())
    }

    async fn status(&self, key: Uuid) -> Result<StageStatus, PipelineError> {
        Ok(self.entries.lock().unwrap().get(&key).cloned().unwrap_or_default())
    }
}

/// Ledger whose backing service is down.
pub struct DownLedger;

#[async_trait]
impl StageLedger for DownLedger {
    async fn mark(&self, _: Uuid, _: Checkpoint) -> Result<(), PipelineError> {
        Err(PipelineError::PersistenceError("stage ledger: connection refused".into()))
    }

    async fn status(&self, _: Uuid) -> Result<StageStatus, PipelineError> {
        Err(PipelineError::PersistenceError("stage ledger: connection refused".into()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Fixtures
// ────────────────────────────────────────────────────────────────────────────

pub fn sample_resume(filename: &str, name: &str, skills: &[&str]) -> StandardizedResume {
    StandardizedResume {
        identity_key: identity_key(filename, None).unwrap(),
        profile: CandidateProfile {
            name: name.to_string(),
            email: Some(format!(
                "{}@example.com",
                name.split_whitespace().next().unwrap_or("x").to_lowercase()
            )),
            skills: skills.iter().map(|s| s.to_string()).collect(),
            experience: vec![Experience {
                title: "Data Analyst".into(),
                company: "Acme Corp".into(),
                duration: "2019 - 2023".into(),
                location: None,
                highlights: vec!["Built weekly reporting dashboards".into()],
            }],
            ..Default::default()
        },
        timestamp: Utc::now(),
        source_file: format!("standardized/{filename}.json"),
        original_filename: filename.to_string(),
        valid: true,
        repair_attempted: false,
    }
}

/// Backend JSON for a profile with the given name.
pub fn profile_json(name: &str, skills: &[&str]) -> String {
    serde_json::json!({
        "name": name,
        "email": null,
        "skills": skills,
        "experience": [{"title": "Engineer", "company": "Initech", "duration": "2020 - 2024"}],
        "education": [{"institution": "State University", "degree": "BSc", "field": "CS"}]
    })
    .to_string()
}

/// Full application state over in-memory stores. Extraction echoes the
/// uploaded bytes as text.
pub fn test_state(backend: Arc<ScriptedBackend>) -> AppState {
    let gateway = ResumeGateway::new(Arc::new(MemoryResumeStore::default()));
    let pipeline = IngestPipeline::new(
        Arc::new(ScriptedExtractor::echo(ExtractionMethod::Native)),
        Arc::new(ScriptedExtractor::echo(ExtractionMethod::Ocr)),
        backend.clone(),
        gateway.clone(),
        Arc::new(MemoryArtifacts::default()),
        Arc::new(MemoryLedger::default()),
        2,
    );
    AppState {
        gateway,
        pipeline: Arc::new(pipeline),
        keyword_extractor: KeywordExtractor::new(backend.clone()),
        matcher: Arc::new(Matcher::new(Arc::new(KeywordEvaluator), 2, 60)),
        retailor: Retailor::new(backend),
        runs: RunRegistry::new(),
        max_upload_bytes: 1024 * 1024,
    }
}
