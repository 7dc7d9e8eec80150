//! Explicit pipeline-run context.
//!
//! A `RunContext` is created per upload batch or scoring run and threaded
//! through every stage call. It owns the run's counters, cancellation flag,
//! abort reason and progress callback; nothing about a run outlives it except the
//! finished snapshot kept by the `RunRegistry`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::errors::PipelineError;

const FINISHED_RUNS_KEPT: usize = 64;

// ────────────────────────────────────────────────────────────────────────────
// Progress + batch reports
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub run_id: Uuid,
    pub completed: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
}

pub type ProgressCallback = Arc<dyn Fn(&Progress) + Send + Sync>;

/// Stage at which an item failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extract,
    Standardize,
    Validate,
    Persist,
    Evaluate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageError {
    pub stage: Stage,
    pub error: PipelineError,
}

pub trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, StageError>;
}

impl<T, E: Into<PipelineError>> AtStage<T> for Result<T, E> {
    fn at(self, stage: Stage) -> Result<T, StageError> {
        self.map_err(|e| StageError {
            stage,
            error: e.into(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    /// Filename for the write path, candidate name for the read path.
    pub item: String,
    pub identity_key: Option<Uuid>,
    pub stage: Stage,
    pub code: &'static str,
    pub message: String,
}

impl ItemFailure {
    pub fn new(item: impl Into<String>, identity_key: Option<Uuid>, err: &StageError) -> Self {
        Self {
            item: item.into(),
            identity_key,
            stage: err.stage,
            code: err.error.code(),
            message: err.error.to_string(),
        }
    }
}

/// Result of one batch: every attempted item is either in `items` or in
/// `failures`, never dropped.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport<T> {
    pub run_id: Uuid,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub items: Vec<T>,
    pub failures: Vec<ItemFailure>,
}

impl<T> BatchReport<T> {
    pub fn new(run_id: Uuid, items: Vec<T>, failures: Vec<ItemFailure>, cancelled: bool) -> Self {
        Self {
            run_id,
            attempted: items.len() + failures.len(),
            succeeded: items.len(),
            failed: failures.len(),
            cancelled,
            items,
            failures,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// RunContext
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Counters {
    completed: usize,
    total: usize,
    succeeded: usize,
    failed: usize,
}

pub struct RunContext {
    run_id: Uuid,
    cancelled: AtomicBool,
    aborted: Mutex<Option<PipelineError>>,
    counters: Mutex<Counters>,
    on_progress: Option<ProgressCallback>,
}

impl RunContext {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            cancelled: AtomicBool::new(false),
            aborted: Mutex::new(None),
            counters: Mutex::new(Counters::default()),
            on_progress: None,
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn set_total(&self, total: usize) {
        self.lock().total = total;
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Stops the run on an error that every remaining item would hit too.
    /// The first reason recorded is kept.
    pub fn abort(&self, reason: PipelineError) {
        let mut slot = self.aborted.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(reason);
        }
    }

    pub fn abort_reason(&self) -> Option<PipelineError> {
        self.aborted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// No new unit of work starts once this is true.
    pub fn should_stop(&self) -> bool {
        self.is_cancelled() || self.abort_reason().is_some()
    }

    pub fn record_success(&self) {
        self.record(true);
    }

    pub fn record_failure(&self) {
        self.record(false);
    }

    /// The callback runs while the counter lock is held, so observers see
    /// `completed` strictly increase by one per call regardless of which
    /// worker finished first.
    fn record(&self, ok: bool) {
        let mut counters = self.lock();
        counters.completed += 1;
        if ok {
            counters.succeeded += 1;
        } else {
            counters.failed += 1;
        }
        if let Some(callback) = &self.on_progress {
            callback(&self.progress_from(&counters));
        }
    }

    pub fn snapshot(&self) -> Progress {
        let counters = self.lock();
        self.progress_from(&counters)
    }

    fn progress_from(&self, counters: &Counters) -> Progress {
        Progress {
            run_id: self.run_id,
            completed: counters.completed,
            total: counters.total,
            succeeded: counters.succeeded,
            failed: counters.failed,
            cancelled: self.is_cancelled(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Per-identity single-writer locks
// ────────────────────────────────────────────────────────────────────────────

/// One async mutex per identity key, created on demand and dropped once no
/// holder is left.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<Uuid, Weak<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.retain(|_, weak| weak.strong_count() > 0);
            match locks.get(&key).and_then(Weak::upgrade) {
                Some(existing) => existing,
                None => {
                    let fresh = Arc::new(tokio::sync::Mutex::new(()));
                    locks.insert(key, Arc::downgrade(&fresh));
                    fresh
                }
            }
        };
        lock.lock_owned().await
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Active-run registry
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct RegistryInner {
    active: HashMap<Uuid, Arc<RunContext>>,
    finished: VecDeque<Progress>,
}

/// Tracks running batches so they can be polled and cancelled from other
/// requests.
#[derive(Clone, Default)]
pub struct RunRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new run. The run leaves the active set when the returned
    /// guard drops.
    pub fn start(&self, run_id: Option<Uuid>) -> Result<RunGuard, PipelineError> {
        let run_id = run_id.unwrap_or_else(Uuid::new_v4);
        let ctx = Arc::new(RunContext::new(run_id));
        let mut inner = self.lock();
        if inner.active.contains_key(&run_id) {
            return Err(PipelineError::ValidationError(format!(
                "run {run_id} is already active"
            )));
        }
        inner.active.insert(run_id, ctx.clone());
        Ok(RunGuard {
            registry: self.clone(),
            ctx,
        })
    }

    pub fn progress(&self, run_id: Uuid) -> Option<Progress> {
        let inner = self.lock();
        if let Some(ctx) = inner.active.get(&run_id) {
            return Some(ctx.snapshot());
        }
        inner.finished.iter().find(|p| p.run_id == run_id).cloned()
    }

    /// Returns false when no active run has that id.
    pub fn cancel(&self, run_id: Uuid) -> bool {
        match self.lock().active.get(&run_id) {
            Some(ctx) => {
                ctx.cancel();
                true
            }
            None => false,
        }
    }

    fn finish(&self, run_id: Uuid) {
        let mut inner = self.lock();
        if let Some(ctx) = inner.active.remove(&run_id) {
            inner.finished.push_front(ctx.snapshot());
            inner.finished.truncate(FINISHED_RUNS_KEPT);
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct RunGuard {
    registry: RunRegistry,
    ctx: Arc<RunContext>,
}

impl RunGuard {
    pub fn context(&self) -> &RunContext {
        &self.ctx
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.finish(self.ctx.run_id());
    }
}
