//! Matcher/Scorer: evaluates every candidate in the corpus against one
//! keyword set under bounded concurrency.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

use crate::errors::PipelineError;
use crate::matching::scoring::CandidateEvaluator;
use crate::models::matching::{rank_results, JobKeywordSet, MatchResult, MatchStatus};
use crate::models::resume::StandardizedResume;
use crate::run::{AtStage, BatchReport, ItemFailure, RunContext, Stage, StageError};

pub struct Matcher {
    evaluator: Arc<dyn CandidateEvaluator>,
    concurrency: usize,
    accept_threshold: u8,
}

impl Matcher {
    pub fn new(
        evaluator: Arc<dyn CandidateEvaluator>,
        concurrency: usize,
        accept_threshold: u8,
    ) -> Self {
        Self {
            evaluator,
            concurrency: concurrency.max(1),
            accept_threshold: accept_threshold.min(100),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.evaluator.backend_name()
    }

    /// Scores `corpus` against `keywords`.
    ///
    /// A failed evaluation becomes an `ItemFailure`; the run goes on unless
    /// the backend rejected credentials or could not be reached, which ends
    /// the run with that error. Results are ranked score-descending then by
    /// name, independent of completion order. Evaluations that finish after
    /// the run was cancelled are discarded.
    pub async fn score_corpus(
        &self,
        ctx: &RunContext,
        keywords: &JobKeywordSet,
        corpus: Vec<StandardizedResume>,
    ) -> Result<BatchReport<MatchResult>, PipelineError> {
        ctx.set_total(corpus.len());
        info!(
            run_id = %ctx.run_id(),
            candidates = corpus.len(),
            keywords = keywords.len(),
            scorer = self.evaluator.backend_name(),
            "Scoring corpus"
        );

        let outcomes = stream::iter(corpus)
            .map(|record| async move {
                let label = item_label(&record);
                let key = record.identity_key;
                let result = self.score_one(ctx, keywords, &record).await;
                match &result {
                    Ok(_) => ctx.record_success(),
                    Err(e) => {
                        warn!(identity_key = %key, "Candidate evaluation failed: {}", e.error);
                        if e.error.is_batch_fatal() {
                            ctx.abort(e.error.clone());
                        }
                        ctx.record_failure();
                    }
                }
                (label, key, result)
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;
        if let Some(reason) = ctx.abort_reason() {
            error!(run_id = %ctx.run_id(), "Scoring aborted: {reason}");
            return Err(reason);
        }

        let mut items = Vec::new();
        let mut failures = Vec::new();
        for (label, key, result) in outcomes {
            match result {
                Ok(item) => items.push(item),
                Err(e) => failures.push(ItemFailure::new(label, Some(key), &e)),
            }
        }
        rank_results(&mut items);
        failures.sort_by(|a, b| {
            a.item
                .cmp(&b.item)
                .then_with(|| a.identity_key.cmp(&b.identity_key))
        });

        let report = BatchReport::new(ctx.run_id(), items, failures, ctx.is_cancelled());
        info!(
            run_id = %ctx.run_id(),
            succeeded = report.succeeded,
            failed = report.failed,
            "Scoring finished"
        );
        Ok(report)
    }

    async fn score_one(
        &self,
        ctx: &RunContext,
        keywords: &JobKeywordSet,
        record: &StandardizedResume,
    ) -> Result<MatchResult, StageError> {
        let cancelled = || StageError {
            stage: Stage::Evaluate,
            error: PipelineError::Cancelled,
        };
        if ctx.should_stop() {
            return Err(cancelled());
        }

        let eval = self
            .evaluator
            .evaluate(record, keywords)
            .await
            .at(Stage::Evaluate)?;

        // Dispatched before cancellation, finished after: discard.
        if ctx.is_cancelled() {
            return Err(cancelled());
        }

        Ok(MatchResult {
            candidate_identity: record.identity_key,
            name: record.profile.name.clone(),
            email: record.profile.email.clone(),
            phone: record.profile.phone.clone(),
            score: eval.score,
            status: MatchStatus::classify(eval.score, self.accept_threshold),
            rationale: eval.rationale,
            matched_keywords: eval.matched_keywords,
        })
    }
}

fn item_label(record: &StandardizedResume) -> String {
    if record.profile.name.trim().is_empty() {
        record.original_filename.clone()
    } else {
        record.profile.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::*;
    use crate::matching::scoring::{Evaluation, KeywordEvaluator};
    use crate::run::Progress;
    use crate::testing::sample_resume;

    /// Keyword scoring with a per-candidate delay and a failing candidate.
    struct Flaky {
        fail_for: &'static str,
    }

    #[async_trait]
    impl CandidateEvaluator for Flaky {
        fn backend_name(&self) -> &'static str {
            "flaky"
        }

        async fn evaluate(
            &self,
            record: &StandardizedResume,
            keywords: &JobKeywordSet,
        ) -> Result<Evaluation, PipelineError> {
            // Later names finish first.
            let delay = 30u64.saturating_sub(record.profile.name.len() as u64 * 2);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if record.profile.name == self.fail_for {
                return Err(PipelineError::BackendRateLimited);
            }
            KeywordEvaluator.evaluate(record, keywords).await
        }
    }

    /// Backend that refuses every call.
    #[derive(Default)]
    struct Unauthorized {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CandidateEvaluator for Unauthorized {
        fn backend_name(&self) -> &'static str {
            "unauthorized"
        }

        async fn evaluate(
            &self,
            _: &StandardizedResume,
            _: &JobKeywordSet,
        ) -> Result<Evaluation, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(PipelineError::BackendAuthError("invalid x-api-key".into()))
        }
    }

    fn corpus() -> Vec<StandardizedResume> {
        vec![
            sample_resume("zed.pdf", "Zed Park", &["Python", "SQL"]),
            sample_resume("amy.pdf", "Amy Stone", &["Python"]),
            sample_resume("bob.pdf", "Bob Ray", &["Python"]),
            sample_resume("cy.pdf", "Cy Moreno-Alvarez", &["Java"]),
            sample_resume("dee.pdf", "Dee Li", &["SQL", "Python"]),
        ]
    }

    fn keywords() -> JobKeywordSet {
        JobKeywordSet::from_terms(["python", "sql"])
    }

    fn ctx() -> RunContext {
        RunContext::new(Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_ranking_is_deterministic_with_name_tie_break() {
        let matcher = Matcher::new(Arc::new(Flaky { fail_for: "" }), 4, 60);

        let first = matcher.score_corpus(&ctx(), &keywords(), corpus()).await.unwrap();
        let second = matcher.score_corpus(&ctx(), &keywords(), corpus()).await.unwrap();

        let names: Vec<&str> = first.items.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Dee Li", "Zed Park", "Amy Stone", "Bob Ray", "Cy Moreno-Alvarez"]
        );
        assert_eq!(first.items, second.items);
        assert_eq!(first.items[0].status, MatchStatus::Accepted);
        assert_eq!(first.items[2].score, 50);
        assert_eq!(first.items[2].status, MatchStatus::Rejected);
    }

    #[tokio::test]
    async fn test_one_failure_leaves_the_rest() {
        let matcher = Matcher::new(Arc::new(Flaky { fail_for: "Bob Ray" }), 3, 60);

        let report = matcher.score_corpus(&ctx(), &keywords(), corpus()).await.unwrap();

        assert_eq!(report.attempted, 5);
        assert_eq!(report.succeeded, 4);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].item, "Bob Ray");
        assert_eq!(report.failures[0].code, "BACKEND_RATE_LIMITED");
        assert_eq!(report.failures[0].stage, Stage::Evaluate);
        assert!(report.items.iter().all(|r| r.name != "Bob Ray"));
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_under_concurrency() {
        let seen: Arc<Mutex<Vec<usize>>> = Arc::default();
        let sink = seen.clone();
        let ctx = ctx().with_progress(Arc::new(move |p: &Progress| {
            sink.lock().unwrap().push(p.completed);
        }));
        let matcher = Matcher::new(Arc::new(Flaky { fail_for: "Amy Stone" }), 4, 60);

        matcher.score_corpus(&ctx, &keywords(), corpus()).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4, 5]);
        let snapshot = ctx.snapshot();
        assert_eq!((snapshot.completed, snapshot.total), (5, 5));
        assert_eq!((snapshot.succeeded, snapshot.failed), (4, 1));
    }

    #[tokio::test]
    async fn test_cancelled_run_discards_results() {
        let matcher = Matcher::new(Arc::new(KeywordEvaluator), 2, 60);
        let ctx = ctx();
        ctx.cancel();

        let report = matcher.score_corpus(&ctx, &keywords(), corpus()).await.unwrap();

        assert!(report.cancelled);
        assert!(report.items.is_empty());
        assert_eq!(report.failed, 5);
        assert!(report.failures.iter().all(|f| f.code == "CANCELLED"));
    }

    #[tokio::test]
    async fn test_rejected_credentials_end_the_run() {
        let evaluator = Arc::new(Unauthorized::default());
        let matcher = Matcher::new(evaluator.clone(), 2, 60);

        let err = matcher
            .score_corpus(&ctx(), &keywords(), corpus())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "BACKEND_AUTH_ERROR");
        let calls = evaluator.calls.load(Ordering::SeqCst);
        assert!(calls <= 2, "evaluator called {calls} times for 5 candidates");
    }

    #[tokio::test]
    async fn test_empty_corpus() {
        let matcher = Matcher::new(Arc::new(KeywordEvaluator), 2, 60);
        let report = matcher.score_corpus(&ctx(), &keywords(), vec![]).await.unwrap();
        assert_eq!(report.attempted, 0);
        assert!(!report.cancelled);
    }
}
