//! Candidate evaluation: pluggable, trait-based scorer that measures one
//! standardized record against a job keyword set.
//!
//! Default: `KeywordEvaluator` (pure Rust, deterministic, no backend call).
//! `LlmEvaluator` asks the text backend for a score instead. `Matcher` holds
//! an `Arc<dyn CandidateEvaluator>` chosen at startup.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;
use crate::llm_client::{complete_json, TextBackend};
use crate::matching::prompts::{EVALUATE_PROMPT, EVALUATE_SYSTEM};
use crate::models::matching::JobKeywordSet;
use crate::models::resume::StandardizedResume;

// ────────────────────────────────────────────────────────────────────────────
// Output + trait
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub score: u8, // 0 – 100
    pub matched_keywords: Vec<String>,
    pub rationale: String,
}

#[async_trait]
pub trait CandidateEvaluator: Send + Sync {
    /// "keyword" | "llm", reported alongside match results.
    fn backend_name(&self) -> &'static str;

    async fn evaluate(
        &self,
        record: &StandardizedResume,
        keywords: &JobKeywordSet,
    ) -> Result<Evaluation, PipelineError>;
}

// ────────────────────────────────────────────────────────────────────────────
// KeywordEvaluator
// ────────────────────────────────────────────────────────────────────────────

/// Where in the record a keyword was found.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Evidence {
    Skill,
    RelatedSkill,
    PartialSkill,
    Experience,
    Summary,
    Certification,
    Education,
}

impl Evidence {
    fn strength(self) -> f32 {
        match self {
            Evidence::Skill => 1.0,
            Evidence::RelatedSkill => 0.8,
            Evidence::Experience | Evidence::Summary | Evidence::Certification => 0.6,
            Evidence::PartialSkill => 0.5,
            Evidence::Education => 0.4,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Evidence::Skill => "skill",
            Evidence::RelatedSkill => "related skill",
            Evidence::PartialSkill => "partial skill",
            Evidence::Experience => "experience",
            Evidence::Summary => "summary",
            Evidence::Certification => "certification",
            Evidence::Education => "education",
        }
    }
}

/// Weighted keyword overlap.
///
/// Per keyword, the strongest evidence wins:
/// - skill equal after stemming → 1.0
/// - skill phrase containing the keyword → 0.8
/// - experience titles/highlights, summary, certifications → 0.6
/// - keyword phrase containing a skill → 0.5
/// - education → 0.4
///
/// score = round(mean strength × 100)
pub struct KeywordEvaluator;

#[async_trait]
impl CandidateEvaluator for KeywordEvaluator {
    fn backend_name(&self) -> &'static str {
        "keyword"
    }

    async fn evaluate(
        &self,
        record: &StandardizedResume,
        keywords: &JobKeywordSet,
    ) -> Result<Evaluation, PipelineError> {
        Ok(keyword_overlap(record, keywords))
    }
}

fn keyword_overlap(record: &StandardizedResume, keywords: &JobKeywordSet) -> Evaluation {
    if keywords.is_empty() {
        return Evaluation {
            score: 0,
            matched_keywords: vec![],
            rationale: "No keywords to match.".to_string(),
        };
    }

    let profile = &record.profile;
    let skills: Vec<Vec<String>> = profile.skills.iter().map(|s| tokenize(s)).collect();
    let experience: Vec<Vec<String>> = profile
        .experience
        .iter()
        .flat_map(|e| {
            std::iter::once(e.title.as_str()).chain(e.highlights.iter().map(String::as_str))
        })
        .map(tokenize)
        .collect();
    let summary: Vec<Vec<String>> = profile.summary.iter().map(|s| tokenize(s)).collect();
    let certifications: Vec<Vec<String>> =
        profile.certifications.iter().map(|c| tokenize(c)).collect();
    let education: Vec<Vec<String>> = profile
        .education
        .iter()
        .flat_map(|e| [e.degree.as_str(), e.field.as_str(), e.institution.as_str()])
        .map(tokenize)
        .collect();

    let mut total = 0.0_f32;
    let mut matched = Vec::new();
    let mut missing = Vec::new();

    for keyword in keywords.iter() {
        let needle = tokenize(keyword);
        let mut best: Option<Evidence> = None;
        let mut consider = |evidence: Evidence| {
            if best.map_or(true, |b| evidence.strength() > b.strength()) {
                best = Some(evidence);
            }
        };

        for skill in &skills {
            if *skill == needle {
                consider(Evidence::Skill);
            } else if contains_phrase(skill, &needle) {
                consider(Evidence::RelatedSkill);
            } else if contains_phrase(&needle, skill) {
                consider(Evidence::PartialSkill);
            }
        }
        if experience.iter().any(|t| contains_phrase(t, &needle)) {
            consider(Evidence::Experience);
        }
        if summary.iter().any(|t| contains_phrase(t, &needle)) {
            consider(Evidence::Summary);
        }
        if certifications.iter().any(|t| contains_phrase(t, &needle)) {
            consider(Evidence::Certification);
        }
        if education.iter().any(|t| contains_phrase(t, &needle)) {
            consider(Evidence::Education);
        }

        match best {
            Some(evidence) => {
                total += evidence.strength();
                matched.push((keyword.to_string(), evidence));
            }
            None => missing.push(keyword.to_string()),
        }
    }

    let score = ((total / keywords.len() as f32) * 100.0).round().clamp(0.0, 100.0) as u8;
    let rationale = build_rationale(&matched, &missing, keywords.len());

    Evaluation {
        score,
        matched_keywords: matched.into_iter().map(|(k, _)| k).collect(),
        rationale,
    }
}

fn build_rationale(matched: &[(String, Evidence)], missing: &[String], total: usize) -> String {
    let mut out = format!("Matched {} of {} keywords", matched.len(), total);
    if matched.is_empty() {
        out.push('.');
    } else {
        let found: Vec<String> = matched
            .iter()
            .map(|(k, e)| format!("{k} ({})", e.label()))
            .collect();
        out.push_str(&format!(": {}.", found.join(", ")));
    }
    if !missing.is_empty() {
        out.push_str(&format!(" Missing: {}.", missing.join(", ")));
    }
    out
}

/// Lower-cased, stemmed word tokens. `+`, `#` and inner `.` stay part of a
/// token so `c++`, `c#` and `node.js` survive.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || matches!(c, '+' | '#' | '.')))
        .map(|t| t.trim_matches('.'))
        .filter(|t| !t.is_empty())
        .map(stem)
        .collect()
}

/// Light suffix stripping, enough for "developers" ≈ "developer" ≈ "develop".
fn stem(word: &str) -> String {
    const SUFFIXES: [(&str, &str); 7] = [
        ("ies", "y"),
        ("ing", ""),
        ("ment", ""),
        ("ers", ""),
        ("er", ""),
        ("ed", ""),
        ("s", ""),
    ];
    for (suffix, replacement) in SUFFIXES {
        if let Some(base) = word.strip_suffix(suffix) {
            if suffix == "s" && base.ends_with('s') {
                continue;
            }
            if base.chars().count() >= 3 && base.chars().all(|c| c.is_alphanumeric()) {
                return format!("{base}{replacement}");
            }
        }
    }
    word.to_string()
}

fn contains_phrase(haystack: &[String], needle: &[String]) -> bool {
    !needle.is_empty()
        && haystack.len() >= needle.len()
        && haystack.windows(needle.len()).any(|w| w == needle)
}

// ────────────────────────────────────────────────────────────────────────────
// LlmEvaluator
// ────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct EvaluateResponse {
    score: i64,
    #[serde(default)]
    matched_keywords: Vec<String>,
    #[serde(default)]
    rationale: String,
}

/// Semantic scoring through the text backend.
pub struct LlmEvaluator {
    backend: Arc<dyn TextBackend>,
}

impl LlmEvaluator {
    pub fn new(backend: Arc<dyn TextBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl CandidateEvaluator for LlmEvaluator {
    fn backend_name(&self) -> &'static str {
        "llm"
    }

    async fn evaluate(
        &self,
        record: &StandardizedResume,
        keywords: &JobKeywordSet,
    ) -> Result<Evaluation, PipelineError> {
        let resume = serde_json::to_string_pretty(&record.profile)
            .map_err(|e| PipelineError::ValidationError(e.to_string()))?;
        let prompt = EVALUATE_PROMPT
            .replace("{keywords}", &keywords.to_vec().join(", "))
            .replace("{resume}", &resume);

        let response: EvaluateResponse =
            complete_json(self.backend.as_ref(), &prompt, EVALUATE_SYSTEM).await?;

        let score = u8::try_from(response.score)
            .ok()
            .filter(|s| *s <= 100)
            .ok_or_else(|| {
                PipelineError::ResponseParseError(format!(
                    "score {} is outside 0..=100",
                    response.score
                ))
            })?;

        // Only keywords that were actually asked about.
        let matched_keywords = JobKeywordSet::from_terms(&response.matched_keywords)
            .iter()
            .filter(|k| keywords.contains(k))
            .map(str::to_string)
            .collect();

        Ok(Evaluation {
            score,
            matched_keywords,
            rationale: response.rationale.trim().to_string(),
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
