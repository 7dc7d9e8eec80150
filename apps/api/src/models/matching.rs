use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Deduplicated, lower-cased job keywords. Ordered so every run iterates the
/// same way.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobKeywordSet(BTreeSet<String>);

impl JobKeywordSet {
    pub fn from_terms<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            terms
                .into_iter()
                .filter_map(|t| normalize_term(t.as_ref()))
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, term: &str) -> bool {
        normalize_term(term).is_some_and(|t| self.0.contains(&t))
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

/// Lower-cases, collapses whitespace and strips edge punctuation that is not
/// part of a technology name (`c++`, `c#` and `.net` survive).
fn normalize_term(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    let trimmed = collapsed
        .trim_start_matches(|c: char| !c.is_alphanumeric() && c != '.')
        .trim_end_matches(|c: char| !c.is_alphanumeric() && c != '+' && c != '#');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStatus {
    Accepted,
    Rejected,
}

impl MatchStatus {
    pub fn classify(score: u8, threshold: u8) -> Self {
        if score >= threshold {
            MatchStatus::Accepted
        } else {
            MatchStatus::Rejected
        }
    }
}

/// Outcome of evaluating one candidate. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub candidate_identity: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub score: u8,
    pub status: MatchStatus,
    pub rationale: String,
    pub matched_keywords: Vec<String>,
}

/// Score descending, then name ascending (case-insensitive). Exact name and
/// identity break the remaining ties so the order is total.
pub fn rank_results(results: &mut [MatchResult]) {
    results.sort_by(compare_results);
}

fn compare_results(a: &MatchResult, b: &MatchResult) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.candidate_identity.cmp(&b.candidate_identity))
}
