//! Retailor: rephrases a candidate record to foreground matched keywords.
//!
//! The backend only ever rewrites narrative text (summary, highlights) and
//! the order of existing skills. Its answer is merged into a copy of the
//! source record, so employer names, titles, durations and degrees are
//! carried over from the source and cannot be altered.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info};

use crate::errors::PipelineError;
use crate::llm_client::prompts::NO_FABRICATION_INSTRUCTION;
use crate::llm_client::{complete_json, TextBackend};
use crate::matching::prompts::{RETAILOR_PROMPT, RETAILOR_SYSTEM};
use crate::models::matching::JobKeywordSet;
use crate::models::resume::{RetailoredResume, StandardizedResume};

#[derive(Debug, Default, Deserialize)]
struct RetailorResponse {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    experience: Vec<HighlightRewrite>,
    #[serde(default)]
    skills: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct HighlightRewrite {
    index: usize,
    #[serde(default)]
    highlights: Vec<String>,
}

#[derive(Clone)]
pub struct Retailor {
    backend: Arc<dyn TextBackend>,
}

impl Retailor {
    pub fn new(backend: Arc<dyn TextBackend>) -> Self {
        Self { backend }
    }

    pub async fn retailor(
        &self,
        record: &StandardizedResume,
        keywords: &JobKeywordSet,
    ) -> Result<RetailoredResume, PipelineError> {
        if keywords.is_empty() {
            return Err(PipelineError::ValidationError("no keywords to retailor against".into()));
        }

        let resume = serde_json::to_string_pretty(&record.profile)
            .map_err(|e| PipelineError::ValidationError(e.to_string()))?;
        let prompt = RETAILOR_PROMPT
            .replace("{keywords}", &keywords.to_vec().join(", "))
            .replace("{resume}", &resume)
            .replace("{no_fabrication}", NO_FABRICATION_INSTRUCTION);

        let response: RetailorResponse =
            complete_json(self.backend.as_ref(), &prompt, RETAILOR_SYSTEM).await?;

        let rewritten = merge(record, response);
        info!(
            identity_key = %record.identity_key,
            keywords = keywords.len(),
            "Retailored resume"
        );
        Ok(RetailoredResume {
            resume: rewritten,
            retailored_from: record.identity_key,
            keywords: keywords.to_vec(),
            retailored_at: Utc::now(),
        })
    }
}

fn merge(source: &StandardizedResume, response: RetailorResponse) -> StandardizedResume {
    let mut out = source.clone();
    let profile = &mut out.profile;

    if let Some(summary) = response.summary.map(|s| s.trim().to_string()) {
        if !summary.is_empty() {
            profile.summary = Some(summary);
        }
    }

    for rewrite in response.experience {
        let Some(entry) = profile.experience.get_mut(rewrite.index) else {
            debug!(index = rewrite.index, "Ignoring rewrite for unknown experience entry");
            continue;
        };
        let highlights: Vec<String> = rewrite
            .highlights
            .into_iter()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .collect();
        if !highlights.is_empty() {
            entry.highlights = highlights;
        }
    }

    profile.skills = reorder_skills(&profile.skills, &response.skills);
    out
}

/// Existing skills in the suggested order, then the rest in their original
/// order. Suggestions that are not existing skills are dropped.
fn reorder_skills(existing: &[String], suggested: &[String]) -> Vec<String> {
    let mut used = HashSet::new();
    let mut ordered = Vec::with_capacity(existing.len());
    for wanted in suggested {
        let wanted = wanted.trim().to_lowercase();
        if let Some((i, skill)) = existing
            .iter()
            .enumerate()
            .find(|(i, s)| !used.contains(i) && s.to_lowercase() == wanted)
        {
            used.insert(i);
            ordered.push(skill.clone());
        }
    }
    for (i, skill) in existing.iter().enumerate() {
        if !used.contains(&i) {
            ordered.push(skill.clone());
        }
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::LlmError;
    use crate::models::resume::Experience;
    use crate::testing::{sample_resume, ScriptedBackend};

    fn source() -> StandardizedResume {
        let mut r = sample_resume("jane.pdf", "Jane Doe", &["Excel", "SQL", "Python"]);
        r.profile.experience.push(Experience {
            title: "Intern".into(),
            company: "Globex".into(),
            duration: "Summer 2018".into(),
            location: Some("Berlin".into()),
            highlights: vec!["Cleaned survey data".into()],
        });
        r
    }

    fn keywords() -> JobKeywordSet {
        JobKeywordSet::from_terms(["python", "sql"])
    }

    #[tokio::test]
    async fn test_facts_survive_and_narrative_changes() {
        let backend = Arc::new(ScriptedBackend::fixed(
            r#"```json
{
  "summary": "Analyst who automates SQL and Python reporting.",
  "experience": [
    {"index": 0, "highlights": ["Automated weekly SQL dashboards in Python"], "company": "Hooli"},
    {"index": 7, "highlights": ["Invented"]}
  ],
  "skills": ["python", "SQL", "Kubernetes"],
  "employer": "Fake Corp"
}
```"#,
        ));
        let src = source();

        let out = Retailor::new(backend.clone())
            .retailor(&src, &keywords())
            .await
            .unwrap();
        let r = &out.resume;

        assert_eq!(out.retailored_from, src.identity_key);
        assert_eq!(out.keywords, vec!["python", "sql"]);
        assert_eq!(r.identity_key, src.identity_key);
        assert_eq!(
            r.profile.summary.as_deref(),
            Some("Analyst who automates SQL and Python reporting.")
        );
        assert_eq!(
            r.profile.experience[0].highlights,
            vec!["Automated weekly SQL dashboards in Python"]
        );
        assert_eq!(r.profile.experience[1].highlights, vec!["Cleaned survey data"]);
        for (before, after) in src.profile.experience.iter().zip(&r.profile.experience) {
            assert_eq!(before.title, after.title);
            assert_eq!(before.company, after.company);
            assert_eq!(before.duration, after.duration);
        }
        assert_eq!(r.profile.education, src.profile.education);
        assert_eq!(r.profile.skills, vec!["Python", "SQL", "Excel"]);
        assert!(backend.prompts()[0].contains("Acme Corp"));
    }

    #[tokio::test]
    async fn test_empty_response_returns_source_unchanged() {
        let backend = Arc::new(ScriptedBackend::fixed("{}"));
        let src = source();

        let out = Retailor::new(backend).retailor(&src, &keywords()).await.unwrap();

        assert_eq!(out.resume, src);
    }

    #[tokio::test]
    async fn test_unparsable_response_is_an_error() {
        let backend = Arc::new(ScriptedBackend::fixed("Sorry, I can't help with that."));

        let err = Retailor::new(backend)
            .retailor(&source(), &keywords())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "RESPONSE_PARSE_ERROR");
    }

    #[tokio::test]
    async fn test_backend_auth_failure_surfaces() {
        let backend = Arc::new(ScriptedBackend::new(|_| {
            Err(LlmError::Auth {
                status: 401,
                message: "bad key".into(),
            })
        }));

        let err = Retailor::new(backend)
            .retailor(&source(), &keywords())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "BACKEND_AUTH_ERROR");
    }

    #[test]
    fn test_reorder_never_adds_or_drops() {
        let existing = vec!["Excel".to_string(), "SQL".to_string(), "Python".to_string()];
        let out = reorder_skills(&existing, &["python".into(), "Go".into(), "PYTHON".into()]);
        assert_eq!(out, vec!["Python", "Excel", "SQL"]);
    }
}
