//! Candidate record schema shared by the Standardizer, the Persistence Gateway
//! and the Retailor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::errors::PipelineError;

/// Namespace for v5 identity keys. Changing it re-keys the whole corpus.
const IDENTITY_NAMESPACE: Uuid = Uuid::from_u128(0x6f1d_93a2_5c7e_4b0a_9e3d_2a71_c4f8_0b15);

/// Derives the stable identity key for a document.
///
/// The original filename wins; the email is only used when no filename is
/// known. Both are trimmed and lower-cased so `John_Doe.PDF` and
/// `john_doe.pdf` collapse onto one record while `john-doe-v2.pdf` does not.
pub fn identity_key(original_filename: &str, email: Option<&str>) -> Result<Uuid, PipelineError> {
    let filename = original_filename.trim().to_lowercase();
    if !filename.is_empty() {
        return Ok(Uuid::new_v5(
            &IDENTITY_NAMESPACE,
            format!("file:{filename}").as_bytes(),
        ));
    }

    match email.map(|e| e.trim().to_lowercase()) {
        Some(email) if !email.is_empty() => Ok(Uuid::new_v5(
            &IDENTITY_NAMESPACE,
            format!("email:{email}").as_bytes(),
        )),
        _ => Err(PipelineError::ValidationError(
            "cannot derive identity: no filename or email".to_string(),
        )),
    }
}

/// Accepts `null` where the backend should have sent an empty value.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub company: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub duration: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub highlights: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Education {
    #[serde(default, deserialize_with = "null_as_default")]
    pub institution: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub degree: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

/// The fields the backend fills in. Missing or `null` values default to empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateProfile {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub links: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub skills: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub experience: Vec<Experience>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub education: Vec<Education>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub certifications: Vec<String>,
}

impl CandidateProfile {
    /// Validity predicate: a non-empty name whose first token has at least
    /// two characters.
    pub fn has_valid_name(&self) -> bool {
        self.name
            .split_whitespace()
            .next()
            .map(|first| first.chars().count() >= 2)
            .unwrap_or(false)
    }

    /// Trims every string, drops blank optionals and de-duplicates skills
    /// (case-insensitively, first spelling kept) and links.
    pub fn normalize(&mut self) {
        self.name = self.name.split_whitespace().collect::<Vec<_>>().join(" ");
        for field in [
            &mut self.email,
            &mut self.phone,
            &mut self.location,
            &mut self.summary,
        ] {
            *field = field
                .take()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty());
        }

        let mut seen = std::collections::HashSet::new();
        self.skills = std::mem::take(&mut self.skills)
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && seen.insert(s.to_lowercase()))
            .collect();

        let mut seen = std::collections::HashSet::new();
        self.links = std::mem::take(&mut self.links)
            .into_iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty() && seen.insert(l.clone()))
            .collect();

        for exp in &mut self.experience {
            exp.title = exp.title.trim().to_string();
            exp.company = exp.company.trim().to_string();
            exp.duration = exp.duration.trim().to_string();
            exp.highlights.retain(|h| !h.trim().is_empty());
        }
        for edu in &mut self.education {
            edu.institution = edu.institution.trim().to_string();
        }
    }
}

/// A standardized candidate record as stored in the corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardizedResume {
    pub identity_key: Uuid,
    #[serde(flatten)]
    pub profile: CandidateProfile,
    pub timestamp: DateTime<Utc>,
    pub source_file: String,
    pub original_filename: String,
    /// Result of the name-validity check at the last validation.
    #[serde(default = "default_true")]
    pub valid: bool,
    /// Set once a repair pass has run. A record carrying this flag is never
    /// repaired again.
    #[serde(default)]
    pub repair_attempted: bool,
}

fn default_true() -> bool {
    true
}

impl StandardizedResume {
    pub fn summary(&self) -> CandidateSummary {
        CandidateSummary {
            identity_key: self.identity_key,
            name: self.profile.name.clone(),
            email: self.profile.email.clone(),
            phone: self.profile.phone.clone(),
        }
    }

    /// Attachment filename for downloads, e.g. `Jane_Doe.json`. ASCII only so
    /// it is a valid header value.
    pub fn download_name(&self, suffix: &str) -> String {
        let base: String = self
            .profile
            .name
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_")
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        let base = if base.is_empty() {
            self.identity_key.to_string()
        } else {
            base
        };
        format!("{base}{suffix}.json")
    }
}

/// A rewritten record with provenance back to the record it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetailoredResume {
    #[serde(flatten)]
    pub resume: StandardizedResume,
    pub retailored_from: Uuid,
    pub keywords: Vec<String>,
    pub retailored_at: DateTime<Utc>,
}

/// Identifying fields shown when a lookup is ambiguous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub identity_key: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Pretty JSON, UTF-8, non-ASCII kept as-is.
pub fn to_download_json<T: Serialize>(value: &T) -> Result<Vec<u8>, PipelineError> {
    serde_json::to_vec_pretty(value).map_err(|e| PipelineError::PersistenceError(e.to_string()))
}
