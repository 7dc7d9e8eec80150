//! Store-side query filters evaluated against the JSON form of a record.
//!
//! Field paths may be dotted (`experience.company`); when a path segment hits
//! an array the remaining path is applied to every element and the filter
//! matches if any element does.

use regex::{Regex, RegexBuilder};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::PipelineError;

/// Array fields searched by membership rather than by pattern.
const MEMBERSHIP_FIELDS: &[&str] = &["skills", "certifications", "links"];

#[derive(Debug, Clone)]
pub enum Filter {
    All,
    /// Exact JSON equality.
    Equals { field: String, value: Value },
    /// Regex match against string values.
    Matches { field: String, regex: Regex },
    /// Case-insensitive membership in an array of strings.
    Contains { field: String, value: String },
}

impl Filter {
    pub fn equals(field: &str, value: impl Into<Value>) -> Self {
        Filter::Equals {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn identity(key: Uuid) -> Self {
        Filter::equals("identity_key", key.to_string())
    }

    pub fn matches(
        field: &str,
        pattern: &str,
        case_insensitive: bool,
    ) -> Result<Self, PipelineError> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| {
                PipelineError::ValidationError(format!("invalid pattern for {field}: {e}"))
            })?;
        Ok(Filter::Matches {
            field: field.to_string(),
            regex,
        })
    }

    /// Whole-value, case-insensitive match of a literal (name/email lookups).
    pub fn exact_ci(field: &str, literal: &str) -> Result<Self, PipelineError> {
        Filter::matches(field, &format!("^{}$", regex::escape(literal.trim())), true)
    }

    pub fn contains(field: &str, value: &str) -> Self {
        Filter::Contains {
            field: field.to_string(),
            value: value.trim().to_lowercase(),
        }
    }

    /// Search box semantics: membership for array-of-string fields, a
    /// case-insensitive regex for everything else.
    pub fn for_search(field: &str, value: &str) -> Result<Self, PipelineError> {
        let field = field.trim();
        if field.is_empty() {
            return Err(PipelineError::ValidationError("search field is empty".into()));
        }
        if MEMBERSHIP_FIELDS.contains(&field) {
            Ok(Filter::contains(field, value))
        } else {
            Filter::matches(field, value, true)
        }
    }

    /// The identity key when the filter pins exactly one record, so stores can
    /// use their key index.
    pub fn identity_key(&self) -> Option<Uuid> {
        match self {
            Filter::Equals { field, value } if field == "identity_key" => {
                value.as_str().and_then(|s| Uuid::parse_str(s).ok())
            }
            _ => None,
        }
    }

    pub fn evaluate(&self, record: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::Equals { field, value } => {
                resolve(record, field).into_iter().any(|v| v == value)
            }
            Filter::Matches { field, regex } => resolve(record, field)
                .into_iter()
                .any(|v| v.as_str().is_some_and(|s| regex.is_match(s))),
            Filter::Contains { field, value } => resolve(record, field).into_iter().any(|v| {
                v.as_str()
                    .is_some_and(|s| s.trim().to_lowercase() == *value)
            }),
        }
    }
}

/// Every leaf reachable through `path`, fanning out over arrays.
fn resolve<'a>(root: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![root];
    for segment in path.split('.') {
        let mut next = Vec::new();
        for value in current {
            collect_field(value, segment, &mut next);
        }
        current = next;
    }
    // A leaf that is itself an array contributes its elements.
    current
        .into_iter()
        .flat_map(|v| match v {
            Value::Array(items) => items.iter().collect::<Vec<_>>(),
            other => vec![other],
        })
        .collect()
}

fn collect_field<'a>(value: &'a Value, segment: &str, out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            if let Some(v) = map.get(segment) {
                out.push(v);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_field(item, segment, out);
            }
        }
        _ => {}
    }
}
