use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:https?://[^\s<>()\[\]]+|www\.[^\s<>()\[\]]+|(?:linkedin\.com|github\.com)/[^\s<>()\[\]]+)",
        )
        .expect("link regex is valid")
    })
}

/// Pulls URL-looking tokens out of free text, in order of appearance.
pub fn harvest(text: &str) -> Vec<String> {
    url_regex()
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?', '\'', '"']))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Concatenates link lists keeping the first occurrence of each.
pub fn merge(first: Vec<String>, second: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    first
        .into_iter()
        .chain(second)
        .filter(|l| seen.insert(l.clone()))
        .collect()
}
