//! Read path: Keyword Extractor → Matcher/Scorer → Retailor.

pub mod handlers;
pub mod keywords;
pub mod matcher;
pub mod prompts;
pub mod retailor;
pub mod scoring;

pub use keywords::KeywordExtractor;
pub use matcher::Matcher;
pub use retailor::Retailor;
pub use scoring::{CandidateEvaluator, KeywordEvaluator, LlmEvaluator};
