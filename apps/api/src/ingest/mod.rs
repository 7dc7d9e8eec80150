//! Write path: Extractor → Standardizer → Validator/Reprocessor →
//! Persistence Gateway.

pub mod handlers;
pub mod pipeline;
pub mod prompts;
pub mod standardizer;
pub mod validator;

pub use pipeline::IngestPipeline;
