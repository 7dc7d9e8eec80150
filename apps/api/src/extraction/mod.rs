//! Extractor: raw document → text + hyperlinks.
//!
//! Two interchangeable strategies sit behind `DocumentExtractor`: the native
//! decoder (`NativeExtractor`) and the OCR path (`OcrExtractor`) used for
//! scanned documents. Which one runs is the caller's decision.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::PipelineError;

pub mod links;
pub mod native;
pub mod ocr;

pub use native::NativeExtractor;
pub use ocr::OcrExtractor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    PlainText,
}

impl DocumentFormat {
    pub fn from_filename(filename: &str) -> Result<Self, PipelineError> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("pdf") => Ok(DocumentFormat::Pdf),
            Some("docx") => Ok(DocumentFormat::Docx),
            Some("txt") | Some("md") => Ok(DocumentFormat::PlainText),
            Some(other) => Err(PipelineError::UnsupportedFormat(format!(
                "{filename}: .{other} is not supported (pdf, docx, txt)"
            ))),
            None => Err(PipelineError::UnsupportedFormat(format!(
                "{filename}: no file extension"
            ))),
        }
    }
}

/// Uploaded bytes plus provenance. Lives for one extraction call.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub filename: String,
    pub format: DocumentFormat,
    pub bytes: Bytes,
}

impl RawDocument {
    pub fn new(filename: impl Into<String>, bytes: Bytes) -> Result<Self, PipelineError> {
        let filename = filename.into();
        let format = DocumentFormat::from_filename(&filename)?;
        Ok(Self {
            filename,
            format,
            bytes,
        })
    }

    pub fn stem(&self) -> String {
        file_stem(&self.filename)
    }
}

pub fn file_stem(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
        .to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    Native,
    Ocr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub text: String,
    pub links: Vec<String>,
    pub source_filename: String,
    pub method: ExtractionMethod,
}

impl ExtractedContent {
    /// Builds content from decoded text, harvesting inline links and merging
    /// them after any structural links. Blank text is `EmptyContent`.
    pub fn from_text(
        doc: &RawDocument,
        text: String,
        structural_links: Vec<String>,
        method: ExtractionMethod,
    ) -> Result<Self, PipelineError> {
        if text.trim().is_empty() {
            return Err(PipelineError::EmptyContent(doc.filename.clone()));
        }
        let links = links::merge(structural_links, links::harvest(&text));
        Ok(Self {
            text,
            links,
            source_filename: doc.filename.clone(),
            method,
        })
    }
}

pub trait DocumentExtractor: Send + Sync {
    fn method(&self) -> ExtractionMethod;

    /// Fails with `UnsupportedFormat`, `EmptyContent` or `ExtractionFailure`.
    fn extract(&self, doc: &RawDocument) -> Result<ExtractedContent, PipelineError>;
}

/// Runs a (CPU- or subprocess-bound) extractor off the async runtime.
pub async fn extract_blocking(
    extractor: Arc<dyn DocumentExtractor>,
    doc: RawDocument,
) -> Result<ExtractedContent, PipelineError> {
    let filename = doc.filename.clone();
    debug!(file = %filename, method = ?extractor.method(), "Extracting");
    tokio::task::spawn_blocking(move || extractor.extract(&doc))
        .await
        .map_err(|e| PipelineError::ExtractionFailure(format!("{filename}: worker failed: {e}")))?
}
