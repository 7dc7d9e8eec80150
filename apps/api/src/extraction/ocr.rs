use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use super::{
    native::NativeExtractor, DocumentExtractor, DocumentFormat, ExtractedContent,
    ExtractionMethod, RawDocument,
};
use crate::errors::PipelineError;

/// Rasterisation resolution handed to `pdftoppm`.
const OCR_DPI: &str = "300";

/// OCR-capable extractor for scanned PDFs.
///
/// Pages are rasterised with `pdftoppm` into a temp dir and each page image is
/// run through the `tesseract` CLI. DOCX and plain text have no image layer,
/// so they go through the native decoder and are tagged as OCR output.
#[derive(Debug, Clone)]
pub struct OcrExtractor {
    tesseract_bin: PathBuf,
    pdftoppm_bin: PathBuf,
    lang: String,
    native: NativeExtractor,
}

impl OcrExtractor {
    pub fn new(
        tesseract_bin: impl Into<PathBuf>,
        pdftoppm_bin: impl Into<PathBuf>,
        lang: &str,
    ) -> Self {
        Self {
            tesseract_bin: tesseract_bin.into(),
            pdftoppm_bin: pdftoppm_bin.into(),
            lang: lang.to_string(),
            native: NativeExtractor,
        }
    }

    fn ocr_pdf(&self, doc: &RawDocument) -> Result<String, PipelineError> {
        let workdir = tempfile::TempDir::new().map_err(|e| failure(doc, e))?;
        let pdf_path = workdir.path().join("input.pdf");
        std::fs::write(&pdf_path, &doc.bytes).map_err(|e| failure(doc, e))?;

        let prefix = workdir.path().join("page");
        run(
            Command::new(&self.pdftoppm_bin)
                .arg("-r")
                .arg(OCR_DPI)
                .arg("-png")
                .arg(&pdf_path)
                .arg(&prefix),
        )
        .map_err(|e| failure(doc, format!("pdftoppm: {e}")))?;

        let pages = page_images(workdir.path()).map_err(|e| failure(doc, e))?;
        if pages.is_empty() {
            return Err(PipelineError::EmptyContent(doc.filename.clone()));
        }
        info!(file = %doc.filename, pages = pages.len(), "Running OCR");

        let mut text = String::new();
        for page in &pages {
            let page_text = run(
                Command::new(&self.tesseract_bin)
                    .arg(page)
                    .arg("stdout")
                    .arg("-l")
                    .arg(&self.lang),
            )
            .map_err(|e| failure(doc, format!("tesseract: {e}")))?;
            debug!(
                file = %doc.filename,
                page = %page.display(),
                chars = page_text.len(),
                "OCR page done"
            );
            text.push_str(&page_text);
            text.push('\n');
        }
        Ok(text)
    }
}

impl DocumentExtractor for OcrExtractor {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Ocr
    }

    fn extract(&self, doc: &RawDocument) -> Result<ExtractedContent, PipelineError> {
        match doc.format {
            DocumentFormat::Pdf => {
                let text = self.ocr_pdf(doc)?;
                ExtractedContent::from_text(doc, text, Vec::new(), ExtractionMethod::Ocr)
            }
            DocumentFormat::Docx | DocumentFormat::PlainText => {
                let mut content = self.native.extract(doc)?;
                content.method = ExtractionMethod::Ocr;
                Ok(content)
            }
        }
    }
}

fn failure(doc: &RawDocument, detail: impl std::fmt::Display) -> PipelineError {
    PipelineError::ExtractionFailure(format!("{} (ocr): {detail}", doc.filename))
}

/// Runs a command to completion and returns its stdout.
fn run(cmd: &mut Command) -> Result<String, String> {
    let output = cmd.output().map_err(|e| e.to_string())?;
    if !output.status.success() {
        return Err(format!(
            "exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// `page-1.png`, `page-2.png`, … sorted by page number (pdftoppm zero-pads
/// to the width of the page count, so lexical order is not enough).
fn page_images(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut pages: Vec<(u32, PathBuf)> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "png"))
        .filter_map(|p| page_number(&p).map(|n| (n, p)))
        .collect();
    pages.sort_by_key(|(n, _)| *n);
    Ok(pages.into_iter().map(|(_, p)| p).collect())
}

fn page_number(path: &Path) -> Option<u32> {
    path.file_stem()?
        .to_str()?
        .rsplit('-')
        .next()?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn test_page_images_sorted_numerically() {
        let dir = tempfile::TempDir::new().unwrap();
        for name in ["page-10.png", "page-2.png", "page-1.png", "input.pdf", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let pages: Vec<String> = page_images(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(pages, vec!["page-1.png", "page-2.png", "page-10.png"]);
    }

    #[test]
    fn test_missing_binary_is_extraction_failure() {
        let ocr = OcrExtractor::new("/nonexistent/tesseract", "/nonexistent/pdftoppm", "eng");
        let doc = RawDocument::new("scan.pdf", Bytes::from_static(b"%PDF-1.4")).unwrap();
        assert_eq!(ocr.extract(&doc).unwrap_err().code(), "EXTRACTION_FAILURE");
    }

    #[test]
    fn test_text_documents_delegate_to_native() {
        let ocr = OcrExtractor::new("tesseract", "pdftoppm", "eng");
        let doc = RawDocument::new("cv.txt", Bytes::from_static(b"Jane Doe")).unwrap();
        let content = ocr.extract(&doc).unwrap();
        assert_eq!(content.text, "Jane Doe");
        assert_eq!(content.method, ExtractionMethod::Ocr);
    }
}
