use std::io::Read;

use quick_xml::events::Event;
use quick_xml::Reader;

use super::{DocumentExtractor, DocumentFormat, ExtractedContent, ExtractionMethod, RawDocument};
use crate::errors::PipelineError;

/// Upper bound on a decompressed DOCX part (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Fast path: embedded text layer of PDFs, OOXML body of DOCX, UTF-8 text.
#[derive(Debug, Clone, Default)]
pub struct NativeExtractor;

impl DocumentExtractor for NativeExtractor {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Native
    }

    fn extract(&self, doc: &RawDocument) -> Result<ExtractedContent, PipelineError> {
        let (text, links) = match doc.format {
            DocumentFormat::Pdf => (extract_pdf(doc)?, Vec::new()),
            DocumentFormat::Docx => extract_docx(doc)?,
            DocumentFormat::PlainText => (extract_plain(doc)?, Vec::new()),
        };
        ExtractedContent::from_text(doc, text, links, ExtractionMethod::Native)
    }
}

fn failure(doc: &RawDocument, detail: impl std::fmt::Display) -> PipelineError {
    PipelineError::ExtractionFailure(format!("{}: {detail}", doc.filename))
}

fn extract_pdf(doc: &RawDocument) -> Result<String, PipelineError> {
    // pdf-extract panics on some malformed inputs.
    let decoded = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem(&doc.bytes)
    }));
    match decoded {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(failure(doc, e)),
        Err(_) => Err(failure(doc, "PDF decoder panicked")),
    }
}

fn extract_plain(doc: &RawDocument) -> Result<String, PipelineError> {
    String::from_utf8(doc.bytes.to_vec()).map_err(|e| failure(doc, e))
}

// ────────────────────────────────────────────────────────────────────────────
// DOCX
// ────────────────────────────────────────────────────────────────────────────

fn extract_docx(doc: &RawDocument) -> Result<(String, Vec<String>), PipelineError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(doc.bytes.as_ref()))
        .map_err(|e| failure(doc, e))?;

    let body = read_entry(&mut archive, "word/document.xml")
        .map_err(|e| failure(doc, e))?
        .ok_or_else(|| failure(doc, "word/document.xml not found"))?;
    let text = docx_body_text(&body).map_err(|e| failure(doc, e))?;

    // Hyperlink targets live in the relationships part; a missing part just
    // means no links.
    let links = match read_entry(&mut archive, "word/_rels/document.xml.rels") {
        Ok(Some(rels)) => external_targets(&rels).unwrap_or_default(),
        _ => Vec::new(),
    };

    Ok((text, links))
}

fn read_entry(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Option<Vec<u8>>, String> {
    let entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.to_string()),
    };
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| e.to_string())?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(format!("{name} exceeds size limit"));
    }
    Ok(Some(out))
}

/// Concatenates `w:t` runs, one line per `w:p`, honouring tabs and breaks.
fn docx_body_text(xml: &[u8]) -> Result<String, String> {
    let mut out = String::new();
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" | b"cr" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| e.to_string())?;
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

/// `Target` of every relationship marked `TargetMode="External"`.
fn external_targets(xml: &[u8]) -> Result<Vec<String>, String> {
    let mut targets = Vec::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(e)) | Ok(Event::Start(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let mut target = None;
                let mut external = false;
                for attr in e.attributes().flatten() {
                    let value = attr.unescape_value().map_err(|e| e.to_string())?;
                    match attr.key.local_name().as_ref() {
                        b"Target" => target = Some(value.into_owned()),
                        b"TargetMode" => external = value == "External",
                        _ => {}
                    }
                }
                if let (true, Some(target)) = (external, target) {
                    targets.push(target);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }

    Ok(targets)
}
