//! Multi-format text extraction. PDF goes through a whole-document converter
//! first and falls back to page-by-page extraction; DOCX and plain text have
//! single paths.

use std::path::Path;

use common::error::AppError;
use docx_rs::{DocumentChild, ParagraphChild, RunChild};
use lopdf::{Document as PdfDocument, Object};
use tracing::{debug, warn};

/// Extract plain text from a file, dispatching on the extension.
pub fn extract_text(path: &Path) -> Result<String, AppError> {
    match extension_of(path).as_deref() {
        Some("pdf") => extract_pdf_text(path),
        Some("docx") => extract_docx_text(path),
        Some("txt") | Some("md") => extract_plain_text(path),
        other => Err(AppError::UnsupportedFileType(
            other.map(ToString::to_string).unwrap_or_default(),
        )),
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
}

/// Whole-document conversion first; if that yields nothing usable, walk the
/// pages individually. The converter being unavailable or failing must never
/// abort ingestion on its own.
fn extract_pdf_text(path: &Path) -> Result<String, AppError> {
    match pdf_extract::extract_text(path) {
        Ok(text) if !text.trim().is_empty() => return Ok(text),
        Ok(_) => {
            debug!(path = %path.display(), "pdf converter returned empty text, using page fallback");
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "pdf converter failed, using page fallback");
        }
    }

    extract_pdf_pages(path, None)
}

/// Page-by-page extraction; `page_limit` bounds how many pages are read.
fn extract_pdf_pages(path: &Path, page_limit: Option<usize>) -> Result<String, AppError> {
    let document = PdfDocument::load(path)
        .map_err(|err| AppError::TextExtraction(format!("failed to parse PDF: {err}")))?;

    let mut page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    page_numbers.sort_unstable();
    if let Some(limit) = page_limit {
        page_numbers.truncate(limit);
    }

    let mut text = String::new();
    for page_number in page_numbers {
        match document.extract_text(&[page_number]) {
            Ok(page_text) => {
                text.push_str(&page_text);
                text.push('\n');
            }
            Err(err) => {
                warn!(page = page_number, error = %err, "failed to extract text from page");
            }
        }
    }

    if text.trim().is_empty() {
        return Err(AppError::TextExtraction(
            "PDF contains no extractable text".to_string(),
        ));
    }

    Ok(text)
}

/// Paragraph texts joined with newlines, empty paragraphs dropped.
fn extract_docx_text(path: &Path) -> Result<String, AppError> {
    let bytes = std::fs::read(path)?;
    let docx = docx_rs::read_docx(&bytes)
        .map_err(|err| AppError::TextExtraction(format!("failed to parse DOCX: {err}")))?;

    let mut paragraphs = Vec::new();
    for child in &docx.document.children {
        if let DocumentChild::Paragraph(paragraph) = child {
            let mut line = String::new();
            for paragraph_child in &paragraph.children {
                if let ParagraphChild::Run(run) = paragraph_child {
                    for run_child in &run.children {
                        if let RunChild::Text(text) = run_child {
                            line.push_str(&text.text);
                        }
                    }
                }
            }
            if !line.trim().is_empty() {
                paragraphs.push(line);
            }
        }
    }

    Ok(paragraphs.join("\n"))
}

fn extract_plain_text(path: &Path) -> Result<String, AppError> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Text of the first `num_pages` pages, capped at `max_chars`, for metadata
/// prompting. Non-PDF files return the truncated file head instead.
pub fn extract_first_pages_text(
    path: &Path,
    num_pages: usize,
    max_chars: usize,
) -> Result<String, AppError> {
    let text = match extension_of(path).as_deref() {
        Some("pdf") => extract_pdf_pages(path, Some(num_pages))?,
        _ => extract_text(path)?,
    };

    Ok(text.chars().take(max_chars).collect())
}

/// Embedded PDF document information.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PdfMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub num_pages: usize,
}

pub fn extract_pdf_metadata(path: &Path) -> Result<PdfMetadata, AppError> {
    let document = PdfDocument::load(path)
        .map_err(|err| AppError::TextExtraction(format!("failed to parse PDF: {err}")))?;

    let mut metadata = PdfMetadata {
        num_pages: document.get_pages().len(),
        ..PdfMetadata::default()
    };

    let info = document.trailer.get(b"Info").ok().and_then(|object| {
        match object {
            Object::Reference(id) => document
                .get_object(*id)
                .ok()
                .and_then(|resolved| resolved.as_dict().ok()),
            Object::Dictionary(dict) => Some(dict),
            _ => None,
        }
    });

    if let Some(info) = info {
        metadata.title = info_string(info, b"Title");
        metadata.author = info_string(info, b"Author");
        metadata.subject = info_string(info, b"Subject");
        metadata.creator = info_string(info, b"Creator");
        metadata.producer = info_string(info, b"Producer");
        metadata.creation_date = info_string(info, b"CreationDate");
    }

    Ok(metadata)
}

fn info_string(dict: &lopdf::Dictionary, key: &[u8]) -> Option<String> {
    match dict.get(key) {
        Ok(Object::String(bytes, _)) => {
            let decoded = decode_pdf_string(bytes);
            if decoded.trim().is_empty() {
                None
            } else {
                Some(decoded)
            }
        }
        _ => None,
    }
}

/// PDF text strings are either UTF-16BE with a BOM or byte strings.
fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let code_units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&code_units)
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_file_with(extension: &str, content: &[u8]) -> NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(&format!(".{extension}"))
            .tempfile()
            .expect("temp file");
        file.write_all(content).expect("write");
        file
    }

    #[test]
    fn plain_text_round_trips() {
        let file = temp_file_with("txt", "hello world".as_bytes());
        let text = extract_text(file.path()).expect("extract");
        assert_eq!(text, "hello world");
    }

    #[test]
    fn markdown_is_read_as_plain_text() {
        let file = temp_file_with("md", "# Heading\n\nBody".as_bytes());
        let text = extract_text(file.path()).expect("extract");
        assert!(text.contains("# Heading"));
    }

    #[test]
    fn invalid_utf8_is_replaced_not_fatal() {
        let file = temp_file_with("txt", &[0x68, 0x69, 0xFF, 0xFE, 0x21]);
        let text = extract_text(file.path()).expect("extract");
        assert!(text.starts_with("hi"));
        assert!(text.contains('\u{FFFD}'));
    }

    #[test]
    fn unsupported_extension_is_a_typed_error() {
        let file = temp_file_with("xlsx", b"whatever");
        let result = extract_text(file.path());
        assert!(matches!(result, Err(AppError::UnsupportedFileType(ext)) if ext == "xlsx"));
    }

    #[test]
    fn first_pages_text_caps_characters() {
        let file = temp_file_with("txt", "x".repeat(5000).as_bytes());
        let text = extract_first_pages_text(file.path(), 2, 100).expect("extract");
        assert_eq!(text.chars().count(), 100);
    }

    #[test]
    fn corrupt_pdf_reports_extraction_error() {
        let file = temp_file_with("pdf", b"not a real pdf");
        let result = extract_text(file.path());
        assert!(matches!(result, Err(AppError::TextExtraction(_))));
    }

    #[test]
    fn pdf_strings_decode_utf16_and_bytes() {
        // UTF-16BE with BOM.
        let encoded: Vec<u8> = [0xFE, 0xFF]
            .into_iter()
            .chain("Über".encode_utf16().flat_map(|unit| unit.to_be_bytes()))
            .collect();
        assert_eq!(decode_pdf_string(&encoded), "Über");

        assert_eq!(decode_pdf_string(b"Plain Title"), "Plain Title");
    }
}
