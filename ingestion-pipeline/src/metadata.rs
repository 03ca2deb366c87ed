//! Structured bibliographic metadata: either a fast path fed by embedded PDF
//! fields or an LLM extraction pass, plus the synthesized metadata chunk
//! that makes "who wrote this" queries retrievable.

use std::sync::Arc;

use common::{
    error::AppError,
    llm::{ChatMessage, LlmClient},
};
use tracing::warn;

use crate::extraction::PdfMetadata;

pub const NOT_FOUND: &str = "Not found";

const METADATA_EXTRACTION_PROMPT: &str = "You are a document metadata extractor. Analyze the provided document text and extract key metadata.\n\n\
Extract the following information if available:\n\
- Title: The title of the document/paper/article\n\
- Author(s): Names of all authors (comma-separated)\n\
- Institution(s): Universities, companies, or organizations\n\
- Date/Year: Publication or creation date\n\
- Abstract: A brief summary (if explicitly present)\n\
- Keywords: Key topics or terms\n\
- Document Type: paper, thesis, report, article, manual, etc.\n\n\
IMPORTANT RULES:\n\
1. Only extract information that is EXPLICITLY stated in the text\n\
2. If information is not found, use \"Not found\" for that field\n\
3. For authors, list ALL names you can find\n\
4. Be precise - don't guess or infer\n\n\
Respond in this exact format (keep the field names exactly as shown):\n\
Title: [extracted title or \"Not found\"]\n\
Author(s): [names or \"Not found\"]\n\
Institution(s): [names or \"Not found\"]\n\
Date/Year: [date or \"Not found\"]\n\
Abstract: [abstract text or \"Not found\"]\n\
Keywords: [keywords or \"Not found\"]\n\
Document Type: [type or \"Not found\"]";

/// Response-line prefixes and the field each one feeds. Checked in order, so
/// the more specific aliases come first.
const FIELD_ALIASES: [(&str, MetadataField); 12] = [
    ("title:", MetadataField::Title),
    ("author(s):", MetadataField::Authors),
    ("author:", MetadataField::Authors),
    ("institution(s):", MetadataField::Institutions),
    ("institution:", MetadataField::Institutions),
    ("date/year:", MetadataField::Date),
    ("date:", MetadataField::Date),
    ("year:", MetadataField::Date),
    ("abstract:", MetadataField::Abstract),
    ("keywords:", MetadataField::Keywords),
    ("document type:", MetadataField::DocumentType),
    ("type:", MetadataField::DocumentType),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetadataField {
    Title,
    Authors,
    Institutions,
    Date,
    Abstract,
    Keywords,
    DocumentType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentMetadata {
    pub title: String,
    pub authors: String,
    pub institutions: String,
    pub date: String,
    pub abstract_text: String,
    pub keywords: String,
    pub document_type: String,
    pub filename: String,
}

impl DocumentMetadata {
    pub fn empty(filename: &str) -> Self {
        Self {
            title: NOT_FOUND.to_string(),
            authors: NOT_FOUND.to_string(),
            institutions: NOT_FOUND.to_string(),
            date: NOT_FOUND.to_string(),
            abstract_text: NOT_FOUND.to_string(),
            keywords: NOT_FOUND.to_string(),
            document_type: NOT_FOUND.to_string(),
            filename: filename.to_string(),
        }
    }

    fn set(&mut self, field: MetadataField, value: String) {
        let slot = match field {
            MetadataField::Title => &mut self.title,
            MetadataField::Authors => &mut self.authors,
            MetadataField::Institutions => &mut self.institutions,
            MetadataField::Date => &mut self.date,
            MetadataField::Abstract => &mut self.abstract_text,
            MetadataField::Keywords => &mut self.keywords,
            MetadataField::DocumentType => &mut self.document_type,
        };
        *slot = value;
    }

    fn has(&self, field: MetadataField) -> bool {
        let value = match field {
            MetadataField::Title => &self.title,
            MetadataField::Authors => &self.authors,
            MetadataField::Institutions => &self.institutions,
            MetadataField::Date => &self.date,
            MetadataField::Abstract => &self.abstract_text,
            MetadataField::Keywords => &self.keywords,
            MetadataField::DocumentType => &self.document_type,
        };
        !value.is_empty() && value != NOT_FOUND
    }
}

/// Parse the LLM response by prefix-matching lines against the alias table.
/// Unrecognized lines continue the value of the field before them.
pub fn parse_metadata_response(response: &str, filename: &str) -> DocumentMetadata {
    let mut metadata = DocumentMetadata::empty(filename);
    let mut current_field: Option<MetadataField> = None;
    let mut current_value: Vec<String> = Vec::new();

    for line in response.trim().lines() {
        let line_lower = line.trim().to_lowercase();

        let mut matched = None;
        for (prefix, field) in FIELD_ALIASES {
            if line_lower.starts_with(prefix) {
                if let Some(previous) = current_field {
                    if !current_value.is_empty() {
                        metadata.set(previous, current_value.join(" ").trim().to_string());
                    }
                }

                let value_part = line.trim()[prefix.len()..].trim().to_string();
                current_field = Some(field);
                current_value = if value_part.is_empty() {
                    Vec::new()
                } else {
                    vec![value_part]
                };
                matched = Some(field);
                break;
            }
        }

        if matched.is_none() && current_field.is_some() && !line.trim().is_empty() {
            current_value.push(line.trim().to_string());
        }
    }

    if let Some(field) = current_field {
        if !current_value.is_empty() {
            metadata.set(field, current_value.join(" ").trim().to_string());
        }
    }

    metadata
}

/// Fast path: only the embedded PDF fields, everything else stays "Not found".
pub fn fallback_metadata(filename: &str, pdf_metadata: Option<&PdfMetadata>) -> DocumentMetadata {
    let mut metadata = DocumentMetadata::empty(filename);

    if let Some(pdf) = pdf_metadata {
        if let Some(title) = pdf.title.as_ref().filter(|title| !title.is_empty()) {
            metadata.title = title.clone();
        }
        if let Some(author) = pdf.author.as_ref().filter(|author| !author.is_empty()) {
            metadata.authors = author.clone();
        }
    }

    metadata
}

/// Deterministic pseudo-document summarizing the recognized fields. Author,
/// institution and date get paraphrase lines so questions phrased in natural
/// language land on this chunk.
pub fn compose_metadata_chunk(metadata: &DocumentMetadata, document_name: &str) -> String {
    let mut parts = vec![
        "=== DOCUMENT METADATA ===".to_string(),
        format!("Filename: {document_name}"),
    ];

    if metadata.has(MetadataField::Title) {
        parts.push(format!("Title: {}", metadata.title));
    }

    if metadata.has(MetadataField::Authors) {
        parts.push(format!("Author(s): {}", metadata.authors));
        parts.push(format!("This document was written by: {}", metadata.authors));
        parts.push(format!("The author of this paper is: {}", metadata.authors));
    }

    if metadata.has(MetadataField::Institutions) {
        parts.push(format!("Institution(s): {}", metadata.institutions));
        parts.push(format!("Affiliation: {}", metadata.institutions));
    }

    if metadata.has(MetadataField::Date) {
        parts.push(format!("Date/Year: {}", metadata.date));
        parts.push(format!("Published: {}", metadata.date));
    }

    if metadata.has(MetadataField::DocumentType) {
        parts.push(format!("Document Type: {}", metadata.document_type));
    }

    if metadata.has(MetadataField::Keywords) {
        parts.push(format!("Keywords: {}", metadata.keywords));
    }

    if metadata.has(MetadataField::Abstract) {
        parts.push(format!("\nAbstract:\n{}", metadata.abstract_text));
    }

    parts.push("=== END METADATA ===".to_string());
    parts.join("\n")
}

/// Extractor with two modes: the LLM path prompts for the seven fields and
/// parses the response; any LLM failure degrades to the fast path.
pub struct MetadataExtractor {
    llm: Arc<dyn LlmClient>,
    use_llm: bool,
}

impl MetadataExtractor {
    pub fn new(use_llm: bool, llm: Arc<dyn LlmClient>) -> Self {
        Self { llm, use_llm }
    }

    pub async fn extract(
        &self,
        first_pages_text: &str,
        filename: &str,
        pdf_metadata: Option<&PdfMetadata>,
    ) -> DocumentMetadata {
        if !self.use_llm {
            return fallback_metadata(filename, pdf_metadata);
        }

        let pdf_context = build_pdf_context(pdf_metadata);
        let messages = [
            ChatMessage::system(METADATA_EXTRACTION_PROMPT),
            ChatMessage::user(format!(
                "Filename: {filename}{pdf_context}\n\nDocument text (first pages):\n\n{first_pages_text}"
            )),
        ];

        match self.llm.invoke(&messages).await {
            Ok(response) => parse_metadata_response(&response, filename),
            Err(err) => {
                warn!(error = %err, "LLM metadata extraction failed, using fast path");
                fallback_metadata(filename, pdf_metadata)
            }
        }
    }
}

fn build_pdf_context(pdf_metadata: Option<&PdfMetadata>) -> String {
    let Some(pdf) = pdf_metadata else {
        return String::new();
    };

    let mut parts = Vec::new();
    if let Some(title) = pdf.title.as_ref().filter(|value| !value.is_empty()) {
        parts.push(format!("PDF Title: {title}"));
    }
    if let Some(author) = pdf.author.as_ref().filter(|value| !value.is_empty()) {
        parts.push(format!("PDF Author: {author}"));
    }
    if let Some(subject) = pdf.subject.as_ref().filter(|value| !value.is_empty()) {
        parts.push(format!("PDF Subject: {subject}"));
    }
    if pdf.num_pages > 0 {
        parts.push(format!("Total Pages: {}", pdf.num_pages));
    }

    if parts.is_empty() {
        String::new()
    } else {
        format!("\n\nPDF Metadata:\n{}", parts.join("\n"))
    }
}

pub fn is_not_found(value: &str) -> bool {
    value.is_empty() || value == NOT_FOUND
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::llm::TokenStream;

    #[test]
    fn parses_the_canonical_response_format() {
        let response = "Title: Hybrid Retrieval Systems\n\
                        Author(s): Ada Lovelace, Charles Babbage\n\
                        Institution(s): Analytical Engine Society\n\
                        Date/Year: 1843\n\
                        Abstract: Not found\n\
                        Keywords: retrieval, tables\n\
                        Document Type: paper";

        let metadata = parse_metadata_response(response, "paper.pdf");

        assert_eq!(metadata.title, "Hybrid Retrieval Systems");
        assert_eq!(metadata.authors, "Ada Lovelace, Charles Babbage");
        assert_eq!(metadata.institutions, "Analytical Engine Society");
        assert_eq!(metadata.date, "1843");
        assert_eq!(metadata.abstract_text, "Not found");
        assert_eq!(metadata.keywords, "retrieval, tables");
        assert_eq!(metadata.document_type, "paper");
        assert_eq!(metadata.filename, "paper.pdf");
    }

    #[test]
    fn accepts_alias_prefixes() {
        let response = "Author: Grace Hopper\nYear: 1952\nType: report";
        let metadata = parse_metadata_response(response, "x.pdf");

        assert_eq!(metadata.authors, "Grace Hopper");
        assert_eq!(metadata.date, "1952");
        assert_eq!(metadata.document_type, "report");
    }

    #[test]
    fn multi_line_values_accumulate_until_the_next_field() {
        let response = "Abstract: This work explores\nparent and child chunking\nin detail.\nKeywords: chunking";
        let metadata = parse_metadata_response(response, "x.pdf");

        assert_eq!(
            metadata.abstract_text,
            "This work explores parent and child chunking in detail."
        );
        assert_eq!(metadata.keywords, "chunking");
    }

    #[test]
    fn fallback_takes_title_and_author_from_pdf() {
        let pdf = PdfMetadata {
            title: Some("Embedded Title".to_string()),
            author: Some("Embedded Author".to_string()),
            subject: Some("ignored".to_string()),
            ..PdfMetadata::default()
        };

        let metadata = fallback_metadata("f.pdf", Some(&pdf));

        assert_eq!(metadata.title, "Embedded Title");
        assert_eq!(metadata.authors, "Embedded Author");
        assert_eq!(metadata.institutions, NOT_FOUND);
    }

    #[test]
    fn metadata_chunk_includes_paraphrases_and_markers() {
        let mut metadata = DocumentMetadata::empty("a.pdf");
        metadata.title = "Tables".to_string();
        metadata.authors = "Ada".to_string();
        metadata.date = "1843".to_string();

        let chunk = compose_metadata_chunk(&metadata, "a.pdf");

        assert!(chunk.starts_with("=== DOCUMENT METADATA ==="));
        assert!(chunk.ends_with("=== END METADATA ==="));
        assert!(chunk.contains("Filename: a.pdf"));
        assert!(chunk.contains("Author(s): Ada"));
        assert!(chunk.contains("This document was written by: Ada"));
        assert!(chunk.contains("The author of this paper is: Ada"));
        assert!(chunk.contains("Published: 1843"));
        // Unrecognized fields stay out of the chunk.
        assert!(!chunk.contains("Institution"));
        assert!(!chunk.contains("Not found"));
    }

    struct ScriptedLlm(Result<&'static str, ()>);

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn invoke(&self, _messages: &[ChatMessage]) -> Result<String, AppError> {
            self.0
                .map(ToString::to_string)
                .map_err(|()| AppError::Llm("scripted failure".to_string()))
        }

        async fn stream(&self, _messages: &[ChatMessage]) -> Result<TokenStream, AppError> {
            Err(AppError::Llm("not used".to_string()))
        }
    }

    #[tokio::test]
    async fn fast_path_never_calls_the_llm() {
        let extractor = MetadataExtractor::new(false, Arc::new(ScriptedLlm(Err(()))));

        let metadata = extractor.extract("ignored", "doc.pdf", None).await;
        assert_eq!(metadata, DocumentMetadata::empty("doc.pdf"));
    }

    #[tokio::test]
    async fn llm_path_parses_and_falls_back_on_failure() {
        let extractor =
            MetadataExtractor::new(true, Arc::new(ScriptedLlm(Ok("Title: From LLM"))));
        let metadata = extractor.extract("text", "doc.pdf", None).await;
        assert_eq!(metadata.title, "From LLM");

        let failing = MetadataExtractor::new(true, Arc::new(ScriptedLlm(Err(()))));
        let pdf = PdfMetadata {
            title: Some("Embedded".to_string()),
            ..PdfMetadata::default()
        };
        let metadata = failing.extract("text", "doc.pdf", Some(&pdf)).await;
        assert_eq!(metadata.title, "Embedded");
    }
}
