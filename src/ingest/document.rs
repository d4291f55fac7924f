//! Report text extraction.
//!
//! Only PDF reports are accepted. Extraction is best-effort per page: a page
//! that fails to decode contributes nothing, and only a document with no
//! recoverable text at all is an error.

use lopdf::Document;
use thiserror::Error;
use tracing::warn;

/// Errors that can occur while turning a report into text
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to parse document: {0}")]
    Malformed(String),

    #[error("No text could be extracted ({failed_pages} of {pages} pages failed)")]
    NoText { pages: usize, failed_pages: usize },
}

/// Text recovered from a report
#[derive(Debug, Clone)]
pub struct DocumentText {
    /// Page texts joined by newlines
    pub text: String,

    /// Total page count
    pub pages: usize,

    /// 1-based numbers of pages that failed to decode
    pub failed_pages: Vec<u32>,
}

/// Turns an uploaded report into plain text
pub trait DocumentExtractor: Send + Sync {
    fn extract(&self, filename: Option<&str>, bytes: &[u8]) -> Result<DocumentText, ExtractionError>;
}

/// PDF extractor backed by lopdf
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextExtractor;

const PDF_MAGIC: &[u8] = b"%PDF-";

impl PdfTextExtractor {
    /// Check the filename extension (when given) and the PDF header
    pub fn check_format(filename: Option<&str>, bytes: &[u8]) -> Result<(), ExtractionError> {
        if let Some(name) = filename {
            if !name.to_lowercase().ends_with(".pdf") {
                return Err(ExtractionError::UnsupportedFormat(format!(
                    "{} (only PDF files are accepted)",
                    name
                )));
            }
        }

        if !bytes.starts_with(PDF_MAGIC) {
            return Err(ExtractionError::UnsupportedFormat(
                "missing PDF header".to_string(),
            ));
        }

        Ok(())
    }
}

impl DocumentExtractor for PdfTextExtractor {
    fn extract(&self, filename: Option<&str>, bytes: &[u8]) -> Result<DocumentText, ExtractionError> {
        Self::check_format(filename, bytes)?;

        let doc = Document::load_mem(bytes).map_err(|e| ExtractionError::Malformed(e.to_string()))?;
        let pages = doc.get_pages();

        let mut texts = Vec::with_capacity(pages.len());
        let mut failed_pages = Vec::new();

        for page_number in pages.keys().copied() {
            match doc.extract_text(&[page_number]) {
                Ok(text) => texts.push(text.trim().to_string()),
                Err(e) => {
                    warn!(page = page_number, error = %e, "Page failed to decode, skipping");
                    failed_pages.push(page_number);
                    texts.push(String::new());
                }
            }
        }

        let text = texts
            .iter()
            .filter(|t| !t.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");

        if text.trim().is_empty() {
            return Err(ExtractionError::NoText {
                pages: pages.len(),
                failed_pages: failed_pages.len(),
            });
        }

        Ok(DocumentText {
            text,
            pages: pages.len(),
            failed_pages,
        })
    }
}
