// src/pdf_extract.rs

use crate::error::PdfError;
use lopdf::Document;
use std::path::Path;
use tracing::{debug, info};

/// Page texts of one PDF, in page order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PdfPages {
    pub texts: Vec<String>,
    /// 1-based numbers of pages that carry images but no fonts.
    pub image_only: Vec<u32>,
}

impl PdfPages {
    /// Whether the page at 0-based `page_index` looks scanned.
    pub fn is_image_only(&self, page_index: usize) -> bool {
        u32::try_from(page_index + 1).is_ok_and(|n| self.image_only.contains(&n))
    }
}

impl From<Vec<String>> for PdfPages {
    fn from(texts: Vec<String>) -> Self {
        Self {
            texts,
            image_only: Vec::new(),
        }
    }
}

/// Anything that can turn a PDF into an ordered list of page texts.
pub trait PageSource: Send + Sync {
    /// Page texts of an in-memory PDF (an uploaded byte stream).
    fn pages_from_mem(&self, pdf_bytes: &[u8]) -> Result<PdfPages, PdfError>;

    /// Page texts of a PDF on disk.
    fn pages_from_path(&self, path: &Path) -> Result<PdfPages, PdfError> {
        let bytes = std::fs::read(path)?;
        self.pages_from_mem(&bytes)
    }
}

/// lopdf for structure, pdf-extract for layout-preserving page text.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextExtractor;

impl PageSource for PdfTextExtractor {
    fn pages_from_mem(&self, pdf_bytes: &[u8]) -> Result<PdfPages, PdfError> {
        // --- Phase 1: structural load with lopdf ---
        let mut doc = Document::load_mem(pdf_bytes).map_err(|e| PdfError::Parse(e.to_string()))?;

        let decrypted;
        let text_bytes = if doc.is_encrypted() {
            decrypted = decrypt_with_empty_password(&mut doc)?;
            decrypted.as_slice()
        } else {
            pdf_bytes
        };

        let page_count = doc.get_pages().len();
        let image_only = image_only_pages(&doc);
        if !image_only.is_empty() {
            debug!(pages = ?image_only, "Pages without fonts but with images");
        }

        // --- Phase 2: per-page text ---
        let texts = pdf_extract::extract_text_from_mem_by_pages(text_bytes)
            .map_err(|e| PdfError::TextExtraction(e.to_string()))?;

        if texts.len() != page_count {
            debug!(
                structural = page_count,
                extracted = texts.len(),
                "Page count mismatch between lopdf and pdf-extract"
            );
        }
        info!(pages = texts.len(), "Extracted page texts");
        Ok(PdfPages { texts, image_only })
    }
}

/// Decrypt with the empty user password and re-serialise the plain document.
fn decrypt_with_empty_password(doc: &mut Document) -> Result<Vec<u8>, PdfError> {
    if doc.decrypt("").is_err() {
        return Err(PdfError::Encrypted);
    }
    debug!("Decrypted PDF with empty password");
    let mut buf = Vec::new();
    doc.save_to(&mut buf)
        .map_err(|e| PdfError::Parse(format!("failed to save decrypted PDF: {e}")))?;
    Ok(buf)
}

/// 1-based numbers of pages that carry image XObjects but no fonts.
fn image_only_pages(doc: &Document) -> Vec<u32> {
    let mut out = Vec::new();

    for (page_num, object_id) in doc.get_pages() {
        let Ok(page_obj) = doc.get_object(object_id) else {
            continue;
        };
        let Some(page_dict) = page_obj.as_dict().ok() else {
            continue;
        };

        let resources = page_dict
            .get(b"Resources")
            .ok()
            .and_then(|r| doc.dereference(r).ok())
            .and_then(|(_, resolved)| resolved.as_dict().ok());

        let has_entries = |key: &[u8]| {
            resources
                .and_then(|res| res.get(key).ok())
                .and_then(|o| doc.dereference(o).ok())
                .and_then(|(_, resolved)| resolved.as_dict().ok())
                .is_some_and(|d| !d.is_empty())
        };

        if has_entries(b"XObject") && !has_entries(b"Font") {
            out.push(page_num);
        }
    }

    out
}
