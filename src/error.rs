// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading a PDF into page texts.
#[derive(Error, Debug)]
pub enum PdfError {
    #[error("failed to parse PDF: {0}")]
    Parse(String),

    #[error("PDF is encrypted")]
    Encrypted,

    #[error("failed to extract text: {0}")]
    TextExtraction(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the language model collaborator.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("model server not reachable at {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("LLM API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("empty response from LLM")]
    EmptyResponse,

    #[error("LLM_API_KEY env var required for remote backend")]
    MissingApiKey,

    #[error("failed to decode LLM response: {0}")]
    Decode(String),

    #[error("failed to encode prompt: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Why a completion could not be turned into an `ExtractionResult`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    #[error("no fenced ```json block found in model output")]
    NoFencedBlock,

    #[error("fenced block is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("fenced block is not a JSON object")]
    NotAnObject,

    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("unexpected fields: {}", .0.join(", "))]
    UnexpectedFields(Vec<String>),
}

/// A parse failure that still carries the untouched model output.
#[derive(Error, Debug, Clone)]
#[error("could not parse structured output: {kind}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub raw: String,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, raw: impl Into<String>) -> Self {
        Self {
            kind,
            raw: raw.into(),
        }
    }
}

/// Configuration and schema errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid config document: {0}")]
    Document(#[from] toml_edit::TomlError),

    #[error("field schema is empty")]
    EmptySchema,

    #[error("duplicate field name in schema: {0}")]
    DuplicateField(String),
}

/// Errors writing one of the exported serializations.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV buffer error: {0}")]
    CsvBuffer(String),

    #[error("timestamp error: {0}")]
    Timestamp(#[from] time::error::Format),
}

/// Terminal failure of one invoice extraction.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("PDF not found at: {}", .0.display())]
    NotFound(PathBuf),

    #[error("PDF has {pages} page(s) but page index {page_index} was requested")]
    InsufficientPages { pages: usize, page_index: usize },

    #[error("PDF error: {0}")]
    Pdf(#[from] PdfError),

    #[error("language model unavailable: {0}. Verify the local model service is running")]
    ModelUnavailable(#[from] LlmError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl ExtractError {
    /// The raw model completion, when the failure happened after the model answered.
    pub fn raw_completion(&self) -> Option<&str> {
        match self {
            ExtractError::Parse(e) => Some(&e.raw),
            _ => None,
        }
    }
}
