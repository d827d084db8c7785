// src/pipeline.rs

use crate::error::{ExtractError, LlmError};
use crate::llm::LanguageModel;
use crate::parser::{self, ExtractionResult, KeyPolicy};
use crate::pdf_extract::{PageSource, PdfPages};
use crate::prompt;
use crate::schema::FieldSchema;
use std::path::Path;
use std::sync::Arc;
use tracing::{Instrument, info, info_span, warn};

/// Progress points of one extraction, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    LoadingPdf,
    ExtractingText,
    SendingToModel,
    Parsing,
    Summarizing,
    Complete,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::LoadingPdf,
        Stage::ExtractingText,
        Stage::SendingToModel,
        Stage::Parsing,
        Stage::Summarizing,
        Stage::Complete,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Stage::LoadingPdf => "Loading PDF file",
            Stage::ExtractingText => "Extracting text from invoice",
            Stage::SendingToModel => "Sending to model for processing",
            Stage::Parsing => "Parsing structured data",
            Stage::Summarizing => "Generating summary",
            Stage::Complete => "Extraction complete",
        }
    }
}

type PromptHook = Box<dyn Fn(&str) + Send + Sync>;

/// PDF -> page text -> prompt -> model -> parsed fields. Stateless between calls.
pub struct Extractor {
    pages: Arc<dyn PageSource>,
    model: Arc<dyn LanguageModel>,
    key_policy: KeyPolicy,
    on_prompt: Option<PromptHook>,
}

impl Extractor {
    pub fn new(pages: Arc<dyn PageSource>, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            pages,
            model,
            key_policy: KeyPolicy::default(),
            on_prompt: None,
        }
    }

    pub fn with_key_policy(mut self, key_policy: KeyPolicy) -> Self {
        self.key_policy = key_policy;
        self
    }

    /// Called with the full prompt right before it is sent.
    pub fn with_prompt_hook(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_prompt = Some(Box::new(hook));
        self
    }

    pub async fn extract_invoice(
        &self,
        path: &Path,
        page_index: usize,
        schema: &FieldSchema,
    ) -> Result<ExtractionResult, ExtractError> {
        self.extract_invoice_with(path, page_index, schema, |_| {}).await
    }

    /// `extract_invoice`, reporting each stage as it starts.
    pub async fn extract_invoice_with(
        &self,
        path: &Path,
        page_index: usize,
        schema: &FieldSchema,
        mut on_stage: impl FnMut(Stage) + Send,
    ) -> Result<ExtractionResult, ExtractError> {
        let span = info_span!("extract", path = %path.display(), page_index);
        async {
            if !path.is_file() {
                return Err(ExtractError::NotFound(path.to_path_buf()));
            }

            on_stage(Stage::LoadingPdf);
            let pages = self.pages.pages_from_path(path)?;

            self.extract_from_pages(pages, page_index, schema, &mut on_stage)
                .await
        }
        .instrument(span)
        .await
    }

    /// Same pipeline for a PDF already held in memory (an upload).
    pub async fn extract_invoice_bytes(
        &self,
        pdf_bytes: &[u8],
        page_index: usize,
        schema: &FieldSchema,
        mut on_stage: impl FnMut(Stage) + Send,
    ) -> Result<ExtractionResult, ExtractError> {
        let span = info_span!("extract", bytes = pdf_bytes.len(), page_index);
        async {
            on_stage(Stage::LoadingPdf);
            let pages = self.pages.pages_from_mem(pdf_bytes)?;

            self.extract_from_pages(pages, page_index, schema, &mut on_stage)
                .await
        }
        .instrument(span)
        .await
    }

    async fn extract_from_pages(
        &self,
        pages: PdfPages,
        page_index: usize,
        schema: &FieldSchema,
        on_stage: &mut (impl FnMut(Stage) + Send),
    ) -> Result<ExtractionResult, ExtractError> {
        on_stage(Stage::ExtractingText);
        let Some(page) = pages.texts.get(page_index) else {
            return Err(ExtractError::InsufficientPages {
                pages: pages.texts.len(),
                page_index,
            });
        };
        if pages.is_image_only(page_index) {
            warn!(
                page = page_index + 1,
                "Selected page looks scanned or image-only, no OCR is done so its text may be empty"
            );
        }
        let page_text = page.trim();
        if page_text.is_empty() {
            warn!("Selected page has no text");
        }
        info!(pages = pages.texts.len(), chars = page_text.len(), "Selected page text");

        on_stage(Stage::SendingToModel);
        let prompt = prompt::build_prompt(schema, page_text);
        if let Some(hook) = &self.on_prompt {
            hook(&prompt);
        }
        let completion = self.model.complete(&prompt).await?;

        on_stage(Stage::Parsing);
        let result = parser::parse_with_policy(&completion, schema, self.key_policy)?;
        info!(fields = result.len(), "Parsed structured output");
        Ok(result)
    }

    /// Second model call: a plain-English paragraph describing the result.
    pub async fn summarize(&self, result: &ExtractionResult) -> Result<String, LlmError> {
        let prompt = prompt::build_summary_prompt(result)?;
        let summary = self.model.complete(&prompt).await?;
        Ok(summary.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ParseErrorKind, PdfError};
    use crate::pdf_extract::PdfTextExtractor;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use regex::Regex;
    use std::io::Write;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::NamedTempFile;

    struct StubPages {
        pages: Vec<String>,
        calls: AtomicUsize,
    }

    impl StubPages {
        fn new(pages: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                pages: pages.iter().map(|p| p.to_string()).collect(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl PageSource for StubPages {
        fn pages_from_mem(&self, _pdf_bytes: &[u8]) -> Result<PdfPages, PdfError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.pages.clone().into())
        }
    }

    /// Answers every field, copying the order number out of the prompt.
    struct EchoModel {
        schema: FieldSchema,
        prompts: Mutex<Vec<String>>,
    }

    impl EchoModel {
        fn new(schema: &FieldSchema) -> Arc<Self> {
            Arc::new(Self {
                schema: schema.clone(),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LanguageModel for EchoModel {
        async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let re = Regex::new(r"Order Number:\s*(\S+)").unwrap();
            let order = re
                .captures(prompt)
                .map(|c| c[1].to_string())
                .unwrap_or_default();
            let body = self
                .schema
                .names()
                .map(|n| {
                    let v = if n == "order_number" { order.as_str() } else { "" };
                    format!("  \"{n}\": \"{v}\"")
                })
                .collect::<Vec<_>>()
                .join(",\n");
            Ok(format!("Sure! Here is the data:\n```json\n{{\n{body}\n}}\n```"))
        }
    }

    /// Always returns the same text.
    struct FixedModel {
        reply: Result<String, fn() -> LlmError>,
        calls: AtomicUsize,
    }

    impl FixedModel {
        fn text(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(err: fn() -> LlmError) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(err),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for FixedModel {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(make) => Err(make()),
            }
        }
    }

    fn existing_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"%PDF-1.5 stub").unwrap();
        file
    }

    #[tokio::test]
    async fn test_missing_file_fails_before_any_work() {
        let schema = FieldSchema::amazon_invoice();
        let pages = StubPages::new(&["p1", "p2"]);
        let model = EchoModel::new(&schema);
        let extractor = Extractor::new(pages.clone(), model.clone());

        let err = extractor
            .extract_invoice(Path::new("/no/such/invoice.pdf"), 1, &schema)
            .await
            .unwrap_err();

        assert!(matches!(err, ExtractError::NotFound(_)));
        assert_eq!(pages.calls.load(Ordering::SeqCst), 0);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_insufficient_pages_makes_no_model_call() {
        let schema = FieldSchema::amazon_invoice();
        let model = EchoModel::new(&schema);
        let extractor = Extractor::new(StubPages::new(&["only page"]), model.clone());
        let file = existing_file();

        let err = extractor
            .extract_invoice(file.path(), 1, &schema)
            .await
            .unwrap_err();

        match err {
            ExtractError::InsufficientPages { pages, page_index } => {
                assert_eq!(pages, 1);
                assert_eq!(page_index, 1);
            }
            other => panic!("expected InsufficientPages, got {other:?}"),
        }
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_second_page_order_number_round_trips() {
        let schema = FieldSchema::amazon_invoice();
        let model = EchoModel::new(&schema);
        let extractor = Extractor::new(
            StubPages::new(&["Tax Invoice/Bill of Supply", "  Order Number: 123-456-789\n  "]),
            model.clone(),
        );
        let file = existing_file();

        let result = extractor
            .extract_invoice(file.path(), 1, &schema)
            .await
            .unwrap();

        assert_eq!(result.len(), schema.len());
        assert_eq!(result.get("order_number"), Some("123-456-789"));
        assert_eq!(result.get("sku"), Some(""));
        assert_eq!(model.calls(), 1);

        let prompt = model.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("Invoice Page:\nOrder Number: 123-456-789\n"));
        assert!(!prompt.contains("Tax Invoice/Bill of Supply"));
    }

    #[tokio::test]
    async fn test_prose_reply_surfaces_parse_error_with_raw_text() {
        let schema = FieldSchema::amazon_invoice();
        let prose = "I could not find a table, but the order number looks like 123-456-789.";
        let extractor = Extractor::new(StubPages::new(&["a", "b"]), FixedModel::text(prose));
        let file = existing_file();

        let err = extractor
            .extract_invoice(file.path(), 1, &schema)
            .await
            .unwrap_err();

        match &err {
            ExtractError::Parse(e) => assert_eq!(e.kind, ParseErrorKind::NoFencedBlock),
            other => panic!("expected parse error, got {other:?}"),
        }
        assert_eq!(err.raw_completion(), Some(prose));
    }

    #[tokio::test]
    async fn test_model_failure_is_model_unavailable() {
        let schema = FieldSchema::amazon_invoice();
        let model = FixedModel::failing(|| LlmError::Unreachable {
            url: "http://localhost:11434/v1".into(),
            reason: "connection refused".into(),
        });
        let extractor = Extractor::new(StubPages::new(&["a", "b"]), model.clone());
        let file = existing_file();

        let err = extractor
            .extract_invoice(file.path(), 1, &schema)
            .await
            .unwrap_err();

        assert!(matches!(err, ExtractError::ModelUnavailable(_)));
        assert!(err.to_string().contains("Verify the local model service is running"));
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stages_reported_in_order() {
        let schema = FieldSchema::amazon_invoice();
        let extractor = Extractor::new(StubPages::new(&["a", "b"]), EchoModel::new(&schema));
        let mut seen = Vec::new();

        extractor
            .extract_invoice_bytes(b"%PDF", 1, &schema, |s| seen.push(s))
            .await
            .unwrap();

        assert_eq!(
            seen,
            vec![
                Stage::LoadingPdf,
                Stage::ExtractingText,
                Stage::SendingToModel,
                Stage::Parsing
            ]
        );
    }

    #[tokio::test]
    async fn test_prompt_hook_and_key_policy() {
        let schema = FieldSchema::amazon_invoice();
        let body = schema
            .names()
            .map(|n| format!("\"{n}\": \"x\""))
            .chain(std::iter::once("\"vendor\": \"Cloudtail\"".to_string()))
            .collect::<Vec<_>>()
            .join(", ");
        let reply = format!("```json\n{{{body}}}\n```");
        let seen = Arc::new(Mutex::new(String::new()));
        let sink = seen.clone();

        let strict = Extractor::new(StubPages::new(&["a", "b"]), FixedModel::text(&reply));
        let err = strict
            .extract_invoice_bytes(b"%PDF", 1, &schema, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Parse(_)));

        let lenient = Extractor::new(StubPages::new(&["a", "b"]), FixedModel::text(&reply))
            .with_key_policy(KeyPolicy::AllowExtra)
            .with_prompt_hook(move |p| *sink.lock().unwrap() = p.to_string());
        let result = lenient
            .extract_invoice_bytes(b"%PDF", 1, &schema, |_| {})
            .await
            .unwrap();
        assert_eq!(result.get("asin"), Some("x"));
        assert!(seen.lock().unwrap().starts_with("Extract the following invoice fields"));
    }

    #[tokio::test]
    async fn test_summary_uses_second_call() {
        let schema = FieldSchema::amazon_invoice();
        let model = FixedModel::text("  You bought rice for ₹ 499.  ");
        let extractor = Extractor::new(StubPages::new(&[]), model.clone());
        let result = ExtractionResult::from_pairs(&schema, [("total_amount", "₹ 499.00")]);

        let summary = extractor.summarize(&result).await.unwrap();
        assert_eq!(summary, "You bought rice for ₹ 499.");
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_real_pdf_end_to_end() {
        let schema = FieldSchema::amazon_invoice();
        let pdf = crate::pdf_extract::tests::build_pdf(&[
            "Tax Invoice",
            "Order Number: 123-456-789",
        ]);
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&pdf).unwrap();

        let extractor = Extractor::new(Arc::new(PdfTextExtractor), EchoModel::new(&schema));
        let result = extractor
            .extract_invoice(file.path(), 1, &schema)
            .await
            .unwrap();
        assert_eq!(result.get("order_number"), Some("123-456-789"));
    }

    #[tokio::test]
    async fn test_scanned_page_is_still_sent_to_model() {
        use crate::pdf_extract::tests::{build_doc, save};

        let schema = FieldSchema::amazon_invoice();
        let pdf = save(build_doc(&["Tax Invoice", "scanned"], &[1]));
        let model = EchoModel::new(&schema);
        let extractor = Extractor::new(Arc::new(PdfTextExtractor), model.clone());

        let result = extractor
            .extract_invoice_bytes(&pdf, 1, &schema, |_| {})
            .await
            .unwrap();
        assert_eq!(result.get("order_number"), Some(""));
        assert_eq!(model.calls(), 1);
    }
}
