// src/prompt.rs

use crate::parser::ExtractionResult;
use crate::schema::FieldSchema;

const EXTRACTION_PREAMBLE: &str =
    "Extract the following invoice fields from the provided document.";

const SUMMARY_PREAMBLE: &str = "Based on the following extracted invoice data, write a clear and concise summary \
of the transaction in simple, plain English.
Write it as a single paragraph without bullet points or sections. Make it easy to understand for anyone.";

/// Compose the extraction prompt: preamble, format instructions, then the page text verbatim.
///
/// The page text is neither truncated nor sanitised.
pub fn build_prompt(schema: &FieldSchema, page_text: &str) -> String {
    format!(
        "{EXTRACTION_PREAMBLE}\n\n{}\n\nInvoice Page:\n{page_text}\n",
        schema.format_instructions()
    )
}

/// Prompt for the plain-English summary of an already parsed result.
pub fn build_summary_prompt(result: &ExtractionResult) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string_pretty(result)?;
    Ok(format!("{SUMMARY_PREAMBLE}\n\n{json}\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSpec;

    fn small_schema() -> FieldSchema {
        FieldSchema::new(vec![
            FieldSpec::new("order_number", "Order number from the invoice"),
            FieldSpec::new("total_amount", "Total amount charged"),
        ])
        .unwrap()
    }

    #[test]
    fn test_sections_in_order() {
        let prompt = build_prompt(&small_schema(), "Order Number: 123-456-789");

        let preamble = prompt.find(EXTRACTION_PREAMBLE).unwrap();
        let instructions = prompt.find("```json").unwrap();
        let page = prompt.find("Invoice Page:\nOrder Number: 123-456-789").unwrap();
        assert!(preamble < instructions);
        assert!(instructions < page);
        assert!(prompt.contains("\"total_amount\": string  // Total amount charged"));
    }

    #[test]
    fn test_page_text_passed_through_verbatim() {
        let page = "Qty  | Unit Price\n  1  | ₹ 1,299.00\n".repeat(2_000);
        let prompt = build_prompt(&small_schema(), &page);
        assert!(prompt.contains(&page));
    }

    #[test]
    fn test_summary_prompt_embeds_pretty_json() {
        let schema = small_schema();
        let result = ExtractionResult::from_pairs(
            &schema,
            [("order_number", "123-456-789"), ("total_amount", "₹ 499.00")],
        );
        let prompt = build_summary_prompt(&result).unwrap();
        assert!(prompt.starts_with("Based on the following extracted invoice data"));
        assert!(prompt.contains("  \"order_number\": \"123-456-789\""));
        assert!(prompt.trim_end().ends_with('}'));
    }

    #[test]
    fn test_summary_prompt_lists_every_field() {
        let schema = FieldSchema::amazon_invoice();
        let result = ExtractionResult::from_pairs(&schema, [("asin", "B0FZTX33DW")]);
        let prompt = build_summary_prompt(&result).unwrap();

        let json = prompt.split_once("\n\n{").map(|(_, rest)| format!("{{{rest}")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value.as_object().unwrap().len(), schema.len());
        assert_eq!(value["asin"], "B0FZTX33DW");
    }
}
