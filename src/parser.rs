// src/parser.rs

use crate::error::{ParseError, ParseErrorKind};
use crate::schema::FieldSchema;
use regex::Regex;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use tracing::{debug, warn};

/// How strictly the decoded key set must match the schema.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPolicy {
    /// Every schema field must be present and nothing else.
    #[default]
    Exact,
    /// Every schema field must be present; unknown keys are dropped.
    AllowExtra,
}

/// Field name -> extracted text for one invoice, in schema order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionResult {
    fields: Vec<(String, String)>,
}

impl ExtractionResult {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Decode the generic JSON form written by the exporters.
    pub fn from_json(text: &str, schema: &FieldSchema) -> Result<Self, ParseError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ParseError::new(ParseErrorKind::InvalidJson(e.to_string()), text))?;
        let Value::Object(map) = value else {
            return Err(ParseError::new(ParseErrorKind::NotAnObject, text));
        };
        from_object(map, schema, KeyPolicy::Exact, text)
    }

    #[cfg(test)]
    pub(crate) fn from_pairs<'a>(
        schema: &FieldSchema,
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let pairs: Vec<(&str, &str)> = pairs.into_iter().collect();
        Self {
            fields: schema
                .names()
                .map(|name| {
                    let value = pairs
                        .iter()
                        .find(|(k, _)| *k == name)
                        .map(|(_, v)| v.to_string())
                        .unwrap_or_default();
                    (name.to_string(), value)
                })
                .collect(),
        }
    }
}

impl Serialize for ExtractionResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Parse a model completion with the exact key policy.
pub fn parse(completion: &str, schema: &FieldSchema) -> Result<ExtractionResult, ParseError> {
    parse_with_policy(completion, schema, KeyPolicy::Exact)
}

/// Locate the fenced block, decode it, and check it against the schema.
///
/// Every error carries the untouched completion in `ParseError::raw`.
pub fn parse_with_policy(
    completion: &str,
    schema: &FieldSchema,
    policy: KeyPolicy,
) -> Result<ExtractionResult, ParseError> {
    let fail = |kind| ParseError::new(kind, completion);

    let body = fenced_block(completion).ok_or_else(|| fail(ParseErrorKind::NoFencedBlock))?;
    let repaired = repair_json(body);
    debug!(chars = repaired.len(), "Decoding fenced block");

    let value: Value = serde_json::from_str(&repaired)
        .map_err(|e| fail(ParseErrorKind::InvalidJson(e.to_string())))?;
    let Value::Object(map) = value else {
        return Err(fail(ParseErrorKind::NotAnObject));
    };

    from_object(map, schema, policy, completion)
}

fn from_object(
    mut map: Map<String, Value>,
    schema: &FieldSchema,
    policy: KeyPolicy,
    raw: &str,
) -> Result<ExtractionResult, ParseError> {
    let missing: Vec<String> = schema
        .names()
        .filter(|name| !map.contains_key(*name))
        .map(str::to_string)
        .collect();
    if !missing.is_empty() {
        return Err(ParseError::new(ParseErrorKind::MissingFields(missing), raw));
    }

    let extra: Vec<String> = map
        .keys()
        .filter(|k| !schema.contains(k))
        .cloned()
        .collect();
    if !extra.is_empty() {
        match policy {
            KeyPolicy::Exact => {
                return Err(ParseError::new(ParseErrorKind::UnexpectedFields(extra), raw));
            }
            KeyPolicy::AllowExtra => {
                warn!(fields = ?extra, "Dropping fields not declared in the schema");
            }
        }
    }

    let fields = schema
        .names()
        .map(|name| {
            let value = map.remove(name).map(|v| value_to_text(&v)).unwrap_or_default();
            (name.to_string(), value)
        })
        .collect();

    Ok(ExtractionResult { fields })
}

static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").expect("fence pattern is valid")
});

/// Interior of the first ``` fence, with an optional language tag.
fn fenced_block(text: &str) -> Option<&str> {
    FENCE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// Escape raw control characters inside string literals and drop trailing
/// commas before a closing bracket. Models emit both regularly.
fn repair_json(body: &str) -> String {
    let chars: Vec<char> = body.chars().collect();
    let mut out = String::with_capacity(body.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
                out.push(c);
                continue;
            }
            match c {
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
                c => out.push(c),
            }
        } else {
            match c {
                '"' => {
                    in_string = true;
                    out.push(c);
                }
                ',' => {
                    let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
                    if !matches!(next, Some('}') | Some(']')) {
                        out.push(c);
                    }
                }
                c => out.push(c),
            }
        }
    }
    out
}

fn is_scalar(v: &Value) -> bool {
    !matches!(v, Value::Array(_) | Value::Object(_))
}

fn value_to_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(_) | Value::Number(_) => v.to_string(),
        Value::Array(items) if items.iter().all(is_scalar) => items
            .iter()
            .map(value_to_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSpec;
    use pretty_assertions::assert_eq;

    fn schema() -> FieldSchema {
        FieldSchema::new(vec![
            FieldSpec::new("order_number", "Order number"),
            FieldSpec::new("total_amount", "Total amount"),
            FieldSpec::new("items", "Item descriptions"),
        ])
        .unwrap()
    }

    #[test]
    fn test_parses_fenced_block_in_schema_order() {
        let completion = "Here you go:\n```json\n{\n  \"items\": \"Basmati Rice 5kg\",\n  \"total_amount\": \"₹ 499.00\",\n  \"order_number\": \"123-456-789\"\n}\n```\nLet me know!";
        let result = parse(completion, &schema()).unwrap();

        assert_eq!(result.len(), 3);
        let keys: Vec<&str> = result.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["order_number", "total_amount", "items"]);
        assert_eq!(result.get("order_number"), Some("123-456-789"));
        assert_eq!(result.get("total_amount"), Some("₹ 499.00"));
    }

    #[test]
    fn test_full_registry_yields_exactly_n_keys() {
        let schema = FieldSchema::amazon_invoice();
        let body = schema
            .names()
            .map(|n| format!("\"{n}\": \"\""))
            .collect::<Vec<_>>()
            .join(",\n");
        let completion = format!("```json\n{{\n{body}\n}}\n```");

        let result = parse(&completion, &schema).unwrap();
        assert_eq!(result.len(), schema.len());
        assert!(schema.names().all(|n| result.get(n) == Some("")));
    }

    #[test]
    fn test_fence_without_language_tag() {
        let completion = "```\n{\"order_number\": \"1\", \"total_amount\": \"2\", \"items\": \"3\"}\n```";
        let result = parse(completion, &schema()).unwrap();
        assert_eq!(result.get("items"), Some("3"));

        let upper = "```JSON\n{\"order_number\": \"1\", \"total_amount\": \"2\", \"items\": \"3\"}```";
        assert!(parse(upper, &schema()).is_ok());
    }

    #[test]
    fn test_first_fence_wins_on_every_call() {
        let completion = "```json\n{\"order_number\": \"first\", \"total_amount\": \"\", \"items\": \"\"}\n```\n\
             and again:\n```json\n{\"order_number\": \"second\"}\n```";
        for _ in 0..3 {
            let result = parse(completion, &schema()).unwrap();
            assert_eq!(result.get("order_number"), Some("first"));
        }
        assert_eq!(fenced_block("```json\n{}\n```"), Some("{}"));
        assert_eq!(fenced_block("no fence here"), None);
    }

    #[test]
    fn test_no_fence_is_parse_error_with_raw_text() {
        let prose = "The order number is 123-456-789 and the total is ₹ 499.";
        let err = parse(prose, &schema()).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::NoFencedBlock);
        assert_eq!(err.raw, prose);
    }

    #[test]
    fn test_missing_key_is_parse_error() {
        let completion = "```json\n{\"order_number\": \"1\", \"items\": \"3\"}\n```";
        let err = parse(completion, &schema()).unwrap_err();
        assert_eq!(
            err.kind,
            ParseErrorKind::MissingFields(vec!["total_amount".to_string()])
        );
        assert_eq!(err.raw, completion);
    }

    #[test]
    fn test_extra_keys_depend_on_policy() {
        let completion = "```json\n{\"order_number\": \"1\", \"total_amount\": \"2\", \"items\": \"3\", \"vendor\": \"Cloudtail\"}\n```";

        let err = parse(completion, &schema()).unwrap_err();
        assert_eq!(
            err.kind,
            ParseErrorKind::UnexpectedFields(vec!["vendor".to_string()])
        );

        let result = parse_with_policy(completion, &schema(), KeyPolicy::AllowExtra).unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(result.get("vendor"), None);
    }

    #[test]
    fn test_invalid_json_and_non_object() {
        let err = parse("```json\n{\"order_number\": }\n```", &schema()).unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::InvalidJson(_)));

        let err = parse("```json\n[\"a\", \"b\"]\n```", &schema()).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::NotAnObject);
    }

    #[test]
    fn test_repairs_raw_newlines_and_trailing_commas() {
        let completion = "```json\n{\n\"order_number\": \"1\",\n\"total_amount\": \"2\",\n\"items\": \"Rice\n\tBrown\",\n}\n```";
        let result = parse(completion, &schema()).unwrap();
        assert_eq!(result.get("items"), Some("Rice\n\tBrown"));
    }

    #[test]
    fn test_repair_leaves_escaped_quotes_alone() {
        let repaired = repair_json(r#"{"a": "say \"hi\", ok",}"#);
        assert_eq!(repaired, r#"{"a": "say \"hi\", ok"}"#);
    }

    #[test]
    fn test_non_string_values_are_coerced_to_text() {
        let completion = "```json\n{\"order_number\": 123, \"total_amount\": null, \"items\": [\"Rice\", \"Dal\"]}\n```";
        let result = parse(completion, &schema()).unwrap();
        assert_eq!(result.get("order_number"), Some("123"));
        assert_eq!(result.get("total_amount"), Some(""));
        assert_eq!(result.get("items"), Some("Rice, Dal"));

        let nested = "```json\n{\"order_number\": {\"id\": \"1\"}, \"total_amount\": true, \"items\": []}\n```";
        let result = parse(nested, &schema()).unwrap();
        assert_eq!(result.get("order_number"), Some(r#"{"id":"1"}"#));
        assert_eq!(result.get("total_amount"), Some("true"));
        assert_eq!(result.get("items"), Some(""));
    }

    #[test]
    fn test_json_round_trip() {
        let schema = schema();
        let result = ExtractionResult::from_pairs(
            &schema,
            [("order_number", "123-456-789"), ("items", "Rice \"Basmati\"\nDal")],
        );
        let json = serde_json::to_string_pretty(&result).unwrap();
        let decoded = ExtractionResult::from_json(&json, &schema).unwrap();
        assert_eq!(decoded, result);
    }
}
