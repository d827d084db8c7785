// src/export.rs

use crate::error::ExportError;
use crate::parser::ExtractionResult;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::info;

pub const JSON_FILE_NAME: &str = "invoice_extraction.json";
pub const CSV_FILE_NAME: &str = "invoice_extraction.csv";

/// Pretty JSON with 4-space indentation, as printed on the console.
pub fn to_pretty_json(result: &ExtractionResult) -> Result<String, ExportError> {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    result.serialize(&mut ser)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// One header row of field names, one row of values.
pub fn to_csv(result: &ExtractionResult) -> Result<String, ExportError> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(result.iter().map(|(k, _)| k))?;
    wtr.write_record(result.iter().map(|(_, v)| v))?;
    let bytes = wtr
        .into_inner()
        .map_err(|e| ExportError::CsvBuffer(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ExportError::CsvBuffer(e.to_string()))
}

/// `shipping_address` -> `Shipping Address`
pub fn field_label(name: &str) -> String {
    name.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Two-column Field / Value table. Multi-line values are folded onto one line.
pub fn to_table(result: &ExtractionResult) -> String {
    let rows: Vec<(String, String)> = result
        .iter()
        .map(|(k, v)| (field_label(k), v.split_whitespace().collect::<Vec<_>>().join(" ")))
        .collect();
    let width = rows
        .iter()
        .map(|(label, _)| label.chars().count())
        .max()
        .unwrap_or(0)
        .max("Field".len());

    let mut out = format!("{:<width$}  Value\n{}  {}\n", "Field", "-".repeat(width), "-".repeat(5));
    for (label, value) in rows {
        out.push_str(&format!("{label:<width$}  {value}\n"));
    }
    out
}

#[derive(Serialize)]
struct DownloadDocument<'a> {
    extracted_fields: &'a ExtractionResult,
    summary: Option<&'a str>,
    extraction_timestamp: String,
}

/// The downloadable JSON document: fields, summary and a local timestamp.
pub fn download_json(
    result: &ExtractionResult,
    summary: Option<&str>,
    at: OffsetDateTime,
) -> Result<String, ExportError> {
    let stamp = at.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))?;
    let doc = DownloadDocument {
        extracted_fields: result,
        summary,
        extraction_timestamp: stamp,
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// Write the JSON download document into `dir`.
pub fn write_json_download(
    dir: &Path,
    result: &ExtractionResult,
    summary: Option<&str>,
) -> Result<PathBuf, ExportError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(JSON_FILE_NAME);
    fs::write(&path, download_json(result, summary, now())?)?;
    info!(path = %path.display(), "Wrote JSON download");
    Ok(path)
}

/// Write the CSV form into `dir`.
pub fn write_csv_download(dir: &Path, result: &ExtractionResult) -> Result<PathBuf, ExportError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(CSV_FILE_NAME);
    fs::write(&path, to_csv(result)?)?;
    info!(path = %path.display(), "Wrote CSV download");
    Ok(path)
}
