// src/schema.rs

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One named piece of information to pull out of an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub description: String,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Ordered, validated set of fields. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    fields: Vec<FieldSpec>,
}

/// Built-in registry for Amazon invoices, in prompt order.
const AMAZON_FIELDS: &[(&str, &str)] = &[
    (
        "shipping_address",
        "Shipping address details including Name, Address, and State Code",
    ),
    ("place_of_delivery", "Place of delivery for the order"),
    ("reverse_charge", "Reverse charge applicable (Yes/No)"),
    ("payment_transaction_id", "Payment transaction ID"),
    ("payment_datetime", "Date and time of payment"),
    ("payment_mode", "Mode of payment used"),
    ("total_amount", "Total amount charged"),
    ("order_number", "Order number from the invoice"),
    ("invoice_number", "Invoice number"),
    ("order_date", "Order date"),
    (
        "quantity",
        "Qty (Quantity) - the numeric quantity per item from the items table, typically found in a Qty column",
    ),
    (
        "asin",
        "ASIN (Amazon Standard Identification Number) - Extract the 10-character alphanumeric code that appears after the last pipe | character. Example: B0FZTX33DW",
    ),
    (
        "sku",
        "SKU (Stock Keeping Unit) - Extract the alphanumeric code that appears inside parentheses ( ) after the ASIN. Example: NM-8PYA-4Y4G",
    ),
    (
        "hsn",
        "HSN (Harmonized System of Nomenclature) code - Extract the numeric code that appears after 'HSN:' in the item details. Example: 10063010",
    ),
    (
        "items",
        "List of purchased item descriptions - extract only the strings BEFORE the pipe | character, which contains the product name and details",
    ),
];

impl FieldSchema {
    /// Build a schema, rejecting empty lists and duplicate names.
    pub fn new(fields: Vec<FieldSpec>) -> Result<Self, ConfigError> {
        if fields.is_empty() {
            return Err(ConfigError::EmptySchema);
        }
        let mut seen = HashSet::new();
        for f in &fields {
            if !seen.insert(f.name.as_str()) {
                return Err(ConfigError::DuplicateField(f.name.clone()));
            }
        }
        Ok(Self { fields })
    }

    /// The Amazon invoice registry.
    pub fn amazon_invoice() -> Self {
        Self {
            fields: AMAZON_FIELDS
                .iter()
                .map(|(name, desc)| FieldSpec::new(*name, *desc))
                .collect(),
        }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Instructions telling the model to answer with one fenced JSON block
    /// whose keys are exactly the field names.
    pub fn format_instructions(&self) -> String {
        let body = self
            .fields
            .iter()
            .map(|f| format!("\t\"{}\": string  // {}", f.name, f.description))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "The output should be a markdown code snippet formatted in the following schema, \
             including the leading and trailing \"```json\" and \"```\":\n\n\
             ```json\n{{\n{body}\n}}\n```"
        )
    }
}

impl Default for FieldSchema {
    fn default() -> Self {
        Self::amazon_invoice()
    }
}
