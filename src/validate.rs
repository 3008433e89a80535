//! Schema validation for untrusted import payloads
//!
//! Turns an already-parsed JSON value into a canonical [`Dataset`]:
//!
//! - the root must be a JSON object
//! - a missing or non-array collection becomes an empty collection
//! - collection elements that cannot be decoded are skipped and counted
//! - free-text fields are sanitized before decoding
//! - a category collection mixing names and entities is upgraded to entities
//! - a payload with no entities at all is rejected
//!
//! Validation never fails with an error value; everything is reported
//! through [`ValidationOutcome`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::model::{
    normalize_categories, timestamp_now, CategoryEntry, Dataset, Guideline, Principle,
    DEFAULT_VERSION,
};
use crate::progress::{ImportStage, ProgressReporter};
use crate::repair::repair;
use crate::sanitize::{sanitize_entity_fields, GUIDELINE_TEXT_FIELDS, PRINCIPLE_TEXT_FIELDS};

/// Result of validating a parsed payload
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub data: Option<Dataset>,
    pub error: Option<String>,
    /// Collection elements dropped because they could not be decoded
    pub skipped: usize,
}

impl ValidationOutcome {
    fn rejected(error: StorageError, skipped: usize) -> Self {
        Self {
            valid: false,
            data: None,
            error: Some(error.to_string()),
            skipped,
        }
    }
}

/// Result of validating raw JSON text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Dataset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Repairs applied to the text before it parsed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub corrections: Vec<String>,
    #[serde(default)]
    pub skipped: usize,
}

fn take_array(root: &mut Map<String, Value>, key: &str) -> Vec<Value> {
    match root.remove(key) {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            warn!(collection = key, found = %json_type(&other), "Collection is not an array, treating as empty");
            Vec::new()
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn decode_objects<T>(
    items: Vec<Value>,
    collection: &str,
    text_fields: &[&str],
    skipped: &mut usize,
) -> Vec<T>
where
    T: serde::de::DeserializeOwned,
{
    let mut decoded = Vec::with_capacity(items.len());
    for (index, mut item) in items.into_iter().enumerate() {
        if !item.is_object() {
            warn!(collection, index, found = %json_type(&item), "Skipping non-object entry");
            *skipped += 1;
            continue;
        }
        sanitize_entity_fields(&mut item, text_fields);
        match serde_json::from_value::<T>(item) {
            Ok(entity) => decoded.push(entity),
            Err(e) => {
                warn!(collection, index, error = %e, "Skipping undecodable entry");
                *skipped += 1;
            }
        }
    }
    decoded
}

fn decode_categories(items: Vec<Value>, skipped: &mut usize) -> Vec<CategoryEntry> {
    let mut decoded = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match item {
            Value::String(name) if !name.trim().is_empty() => {
                decoded.push(CategoryEntry::Named(name));
            }
            Value::Object(_) => match serde_json::from_value(item) {
                Ok(category) => decoded.push(CategoryEntry::Entity(category)),
                Err(e) => {
                    warn!(index, error = %e, "Skipping undecodable category");
                    *skipped += 1;
                }
            },
            other => {
                warn!(index, found = %json_type(&other), "Skipping invalid category entry");
                *skipped += 1;
            }
        }
    }
    decoded
}

fn metadata_text(root: &Map<String, Value>, key: &str) -> Option<String> {
    match root.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Validate a parsed payload and normalize it into a [`Dataset`]
pub fn validate(parsed: Value) -> ValidationOutcome {
    let Value::Object(mut root) = parsed else {
        return ValidationOutcome::rejected(
            StorageError::InvalidData("expected a JSON object at the top level".to_string()),
            0,
        );
    };

    let mut skipped = 0;
    let guidelines: Vec<Guideline> = decode_objects(
        take_array(&mut root, "guidelines"),
        "guidelines",
        GUIDELINE_TEXT_FIELDS,
        &mut skipped,
    );
    let categories = normalize_categories(decode_categories(
        take_array(&mut root, "categories"),
        &mut skipped,
    ));
    let principles: Vec<Principle> = decode_objects(
        take_array(&mut root, "principles"),
        "principles",
        PRINCIPLE_TEXT_FIELDS,
        &mut skipped,
    );

    if guidelines.is_empty() && categories.is_empty() && principles.is_empty() {
        return ValidationOutcome::rejected(
            StorageError::NoImportableData(
                "the file contains no guidelines, principles or categories".to_string(),
            ),
            skipped,
        );
    }

    let dataset = Dataset {
        guidelines,
        categories,
        principles,
        last_updated: metadata_text(&root, "lastUpdated").unwrap_or_else(timestamp_now),
        version: metadata_text(&root, "version").unwrap_or_else(|| DEFAULT_VERSION.to_string()),
        export_date: metadata_text(&root, "exportDate"),
    };

    debug!(
        guidelines = dataset.guidelines.len(),
        principles = dataset.principles.len(),
        categories = dataset.categories.len(),
        skipped,
        "Payload validated"
    );

    ValidationOutcome {
        valid: true,
        data: Some(dataset),
        error: None,
        skipped,
    }
}

/// Repair, parse and validate raw JSON text.
///
/// Read-only: safe to call speculatively before committing to an import.
pub fn validate_json_text(text: &str, reporter: &ProgressReporter<'_>) -> ValidationResult {
    reporter.stage(ImportStage::Parsing, 10, "Parsing JSON");

    let repaired = repair(text);
    if !repaired.corrections.is_empty() {
        reporter.stage(
            ImportStage::Repairing,
            30,
            format!("Applied {} correction(s)", repaired.corrections.len()),
        );
    }

    if !repaired.valid {
        return ValidationResult {
            valid: false,
            data: None,
            error: repaired.original_error,
            corrections: repaired.corrections,
            skipped: 0,
        };
    }

    let parsed: Value = match serde_json::from_str(&repaired.fixed) {
        Ok(value) => value,
        Err(e) => {
            return ValidationResult {
                valid: false,
                data: None,
                error: Some(e.to_string()),
                corrections: repaired.corrections,
                skipped: 0,
            }
        }
    };

    reporter.stage(ImportStage::Validating, 70, "Validating structure");
    let outcome = validate(parsed);
    reporter.report(ImportStage::Completed, 100, outcome.error.clone());

    ValidationResult {
        valid: outcome.valid,
        data: outcome.data,
        error: outcome.error,
        corrections: repaired.corrections,
        skipped: outcome.skipped,
    }
}
