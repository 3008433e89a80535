//! Canonical dataset types
//!
//! The dataset is the unit of persistence and merge: three collections plus
//! metadata. Entity types decode leniently because import payloads are
//! untrusted; anything the engine does not model is kept in `extra` and
//! written back unchanged.
//!
//! A category collection holds either bare names (legacy) or entities (v2),
//! never both: [`normalize_categories`] upgrades names to entities as soon
//! as one entity is present.
//!
//! Principles carry two historical spellings for two of their fields
//! (`name`/`title`, `evidence`/`evidenz`). They are folded into a single
//! canonical field when decoded and written out under both keys.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::backend::SaveMode;
use crate::progress::ImportStats;

/// Schema version written when a payload does not name one
pub const DEFAULT_VERSION: &str = "2.0";

/// Current time as an RFC 3339 UTC string with millisecond precision
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

// ============================================================================
// Lenient field decoding
// ============================================================================

mod lenient {
    use super::*;

    pub(super) fn text_from_value(value: Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub(super) fn list_from_value(value: Value) -> Vec<String> {
        match value {
            Value::Array(items) => items.into_iter().filter_map(text_from_value).collect(),
            Value::String(s) if s.trim().is_empty() => Vec::new(),
            Value::String(s) => vec![s],
            Value::Number(n) => vec![n.to_string()],
            _ => Vec::new(),
        }
    }

    pub fn text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value.and_then(text_from_value))
    }

    pub fn required_text<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(text(deserializer)?.unwrap_or_default())
    }

    pub fn list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value.map(list_from_value).unwrap_or_default())
    }
}

/// First of the given spellings that holds non-blank text
fn first_non_empty(candidates: [Option<String>; 2]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
}

// ============================================================================
// Entities
// ============================================================================

/// A single guideline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guideline {
    #[serde(default, deserialize_with = "lenient::required_text")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::required_text")]
    pub title: String,
    /// Guideline body
    #[serde(default, deserialize_with = "lenient::required_text")]
    pub text: String,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
    /// Category ids or names (not checked against the category collection)
    #[serde(default, deserialize_with = "lenient::list")]
    pub categories: Vec<String>,
    /// Referenced principle ids
    #[serde(default, deserialize_with = "lenient::list")]
    pub principles: Vec<String>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub svg_content: Option<String>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A psychological principle referenced by guidelines
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "PrincipleRecord", into = "PrincipleRecord")]
pub struct Principle {
    pub id: String,
    /// Canonical label (`title` in legacy payloads)
    pub name: String,
    pub description: String,
    /// Supporting evidence (`evidenz` in legacy payloads)
    pub evidence: Option<String>,
    pub implication: Option<String>,
    /// Element tags, e.g. input/processing/decision/output/environment
    pub elements: Vec<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub extra: Map<String, Value>,
}

/// Wire shape of a principle, carrying both spellings of aliased fields
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrincipleRecord {
    #[serde(default, deserialize_with = "lenient::required_text")]
    id: String,
    #[serde(default, deserialize_with = "lenient::text")]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    title: Option<String>,
    #[serde(default, deserialize_with = "lenient::required_text")]
    description: String,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    evidenz: Option<String>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    evidence: Option<String>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    implikation: Option<String>,
    #[serde(default, deserialize_with = "lenient::list")]
    elements: Vec<String>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    created_at: Option<String>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<PrincipleRecord> for Principle {
    fn from(record: PrincipleRecord) -> Self {
        Self {
            id: record.id,
            name: first_non_empty([record.name, record.title]).unwrap_or_default(),
            description: record.description,
            evidence: first_non_empty([record.evidenz, record.evidence]),
            implication: record.implikation,
            elements: record.elements,
            created_at: record.created_at,
            updated_at: record.updated_at,
            extra: record.extra,
        }
    }
}

impl From<Principle> for PrincipleRecord {
    fn from(principle: Principle) -> Self {
        Self {
            id: principle.id,
            name: Some(principle.name.clone()),
            title: Some(principle.name),
            description: principle.description,
            evidenz: principle.evidence.clone(),
            evidence: principle.evidence,
            implikation: principle.implication,
            elements: principle.elements,
            created_at: principle.created_at,
            updated_at: principle.updated_at,
            extra: principle.extra,
        }
    }
}

/// A v2 category entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    #[serde(default, deserialize_with = "lenient::required_text")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::required_text")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub svg_content: Option<String>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An entry of the category collection: a bare name (legacy) or an entity (v2)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CategoryEntry {
    Named(String),
    Entity(Category),
}

impl CategoryEntry {
    /// Identity used for matching: the name itself, or the entity id
    pub fn key(&self) -> &str {
        match self {
            Self::Named(name) => name,
            Self::Entity(category) => &category.id,
        }
    }

    /// Human-readable label
    pub fn name(&self) -> &str {
        match self {
            Self::Named(name) => name,
            Self::Entity(category) => &category.name,
        }
    }

    /// Whether a guideline category reference points at this entry
    pub fn is_referenced_by(&self, reference: &str) -> bool {
        let name = self.name();
        reference == self.key() || (!name.is_empty() && reference == name)
    }

    pub fn as_entity(&self) -> Option<&Category> {
        match self {
            Self::Named(_) => None,
            Self::Entity(category) => Some(category),
        }
    }
}

/// Rewrite bare names in `entries` as entities.
///
/// A name matching the id or name of a `known` entity takes that entity's
/// id and name; any other name becomes `{ id: name, name }`. An upgraded
/// name whose id is already in `entries` is dropped.
pub fn upgrade_category_names(entries: &[CategoryEntry], known: &[Category]) -> Vec<CategoryEntry> {
    let mut keys: HashSet<String> = entries
        .iter()
        .filter_map(CategoryEntry::as_entity)
        .map(|c| c.id.clone())
        .collect();

    let mut upgraded = Vec::with_capacity(entries.len());
    for entry in entries {
        let CategoryEntry::Named(name) = entry else {
            upgraded.push(entry.clone());
            continue;
        };
        let (id, label) = known
            .iter()
            .find(|c| c.id == *name || c.name == *name)
            .map(|c| (c.id.clone(), c.name.clone()))
            .unwrap_or_else(|| (name.clone(), name.clone()));
        if keys.insert(id.clone()) {
            upgraded.push(CategoryEntry::Entity(Category {
                id,
                name: label,
                ..Default::default()
            }));
        }
    }
    upgraded
}

/// Give a single category collection one shape: all names, or all
/// entities once any entry is an entity
pub fn normalize_categories(entries: Vec<CategoryEntry>) -> Vec<CategoryEntry> {
    let known: Vec<Category> = entries
        .iter()
        .filter_map(CategoryEntry::as_entity)
        .cloned()
        .collect();
    if known.is_empty() {
        return entries;
    }
    upgrade_category_names(&entries, &known)
}

// ============================================================================
// Dataset
// ============================================================================

/// The canonical dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    #[serde(default)]
    pub guidelines: Vec<Guideline>,
    #[serde(default)]
    pub categories: Vec<CategoryEntry>,
    #[serde(default)]
    pub principles: Vec<Principle>,
    #[serde(default = "timestamp_now")]
    pub last_updated: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_date: Option<String>,
}

impl Default for Dataset {
    fn default() -> Self {
        Self::empty()
    }
}

impl Dataset {
    /// The well-known initial dataset returned when nothing is stored yet
    pub fn empty() -> Self {
        Self {
            guidelines: Vec::new(),
            categories: Vec::new(),
            principles: Vec::new(),
            last_updated: timestamp_now(),
            version: default_version(),
            export_date: None,
        }
    }

    /// Whether all three collections are empty
    pub fn is_empty(&self) -> bool {
        self.guidelines.is_empty() && self.categories.is_empty() && self.principles.is_empty()
    }

    /// Entity counts
    pub fn counts(&self) -> ImportStats {
        ImportStats {
            guidelines: self.guidelines.len(),
            principles: self.principles.len(),
            categories: self.categories.len(),
        }
    }

    /// Serialized size in bytes
    pub fn serialized_len(&self) -> Result<usize, serde_json::Error> {
        Ok(serde_json::to_vec(self)?.len())
    }

    /// Ids of guidelines that reference the category with the given key
    pub fn guidelines_referencing_category(&self, key: &str) -> Vec<String> {
        let Some(entry) = self.categories.iter().find(|c| c.key() == key) else {
            return Vec::new();
        };
        self.guidelines
            .iter()
            .filter(|g| g.categories.iter().any(|r| entry.is_referenced_by(r)))
            .map(|g| g.id.clone())
            .collect()
    }

    /// Apply a backend write to this stored dataset.
    ///
    /// Shared by every backend so `SaveMode` means the same thing everywhere.
    pub fn apply_write(&mut self, incoming: &Dataset, mode: SaveMode) {
        match mode {
            SaveMode::Full => {
                *self = incoming.clone();
            }
            SaveMode::Chunk { index, reset, .. } => {
                if reset && index <= 1 {
                    self.guidelines.clear();
                }
                for guideline in &incoming.guidelines {
                    match self.guidelines.iter_mut().find(|g| g.id == guideline.id) {
                        Some(existing) => *existing = guideline.clone(),
                        None => self.guidelines.push(guideline.clone()),
                    }
                }
            }
            SaveMode::Finalize => {
                self.categories = incoming.categories.clone();
                self.principles = incoming.principles.clone();
                self.version = incoming.version.clone();
                self.export_date = None;
            }
        }
        self.last_updated = timestamp_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn guideline(id: &str) -> Guideline {
        Guideline {
            id: id.to_string(),
            title: format!("Guideline {}", id),
            ..Default::default()
        }
    }

    #[test]
    fn test_principle_folds_legacy_aliases() {
        let principle: Principle = serde_json::from_value(json!({
            "id": "p1",
            "title": "Anchoring",
            "evidenz": "Tversky 1974",
            "description": "First numbers stick"
        }))
        .unwrap();

        assert_eq!(principle.name, "Anchoring");
        assert_eq!(principle.evidence.as_deref(), Some("Tversky 1974"));
        assert!(principle.extra.is_empty());
    }

    #[test]
    fn test_principle_prefers_canonical_spelling() {
        let principle: Principle = serde_json::from_value(json!({
            "id": "p1",
            "name": "Current",
            "title": "Legacy",
            "evidence": "",
            "evidenz": "kept"
        }))
        .unwrap();

        assert_eq!(principle.name, "Current");
        assert_eq!(principle.evidence.as_deref(), Some("kept"));
    }

    #[test]
    fn test_principle_writes_both_spellings() {
        let principle = Principle {
            id: "p1".to_string(),
            name: "Loss aversion".to_string(),
            evidence: Some("Kahneman".to_string()),
            implication: Some("Frame as loss".to_string()),
            ..Default::default()
        };

        let value = serde_json::to_value(&principle).unwrap();
        assert_eq!(value["name"], "Loss aversion");
        assert_eq!(value["title"], "Loss aversion");
        assert_eq!(value["evidenz"], "Kahneman");
        assert_eq!(value["evidence"], "Kahneman");
        assert_eq!(value["implikation"], "Frame as loss");

        let back: Principle = serde_json::from_value(value).unwrap();
        assert_eq!(back, principle);
    }

    #[test]
    fn test_guideline_lenient_fields() {
        let g: Guideline = serde_json::from_value(json!({
            "id": 42,
            "title": "Keep it short",
            "text": null,
            "categories": "ux",
            "principles": ["p1", 7, {"bad": true}],
            "imageMode": "svg"
        }))
        .unwrap();

        assert_eq!(g.id, "42");
        assert_eq!(g.text, "");
        assert_eq!(g.categories, vec!["ux"]);
        assert_eq!(g.principles, vec!["p1", "7"]);
        assert_eq!(g.extra.get("imageMode"), Some(&json!("svg")));
    }

    #[test]
    fn test_category_entry_both_shapes() {
        let entries: Vec<CategoryEntry> = serde_json::from_value(json!([
            "Navigation",
            {"id": "forms", "name": "Forms"}
        ]))
        .unwrap();

        assert_eq!(entries[0], CategoryEntry::Named("Navigation".to_string()));
        assert_eq!(entries[1].key(), "forms");
        assert_eq!(entries[1].name(), "Forms");
    }

    #[test]
    fn test_normalize_categories_upgrades_names() {
        let entries: Vec<CategoryEntry> = serde_json::from_value(json!([
            "Forms",
            {"id": "nav", "name": "Navigation", "icon": "compass"},
            "Navigation",
            "Forms"
        ]))
        .unwrap();

        let normalized = normalize_categories(entries);
        assert_eq!(normalized.len(), 2);
        assert!(normalized.iter().all(|c| c.as_entity().is_some()));
        assert_eq!(normalized[0].key(), "Forms");
        assert_eq!(normalized[0].name(), "Forms");
        assert_eq!(normalized[1].as_entity().unwrap().icon.as_deref(), Some("compass"));
    }

    #[test]
    fn test_normalize_categories_keeps_legacy_names() {
        let entries = vec![
            CategoryEntry::Named("Forms".to_string()),
            CategoryEntry::Named("Navigation".to_string()),
        ];
        assert_eq!(normalize_categories(entries.clone()), entries);
    }

    #[test]
    fn test_dataset_defaults_metadata() {
        let dataset: Dataset = serde_json::from_value(json!({"guidelines": []})).unwrap();
        assert_eq!(dataset.version, "2.0");
        assert!(!dataset.last_updated.is_empty());
        assert!(dataset.is_empty());
    }

    #[test]
    fn test_guidelines_referencing_category_by_id_or_name() {
        let mut dataset = Dataset::empty();
        dataset.categories.push(CategoryEntry::Entity(Category {
            id: "forms".to_string(),
            name: "Forms".to_string(),
            ..Default::default()
        }));
        let mut by_id = guideline("g1");
        by_id.categories = vec!["forms".to_string()];
        let mut by_name = guideline("g2");
        by_name.categories = vec!["Forms".to_string()];
        dataset.guidelines = vec![by_id, by_name, guideline("g3")];

        assert_eq!(dataset.guidelines_referencing_category("forms"), vec!["g1", "g2"]);
        assert!(dataset.guidelines_referencing_category("missing").is_empty());
    }

    #[test]
    fn test_apply_write_chunk_sequence() {
        let mut stored = Dataset::empty();
        stored.guidelines = vec![guideline("stale")];

        let mut first = Dataset::empty();
        first.guidelines = vec![guideline("a"), guideline("b")];
        stored.apply_write(
            &first,
            SaveMode::Chunk {
                index: 1,
                total: 2,
                reset: true,
            },
        );

        let mut second = Dataset::empty();
        second.guidelines = vec![guideline("b"), guideline("c")];
        stored.apply_write(
            &second,
            SaveMode::Chunk {
                index: 2,
                total: 2,
                reset: true,
            },
        );

        let ids: Vec<_> = stored.guidelines.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let mut last = Dataset::empty();
        last.principles.push(Principle {
            id: "p1".to_string(),
            ..Default::default()
        });
        stored.apply_write(&last, SaveMode::Finalize);
        assert_eq!(stored.guidelines.len(), 3);
        assert_eq!(stored.principles.len(), 1);
    }

    #[test]
    fn test_apply_write_upsert_chunk_keeps_stored() {
        let mut stored = Dataset::empty();
        stored.guidelines = vec![guideline("kept"), guideline("a")];

        let mut chunk = Dataset::empty();
        let mut updated = guideline("a");
        updated.text = "changed".to_string();
        chunk.guidelines = vec![updated, guideline("b")];
        stored.apply_write(
            &chunk,
            SaveMode::Chunk {
                index: 1,
                total: 1,
                reset: false,
            },
        );

        let ids: Vec<_> = stored.guidelines.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["kept", "a", "b"]);
        assert_eq!(stored.guidelines[1].text, "changed");
    }
}
