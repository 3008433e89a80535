//! Merge engine: combines the stored dataset with an incoming one
//!
//! Entities are matched by identity (`id`, or the bare name for legacy
//! category strings). What happens on a match depends on the strategy:
//!
//! | Strategy   | Matched entity                   | Unmatched stored entity |
//! |------------|----------------------------------|-------------------------|
//! | `merge`    | field-by-field overlay, stamped  | kept unchanged          |
//! | `replace`  | incoming entity                  | dropped                 |
//! | `preserve` | stored entity untouched          | kept unchanged          |
//!
//! Overlay rule: a non-empty incoming field wins, an empty or missing one
//! falls back to the stored value. List fields are replaced wholesale when
//! the incoming list is non-empty, never unioned.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::StorageError;
use crate::model::{
    timestamp_now, upgrade_category_names, Category, CategoryEntry, Dataset, Guideline, Principle,
};

/// How incoming entities combine with stored ones
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    #[default]
    Merge,
    Replace,
    Preserve,
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Merge => "merge",
            Self::Replace => "replace",
            Self::Preserve => "preserve",
        })
    }
}

impl FromStr for MergeStrategy {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "merge" => Ok(Self::Merge),
            "replace" => Ok(Self::Replace),
            "preserve" => Ok(Self::Preserve),
            other => Err(StorageError::Config(format!("unknown merge strategy '{}'", other))),
        }
    }
}

/// Generate an id for an entity that arrived without one:
/// `<kind>-<unix millis>-<random base36>`
pub fn generate_id(kind: &str) -> String {
    let entropy = uuid::Uuid::new_v4().as_u128() as u64;
    let mut suffix = to_base36(entropy);
    suffix.truncate(9);
    format!("{}-{}-{}", kind, Utc::now().timestamp_millis(), suffix)
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

// ============================================================================
// Per-entity overlay
// ============================================================================

/// An entity that can be matched and overlaid during merge
pub trait Mergeable: Clone {
    /// Prefix for generated ids
    const KIND: &'static str;

    fn identity(&self) -> &str;

    fn assign_id(&mut self, id: String);

    /// Overlay the non-empty fields of `incoming` onto `self`
    fn overlay(&mut self, incoming: &Self);

    /// Stamp the modification time
    fn touch(&mut self, now: &str);
}

fn overlay_text(target: &mut String, incoming: &str) {
    if !incoming.trim().is_empty() {
        *target = incoming.to_string();
    }
}

fn overlay_opt(target: &mut Option<String>, incoming: &Option<String>) {
    if let Some(value) = incoming {
        if !value.trim().is_empty() {
            *target = Some(value.clone());
        }
    }
}

fn overlay_list(target: &mut Vec<String>, incoming: &[String]) {
    if !incoming.is_empty() {
        *target = incoming.to_vec();
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn overlay_extra(target: &mut Map<String, Value>, incoming: &Map<String, Value>) {
    for (key, value) in incoming {
        if !is_empty_value(value) {
            target.insert(key.clone(), value.clone());
        }
    }
}

impl Mergeable for Guideline {
    const KIND: &'static str = "guideline";

    fn identity(&self) -> &str {
        &self.id
    }

    fn assign_id(&mut self, id: String) {
        self.id = id;
    }

    fn overlay(&mut self, incoming: &Self) {
        overlay_text(&mut self.title, &incoming.title);
        overlay_text(&mut self.text, &incoming.text);
        overlay_opt(&mut self.justification, &incoming.justification);
        overlay_list(&mut self.categories, &incoming.categories);
        overlay_list(&mut self.principles, &incoming.principles);
        overlay_opt(&mut self.image_url, &incoming.image_url);
        overlay_opt(&mut self.svg_content, &incoming.svg_content);
        overlay_opt(&mut self.created_at, &incoming.created_at);
        overlay_extra(&mut self.extra, &incoming.extra);
    }

    fn touch(&mut self, now: &str) {
        self.updated_at = Some(now.to_string());
    }
}

impl Mergeable for Principle {
    const KIND: &'static str = "principle";

    fn identity(&self) -> &str {
        &self.id
    }

    fn assign_id(&mut self, id: String) {
        self.id = id;
    }

    fn overlay(&mut self, incoming: &Self) {
        overlay_text(&mut self.name, &incoming.name);
        overlay_text(&mut self.description, &incoming.description);
        overlay_opt(&mut self.evidence, &incoming.evidence);
        overlay_opt(&mut self.implication, &incoming.implication);
        overlay_list(&mut self.elements, &incoming.elements);
        overlay_opt(&mut self.created_at, &incoming.created_at);
        overlay_extra(&mut self.extra, &incoming.extra);
    }

    fn touch(&mut self, now: &str) {
        self.updated_at = Some(now.to_string());
    }
}

fn overlay_category(target: &mut Category, incoming: &Category) {
    overlay_text(&mut target.name, &incoming.name);
    overlay_opt(&mut target.description, &incoming.description);
    overlay_opt(&mut target.icon, &incoming.icon);
    overlay_opt(&mut target.svg_content, &incoming.svg_content);
    overlay_extra(&mut target.extra, &incoming.extra);
}

impl Mergeable for CategoryEntry {
    const KIND: &'static str = "category";

    fn identity(&self) -> &str {
        self.key()
    }

    fn assign_id(&mut self, id: String) {
        match self {
            Self::Named(name) => *name = id,
            Self::Entity(category) => category.id = id,
        }
    }

    fn overlay(&mut self, incoming: &Self) {
        match (&mut *self, incoming) {
            (Self::Entity(current), Self::Entity(next)) => overlay_category(current, next),
            (Self::Named(_), Self::Entity(next)) => *self = Self::Entity(next.clone()),
            // A bare name adds nothing to what is already stored
            (_, Self::Named(_)) => {}
        }
    }

    fn touch(&mut self, now: &str) {
        if let Self::Entity(category) = self {
            category.updated_at = Some(now.to_string());
        }
    }
}

// ============================================================================
// Collection and dataset merge
// ============================================================================

/// Merge one collection under `strategy`, preserving stored order and
/// appending new entities in incoming order
pub fn merge_collection<T: Mergeable>(
    current: &[T],
    incoming: &[T],
    strategy: MergeStrategy,
    now: &str,
) -> Vec<T> {
    let mut merged: Vec<T> = match strategy {
        MergeStrategy::Replace => Vec::with_capacity(incoming.len()),
        _ => current.to_vec(),
    };
    let mut positions: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .map(|(i, e)| (e.identity().to_string(), i))
        .collect();

    for entity in incoming {
        let mut entity = entity.clone();
        if entity.identity().trim().is_empty() {
            entity.assign_id(generate_id(T::KIND));
        }

        match positions.get(entity.identity()) {
            Some(&pos) => match strategy {
                MergeStrategy::Merge => {
                    merged[pos].overlay(&entity);
                    merged[pos].touch(now);
                }
                MergeStrategy::Replace => merged[pos] = entity,
                MergeStrategy::Preserve => {}
            },
            None => {
                positions.insert(entity.identity().to_string(), merged.len());
                merged.push(entity);
            }
        }
    }

    merged
}

/// Bring both category collections to the same shape before matching.
///
/// If either side holds an entity, names on both sides are upgraded and
/// resolved against the entities of both sides, so `"Forms"` matches an
/// incoming `{ id: "forms", name: "Forms" }`.
fn unify_category_shapes(
    current: &[CategoryEntry],
    incoming: &[CategoryEntry],
) -> (Vec<CategoryEntry>, Vec<CategoryEntry>) {
    let known: Vec<Category> = current
        .iter()
        .chain(incoming)
        .filter_map(CategoryEntry::as_entity)
        .cloned()
        .collect();
    if known.is_empty() {
        return (current.to_vec(), incoming.to_vec());
    }
    (
        upgrade_category_names(current, &known),
        upgrade_category_names(incoming, &known),
    )
}

/// Merge `incoming` into `current`
pub fn merge_dataset(current: &Dataset, incoming: &Dataset, strategy: MergeStrategy) -> Dataset {
    let now = timestamp_now();
    let version = if incoming.version.trim().is_empty() {
        current.version.clone()
    } else {
        incoming.version.clone()
    };

    let (current_categories, incoming_categories) =
        unify_category_shapes(&current.categories, &incoming.categories);

    Dataset {
        guidelines: merge_collection(&current.guidelines, &incoming.guidelines, strategy, &now),
        categories: merge_collection(&current_categories, &incoming_categories, strategy, &now),
        principles: merge_collection(&current.principles, &incoming.principles, strategy, &now),
        last_updated: now,
        version,
        export_date: None,
    }
}

/// Merge principles only, leaving the rest of `current` as it is
pub fn merge_principles(current: &Dataset, incoming: &[Principle]) -> Dataset {
    let now = timestamp_now();
    let mut merged = current.clone();
    merged.principles = merge_collection(&current.principles, incoming, MergeStrategy::Merge, &now);
    merged.last_updated = now;
    merged.export_date = None;
    merged
}
