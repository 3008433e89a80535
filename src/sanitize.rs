//! Strips accidental wrapping quotes from free-text fields
//!
//! Content pasted from spreadsheets or chat tools frequently arrives as
//! `"Keep forms short"` including the quotes. Only a matching pair that
//! wraps the whole string is removed; quotes inside the text are kept.

use serde_json::Value;

/// Opening/closing quote pairs recognised as wrapping
const QUOTE_PAIRS: [(char, char); 4] = [
    ('"', '"'),
    ('\'', '\''),
    ('\u{201C}', '\u{201D}'),
    ('\u{2018}', '\u{2019}'),
];

/// Free-text guideline fields
pub const GUIDELINE_TEXT_FIELDS: &[&str] = &["text", "justification"];

/// Free-text principle fields, both spellings of evidence included
pub const PRINCIPLE_TEXT_FIELDS: &[&str] = &["description", "evidenz", "evidence", "implikation"];

fn strip_once(s: &str) -> Option<&str> {
    let mut chars = s.chars();
    let first = chars.next()?;
    let last = chars.next_back()?;
    QUOTE_PAIRS
        .iter()
        .any(|&(open, close)| first == open && last == close)
        .then(|| &s[first.len_utf8()..s.len() - last.len_utf8()])
}

/// Remove wrapping quote pairs until none remain
pub fn sanitize_text(s: &str) -> String {
    let mut current = s;
    while let Some(inner) = strip_once(current) {
        current = inner;
    }
    current.to_string()
}

/// Sanitize the named string fields of a JSON object in place.
///
/// Non-object values and non-string fields are left untouched.
pub fn sanitize_entity_fields(entity: &mut Value, fields: &[&str]) {
    let Some(object) = entity.as_object_mut() else {
        return;
    };
    for field in fields {
        if let Some(Value::String(text)) = object.get_mut(*field) {
            let cleaned = sanitize_text(text);
            if cleaned.len() != text.len() {
                *text = cleaned;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strips_matching_pairs() {
        assert_eq!(sanitize_text("\"Keep it short\""), "Keep it short");
        assert_eq!(sanitize_text("'single'"), "single");
        assert_eq!(sanitize_text("\u{201C}smart\u{201D}"), "smart");
        assert_eq!(sanitize_text("\u{2018}smart\u{2019}"), "smart");
    }

    #[test]
    fn test_leaves_unmatched_and_inner_quotes() {
        assert_eq!(sanitize_text("\"mixed'"), "\"mixed'");
        assert_eq!(sanitize_text("\u{201D}backwards\u{201C}"), "\u{201D}backwards\u{201C}");
        assert_eq!(sanitize_text("say \"hi\" now"), "say \"hi\" now");
        assert_eq!(sanitize_text("\""), "\"");
        assert_eq!(sanitize_text(""), "");
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            "\"\"double wrapped\"\"",
            "'\"nested\"'",
            "\"\"",
            "plain",
            "\u{201C}'x'\u{201D}",
            "\"unbalanced",
        ];
        for s in samples {
            let once = sanitize_text(s);
            assert_eq!(sanitize_text(&once), once, "not idempotent for {:?}", s);
        }
        assert_eq!(sanitize_text("\"\"double wrapped\"\""), "double wrapped");
        assert_eq!(sanitize_text("\"\""), "");
    }

    #[test]
    fn test_entity_fields_only_touch_strings() {
        let mut entity = json!({
            "text": "\"Use clear labels\"",
            "justification": 42,
            "title": "\"untouched\""
        });
        sanitize_entity_fields(&mut entity, GUIDELINE_TEXT_FIELDS);

        assert_eq!(entity["text"], "Use clear labels");
        assert_eq!(entity["justification"], 42);
        assert_eq!(entity["title"], "\"untouched\"");

        let mut not_object = json!("\"x\"");
        sanitize_entity_fields(&mut not_object, GUIDELINE_TEXT_FIELDS);
        assert_eq!(not_object, json!("\"x\""));
    }
}
