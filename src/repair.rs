//! Best-effort repair of malformed JSON text
//!
//! Import files are often hand-edited or pasted out of word processors, so
//! before giving up on a document we try a fixed sequence of increasingly
//! aggressive textual rewrites, stopping at the first one that parses:
//!
//! 1. direct parse
//! 2. basic cleanup (line endings, tabs, smart quotes, trailing commas,
//!    whitespace, non-printable characters, missing commas between `}{`/`][`)
//! 3. bracket balancing (string-aware scan, closes what was left open)
//! 4. aggressive fix (wrap in braces, quote bare keys, drop stray commas)
//!
//! Stages are cumulative: each works on the output of the previous one.
//! Repair never fails; callers must check [`RepairOutcome::valid`] before
//! trusting [`RepairOutcome::fixed`]. Only the error of the direct parse is
//! kept, since that is the one that describes the file the user supplied.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;
use tracing::debug;

/// Result of a repair attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairOutcome {
    /// Repaired text, or the input itself when it already parsed
    pub fixed: String,
    pub valid: bool,
    /// One label per rewrite that changed the text
    pub corrections: Vec<String>,
    /// Parse error of the unmodified input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_error: Option<String>,
}

fn cached(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static repair pattern"))
}

fn trailing_comma() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r",\s*([}\]])")
}

fn whitespace_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"\s{2,}")
}

fn adjacent_objects() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"\}\s*\{")
}

fn adjacent_arrays() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"\]\s*\[")
}

fn bare_key() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"([{,]\s*)(\w+)\s*:")
}

fn repeated_comma() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r",(\s*,)+")
}

const SMART_QUOTES: [char; 8] = [
    '\u{201C}', '\u{201D}', '\u{201E}', '\u{201F}', // double
    '\u{2018}', '\u{2019}', '\u{201A}', '\u{201B}', // single
];

fn parses(text: &str) -> bool {
    serde_json::from_str::<Value>(text).is_ok()
}

/// Apply `rewrite` and record `label` if it changed the text
fn step(
    text: String,
    label: &str,
    corrections: &mut Vec<String>,
    rewrite: impl FnOnce(&str) -> String,
) -> String {
    let rewritten = rewrite(&text);
    if rewritten != text {
        corrections.push(label.to_string());
        rewritten
    } else {
        text
    }
}

/// Try to turn `raw` into parseable JSON
pub fn repair(raw: &str) -> RepairOutcome {
    let original_error = match serde_json::from_str::<Value>(raw) {
        Ok(_) => {
            return RepairOutcome {
                fixed: raw.to_string(),
                valid: true,
                corrections: Vec::new(),
                original_error: None,
            }
        }
        Err(e) => e.to_string(),
    };

    let mut corrections = Vec::new();
    let stages: [(&str, fn(String, &mut Vec<String>) -> String); 3] = [
        ("basic-cleanup", basic_cleanup),
        ("bracket-balance", balance_brackets),
        ("aggressive-fix", aggressive_fix),
    ];

    let mut text = raw.to_string();
    for (name, stage) in stages {
        text = stage(text, &mut corrections);
        if parses(&text) {
            debug!(stage = name, corrections = corrections.len(), "JSON repaired");
            return RepairOutcome {
                fixed: text,
                valid: true,
                corrections,
                original_error: Some(original_error),
            };
        }
    }

    debug!(error = %original_error, "JSON repair exhausted all stages");
    RepairOutcome {
        fixed: text,
        valid: false,
        corrections,
        original_error: Some(original_error),
    }
}

fn basic_cleanup(text: String, corrections: &mut Vec<String>) -> String {
    let text = step(text, "Normalized line endings", corrections, |t| {
        t.replace("\r\n", "\n").replace('\r', "\n")
    });
    let text = step(text, "Replaced tabs with spaces", corrections, |t| {
        t.replace('\t', " ")
    });
    let text = step(text, "Normalized smart quotes", corrections, |t| {
        t.chars()
            .map(|c| if SMART_QUOTES.contains(&c) { '"' } else { c })
            .collect()
    });
    let text = step(text, "Removed trailing commas", corrections, |t| {
        trailing_comma().replace_all(t, "$1").into_owned()
    });
    let text = step(text, "Collapsed whitespace", corrections, |t| {
        whitespace_run().replace_all(t, " ").into_owned()
    });
    let text = step(text, "Removed non-printable characters", corrections, |t| {
        t.chars()
            .filter(|c| *c == '\n' || (' '..='~').contains(c))
            .collect()
    });
    step(text, "Inserted missing commas", corrections, |t| {
        let t = adjacent_objects().replace_all(t, "},{");
        adjacent_arrays().replace_all(&t, "],[").into_owned()
    })
}

fn balance_brackets(text: String, corrections: &mut Vec<String>) -> String {
    let mut open: Vec<char> = Vec::new();
    let mut missing_openers: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut quote_count = 0usize;

    for c in text.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => {
                in_string = !in_string;
                quote_count += 1;
            }
            '{' | '[' if !in_string => open.push(c),
            '}' | ']' if !in_string => {
                let opener = if c == '}' { '{' } else { '[' };
                if open.last() == Some(&opener) {
                    open.pop();
                } else {
                    missing_openers.push(opener);
                }
            }
            _ => {}
        }
    }

    if open.is_empty() && missing_openers.is_empty() && quote_count % 2 == 0 {
        return text;
    }

    let mut fixed: String = missing_openers.iter().rev().collect();
    fixed.push_str(&text);

    if quote_count % 2 == 1 {
        fixed.push('"');
        corrections.push("Closed unterminated string".to_string());
    }
    if !missing_openers.is_empty() {
        corrections.push(format!(
            "Added {} missing opening bracket(s)",
            missing_openers.len()
        ));
    }
    if !open.is_empty() {
        corrections.push(format!("Added {} missing closing bracket(s)", open.len()));
        fixed.extend(open.iter().rev().map(|c| if *c == '{' { '}' } else { ']' }));
    }

    fixed
}

fn aggressive_fix(text: String, corrections: &mut Vec<String>) -> String {
    let text = step(text, "Trimmed surrounding whitespace", corrections, |t| {
        t.trim().to_string()
    });
    let text = step(text, "Wrapped content in braces", corrections, |t| {
        let mut wrapped = String::with_capacity(t.len() + 2);
        if !(t.starts_with('{') || t.starts_with('[')) {
            wrapped.push('{');
        }
        wrapped.push_str(t);
        if !(t.ends_with('}') || t.ends_with(']')) {
            wrapped.push('}');
        }
        wrapped
    });
    let text = step(text, "Quoted bare object keys", corrections, |t| {
        bare_key().replace_all(t, "${1}\"${2}\":").into_owned()
    });
    step(text, "Removed stray commas", corrections, |t| {
        let t = repeated_comma().replace_all(t, ",");
        trailing_comma().replace_all(&t, "$1").into_owned()
    })
}
