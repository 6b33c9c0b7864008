//! C2: derive regex patterns that recover a pagination cursor's successor
//! from future response bodies.

use crate::error::{Error, Result};
use regex::{escape, Regex};

const MIN_SUBCURSOR_LEN: usize = 8;
const MAX_DELIMITER_WIDTH: usize = 20;

/// One trained pattern: a regex with a single named capture group `value`,
/// plus the occurrence/width it was derived from (kept for ordering and for
/// diagnostics, not re-derivable from the regex string alone).
#[derive(Debug, Clone)]
pub struct CursorPattern {
    pub regex: String,
    occurrence_rank: usize,
    delimiter_width: usize,
}

impl CursorPattern {
    /// Apply the pattern to a body; returns the captured `value` group, or
    /// `None` if the pattern does not match.
    pub fn apply(&self, body: &str) -> Option<String> {
        let re = Regex::new(&self.regex).ok()?;
        re.captures(body)
            .and_then(|c| c.name("value"))
            .map(|m| m.as_str().to_string())
    }
}

/// An ordered set of trained patterns for one cursor parameter. Callers
/// retry successive patterns until one yields a non-empty capture.
#[derive(Debug, Clone, Default)]
pub struct CursorPatternSet {
    pub patterns: Vec<CursorPattern>,
}

impl CursorPatternSet {
    pub fn next_cursor(&self, body: &str) -> Option<String> {
        self.patterns
            .iter()
            .find_map(|p| p.apply(body).filter(|v| !v.is_empty()))
    }

    /// Reconstruct a pattern set from the regex strings stored on a
    /// `PaginationParameter::Cursor`, for walking future response bodies
    /// without re-running training. Occurrence rank is preserved as the
    /// stored order; delimiter width is not needed past training time.
    pub fn from_regexes(patterns: &[String]) -> Self {
        Self {
            patterns: patterns
                .iter()
                .enumerate()
                .map(|(rank, regex)| CursorPattern {
                    regex: regex.clone(),
                    occurrence_rank: rank,
                    delimiter_width: 0,
                })
                .collect(),
        }
    }
}

/// Recursively collect leaf string/number tokens of length >= 8 from a JSON
/// value, used to derive sub-cursors from a structured cursor.
fn collect_leaf_subcursors(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) => {
            if s.len() >= MIN_SUBCURSOR_LEN {
                out.push(s.clone());
            }
        }
        serde_json::Value::Number(n) => {
            let s = n.to_string();
            if s.len() >= MIN_SUBCURSOR_LEN {
                out.push(s);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_leaf_subcursors(item, out);
            }
        }
        serde_json::Value::Object(map) => {
            for v in map.values() {
                collect_leaf_subcursors(v, out);
            }
        }
        _ => {}
    }
}

fn sub_cursors(cursor_value: &str) -> Vec<String> {
    if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(cursor_value) {
        if parsed.is_object() || parsed.is_array() {
            let mut out = Vec::new();
            collect_leaf_subcursors(&parsed, &mut out);
            if !out.is_empty() {
                return out;
            }
        }
    }
    vec![cursor_value.to_string()]
}

/// All byte-offset occurrences of `needle` in `haystack`, left-to-right.
fn occurrences(haystack: &str, needle: &str) -> Vec<usize> {
    if needle.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        let abs = start + pos;
        out.push(abs);
        start = abs + 1;
    }
    out
}

/// Train cursor-extraction patterns from one (cursor_value, response_body)
/// pair, per the design-level algorithm: derive sub-cursors, scan
/// right-to-left, try delimiter widths 1..=20, reject empty/ambiguous/
/// duplicate patterns, order by occurrence (rightmost first) then width.
pub fn extract_patterns(cursor_value: &str, response_body: &str) -> Result<Vec<CursorPattern>> {
    let sub_cursors = sub_cursors(cursor_value);
    let long_enough: Vec<&String> = sub_cursors
        .iter()
        .filter(|s| s.len() >= MIN_SUBCURSOR_LEN)
        .collect();
    if long_enough.is_empty() {
        return Err(Error::NoExtractableCursor(
            "no sub-cursor of length >= 8".into(),
        ));
    }

    let mut accepted: Vec<CursorPattern> = Vec::new();
    let mut seen_regex = std::collections::HashSet::new();
    // Byte offset of every char boundary, so a width of k means k
    // characters, not k bytes — a multi-byte char adjacent to the cursor
    // must not land a slice mid-codepoint.
    let char_boundaries: Vec<usize> = response_body.char_indices().map(|(i, _)| i).collect();
    let char_index_at = |byte_pos: usize| -> usize {
        if byte_pos == response_body.len() {
            return char_boundaries.len();
        }
        char_boundaries
            .binary_search(&byte_pos)
            .expect("pos/end are always char boundaries of a matched substring")
    };

    for sub in &long_enough {
        let mut hits = occurrences(response_body, sub);
        hits.reverse(); // rightmost occurrence first

        for (rank, &pos) in hits.iter().enumerate() {
            let end = pos + sub.len();
            let pos_char_idx = char_index_at(pos);
            let end_char_idx = char_index_at(end);
            let total_chars = char_boundaries.len();

            for k in 1..=MAX_DELIMITER_WIDTH {
                if pos_char_idx < k {
                    break; // no room for a prefix of this width; wider won't help either
                }
                let prefix_start = char_boundaries[pos_char_idx - k];
                let prefix = &response_body[prefix_start..pos];

                let suffix_end_char_idx = (end_char_idx + k).min(total_chars);
                let suffix_end = if suffix_end_char_idx == total_chars {
                    response_body.len()
                } else {
                    char_boundaries[suffix_end_char_idx]
                };
                let suffix = &response_body[end..suffix_end];

                if prefix.is_empty() || suffix.is_empty() {
                    continue;
                }

                let pattern = format!(
                    "{}(?P<value>.*?){}",
                    escape(prefix),
                    escape(suffix)
                );

                if seen_regex.contains(&pattern) {
                    continue;
                }

                let Ok(re) = Regex::new(&pattern) else {
                    continue;
                };
                let match_count = re.find_iter(response_body).count();
                if match_count != 1 {
                    continue;
                }
                // The captured value for a pattern trained on this exact
                // body must reproduce the cursor it was trained from.
                let Some(captured) = re
                    .captures(response_body)
                    .and_then(|c| c.name("value"))
                    .map(|m| m.as_str())
                else {
                    continue;
                };
                if captured != sub.as_str() {
                    continue;
                }

                seen_regex.insert(pattern.clone());
                accepted.push(CursorPattern {
                    regex: pattern,
                    occurrence_rank: rank,
                    delimiter_width: k,
                });
            }
        }
    }

    accepted.sort_by(|a, b| {
        a.occurrence_rank
            .cmp(&b.occurrence_rank)
            .then(a.delimiter_width.cmp(&b.delimiter_width))
    });

    Ok(accepted)
}
