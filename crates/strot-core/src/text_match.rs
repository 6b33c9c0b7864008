//! C1: Unicode-normalized fuzzy containment of text fragments in a response
//! body.

use unicode_normalization::UnicodeNormalization;
use unicode_segmentation::UnicodeSegmentation;

/// Decision threshold used by callers: a response is "the right one" iff
/// `match_ratio(...) >= DECISION_THRESHOLD`.
pub const DECISION_THRESHOLD: f64 = 0.5;

const TOKEN_CREDIT_THRESHOLD: f64 = 0.8;

/// Normalize via NFKC, case-fold, and collapse whitespace runs to a single
/// space. Punctuation/symbols are left in place; callers that want them
/// stripped should do so before calling this (none of C1's own contract
/// requires it).
pub fn normalize(s: &str) -> String {
    let nfkc: String = s.nfkc().collect();
    let folded = nfkc.to_lowercase();
    let mut out = String::with_capacity(folded.len());
    let mut last_was_space = false;
    for ch in folded.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    out.trim().to_string()
}

fn tokenize(s: &str) -> Vec<&str> {
    s.unicode_words().collect()
}

/// Levenshtein edit distance between two token strings.
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (n, m) = (a.len(), b.len());
    if n == 0 {
        return m;
    }
    if m == 0 {
        return n;
    }
    let mut prev: Vec<usize> = (0..=m).collect();
    let mut curr = vec![0usize; m + 1];
    for i in 1..=n {
        curr[0] = i;
        for j in 1..=m {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[m]
}

/// Similarity in [0, 1] between two tokens, based on normalized edit
/// distance.
fn token_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (edit_distance(a, b) as f64 / max_len as f64)
}

/// Credit for one section against a normalized, tokenized haystack.
/// Returns 0.0 for a section that normalizes to the empty string; callers
/// must skip such sections from the mean rather than penalize them.
fn section_credit(section: &str, haystack_norm: &str, haystack_tokens: &[&str]) -> f64 {
    let section_norm = normalize(section);
    if section_norm.is_empty() {
        return 0.0;
    }
    if haystack_norm.contains(&section_norm) {
        return 1.0;
    }
    let section_tokens = tokenize(&section_norm);
    if section_tokens.is_empty() {
        return 0.0;
    }
    let mut total = 0.0;
    for tok in &section_tokens {
        let best = haystack_tokens
            .iter()
            .map(|h| token_similarity(tok, h))
            .fold(0.0_f64, f64::max);
        total += best;
    }
    let mean = total / section_tokens.len() as f64;
    if mean > TOKEN_CREDIT_THRESHOLD {
        mean
    } else {
        0.0
    }
}

/// `match_ratio(sections, haystack) -> [0, 1]`: the mean per-section credit.
/// An empty section list yields 1.0 (vacuously fully matched).
pub fn match_ratio<T: AsRef<str>>(sections: &[T], haystack: &str) -> f64 {
    if sections.is_empty() {
        return 1.0;
    }
    let (ratio, _) = match_ratio_sections(sections, haystack);
    ratio
}

/// As [`match_ratio`], but also returns the per-section credit breakdown —
/// used by the Analyzer Loop's correlation step to log why a response
/// matched (or didn't), and to decide among several candidate responses.
pub fn match_ratio_sections<T: AsRef<str>>(sections: &[T], haystack: &str) -> (f64, Vec<f64>) {
    if sections.is_empty() {
        return (1.0, Vec::new());
    }
    let haystack_norm = normalize(haystack);
    let haystack_tokens = tokenize(&haystack_norm);
    let mut credits = Vec::with_capacity(sections.len());
    let mut skipped = 0usize;
    for section in sections {
        let s = section.as_ref();
        if normalize(s).is_empty() {
            skipped += 1;
            credits.push(0.0);
            continue;
        }
        credits.push(section_credit(s, &haystack_norm, &haystack_tokens));
    }
    let counted = sections.len() - skipped;
    let ratio = if counted == 0 {
        1.0
    } else {
        credits.iter().sum::<f64>() / counted as f64
    };
    (ratio, credits)
}
