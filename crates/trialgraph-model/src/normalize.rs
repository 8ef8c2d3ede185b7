//! Label normalization shared by the alias index, promotion and validation.
//!
//! Two forms exist:
//! - **full**: lowercase, every run of non-alphanumerics collapsed to one space.
//! - **core**: the full form with filler words removed, so `"Screening Period"`
//!   and `"screening"` meet on the same key.

use std::collections::BTreeSet;

/// Words that carry no identity in phase/visit names.
pub const FILLER_WORDS: &[&str] = &[
    "period", "phase", "epoch", "visit", "the", "of", "part", "arm", "study",
];

/// Lowercase, collapse non-alphanumerics to single spaces, trim.
pub fn normalize_label(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_space = false;
    for c in s.trim().chars() {
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(c.to_lowercase());
        } else {
            pending_space = true;
        }
    }
    out
}

/// [`normalize_label`] with filler words dropped.
///
/// Falls back to the full form when every word is filler (e.g. `"Period"`).
pub fn core_label(s: &str) -> String {
    let full = normalize_label(s);
    let core: Vec<&str> = full
        .split(' ')
        .filter(|w| !w.is_empty() && !FILLER_WORDS.contains(w))
        .collect();
    if core.is_empty() {
        full
    } else {
        core.join(" ")
    }
}

/// Identifier-safe slug: `"First Dose (Day 1)"` → `first_dose_day_1`.
pub fn slugify(s: &str) -> String {
    let slug = normalize_label(s).replace(' ', "_");
    if slug.is_empty() {
        "x".to_string()
    } else {
        slug
    }
}

/// Day number rendered for use inside identifiers (`-7` → `m7`).
pub fn day_token(day: i32) -> String {
    if day < 0 {
        format!("m{}", day.unsigned_abs())
    } else {
        day.to_string()
    }
}

fn tokens(s: &str) -> BTreeSet<String> {
    normalize_label(s)
        .split(' ')
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Jaccard similarity over normalized word tokens, in `[0, 1]`.
pub fn token_similarity(a: &str, b: &str) -> f64 {
    let ta = tokens(a);
    let tb = tokens(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let inter = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    inter / union
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_punctuation_and_case() {
        assert_eq!(normalize_label("  Follow-Up  (Safety) "), "follow up safety");
        assert_eq!(normalize_label("FIRST_DOSE"), "first dose");
        assert_eq!(normalize_label("---"), "");
    }

    #[test]
    fn core_drops_filler_words() {
        assert_eq!(core_label("Screening Period"), "screening");
        assert_eq!(core_label("The Treatment Phase"), "treatment");
        assert_eq!(core_label("Period"), "period");
    }

    #[test]
    fn slug_and_day_tokens() {
        assert_eq!(slugify("First Dose (Day 1)"), "first_dose_day_1");
        assert_eq!(slugify("!!"), "x");
        assert_eq!(day_token(-7), "m7");
        assert_eq!(day_token(15), "15");
    }

    #[test]
    fn similarity_is_jaccard() {
        assert!((token_similarity("first dose", "FIRST_DOSE_DAY1") - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(token_similarity("a", ""), 0.0);
        assert_eq!(token_similarity("Week 4", "week 4"), 1.0);
    }
}
