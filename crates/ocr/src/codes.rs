//! Reference-code candidate collection.
//!
//! E-transfer reference codes are 12-character alphanumeric tokens. A
//! screenshot can contain several fragments of that shape, so every match is
//! collected as a candidate; final identification happens downstream through
//! the name-and-amount reconciliation, never through the code alone.

use std::sync::OnceLock;

use regex::Regex;

use crate::extractor::TextFragment;

fn re_reference_code() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"^[A-Za-z0-9]{12}$").expect("invalid regex"))
}

/// All fragments that are exactly 12 alphanumeric characters, in fragment
/// order, duplicates preserved.
pub fn reference_candidates(fragments: &[TextFragment]) -> Vec<String> {
    fragments
        .iter()
        .map(|f| f.text.trim())
        .filter(|t| re_reference_code().is_match(t))
        .map(str::to_string)
        .collect()
}
