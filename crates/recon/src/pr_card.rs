//! Permanent-resident card verification against extracted text fragments.

use std::collections::HashSet;

use thiserror::Error;

use remita_ocr::TextFragment;

/// Boilerplate printed on every PR card; all of it must be recognised
/// verbatim alongside the holder's name.
const CARD_BOILERPLATE: [&str; 7] = [
    "Government",
    "of",
    "Canada",
    "PERMANENT",
    "RESIDENT",
    "CARD",
    "CARTE",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrCardMismatch {
    #[error("PR card text does not match; missing: {}", missing.join(", "))]
    Text { missing: Vec<String> },
    #[error("PR card number does not match")]
    Number,
}

/// Verify a claimed PR card against the fragments extracted from its photo.
///
/// Two checks, both required:
/// - every upper-cased token of the holder's name and every boilerplate word
///   must appear verbatim (case-sensitive) among the fragments;
/// - the claimed card number, reduced to its digits, must appear among the
///   digit-reduced fragments.
pub fn verify_pr_card(
    full_name: &str,
    card_number: &str,
    fragments: &[TextFragment],
) -> Result<(), PrCardMismatch> {
    let seen: HashSet<&str> = fragments.iter().map(|f| f.text.as_str()).collect();

    let missing: Vec<String> = full_name
        .split_whitespace()
        .map(str::to_uppercase)
        .chain(CARD_BOILERPLATE.iter().map(|w| w.to_string()))
        .filter(|token| !seen.contains(token.as_str()))
        .collect();

    if !missing.is_empty() {
        tracing::debug!(?missing, "PR card text verification failed");
        return Err(PrCardMismatch::Text { missing });
    }

    let claimed = digits(card_number);
    let number_found =
        !claimed.is_empty() && fragments.iter().any(|f| digits(&f.text) == claimed);
    if !number_found {
        tracing::debug!("PR card number verification failed");
        return Err(PrCardMismatch::Number);
    }

    Ok(())
}

fn digits(text: &str) -> String {
    text.chars().filter(|c| c.is_ascii_digit()).collect()
}
