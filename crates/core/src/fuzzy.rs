//! Token-set name similarity.
//!
//! Sender names in payment notifications rarely match the registrant's typed
//! name exactly: tokens arrive reordered, duplicated, or with extra family
//! names. Scoring treats both strings as whitespace-token sets, so
//! "MOHAMMAD FARZAM" scores 100 against "mohajeri nav mohammad farzam" (one
//! is a token subset of the other) while disjoint names score near zero.

use std::collections::BTreeSet;

/// Similarity of two strings as token sets, on a 0–100 scale.
///
/// Insensitive to case, token order, and token repetition.
pub fn token_set_ratio(a: &str, b: &str) -> u8 {
    let ta = tokens(a);
    let tb = tokens(b);

    let inter: Vec<&str> = ta.intersection(&tb).map(String::as_str).collect();
    let only_a: Vec<&str> = ta.difference(&tb).map(String::as_str).collect();
    let only_b: Vec<&str> = tb.difference(&ta).map(String::as_str).collect();

    let base = inter.join(" ");
    let combined_a = join_parts(&base, &only_a);
    let combined_b = join_parts(&base, &only_b);

    ratio(&base, &combined_a)
        .max(ratio(&base, &combined_b))
        .max(ratio(&combined_a, &combined_b))
}

fn tokens(s: &str) -> BTreeSet<String> {
    s.split_whitespace().map(str::to_lowercase).collect()
}

fn join_parts(base: &str, rest: &[&str]) -> String {
    if rest.is_empty() {
        return base.to_string();
    }
    if base.is_empty() {
        return rest.join(" ");
    }
    format!("{} {}", base, rest.join(" "))
}

/// Plain edit-distance ratio of two strings, 0–100.
fn ratio(a: &str, b: &str) -> u8 {
    let total = a.len() + b.len();
    if total == 0 {
        return 100;
    }
    let dist = levenshtein_distance(a, b);
    (((total - dist.min(total)) * 100 + total / 2) / total) as u8
}

/// Levenshtein edit distance using the two-row O(min(m,n)) space algorithm.
pub(crate) fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let a = s1.as_bytes();
    let b = s2.as_bytes();
    let (m, n) = (a.len(), b.len());

    if m == 0 {
        return n;
    }
    if n == 0 {
        return m;
    }

    // Keep the shorter string in the inner loop to minimise allocation.
    let (a, b, m, n) = if m <= n { (a, b, m, n) } else { (b, a, n, m) };

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];

    for i in 1..=m {
        curr[0] = i;
        for j in 1..=n {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}
