//! Payment-notification body parsing.
//!
//! Three independent extractions run against each message: the sender line,
//! the currency amount, and the reference token. A message missing any of
//! the three still yields a receipt with that field unknown — partial
//! notifications are tolerated, not dropped.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use remita_core::{Amount, Receipt};

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_sent_from, r"(?m)^Sent From:\s*(.*)$");
re!(re_amount, r"Amount:\s*(\$[\d,]+\.\d{2})");
re!(re_reference, r"Reference Number:\s*(\w+)");

/// Parse one notification body into a structured receipt.
pub fn parse_notification(body: &str, observed_at: DateTime<Utc>) -> Receipt {
    let sender = re_sent_from()
        .captures(body)
        .map(|c| c[1].trim().to_string());
    let amount = re_amount()
        .captures(body)
        .and_then(|c| Amount::parse(&c[1]).ok());
    let reference = re_reference().captures(body).map(|c| c[1].to_string());

    Receipt::observed(reference, sender, amount, observed_at)
}
