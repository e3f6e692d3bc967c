use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("Malformed amount '{0}': no digits after stripping")]
    Malformed(String),
    #[error("Amount '{0}' is out of range")]
    OutOfRange(String),
}

/// A payment amount reduced to whole currency units.
///
/// Fee amounts and e-transfer amounts are compared on their canonical form
/// only: currency symbol and thousands separators are stripped, and any
/// fractional component is truncated, never rounded. `$4,000.25` and
/// `$4,000.99` are both canonically `4000`. Sub-unit differences are ignored
/// when comparing a registered fee to an observed payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    pub fn from_units(units: i64) -> Self {
        Amount(units)
    }

    /// Parse a free-form currency string (`"$4,000.00"`, `"4000.99"`,
    /// `"4000"`) into its canonical whole-unit value.
    pub fn parse(raw: &str) -> Result<Self, AmountError> {
        let stripped: String = raw
            .trim()
            .chars()
            .filter(|c| *c != '$' && *c != ',')
            .collect();

        if !stripped.chars().any(|c| c.is_ascii_digit()) {
            return Err(AmountError::Malformed(raw.to_string()));
        }

        let value = Decimal::from_str(&stripped)
            .map_err(|_| AmountError::Malformed(raw.to_string()))?;

        value
            .trunc()
            .to_i64()
            .map(Amount)
            .ok_or_else(|| AmountError::OutOfRange(raw.to_string()))
    }

    /// Canonical string form; equality of amounts is equality of these.
    pub fn canonical(&self) -> String {
        self.0.to_string()
    }

    pub fn units(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Amount::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_symbol_and_separators() {
        assert_eq!(Amount::parse("$4,000.00").unwrap(), Amount::from_units(4000));
        assert_eq!(Amount::parse("4,000").unwrap(), Amount::from_units(4000));
        assert_eq!(Amount::parse("500").unwrap(), Amount::from_units(500));
    }

    #[test]
    fn truncates_instead_of_rounding() {
        assert_eq!(Amount::parse("4000.99").unwrap(), Amount::from_units(4000));
        assert_eq!(Amount::parse("$4,000.25").unwrap(), Amount::from_units(4000));
        assert_eq!(Amount::parse("127.54").unwrap(), Amount::from_units(127));
    }

    #[test]
    fn canonical_forms_are_equal() {
        assert_eq!(
            Amount::parse("$4,000.00").unwrap().canonical(),
            Amount::parse("4000.99").unwrap().canonical()
        );
        assert_eq!(Amount::parse("$4,000.00").unwrap().canonical(), "4000");
    }

    #[test]
    fn rejects_amount_without_digits() {
        assert_eq!(
            Amount::parse("abc"),
            Err(AmountError::Malformed("abc".to_string()))
        );
        assert_eq!(Amount::parse("$"), Err(AmountError::Malformed("$".to_string())));
        assert_eq!(Amount::parse(""), Err(AmountError::Malformed(String::new())));
    }

    #[test]
    fn rejects_digits_mixed_with_garbage() {
        assert!(Amount::parse("12ab34").is_err());
    }

    #[test]
    fn fraction_only_truncates_to_zero() {
        assert_eq!(Amount::parse(".99").unwrap(), Amount::from_units(0));
    }
}
