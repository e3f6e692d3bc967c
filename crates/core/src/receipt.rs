use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::amount::Amount;

/// Placeholder recorded when a notification is missing a field.
pub const UNKNOWN_FIELD: &str = "unknown";

/// One observed payment notification.
///
/// Created when the mailbox scanner sees a new notification, persisted by the
/// receipt ledger, and mutated exactly once: `consumed` flips false→true when
/// a registration is reconciled against it. Never deleted by this system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    /// Payment-network reference token. Case-sensitive, unique within the
    /// ledger. `None` when the source message had no recognisable reference;
    /// two such receipts are never considered equal.
    pub reference: Option<String>,
    /// Sender display name as rendered in the notification, lower-cased.
    pub sender: String,
    /// `None` when the notification's amount was missing or unparseable.
    pub amount: Option<Amount>,
    pub observed_at: DateTime<Utc>,
    pub consumed: bool,
}

impl Receipt {
    /// Build a receipt from raw notification fields, applying the ingestion
    /// normalisation: sender lower-cased, missing sender recorded as
    /// "unknown".
    pub fn observed(
        reference: Option<String>,
        sender: Option<String>,
        amount: Option<Amount>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Receipt {
            reference,
            sender: sender
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| UNKNOWN_FIELD.to_string()),
            amount,
            observed_at,
            consumed: false,
        }
    }

    /// A receipt can only be matched when it carries a reference to consume.
    pub fn is_matchable(&self) -> bool {
        self.reference.is_some() && !self.consumed
    }
}
