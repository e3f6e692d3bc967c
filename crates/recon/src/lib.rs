pub mod engine;
pub mod pr_card;

pub use engine::{
    MatchPolicy, ReconciliationEngine, ReconciliationOutcome, ReconciliationRequest,
};
pub use pr_card::{verify_pr_card, PrCardMismatch};
