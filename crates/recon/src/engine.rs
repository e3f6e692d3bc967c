//! The reconciliation engine: matches one registrant's payment claim to an
//! observed e-transfer notification.
//!
//! Per attempt the flow is extract → match → (refresh → match) → done. The
//! ledger refresh from the mailbox runs at most once, which bounds the
//! worst-case latency of a request to a single mailbox scan.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use remita_core::{Amount, Receipt};
use remita_mailbox::{MailboxScanner, ScanError};
use remita_ocr::{reference_candidates, TextExtractor};
use remita_storage::{LedgerError, ReceiptLedger};

/// Tunable knobs for the matching step.
#[derive(Debug, Clone)]
pub struct MatchPolicy {
    /// Minimum token-set similarity (0–100) for a name match.
    pub min_score: u8,
    /// Mailbox lookback window for the refresh step.
    pub lookback_days: u32,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self { min_score: 95, lookback_days: 21 }
    }
}

/// One registrant's claim to be matched. Constructed per request, never
/// persisted.
#[derive(Debug, Clone)]
pub struct ReconciliationRequest {
    pub payer_name: String,
    /// Free-form amount string as supplied by the caller, e.g. `"$4,000.00"`.
    pub expected_amount: String,
    pub proof_image_urls: Vec<String>,
}

/// Synchronous result of one reconciliation attempt. Failures are data, not
/// errors: nothing thrown by a collaborator escapes to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationOutcome {
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReconciliationOutcome {
    pub fn success() -> Self {
        Self { matched: true, error: None }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self { matched: false, error: Some(reason.into()) }
    }
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

enum Attempt {
    Done(ReconciliationOutcome),
    Miss,
}

pub struct ReconciliationEngine {
    ledger: Arc<ReceiptLedger>,
    scanner: Arc<dyn MailboxScanner>,
    extractor: Arc<dyn TextExtractor>,
    policy: MatchPolicy,
}

impl ReconciliationEngine {
    pub fn new(
        ledger: Arc<ReceiptLedger>,
        scanner: Arc<dyn MailboxScanner>,
        extractor: Arc<dyn TextExtractor>,
        policy: MatchPolicy,
    ) -> Self {
        Self { ledger, scanner, extractor, policy }
    }

    /// Run one full reconciliation attempt.
    pub async fn reconcile(&self, request: &ReconciliationRequest) -> ReconciliationOutcome {
        let Some(proof_url) = request.proof_image_urls.first() else {
            return ReconciliationOutcome::failure("no proof provided");
        };

        let expected = match Amount::parse(&request.expected_amount) {
            Ok(amount) => amount,
            Err(e) => return ReconciliationOutcome::failure(e.to_string()),
        };

        // Candidate pool only: a screenshot may contain several
        // reference-shaped fragments, and the code alone identifies nothing.
        // Final identification is the name+amount match below.
        let candidates = match self.extractor.extract(proof_url).await {
            Ok(fragments) => reference_candidates(&fragments),
            Err(e) => {
                return ReconciliationOutcome::failure(format!(
                    "proof image could not be read: {e}"
                ))
            }
        };
        tracing::info!(?candidates, "reference candidates extracted from proof");

        let name = request.payer_name.to_lowercase();

        match self.match_once(&name, expected).await {
            Attempt::Done(outcome) => outcome,
            Attempt::Miss => {
                // One refresh from the mailbox, then exactly one more attempt.
                if let Err(e) = self.refresh(self.policy.lookback_days).await {
                    return refresh_failure(e);
                }
                match self.match_once(&name, expected).await {
                    Attempt::Done(outcome) => outcome,
                    Attempt::Miss => self.terminal_miss(&name).await,
                }
            }
        }
    }

    /// Pull notifications from the mailbox and merge them into the ledger.
    /// Also the entry point for the raw-scan path, where callers may choose a
    /// wider window than the validating default.
    pub async fn refresh(&self, lookback_days: u32) -> Result<usize, RefreshError> {
        let observed = self.scanner.scan(lookback_days).await?;
        let inserted = self.ledger.insert_new(&observed).await?;
        tracing::info!(observed = observed.len(), inserted, "ledger refreshed from mailbox");
        Ok(inserted)
    }

    async fn match_once(&self, name: &str, expected: Amount) -> Attempt {
        let candidate = match self.ledger.find_candidate(name, self.policy.min_score).await {
            Ok(candidate) => candidate,
            Err(LedgerError::Unavailable) => {
                tracing::warn!("ledger not seeded yet, treating as empty");
                None
            }
            Err(e) => return Attempt::Done(ReconciliationOutcome::failure(format!(
                "ledger error: {e}"
            ))),
        };

        let Some(row) = candidate else { return Attempt::Miss };
        Attempt::Done(self.settle(&row, expected).await)
    }

    /// A name match was found; verify the amount and consume the row.
    async fn settle(&self, row: &Receipt, expected: Amount) -> ReconciliationOutcome {
        if row.amount != Some(expected) {
            let found = row
                .amount
                .map(|a| a.canonical())
                .unwrap_or_else(|| "unknown".to_string());
            return ReconciliationOutcome::failure(format!(
                "amount mismatch: expected {}, found {}",
                expected.canonical(),
                found
            ));
        }

        // find_candidate only returns matchable rows, which carry a reference.
        let Some(reference) = row.reference.as_deref() else {
            return ReconciliationOutcome::failure("matched receipt has no reference");
        };
        match self.ledger.mark_consumed(reference).await {
            Ok(true) => {
                tracing::info!(%reference, "reconciliation succeeded");
                ReconciliationOutcome::success()
            }
            Ok(false) => ReconciliationOutcome::failure(format!(
                "receipt {reference} was already consumed"
            )),
            Err(e) => ReconciliationOutcome::failure(format!("ledger error: {e}")),
        }
    }

    async fn terminal_miss(&self, name: &str) -> ReconciliationOutcome {
        let unused = self.ledger.unused_count().await.unwrap_or(0);
        if unused == 0 {
            ReconciliationOutcome::failure("no unused records found")
        } else {
            ReconciliationOutcome::failure(format!("no matching name found for '{name}'"))
        }
    }
}

fn refresh_failure(e: RefreshError) -> ReconciliationOutcome {
    match e {
        RefreshError::Scan(e) => {
            let class = if e.is_retryable() { "retryable" } else { "terminal" };
            ReconciliationOutcome::failure(format!("mailbox scan failed ({class}): {e}"))
        }
        RefreshError::Ledger(e) => {
            ReconciliationOutcome::failure(format!("ledger error: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use remita_mailbox::StaticScanner;
    use remita_ocr::MockExtractor;
    use remita_storage::MemoryBlobStore;

    fn receipt(reference: &str, sender: &str, amount: &str) -> Receipt {
        Receipt::observed(
            Some(reference.to_string()),
            Some(sender.to_string()),
            Amount::parse(amount).ok(),
            Utc::now(),
        )
    }

    fn request(name: &str, amount: &str) -> ReconciliationRequest {
        ReconciliationRequest {
            payer_name: name.to_string(),
            expected_amount: amount.to_string(),
            proof_image_urls: vec!["https://uploads.example.com/proof.jpg".to_string()],
        }
    }

    struct Fixture {
        ledger: Arc<ReceiptLedger>,
        scanner: Arc<StaticScanner>,
        extractor: Arc<MockExtractor>,
        engine: ReconciliationEngine,
    }

    fn fixture(scanner: StaticScanner) -> Fixture {
        let ledger = Arc::new(ReceiptLedger::new(
            Arc::new(MemoryBlobStore::new()),
            "ledger.csv",
        ));
        let scanner = Arc::new(scanner);
        let extractor = Arc::new(MockExtractor::with_fragments(["ABC123XYZ001", "INTERAC"]));
        let engine = ReconciliationEngine::new(
            ledger.clone(),
            scanner.clone(),
            extractor.clone(),
            MatchPolicy::default(),
        );
        Fixture { ledger, scanner, extractor, engine }
    }

    #[tokio::test]
    async fn matching_name_and_amount_consumes_the_receipt() {
        let f = fixture(StaticScanner::with_receipts(vec![]));
        f.ledger
            .insert_new(&[receipt("ABC123XYZ001", "mohammad farzam", "4000")])
            .await
            .unwrap();

        let outcome = f.engine.reconcile(&request("MOHAMMAD FARZAM", "$4,000.00")).await;

        assert_eq!(outcome, ReconciliationOutcome::success());
        let table = f.ledger.load().await.unwrap();
        assert!(table[0].consumed);
        // Matched on the first pass, so the mailbox was never consulted.
        assert_eq!(f.scanner.calls(), 0);
    }

    #[tokio::test]
    async fn amount_mismatch_names_both_values_and_keeps_the_row() {
        let f = fixture(StaticScanner::with_receipts(vec![]));
        f.ledger
            .insert_new(&[receipt("ABC123XYZ001", "mohammad farzam", "4000")])
            .await
            .unwrap();

        let outcome = f.engine.reconcile(&request("MOHAMMAD FARZAM", "$3,999.00")).await;

        assert!(!outcome.matched);
        let error = outcome.error.unwrap();
        assert!(error.contains("amount mismatch"), "{error}");
        assert!(error.contains("3999") && error.contains("4000"), "{error}");
        assert!(!f.ledger.load().await.unwrap()[0].consumed);
        assert_eq!(f.scanner.calls(), 0);
    }

    #[tokio::test]
    async fn empty_ledger_refreshes_once_and_matches_on_retry() {
        let f = fixture(StaticScanner::with_receipts(vec![receipt(
            "ABC123XYZ001",
            "MOHAJERI NAV MOHAMMAD FARZAM",
            "4000",
        )]));

        let outcome = f.engine.reconcile(&request("MOHAMMAD FARZAM", "$4,000.00")).await;

        assert_eq!(outcome, ReconciliationOutcome::success());
        // Exactly one scan: the refresh loop never runs twice.
        assert_eq!(f.scanner.calls(), 1);
        assert!(f.ledger.load().await.unwrap()[0].consumed);
    }

    #[tokio::test]
    async fn missing_proof_fails_without_any_collaborator_call() {
        let f = fixture(StaticScanner::with_receipts(vec![]));
        let req = ReconciliationRequest {
            payer_name: "MOHAMMAD FARZAM".to_string(),
            expected_amount: "$4,000.00".to_string(),
            proof_image_urls: vec![],
        };

        let outcome = f.engine.reconcile(&req).await;

        assert_eq!(outcome, ReconciliationOutcome::failure("no proof provided"));
        assert_eq!(f.scanner.calls(), 0);
        assert_eq!(f.extractor.calls(), 0);
    }

    #[tokio::test]
    async fn second_miss_on_empty_ledger_reports_no_unused_records() {
        let f = fixture(StaticScanner::with_receipts(vec![]));

        let outcome = f.engine.reconcile(&request("MOHAMMAD FARZAM", "$4,000.00")).await;

        assert_eq!(
            outcome,
            ReconciliationOutcome::failure("no unused records found")
        );
        assert_eq!(f.scanner.calls(), 1);
    }

    #[tokio::test]
    async fn second_miss_with_unrelated_rows_reports_no_matching_name() {
        let f = fixture(StaticScanner::with_receipts(vec![]));
        f.ledger
            .insert_new(&[receipt("AAAABBBBCCCC", "wei chen", "4000")])
            .await
            .unwrap();

        let outcome = f.engine.reconcile(&request("MOHAMMAD FARZAM", "$4,000.00")).await;

        assert!(!outcome.matched);
        let error = outcome.error.unwrap();
        assert!(error.contains("no matching name found"), "{error}");
        assert!(error.contains("mohammad farzam"), "{error}");
        assert_eq!(f.scanner.calls(), 1);
    }

    #[tokio::test]
    async fn malformed_expected_amount_is_a_structured_failure() {
        let f = fixture(StaticScanner::with_receipts(vec![]));

        let outcome = f.engine.reconcile(&request("MOHAMMAD FARZAM", "abc")).await;

        assert!(!outcome.matched);
        assert!(outcome.error.unwrap().contains("Malformed amount"));
        assert_eq!(f.scanner.calls(), 0);
        assert_eq!(f.extractor.calls(), 0);
    }

    #[tokio::test]
    async fn scanner_outage_is_tagged_retryable() {
        let f = fixture(StaticScanner::failing());

        let outcome = f.engine.reconcile(&request("MOHAMMAD FARZAM", "$4,000.00")).await;

        assert!(!outcome.matched);
        let error = outcome.error.unwrap();
        assert!(error.contains("mailbox scan failed (retryable)"), "{error}");
    }

    #[tokio::test]
    async fn unreadable_proof_image_is_a_structured_failure() {
        let ledger = Arc::new(ReceiptLedger::new(
            Arc::new(MemoryBlobStore::new()),
            "ledger.csv",
        ));
        let scanner = Arc::new(StaticScanner::with_receipts(vec![]));
        let engine = ReconciliationEngine::new(
            ledger,
            scanner.clone(),
            Arc::new(MockExtractor::failing()),
            MatchPolicy::default(),
        );

        let outcome = engine.reconcile(&request("MOHAMMAD FARZAM", "$4,000.00")).await;

        assert!(!outcome.matched);
        assert!(outcome
            .error
            .unwrap()
            .contains("proof image could not be read"));
        assert_eq!(scanner.calls(), 0);
    }

    #[tokio::test]
    async fn refresh_inserts_only_new_references() {
        let f = fixture(StaticScanner::with_receipts(vec![
            receipt("ABC123XYZ001", "a b", "100"),
            receipt("AAAABBBBCCCC", "c d", "200"),
        ]));
        f.ledger
            .insert_new(&[receipt("ABC123XYZ001", "a b", "100")])
            .await
            .unwrap();

        assert_eq!(f.engine.refresh(44).await.unwrap(), 1);
        assert_eq!(f.ledger.load().await.unwrap().len(), 2);
    }
}
