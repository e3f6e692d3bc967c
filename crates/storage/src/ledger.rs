use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use remita_core::{token_set_ratio, Amount, Receipt};

use crate::blob::{BlobError, BlobStore};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger object is not available yet")]
    Unavailable,
    #[error("Ledger storage error: {0}")]
    Storage(#[from] BlobError),
    #[error("Ledger table is corrupt: {0}")]
    Corrupt(String),
}

/// On-disk row shape. The ledger is one CSV object with these columns,
/// read and rewritten wholesale per operation.
#[derive(Debug, Serialize, Deserialize)]
struct LedgerRow {
    #[serde(rename = "Reference")]
    reference: String,
    #[serde(rename = "Sent_From")]
    sent_from: String,
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Amount")]
    amount: String,
    #[serde(rename = "Used")]
    used: bool,
}

const UNKNOWN: &str = "unknown";

impl LedgerRow {
    fn from_receipt(r: &Receipt) -> Self {
        LedgerRow {
            reference: r.reference.clone().unwrap_or_else(|| UNKNOWN.to_string()),
            sent_from: r.sender.clone(),
            date: r.observed_at.to_rfc3339(),
            amount: r
                .amount
                .map(|a| a.canonical())
                .unwrap_or_else(|| UNKNOWN.to_string()),
            used: r.consumed,
        }
    }

    fn into_receipt(self) -> Result<Receipt, LedgerError> {
        let observed_at: DateTime<Utc> = self
            .date
            .parse()
            .map_err(|e| LedgerError::Corrupt(format!("bad date '{}': {e}", self.date)))?;
        Ok(Receipt {
            reference: (self.reference != UNKNOWN).then_some(self.reference),
            sender: self.sent_from,
            amount: Amount::parse(&self.amount).ok(),
            observed_at,
            consumed: self.used,
        })
    }
}

/// The persisted table of observed payment receipts and their consumption
/// state. Sole owner of receipt records: callers never mutate rows directly,
/// they issue the operations below.
///
/// Every read-modify-write runs under one in-process mutex, so concurrent
/// requests against the same ledger serialise instead of clobbering each
/// other's whole-table writes.
pub struct ReceiptLedger {
    store: Arc<dyn BlobStore>,
    key: String,
    write_lock: Mutex<()>,
}

impl ReceiptLedger {
    pub fn new(store: Arc<dyn BlobStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Fetch the current table. [`LedgerError::Unavailable`] when the backing
    /// object does not exist yet; callers treat that as an empty ledger that
    /// needs seeding.
    pub async fn load(&self) -> Result<Vec<Receipt>, LedgerError> {
        let bytes = match self.store.get(&self.key).await {
            Ok(bytes) => bytes,
            Err(BlobError::NotFound(_)) => return Err(LedgerError::Unavailable),
            Err(e) => return Err(e.into()),
        };
        decode(&bytes)
    }

    /// Idempotent append: candidates whose reference is already present are
    /// skipped; candidates without a reference are appended as-is (an unknown
    /// reference never equals another unknown reference). The merged table is
    /// persisted in a single write. Returns the number of rows appended.
    pub async fn insert_new(&self, candidates: &[Receipt]) -> Result<usize, LedgerError> {
        let _guard = self.write_lock.lock().await;

        let mut table = match self.load().await {
            Ok(table) => table,
            Err(LedgerError::Unavailable) => {
                tracing::warn!(key = %self.key, "ledger object missing, seeding a new table");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let mut seen: HashSet<String> = table
            .iter()
            .filter_map(|r| r.reference.clone())
            .collect();

        let mut inserted = 0usize;
        for candidate in candidates {
            match &candidate.reference {
                Some(reference) if seen.contains(reference) => {
                    tracing::debug!(%reference, "reference already in ledger, skipping");
                }
                Some(reference) => {
                    seen.insert(reference.clone());
                    table.push(candidate.clone());
                    inserted += 1;
                }
                None => {
                    table.push(candidate.clone());
                    inserted += 1;
                }
            }
        }

        if inserted > 0 {
            self.persist(&table).await?;
            tracing::info!(inserted, total = table.len(), "ledger updated");
        }
        Ok(inserted)
    }

    /// Best fuzzy match for `name` among unconsumed rows, or `None` when no
    /// row scores at least `min_score`. Ties go to the earliest row in
    /// storage order.
    pub async fn find_candidate(
        &self,
        name: &str,
        min_score: u8,
    ) -> Result<Option<Receipt>, LedgerError> {
        let table = self.load().await?;

        let mut best: Option<(&Receipt, u8)> = None;
        for receipt in table.iter().filter(|r| r.is_matchable()) {
            let score = token_set_ratio(name, &receipt.sender);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((receipt, score));
            }
        }

        match best {
            Some((receipt, score)) if score >= min_score => {
                tracing::debug!(sender = %receipt.sender, score, "candidate selected");
                Ok(Some(receipt.clone()))
            }
            Some((receipt, score)) => {
                tracing::debug!(sender = %receipt.sender, score, min_score, "best candidate below threshold");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Count of rows still eligible for matching.
    pub async fn unused_count(&self) -> Result<usize, LedgerError> {
        Ok(self.load().await?.iter().filter(|r| r.is_matchable()).count())
    }

    /// One-way flip of a row's consumed flag. Returns false when the
    /// reference does not exist or the row was already consumed.
    pub async fn mark_consumed(&self, reference: &str) -> Result<bool, LedgerError> {
        let _guard = self.write_lock.lock().await;

        let mut table = match self.load().await {
            Ok(table) => table,
            Err(LedgerError::Unavailable) => return Ok(false),
            Err(e) => return Err(e),
        };

        let Some(row) = table
            .iter_mut()
            .find(|r| r.reference.as_deref() == Some(reference))
        else {
            return Ok(false);
        };
        if row.consumed {
            return Ok(false);
        }
        row.consumed = true;

        self.persist(&table).await?;
        tracing::info!(%reference, "receipt consumed");
        Ok(true)
    }

    async fn persist(&self, table: &[Receipt]) -> Result<(), LedgerError> {
        let bytes = encode(table)?;
        self.store.put(&self.key, &bytes).await?;
        Ok(())
    }
}

fn encode(table: &[Receipt]) -> Result<Vec<u8>, LedgerError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for receipt in table {
        writer
            .serialize(LedgerRow::from_receipt(receipt))
            .map_err(|e| LedgerError::Corrupt(e.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|e| LedgerError::Corrupt(e.to_string()))
}

fn decode(bytes: &[u8]) -> Result<Vec<Receipt>, LedgerError> {
    let mut reader = csv::Reader::from_reader(bytes);
    let mut table = Vec::new();
    for row in reader.deserialize::<LedgerRow>() {
        let row = row.map_err(|e| LedgerError::Corrupt(e.to_string()))?;
        table.push(row.into_receipt()?);
    }
    Ok(table)
}
