pub mod blob;
pub mod ledger;

pub use blob::{BlobError, BlobStore, FsBlobStore, MemoryBlobStore};
pub use ledger::{LedgerError, ReceiptLedger};
