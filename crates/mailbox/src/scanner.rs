use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use thiserror::Error;

use remita_core::Receipt;

use crate::parse::parse_notification;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Mailbox authentication failed: {0}")]
    Auth(String),
    #[error("Mailbox configuration error: {0}")]
    Config(String),
    #[error("Mailbox transport error: {0}")]
    Transport(String),
    #[error("Mailbox scan timed out after {0:?}")]
    Timeout(Duration),
}

impl ScanError {
    /// Auth and config failures will not heal on their own; transport and
    /// timeout failures may.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScanError::Transport(_) | ScanError::Timeout(_))
    }
}

/// Poll an inbox for payment notifications received within the lookback
/// window and parse each into a structured receipt.
#[async_trait]
pub trait MailboxScanner: Send + Sync {
    async fn scan(&self, lookback_days: u32) -> Result<Vec<Receipt>, ScanError>;
}

#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Only messages from this address are considered notifications.
    pub sender_filter: String,
    /// Overall deadline for one scan, connection included.
    pub timeout: Duration,
}

/// IMAP-over-TLS scanner. The `imap` client is blocking, so each scan runs
/// on the blocking pool under an overall deadline.
pub struct ImapScanner {
    config: ImapConfig,
}

impl ImapScanner {
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MailboxScanner for ImapScanner {
    async fn scan(&self, lookback_days: u32) -> Result<Vec<Receipt>, ScanError> {
        let config = self.config.clone();
        let deadline = config.timeout;

        let task = tokio::task::spawn_blocking(move || scan_blocking(&config, lookback_days));

        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(ScanError::Transport(join_err.to_string())),
            Err(_) => Err(ScanError::Timeout(deadline)),
        }
    }
}

fn scan_blocking(config: &ImapConfig, lookback_days: u32) -> Result<Vec<Receipt>, ScanError> {
    let tls = native_tls::TlsConnector::builder()
        .build()
        .map_err(|e| ScanError::Config(e.to_string()))?;

    let client = imap::connect(
        (config.host.as_str(), config.port),
        config.host.as_str(),
        &tls,
    )
    .map_err(|e| ScanError::Transport(e.to_string()))?;

    let mut session = client
        .login(&config.user, &config.password)
        .map_err(|(e, _)| ScanError::Auth(e.to_string()))?;

    session
        .select("INBOX")
        .map_err(|e| ScanError::Transport(e.to_string()))?;

    let since = (Utc::now() - ChronoDuration::days(i64::from(lookback_days)))
        .format("%d-%b-%Y")
        .to_string();
    let query = format!("SINCE {} FROM \"{}\"", since, config.sender_filter);
    tracing::debug!(%query, "searching mailbox");

    let uids = session
        .uid_search(&query)
        .map_err(|e| ScanError::Transport(e.to_string()))?;

    let mut receipts = Vec::with_capacity(uids.len());
    for uid in uids {
        let fetches = session
            .uid_fetch(uid.to_string(), "RFC822")
            .map_err(|e| ScanError::Transport(e.to_string()))?;
        for fetch in fetches.iter() {
            let Some(raw) = fetch.body() else { continue };
            match message_text(raw) {
                Ok((body, observed_at)) => {
                    let receipt = parse_notification(&body, observed_at);
                    tracing::debug!(
                        reference = receipt.reference.as_deref().unwrap_or("unknown"),
                        sender = %receipt.sender,
                        "notification parsed"
                    );
                    receipts.push(receipt);
                }
                Err(e) => tracing::warn!(uid, "unreadable message skipped: {e}"),
            }
        }
    }

    session.logout().ok();
    tracing::info!(count = receipts.len(), lookback_days, "mailbox scan complete");
    Ok(receipts)
}

/// Plain-text body plus the message date (falling back to now when the Date
/// header is missing or malformed).
fn message_text(raw: &[u8]) -> Result<(String, chrono::DateTime<Utc>), String> {
    let mail = mailparse::parse_mail(raw).map_err(|e| e.to_string())?;

    let observed_at = mail
        .headers
        .iter()
        .find(|h| h.get_key_ref().eq_ignore_ascii_case("Date"))
        .and_then(|h| mailparse::dateparse(&h.get_value()).ok())
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now);

    let body = if mail.subparts.is_empty() {
        mail.get_body().map_err(|e| e.to_string())?
    } else {
        let plain = mail
            .subparts
            .iter()
            .find(|p| p.ctype.mimetype == "text/plain")
            .or_else(|| mail.subparts.first());
        match plain {
            Some(part) => part.get_body().map_err(|e| e.to_string())?,
            None => String::new(),
        }
    };

    Ok((body, observed_at))
}

/// Canned scanner for tests and local development — returns a preset batch
/// and counts how often it was asked.
#[derive(Default)]
pub struct StaticScanner {
    receipts: Vec<Receipt>,
    fail: bool,
    calls: AtomicUsize,
}

impl StaticScanner {
    pub fn with_receipts(receipts: Vec<Receipt>) -> Self {
        Self { receipts, fail: false, calls: AtomicUsize::new(0) }
    }

    /// A scanner whose every scan fails with a transport error.
    pub fn failing() -> Self {
        Self { receipts: Vec::new(), fail: true, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailboxScanner for StaticScanner {
    async fn scan(&self, _lookback_days: u32) -> Result<Vec<Receipt>, ScanError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ScanError::Transport("simulated outage".to_string()));
        }
        Ok(self.receipts.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_scanner_counts_calls() {
        let scanner = StaticScanner::with_receipts(vec![]);
        assert_eq!(scanner.calls(), 0);
        scanner.scan(21).await.unwrap();
        scanner.scan(44).await.unwrap();
        assert_eq!(scanner.calls(), 2);
    }

    #[tokio::test]
    async fn failing_scanner_is_retryable() {
        let scanner = StaticScanner::failing();
        let err = scanner.scan(21).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn auth_errors_are_terminal() {
        assert!(!ScanError::Auth("bad password".into()).is_retryable());
        assert!(!ScanError::Config("no tls".into()).is_retryable());
        assert!(ScanError::Timeout(Duration::from_secs(30)).is_retryable());
    }
}
