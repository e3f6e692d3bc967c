//! Environment-sourced configuration, gathered once at startup into an
//! explicit struct and handed to constructors. Nothing else in the call
//! graph reads the environment.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),
    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct ImapSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Only messages from this address count as payment notifications.
    pub sender_filter: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct OcrSettings {
    pub gateway_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub user: String,
    pub password: String,
    /// From address for outbound notifications.
    pub from_address: String,
    /// Where failed-submission alerts go.
    pub operator_address: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    /// Directory backing the ledger blob store.
    pub ledger_dir: PathBuf,
    /// Object key of the receipt table inside the store.
    pub ledger_key: String,
    pub imap: ImapSettings,
    pub ocr: OcrSettings,
    pub smtp: SmtpSettings,
    /// Minimum fuzzy-match score (0–100).
    pub match_threshold: u8,
    /// Mailbox lookback window for the validating path, in days.
    pub lookback_days: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key→value lookup; `from_env` feeds it the process
    /// environment, tests feed it a map.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |var: &'static str| lookup(var).ok_or(ConfigError::Missing(var));
        let or_default = |var: &'static str, default: &str| {
            lookup(var).unwrap_or_else(|| default.to_string())
        };

        let imap_timeout_secs = parse(&lookup, "IMAP_TIMEOUT_SECS", 60u64)?;

        Ok(Config {
            bind_addr: or_default("BIND_ADDR", "0.0.0.0:8080"),
            ledger_dir: PathBuf::from(or_default("LEDGER_BLOB_DIR", "data")),
            ledger_key: or_default("LEDGER_OBJECT_KEY", "receipts.csv"),
            imap: ImapSettings {
                host: or_default("IMAP_HOST", "imap.gmail.com"),
                port: parse(&lookup, "IMAP_PORT", 993u16)?,
                user: required("IMAP_USER")?,
                password: required("IMAP_PASSWORD")?,
                sender_filter: or_default("NOTIFICATION_SENDER", "notify@payments.interac.ca"),
                timeout: Duration::from_secs(imap_timeout_secs),
            },
            ocr: OcrSettings {
                gateway_url: or_default("OCR_GATEWAY_URL", "https://api.api-ninjas.com/v1/imagetotext"),
                api_key: required("OCR_API_KEY")?,
            },
            smtp: SmtpSettings {
                host: or_default("SMTP_HOST", "smtp.gmail.com"),
                user: required("SMTP_USER")?,
                password: required("SMTP_PASSWORD")?,
                from_address: lookup("CONFIRMATION_FROM")
                    .or_else(|| lookup("SMTP_USER"))
                    .ok_or(ConfigError::Missing("CONFIRMATION_FROM"))?,
                operator_address: required("OPERATOR_EMAIL")?,
            },
            match_threshold: parse(&lookup, "MATCH_THRESHOLD", 95u8)?,
            lookback_days: parse(&lookup, "MAILBOX_LOOKBACK_DAYS", 21u32)?,
        })
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
        }),
    }
}
