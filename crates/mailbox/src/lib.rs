pub mod parse;
pub mod scanner;

pub use parse::parse_notification;
pub use scanner::{ImapConfig, ImapScanner, MailboxScanner, ScanError, StaticScanner};
