use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use remita_mailbox::{ImapConfig, ImapScanner};
use remita_ocr::HttpExtractor;
use remita_recon::{MatchPolicy, ReconciliationEngine};
use remita_storage::{FsBlobStore, ReceiptLedger};

mod config;
mod jotform;
mod notify;
mod response;
mod routes;

use config::Config;
use notify::SmtpMailer;
use routes::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "remita_server=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env().context("loading configuration")?;

    let store = Arc::new(FsBlobStore::new(&config.ledger_dir));
    let ledger = Arc::new(ReceiptLedger::new(store, config.ledger_key.clone()));

    let scanner = Arc::new(ImapScanner::new(ImapConfig {
        host: config.imap.host.clone(),
        port: config.imap.port,
        user: config.imap.user.clone(),
        password: config.imap.password.clone(),
        sender_filter: config.imap.sender_filter.clone(),
        timeout: config.imap.timeout,
    }));

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("building HTTP client")?;
    let extractor = Arc::new(HttpExtractor::new(
        http,
        config.ocr.gateway_url.clone(),
        config.ocr.api_key.clone(),
    ));

    let engine = Arc::new(ReconciliationEngine::new(
        ledger,
        scanner,
        extractor.clone(),
        MatchPolicy {
            min_score: config.match_threshold,
            lookback_days: config.lookback_days,
        },
    ));

    let mailer = Arc::new(SmtpMailer::new(&config.smtp).context("building SMTP mailer")?);

    let state = AppState {
        engine,
        extractor,
        mailer,
        operator_address: config.smtp.operator_address.clone(),
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "remita-server listening");

    axum::serve(listener, routes::router(state)).await?;
    Ok(())
}
