use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header::CONTENT_TYPE, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use remita_ocr::TextExtractor;
use remita_recon::{verify_pr_card, ReconciliationEngine, ReconciliationRequest};

use crate::jotform::{parse_submission, Submission};
use crate::notify::{compose_notification, Mailer};
use crate::response::ValidationResponse;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReconciliationEngine>,
    pub extractor: Arc<dyn TextExtractor>,
    pub mailer: Arc<dyn Mailer>,
    pub operator_address: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health).post(webhook))
        .route("/ledger/refresh", post(refresh_ledger))
        .layer(TraceLayer::new_for_http())
        // Submission payloads are form metadata plus URLs, never file bodies.
        .layer(RequestBodyLimitLayer::new(2 * 1024 * 1024))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "Health": "Success" }))
}

/// Query parameters selecting the two configured fee tiers.
#[derive(Debug, Deserialize)]
struct FeeTiers {
    pr_amount: Option<String>,
    normal_amount: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshParams {
    days: Option<u32>,
}

/// Widest window the raw-scan path will look back by default.
const RAW_SCAN_LOOKBACK_DAYS: u32 = 44;

#[derive(Debug, Error)]
enum BodyError {
    #[error("Body is not valid JSON: {0}")]
    Json(String),
    #[error("Body is not a valid form: {0}")]
    Form(String),
    #[error("Form body has no rawRequest field")]
    MissingRawRequest,
}

async fn webhook(
    State(state): State<AppState>,
    Query(tiers): Query<FeeTiers>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let data = match parse_body(&headers, &body) {
        Ok(data) => data,
        Err(e) => return bad_request(e.to_string()),
    };
    let submission =
        match parse_submission(&data, tiers.pr_amount.as_deref(), tiers.normal_amount.as_deref()) {
            Ok(submission) => submission,
            Err(e) => return bad_request(e.to_string()),
        };
    tracing::info!(
        full_name = %submission.full_name,
        pr_status = submission.pr_status,
        "submission received"
    );

    let (pr_success, pr_error) = verify_pr(&state, &submission).await;

    let outcome = state
        .engine
        .reconcile(&ReconciliationRequest {
            payer_name: submission.payer_full_name.clone(),
            expected_amount: submission.amount_of_payment.clone(),
            proof_image_urls: submission.e_transfer_file_upload_urls.clone(),
        })
        .await;

    let mut response = ValidationResponse {
        submission,
        pr_success,
        pr_error,
        e_transfer_success: outcome.matched,
        e_transfer_error: outcome.error,
        email_send: None,
        email_error_message: None,
    };

    if let Some(email) = compose_notification(&response, &state.operator_address) {
        match state.mailer.send(email).await {
            Ok(()) => response.email_send = Some(true),
            Err(e) => {
                tracing::warn!("notification delivery failed: {e}");
                response.email_send = Some(false);
                response.email_error_message = Some(e.to_string());
            }
        }
    }

    (StatusCode::CREATED, Json(response)).into_response()
}

/// Manual ledger refresh with a caller-chosen lookback window.
async fn refresh_ledger(
    State(state): State<AppState>,
    Query(params): Query<RefreshParams>,
) -> Response {
    let days = params.days.unwrap_or(RAW_SCAN_LOOKBACK_DAYS);
    match state.engine.refresh(days).await {
        Ok(inserted) => Json(json!({ "inserted": inserted, "lookback_days": days })).into_response(),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// PR-card verification: every uploaded card photo gets a chance; the first
/// one that verifies settles it. `(None, None)` when no PR claim was made.
async fn verify_pr(state: &AppState, submission: &Submission) -> (Option<bool>, Option<String>) {
    if !submission.pr_status {
        return (None, None);
    }
    let Some(card_number) = submission.pr_card_number.as_deref() else {
        return (Some(false), Some("PR card number not provided".to_string()));
    };
    if submission.pr_file_upload_urls.is_empty() {
        return (Some(false), Some("No PR card files provided".to_string()));
    }

    for url in &submission.pr_file_upload_urls {
        match state.extractor.extract(url).await {
            Ok(fragments) => {
                match verify_pr_card(&submission.full_name, card_number, &fragments) {
                    Ok(()) => return (Some(true), None),
                    Err(e) => tracing::debug!(%url, "PR card rejected: {e}"),
                }
            }
            Err(e) => tracing::warn!(%url, "PR card extraction failed: {e}"),
        }
    }
    (Some(false), Some("PR card does not match".to_string()))
}

/// The platform posts either a form-encoded `rawRequest` field holding a
/// JSON string, or a raw JSON body.
fn parse_body(headers: &HeaderMap, body: &[u8]) -> Result<Value, BodyError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if content_type.starts_with("application/x-www-form-urlencoded") {
        let pairs: Vec<(String, String)> =
            serde_urlencoded::from_bytes(body).map_err(|e| BodyError::Form(e.to_string()))?;
        let raw = pairs
            .into_iter()
            .find(|(key, _)| key == "rawRequest")
            .map(|(_, value)| value)
            .ok_or(BodyError::MissingRawRequest)?;
        serde_json::from_str(&raw).map_err(|e| BodyError::Json(e.to_string()))
    } else {
        serde_json::from_slice(body).map_err(|e| BodyError::Json(e.to_string()))
    }
}

fn bad_request(error: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": error }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use tower::ServiceExt;

    use remita_core::{Amount, Receipt};
    use remita_mailbox::StaticScanner;
    use remita_ocr::MockExtractor;
    use remita_recon::MatchPolicy;
    use remita_storage::{MemoryBlobStore, ReceiptLedger};

    use crate::notify::RecordingMailer;

    fn receipt(reference: &str, sender: &str, amount: &str) -> Receipt {
        Receipt::observed(
            Some(reference.to_string()),
            Some(sender.to_string()),
            Amount::parse(amount).ok(),
            Utc::now(),
        )
    }

    /// Fragments an extractor would produce for a PR card photo that also
    /// carries a reference-shaped token (shared mock across both images).
    fn fragments() -> Vec<&'static str> {
        vec![
            "Government", "of", "Canada", "PERMANENT", "RESIDENT", "CARD", "CARTE",
            "MOHAMMAD", "FARZAM", "1234-5678", "C1APJDfjFfZu",
        ]
    }

    struct Harness {
        app: Router,
        ledger: Arc<ReceiptLedger>,
        mailer: Arc<RecordingMailer>,
    }

    async fn harness(seed: Vec<Receipt>) -> Harness {
        let ledger = Arc::new(ReceiptLedger::new(
            Arc::new(MemoryBlobStore::new()),
            "receipts.csv",
        ));
        if !seed.is_empty() {
            ledger.insert_new(&seed).await.unwrap();
        }
        let extractor = Arc::new(MockExtractor::with_fragments(fragments()));
        let engine = Arc::new(ReconciliationEngine::new(
            ledger.clone(),
            Arc::new(StaticScanner::with_receipts(vec![])),
            extractor.clone(),
            MatchPolicy::default(),
        ));
        let mailer = Arc::new(RecordingMailer::new());
        let app = router(AppState {
            engine,
            extractor,
            mailer: mailer.clone(),
            operator_address: "ops@example.org".to_string(),
        });
        Harness { app, ledger, mailer }
    }

    fn raw_request() -> String {
        serde_json::json!({
            "slug": "submit/243138058138255/",
            "q3_fullName3": {"first": "Mohammad", "last": "Farzam"},
            "q34_pFull": {"first": "Mohammad"},
            "q6_email6": "m.farzam@example.org",
            "q5_phoneNumber5": {"full": "(416) 555-0101"},
            "q36_typeOf": "Pr [500]",
            "q33_number": "1234-5678",
            "file_upload": ["https://files.example.com/uploads/user/243138058138255/607013/card.jpg"],
            "eFile_upload": ["https://files.example.com/uploads/user/243138058138255/607013/etransfer.jpg"],
        })
        .to_string()
    }

    fn form_post(raw: &str) -> Request<Body> {
        let body = serde_urlencoded::to_string([("rawRequest", raw)]).unwrap();
        Request::builder()
            .method("POST")
            .uri("/?pr_amount=500&normal_amount=546")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_answers() {
        let h = harness(vec![]).await;
        let response = h
            .app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["Health"], "Success");
    }

    #[tokio::test]
    async fn passing_submission_reconciles_and_confirms() {
        let h = harness(vec![receipt("C1APJDfjFfZu", "mohammad farzam", "500")]).await;

        let response = h.app.oneshot(form_post(&raw_request())).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = json_body(response).await;
        assert_eq!(body["PR_Success"], true);
        assert_eq!(body["E_Transfer_Success"], true);
        assert_eq!(body["Email_Send"], true);
        assert_eq!(body["Full_Name"], "Mohammad Farzam");

        // The matched receipt is consumed, and the registrant was written to.
        assert!(h.ledger.load().await.unwrap()[0].consumed);
        let sent = h.mailer.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "m.farzam@example.org");
    }

    #[tokio::test]
    async fn amount_mismatch_alerts_the_operator() {
        let h = harness(vec![receipt("C1APJDfjFfZu", "mohammad farzam", "546")]).await;

        let response = h.app.oneshot(form_post(&raw_request())).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = json_body(response).await;
        assert_eq!(body["E_Transfer_Success"], false);
        assert!(body["E_Transfer_Error"]
            .as_str()
            .unwrap()
            .contains("amount mismatch"));

        let sent = h.mailer.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ops@example.org");
    }

    #[tokio::test]
    async fn raw_json_body_is_accepted() {
        let h = harness(vec![receipt("C1APJDfjFfZu", "mohammad farzam", "500")]).await;
        let request = Request::builder()
            .method("POST")
            .uri("/?pr_amount=500&normal_amount=546")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(raw_request()))
            .unwrap();

        let response = h.app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(json_body(response).await["E_Transfer_Success"], true);
    }

    #[tokio::test]
    async fn malformed_body_is_a_bad_request() {
        let h = harness(vec![]).await;
        let request = Request::builder()
            .method("POST")
            .uri("/?pr_amount=500&normal_amount=546")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from("not json"))
            .unwrap();

        let response = h.app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn missing_fee_tier_is_a_bad_request() {
        let h = harness(vec![]).await;
        let body = serde_urlencoded::to_string([("rawRequest", raw_request())]).unwrap();
        let request = Request::builder()
            .method("POST")
            .uri("/") // no fee tiers supplied
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap();

        let response = h.app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn ledger_refresh_reports_inserted_rows() {
        let ledger = Arc::new(ReceiptLedger::new(
            Arc::new(MemoryBlobStore::new()),
            "receipts.csv",
        ));
        let extractor = Arc::new(MockExtractor::with_fragments(fragments()));
        let engine = Arc::new(ReconciliationEngine::new(
            ledger.clone(),
            Arc::new(StaticScanner::with_receipts(vec![receipt(
                "AAAABBBBCCCC",
                "wei chen",
                "546",
            )])),
            extractor.clone(),
            MatchPolicy::default(),
        ));
        let app = router(AppState {
            engine,
            extractor,
            mailer: Arc::new(RecordingMailer::new()),
            operator_address: "ops@example.org".to_string(),
        });

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ledger/refresh?days=30")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["inserted"], 1);
        assert_eq!(body["lookback_days"], 30);
        assert_eq!(ledger.load().await.unwrap().len(), 1);
    }
}
