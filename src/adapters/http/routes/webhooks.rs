//! Stripe webhook ingestion.

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::{
    adapters::http::app_state::AppState,
    app_error::{AppError, AppResult, is_retryable_error},
    application::use_cases::webhook_ingest::IngestOutcome,
    infra::webhook_signature::SIGNATURE_HEADER,
};

/// Returns 500 so the processor redelivers the event.
fn webhook_retryable_error(error: &AppError) -> Response {
    error!(
        error = %error,
        retryable = true,
        "Webhook processing failed, returning 500 for processor retry"
    );
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

fn received() -> Response {
    (StatusCode::OK, Json(serde_json::json!({ "received": true }))).into_response()
}

/// POST /api/webhooks/stripe
async fn handle_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::InvalidSignature("Missing signature header".into()))?;

    // Verified against the exact bytes received
    app_state
        .webhook_verifier
        .verify(signature, &body, Utc::now().timestamp())?;

    match app_state.webhook_use_cases.ingest(&body).await {
        Ok(IngestOutcome::Reconciled(outcome)) => {
            info!(outcome = outcome.as_str(), "Webhook event handled");
            Ok(received())
        }
        Ok(IngestOutcome::Duplicate | IngestOutcome::Malformed) => Ok(received()),
        Err(e) if is_retryable_error(&e) => Ok(webhook_retryable_error(&e)),
        Err(e) => {
            warn!(error = %e, retryable = false, "Webhook event rejected, acknowledging");
            Ok(received())
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/stripe", post(handle_webhook))
}
