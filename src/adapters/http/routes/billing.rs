//! Billing routes: checkout, portal, subscription, cancel, entitlement.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, header},
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::{
    adapters::http::app_state::AppState,
    app_error::{AppError, AppResult},
    application::{jwt, use_cases::billing::CheckoutInput},
    domain::entities::subscription::{CustomerId, SubscriptionId, SubscriptionRecord, UserId},
};

// ============================================================================
// Types
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateCheckoutPayload {
    price_id: String,
    user_id: UserId,
    email: String,
    return_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePortalPayload {
    customer_id: CustomerId,
    return_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelPayload {
    subscription_id: SubscriptionId,
    user_id: UserId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionQuery {
    user_id: UserId,
}

#[derive(Serialize)]
struct SessionUrlResponse {
    url: String,
}

#[derive(Serialize)]
struct SubscriptionResponse {
    subscription: Option<SubscriptionRecord>,
}

#[derive(Serialize)]
struct CancelResponse {
    success: bool,
    subscription: SubscriptionRecord,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/billing/checkout
async fn create_checkout(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateCheckoutPayload>,
) -> AppResult<impl IntoResponse> {
    let caller = current_user(&headers, &app_state)?;

    let session = app_state
        .billing_use_cases
        .create_checkout(
            &caller,
            CheckoutInput {
                price_id: payload.price_id,
                user_id: payload.user_id,
                email: payload.email,
                return_url: payload.return_url,
            },
        )
        .await?;

    Ok(Json(SessionUrlResponse { url: session.url }))
}

/// POST /api/billing/portal
async fn create_portal(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreatePortalPayload>,
) -> AppResult<impl IntoResponse> {
    let caller = current_user(&headers, &app_state)?;

    let session = app_state
        .billing_use_cases
        .create_portal(&caller, &payload.customer_id, &payload.return_url)
        .await?;

    Ok(Json(SessionUrlResponse { url: session.url }))
}

/// GET /api/billing/subscription?userId=
async fn get_subscription(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SubscriptionQuery>,
) -> AppResult<impl IntoResponse> {
    let caller = current_user(&headers, &app_state)?;

    let subscription = app_state
        .billing_use_cases
        .get_subscription(&caller, &query.user_id)
        .await?;

    Ok(Json(SubscriptionResponse { subscription }))
}

/// POST /api/billing/cancel
/// Schedules cancellation at period end.
async fn cancel_subscription(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CancelPayload>,
) -> AppResult<impl IntoResponse> {
    let caller = current_user(&headers, &app_state)?;

    let subscription = app_state
        .billing_use_cases
        .cancel(&caller, &payload.user_id, &payload.subscription_id)
        .await?;

    Ok(Json(CancelResponse {
        success: true,
        subscription,
    }))
}

/// GET /api/billing/entitlement
async fn get_entitlement(
    State(app_state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let caller = current_user(&headers, &app_state)?;
    let entitlement = app_state.billing_use_cases.get_entitlement(&caller).await?;
    Ok(Json(entitlement))
}

fn current_user(headers: &HeaderMap, app_state: &AppState) -> AppResult<UserId> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;
    let claims = jwt::verify(token.trim(), &app_state.config.jwt_secret)?;
    Ok(claims.user_id())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/checkout", post(create_checkout))
        .route("/portal", post(create_portal))
        .route("/subscription", get(get_subscription))
        .route("/cancel", post(cancel_subscription))
        .route("/entitlement", get(get_entitlement))
}
