use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

use crate::{
    app_error::{AppError, AppResult},
    application::ports::payment_processor::{
        CheckoutCustomer, CheckoutSessionRequest, HostedSession, PaymentProcessor,
    },
    domain::entities::{
        processor_event::ProcessorSubscription,
        subscription::{CustomerId, SubscriptionId},
    },
};

#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: SecretString,
    api_base: Url,
}

impl StripeClient {
    pub fn new(client: Client, secret_key: SecretString, api_base: Url) -> Self {
        Self {
            client,
            secret_key,
            api_base,
        }
    }

    fn auth_header(&self) -> String {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:", self.secret_key.expose_secret()));
        format!("Basic {}", encoded)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base.as_str().trim_end_matches('/'), path)
    }

    async fn send<T: for<'de> Deserialize<'de>>(&self, request: RequestBuilder) -> AppResult<T> {
        let response = request
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Processor("Stripe request timed out".into())
                } else {
                    AppError::Processor(format!("Stripe request failed: {}", e))
                }
            })?;

        self.handle_response(response).await
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn handle_response<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> AppResult<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Processor(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            tracing::error!(status = %status, body = %body, "Stripe API error");

            let message = serde_json::from_str::<StripeErrorResponse>(&body)
                .ok()
                .map(|e| e.error.message.unwrap_or(e.error.error_type))
                .unwrap_or_else(|| status.to_string());

            return Err(status_error(status, &message));
        }

        serde_json::from_str(&body).map_err(|e| {
            tracing::error!(error = %e, "Failed to parse Stripe response");
            AppError::Internal(format!("Failed to parse Stripe response: {}", e))
        })
    }
}

/// Classify a non-success Stripe status.
///
/// Server errors, rate limiting and authentication failures (a rotated or
/// wrong secret key) are retryable. Other 4xx mean the request itself was
/// refused.
fn status_error(status: StatusCode, message: &str) -> AppError {
    match status {
        s if s.is_server_error() => AppError::Processor(format!("Stripe error: {}", message)),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            AppError::Processor(format!("Stripe error: {}", message))
        }
        _ => AppError::ProcessorRejected(format!("Stripe error: {}", message)),
    }
}

/// Form parameters for a subscription-mode checkout session.
fn checkout_params(request: &CheckoutSessionRequest) -> Vec<(String, String)> {
    let user_id = request.user_id.to_string();
    let mut params: Vec<(String, String)> = vec![
        ("mode".to_string(), "subscription".to_string()),
        ("line_items[0][price]".to_string(), request.price_id.clone()),
        ("line_items[0][quantity]".to_string(), "1".to_string()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
        ("client_reference_id".to_string(), user_id.clone()),
        ("metadata[user_id]".to_string(), user_id.clone()),
        ("subscription_data[metadata][user_id]".to_string(), user_id),
    ];

    match &request.customer {
        CheckoutCustomer::Existing(customer_id) => {
            params.push(("customer".to_string(), customer_id.to_string()));
        }
        CheckoutCustomer::Email(email) => {
            params.push(("customer_email".to_string(), email.clone()));
        }
    }

    params
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    async fn retrieve_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> AppResult<ProcessorSubscription> {
        let request = self
            .client
            .get(self.endpoint(&format!("subscriptions/{}", subscription_id)));
        self.send(request).await
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> AppResult<HostedSession> {
        let http_request = self
            .client
            .post(self.endpoint("checkout/sessions"))
            .form(&checkout_params(request));

        let session: StripeCheckoutSession = self.send(http_request).await?;
        let url = session
            .url
            .ok_or_else(|| AppError::Internal("Stripe checkout session has no URL".into()))?;

        Ok(HostedSession {
            id: session.id,
            url,
        })
    }

    async fn create_portal_session(
        &self,
        customer_id: &CustomerId,
        return_url: &str,
    ) -> AppResult<HostedSession> {
        let params = [("customer", customer_id.as_str()), ("return_url", return_url)];
        let request = self
            .client
            .post(self.endpoint("billing_portal/sessions"))
            .form(&params);

        let session: StripePortalSession = self.send(request).await?;
        Ok(HostedSession {
            id: session.id,
            url: session.url,
        })
    }

    async fn cancel_at_period_end(
        &self,
        subscription_id: &SubscriptionId,
    ) -> AppResult<ProcessorSubscription> {
        let request = self
            .client
            .post(self.endpoint(&format!("subscriptions/{}", subscription_id)))
            .form(&[("cancel_at_period_end", "true")]);
        self.send(request).await
    }
}

// ============================================================================
// Stripe Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StripePortalSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct StripeErrorResponse {
    pub error: StripeError,
}

#[derive(Debug, Deserialize)]
pub struct StripeError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: Option<String>,
    pub code: Option<String>,
}
