use async_trait::async_trait;
use serde::Serialize;

use crate::{
    app_error::AppResult,
    domain::entities::{
        processor_event::ProcessorSubscription,
        subscription::{CustomerId, SubscriptionId, UserId},
    },
};

// ============================================================================
// Port Types
// ============================================================================

/// Who pays for a new checkout session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutCustomer {
    /// The user already has a processor customer; reuse it.
    Existing(CustomerId),
    /// First checkout; the processor creates a customer for this email.
    Email(String),
}

#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    pub user_id: UserId,
    pub price_id: String,
    pub customer: CheckoutCustomer,
    pub success_url: String,
    pub cancel_url: String,
}

/// A hosted page the client is redirected to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostedSession {
    pub id: String,
    pub url: String,
}

// ============================================================================
// Port
// ============================================================================

/// Outbound operations against the payment processor.
///
/// Transient failures (timeouts, 5xx, transport) surface as
/// `AppError::Processor`; requests the processor refuses surface as
/// `AppError::ProcessorRejected`.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn retrieve_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> AppResult<ProcessorSubscription>;

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> AppResult<HostedSession>;

    async fn create_portal_session(
        &self,
        customer_id: &CustomerId,
        return_url: &str,
    ) -> AppResult<HostedSession>;

    /// Schedule cancellation at the end of the current period. The
    /// subscription stays active until the processor deletes it.
    async fn cancel_at_period_end(
        &self,
        subscription_id: &SubscriptionId,
    ) -> AppResult<ProcessorSubscription>;
}
