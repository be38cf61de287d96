//! Typed view of the events and objects the payment processor sends us.
//!
//! Only the fields reconciliation needs are modelled; everything else in the
//! payload is ignored by serde.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

use super::subscription::{CustomerId, SubscriptionId, UserId, timestamp_to_utc};

/// Metadata keys that may carry the application user id, in lookup order.
/// `supabaseUserId` is written by sessions created before the rename.
pub const USER_ID_METADATA_KEYS: [&str; 2] = ["user_id", "supabaseUserId"];

// ============================================================================
// Expandable references
// ============================================================================

/// A field the processor sends either as a bare id or as the expanded object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Expandable<T> {
    Id(String),
    Object(Box<T>),
}

pub trait ProcessorObject {
    fn object_id(&self) -> &str;
}

impl<T: ProcessorObject> Expandable<T> {
    pub fn id(&self) -> &str {
        match self {
            Expandable::Id(id) => id,
            Expandable::Object(obj) => obj.object_id(),
        }
    }

    pub fn as_object(&self) -> Option<&T> {
        match self {
            Expandable::Id(_) => None,
            Expandable::Object(obj) => Some(obj),
        }
    }
}

// ============================================================================
// Objects
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorCustomer {
    pub id: String,
}

impl ProcessorObject for ProcessorCustomer {
    fn object_id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub customer: Option<Expandable<ProcessorCustomer>>,
    pub subscription: Option<Expandable<ProcessorSubscription>>,
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
    pub payment_status: Option<String>,
    pub mode: Option<String>,
}

impl CheckoutSession {
    /// The application user this session was opened for. Never derived from
    /// the customer's email.
    pub fn user_id(&self) -> Option<UserId> {
        let from_metadata = self.metadata.as_ref().and_then(|meta| {
            USER_ID_METADATA_KEYS
                .iter()
                .find_map(|key| meta.get(*key).filter(|v| !v.trim().is_empty()))
        });

        from_metadata
            .or(self
                .client_reference_id
                .as_ref()
                .filter(|v| !v.trim().is_empty()))
            .map(|id| UserId::new(id.trim()))
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer.as_ref().map(|c| CustomerId::new(c.id()))
    }

    pub fn subscription_id(&self) -> Option<SubscriptionId> {
        self.subscription.as_ref().map(|s| SubscriptionId::new(s.id()))
    }

    /// Whether the processor has not collected payment yet (e.g. delayed
    /// payment methods). Such checkouts start as `incomplete`.
    pub fn is_unpaid(&self) -> bool {
        self.payment_status.as_deref() == Some("unpaid")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorSubscription {
    pub id: String,
    pub customer: Expandable<ProcessorCustomer>,
    pub status: String,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub items: SubscriptionItems,
}

impl ProcessorObject for ProcessorSubscription {
    fn object_id(&self) -> &str {
        &self.id
    }
}

impl ProcessorSubscription {
    pub fn subscription_id(&self) -> SubscriptionId {
        SubscriptionId::new(&self.id)
    }

    pub fn customer_id(&self) -> CustomerId {
        CustomerId::new(self.customer.id())
    }

    /// Price of the first subscription item
    pub fn price_id(&self) -> Option<&str> {
        self.items.data.first().map(|item| item.price.id.as_str())
    }

    // Newer API versions only carry period bounds on the items.
    pub fn period_start(&self) -> Option<DateTime<Utc>> {
        self.current_period_start
            .or_else(|| self.items.data.first().and_then(|i| i.current_period_start))
            .and_then(timestamp_to_utc)
    }

    pub fn period_end(&self) -> Option<DateTime<Utc>> {
        self.current_period_end
            .or_else(|| self.items.data.first().and_then(|i| i.current_period_end))
            .and_then(timestamp_to_utc)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    pub id: String,
    pub price: Price,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Price {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub customer: Option<Expandable<ProcessorCustomer>>,
    pub subscription: Option<Expandable<ProcessorSubscription>>,
    pub parent: Option<InvoiceParent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceParent {
    pub subscription_details: Option<InvoiceSubscriptionDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceSubscriptionDetails {
    pub subscription: Option<Expandable<ProcessorSubscription>>,
}

impl Invoice {
    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer.as_ref().map(|c| CustomerId::new(c.id()))
    }

    /// Subscription this invoice bills, from the top-level field or the
    /// `parent.subscription_details` block used by newer API versions.
    pub fn subscription_id(&self) -> Option<SubscriptionId> {
        self.subscription
            .as_ref()
            .or_else(|| {
                self.parent
                    .as_ref()
                    .and_then(|p| p.subscription_details.as_ref())
                    .and_then(|d| d.subscription.as_ref())
            })
            .map(|s| SubscriptionId::new(s.id()))
    }
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone)]
pub enum ProcessorEvent {
    CheckoutSessionCompleted(CheckoutSession),
    /// `customer.subscription.created` and `customer.subscription.updated`
    SubscriptionUpdated(ProcessorSubscription),
    SubscriptionDeleted(ProcessorSubscription),
    /// `invoice.payment_succeeded` and `invoice.paid`
    InvoicePaymentSucceeded(Invoice),
    InvoicePaymentFailed(Invoice),
    Unrecognized(String),
}

/// A verified event envelope with its typed payload.
#[derive(Debug, Clone)]
pub struct ReceivedEvent {
    pub id: String,
    pub event_type: String,
    pub created_at: DateTime<Utc>,
    pub kind: ProcessorEvent,
}

#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("malformed event envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("invalid event timestamp {0}")]
    Timestamp(i64),

    #[error("malformed {event_type} payload in event {event_id}: {source}")]
    Payload {
        event_id: String,
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: i64,
    data: EnvelopeData,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    object: serde_json::Value,
}

impl ReceivedEvent {
    /// Parse a raw (already verified) event body.
    pub fn parse(body: &[u8]) -> Result<Self, EventParseError> {
        let envelope: Envelope = serde_json::from_slice(body).map_err(EventParseError::Envelope)?;
        let created_at =
            timestamp_to_utc(envelope.created).ok_or(EventParseError::Timestamp(envelope.created))?;

        let object = envelope.data.object;
        let payload_err = |source| EventParseError::Payload {
            event_id: envelope.id.clone(),
            event_type: envelope.event_type.clone(),
            source,
        };

        let kind = match envelope.event_type.as_str() {
            "checkout.session.completed" => ProcessorEvent::CheckoutSessionCompleted(
                serde_json::from_value(object).map_err(payload_err)?,
            ),
            "customer.subscription.created" | "customer.subscription.updated" => {
                ProcessorEvent::SubscriptionUpdated(
                    serde_json::from_value(object).map_err(payload_err)?,
                )
            }
            "customer.subscription.deleted" => ProcessorEvent::SubscriptionDeleted(
                serde_json::from_value(object).map_err(payload_err)?,
            ),
            "invoice.payment_succeeded" | "invoice.paid" => ProcessorEvent::InvoicePaymentSucceeded(
                serde_json::from_value(object).map_err(payload_err)?,
            ),
            "invoice.payment_failed" => ProcessorEvent::InvoicePaymentFailed(
                serde_json::from_value(object).map_err(payload_err)?,
            ),
            other => ProcessorEvent::Unrecognized(other.to_string()),
        };

        Ok(Self {
            id: envelope.id,
            event_type: envelope.event_type,
            created_at,
            kind,
        })
    }
}
