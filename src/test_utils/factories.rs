//! Test data factories for creating valid test fixtures.
//!
//! Each factory function creates a complete, valid object with sensible defaults.
//! Use the closure parameter to override specific fields as needed.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::domain::entities::{
    plan_catalog::PlanCatalog,
    processor_event::ReceivedEvent,
    subscription::{
        CustomerId, SubscriptionId, SubscriptionRecord, SubscriptionStatus, UserId,
        timestamp_to_utc,
    },
};

pub const TEST_PERIOD_START: i64 = 1_700_000_000;
pub const TEST_PERIOD_END: i64 = 1_702_592_000;

/// A fixed timestamp for deterministic tests.
pub fn test_datetime() -> DateTime<Utc> {
    timestamp_to_utc(TEST_PERIOD_START).unwrap()
}

/// `pro` -> `price_123`, `team` -> `price_456`
pub fn test_plan_catalog() -> PlanCatalog {
    PlanCatalog::from_pairs([("pro", "price_123"), ("team", "price_456")])
}

/// Active `pro` record on `cus_1` / `sub_1`.
pub fn create_test_record(
    user_id: &str,
    overrides: impl FnOnce(&mut SubscriptionRecord),
) -> SubscriptionRecord {
    let mut record = SubscriptionRecord {
        user_id: UserId::new(user_id),
        processor_customer_id: Some(CustomerId::new("cus_1")),
        processor_subscription_id: Some(SubscriptionId::new("sub_1")),
        status: SubscriptionStatus::Active,
        plan_identifier: Some("pro".to_string()),
        current_period_start: timestamp_to_utc(TEST_PERIOD_START),
        current_period_end: timestamp_to_utc(TEST_PERIOD_END),
        cancel_at_period_end: false,
        last_event_at: None,
        canceled_subscription_ids: Vec::new(),
        created_at: test_datetime(),
        updated_at: test_datetime(),
    };
    overrides(&mut record);
    record
}

/// Processor subscription object on the `pro` price.
pub fn processor_subscription_json(id: &str, customer: &str, status: &str) -> serde_json::Value {
    json!({
        "id": id,
        "object": "subscription",
        "customer": customer,
        "status": status,
        "cancel_at_period_end": false,
        "current_period_start": TEST_PERIOD_START,
        "current_period_end": TEST_PERIOD_END,
        "items": {
            "object": "list",
            "data": [{
                "id": format!("si_{id}"),
                "price": { "id": "price_123", "object": "price" }
            }]
        },
        "metadata": {}
    })
}

/// Completed, paid subscription checkout opened for `user_id`.
pub fn checkout_session_json(user_id: &str, customer: &str, subscription: &str) -> serde_json::Value {
    json!({
        "id": format!("cs_{subscription}"),
        "object": "checkout.session",
        "mode": "subscription",
        "payment_status": "paid",
        "customer": customer,
        "subscription": subscription,
        "client_reference_id": user_id,
        "customer_details": { "email": "someone@example.com" },
        "metadata": { "user_id": user_id }
    })
}

/// Raw webhook body, exactly as the processor would send it.
pub fn event_body(id: &str, event_type: &str, created: i64, object: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": id,
        "object": "event",
        "type": event_type,
        "created": created,
        "livemode": false,
        "data": { "object": object }
    }))
    .unwrap()
}

pub fn received_event(
    id: &str,
    event_type: &str,
    created: i64,
    object: serde_json::Value,
) -> ReceivedEvent {
    ReceivedEvent::parse(&event_body(id, event_type, created, object)).unwrap()
}
