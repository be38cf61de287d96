//! Test app state builder for HTTP-level integration testing.
//!
//! `TestAppStateBuilder` creates an `AppState` whose collaborators are the
//! in-memory mocks, and hands the mocks back for assertions.

use std::sync::Arc;

use axum::http::HeaderValue;
use secrecy::SecretString;
use time::Duration;
use url::Url;

use crate::{
    adapters::http::app_state::AppState,
    application::{
        jwt,
        use_cases::{
            billing::BillingUseCases, reconcile::ReconciliationEngine,
            webhook_ingest::WebhookIngestUseCases,
        },
    },
    domain::entities::subscription::{SubscriptionRecord, UserId},
    infra::{config::AppConfig, webhook_signature::WebhookVerifier},
    test_utils::{
        InMemoryProcessedEventRepo, InMemorySubscriptionRepo, MockPaymentProcessor,
        test_plan_catalog,
    },
};

pub const TEST_JWT_SECRET: &str = "test-jwt-secret";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const TEST_APP_ORIGIN: &str = "https://app.example.com";

/// Handles to the mocks behind a built `AppState`.
pub struct TestMocks {
    pub subscriptions: Arc<InMemorySubscriptionRepo>,
    pub processed_events: Arc<InMemoryProcessedEventRepo>,
    pub processor: Arc<MockPaymentProcessor>,
}

/// Builder for creating test `AppState` instances.
///
/// # Example
/// ```ignore
/// let (app_state, mocks) = TestAppStateBuilder::new()
///     .with_record(create_test_record("u1", |_| {}))
///     .build_with_mocks();
/// ```
pub struct TestAppStateBuilder {
    records: Vec<SubscriptionRecord>,
    processor_subscriptions: Vec<serde_json::Value>,
    reject_stale_events: bool,
}

impl Default for TestAppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestAppStateBuilder {
    pub fn new() -> Self {
        Self {
            records: vec![],
            processor_subscriptions: vec![],
            reject_stale_events: true,
        }
    }

    /// Seed the entitlement store.
    pub fn with_record(mut self, record: SubscriptionRecord) -> Self {
        self.records.push(record);
        self
    }

    /// Make a subscription object retrievable from the mock processor.
    pub fn with_processor_subscription(mut self, subscription: serde_json::Value) -> Self {
        self.processor_subscriptions.push(subscription);
        self
    }

    pub fn build(self) -> AppState {
        self.build_with_mocks().0
    }

    pub fn build_with_mocks(self) -> (AppState, TestMocks) {
        let subscriptions = Arc::new(InMemorySubscriptionRepo::new());
        for record in self.records {
            subscriptions.insert(record);
        }
        let processed_events = Arc::new(InMemoryProcessedEventRepo::new());
        let processor = Arc::new(MockPaymentProcessor::new());
        for subscription in self.processor_subscriptions {
            processor.add_subscription(subscription);
        }

        let config = test_config(self.reject_stale_events);
        let plans = Arc::new(config.plan_catalog.clone());

        let engine = ReconciliationEngine::new(
            subscriptions.clone(),
            processor.clone(),
            plans.clone(),
            config.reject_stale_events,
        );
        let webhook_use_cases = WebhookIngestUseCases::new(engine, processed_events.clone());
        let billing_use_cases = BillingUseCases::new(
            subscriptions.clone(),
            processor.clone(),
            plans,
            config.app_origin.clone(),
        );
        let webhook_verifier = WebhookVerifier::new(
            config.webhook_signing_secret.clone(),
            config.webhook_tolerance,
        );

        let app_state = AppState {
            config: Arc::new(config),
            webhook_verifier: Arc::new(webhook_verifier),
            webhook_use_cases: Arc::new(webhook_use_cases),
            billing_use_cases: Arc::new(billing_use_cases),
        };

        (
            app_state,
            TestMocks {
                subscriptions,
                processed_events,
                processor,
            },
        )
    }
}

fn test_config(reject_stale_events: bool) -> AppConfig {
    AppConfig {
        jwt_secret: secret(TEST_JWT_SECRET),
        app_origin: Url::parse(TEST_APP_ORIGIN).unwrap(),
        cors_origin: HeaderValue::from_static(TEST_APP_ORIGIN),
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        database_url: "postgres://unused".to_string(),
        database_max_connections: 1,
        processor_secret_key: secret("sk_test_unused"),
        webhook_signing_secret: secret(TEST_WEBHOOK_SECRET),
        processor_api_base: Url::parse("http://127.0.0.1:12111/v1").unwrap(),
        processor_timeout: std::time::Duration::from_secs(1),
        webhook_tolerance: Duration::seconds(300),
        plan_catalog: test_plan_catalog(),
        reject_stale_events,
        processed_event_retention: chrono::TimeDelta::days(30),
    }
}

fn secret(value: &str) -> SecretString {
    SecretString::new(value.to_string().into())
}

/// `Authorization` header value for `user_id`.
pub fn bearer_for(user_id: &str) -> String {
    let token = jwt::issue(&UserId::new(user_id), &secret(TEST_JWT_SECRET), Duration::hours(1))
        .unwrap();
    format!("Bearer {token}")
}

/// `Stripe-Signature` header value for `body`, signed now.
pub fn signature_for(body: &[u8]) -> String {
    WebhookVerifier::new(secret(TEST_WEBHOOK_SECRET), Duration::seconds(300))
        .sign(body, chrono::Utc::now().timestamp())
        .unwrap()
}
