//! In-memory mock implementations for the billing ports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::{
    app_error::{AppError, AppResult},
    application::{
        ports::payment_processor::{CheckoutSessionRequest, HostedSession, PaymentProcessor},
        use_cases::{
            reconcile::SubscriptionRepo,
            webhook_ingest::{ProcessedEvent, ProcessedEventRepo},
        },
    },
    domain::entities::{
        processor_event::ProcessorSubscription,
        subscription::{
            CustomerId, SubscriptionId, SubscriptionPatch, SubscriptionRecord, UpsertOutcome,
            UserId, WriteGuard,
        },
    },
};

// ============================================================================
// InMemorySubscriptionRepo
// ============================================================================

/// Keyed by user id. Enforces the same unique keys and write guard as the
/// Postgres store, under one lock.
#[derive(Default)]
pub struct InMemorySubscriptionRepo {
    pub records: Mutex<HashMap<UserId, SubscriptionRecord>>,
    unavailable: AtomicBool,
}

impl InMemorySubscriptionRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: SubscriptionRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.user_id.clone(), record);
    }

    pub fn get(&self, user_id: &UserId) -> Option<SubscriptionRecord> {
        self.records.lock().unwrap().get(user_id).cloned()
    }

    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// Make every call fail as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Database("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionRepo for InMemorySubscriptionRepo {
    async fn get_by_user(&self, user_id: &UserId) -> AppResult<Option<SubscriptionRecord>> {
        self.check_available()?;
        Ok(self.get(user_id))
    }

    async fn get_by_processor_subscription_id(
        &self,
        subscription_id: &SubscriptionId,
    ) -> AppResult<Option<SubscriptionRecord>> {
        self.check_available()?;
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .find(|r| r.processor_subscription_id.as_ref() == Some(subscription_id))
            .cloned())
    }

    async fn get_by_processor_customer_id(
        &self,
        customer_id: &CustomerId,
    ) -> AppResult<Option<SubscriptionRecord>> {
        self.check_available()?;
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .find(|r| r.processor_customer_id.as_ref() == Some(customer_id))
            .cloned())
    }

    async fn upsert_by_user(
        &self,
        user_id: &UserId,
        patch: &SubscriptionPatch,
        guard: &WriteGuard,
    ) -> AppResult<UpsertOutcome> {
        self.check_available()?;
        let mut records = self.records.lock().unwrap();

        if let Err(reason) = guard.check(records.get(user_id), patch) {
            return Ok(UpsertOutcome::Skipped(reason));
        }

        let taken = records.values().any(|r| {
            r.user_id != *user_id
                && ((patch.processor_customer_id.is_some()
                    && r.processor_customer_id == patch.processor_customer_id)
                    || (patch.processor_subscription_id.is_some()
                        && r.processor_subscription_id == patch.processor_subscription_id))
        });
        if taken {
            return Err(AppError::InvalidInput(
                "processor id already belongs to another user".into(),
            ));
        }

        let now = Utc::now();
        let mut record = records
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| SubscriptionRecord::empty(user_id.clone(), now));
        record.apply(patch, guard.event_at, now);
        records.insert(user_id.clone(), record.clone());

        Ok(UpsertOutcome::Applied(record))
    }
}

// ============================================================================
// InMemoryProcessedEventRepo
// ============================================================================

#[derive(Default)]
pub struct InMemoryProcessedEventRepo {
    pub events: Mutex<HashMap<String, ProcessedEvent>>,
    fail_record: AtomicBool,
}

impl InMemoryProcessedEventRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, event_id: &str) -> Option<ProcessedEvent> {
        self.events.lock().unwrap().get(event_id).cloned()
    }

    pub fn set_record_failure(&self, fail: bool) {
        self.fail_record.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProcessedEventRepo for InMemoryProcessedEventRepo {
    async fn is_processed(&self, event_id: &str) -> AppResult<bool> {
        Ok(self.events.lock().unwrap().contains_key(event_id))
    }

    async fn record(&self, event: &ProcessedEvent) -> AppResult<()> {
        if self.fail_record.load(Ordering::SeqCst) {
            return Err(AppError::Database("insert failed".into()));
        }
        self.events
            .lock()
            .unwrap()
            .entry(event.event_id.clone())
            .or_insert_with(|| event.clone());
        Ok(())
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let mut events = self.events.lock().unwrap();
        let before = events.len();
        events.retain(|_, e| e.received_at >= cutoff);
        Ok((before - events.len()) as u64)
    }
}

// ============================================================================
// MockPaymentProcessor
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorFailure {
    /// Timeout or 5xx
    Unavailable,
    /// 401 from a rotated or wrong secret key
    AuthFailed,
    /// Any other 4xx
    Rejected,
}

#[derive(Default)]
pub struct MockPaymentProcessor {
    subscriptions: Mutex<HashMap<String, serde_json::Value>>,
    failure: Mutex<Option<ProcessorFailure>>,
    retrieve_calls: AtomicUsize,
    checkouts: Mutex<Vec<CheckoutSessionRequest>>,
    canceled: Mutex<Vec<SubscriptionId>>,
}

impl MockPaymentProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription object (processor JSON) for retrieval.
    pub fn add_subscription(&self, subscription: serde_json::Value) {
        let id = subscription["id"].as_str().unwrap_or_default().to_string();
        self.subscriptions.lock().unwrap().insert(id, subscription);
    }

    pub fn fail_with(&self, failure: ProcessorFailure) {
        *self.failure.lock().unwrap() = Some(failure);
    }

    pub fn clear_failure(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn retrieve_calls(&self) -> usize {
        self.retrieve_calls.load(Ordering::SeqCst)
    }

    pub fn last_checkout(&self) -> Option<CheckoutSessionRequest> {
        self.checkouts.lock().unwrap().last().cloned()
    }

    pub fn canceled(&self) -> Vec<SubscriptionId> {
        self.canceled.lock().unwrap().clone()
    }

    fn check_failure(&self) -> AppResult<()> {
        match *self.failure.lock().unwrap() {
            Some(ProcessorFailure::Unavailable) => {
                Err(AppError::Processor("request timed out".into()))
            }
            Some(ProcessorFailure::AuthFailed) => Err(AppError::Processor(
                "Stripe error: Invalid API Key provided".into(),
            )),
            Some(ProcessorFailure::Rejected) => {
                Err(AppError::ProcessorRejected("No such subscription".into()))
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PaymentProcessor for MockPaymentProcessor {
    async fn retrieve_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> AppResult<ProcessorSubscription> {
        self.retrieve_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        let value = self
            .subscriptions
            .lock()
            .unwrap()
            .get(subscription_id.as_str())
            .cloned()
            .ok_or_else(|| AppError::ProcessorRejected("No such subscription".into()))?;
        serde_json::from_value(value).map_err(|e| AppError::Internal(e.to_string()))
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> AppResult<HostedSession> {
        self.check_failure()?;
        let mut checkouts = self.checkouts.lock().unwrap();
        checkouts.push(request.clone());
        let id = format!("cs_test_{}", checkouts.len());
        Ok(HostedSession {
            url: format!("https://checkout.processor.test/c/{id}"),
            id,
        })
    }

    async fn create_portal_session(
        &self,
        customer_id: &CustomerId,
        _return_url: &str,
    ) -> AppResult<HostedSession> {
        self.check_failure()?;
        Ok(HostedSession {
            id: format!("bps_{customer_id}"),
            url: format!("https://billing.processor.test/p/{customer_id}"),
        })
    }

    async fn cancel_at_period_end(
        &self,
        subscription_id: &SubscriptionId,
    ) -> AppResult<ProcessorSubscription> {
        self.check_failure()?;
        self.canceled.lock().unwrap().push(subscription_id.clone());

        let mut subscriptions = self.subscriptions.lock().unwrap();
        let value = subscriptions
            .entry(subscription_id.to_string())
            .or_insert_with(|| {
                serde_json::json!({
                    "id": subscription_id.as_str(),
                    "customer": "cus_1",
                    "status": "active",
                })
            });
        value["cancel_at_period_end"] = serde_json::Value::Bool(true);
        serde_json::from_value(value.clone()).map_err(|e| AppError::Internal(e.to_string()))
    }
}
