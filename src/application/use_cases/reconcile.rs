use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, instrument, warn};

use crate::app_error::{AppError, AppResult};
use crate::application::ports::payment_processor::PaymentProcessor;
use crate::domain::entities::{
    plan_catalog::PlanCatalog,
    processor_event::{CheckoutSession, Invoice, ProcessorEvent, ProcessorSubscription, ReceivedEvent},
    subscription::{
        CustomerId, SkipReason, SubscriptionId, SubscriptionPatch, SubscriptionRecord,
        SubscriptionStatus, UpsertOutcome, UserId, WriteGuard, WriteKind,
    },
};

/// Durable keyed storage of subscription records.
#[async_trait]
pub trait SubscriptionRepo: Send + Sync {
    async fn get_by_user(&self, user_id: &UserId) -> AppResult<Option<SubscriptionRecord>>;
    async fn get_by_processor_subscription_id(
        &self,
        subscription_id: &SubscriptionId,
    ) -> AppResult<Option<SubscriptionRecord>>;
    async fn get_by_processor_customer_id(
        &self,
        customer_id: &CustomerId,
    ) -> AppResult<Option<SubscriptionRecord>>;
    /// Merge `patch` into the user's record (creating it when absent) if and
    /// only if `guard` holds against the stored state. Guard and write are one
    /// atomic step.
    async fn upsert_by_user(
        &self,
        user_id: &UserId,
        patch: &SubscriptionPatch,
        guard: &WriteGuard,
    ) -> AppResult<UpsertOutcome>;
}

/// What reconciling one event did to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Applied(UserId),
    Skipped(UserId, SkipReason),
    /// Event kind or shape that needs no mutation.
    Ignored(&'static str),
    /// Event can never be applied (unknown user, missing record).
    Dropped(String),
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Applied(_) => "applied",
            ReconcileOutcome::Skipped(_, _) => "skipped",
            ReconcileOutcome::Ignored(_) => "ignored",
            ReconcileOutcome::Dropped(_) => "dropped",
        }
    }

    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            ReconcileOutcome::Applied(user_id) | ReconcileOutcome::Skipped(user_id, _) => {
                Some(user_id)
            }
            _ => None,
        }
    }
}

/// Turns one verified processor event into at most one guarded upsert.
#[derive(Clone)]
pub struct ReconciliationEngine {
    repo: Arc<dyn SubscriptionRepo>,
    processor: Arc<dyn PaymentProcessor>,
    plans: Arc<PlanCatalog>,
    reject_stale: bool,
}

impl ReconciliationEngine {
    pub fn new(
        repo: Arc<dyn SubscriptionRepo>,
        processor: Arc<dyn PaymentProcessor>,
        plans: Arc<PlanCatalog>,
        reject_stale: bool,
    ) -> Self {
        Self {
            repo,
            processor,
            plans,
            reject_stale,
        }
    }

    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn apply(&self, event: &ReceivedEvent) -> AppResult<ReconcileOutcome> {
        match &event.kind {
            ProcessorEvent::CheckoutSessionCompleted(session) => {
                self.checkout_completed(event, session).await
            }
            ProcessorEvent::SubscriptionUpdated(sub) => self.subscription_updated(event, sub).await,
            ProcessorEvent::SubscriptionDeleted(sub) => self.subscription_deleted(event, sub).await,
            ProcessorEvent::InvoicePaymentSucceeded(invoice) => {
                self.invoice_status(event, invoice, SubscriptionStatus::Active)
                    .await
            }
            ProcessorEvent::InvoicePaymentFailed(invoice) => {
                self.invoice_status(event, invoice, SubscriptionStatus::PastDue)
                    .await
            }
            ProcessorEvent::Unrecognized(event_type) => {
                tracing::debug!(event_type, "Unhandled webhook event type");
                Ok(ReconcileOutcome::Ignored("unrecognized event type"))
            }
        }
    }

    async fn checkout_completed(
        &self,
        event: &ReceivedEvent,
        session: &CheckoutSession,
    ) -> AppResult<ReconcileOutcome> {
        let Some(subscription_ref) = &session.subscription else {
            tracing::debug!(session_id = %session.id, "Checkout session without subscription");
            return Ok(ReconcileOutcome::Ignored("checkout without subscription"));
        };

        let Some(user_id) = session.user_id() else {
            error!(
                session_id = %session.id,
                retryable = false,
                "Checkout session carries no user id, dropping"
            );
            return Ok(ReconcileOutcome::Dropped(format!(
                "checkout session {} has no user id",
                session.id
            )));
        };

        let fetched;
        let subscription = match subscription_ref.as_object() {
            Some(sub) => sub,
            None => {
                let sub_id = SubscriptionId::new(subscription_ref.id());
                // The user has paid; a refused lookup must be redelivered, not dropped
                fetched = self
                    .processor
                    .retrieve_subscription(&sub_id)
                    .await
                    .map_err(|e| match e {
                        AppError::ProcessorRejected(msg) => AppError::Processor(format!(
                            "Subscription {sub_id} of a completed checkout could not be read: {msg}"
                        )),
                        other => other,
                    })?;
                &fetched
            }
        };

        if SubscriptionStatus::from_processor(&subscription.status) == SubscriptionStatus::Canceled {
            info!(
                user_id = %user_id,
                subscription_id = %subscription.id,
                "Checkout completed for a subscription that is already canceled"
            );
            return Ok(ReconcileOutcome::Ignored("checkout for canceled subscription"));
        }

        let customer_id = session
            .customer_id()
            .unwrap_or_else(|| subscription.customer_id());
        let status = if session.is_unpaid() {
            SubscriptionStatus::Incomplete
        } else {
            SubscriptionStatus::Active
        };

        let patch = SubscriptionPatch {
            processor_customer_id: Some(customer_id),
            processor_subscription_id: Some(subscription.subscription_id()),
            status: Some(status),
            plan_identifier: self.plan_for(subscription),
            current_period_start: subscription.period_start(),
            current_period_end: subscription.period_end(),
            cancel_at_period_end: Some(false),
        };
        let guard = self.guard(WriteKind::Start, event, subscription.subscription_id());

        self.write(user_id, &patch, &guard).await
    }

    async fn subscription_updated(
        &self,
        event: &ReceivedEvent,
        sub: &ProcessorSubscription,
    ) -> AppResult<ReconcileOutcome> {
        let Some(record) = self
            .resolve(Some(&sub.subscription_id()), Some(&sub.customer_id()))
            .await?
        else {
            return Ok(self.no_record(sub.id.as_str()));
        };

        let patch = SubscriptionPatch {
            processor_customer_id: Some(sub.customer_id()),
            processor_subscription_id: Some(sub.subscription_id()),
            status: Some(SubscriptionStatus::from_processor(&sub.status)),
            plan_identifier: self.plan_for(sub),
            current_period_start: sub.period_start(),
            current_period_end: sub.period_end(),
            cancel_at_period_end: Some(sub.cancel_at_period_end),
        };
        let guard = self.guard(WriteKind::Mutation, event, sub.subscription_id());

        self.write(record.user_id, &patch, &guard).await
    }

    async fn subscription_deleted(
        &self,
        event: &ReceivedEvent,
        sub: &ProcessorSubscription,
    ) -> AppResult<ReconcileOutcome> {
        let Some(record) = self
            .resolve(Some(&sub.subscription_id()), Some(&sub.customer_id()))
            .await?
        else {
            return Ok(self.no_record(sub.id.as_str()));
        };

        let patch = SubscriptionPatch {
            processor_customer_id: Some(sub.customer_id()),
            processor_subscription_id: Some(sub.subscription_id()),
            ..SubscriptionPatch::status(SubscriptionStatus::Canceled)
        };
        let guard = self.guard(WriteKind::Cancellation, event, sub.subscription_id());

        self.write(record.user_id, &patch, &guard).await
    }

    async fn invoice_status(
        &self,
        event: &ReceivedEvent,
        invoice: &Invoice,
        status: SubscriptionStatus,
    ) -> AppResult<ReconcileOutcome> {
        let Some(sub_id) = invoice.subscription_id() else {
            tracing::debug!(invoice_id = %invoice.id, "Invoice not tied to a subscription");
            return Ok(ReconcileOutcome::Ignored("invoice without subscription"));
        };

        let Some(record) = self
            .resolve(Some(&sub_id), invoice.customer_id().as_ref())
            .await?
        else {
            return Ok(self.no_record(sub_id.as_str()));
        };

        // A failed first payment leaves the processor subscription incomplete;
        // only a subscription that was already paid can fall into grace.
        if status == SubscriptionStatus::PastDue && !record.status.has_access() {
            info!(
                user_id = %record.user_id,
                status = %record.status,
                "Payment failure for subscription that never had access"
            );
            return Ok(ReconcileOutcome::Ignored("payment failure before activation"));
        }

        let patch = SubscriptionPatch {
            processor_customer_id: invoice.customer_id(),
            ..SubscriptionPatch::status(status)
        };
        let guard = self.guard(WriteKind::Mutation, event, sub_id);

        self.write(record.user_id, &patch, &guard).await
    }

    /// Find the record an event refers to. Never matches on email.
    async fn resolve(
        &self,
        subscription_id: Option<&SubscriptionId>,
        customer_id: Option<&CustomerId>,
    ) -> AppResult<Option<SubscriptionRecord>> {
        if let Some(sub_id) = subscription_id {
            if let Some(record) = self.repo.get_by_processor_subscription_id(sub_id).await? {
                return Ok(Some(record));
            }
        }
        match customer_id {
            Some(customer_id) => self.repo.get_by_processor_customer_id(customer_id).await,
            None => Ok(None),
        }
    }

    fn no_record(&self, processor_ref: &str) -> ReconcileOutcome {
        warn!(
            processor_ref,
            retryable = false,
            "No subscription record for processor object, dropping"
        );
        ReconcileOutcome::Dropped(format!("no record for {processor_ref}"))
    }

    fn plan_for(&self, sub: &ProcessorSubscription) -> Option<String> {
        let price_id = sub.price_id()?;
        match self.plans.plan_for_price(price_id) {
            Some(plan) => Some(plan.to_string()),
            None => {
                error!(
                    price_id,
                    subscription_id = %sub.id,
                    "Price is not in the plan catalog, leaving plan unchanged"
                );
                None
            }
        }
    }

    fn guard(&self, kind: WriteKind, event: &ReceivedEvent, sub_id: SubscriptionId) -> WriteGuard {
        WriteGuard {
            kind,
            event_at: Some(event.created_at),
            subscription_id: Some(sub_id),
            reject_stale: self.reject_stale,
        }
    }

    async fn write(
        &self,
        user_id: UserId,
        patch: &SubscriptionPatch,
        guard: &WriteGuard,
    ) -> AppResult<ReconcileOutcome> {
        match self.repo.upsert_by_user(&user_id, patch, guard).await? {
            UpsertOutcome::Applied(record) => {
                info!(
                    user_id = %record.user_id,
                    status = %record.status,
                    write = guard.kind.as_str(),
                    "Subscription record updated"
                );
                Ok(ReconcileOutcome::Applied(user_id))
            }
            UpsertOutcome::Skipped(SkipReason::CustomerMismatch) => {
                error!(
                    user_id = %user_id,
                    customer_id = ?patch.processor_customer_id,
                    "Event would re-map user to a different processor customer, rejected"
                );
                Ok(ReconcileOutcome::Skipped(user_id, SkipReason::CustomerMismatch))
            }
            UpsertOutcome::Skipped(reason) => {
                info!(
                    user_id = %user_id,
                    reason = reason.as_str(),
                    write = guard.kind.as_str(),
                    "Event superseded by stored state, skipped"
                );
                Ok(ReconcileOutcome::Skipped(user_id, reason))
            }
        }
    }
}
