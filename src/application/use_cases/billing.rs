use std::sync::Arc;

use tracing::{info, instrument, warn};
use url::Url;

use crate::app_error::{AppError, AppResult};
use crate::application::ports::payment_processor::{
    CheckoutCustomer, CheckoutSessionRequest, HostedSession, PaymentProcessor,
};
use crate::application::use_cases::reconcile::SubscriptionRepo;
use crate::application::validators::{is_valid_email, is_valid_processor_id, is_valid_return_url};
use crate::domain::entities::{
    entitlement::Entitlement,
    plan_catalog::PlanCatalog,
    subscription::{
        CustomerId, SubscriptionId, SubscriptionPatch, SubscriptionRecord, UpsertOutcome, UserId,
        WriteGuard, WriteKind,
    },
};

#[derive(Debug, Clone)]
pub struct CheckoutInput {
    pub price_id: String,
    pub user_id: UserId,
    pub email: String,
    pub return_url: String,
}

/// Creates hosted checkout and portal sessions and relays user-initiated
/// changes to the processor. Never grants access itself.
#[derive(Clone)]
pub struct BillingUseCases {
    repo: Arc<dyn SubscriptionRepo>,
    processor: Arc<dyn PaymentProcessor>,
    plans: Arc<PlanCatalog>,
    app_origin: Url,
}

impl BillingUseCases {
    pub fn new(
        repo: Arc<dyn SubscriptionRepo>,
        processor: Arc<dyn PaymentProcessor>,
        plans: Arc<PlanCatalog>,
        app_origin: Url,
    ) -> Self {
        Self {
            repo,
            processor,
            plans,
            app_origin,
        }
    }

    #[instrument(skip(self, input), fields(user_id = %caller, price_id = %input.price_id))]
    pub async fn create_checkout(
        &self,
        caller: &UserId,
        input: CheckoutInput,
    ) -> AppResult<HostedSession> {
        ensure_owner(caller, &input.user_id)?;

        if !self.plans.contains_price(&input.price_id) {
            return Err(AppError::InvalidInput("Unknown price".into()));
        }
        if !is_valid_email(&input.email) {
            return Err(AppError::InvalidInput("Invalid email".into()));
        }
        let (success_url, cancel_url) = self.checkout_urls(&input.return_url)?;

        // Reuse the stored customer so the user never maps to a second one
        let customer = match self.repo.get_by_user(caller).await? {
            Some(SubscriptionRecord {
                processor_customer_id: Some(customer_id),
                ..
            }) => CheckoutCustomer::Existing(customer_id),
            _ => CheckoutCustomer::Email(input.email.trim().to_string()),
        };

        let session = self
            .processor
            .create_checkout_session(&CheckoutSessionRequest {
                user_id: caller.clone(),
                price_id: input.price_id,
                customer,
                success_url,
                cancel_url,
            })
            .await?;

        info!(session_id = %session.id, "Checkout session created");
        Ok(session)
    }

    #[instrument(skip(self, return_url), fields(user_id = %caller))]
    pub async fn create_portal(
        &self,
        caller: &UserId,
        customer_id: &CustomerId,
        return_url: &str,
    ) -> AppResult<HostedSession> {
        if !is_valid_return_url(return_url, &self.app_origin) {
            return Err(AppError::InvalidInput("Invalid return URL".into()));
        }

        let record = self.repo.get_by_user(caller).await?.ok_or(AppError::NotFound)?;
        if record.processor_customer_id.as_ref() != Some(customer_id) {
            warn!(customer_id = %customer_id, "Portal requested for a customer the caller does not own");
            return Err(AppError::Forbidden);
        }

        self.processor
            .create_portal_session(customer_id, return_url)
            .await
    }

    /// Schedule cancellation at period end. Status is left to the
    /// processor's deletion event.
    #[instrument(skip(self), fields(user_id = %caller))]
    pub async fn cancel(
        &self,
        caller: &UserId,
        user_id: &UserId,
        subscription_id: &SubscriptionId,
    ) -> AppResult<SubscriptionRecord> {
        ensure_owner(caller, user_id)?;
        if !is_valid_processor_id(subscription_id.as_str(), "sub_") {
            return Err(AppError::InvalidInput("Invalid subscription id".into()));
        }

        let record = self.repo.get_by_user(caller).await?.ok_or(AppError::Forbidden)?;
        if record.processor_subscription_id.as_ref() != Some(subscription_id) {
            warn!(subscription_id = %subscription_id, "Cancel requested for a subscription the caller does not own");
            return Err(AppError::Forbidden);
        }
        if !record.status.has_access() {
            return Err(AppError::InvalidInput("Subscription is not active".into()));
        }

        self.processor.cancel_at_period_end(subscription_id).await?;

        let patch = SubscriptionPatch {
            cancel_at_period_end: Some(true),
            ..SubscriptionPatch::default()
        };
        let guard = WriteGuard {
            kind: WriteKind::Mutation,
            event_at: None,
            subscription_id: Some(subscription_id.clone()),
            reject_stale: false,
        };

        match self.repo.upsert_by_user(caller, &patch, &guard).await? {
            UpsertOutcome::Applied(record) => {
                info!(subscription_id = %subscription_id, "Cancellation scheduled at period end");
                Ok(record)
            }
            UpsertOutcome::Skipped(reason) => {
                // A processor event overtook us; its state is authoritative
                info!(reason = reason.as_str(), "Cancel flag superseded by stored state");
                self.repo.get_by_user(caller).await?.ok_or(AppError::NotFound)
            }
        }
    }

    #[instrument(skip(self), fields(user_id = %caller))]
    pub async fn get_subscription(
        &self,
        caller: &UserId,
        user_id: &UserId,
    ) -> AppResult<Option<SubscriptionRecord>> {
        ensure_owner(caller, user_id)?;
        self.repo.get_by_user(user_id).await
    }

    #[instrument(skip(self), fields(user_id = %caller))]
    pub async fn get_entitlement(&self, caller: &UserId) -> AppResult<Entitlement> {
        let record = self.repo.get_by_user(caller).await?;
        Ok(Entitlement::from_record(record.as_ref()))
    }

    fn checkout_urls(&self, return_url: &str) -> AppResult<(String, String)> {
        if !is_valid_return_url(return_url, &self.app_origin) {
            return Err(AppError::InvalidInput("Invalid return URL".into()));
        }
        let base = Url::parse(return_url)
            .map_err(|_| AppError::InvalidInput("Invalid return URL".into()))?;

        let mut success = base.clone();
        success.query_pairs_mut().append_pair("checkout", "success");
        let mut cancel = base;
        cancel.query_pairs_mut().append_pair("checkout", "canceled");

        Ok((success.into(), cancel.into()))
    }
}

fn ensure_owner(caller: &UserId, requested: &UserId) -> AppResult<()> {
    if caller != requested {
        warn!(caller = %caller, requested = %requested, "Caller acted on another user's billing");
        return Err(AppError::Forbidden);
    }
    Ok(())
}
