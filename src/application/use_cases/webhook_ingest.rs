use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{error, info, instrument, warn};

use crate::app_error::{AppResult, is_retryable_error};
use crate::application::use_cases::reconcile::{ReconcileOutcome, ReconciliationEngine};
use crate::domain::entities::{
    processor_event::{EventParseError, ReceivedEvent},
    subscription::UserId,
};

/// Log of processor events that were fully handled.
#[async_trait]
pub trait ProcessedEventRepo: Send + Sync {
    async fn is_processed(&self, event_id: &str) -> AppResult<bool>;
    /// Recording an id twice is not an error.
    async fn record(&self, event: &ProcessedEvent) -> AppResult<()>;
    /// Delete entries received before `cutoff`. Returns how many were removed.
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedEvent {
    pub event_id: String,
    pub event_type: String,
    pub user_id: Option<UserId>,
    pub outcome: String,
    pub received_at: DateTime<Utc>,
}

/// What the gateway did with one delivery. Every variant is acknowledged
/// with 200; failures worth a redelivery are returned as errors instead.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Reconciled(ReconcileOutcome),
    Duplicate,
    Malformed,
}

#[derive(Clone)]
pub struct WebhookIngestUseCases {
    engine: ReconciliationEngine,
    processed: Arc<dyn ProcessedEventRepo>,
}

impl WebhookIngestUseCases {
    pub fn new(engine: ReconciliationEngine, processed: Arc<dyn ProcessedEventRepo>) -> Self {
        Self { engine, processed }
    }

    /// Handle one delivery whose signature has already been verified.
    #[instrument(skip_all)]
    pub async fn ingest(&self, body: &[u8]) -> AppResult<IngestOutcome> {
        let event = match ReceivedEvent::parse(body) {
            Ok(event) => event,
            Err(EventParseError::Payload {
                event_id,
                event_type,
                source,
            }) => {
                error!(
                    event_id,
                    event_type,
                    error = %source,
                    retryable = false,
                    "Malformed webhook payload, dropping"
                );
                self.mark_processed(&event_id, &event_type, None, "malformed")
                    .await;
                return Ok(IngestOutcome::Malformed);
            }
            Err(e) => {
                warn!(error = %e, retryable = false, "Unparseable webhook envelope, dropping");
                return Ok(IngestOutcome::Malformed);
            }
        };

        if self.processed.is_processed(&event.id).await? {
            tracing::debug!(event_id = %event.id, "Webhook event already processed");
            return Ok(IngestOutcome::Duplicate);
        }

        let outcome = match self.engine.apply(&event).await {
            Ok(outcome) => outcome,
            Err(e) if is_retryable_error(&e) => return Err(e),
            Err(e) => {
                warn!(
                    error = %e,
                    event_id = %event.id,
                    event_type = %event.event_type,
                    retryable = false,
                    "Webhook event cannot be applied, dropping"
                );
                ReconcileOutcome::Dropped(e.to_string())
            }
        };

        self.mark_processed(
            &event.id,
            &event.event_type,
            outcome.user_id().cloned(),
            outcome.as_str(),
        )
        .await;

        Ok(IngestOutcome::Reconciled(outcome))
    }

    /// Forget processed events older than `retention`. Deliveries older than
    /// the processor's retry window are never redelivered.
    #[instrument(skip(self))]
    pub async fn prune_processed(&self, retention: TimeDelta) -> AppResult<u64> {
        let removed = self.processed.prune_before(Utc::now() - retention).await?;
        if removed > 0 {
            info!(removed, "Pruned processed webhook events");
        }
        Ok(removed)
    }

    // Non-critical: handlers stay idempotent without the log.
    async fn mark_processed(
        &self,
        event_id: &str,
        event_type: &str,
        user_id: Option<UserId>,
        outcome: &str,
    ) {
        let entry = ProcessedEvent {
            event_id: event_id.to_string(),
            event_type: event_type.to_string(),
            user_id,
            outcome: outcome.to_string(),
            received_at: Utc::now(),
        };
        if let Err(e) = self.processed.record(&entry).await {
            warn!(error = %e, event_id, "Failed to record processed webhook event");
        }
    }
}
