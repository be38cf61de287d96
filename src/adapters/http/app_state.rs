use std::sync::Arc;

use crate::{
    application::use_cases::{billing::BillingUseCases, webhook_ingest::WebhookIngestUseCases},
    infra::{config::AppConfig, webhook_signature::WebhookVerifier},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub webhook_verifier: Arc<WebhookVerifier>,
    pub webhook_use_cases: Arc<WebhookIngestUseCases>,
    pub billing_use_cases: Arc<BillingUseCases>,
}
