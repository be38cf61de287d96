use crate::{
    adapters::http::app_state::AppState,
    application::use_cases::{
        billing::BillingUseCases,
        reconcile::{ReconciliationEngine, SubscriptionRepo},
        webhook_ingest::{ProcessedEventRepo, WebhookIngestUseCases},
    },
    application::ports::payment_processor::PaymentProcessor,
    infra::{
        config::AppConfig, error::InfraError, http_client::try_build_client,
        postgres_persistence, stripe_client::StripeClient, webhook_signature::WebhookVerifier,
    },
};
use std::fs::File;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub async fn init_app_state() -> anyhow::Result<AppState> {
    let config = AppConfig::from_env();

    let postgres_arc = Arc::new(
        postgres_persistence(&config.database_url, config.database_max_connections).await?,
    );
    let subscription_repo = postgres_arc.clone() as Arc<dyn SubscriptionRepo>;
    let processed_repo = postgres_arc.clone() as Arc<dyn ProcessedEventRepo>;

    let http = try_build_client(config.processor_timeout).map_err(InfraError::HttpClient)?;
    let processor: Arc<dyn PaymentProcessor> = Arc::new(StripeClient::new(
        http,
        config.processor_secret_key.clone(),
        config.processor_api_base.clone(),
    ));

    let plans = Arc::new(config.plan_catalog.clone());

    let engine = ReconciliationEngine::new(
        subscription_repo.clone(),
        processor.clone(),
        plans.clone(),
        config.reject_stale_events,
    );
    let webhook_use_cases = WebhookIngestUseCases::new(engine, processed_repo);

    let billing_use_cases = BillingUseCases::new(
        subscription_repo,
        processor,
        plans,
        config.app_origin.clone(),
    );

    let webhook_verifier = WebhookVerifier::new(
        config.webhook_signing_secret.clone(),
        config.webhook_tolerance,
    );

    Ok(AppState {
        config: Arc::new(config),
        webhook_verifier: Arc::new(webhook_verifier),
        webhook_use_cases: Arc::new(webhook_use_cases),
        billing_use_cases: Arc::new(billing_use_cases),
    })
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "subscription_reconciler=debug,tower_http=debug".into());

    // Console (pretty logs)
    let console_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .pretty();

    // File (structured JSON logs); console only if the file cannot be created
    let json_layer = File::create("app.log").ok().map(|file| {
        fmt::layer()
            .json()
            .with_writer(file)
            .with_current_span(true)
            .with_span_list(true)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(json_layer)
        .try_init()
        .ok();
}
