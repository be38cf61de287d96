use std::net::SocketAddr;

use axum::http::HeaderValue;
use chrono::TimeDelta;
use env_helpers::{get_env, get_env_default};
use secrecy::SecretString;
use time::Duration;
use url::Url;

use crate::domain::entities::plan_catalog::PlanCatalog;

pub const DEFAULT_PROCESSOR_API_BASE: &str = "https://api.stripe.com/v1";

pub struct AppConfig {
    /// Verifies the bearer tokens issued by the application's auth provider.
    pub jwt_secret: SecretString,
    /// Origin every checkout/portal return URL must belong to.
    pub app_origin: Url,
    pub cors_origin: HeaderValue,
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub database_max_connections: u32,
    pub processor_secret_key: SecretString,
    pub webhook_signing_secret: SecretString,
    /// Overridable for a local processor mock.
    pub processor_api_base: Url,
    pub processor_timeout: std::time::Duration,
    pub webhook_tolerance: Duration,
    pub plan_catalog: PlanCatalog,
    /// Skip non-deletion events older than the newest applied event.
    pub reject_stale_events: bool,
    /// How long processed webhook event ids are kept for deduplication.
    pub processed_event_retention: TimeDelta,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let jwt_secret = SecretString::new(get_env::<String>("JWT_SECRET").into());
        let app_origin: Url = get_env("APP_ORIGIN");
        let cors_origin: HeaderValue =
            get_env_default("CORS_ORIGIN", String::from("http://localhost:3000"))
                .parse()
                .expect("CORS_ORIGIN must be a valid header value");
        let bind_addr: SocketAddr = get_env_default("BIND_ADDR", "127.0.0.1:3001".parse().unwrap());

        let database_url: String = get_env("DATABASE_URL");
        let database_max_connections: u32 = get_env_default("DATABASE_MAX_CONNECTIONS", 5);

        let processor_secret_key = SecretString::new(get_env::<String>("STRIPE_SECRET_KEY").into());
        let webhook_signing_secret =
            SecretString::new(get_env::<String>("STRIPE_WEBHOOK_SECRET").into());
        let processor_api_base: Url = get_env_default(
            "PROCESSOR_API_BASE",
            DEFAULT_PROCESSOR_API_BASE.parse().unwrap(),
        );
        let processor_timeout_secs: u64 = get_env_default("PROCESSOR_TIMEOUT_SECS", 10);
        let webhook_tolerance_secs: i64 = get_env_default("WEBHOOK_TOLERANCE_SECS", 300);

        let plan_catalog = PlanCatalog::parse(&get_env::<String>("PLAN_CATALOG"))
            .unwrap_or_else(|e| panic!("PLAN_CATALOG: {e}"));
        if plan_catalog.is_empty() {
            tracing::warn!("PLAN_CATALOG is empty, checkout will reject every price");
        }
        let processed_event_retention_days: i64 =
            get_env_default("PROCESSED_EVENT_RETENTION_DAYS", 30);

        let reject_stale_events: bool = get_env_default("REJECT_STALE_EVENTS", true);

        Self {
            jwt_secret,
            app_origin,
            cors_origin,
            bind_addr,
            database_url,
            database_max_connections,
            processor_secret_key,
            webhook_signing_secret,
            processor_api_base,
            processor_timeout: std::time::Duration::from_secs(processor_timeout_secs),
            webhook_tolerance: Duration::seconds(webhook_tolerance_secs),
            plan_catalog,
            reject_stale_events,
            processed_event_retention: TimeDelta::days(processed_event_retention_days),
        }
    }
}
