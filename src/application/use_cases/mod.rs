pub mod billing;
pub mod reconcile;
pub mod webhook_ingest;
