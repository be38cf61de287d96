pub mod entitlement;
pub mod plan_catalog;
pub mod processor_event;
pub mod subscription;
