use chrono::{DateTime, Utc};
use serde::Serialize;

use super::subscription::{SubscriptionRecord, SubscriptionStatus};

/// What the client is allowed to do, derived purely from the stored record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlement {
    pub status: SubscriptionStatus,
    pub plan_identifier: Option<String>,
    pub has_access: bool,
    pub in_grace_period: bool,
    pub cancel_at_period_end: bool,
    pub current_period_end: Option<DateTime<Utc>>,
}

impl Entitlement {
    pub fn from_record(record: Option<&SubscriptionRecord>) -> Self {
        let Some(record) = record else {
            return Self::none();
        };

        Self {
            status: record.status,
            plan_identifier: record.plan_identifier.clone(),
            has_access: record.status.has_access(),
            in_grace_period: record.status.is_grace_period(),
            cancel_at_period_end: record.cancel_at_period_end,
            current_period_end: record.current_period_end,
        }
    }

    pub fn none() -> Self {
        Self {
            status: SubscriptionStatus::None,
            plan_identifier: None,
            has_access: false,
            in_grace_period: false,
            cancel_at_period_end: false,
            current_period_end: None,
        }
    }
}
