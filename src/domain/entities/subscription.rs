use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Identifiers
// ============================================================================

/// Opaque, stable identifier of an application user. Owner key of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a customer at the payment processor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct CustomerId(pub String);

impl CustomerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CustomerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a recurring-billing object at the payment processor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct SubscriptionId(pub String);

impl SubscriptionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    #[default]
    None,
    Active,
    PastDue,
    Canceled,
    Incomplete,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::None => "none",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Incomplete => "incomplete",
        }
    }

    /// Convert from a processor subscription status string.
    ///
    /// Unknown values map to `Incomplete` - never grant access by default.
    pub fn from_processor(s: &str) -> Self {
        match s {
            "active" | "trialing" => SubscriptionStatus::Active,
            "past_due" | "unpaid" | "paused" => SubscriptionStatus::PastDue,
            "canceled" | "incomplete_expired" => SubscriptionStatus::Canceled,
            "incomplete" => SubscriptionStatus::Incomplete,
            _ => SubscriptionStatus::Incomplete,
        }
    }

    /// Returns true if the user may use paid features.
    pub fn has_access(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::PastDue)
    }

    /// Returns true if user is in a grace period (past due but not yet canceled)
    pub fn is_grace_period(&self) -> bool {
        matches!(self, SubscriptionStatus::PastDue)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Record
// ============================================================================

/// The durable billing state of one application user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionRecord {
    pub user_id: UserId,
    pub processor_customer_id: Option<CustomerId>,
    pub processor_subscription_id: Option<SubscriptionId>,
    pub status: SubscriptionStatus,
    pub plan_identifier: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    /// Creation time of the newest processor event applied to this record.
    pub last_event_at: Option<DateTime<Utc>>,
    /// Every subscription generation of this user that reached `canceled`.
    #[serde(skip)]
    pub canceled_subscription_ids: Vec<SubscriptionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionRecord {
    /// Empty record for a user that has never reached checkout.
    pub fn empty(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            processor_customer_id: None,
            processor_subscription_id: None,
            status: SubscriptionStatus::None,
            plan_identifier: None,
            current_period_start: None,
            current_period_end: None,
            cancel_at_period_end: false,
            last_event_at: None,
            canceled_subscription_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// True once `subscription_id` has been canceled for this user.
    pub fn is_canceled_generation(&self, subscription_id: &SubscriptionId) -> bool {
        self.canceled_subscription_ids.contains(subscription_id)
            || (self.status == SubscriptionStatus::Canceled
                && self.processor_subscription_id.as_ref() == Some(subscription_id))
    }

    /// Merge the fields present in `patch`. Absent fields are left untouched.
    ///
    /// The customer id is only written when none is stored yet; callers must
    /// have run [`WriteGuard::check`] first.
    pub fn apply(&mut self, patch: &SubscriptionPatch, event_at: Option<DateTime<Utc>>, now: DateTime<Utc>) {
        if self.processor_customer_id.is_none() {
            if let Some(customer) = &patch.processor_customer_id {
                self.processor_customer_id = Some(customer.clone());
            }
        }
        if let Some(sub_id) = &patch.processor_subscription_id {
            self.processor_subscription_id = Some(sub_id.clone());
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(plan) = &patch.plan_identifier {
            self.plan_identifier = Some(plan.clone());
        }
        if let Some(start) = patch.current_period_start {
            self.current_period_start = Some(start);
        }
        if let Some(end) = patch.current_period_end {
            self.current_period_end = Some(end);
        }
        if let Some(flag) = patch.cancel_at_period_end {
            self.cancel_at_period_end = flag;
        }
        if self.status == SubscriptionStatus::Canceled {
            if let Some(sub_id) = &self.processor_subscription_id {
                if !self.canceled_subscription_ids.contains(sub_id) {
                    self.canceled_subscription_ids.push(sub_id.clone());
                }
            }
        }
        self.last_event_at = match (self.last_event_at, event_at) {
            (Some(stored), Some(incoming)) => Some(stored.max(incoming)),
            (stored, incoming) => stored.or(incoming),
        };
        self.updated_at = now;
    }
}

/// Field-level partial update. `None` means "leave the stored value alone".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionPatch {
    pub processor_customer_id: Option<CustomerId>,
    pub processor_subscription_id: Option<SubscriptionId>,
    pub status: Option<SubscriptionStatus>,
    pub plan_identifier: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: Option<bool>,
}

impl SubscriptionPatch {
    pub fn status(status: SubscriptionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

// ============================================================================
// Write guard
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// A completed checkout starting (or replaying) a billing generation.
    Start,
    /// Any non-terminal change within a generation.
    Mutation,
    /// Terminal cancellation. Always applies to its own generation.
    Cancellation,
}

impl WriteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteKind::Start => "start",
            WriteKind::Mutation => "mutation",
            WriteKind::Cancellation => "cancellation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The write would re-map the user to a different processor customer.
    CustomerMismatch,
    /// The write belongs to a subscription other than the stored one.
    OtherGeneration,
    /// The write's generation was already canceled.
    TerminalGeneration,
    /// The event is older than the newest event already applied.
    Stale,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::CustomerMismatch => "customer_mismatch",
            SkipReason::OtherGeneration => "other_generation",
            SkipReason::TerminalGeneration => "terminal_generation",
            SkipReason::Stale => "stale",
        }
    }
}

/// Conditions a write must satisfy against the stored record. Stores evaluate
/// them atomically with the write itself.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteGuard {
    pub kind: WriteKind,
    /// Creation time of the originating event; `None` for writes relayed from
    /// a user request rather than a processor event.
    pub event_at: Option<DateTime<Utc>>,
    /// The generation this write is about.
    pub subscription_id: Option<SubscriptionId>,
    pub reject_stale: bool,
}

impl WriteGuard {
    /// Decide whether `patch` may be applied on top of `existing`.
    pub fn check(
        &self,
        existing: Option<&SubscriptionRecord>,
        patch: &SubscriptionPatch,
    ) -> Result<(), SkipReason> {
        let Some(existing) = existing else {
            return Ok(());
        };

        if let (Some(stored), Some(incoming)) = (
            &existing.processor_customer_id,
            &patch.processor_customer_id,
        ) {
            if stored != incoming {
                return Err(SkipReason::CustomerMismatch);
            }
        }

        let same_generation = match (&existing.processor_subscription_id, &self.subscription_id) {
            (Some(stored), Some(incoming)) => stored == incoming,
            _ => false,
        };

        if self.kind != WriteKind::Start
            && existing.processor_subscription_id.is_some()
            && self.subscription_id.is_some()
            && !same_generation
        {
            return Err(SkipReason::OtherGeneration);
        }

        if self.kind == WriteKind::Cancellation {
            return Ok(());
        }

        // Covers replays of an older generation's checkout as well
        if let Some(incoming) = &self.subscription_id {
            if existing.is_canceled_generation(incoming) {
                return Err(SkipReason::TerminalGeneration);
            }
        }

        if self.reject_stale {
            if let (Some(stored), Some(incoming)) = (existing.last_event_at, self.event_at) {
                if incoming < stored {
                    return Err(SkipReason::Stale);
                }
            }
        }

        Ok(())
    }
}

/// Result of a guarded upsert.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Applied(SubscriptionRecord),
    Skipped(SkipReason),
}

/// Convert a Unix timestamp to a UTC datetime
pub fn timestamp_to_utc(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        timestamp_to_utc(secs).unwrap()
    }

    fn record(status: SubscriptionStatus, sub: &str, last_event: Option<i64>) -> SubscriptionRecord {
        let mut r = SubscriptionRecord::empty(UserId::new("u1"), at(1_700_000_000));
        r.processor_customer_id = Some(CustomerId::new("cus_1"));
        r.processor_subscription_id = Some(SubscriptionId::new(sub));
        r.status = status;
        r.last_event_at = last_event.map(at);
        r
    }

    fn guard(kind: WriteKind, sub: &str, event_at: i64) -> WriteGuard {
        WriteGuard {
            kind,
            event_at: Some(at(event_at)),
            subscription_id: Some(SubscriptionId::new(sub)),
            reject_stale: true,
        }
    }

    #[test]
    fn processor_status_mapping_never_grants_unknown() {
        assert_eq!(SubscriptionStatus::from_processor("active"), SubscriptionStatus::Active);
        assert_eq!(SubscriptionStatus::from_processor("trialing"), SubscriptionStatus::Active);
        assert_eq!(SubscriptionStatus::from_processor("unpaid"), SubscriptionStatus::PastDue);
        assert_eq!(
            SubscriptionStatus::from_processor("incomplete_expired"),
            SubscriptionStatus::Canceled
        );
        assert_eq!(
            SubscriptionStatus::from_processor("something_new"),
            SubscriptionStatus::Incomplete
        );
        assert!(!SubscriptionStatus::from_processor("something_new").has_access());
    }

    #[test]
    fn access_and_grace() {
        assert!(SubscriptionStatus::Active.has_access());
        assert!(SubscriptionStatus::PastDue.has_access());
        assert!(SubscriptionStatus::PastDue.is_grace_period());
        assert!(!SubscriptionStatus::Canceled.has_access());
        assert!(!SubscriptionStatus::None.has_access());
        assert!(!SubscriptionStatus::Incomplete.has_access());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&SubscriptionStatus::PastDue).unwrap();
        assert_eq!(json, "\"past_due\"");
    }

    #[test]
    fn guard_allows_missing_record() {
        let g = guard(WriteKind::Mutation, "sub_1", 10);
        assert_eq!(g.check(None, &SubscriptionPatch::default()), Ok(()));
    }

    #[test]
    fn guard_rejects_customer_remap() {
        let existing = record(SubscriptionStatus::Active, "sub_1", None);
        let patch = SubscriptionPatch {
            processor_customer_id: Some(CustomerId::new("cus_other")),
            ..SubscriptionPatch::default()
        };
        let g = guard(WriteKind::Start, "sub_2", 10);
        assert_eq!(g.check(Some(&existing), &patch), Err(SkipReason::CustomerMismatch));
    }

    #[test]
    fn guard_keeps_cancellation_terminal() {
        let existing = record(SubscriptionStatus::Canceled, "sub_1", Some(5));
        let patch = SubscriptionPatch::status(SubscriptionStatus::Active);
        let g = guard(WriteKind::Mutation, "sub_1", 100);
        assert_eq!(g.check(Some(&existing), &patch), Err(SkipReason::TerminalGeneration));

        // Replayed checkout of the same generation cannot revive it either
        let g = guard(WriteKind::Start, "sub_1", 100);
        assert_eq!(g.check(Some(&existing), &patch), Err(SkipReason::TerminalGeneration));
    }

    #[test]
    fn guard_allows_new_generation_after_cancellation() {
        let existing = record(SubscriptionStatus::Canceled, "sub_1", Some(5));
        let patch = SubscriptionPatch::status(SubscriptionStatus::Active);
        let g = guard(WriteKind::Start, "sub_2", 100);
        assert_eq!(g.check(Some(&existing), &patch), Ok(()));
    }

    #[test]
    fn guard_rejects_other_generation_mutation() {
        let existing = record(SubscriptionStatus::Active, "sub_2", None);
        let g = guard(WriteKind::Cancellation, "sub_1", 100);
        assert_eq!(
            g.check(Some(&existing), &SubscriptionPatch::status(SubscriptionStatus::Canceled)),
            Err(SkipReason::OtherGeneration)
        );
    }

    #[test]
    fn guard_rejects_stale_but_accepts_equal_timestamp() {
        let existing = record(SubscriptionStatus::Active, "sub_1", Some(50));
        let patch = SubscriptionPatch::status(SubscriptionStatus::PastDue);

        let older = guard(WriteKind::Mutation, "sub_1", 49);
        assert_eq!(older.check(Some(&existing), &patch), Err(SkipReason::Stale));

        let same = guard(WriteKind::Mutation, "sub_1", 50);
        assert_eq!(same.check(Some(&existing), &patch), Ok(()));

        let mut lenient = older.clone();
        lenient.reject_stale = false;
        assert_eq!(lenient.check(Some(&existing), &patch), Ok(()));
    }

    #[test]
    fn cancellation_ignores_staleness() {
        let existing = record(SubscriptionStatus::Active, "sub_1", Some(50));
        let g = guard(WriteKind::Cancellation, "sub_1", 10);
        assert_eq!(
            g.check(Some(&existing), &SubscriptionPatch::status(SubscriptionStatus::Canceled)),
            Ok(())
        );
    }

    #[test]
    fn apply_merges_only_present_fields_and_keeps_newest_event_time() {
        let mut r = record(SubscriptionStatus::Active, "sub_1", Some(50));
        r.plan_identifier = Some("pro".into());
        r.current_period_end = Some(at(2_000));

        r.apply(
            &SubscriptionPatch::status(SubscriptionStatus::Canceled),
            Some(at(10)),
            at(3_000),
        );

        assert_eq!(r.status, SubscriptionStatus::Canceled);
        assert_eq!(r.plan_identifier.as_deref(), Some("pro"));
        assert_eq!(r.current_period_end, Some(at(2_000)));
        assert_eq!(r.last_event_at, Some(at(50)));
        assert_eq!(r.updated_at, at(3_000));
    }

    #[test]
    fn apply_never_overwrites_customer() {
        let mut r = record(SubscriptionStatus::Active, "sub_1", None);
        let patch = SubscriptionPatch {
            processor_customer_id: Some(CustomerId::new("cus_other")),
            ..SubscriptionPatch::default()
        };
        r.apply(&patch, None, at(1));
        assert_eq!(r.processor_customer_id, Some(CustomerId::new("cus_1")));
    }

    #[test]
    fn cancellation_remembers_generation() {
        let mut r = record(SubscriptionStatus::Active, "sub_1", None);
        let patch = SubscriptionPatch {
            processor_subscription_id: Some(SubscriptionId::new("sub_1")),
            ..SubscriptionPatch::status(SubscriptionStatus::Canceled)
        };
        r.apply(&patch, Some(at(10)), at(10));
        r.apply(&patch, Some(at(11)), at(11));

        assert_eq!(r.canceled_subscription_ids, vec![SubscriptionId::new("sub_1")]);
    }

    #[test]
    fn start_for_an_earlier_canceled_generation_is_terminal_without_staleness() {
        let mut r = record(SubscriptionStatus::Active, "sub_2", Some(500));
        r.canceled_subscription_ids = vec![SubscriptionId::new("sub_1")];
        let patch = SubscriptionPatch {
            processor_subscription_id: Some(SubscriptionId::new("sub_1")),
            ..SubscriptionPatch::status(SubscriptionStatus::Active)
        };
        let mut start = guard(WriteKind::Start, "sub_1", 600);
        start.reject_stale = false;

        assert_eq!(start.check(Some(&r), &patch), Err(SkipReason::TerminalGeneration));

        // A fresh generation still starts
        let fresh = guard(WriteKind::Start, "sub_3", 600);
        assert_eq!(fresh.check(Some(&r), &SubscriptionPatch::default()), Ok(()));
    }
}
