use async_trait::async_trait;
use sqlx::Row;

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::use_cases::reconcile::SubscriptionRepo,
    domain::entities::subscription::{
        CustomerId, SubscriptionId, SubscriptionPatch, SubscriptionRecord, UpsertOutcome, UserId,
        WriteGuard,
    },
};

fn row_to_record(row: &sqlx::postgres::PgRow) -> SubscriptionRecord {
    SubscriptionRecord {
        user_id: row.get("user_id"),
        processor_customer_id: row.get("processor_customer_id"),
        processor_subscription_id: row.get("processor_subscription_id"),
        status: row.get("status"),
        plan_identifier: row.get("plan_identifier"),
        current_period_start: row.get("current_period_start"),
        current_period_end: row.get("current_period_end"),
        cancel_at_period_end: row.get("cancel_at_period_end"),
        last_event_at: row.get("last_event_at"),
        canceled_subscription_ids: row
            .get::<Vec<String>, _>("canceled_subscription_ids")
            .into_iter()
            .map(SubscriptionId)
            .collect(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const SELECT_COLS: &str = r#"
    user_id, processor_customer_id, processor_subscription_id, status,
    plan_identifier, current_period_start, current_period_end,
    cancel_at_period_end, last_event_at, canceled_subscription_ids,
    created_at, updated_at
"#;

/// Insert-or-merge in one statement. Patch fields bound as NULL keep the
/// stored value. The `WHERE` clause is the write guard: when it fails no row
/// is returned and nothing is written. A row whose merged status is
/// `canceled` adds its subscription id to `canceled_subscription_ids`.
///
/// $1 user_id, $2 customer, $3 subscription, $4 status, $5 plan,
/// $6 period start, $7 period end, $8 cancel flag, $9 event time,
/// $10 write kind, $11 guard generation, $12 reject stale
const GUARDED_UPSERT: &str = r#"
    INSERT INTO subscriptions AS s (
        user_id, processor_customer_id, processor_subscription_id, status,
        plan_identifier, current_period_start, current_period_end,
        cancel_at_period_end, last_event_at, canceled_subscription_ids,
        created_at, updated_at
    )
    VALUES (
        $1, $2, $3, COALESCE($4, 'none'::subscription_status),
        $5, $6, $7, COALESCE($8, FALSE), $9,
        CASE
            WHEN $4 = 'canceled'::subscription_status AND $3::text IS NOT NULL
            THEN ARRAY[$3::text]
            ELSE '{}'::text[]
        END,
        NOW(), NOW()
    )
    ON CONFLICT (user_id) DO UPDATE SET
        processor_customer_id = COALESCE(s.processor_customer_id, EXCLUDED.processor_customer_id),
        processor_subscription_id = COALESCE($3, s.processor_subscription_id),
        status = COALESCE($4, s.status),
        plan_identifier = COALESCE($5, s.plan_identifier),
        current_period_start = COALESCE($6, s.current_period_start),
        current_period_end = COALESCE($7, s.current_period_end),
        cancel_at_period_end = COALESCE($8, s.cancel_at_period_end),
        last_event_at = GREATEST(s.last_event_at, $9),
        canceled_subscription_ids = CASE
            WHEN COALESCE($4, s.status) = 'canceled'
                AND COALESCE($3, s.processor_subscription_id) IS NOT NULL
                AND NOT (COALESCE($3, s.processor_subscription_id) = ANY(s.canceled_subscription_ids))
            THEN array_append(s.canceled_subscription_ids, COALESCE($3, s.processor_subscription_id))
            ELSE s.canceled_subscription_ids
        END,
        updated_at = NOW()
    WHERE
        ($2::text IS NULL OR s.processor_customer_id IS NULL OR s.processor_customer_id = $2)
        AND (
            $10 = 'start'
            OR $11::text IS NULL
            OR s.processor_subscription_id IS NULL
            OR s.processor_subscription_id = $11
        )
        AND (
            $10 = 'cancellation'
            OR $11::text IS NULL
            OR NOT (
                $11 = ANY(s.canceled_subscription_ids)
                OR (s.status = 'canceled' AND s.processor_subscription_id IS NOT DISTINCT FROM $11)
            )
        )
        AND (
            $10 = 'cancellation'
            OR NOT $12
            OR $9::timestamptz IS NULL
            OR s.last_event_at IS NULL
            OR $9 >= s.last_event_at
        )
    RETURNING
        user_id, processor_customer_id, processor_subscription_id, status,
        plan_identifier, current_period_start, current_period_end,
        cancel_at_period_end, last_event_at, canceled_subscription_ids,
        created_at, updated_at
"#;

#[async_trait]
impl SubscriptionRepo for PostgresPersistence {
    async fn get_by_user(&self, user_id: &UserId) -> AppResult<Option<SubscriptionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1",
            SELECT_COLS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_record))
    }

    async fn get_by_processor_subscription_id(
        &self,
        subscription_id: &SubscriptionId,
    ) -> AppResult<Option<SubscriptionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE processor_subscription_id = $1",
            SELECT_COLS
        ))
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_record))
    }

    async fn get_by_processor_customer_id(
        &self,
        customer_id: &CustomerId,
    ) -> AppResult<Option<SubscriptionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE processor_customer_id = $1",
            SELECT_COLS
        ))
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_record))
    }

    async fn upsert_by_user(
        &self,
        user_id: &UserId,
        patch: &SubscriptionPatch,
        guard: &WriteGuard,
    ) -> AppResult<UpsertOutcome> {
        let row = sqlx::query(GUARDED_UPSERT)
            .bind(user_id)
            .bind(&patch.processor_customer_id)
            .bind(&patch.processor_subscription_id)
            .bind(patch.status)
            .bind(&patch.plan_identifier)
            .bind(patch.current_period_start)
            .bind(patch.current_period_end)
            .bind(patch.cancel_at_period_end)
            .bind(guard.event_at)
            .bind(guard.kind.as_str())
            .bind(&guard.subscription_id)
            .bind(guard.reject_stale)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::from)?;

        if let Some(row) = row {
            return Ok(UpsertOutcome::Applied(row_to_record(&row)));
        }

        // Guard rejected the write; report which rule against the current row.
        let existing = self.get_by_user(user_id).await?;
        match guard.check(existing.as_ref(), patch) {
            Err(reason) => Ok(UpsertOutcome::Skipped(reason)),
            Ok(()) => Err(AppError::Database(
                "Guarded upsert raced with a concurrent write".into(),
            )),
        }
    }
}
