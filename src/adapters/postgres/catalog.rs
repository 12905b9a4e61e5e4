//! PostgreSQL plan catalog and notification log.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::domain::billing::NotificationRecord;
use crate::domain::foundation::{DomainError, NotificationId, PlanId};
use crate::ports::{NotificationLog, Plan, PlanCatalog};

use super::rows::{db_error, NotificationRow, PlanRow};

pub struct PostgresPlanCatalog {
    pool: PgPool,
}

impl PostgresPlanCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlanCatalog for PostgresPlanCatalog {
    async fn find_plan(&self, id: PlanId) -> Result<Option<Plan>, DomainError> {
        let row: Option<PlanRow> = sqlx::query_as(
            r#"
            SELECT id, name, billing_cycle, price_amount, currency, gateway_price_id
            FROM subscription_plans
            WHERE id = $1
            "#,
        )
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to find plan"))?;

        row.map(Plan::try_from).transpose()
    }

    async fn find_plan_by_gateway_price(&self, price_id: &str) -> Result<Option<Plan>, DomainError> {
        let row: Option<PlanRow> = sqlx::query_as(
            r#"
            SELECT id, name, billing_cycle, price_amount, currency, gateway_price_id
            FROM subscription_plans
            WHERE gateway_price_id = $1
            "#,
        )
        .bind(price_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to find plan by gateway price"))?;

        row.map(Plan::try_from).transpose()
    }
}

/// Notification attempts, keyed by notification id.
pub struct PostgresNotificationLog {
    pool: PgPool,
}

impl PostgresNotificationLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationLog for PostgresNotificationLog {
    async fn save(&self, record: &NotificationRecord) -> Result<(), DomainError> {
        let attempts = i32::try_from(record.attempts).unwrap_or(i32::MAX);
        sqlx::query(
            r#"
            INSERT INTO notification_log (
                id, user_id, template, context, status, attempts, last_error,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                attempts = EXCLUDED.attempts,
                last_error = EXCLUDED.last_error,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(*record.request.id.as_uuid())
        .bind(*record.request.user_id.as_uuid())
        .bind(record.request.template.as_str())
        .bind(Json(&record.request.context))
        .bind(record.status.as_str())
        .bind(attempts)
        .bind(&record.last_error)
        .bind(record.created_at.as_datetime())
        .bind(record.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to save notification"))?;

        Ok(())
    }

    async fn find(&self, id: NotificationId) -> Result<Option<NotificationRecord>, DomainError> {
        let row: Option<NotificationRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, template, context, status, attempts, last_error,
                   created_at, updated_at
            FROM notification_log
            WHERE id = $1
            "#,
        )
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to find notification"))?;

        row.map(NotificationRecord::try_from).transpose()
    }

    async fn list_failed(&self, limit: u32) -> Result<Vec<NotificationRecord>, DomainError> {
        let rows: Vec<NotificationRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, template, context, status, attempts, last_error,
                   created_at, updated_at
            FROM notification_log
            WHERE status = 'failed'
            ORDER BY updated_at DESC
            LIMIT $1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list failed notifications"))?;

        rows.into_iter().map(NotificationRecord::try_from).collect()
    }
}
