//! PostgreSQL implementation of BillingStore.
//!
//! Each `BillingTransaction` wraps one sqlx transaction. Lookups lock the
//! rows they return with `FOR UPDATE`; the ledger reservation relies on the
//! primary key of `billing_event_ledger` so concurrent deliveries of the
//! same event block on each other and exactly one sees `Fresh`.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};

use crate::domain::billing::{
    EventCompletion, EventOutcome, IdempotencyRecord, Payment, Reservation, ServiceRequest,
    UserSubscription,
};
use crate::domain::foundation::{
    DomainError, ErrorCode, ServiceRequestId, SubscriptionId, Timestamp, UserId,
};
use crate::ports::{
    BillingStore, BillingTransaction, LedgerTransaction, PaymentLookup, PaymentTransaction,
    ServiceRequestTransaction, SubscriptionTransaction,
};

use super::rows::{db_error, LedgerRow, PaymentRow, ServiceRequestRow, SubscriptionRow};

const LEDGER_COLUMNS: &str = "event_id, event_type, outcome, result_summary, correlation_key, \
     payload, reserved_at, processed_at";

const PAYMENT_COLUMNS: &str = "id, user_id, subscription_id, service_request_id, amount, \
     currency, status, gateway_reference, paid_at, metadata, created_at, updated_at";

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, plan_id, status, billing_cycle, start_date, \
     end_date, gateway_subscription_id, created_at, updated_at";

pub struct PostgresBillingStore {
    pool: PgPool,
}

impl PostgresBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillingStore for PostgresBillingStore {
    async fn begin(&self) -> Result<Box<dyn BillingTransaction>, DomainError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;
        Ok(Box::new(PostgresTransaction { tx }))
    }

    async fn list_orphans(&self, limit: u32) -> Result<Vec<IdempotencyRecord>, DomainError> {
        let rows: Vec<LedgerRow> = sqlx::query_as(&format!(
            "SELECT {} FROM billing_event_ledger WHERE outcome = 'orphaned' \
             ORDER BY reserved_at ASC LIMIT $1",
            LEDGER_COLUMNS
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list orphan events"))?;

        rows.into_iter().map(IdempotencyRecord::try_from).collect()
    }

    async fn purge_ledger(&self, cutoff: Timestamp) -> Result<u64, DomainError> {
        let result = sqlx::query(
            r#"
            DELETE FROM billing_event_ledger
            WHERE outcome IN ('success', 'ignored', 'failed')
              AND processed_at <= $1
            "#,
        )
        .bind(cutoff.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to purge ledger"))?;

        Ok(result.rows_affected())
    }
}

pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTransaction for PostgresTransaction {
    async fn reserve_event(
        &mut self,
        record: IdempotencyRecord,
        stale_before: Timestamp,
    ) -> Result<Reservation, DomainError> {
        // Inserts a fresh marker or takes over an abandoned one in one statement.
        let claimed: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO billing_event_ledger (
                event_id, event_type, outcome, result_summary, correlation_key,
                payload, reserved_at, processed_at
            ) VALUES ($1, $2, 'processing', NULL, NULL, $3, $4, NULL)
            ON CONFLICT (event_id) DO UPDATE SET
                event_type = EXCLUDED.event_type,
                outcome = 'processing',
                result_summary = NULL,
                correlation_key = NULL,
                payload = EXCLUDED.payload,
                reserved_at = EXCLUDED.reserved_at,
                processed_at = NULL
            WHERE billing_event_ledger.outcome = 'processing'
              AND billing_event_ledger.reserved_at <= $5
            RETURNING event_id
            "#,
        )
        .bind(&record.event_id)
        .bind(&record.event_type)
        .bind(&record.payload)
        .bind(record.reserved_at.as_datetime())
        .bind(stale_before.as_datetime())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error("Failed to reserve event"))?;

        if claimed.is_some() {
            return Ok(Reservation::Fresh);
        }

        let existing = self.find_event(&record.event_id).await?.ok_or_else(|| {
            // Purged between the conflict and the read; a redelivery reserves it afresh.
            DomainError::database(format!(
                "Ledger record {} vanished after conflict",
                record.event_id
            ))
        })?;
        Ok(Reservation::AlreadyProcessed(existing))
    }

    async fn complete_event(
        &mut self,
        event_id: &str,
        completion: &EventCompletion,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE billing_event_ledger SET
                outcome = $2,
                result_summary = $3,
                correlation_key = $4,
                processed_at = $5
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .bind(completion.outcome.as_str())
        .bind(&completion.summary)
        .bind(&completion.correlation_key)
        .bind(now.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("Failed to complete event"))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::EventNotFound,
                format!("Ledger record {} not found", event_id),
            ));
        }
        Ok(())
    }

    async fn find_event(&mut self, event_id: &str) -> Result<Option<IdempotencyRecord>, DomainError> {
        let row: Option<LedgerRow> = sqlx::query_as(&format!(
            "SELECT {} FROM billing_event_ledger WHERE event_id = $1 FOR UPDATE",
            LEDGER_COLUMNS
        ))
        .bind(event_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error("Failed to find event"))?;

        row.map(IdempotencyRecord::try_from).transpose()
    }

    async fn find_orphans(
        &mut self,
        correlation_key: &str,
    ) -> Result<Vec<IdempotencyRecord>, DomainError> {
        let rows: Vec<LedgerRow> = sqlx::query_as(&format!(
            "SELECT {} FROM billing_event_ledger \
             WHERE outcome = $1 AND correlation_key = $2 \
             ORDER BY reserved_at ASC FOR UPDATE",
            LEDGER_COLUMNS
        ))
        .bind(EventOutcome::Orphaned.as_str())
        .bind(correlation_key)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error("Failed to find orphans"))?;

        rows.into_iter().map(IdempotencyRecord::try_from).collect()
    }
}

#[async_trait]
impl PaymentTransaction for PostgresTransaction {
    async fn find_payment(
        &mut self,
        lookup: PaymentLookup<'_>,
    ) -> Result<Option<Payment>, DomainError> {
        let select = format!("SELECT {} FROM payments", PAYMENT_COLUMNS);
        let tail = "ORDER BY created_at DESC LIMIT 1 FOR UPDATE";

        let query = match &lookup {
            PaymentLookup::Id(id) => {
                sqlx::query_as::<_, PaymentRow>(&format!("{} WHERE id = $1 {}", select, tail))
                    .bind(*id.as_uuid())
                    .fetch_optional(&mut *self.tx)
                    .await
            }
            PaymentLookup::GatewayReference(reference) => {
                sqlx::query_as(&format!("{} WHERE gateway_reference = $1 {}", select, tail))
                    .bind(*reference)
                    .fetch_optional(&mut *self.tx)
                    .await
            }
            PaymentLookup::Metadata { key, value } => {
                sqlx::query_as(&format!(
                    "{} WHERE metadata @> jsonb_build_object($1::text, $2::text) {}",
                    select, tail
                ))
                .bind(*key)
                .bind(*value)
                .fetch_optional(&mut *self.tx)
                .await
            }
            PaymentLookup::LatestForSubscription(id) => {
                sqlx::query_as(&format!("{} WHERE subscription_id = $1 {}", select, tail))
                    .bind(*id.as_uuid())
                    .fetch_optional(&mut *self.tx)
                    .await
            }
        };

        let row = query.map_err(|e| {
            DomainError::database(format!("Failed to find payment by {}: {}", lookup, e))
        })?;
        row.map(Payment::try_from).transpose()
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                id, user_id, subscription_id, service_request_id, amount, currency,
                status, gateway_reference, paid_at, metadata, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(*payment.id.as_uuid())
        .bind(*payment.user_id.as_uuid())
        .bind(payment.subscription_id.map(|id| *id.as_uuid()))
        .bind(payment.service_request_id.map(|id| *id.as_uuid()))
        .bind(payment.amount.amount())
        .bind(payment.amount.currency().as_str())
        .bind(payment.status.as_str())
        .bind(&payment.gateway_reference)
        .bind(payment.paid_at.map(|t| *t.as_datetime()))
        .bind(Json(&payment.metadata))
        .bind(payment.created_at.as_datetime())
        .bind(payment.updated_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("Failed to insert payment"))?;

        Ok(())
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE payments SET
                subscription_id = $2,
                service_request_id = $3,
                amount = $4,
                currency = $5,
                status = $6,
                gateway_reference = $7,
                paid_at = $8,
                metadata = $9,
                updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(*payment.id.as_uuid())
        .bind(payment.subscription_id.map(|id| *id.as_uuid()))
        .bind(payment.service_request_id.map(|id| *id.as_uuid()))
        .bind(payment.amount.amount())
        .bind(payment.amount.currency().as_str())
        .bind(payment.status.as_str())
        .bind(&payment.gateway_reference)
        .bind(payment.paid_at.map(|t| *t.as_datetime()))
        .bind(Json(&payment.metadata))
        .bind(payment.updated_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("Failed to update payment"))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::PaymentNotFound,
                format!("Payment {} not found", payment.id),
            ));
        }
        Ok(())
    }
}

impl PostgresTransaction {
    async fn fetch_subscription_rows(
        &mut self,
        query: sqlx::query::QueryAs<'_, Postgres, SubscriptionRow, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<UserSubscription>, DomainError> {
        let rows = query
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error("Failed to load subscriptions"))?;
        rows.into_iter().map(UserSubscription::try_from).collect()
    }
}

fn subscriptions_where(filter: &str) -> String {
    format!(
        "SELECT {} FROM user_subscriptions WHERE {}",
        SUBSCRIPTION_COLUMNS, filter
    )
}

#[async_trait]
impl SubscriptionTransaction for PostgresTransaction {
    async fn find_subscription(
        &mut self,
        id: SubscriptionId,
    ) -> Result<Option<UserSubscription>, DomainError> {
        let sql = subscriptions_where("id = $1 FOR UPDATE");
        let found = self
            .fetch_subscription_rows(sqlx::query_as(&sql).bind(*id.as_uuid()))
            .await?;
        Ok(found.into_iter().next())
    }

    async fn find_subscription_by_gateway_id(
        &mut self,
        gateway_subscription_id: &str,
    ) -> Result<Option<UserSubscription>, DomainError> {
        let sql = subscriptions_where("gateway_subscription_id = $1 FOR UPDATE");
        let found = self
            .fetch_subscription_rows(sqlx::query_as(&sql).bind(gateway_subscription_id))
            .await?;
        Ok(found.into_iter().next())
    }

    async fn find_pending_subscriptions(
        &mut self,
        user_id: UserId,
    ) -> Result<Vec<UserSubscription>, DomainError> {
        let sql = subscriptions_where(
            "user_id = $1 AND status = 'pending' ORDER BY created_at DESC FOR UPDATE",
        );
        self.fetch_subscription_rows(sqlx::query_as(&sql).bind(*user_id.as_uuid()))
            .await
    }

    async fn find_active_subscriptions(
        &mut self,
        user_id: UserId,
    ) -> Result<Vec<UserSubscription>, DomainError> {
        let sql = subscriptions_where(
            "user_id = $1 AND status = 'active' ORDER BY created_at DESC FOR UPDATE",
        );
        self.fetch_subscription_rows(sqlx::query_as(&sql).bind(*user_id.as_uuid()))
            .await
    }

    async fn find_due_for_expiry(
        &mut self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<UserSubscription>, DomainError> {
        let sql = subscriptions_where(
            "status = 'active' AND end_date IS NOT NULL AND end_date <= $1 \
             ORDER BY end_date ASC LIMIT $2 FOR UPDATE SKIP LOCKED",
        );
        self.fetch_subscription_rows(
            sqlx::query_as(&sql)
                .bind(*now.as_datetime())
                .bind(i64::from(limit)),
        )
        .await
    }

    async fn insert_subscription(
        &mut self,
        subscription: &UserSubscription,
    ) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO user_subscriptions (
                id, user_id, plan_id, status, billing_cycle, start_date, end_date,
                gateway_subscription_id, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(*subscription.id.as_uuid())
        .bind(*subscription.user_id.as_uuid())
        .bind(*subscription.plan_id.as_uuid())
        .bind(subscription.status.as_str())
        .bind(subscription.billing_cycle.as_str())
        .bind(subscription.start_date.map(|t| *t.as_datetime()))
        .bind(subscription.end_date.map(|t| *t.as_datetime()))
        .bind(&subscription.gateway_subscription_id)
        .bind(subscription.created_at.as_datetime())
        .bind(subscription.updated_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("Failed to insert subscription"))?;

        Ok(())
    }

    async fn update_subscription(
        &mut self,
        subscription: &UserSubscription,
    ) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE user_subscriptions SET
                plan_id = $2,
                status = $3,
                billing_cycle = $4,
                start_date = $5,
                end_date = $6,
                gateway_subscription_id = $7,
                updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(*subscription.id.as_uuid())
        .bind(*subscription.plan_id.as_uuid())
        .bind(subscription.status.as_str())
        .bind(subscription.billing_cycle.as_str())
        .bind(subscription.start_date.map(|t| *t.as_datetime()))
        .bind(subscription.end_date.map(|t| *t.as_datetime()))
        .bind(&subscription.gateway_subscription_id)
        .bind(subscription.updated_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("Failed to update subscription"))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::SubscriptionNotFound,
                format!("Subscription {} not found", subscription.id),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceRequestTransaction for PostgresTransaction {
    async fn find_service_request(
        &mut self,
        id: ServiceRequestId,
    ) -> Result<Option<ServiceRequest>, DomainError> {
        let row: Option<ServiceRequestRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, status, payment_id, requires_payment, updated_at
            FROM service_requests
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(*id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error("Failed to find service request"))?;

        row.map(ServiceRequest::try_from).transpose()
    }

    async fn update_service_request_status(
        &mut self,
        request: &ServiceRequest,
    ) -> Result<(), DomainError> {
        let result = sqlx::query(
            "UPDATE service_requests SET status = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(*request.id.as_uuid())
        .bind(request.status.as_str())
        .bind(request.updated_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("Failed to update service request"))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::ServiceRequestNotFound,
                format!("Service request {} not found", request.id),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl BillingTransaction for PostgresTransaction {
    async fn commit(self: Box<Self>) -> Result<(), DomainError> {
        self.tx
            .commit()
            .await
            .map_err(db_error("Failed to commit transaction"))
    }

    async fn rollback(self: Box<Self>) -> Result<(), DomainError> {
        self.tx
            .rollback()
            .await
            .map_err(db_error("Failed to roll back transaction"))
    }
}
