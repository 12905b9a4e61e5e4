//! IdempotencyLedger - reservation policy over the ledger table.
//!
//! The store guarantees atomicity (unique constraint on the event id); this
//! type decides what counts as stale and builds the `processing` marker.
//!
//! ## Crash recovery
//!
//! A worker that dies mid-transaction leaves no marker at all (the insert
//! rolls back with everything else). A marker can only be left behind in
//! `processing` by a store that committed the reservation separately, so
//! markers older than `processing_timeout` are taken over as `Fresh`.

use std::time::Duration;

use crate::domain::billing::{GatewayEvent, IdempotencyRecord, ReconciliationError, Reservation};
use crate::domain::foundation::Timestamp;
use crate::ports::BillingTransaction;

/// Default age after which a `processing` marker is considered abandoned.
pub const DEFAULT_PROCESSING_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct IdempotencyLedger {
    processing_timeout: Duration,
}

impl Default for IdempotencyLedger {
    fn default() -> Self {
        Self::new(DEFAULT_PROCESSING_TIMEOUT)
    }
}

impl IdempotencyLedger {
    pub fn new(processing_timeout: Duration) -> Self {
        Self { processing_timeout }
    }

    pub fn processing_timeout(&self) -> Duration {
        self.processing_timeout
    }

    /// Inserts the `processing` marker for `event` inside `tx`.
    pub async fn check_and_reserve(
        &self,
        tx: &mut dyn BillingTransaction,
        event: &GatewayEvent,
        now: Timestamp,
    ) -> Result<Reservation, ReconciliationError> {
        let marker = IdempotencyRecord::processing(
            event.id.clone(),
            event.event_type.clone(),
            event.to_payload(),
            now,
        );
        let stale_before = now.minus(self.processing_timeout);
        let reservation = tx.reserve_event(marker, stale_before).await?;

        if let Reservation::AlreadyProcessed(existing) = &reservation {
            tracing::info!(
                event_id = %event.id,
                event_type = %event.event_type,
                outcome = %existing.outcome,
                "Duplicate delivery short-circuited"
            );
        }
        Ok(reservation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryBillingStore;
    use crate::domain::billing::{EventCompletion, EventOutcome};
    use crate::ports::BillingStore;
    use serde_json::json;

    fn event(id: &str) -> GatewayEvent {
        GatewayEvent::from_payload(&json!({
            "id": id,
            "type": "invoice.paid",
            "created": 1_700_000_000,
            "data": { "object": { "id": "in_1" } }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn first_reservation_is_fresh_second_is_duplicate() {
        let store = InMemoryBillingStore::new();
        let ledger = IdempotencyLedger::default();
        let now = Timestamp::now();

        let mut tx = store.begin().await.unwrap();
        let first = ledger.check_and_reserve(tx.as_mut(), &event("evt_1"), now).await.unwrap();
        tx.complete_event("evt_1", &EventCompletion::success("done"), now)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let second = ledger.check_and_reserve(tx.as_mut(), &event("evt_1"), now).await.unwrap();

        assert_eq!(first, Reservation::Fresh);
        match second {
            Reservation::AlreadyProcessed(record) => assert_eq!(record.outcome, EventOutcome::Success),
            other => panic!("expected duplicate, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn abandoned_marker_is_taken_over() {
        let store = InMemoryBillingStore::new();
        let ledger = IdempotencyLedger::new(Duration::from_secs(60));
        let then = Timestamp::now();

        let mut tx = store.begin().await.unwrap();
        ledger.check_and_reserve(tx.as_mut(), &event("evt_2"), then).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let soon = ledger
            .check_and_reserve(tx.as_mut(), &event("evt_2"), then.add_seconds(30))
            .await
            .unwrap();
        assert!(matches!(soon, Reservation::AlreadyProcessed(_)));
        tx.rollback().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let later = ledger
            .check_and_reserve(tx.as_mut(), &event("evt_2"), then.add_seconds(120))
            .await
            .unwrap();
        assert_eq!(later, Reservation::Fresh);
    }
}
