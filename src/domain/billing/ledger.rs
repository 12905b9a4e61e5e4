//! Idempotency ledger records.
//!
//! One row per gateway event id. A row is inserted as `processing` inside the
//! same transaction that applies the event, then finalized before commit.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Processing,
    Success,
    /// Event type the engine does not act on.
    Ignored,
    /// Prerequisite entity missing; kept for catch-up replay.
    Orphaned,
    /// Permanently failed but acknowledged.
    Failed,
}

impl EventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOutcome::Processing => "processing",
            EventOutcome::Success => "success",
            EventOutcome::Ignored => "ignored",
            EventOutcome::Orphaned => "orphaned",
            EventOutcome::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(EventOutcome::Processing),
            "success" => Some(EventOutcome::Success),
            "ignored" => Some(EventOutcome::Ignored),
            "orphaned" => Some(EventOutcome::Orphaned),
            "failed" => Some(EventOutcome::Failed),
            _ => None,
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, EventOutcome::Processing)
    }
}

impl std::fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub event_id: String,
    pub event_type: String,
    pub outcome: EventOutcome,
    pub result_summary: Option<String>,
    /// Key an orphan waits on (gateway subscription id, payment reference).
    pub correlation_key: Option<String>,
    pub payload: serde_json::Value,
    pub reserved_at: Timestamp,
    pub processed_at: Option<Timestamp>,
}

impl IdempotencyRecord {
    pub fn processing(
        event_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        now: Timestamp,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            outcome: EventOutcome::Processing,
            result_summary: None,
            correlation_key: None,
            payload,
            reserved_at: now,
            processed_at: None,
        }
    }

    /// A `processing` marker older than `stale_before` belongs to a crashed worker.
    pub fn is_stale(&self, stale_before: Timestamp) -> bool {
        self.outcome == EventOutcome::Processing && self.reserved_at <= stale_before
    }

    pub fn finish(&mut self, completion: &EventCompletion, now: Timestamp) {
        self.outcome = completion.outcome;
        self.result_summary = Some(completion.summary.clone());
        self.correlation_key = completion.correlation_key.clone();
        self.processed_at = Some(now);
    }
}

/// Final outcome written back onto a reserved record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCompletion {
    pub outcome: EventOutcome,
    pub summary: String,
    pub correlation_key: Option<String>,
}

impl EventCompletion {
    pub fn success(summary: impl Into<String>) -> Self {
        Self {
            outcome: EventOutcome::Success,
            summary: summary.into(),
            correlation_key: None,
        }
    }

    pub fn ignored(summary: impl Into<String>) -> Self {
        Self {
            outcome: EventOutcome::Ignored,
            summary: summary.into(),
            correlation_key: None,
        }
    }

    pub fn orphaned(summary: impl Into<String>, correlation_key: impl Into<String>) -> Self {
        Self {
            outcome: EventOutcome::Orphaned,
            summary: summary.into(),
            correlation_key: Some(correlation_key.into()),
        }
    }

    pub fn failed(summary: impl Into<String>) -> Self {
        Self {
            outcome: EventOutcome::Failed,
            summary: summary.into(),
            correlation_key: None,
        }
    }
}

/// Result of `reserve_event`.
#[derive(Debug, Clone, PartialEq)]
pub enum Reservation {
    /// This caller owns the event and must process it.
    Fresh,
    AlreadyProcessed(IdempotencyRecord),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processing_marker_goes_stale() {
        let reserved = Timestamp::now();
        let record = IdempotencyRecord::processing("evt_1", "invoice.paid", serde_json::Value::Null, reserved);

        assert!(!record.is_stale(reserved.add_days(-1)));
        assert!(record.is_stale(reserved.add_days(1)));
    }

    #[test]
    fn finished_records_never_go_stale() {
        let reserved = Timestamp::now();
        let mut record =
            IdempotencyRecord::processing("evt_1", "invoice.paid", serde_json::Value::Null, reserved);
        record.finish(&EventCompletion::orphaned("no sub", "sub_9"), reserved);

        assert!(!record.is_stale(reserved.add_days(1)));
        assert_eq!(record.correlation_key.as_deref(), Some("sub_9"));
        assert!(record.outcome.is_final());
    }
}
