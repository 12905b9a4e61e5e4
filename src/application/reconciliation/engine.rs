//! ReconciliationEngine - one gateway event, one transaction.
//!
//! ```text
//! verify ─▶ reserve ─▶ route ─▶ handler ─▶ orphan catch-up ─▶ finalize ─▶ commit ─▶ schedule
//!                │                  │
//!                │                  └─ error: rollback, then record the outcome
//!                │                     (acknowledged) or surface it (transient)
//!                └─ duplicate: rollback, acknowledge
//! ```
//!
//! The ledger marker and every domain write share the transaction, so a
//! crash anywhere before commit leaves the pre-event state and the gateway
//! redelivers. Side effects are handed to the scheduler only after commit.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::domain::billing::{
    EventCompletion, EventOutcome, GatewayEvent, ReconciliationError, Reservation, SideEffect,
    WebhookVerifier,
};
use crate::domain::foundation::Timestamp;
use crate::ports::{
    BillingStore, BillingTransaction, PaymentResolvedHook, PlanCatalog, SideEffectScheduler,
};

use super::handler::{HandlerContext, HandlerOutcome, OutcomeStatus};
use super::ledger::IdempotencyLedger;
use super::router::EventRouter;
use super::unblocker::ServiceRequestUnblocker;

/// What happened to one delivery. Every variant is acknowledged to the gateway.
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    Processed {
        summary: String,
        /// Orphans replayed because this event unlocked them.
        replayed: usize,
    },
    Ignored {
        summary: String,
    },
    Orphaned {
        correlation_key: String,
        summary: String,
    },
    /// Already reserved by an earlier (or concurrent) delivery.
    Duplicate {
        outcome: EventOutcome,
    },
    /// Permanently failed; recorded and acknowledged.
    Rejected(ReconciliationError),
}

impl ProcessOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ProcessOutcome::Processed { .. } => "processed",
            ProcessOutcome::Ignored { .. } => "ignored",
            ProcessOutcome::Orphaned { .. } => "orphaned",
            ProcessOutcome::Duplicate { .. } => "duplicate",
            ProcessOutcome::Rejected(_) => "rejected",
        }
    }
}

/// Result of a support-triggered replay of a stored event.
#[derive(Debug, Clone)]
pub enum ReplayResult {
    NotFound,
    /// Only orphaned and failed events are replayed.
    NotReplayable(EventOutcome),
    Replayed(ProcessOutcome),
}

/// Handler outcome plus catch-up results, ready to finalize.
struct Applied {
    completion: EventCompletion,
    outcome: ProcessOutcome,
    side_effects: Vec<SideEffect>,
}

pub struct ReconciliationEngine {
    verifier: WebhookVerifier,
    store: Arc<dyn BillingStore>,
    plans: Arc<dyn PlanCatalog>,
    scheduler: Arc<dyn SideEffectScheduler>,
    unblocker: ServiceRequestUnblocker,
    router: EventRouter,
    ledger: IdempotencyLedger,
}

impl ReconciliationEngine {
    pub fn new(
        verifier: WebhookVerifier,
        store: Arc<dyn BillingStore>,
        plans: Arc<dyn PlanCatalog>,
        workflow: Arc<dyn PaymentResolvedHook>,
        scheduler: Arc<dyn SideEffectScheduler>,
    ) -> Self {
        Self {
            verifier,
            store,
            plans,
            scheduler,
            unblocker: ServiceRequestUnblocker::new(workflow),
            router: EventRouter::standard(),
            ledger: IdempotencyLedger::default(),
        }
    }

    pub fn with_router(mut self, router: EventRouter) -> Self {
        self.router = router;
        self
    }

    pub fn with_ledger(mut self, ledger: IdempotencyLedger) -> Self {
        self.ledger = ledger;
        self
    }

    /// Entry point for the webhook endpoint: raw body plus signature header.
    ///
    /// `Err` means the gateway must not get a 2xx (bad signature or
    /// transient failure). A correctly signed body that does not parse is
    /// acknowledged without touching the ledger.
    pub async fn handle_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<ProcessOutcome, ReconciliationError> {
        match self.verifier.verify(body, signature, Timestamp::now()) {
            Ok(event) => self.process(event).await,
            Err(err @ ReconciliationError::MalformedEvent(_)) => {
                tracing::warn!(error = %err, "Signed webhook body could not be parsed");
                Ok(ProcessOutcome::Rejected(err))
            }
            Err(err) => {
                tracing::warn!(error = %err, "Webhook signature rejected");
                Err(err)
            }
        }
    }

    /// Applies a verified event exactly once.
    #[tracing::instrument(
        name = "reconcile",
        skip_all,
        fields(event_id = %event.id, event_type = %event.event_type)
    )]
    pub async fn process(&self, event: GatewayEvent) -> Result<ProcessOutcome, ReconciliationError> {
        let now = Timestamp::now();
        let mut tx = self.store.begin().await?;

        let reservation = self.ledger.check_and_reserve(tx.as_mut(), &event, now).await?;
        if let Reservation::AlreadyProcessed(existing) = reservation {
            tx.rollback().await?;
            return Ok(ProcessOutcome::Duplicate {
                outcome: existing.outcome,
            });
        }

        let applied = match self.apply(tx.as_mut(), &event, now).await {
            Ok(applied) => applied,
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "Rollback after handler failure failed");
                }
                return self.record_failure(&event, err, now).await;
            }
        };
        if let Err(err) = tx.complete_event(&event.id, &applied.completion, now).await {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!(error = %rollback, "Rollback after finalize failure failed");
            }
            return self.record_failure(&event, err.into(), now).await;
        }
        tx.commit().await?;
        self.schedule(applied.side_effects);
        Ok(applied.outcome)
    }

    /// Re-runs a stored orphaned or failed event (support operation).
    pub async fn replay(&self, event_id: &str) -> Result<ReplayResult, ReconciliationError> {
        let now = Timestamp::now();
        let mut tx = self.store.begin().await?;

        let Some(record) = tx.find_event(event_id).await? else {
            tx.rollback().await?;
            return Ok(ReplayResult::NotFound);
        };
        if !matches!(record.outcome, EventOutcome::Orphaned | EventOutcome::Failed) {
            tx.rollback().await?;
            return Ok(ReplayResult::NotReplayable(record.outcome));
        }
        let event = GatewayEvent::from_payload(&record.payload)?;

        match self.apply(tx.as_mut(), &event, now).await {
            Ok(applied) => {
                tx.complete_event(&event.id, &applied.completion, now).await?;
                tx.commit().await?;
                self.schedule(applied.side_effects);
                tracing::info!(event_id, outcome = applied.outcome.label(), "Event replayed");
                Ok(ReplayResult::Replayed(applied.outcome))
            }
            Err(err) => {
                tx.rollback().await?;
                if err.is_retryable() {
                    return Err(err);
                }
                tracing::warn!(event_id, error = %err, "Replay rejected; ledger record left unchanged");
                Ok(ReplayResult::Replayed(ProcessOutcome::Rejected(err)))
            }
        }
    }

    async fn apply(
        &self,
        tx: &mut dyn BillingTransaction,
        event: &GatewayEvent,
        now: Timestamp,
    ) -> Result<Applied, ReconciliationError> {
        let handler = self.router.route(event.kind());
        let mut ctx = HandlerContext {
            tx,
            unblocker: &self.unblocker,
            plans: self.plans.as_ref(),
            now,
        };

        let outcome = handler.handle(event, &mut ctx).await?;
        match &outcome.status {
            OutcomeStatus::Applied => tracing::info!(
                handler = handler.name(),
                summary = %outcome.summary,
                "Event applied"
            ),
            OutcomeStatus::Ignored => tracing::info!(
                handler = handler.name(),
                summary = %outcome.summary,
                "Event acknowledged without domain changes"
            ),
            OutcomeStatus::Orphaned { correlation_key } => tracing::warn!(
                reconciliation = "orphan",
                handler = handler.name(),
                correlation_key = %correlation_key,
                summary = %outcome.summary,
                "Event kept for catch-up"
            ),
        }

        let HandlerOutcome {
            status,
            summary,
            mut side_effects,
            unlocked_keys,
        } = outcome;
        let replayed = self
            .catch_up(&mut ctx, &event.id, unlocked_keys, &mut side_effects)
            .await?;

        let (completion, outcome) = match status {
            OutcomeStatus::Applied => (
                EventCompletion::success(summary.clone()),
                ProcessOutcome::Processed { summary, replayed },
            ),
            OutcomeStatus::Ignored => (
                EventCompletion::ignored(summary.clone()),
                ProcessOutcome::Ignored { summary },
            ),
            OutcomeStatus::Orphaned { correlation_key } => (
                EventCompletion::orphaned(summary.clone(), correlation_key.clone()),
                ProcessOutcome::Orphaned {
                    correlation_key,
                    summary,
                },
            ),
        };
        Ok(Applied {
            completion,
            outcome,
            side_effects,
        })
    }

    /// Replays orphans waiting on any unlocked key, inside the same
    /// transaction. Replays may unlock further keys.
    async fn catch_up(
        &self,
        ctx: &mut HandlerContext<'_>,
        origin_event_id: &str,
        keys: Vec<String>,
        side_effects: &mut Vec<SideEffect>,
    ) -> Result<usize, ReconciliationError> {
        let mut queue: VecDeque<String> = keys.into();
        let mut seen_keys: HashSet<String> = HashSet::new();
        let mut visited: HashSet<String> = HashSet::from([origin_event_id.to_string()]);
        let mut replayed = 0;

        while let Some(key) = queue.pop_front() {
            if !seen_keys.insert(key.clone()) {
                continue;
            }
            for orphan in ctx.tx.find_orphans(&key).await? {
                if !visited.insert(orphan.event_id.clone()) {
                    continue;
                }
                let completion = match GatewayEvent::from_payload(&orphan.payload) {
                    Ok(event) => {
                        let handler = self.router.route(event.kind());
                        match handler.handle(&event, ctx).await {
                            Ok(outcome) => {
                                side_effects.extend(outcome.side_effects);
                                queue.extend(outcome.unlocked_keys);
                                replayed += 1;
                                match outcome.status {
                                    OutcomeStatus::Orphaned { correlation_key } => {
                                        EventCompletion::orphaned(outcome.summary, correlation_key)
                                    }
                                    OutcomeStatus::Ignored => EventCompletion::ignored(outcome.summary),
                                    OutcomeStatus::Applied => EventCompletion::success(format!(
                                        "{} (caught up via {})",
                                        outcome.summary, key
                                    )),
                                }
                            }
                            Err(err) if err.is_retryable() => return Err(err),
                            Err(err) => {
                                log_rejection(&orphan.event_id, &err);
                                EventCompletion::failed(format!("catch-up: {}", err))
                            }
                        }
                    }
                    Err(err) => EventCompletion::failed(format!("stored payload unreadable: {}", err)),
                };

                tracing::info!(
                    orphan_event_id = %orphan.event_id,
                    correlation_key = %key,
                    outcome = %completion.outcome,
                    "Orphan caught up"
                );
                ctx.tx
                    .complete_event(&orphan.event_id, &completion, ctx.now)
                    .await?;
            }
        }
        Ok(replayed)
    }

    /// Persists an acknowledged failure in a fresh transaction, or surfaces
    /// a transient one so the gateway redelivers.
    async fn record_failure(
        &self,
        event: &GatewayEvent,
        err: ReconciliationError,
        now: Timestamp,
    ) -> Result<ProcessOutcome, ReconciliationError> {
        if !err.is_acknowledged() {
            tracing::error!(error = %err, "Transient failure; event left for redelivery");
            return Err(err);
        }
        log_rejection(&event.id, &err);

        let mut tx = self.store.begin().await?;
        let reservation = self.ledger.check_and_reserve(tx.as_mut(), event, now).await?;
        if let Reservation::AlreadyProcessed(existing) = reservation {
            tx.rollback().await?;
            return Ok(ProcessOutcome::Duplicate {
                outcome: existing.outcome,
            });
        }

        let (completion, outcome) = match &err {
            ReconciliationError::OrphanEvent { correlation_key } => (
                EventCompletion::orphaned(err.to_string(), correlation_key.clone()),
                ProcessOutcome::Orphaned {
                    correlation_key: correlation_key.clone(),
                    summary: err.to_string(),
                },
            ),
            _ => (
                EventCompletion::failed(err.to_string()),
                ProcessOutcome::Rejected(err.clone()),
            ),
        };
        tx.complete_event(&event.id, &completion, now).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    fn schedule(&self, side_effects: Vec<SideEffect>) {
        for effect in side_effects {
            let label = effect.label();
            if let Err(err) = self.scheduler.schedule(effect) {
                tracing::warn!(side_effect = label, error = %err, "Side effect not scheduled");
            }
        }
    }
}

fn log_rejection(event_id: &str, err: &ReconciliationError) {
    match err {
        ReconciliationError::InvalidTransition(_) => tracing::error!(
            alert = true,
            event_id,
            error = %err,
            "Invalid transition; event acknowledged"
        ),
        ReconciliationError::OrphanEvent { correlation_key } => tracing::warn!(
            reconciliation = "orphan",
            event_id,
            correlation_key = %correlation_key,
            "Orphan event acknowledged"
        ),
        _ => tracing::warn!(
            event_id,
            kind = err.kind(),
            error = %err,
            "Event rejected; acknowledged"
        ),
    }
}
