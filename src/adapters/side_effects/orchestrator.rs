//! SideEffectOrchestrator - bounded worker pool for post-commit work.
//!
//! The engine hands effects over with a non-blocking `try_send`; a
//! dispatcher task pulls them off the queue and runs each one on its own
//! task, gated by a semaphore sized to the worker count.
//!
//! ## Failure handling
//!
//! - Every attempt is bounded by `task_timeout`
//! - Notification attempts are written to the `NotificationLog` (queued,
//!   then sent or failed) so support can resend
//! - A full queue rejects the effect; rejected notifications are still
//!   logged as failed
//!
//! Nothing here is reported back to the webhook caller.
//!
//! ## Graceful Shutdown
//!
//! On shutdown the queue is closed, already queued effects are drained,
//! and the dispatcher waits for in-flight tasks before returning.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time;

use crate::domain::billing::{NotificationRecord, NotificationRequest, SideEffect};
use crate::domain::foundation::{DomainError, ErrorCode, PaymentId, Timestamp};
use crate::ports::{InvoiceGenerator, NotificationLog, Notifier, SideEffectScheduler};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum effects running at once.
    pub workers: usize,
    pub queue_capacity: usize,
    pub task_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            task_timeout: Duration::from_secs(30),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }
}

/// Collaborators shared by every worker task.
#[derive(Clone)]
struct Executor {
    invoices: Arc<dyn InvoiceGenerator>,
    notifier: Arc<dyn Notifier>,
    notifications: Arc<dyn NotificationLog>,
    task_timeout: Duration,
}

pub struct SideEffectOrchestrator {
    sender: mpsc::Sender<SideEffect>,
    notifications: Arc<dyn NotificationLog>,
}

impl SideEffectOrchestrator {
    /// Spawns the dispatcher and returns the scheduler handle plus the
    /// dispatcher's join handle.
    pub fn start(
        invoices: Arc<dyn InvoiceGenerator>,
        notifier: Arc<dyn Notifier>,
        notifications: Arc<dyn NotificationLog>,
        config: OrchestratorConfig,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let executor = Executor {
            invoices,
            notifier,
            notifications: notifications.clone(),
            task_timeout: config.task_timeout,
        };
        let handle = tokio::spawn(dispatch(receiver, executor, config.workers.max(1), shutdown));

        (
            Self {
                sender,
                notifications,
            },
            handle,
        )
    }

    fn record_rejected(&self, request: NotificationRequest, reason: &'static str) {
        let notifications = self.notifications.clone();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        runtime.spawn(async move {
            let now = Timestamp::now();
            let mut record = NotificationRecord::queued(request, now);
            record.record_attempt(Err(reason.to_string()), now);
            if let Err(err) = notifications.save(&record).await {
                tracing::warn!(
                    notification_id = %record.request.id,
                    error = %err,
                    "Could not record rejected notification"
                );
            }
        });
    }
}

impl SideEffectScheduler for SideEffectOrchestrator {
    fn schedule(&self, effect: SideEffect) -> Result<(), DomainError> {
        let label = effect.label();
        match self.sender.try_send(effect) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(effect)) => {
                if let SideEffect::Notify(request) = effect {
                    self.record_rejected(request, "side-effect queue full");
                }
                Err(DomainError::new(
                    ErrorCode::InternalError,
                    format!("side-effect queue full, dropped {}", label),
                ))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DomainError::new(
                ErrorCode::InternalError,
                format!("side-effect queue closed, dropped {}", label),
            )),
        }
    }
}

async fn dispatch(
    mut receiver: mpsc::Receiver<SideEffect>,
    executor: Executor,
    workers: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let permits = Arc::new(Semaphore::new(workers));

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            next = receiver.recv() => match next {
                Some(effect) => spawn_effect(&permits, &executor, effect).await,
                None => break,
            },
        }
    }

    receiver.close();

    while let Some(effect) = receiver.recv().await {
        spawn_effect(&permits, &executor, effect).await;
    }

    // All permits back means every spawned task has finished.
    let _ = permits.acquire_many(workers as u32).await;
    tracing::info!("Side-effect orchestrator stopped");
}

async fn spawn_effect(permits: &Arc<Semaphore>, executor: &Executor, effect: SideEffect) {
    let Ok(permit) = permits.clone().acquire_owned().await else {
        return;
    };
    let executor = executor.clone();
    tokio::spawn(async move {
        executor.run(effect).await;
        drop(permit);
    });
}

impl Executor {
    async fn run(&self, effect: SideEffect) {
        match effect {
            SideEffect::GenerateInvoice { payment_id } => self.generate_invoice(payment_id).await,
            SideEffect::Notify(request) => self.notify(request).await,
        }
    }

    async fn generate_invoice(&self, payment_id: PaymentId) {
        match time::timeout(self.task_timeout, self.invoices.generate_invoice(payment_id)).await {
            Ok(Ok(invoice)) => tracing::info!(
                payment_id = %payment_id,
                invoice = %invoice,
                "Invoice generated"
            ),
            Ok(Err(err)) => tracing::warn!(
                payment_id = %payment_id,
                error = %err,
                "Invoice generation failed"
            ),
            Err(_) => tracing::warn!(
                payment_id = %payment_id,
                timeout_secs = self.task_timeout.as_secs(),
                "Invoice generation timed out"
            ),
        }
    }

    async fn notify(&self, request: NotificationRequest) {
        let mut record = match self.notifications.find(request.id).await {
            Ok(Some(existing)) => existing,
            Ok(None) => {
                let record = NotificationRecord::queued(request.clone(), Timestamp::now());
                self.save(&record).await;
                record
            }
            Err(err) => {
                tracing::warn!(
                    notification_id = %request.id,
                    error = %err,
                    "Notification log unavailable"
                );
                NotificationRecord::queued(request.clone(), Timestamp::now())
            }
        };

        let result = match time::timeout(self.task_timeout, self.notifier.notify(&request)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(format!("timed out after {}s", self.task_timeout.as_secs())),
        };

        match &result {
            Ok(()) => tracing::info!(
                notification_id = %request.id,
                user_id = %request.user_id,
                template = %request.template,
                "Notification sent"
            ),
            Err(error) => tracing::warn!(
                notification_id = %request.id,
                user_id = %request.user_id,
                template = %request.template,
                error = %error,
                "Notification failed"
            ),
        }

        record.record_attempt(result, Timestamp::now());
        self.save(&record).await;
    }

    async fn save(&self, record: &NotificationRecord) {
        if let Err(err) = self.notifications.save(record).await {
            tracing::warn!(
                notification_id = %record.request.id,
                error = %err,
                "Could not record notification attempt"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryNotificationLog;
    use crate::adapters::side_effects::LoggingInvoiceGenerator;
    use crate::domain::billing::{NotificationStatus, NotificationTemplate};
    use crate::domain::foundation::UserId;
    use crate::ports::InvoiceRef;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyNotifier {
        calls: AtomicUsize,
        fail_first: usize,
    }

    #[async_trait]
    impl Notifier for FlakyNotifier {
        async fn notify(&self, _request: &NotificationRequest) -> Result<(), DomainError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(DomainError::new(ErrorCode::InternalError, "relay down"));
            }
            Ok(())
        }
    }

    struct SlowInvoices;

    #[async_trait]
    impl InvoiceGenerator for SlowInvoices {
        async fn generate_invoice(&self, payment_id: PaymentId) -> Result<InvoiceRef, DomainError> {
            time::sleep(Duration::from_secs(5)).await;
            Ok(InvoiceRef(payment_id.to_string()))
        }
    }

    fn start(
        invoices: Arc<dyn InvoiceGenerator>,
        notifier: Arc<dyn Notifier>,
        log: Arc<InMemoryNotificationLog>,
        config: OrchestratorConfig,
    ) -> (SideEffectOrchestrator, JoinHandle<()>, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let (orchestrator, handle) = SideEffectOrchestrator::start(invoices, notifier, log, config, rx);
        (orchestrator, handle, tx)
    }

    fn notice() -> NotificationRequest {
        NotificationRequest::new(UserId::new(), NotificationTemplate::PaymentReceived)
    }

    #[tokio::test]
    async fn failed_notification_is_logged_and_resend_reuses_record() {
        let log = Arc::new(InMemoryNotificationLog::new());
        let notifier = Arc::new(FlakyNotifier {
            calls: AtomicUsize::new(0),
            fail_first: 1,
        });
        let (orchestrator, handle, shutdown) = start(
            Arc::new(LoggingInvoiceGenerator),
            notifier,
            log.clone(),
            OrchestratorConfig::default().with_workers(1),
        );
        let request = notice();

        orchestrator.schedule(SideEffect::Notify(request.clone())).unwrap();
        time::sleep(Duration::from_millis(50)).await;
        let failed = log.find(request.id).await.unwrap().unwrap();
        assert_eq!(failed.status, NotificationStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("[INTERNAL_ERROR] relay down"));

        orchestrator.schedule(SideEffect::Notify(request.clone())).unwrap();
        shutdown.send(true).unwrap();
        handle.await.unwrap();

        let sent = log.find(request.id).await.unwrap().unwrap();
        assert_eq!(sent.status, NotificationStatus::Sent);
        assert_eq!(sent.attempts, 2);
        assert_eq!(log.len().await, 1);
    }

    #[tokio::test]
    async fn slow_invoice_is_bounded_by_task_timeout() {
        let log = Arc::new(InMemoryNotificationLog::new());
        let (orchestrator, handle, shutdown) = start(
            Arc::new(SlowInvoices),
            Arc::new(FlakyNotifier {
                calls: AtomicUsize::new(0),
                fail_first: 0,
            }),
            log,
            OrchestratorConfig::default().with_task_timeout(Duration::from_millis(100)),
        );

        orchestrator
            .schedule(SideEffect::GenerateInvoice {
                payment_id: PaymentId::new(),
            })
            .unwrap();
        shutdown.send(true).unwrap();

        time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("dispatcher waited for the slow invoice")
            .unwrap();
    }

    #[tokio::test]
    async fn full_queue_rejects_and_records_failed_notification() {
        let log = Arc::new(InMemoryNotificationLog::new());
        let (sender, _receiver) = mpsc::channel(1);
        let orchestrator = SideEffectOrchestrator {
            sender,
            notifications: log.clone(),
        };

        orchestrator.schedule(SideEffect::Notify(notice())).unwrap();
        let rejected = notice();
        let err = orchestrator
            .schedule(SideEffect::Notify(rejected.clone()))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalError);

        time::sleep(Duration::from_millis(20)).await;
        let record = log.find(rejected.id).await.unwrap().unwrap();
        assert_eq!(record.status, NotificationStatus::Failed);
    }
}
