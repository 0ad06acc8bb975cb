//! Dispatch engine — drives each notification through its delivery state machine.
//!
//! ```text
//! queued ──claim──▶ sending ──success──▶ sent
//!                     │  ▲
//!             failure │  │ retry after policy delay
//!                     ▼  │
//!                   sending ──attempts exhausted──▶ failed
//! ```
//!
//! Every notification gets its own tokio task. A shared semaphore caps how
//! many gateway calls run at once; a permit is held for the duration of one
//! attempt only, so a task sleeping between attempts never occupies a worker.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;
use uuid::Uuid;

use courier_common::config::{AppConfig, DispatchMode};
use courier_common::error::AppError;
use courier_common::types::{DeliveryStatus, NotificationRecord, NotificationRequest};

use crate::gateway::{DeliveryError, DeliveryGateway, build_gateway};
use crate::policy::{AttemptOutcome, RetryDecision, RetryPolicy, build_policy};
use crate::store::{NotificationStore, StatusCounts};

/// Default per-attempt delivery timeout.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of concurrent delivery attempts.
pub const DEFAULT_WORKER_CONCURRENCY: usize = 16;

/// Engine tuning knobs that are not part of the retry policy.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Upper bound for a single gateway call; exceeding it counts as a failed attempt.
    pub delivery_timeout: Duration,
    /// Maximum number of gateway calls in flight.
    pub worker_concurrency: usize,
    pub mode: DispatchMode,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
            mode: DispatchMode::Deferred,
        }
    }
}

impl From<&AppConfig> for DispatchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            delivery_timeout: config.delivery_timeout(),
            worker_concurrency: config.worker_concurrency,
            mode: config.dispatch_mode,
        }
    }
}

/// Result of a submission.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchTicket {
    /// `queued` snapshot in deferred mode, terminal snapshot in blocking mode.
    pub record: NotificationRecord,
    pub task_id: Uuid,
    pub mode: DispatchMode,
}

/// Point-in-time engine statistics.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub notifications: StatusCounts,
    pub active_tasks: usize,
    pub worker_concurrency: usize,
    pub available_workers: usize,
    pub shutting_down: bool,
}

struct EngineInner {
    store: NotificationStore,
    gateway: Arc<dyn DeliveryGateway>,
    policy: Arc<dyn RetryPolicy>,
    config: DispatchConfig,
    workers: Arc<Semaphore>,
    /// Ids that already have a dispatch task.
    scheduled: Mutex<HashSet<Uuid>>,
    tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

/// Accepts notifications and drives their delivery.
///
/// Cheap to clone; all clones share the same store and worker pool.
#[derive(Clone)]
pub struct DispatchEngine {
    inner: Arc<EngineInner>,
}

impl DispatchEngine {
    pub fn new(
        gateway: Arc<dyn DeliveryGateway>,
        policy: Arc<dyn RetryPolicy>,
        config: DispatchConfig,
    ) -> Result<Self, AppError> {
        if config.worker_concurrency == 0 {
            return Err(AppError::Config(
                "worker_concurrency must be at least 1".to_string(),
            ));
        }

        let permits = config.worker_concurrency;
        tracing::info!(
            gateway = gateway.name(),
            max_attempts = policy.max_attempts(),
            worker_concurrency = permits,
            delivery_timeout_ms = config.delivery_timeout.as_millis() as u64,
            mode = %config.mode,
            "Dispatch engine created"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                store: NotificationStore::new(),
                gateway,
                policy,
                workers: Arc::new(Semaphore::new(permits)),
                config,
                scheduled: Mutex::new(HashSet::new()),
                tracker: TaskTracker::new(),
                cancellation_token: CancellationToken::new(),
            }),
        })
    }

    /// Build an engine from application configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let policy = build_policy(config)?;
        let gateway = build_gateway(config);
        Self::new(gateway, policy, DispatchConfig::from(config))
    }

    pub fn mode(&self) -> DispatchMode {
        self.inner.config.mode
    }

    pub fn max_attempts(&self) -> u32 {
        self.inner.policy.max_attempts()
    }

    /// Validate a request, record it as `queued` and hand it to the dispatch loop.
    ///
    /// Delivery failures never surface here. In blocking mode a dispatch cut
    /// short by shutdown is `Unavailable`, since no terminal record exists.
    pub async fn submit(&self, request: NotificationRequest) -> Result<DispatchTicket, AppError> {
        let notification = request.validate()?;
        self.ensure_running()?;

        let record = NotificationRecord::new(notification);
        self.inner.store.put(record.clone())?;

        tracing::info!(
            notification_id = %record.id,
            user_id = %record.user_id,
            channel = %record.channel_type,
            "Notification accepted"
        );

        let (task_id, handle) = self.schedule(record.id)?;

        let record = match self.inner.config.mode {
            DispatchMode::Deferred => record,
            DispatchMode::Blocking => match handle.await {
                Ok(Some(settled)) if settled.status.is_terminal() => settled,
                Ok(Some(settled)) => {
                    return Err(AppError::Unavailable(format!(
                        "Dispatch engine shut down before notification {} settled (status {})",
                        settled.id, settled.status
                    )));
                }
                Ok(None) => {
                    return Err(AppError::Internal(format!(
                        "Notification {} vanished during dispatch",
                        record.id
                    )));
                }
                Err(e) => {
                    tracing::error!(notification_id = %record.id, error = %e, "Dispatch task failed");
                    self.get_by_id(record.id)?
                }
            },
        };

        Ok(DispatchTicket {
            record,
            task_id,
            mode: self.inner.config.mode,
        })
    }

    /// Start dispatching an existing `queued` record.
    ///
    /// A record is dispatched at most once; any further request is a
    /// `DuplicateDispatch` error.
    pub fn dispatch(&self, id: Uuid) -> Result<Uuid, AppError> {
        self.ensure_running()?;
        let (task_id, _handle) = self.schedule(id)?;
        Ok(task_id)
    }

    pub fn get_by_id(&self, id: Uuid) -> Result<NotificationRecord, AppError> {
        self.inner
            .store
            .get(id)
            .ok_or_else(|| AppError::NotFound(format!("Notification {} not found", id)))
    }

    /// All records for a user in creation order; empty when there are none.
    pub fn get_by_user(&self, user_id: &str) -> Vec<NotificationRecord> {
        self.inner.store.list_by_user(user_id)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            notifications: self.inner.store.status_counts(),
            active_tasks: self.inner.tracker.len(),
            worker_concurrency: self.inner.config.worker_concurrency,
            available_workers: self.inner.workers.available_permits(),
            shutting_down: self.inner.cancellation_token.is_cancelled(),
        }
    }

    /// Stop scheduling new attempts and wait for running tasks to exit.
    ///
    /// In-flight attempts finish or time out; pending retries are dropped and
    /// their records keep the state they had (`queued` or `sending`).
    pub async fn shutdown(&self) {
        if self.inner.cancellation_token.is_cancelled() {
            return;
        }

        tracing::info!(
            active_tasks = self.inner.tracker.len(),
            "Dispatch engine shutting down"
        );
        self.inner.cancellation_token.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        tracing::info!("Dispatch engine stopped");
    }

    fn ensure_running(&self) -> Result<(), AppError> {
        if self.inner.cancellation_token.is_cancelled() {
            return Err(AppError::Unavailable(
                "Dispatch engine is shutting down".to_string(),
            ));
        }
        Ok(())
    }

    fn schedule(
        &self,
        id: Uuid,
    ) -> Result<(Uuid, JoinHandle<Option<NotificationRecord>>), AppError> {
        {
            let mut scheduled = self.inner.scheduled.lock();
            let record = self.get_by_id(id)?;
            if record.status != DeliveryStatus::Queued || !scheduled.insert(id) {
                tracing::warn!(notification_id = %id, status = %record.status, "Duplicate dispatch rejected");
                return Err(AppError::DuplicateDispatch(id));
            }
        }

        let task_id = Uuid::new_v4();
        let span = tracing::info_span!("dispatch", notification_id = %id, task_id = %task_id);
        let inner = self.inner.clone();
        let handle = self
            .inner
            .tracker
            .spawn(async move { inner.run(id).await }.instrument(span));

        Ok((task_id, handle))
    }
}

impl EngineInner {
    /// The per-notification retry loop. Returns the final snapshot.
    async fn run(&self, id: Uuid) -> Option<NotificationRecord> {
        let max_attempts = self.policy.max_attempts().max(1);
        let mut attempt: u32 = 0;

        while attempt < max_attempts {
            let permit = tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => {
                    tracing::info!(attempt_count = attempt, "Dispatch cancelled while waiting for a worker");
                    break;
                }
                permit = self.workers.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let snapshot = if attempt == 0 {
                match self.store.claim(id) {
                    Ok(record) => record,
                    Err(e) => {
                        tracing::warn!(error = %e, "Could not claim notification");
                        break;
                    }
                }
            } else {
                self.store.get(id)?
            };

            attempt += 1;
            let result = self.attempt_once(&snapshot).await;
            drop(permit);

            let outcome = match &result {
                Ok(()) => AttemptOutcome::Success,
                Err(_) => AttemptOutcome::Failure,
            };
            let decision = match self.policy.decide(attempt, outcome) {
                RetryDecision::Retry { .. } if attempt >= max_attempts => {
                    RetryDecision::Terminal(DeliveryStatus::Failed)
                }
                decision => decision,
            };
            let status = decision.terminal_status().unwrap_or(DeliveryStatus::Sending);
            self.store.record_attempt(id, attempt, status)?;

            match decision {
                RetryDecision::Terminal(DeliveryStatus::Sent) => {
                    tracing::info!(attempt, "Notification delivered");
                    break;
                }
                RetryDecision::Terminal(status) => {
                    let error = result.err().map(|e| e.to_string()).unwrap_or_default();
                    tracing::warn!(attempt, %status, error = %error, "Notification delivery gave up");
                    break;
                }
                RetryDecision::Retry { delay } => {
                    if let Err(e) = &result {
                        tracing::warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Delivery attempt failed, retrying"
                        );
                    }

                    tokio::select! {
                        biased;
                        _ = self.cancellation_token.cancelled() => {
                            tracing::info!(attempt_count = attempt, "Dispatch cancelled before retry");
                            break;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.store.get(id)
    }

    /// One gateway call, bounded by the delivery timeout.
    ///
    /// The call runs on its own task so a panicking gateway only fails this
    /// attempt instead of taking the whole dispatch loop down.
    async fn attempt_once(&self, record: &NotificationRecord) -> Result<(), DeliveryError> {
        let timeout = self.config.delivery_timeout;
        let gateway = self.gateway.clone();
        let record = record.clone();

        let mut call = tokio::spawn(async move { gateway.deliver(&record).await });

        match tokio::time::timeout(timeout, &mut call).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(DeliveryError::Aborted(e.to_string())),
            Err(_) => {
                call.abort();
                Err(DeliveryError::Timeout(timeout))
            }
        }
    }
}
