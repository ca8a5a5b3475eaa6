//! Reconciler struct and its public operations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use kanal::AsyncSender;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ReconcilerConfig;
use crate::confirmation::ConfirmationSourceVariant;
use crate::error::EngineError;
use crate::ledger::LedgerVariant;
use crate::store::RecordStoreVariant;
use crate::traits::RecordStore;
use crate::types::{Confirmation, DeliveryRecord, DeliveryStatus, StatusEvent};

/// Smallest poll period a task will run with; tokio intervals reject zero.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Message handled by a delivery's own task, between poll cycles.
pub(crate) enum TaskCommand {
    Confirm {
        name: String,
        signature: Option<String>,
        reply: oneshot::Sender<Result<Confirmation, EngineError>>,
    },
    Cancel,
}

/// Live task for one delivery id.
pub(crate) struct TaskEntry {
    pub(crate) generation: u64,
    pub(crate) commands: mpsc::Sender<TaskCommand>,
    pub(crate) handle: JoinHandle<()>,
}

impl TaskEntry {
    fn is_live(&self) -> bool {
        !self.handle.is_finished()
    }
}

pub(crate) struct Shared {
    pub(crate) store: RecordStoreVariant,
    pub(crate) source: ConfirmationSourceVariant,
    pub(crate) ledger: LedgerVariant,
    pub(crate) config: ReconcilerConfig,
    pub(crate) events: Option<AsyncSender<StatusEvent>>,
    /// At most one entry, hence one task, per delivery id.
    pub(crate) tasks: Mutex<HashMap<String, TaskEntry>>,
    pub(crate) next_generation: AtomicU64,
    pub(crate) shutdown: watch::Sender<bool>,
}

/// Delivery reconciliation engine.
///
/// Owns one supervised task per delivery still in flight. Each task is the
/// only writer of its delivery's record, so polls, direct confirmations and
/// the ledger submission of one delivery never interleave. Cloning is cheap
/// and shares the engine.
#[derive(Clone)]
pub struct Reconciler {
    pub(crate) inner: Arc<Shared>,
}

impl Reconciler {
    pub fn new(
        store: RecordStoreVariant,
        source: ConfirmationSourceVariant,
        ledger: LedgerVariant,
        config: ReconcilerConfig,
    ) -> Self {
        Self::build(store, source, ledger, config, None)
    }

    /// Like [`Reconciler::new`], publishing a [`StatusEvent`] after every
    /// persisted status change.
    pub fn with_events(
        store: RecordStoreVariant,
        source: ConfirmationSourceVariant,
        ledger: LedgerVariant,
        config: ReconcilerConfig,
        events: AsyncSender<StatusEvent>,
    ) -> Self {
        Self::build(store, source, ledger, config, Some(events))
    }

    fn build(
        store: RecordStoreVariant,
        source: ConfirmationSourceVariant,
        ledger: LedgerVariant,
        config: ReconcilerConfig,
        events: Option<AsyncSender<StatusEvent>>,
    ) -> Self {
        let mut config = config;
        if config.poll_interval < MIN_POLL_INTERVAL {
            warn!(
                requested = ?config.poll_interval,
                using = ?MIN_POLL_INTERVAL,
                "poll interval below minimum, clamping"
            );
            config.poll_interval = MIN_POLL_INTERVAL;
        }
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Shared {
                store,
                source,
                ledger,
                config,
                events,
                tasks: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                shutdown,
            }),
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.inner.config
    }

    /// Register a delivery and start tracking it.
    ///
    /// Returns as soon as the record is stored. Re-registering an id that is
    /// already tracked leaves its task alone; re-registering a finalized id
    /// changes nothing.
    pub async fn register_delivery(
        &self,
        id: &str,
        confirmation_endpoint: &str,
        pharmacist: Option<&str>,
    ) -> Result<DeliveryRecord, EngineError> {
        if id.trim().is_empty() || confirmation_endpoint.trim().is_empty() {
            return Err(EngineError::InvalidInput("deliveryId & callback required"));
        }
        if self.is_shutting_down() {
            return Err(EngineError::ShuttingDown);
        }

        let registration = DeliveryRecord::new(
            id.to_string(),
            confirmation_endpoint.to_string(),
            pharmacist.filter(|p| !p.is_empty()).map(str::to_string),
        );
        let stored = self.inner.store.upsert(&registration).await?;

        if stored.confirmation_endpoint != confirmation_endpoint {
            warn!(
                id,
                stored = %stored.confirmation_endpoint,
                "confirmation endpoint is immutable, keeping the registered one"
            );
        }

        if stored.status.is_terminal() {
            debug!(id, status = %stored.status, "delivery already finalized");
            return Ok(stored);
        }

        let (_, spawned) = self.ensure_task(&stored)?;
        if spawned {
            info!(id, "tracking delivery");
        } else {
            debug!(id, "delivery already tracked");
        }
        Ok(stored)
    }

    /// Confirm a delivery directly, hash it and anchor it on the ledger.
    ///
    /// The work runs on the delivery's own task; this call waits for the
    /// outcome. A ledger failure is persisted before it is returned.
    pub async fn confirm_delivery(
        &self,
        id: &str,
        name: &str,
        signature: Option<&str>,
    ) -> Result<Confirmation, EngineError> {
        if id.trim().is_empty() || name.trim().is_empty() {
            return Err(EngineError::InvalidInput("deliveryId & name required"));
        }

        let record = self
            .inner
            .store
            .get(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        if record.status != DeliveryStatus::InTransit {
            return Err(EngineError::AlreadyFinalized {
                id: id.to_string(),
                status: record.status,
            });
        }

        let (commands, _) = self.ensure_task(&record)?;
        let (reply, answer) = oneshot::channel();
        let command = TaskCommand::Confirm {
            name: name.to_string(),
            signature: signature.filter(|s| !s.is_empty()).map(str::to_string),
            reply,
        };

        if commands.send(command).await.is_err() {
            return Err(self.unavailable(id).await);
        }
        match answer.await {
            Ok(result) => result,
            Err(_) => Err(self.unavailable(id).await),
        }
    }

    /// Point read of a delivery record.
    pub async fn get_delivery(&self, id: &str) -> Result<Option<DeliveryRecord>, EngineError> {
        Ok(self.inner.store.get(id).await?)
    }

    /// Ask the task tracking `id` to stop before its next cycle.
    ///
    /// No status is written. Returns whether a live task was signalled.
    pub fn cancel(&self, id: &str) -> bool {
        let tasks = self.lock_tasks();
        match tasks.get(id) {
            Some(entry) if entry.is_live() => entry.commands.try_send(TaskCommand::Cancel).is_ok(),
            _ => false,
        }
    }

    /// Restart tasks for every unfinished record in the store.
    ///
    /// Returns the number of tasks started.
    pub async fn resume(&self) -> Result<usize, EngineError> {
        if self.is_shutting_down() {
            return Err(EngineError::ShuttingDown);
        }

        let unfinished = self.inner.store.list_unfinished().await?;
        let mut started = 0;
        for record in &unfinished {
            let (_, spawned) = self.ensure_task(record)?;
            if spawned {
                started += 1;
            }
        }
        info!(started, found = unfinished.len(), "resumed unfinished deliveries");
        Ok(started)
    }

    /// Stop accepting work and wait for every task to wind down.
    ///
    /// A ledger submission already in flight is allowed to finish; no new
    /// submission is started.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);

        let handles: Vec<(String, JoinHandle<()>)> = self
            .lock_tasks()
            .drain()
            .map(|(id, entry)| (id, entry.handle))
            .collect();
        info!(tasks = handles.len(), "reconciler shutting down");

        for (id, handle) in handles {
            if let Err(e) = handle.await {
                warn!(id, error = %e, "delivery task ended abnormally");
            }
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Whether a live task currently tracks `id`.
    pub fn is_tracking(&self, id: &str) -> bool {
        self.lock_tasks().get(id).is_some_and(TaskEntry::is_live)
    }

    pub fn active_tasks(&self) -> usize {
        self.lock_tasks().values().filter(|e| e.is_live()).count()
    }

    pub(crate) fn lock_tasks(&self) -> MutexGuard<'_, HashMap<String, TaskEntry>> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn next_generation(&self) -> u64 {
        self.inner.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Explain why a task did not answer a command.
    async fn unavailable(&self, id: &str) -> EngineError {
        match self.inner.store.get(id).await {
            Ok(Some(record)) if record.status != DeliveryStatus::InTransit => {
                EngineError::AlreadyFinalized {
                    id: id.to_string(),
                    status: record.status,
                }
            }
            Ok(None) => EngineError::NotFound(id.to_string()),
            _ => EngineError::TaskUnavailable(id.to_string()),
        }
    }
}
