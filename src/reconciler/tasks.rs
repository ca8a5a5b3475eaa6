//! Per-delivery task orchestration with tokio::spawn. The loop only
//! schedules; each step lives in a `*_once` helper so it can be exercised on
//! its own.

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::core::{Reconciler, TaskCommand, TaskEntry};
use crate::crypto::{derive_hash, HashInput};
use crate::error::{EngineError, LedgerError, TransitionError};
use crate::traits::{ConfirmationSource, LedgerClient, RecordStore};
use crate::types::{
    Confirmation, ConfirmedVia, DeliveredAt, DeliveredFields, DeliveryRecord, DeliveryStatus,
    DeliveryUpdate, LedgerSubmission, StatusEvent,
};

const COMMAND_BUFFER: usize = 8;

/// Whether a delivery task keeps running after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskStep {
    Continue,
    Finished,
}

impl Reconciler {
    /// Return the command channel of the live task for `record.id`, spawning
    /// the task first if there is none. The bool reports whether a task was
    /// spawned by this call.
    pub(crate) fn ensure_task(
        &self,
        record: &DeliveryRecord,
    ) -> Result<(mpsc::Sender<TaskCommand>, bool), EngineError> {
        let mut tasks = self.lock_tasks();
        // Checked under the lock so shutdown's drain cannot miss a new task.
        if self.is_shutting_down() {
            return Err(EngineError::ShuttingDown);
        }
        if let Some(entry) = tasks.get(&record.id) {
            if !entry.handle.is_finished() {
                return Ok((entry.commands.clone(), false));
            }
        }

        let generation = self.next_generation();
        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
        let span = info_span!("delivery", id = %record.id);
        let handle = tokio::spawn(
            self.clone()
                .run_delivery_task(record.clone(), receiver, generation)
                .instrument(span),
        );

        tasks.insert(
            record.id.clone(),
            TaskEntry {
                generation,
                commands: commands.clone(),
                handle,
            },
        );
        Ok((commands, true))
    }

    /// Body of a delivery task: poll on every tick, serve commands in
    /// between, stop on a terminal status, cancellation or shutdown.
    async fn run_delivery_task(
        self,
        mut record: DeliveryRecord,
        mut commands: mpsc::Receiver<TaskCommand>,
        generation: u64,
    ) {
        let mut shutdown = self.inner.shutdown.subscribe();

        if record.status == DeliveryStatus::Delivered {
            // Confirmed before a crash; only the ledger step is left.
            info!("resuming ledger submission");
            if let Err(e) = self.anchor_once(&mut record).await {
                debug!(error = %e, "resumed ledger step ended without a receipt");
            }
            self.finish_task(&record.id, generation);
            return;
        }

        let period = self.inner.config.poll_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            attempts = record.attempts,
            max_attempts = self.inner.config.max_attempts,
            "delivery task started"
        );

        loop {
            if *shutdown.borrow() {
                info!("stopping for shutdown");
                break;
            }

            let step = tokio::select! {
                biased;

                _ = shutdown.changed() => continue,
                Some(command) = commands.recv() => match command {
                    TaskCommand::Cancel => {
                        info!("delivery task cancelled");
                        TaskStep::Finished
                    }
                    TaskCommand::Confirm { name, signature, reply } => {
                        let (step, result) = self.confirm_once(&mut record, name, signature).await;
                        // The caller may have given up waiting.
                        let _ = reply.send(result);
                        step
                    }
                },
                _ = ticker.tick() => self.poll_once(&mut record).await,
            };

            if step == TaskStep::Finished {
                break;
            }
        }

        self.finish_task(&record.id, generation);
    }

    /// Drop the registry entry for `id` if it still belongs to this task.
    fn finish_task(&self, id: &str, generation: u64) {
        let mut tasks = self.lock_tasks();
        if tasks.get(id).is_some_and(|e| e.generation == generation) {
            tasks.remove(id);
        }
        debug!("delivery task finished");
    }

    /// One poll cycle: count it, ask the confirmation endpoint, act on the
    /// answer.
    pub(crate) async fn poll_once(&self, record: &mut DeliveryRecord) -> TaskStep {
        let inner = &self.inner;
        let attempts = record.attempts.saturating_add(1);

        match inner
            .store
            .update(&record.id, &DeliveryUpdate::Attempts(attempts))
            .await
        {
            Ok(Some(stored)) => *record = stored,
            Ok(None) => {
                info!("record no longer in store, stopping");
                return TaskStep::Finished;
            }
            Err(e) => {
                error!(attempts, error = %e, "failed to persist poll counter");
                match inner.store.get(&record.id).await {
                    Ok(None) => return TaskStep::Finished,
                    Ok(Some(stored)) if stored.status != DeliveryStatus::InTransit => {
                        warn!(status = %stored.status, "record moved on without this task, stopping");
                        return TaskStep::Finished;
                    }
                    _ => record.attempts = attempts,
                }
            }
        }

        let timeout = inner.config.query_timeout;
        let endpoint = record.confirmation_endpoint.as_str();
        let signal = match tokio::time::timeout(timeout, inner.source.fetch(endpoint)).await {
            Ok(Ok(payload)) if payload.is_delivered() => Some(payload),
            Ok(Ok(payload)) => {
                debug!(attempts, status = ?payload.status, "not delivered yet");
                None
            }
            Ok(Err(e)) => {
                warn!(attempts, error = %e, "confirmation query failed");
                None
            }
            Err(_) => {
                warn!(attempts, ?timeout, "confirmation query timed out");
                None
            }
        };

        if let Some(payload) = signal {
            info!(attempts, "delivery confirmed by courier");
            let fields = payload.delivered_fields(record);
            let (step, _) = self.deliver_once(record, fields).await;
            return step;
        }

        if record.attempts >= inner.config.max_attempts {
            match self.persist_once(record, &DeliveryUpdate::TimedOut).await {
                Ok(()) => info!(attempts = record.attempts, "delivery timed out"),
                Err(e) => error!(error = %e, "failed to record timeout"),
            }
            return TaskStep::Finished;
        }

        TaskStep::Continue
    }

    /// Direct confirmation received through the API.
    pub(crate) async fn confirm_once(
        &self,
        record: &mut DeliveryRecord,
        name: String,
        signature: Option<String>,
    ) -> (TaskStep, Result<Confirmation, EngineError>) {
        if record.status != DeliveryStatus::InTransit {
            let err = EngineError::AlreadyFinalized {
                id: record.id.clone(),
                status: record.status,
            };
            return (TaskStep::Finished, Err(err));
        }

        info!("delivery confirmed directly");
        let fields = DeliveredFields {
            recipient_name: Some(name),
            recipient_signature: signature,
            delivered_at: DeliveredAt::now(),
            pharmacist_reply: None,
            confirmed_via: ConfirmedVia::Direct,
        };
        self.deliver_once(record, fields).await
    }

    /// Persist the delivery fields, then anchor the record.
    ///
    /// The `Delivered` write happens first so the confirmation survives a
    /// failing ledger.
    pub(crate) async fn deliver_once(
        &self,
        record: &mut DeliveryRecord,
        fields: DeliveredFields,
    ) -> (TaskStep, Result<Confirmation, EngineError>) {
        match self
            .persist_once(record, &DeliveryUpdate::Delivered(fields))
            .await
        {
            Ok(()) => {}
            Err(EngineError::NotFound(id)) => {
                info!("record no longer in store, stopping");
                return (TaskStep::Finished, Err(EngineError::NotFound(id)));
            }
            Err(EngineError::Store(e)) if e.downcast_ref::<TransitionError>().is_some() => {
                warn!(error = %e, "record is no longer in transit, stopping");
                return (TaskStep::Finished, Err(EngineError::Store(e)));
            }
            Err(e) => {
                // Store trouble; the next cycle tries again.
                error!(error = %e, "failed to persist delivery");
                return (TaskStep::Continue, Err(e));
            }
        }

        (TaskStep::Finished, self.anchor_once(record).await)
    }

    /// Hash a delivered record, submit it and persist the ledger outcome.
    pub(crate) async fn anchor_once(
        &self,
        record: &mut DeliveryRecord,
    ) -> Result<Confirmation, EngineError> {
        let inner = &self.inner;
        if self.is_shutting_down() {
            info!("shutdown in progress, leaving delivered record for resume");
            return Err(EngineError::ShuttingDown);
        }

        let hash = match HashInput::from_record(record)
            .ok_or_else(|| anyhow!("delivery fields missing"))
            .and_then(|input| derive_hash(&input))
        {
            Ok(hash) => hash,
            Err(e) => {
                let error = format!("hash derivation failed: {e}");
                error!("{error}");
                if let Err(persist) = self
                    .persist_once(record, &DeliveryUpdate::OnchainFailed { error: error.clone() })
                    .await
                {
                    error!(error = %persist, "failed to record hash failure");
                }
                return Err(EngineError::Hash(error));
            }
        };

        let submission = LedgerSubmission {
            record_hash: hash,
            timestamp: crate::time::now_secs(),
            attribution: record.pharmacist.clone().unwrap_or_default(),
        };
        info!(%hash, ledger = inner.ledger.name(), "submitting record hash");

        let timeout = inner.config.ledger_timeout;
        let outcome = match tokio::time::timeout(timeout, inner.ledger.submit(&submission)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(LedgerError::Timeout(timeout)),
        };

        match outcome {
            Ok(receipt) => {
                let update = DeliveryUpdate::OnchainRecorded {
                    hash: hash.to_hex(),
                    tx_ref: receipt.tx_ref.clone(),
                };
                if let Err(e) = self.persist_once(record, &update).await {
                    // The ledger holds the hash but the store does not know.
                    error!(%hash, tx_ref = %receipt.tx_ref, error = %e, "ledger receipt not persisted");
                    return Err(e);
                }
                info!(tx_ref = %receipt.tx_ref, "proof of delivery recorded");
                Ok(Confirmation {
                    id: record.id.clone(),
                    ledger_tx_ref: receipt.tx_ref,
                    record_hash: hash.to_hex(),
                })
            }
            Err(ledger_error) => {
                error!(error = %ledger_error, "ledger submission failed");
                let update = DeliveryUpdate::OnchainFailed {
                    error: ledger_error.to_string(),
                };
                if let Err(e) = self.persist_once(record, &update).await {
                    error!(error = %e, "failed to record ledger failure");
                }
                Err(EngineError::Ledger(ledger_error))
            }
        }
    }

    /// Apply one update through the store and publish the new status.
    pub(crate) async fn persist_once(
        &self,
        record: &mut DeliveryRecord,
        update: &DeliveryUpdate,
    ) -> Result<(), EngineError> {
        let stored = self
            .inner
            .store
            .update(&record.id, update)
            .await?
            .ok_or_else(|| EngineError::NotFound(record.id.clone()))?;
        *record = stored;
        self.publish(record).await;
        Ok(())
    }

    async fn publish(&self, record: &DeliveryRecord) {
        let Some(events) = &self.inner.events else {
            return;
        };
        let event = StatusEvent {
            id: record.id.clone(),
            status: record.status,
            attempts: record.attempts,
        };
        if let Err(e) = events.send(event).await {
            debug!(error = %e, "status event dropped");
        }
    }
}
