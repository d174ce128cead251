//! Job actor: the single owner of one rock's record and launcher.
//!
//! Every operation takes the actor's lock, so calls on the same rock are
//! serialized while different rocks run independently. The lock is also
//! taken by the signal pump that turns launcher outcomes into persisted
//! state and notifications. A signal whose activation was superseded, or
//! whose launcher was stopped by `trash`/`dispose`, is dropped under that
//! lock, which is what keeps a cancelled rock silent once those calls
//! return.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

use blackrock_core::{AggregateRoot, ExpectedVersion, RetryBudget, RockAction, RockId, RockRecord};
use blackrock_events::{EventBus, EventEnvelope, InMemoryEventBus, KillTheRock, RockProcessed};

use crate::command::CommandExecutor;
use crate::config::BlackrockConfig;
use crate::error::RockError;
use crate::launcher::{LaunchOptions, Launcher, LauncherSignal};
use crate::rock_store::{RockStore, RockStoreError};

/// Collaborators shared by every rock of one queue.
pub(crate) struct RockContext<B> {
    pub(crate) store: Arc<dyn RockStore>,
    pub(crate) executor: Arc<dyn CommandExecutor>,
    pub(crate) notifications: Arc<B>,
    pub(crate) kill: Arc<InMemoryEventBus<KillTheRock>>,
    pub(crate) config: BlackrockConfig,
}

#[derive(Debug, Default)]
struct RockState {
    /// `None` until `create` has loaded or written the record.
    record: Option<RockRecord>,
    launcher: Option<Launcher>,
    /// Bumped on every `process`; signals carry the value they were born with.
    activation: u64,
}

impl RockState {
    fn is_processing(&self) -> bool {
        self.launcher.is_some()
    }

    fn stop_launcher(&mut self) {
        if let Some(launcher) = self.launcher.take() {
            launcher.stop();
        }
    }
}

/// Handle to a rock actor. Clones share the same actor.
pub struct Rock<B> {
    id: RockId,
    ctx: Arc<RockContext<B>>,
    state: Arc<Mutex<RockState>>,
    retired: Arc<AtomicBool>,
}

impl<B> Clone for Rock<B> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            ctx: self.ctx.clone(),
            state: self.state.clone(),
            retired: self.retired.clone(),
        }
    }
}

impl<B> std::fmt::Debug for Rock<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rock")
            .field("id", &self.id)
            .field("retired", &self.is_retired())
            .finish()
    }
}

impl<B> Rock<B> {
    pub fn id(&self) -> &RockId {
        &self.id
    }

    /// The actor was disposed; every further operation fails with
    /// `RockError::Retired`.
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    pub(crate) fn same_actor(&self, other: &Rock<B>) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Retire without waiting for the actor lock.
    ///
    /// The launcher is stopped right away when the lock is free; otherwise
    /// the signal pump stops it on the next outcome it sees.
    pub(crate) fn stop_now(&self) {
        self.retired.store(true, Ordering::SeqCst);
        if let Ok(mut state) = self.state.try_lock() {
            state.stop_launcher();
        }
    }
}

impl<B> Rock<B>
where
    B: EventBus<EventEnvelope<JsonValue>> + 'static,
{
    pub(crate) fn new(id: RockId, ctx: Arc<RockContext<B>>) -> Self {
        Self {
            id,
            ctx,
            state: Arc::new(Mutex::new(RockState::default())),
            retired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Load the record, or write a fresh published one if none exists yet.
    ///
    /// Idempotent: an existing record is never overwritten.
    pub async fn create(&self) -> Result<RockRecord, RockError> {
        let mut state = self.lock().await?;
        Ok(self.ensure_record(&mut state).await?.clone())
    }

    /// Re-arm the rock with a new action and retry policy.
    ///
    /// Returns `Ok(false)` without touching the record when a launcher is
    /// active.
    pub async fn upsert(
        &self,
        event_scope: &str,
        action: RockAction,
        retries: RetryBudget,
    ) -> Result<bool, RockError> {
        let mut state = self.lock().await?;
        if state.is_processing() {
            warn!(rock_id = %self.id, "rock is processing; upsert rejected");
            return Ok(false);
        }

        let mut record = self.ensure_record(&mut state).await?.clone();
        record.upsert(event_scope, action, retries)?;
        self.persist(&mut state, record).await?;
        Ok(true)
    }

    /// Start (or resume) execution of the persisted action.
    ///
    /// Returns `Ok(false)` and logs a warning when there is nothing to run:
    /// already processing, already processed, trashed, out of retries, or
    /// never given an action.
    pub async fn process(&self, initial_delay: bool) -> Result<bool, RockError> {
        let mut state = self.lock().await?;
        let record = self.ensure_record(&mut state).await?.clone();

        if state.is_processing() {
            warn!(rock_id = %self.id, "rock is already processing");
            return Ok(false);
        }
        if record.processed() {
            warn!(rock_id = %self.id, "rock was already processed");
            return Ok(false);
        }
        if record.is_trashed() {
            warn!(rock_id = %self.id, "rock is trashed; upsert it before processing");
            return Ok(false);
        }
        if record.retries().is_exhausted() {
            warn!(rock_id = %self.id, "rock has no retries left; upsert it before processing");
            return Ok(false);
        }
        let Some(action) = record.action().cloned() else {
            warn!(rock_id = %self.id, "rock has no action to process");
            return Ok(false);
        };

        state.activation += 1;
        let activation = state.activation;
        let options = LaunchOptions::new(record.retries(), self.ctx.config.poll_interval)
            .with_initial_delay(initial_delay);

        debug!(
            rock_id = %self.id,
            action = %action.name,
            retries_remaining = %record.retries(),
            initial_delay,
            "starting launcher"
        );
        let (launcher, signals) =
            Launcher::spawn(self.id.clone(), self.ctx.executor.clone(), action, options);
        state.launcher = Some(launcher);

        tokio::spawn(self.clone().pump(activation, signals));
        Ok(true)
    }

    /// Persist `processed = true`, stop the launcher and request retirement.
    pub async fn mark_done(&self) -> Result<(), RockError> {
        let mut state = self.lock().await?;
        state.stop_launcher();
        self.persist_done(&mut state).await?;
        self.request_retirement();
        Ok(())
    }

    /// Cancel the rock: stop the launcher, persist `trashed` and request
    /// retirement. No notification is published for this rock after
    /// `trash` returns.
    pub async fn trash(&self) -> Result<(), RockError> {
        let mut state = self.lock().await?;
        state.stop_launcher();

        let mut record = self.ensure_record(&mut state).await?.clone();
        record.trash();
        self.persist(&mut state, record).await?;

        self.request_retirement();
        Ok(())
    }

    /// Tear the actor down: stop its launcher and mark it retired.
    ///
    /// The durable record is left as is.
    pub async fn dispose(&self) {
        let mut state = self.state.lock().await;
        state.stop_launcher();
        self.retired.store(true, Ordering::SeqCst);
    }

    /// Dispose only if idle, unless `force` is set. Returns whether the
    /// actor was disposed.
    pub(crate) async fn retire(&self, force: bool) -> bool {
        let mut state = self.state.lock().await;
        if !force && state.is_processing() {
            return false;
        }
        state.stop_launcher();
        self.retired.store(true, Ordering::SeqCst);
        true
    }

    /// Latest record state known to the actor.
    pub async fn snapshot(&self) -> Option<RockRecord> {
        self.state.lock().await.record.clone()
    }

    pub async fn is_processing(&self) -> bool {
        self.state.lock().await.is_processing()
    }

    async fn lock(&self) -> Result<tokio::sync::MutexGuard<'_, RockState>, RockError> {
        let state = self.state.lock().await;
        if self.is_retired() {
            return Err(RockError::Retired(self.id.clone()));
        }
        Ok(state)
    }

    async fn ensure_record<'s>(&self, state: &'s mut RockState) -> Result<&'s RockRecord, RockError> {
        let record = match state.record.take() {
            Some(record) => record,
            None => self.load_or_create().await?,
        };
        Ok(&*state.record.insert(record))
    }

    async fn load_or_create(&self) -> Result<RockRecord, RockError> {
        if let Some(stored) = self.ctx.store.load_latest(&self.id).await? {
            return Ok(stored.into_record());
        }

        let fresh = RockRecord::new(self.id.clone());
        match self.ctx.store.append(&fresh, ExpectedVersion::Exact(0)).await {
            Ok(stored) => Ok(stored.into_record()),
            // Someone else wrote it first; theirs wins.
            Err(RockStoreError::Concurrency(_)) => self
                .ctx
                .store
                .load_latest(&self.id)
                .await?
                .map(|stored| stored.into_record())
                .ok_or_else(|| {
                    RockError::from(RockStoreError::Storage(format!(
                        "{} vanished after concurrent create",
                        self.id
                    )))
                }),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, state: &mut RockState, record: RockRecord) -> Result<(), RockError> {
        let stored = self
            .ctx
            .store
            .append(&record, ExpectedVersion::Exact(record.version()))
            .await?;
        state.record = Some(stored.into_record());
        Ok(())
    }

    async fn persist_done(&self, state: &mut RockState) -> Result<(), RockError> {
        let mut record = self.ensure_record(state).await?.clone();
        record.done();
        self.persist(state, record).await
    }

    /// Receive launcher outcomes for one activation until its launcher exits.
    async fn pump(self, activation: u64, mut signals: mpsc::UnboundedReceiver<LauncherSignal>) {
        while let Some(signal) = signals.recv().await {
            self.on_signal(activation, signal).await;
        }
    }

    async fn on_signal(&self, activation: u64, signal: LauncherSignal) {
        let mut state = self.state.lock().await;
        if self.is_retired() {
            state.stop_launcher();
        }
        if state.activation != activation || !state.is_processing() || self.is_retired() {
            debug!(rock_id = %self.id, activation, "dropping signal from a stopped launcher");
            return;
        }

        let event_scope = state
            .record
            .as_ref()
            .map(|r| r.event_scope().to_string())
            .unwrap_or_default();

        match signal {
            LauncherSignal::Success(result) => {
                state.launcher = None;
                self.settle_success(&mut state).await;
                self.notify(RockProcessed::success(&self.id, event_scope, result));
                self.request_retirement();
            }
            LauncherSignal::Error {
                error,
                retries,
                terminal,
            } => {
                if !retries.is_unlimited() {
                    self.persist_budget(&mut state, retries).await;
                }
                if terminal {
                    info!(rock_id = %self.id, error = %error, "retry budget exhausted");
                    state.launcher = None;
                }
                self.notify(RockProcessed::failure(&self.id, event_scope, error));
                if terminal {
                    self.request_retirement();
                }
            }
        }
    }

    /// Write `processed = true` after a successful run, retrying the write
    /// with the result already in hand. The action is never re-run here.
    async fn settle_success(&self, state: &mut RockState) {
        let attempts = self.ctx.config.persist_attempts.max(1);
        for attempt in 1..=attempts {
            match self.persist_done(state).await {
                Ok(()) => return,
                Err(e) if attempt < attempts => {
                    warn!(rock_id = %self.id, attempt, error = %e, "failed to persist completion; retrying");
                    tokio::time::sleep(self.ctx.config.persist_retry_delay).await;
                    // Pick up whatever version is stored now.
                    state.record = None;
                }
                Err(e) => {
                    error!(
                        rock_id = %self.id,
                        attempts,
                        error = %e,
                        "failed to persist completion; rock stays pending until recovered"
                    );
                }
            }
        }
    }

    async fn persist_budget(&self, state: &mut RockState, retries: RetryBudget) {
        let result = match state.record.clone() {
            Some(mut record) => {
                record.record_failure(retries);
                self.persist(state, record).await
            }
            None => Ok(()),
        };
        if let Err(e) = result {
            error!(rock_id = %self.id, retries_remaining = %retries, error = %e, "failed to persist retry budget");
        }
    }

    fn notify(&self, event: RockProcessed) {
        let envelope = match EventEnvelope::from_event(event).to_json() {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(rock_id = %self.id, error = %e, "failed to encode notification");
                return;
            }
        };
        let event_type = envelope.event_type().to_string();

        match self.ctx.notifications.publish(envelope) {
            Ok(delivery) if delivery.is_delivered() => {
                debug!(rock_id = %self.id, event_type = %event_type, receivers = delivery.receivers(), "notification sent");
            }
            Ok(_) => warn!(rock_id = %self.id, event_type = %event_type, "notification was not delivered"),
            Err(e) => warn!(rock_id = %self.id, event_type = %event_type, error = %e, "failed to publish notification"),
        }
    }

    fn request_retirement(&self) {
        if let Err(e) = self.ctx.kill.publish(KillTheRock::retire(self.id.clone())) {
            warn!(rock_id = %self.id, error = %e, "failed to request retirement");
        }
    }
}
