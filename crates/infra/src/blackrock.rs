//! Queue facade: `hurl`, `break_rock` and `init`.
//!
//! Owns the map from `RockId` to live actors. Actors are created on demand
//! and removed when they ask to be retired (`KillTheRock`), so the map only
//! holds rocks that are processing or were touched recently.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use blackrock_core::{RetryBudget, RockAction, RockId};
use blackrock_events::{EventBus, EventEnvelope, InMemoryEventBus, KillTheRock, Subscription};

use crate::command::CommandExecutor;
use crate::config::BlackrockConfig;
use crate::error::RockError;
use crate::rock::{Rock, RockContext};
use crate::rock_store::RockStore;

/// What `hurl` did with the request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Hurl {
    /// The rock was re-armed and its launcher scheduled.
    Launched,
    /// The rock is processing; the request was dropped.
    Busy,
    /// The rock was re-armed with a zero retry budget, so nothing runs.
    Exhausted,
}

struct Inner<B> {
    ctx: Arc<RockContext<B>>,
    rocks: Mutex<HashMap<RockId, Rock<B>>>,
}

impl<B> Inner<B> {
    fn rocks(&self) -> MutexGuard<'_, HashMap<RockId, Rock<B>>> {
        self.rocks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drain(&self) -> Vec<Rock<B>> {
        let mut rocks = self.rocks();
        rocks.drain().map(|(_, rock)| rock).collect()
    }
}

impl<B> Inner<B>
where
    B: EventBus<EventEnvelope<JsonValue>> + 'static,
{
    /// Live actor for `id`, replacing one that was retired meanwhile.
    fn rock_for(&self, id: &RockId) -> Rock<B> {
        let mut rocks = self.rocks();
        match rocks.get(id) {
            Some(rock) if !rock.is_retired() => rock.clone(),
            _ => {
                let rock = Rock::new(id.clone(), self.ctx.clone());
                rocks.insert(id.clone(), rock.clone());
                rock
            }
        }
    }

    fn lookup(&self, id: &RockId) -> Option<Rock<B>> {
        let rocks = self.rocks();
        rocks.get(id).cloned()
    }

    /// Drop `rock` from the map unless another actor took its place.
    fn forget(&self, rock: &Rock<B>) {
        let mut rocks = self.rocks();
        if rocks.get(rock.id()).is_some_and(|current| current.same_actor(rock)) {
            rocks.remove(rock.id());
        }
    }

    /// Run `op` against the live actor, retrying on a fresh actor if the one
    /// it got was retired underneath it.
    async fn with_rock<T, F, Fut>(&self, id: &RockId, op: F) -> Result<T, RockError>
    where
        F: Fn(Rock<B>) -> Fut,
        Fut: Future<Output = Result<T, RockError>>,
    {
        loop {
            match op(self.rock_for(id)).await {
                Err(RockError::Retired(_)) => {
                    debug!(rock_id = %id, "actor retired mid-call; retrying on a fresh one");
                }
                other => return other,
            }
        }
    }

    async fn handle_kill(&self, signal: KillTheRock) {
        let Some(rock) = self.lookup(&signal.id) else {
            return;
        };
        if rock.retire(signal.force).await {
            self.forget(&rock);
            debug!(rock_id = %signal.id, force = signal.force, "rock retired");
        }
    }
}

/// Durable retry queue.
///
/// `B` is the bus `RockProcessed` notifications are published on, as JSON
/// envelopes.
pub struct Blackrock<B> {
    inner: Arc<Inner<B>>,
    initialized: AtomicBool,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl<B> Blackrock<B>
where
    B: EventBus<EventEnvelope<JsonValue>> + 'static,
{
    pub fn new(
        store: Arc<dyn RockStore>,
        executor: Arc<dyn CommandExecutor>,
        notifications: Arc<B>,
        config: BlackrockConfig,
    ) -> Self {
        let ctx = Arc::new(RockContext {
            store,
            executor,
            notifications,
            kill: Arc::new(InMemoryEventBus::new()),
            config,
        });
        Self {
            inner: Arc::new(Inner {
                ctx,
                rocks: Mutex::new(HashMap::new()),
            }),
            initialized: AtomicBool::new(false),
            listener: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &BlackrockConfig {
        &self.inner.ctx.config
    }

    /// Boot the queue: start listening for `KillTheRock` and, if enabled,
    /// run the recovery sweep.
    ///
    /// Only the first call does anything; it returns how many rocks were
    /// reactivated. Later calls return `Ok(0)`.
    pub async fn init(&self) -> Result<usize, RockError> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(0);
        }

        let handle = tokio::spawn(listen(
            Arc::downgrade(&self.inner),
            self.inner.ctx.kill.subscribe(),
        ));
        if let Ok(mut listener) = self.listener.lock() {
            *listener = Some(handle);
        }

        if !self.inner.ctx.config.auto_recover_on_start {
            info!("automatic recovery disabled");
            return Ok(0);
        }
        self.recover().await
    }

    /// Reactivate every pending rock found in the store, each with an initial
    /// delay of one poll interval.
    ///
    /// A rock that fails to reactivate is logged and skipped; a failing
    /// store scan is returned.
    pub async fn recover(&self) -> Result<usize, RockError> {
        let pending = self.inner.ctx.store.pending_ids().await?;
        info!(pending = pending.len(), "recovering pending rocks");

        let mut recovered = 0;
        for id in pending {
            let result = self
                .inner
                .with_rock(&id, |rock| async move {
                    rock.create().await?;
                    rock.process(true).await
                })
                .await;
            match result {
                Ok(true) => recovered += 1,
                Ok(false) => {}
                Err(e) => error!(rock_id = %id, error = %e, "failed to recover rock"),
            }
        }

        info!(recovered, "recovery complete");
        Ok(recovered)
    }

    /// Enqueue (or re-enqueue) an action under `base_id`. `retries` of
    /// `None` retries until the action succeeds.
    ///
    /// Returns once the launcher is scheduled, without waiting for the
    /// action. A rock that is still processing is left alone and
    /// `Hurl::Busy` is returned; `retries` of `Some(0)` stores the rock
    /// without running it and returns `Hurl::Exhausted`.
    pub async fn hurl(
        &self,
        base_id: &str,
        event_scope: &str,
        action_name: &str,
        action_args: Option<JsonValue>,
        retries: Option<u32>,
    ) -> Result<Hurl, RockError> {
        let id = RockId::parse_base(base_id)?;
        let mut action = RockAction::new(action_name);
        action.args = action_args;
        let retries = RetryBudget::from_option(retries);

        self.inner
            .with_rock(&id, |rock| {
                let action = action.clone();
                async move {
                    rock.create().await?;
                    if !rock.upsert(event_scope, action, retries).await? {
                        return Ok(Hurl::Busy);
                    }
                    if rock.process(false).await? {
                        Ok(Hurl::Launched)
                    } else {
                        Ok(Hurl::Exhausted)
                    }
                }
            })
            .await
    }

    /// Cancel the rock under `base_id` and dispose its actor.
    pub async fn break_rock(&self, base_id: &str) -> Result<(), RockError> {
        let id = RockId::parse_base(base_id)?;

        let rock = self
            .inner
            .with_rock(&id, |rock| async move {
                rock.create().await?;
                rock.trash().await?;
                Ok(rock)
            })
            .await?;

        // Trash is done; the actor can go.
        if rock.retire(false).await {
            self.inner.forget(&rock);
        }
        Ok(())
    }

    /// Live actor for `base_id`, created on demand.
    pub fn rock(&self, base_id: &str) -> Result<Rock<B>, RockError> {
        let id = RockId::parse_base(base_id)?;
        Ok(self.inner.rock_for(&id))
    }

    /// Bus carrying `KillTheRock` signals. Publish `KillTheRock::force(id)`
    /// on it to tear an actor down even while it is processing.
    pub fn kill_signal(&self) -> Arc<InMemoryEventBus<KillTheRock>> {
        self.inner.ctx.kill.clone()
    }

    /// Ids of rocks that currently have an in-memory actor.
    pub fn active_rocks(&self) -> Vec<RockId> {
        let rocks = self.inner.rocks();
        let mut ids: Vec<_> = rocks.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Dispose every actor and stop listening for kill signals.
    ///
    /// Durable state is untouched; pending rocks resume on the next boot.
    pub async fn shutdown(&self) {
        if let Ok(mut listener) = self.listener.lock() {
            if let Some(handle) = listener.take() {
                handle.abort();
            }
        }

        let rocks = self.inner.drain();
        let count = rocks.len();
        for rock in rocks {
            rock.dispose().await;
        }
        info!(disposed = count, "queue shut down");
    }
}

impl<B> Drop for Blackrock<B> {
    fn drop(&mut self) {
        if let Ok(mut listener) = self.listener.lock() {
            if let Some(handle) = listener.take() {
                handle.abort();
            }
        }
        // Launchers are owned by their pump tasks, not by the map.
        for rock in self.inner.drain() {
            rock.stop_now();
        }
    }
}

async fn listen<B>(inner: Weak<Inner<B>>, mut signals: Subscription<KillTheRock>)
where
    B: EventBus<EventEnvelope<JsonValue>> + 'static,
{
    while let Some(signal) = signals.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_kill(signal).await;
    }
    debug!("kill signal listener stopped");
}
