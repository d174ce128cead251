//! Retry/backoff engine for one rock activation.
//!
//! A `Launcher` owns a single background task that runs the action, and on
//! failure waits one poll interval and runs it again, until an attempt
//! succeeds or a finite retry budget is spent. Attempts run one after the
//! other inside that task, so two attempts of the same activation can never
//! overlap no matter how long the action takes.
//!
//! Outcomes are reported as `LauncherSignal`s on an unbounded channel:
//!
//! - `Success` at most once, after which the launcher is inert
//! - `Error` after every failed attempt, with `terminal = true` on the last
//!   one when the budget ran out
//!
//! `stop()` wakes the task out of its interval wait and prevents any further
//! attempt. An attempt already in flight is not aborted; its outcome is
//! discarded instead of being signalled.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

use blackrock_core::{RetryBudget, RockAction, RockId};

use crate::command::CommandExecutor;

/// How a launcher schedules its attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub retries: RetryBudget,
    /// Wait one interval before the first attempt instead of firing at once.
    pub initial_delay: bool,
    pub interval: Duration,
}

impl LaunchOptions {
    pub fn new(retries: RetryBudget, interval: Duration) -> Self {
        Self {
            retries,
            initial_delay: false,
            interval,
        }
    }

    pub fn with_initial_delay(mut self, initial_delay: bool) -> Self {
        self.initial_delay = initial_delay;
        self
    }
}

/// Outcome of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum LauncherSignal {
    Success(JsonValue),
    Error {
        error: String,
        /// Budget left after this failure.
        retries: RetryBudget,
        /// No further attempt will be scheduled.
        terminal: bool,
    },
}

#[derive(Debug, Default)]
struct LauncherState {
    stopped: AtomicBool,
    running: AtomicBool,
    wake: Notify,
}

impl LauncherState {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            // notify_one keeps a permit if the task is not waiting yet.
            self.wake.notify_one();
        }
    }

    /// Sleep for `interval`; returns false if stopped meanwhile.
    async fn pause(&self, interval: Duration) -> bool {
        if self.is_stopped() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => !self.is_stopped(),
            _ = self.wake.notified() => false,
        }
    }
}

/// Handle to a running launcher. Dropping it stops the launcher.
#[derive(Debug)]
pub struct Launcher {
    state: Arc<LauncherState>,
    task: JoinHandle<()>,
}

impl Launcher {
    /// Spawn the attempt loop on the current tokio runtime.
    pub fn spawn(
        id: RockId,
        executor: Arc<dyn CommandExecutor>,
        action: RockAction,
        options: LaunchOptions,
    ) -> (Self, mpsc::UnboundedReceiver<LauncherSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(LauncherState::default());

        let task = tokio::spawn(run(id, executor, action, options, state.clone(), tx));

        (Self { state, task }, rx)
    }

    /// Cancel pending attempts. Safe to call any number of times.
    pub fn stop(&self) {
        self.state.stop();
    }

    /// Stopped explicitly, or finished (success or spent budget).
    pub fn is_stopped(&self) -> bool {
        self.state.is_stopped()
    }

    /// An attempt is executing right now.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// The background task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Launcher {
    fn drop(&mut self) {
        self.state.stop();
    }
}

async fn run(
    id: RockId,
    executor: Arc<dyn CommandExecutor>,
    action: RockAction,
    options: LaunchOptions,
    state: Arc<LauncherState>,
    signals: mpsc::UnboundedSender<LauncherSignal>,
) {
    let mut retries = options.retries;

    if options.initial_delay {
        if !state.pause(options.interval).await {
            return;
        }
    } else {
        // First attempt on the next scheduler tick.
        tokio::task::yield_now().await;
    }

    loop {
        if state.is_stopped() {
            return;
        }

        debug!(rock_id = %id, action = %action.name, retries_remaining = %retries, "launching attempt");
        state.running.store(true, Ordering::SeqCst);
        let outcome = executor.execute(&action.name, action.args.clone()).await;
        state.running.store(false, Ordering::SeqCst);

        if state.is_stopped() {
            debug!(rock_id = %id, "launcher stopped during attempt; discarding outcome");
            return;
        }

        match outcome {
            Ok(result) => {
                state.stop();
                let _ = signals.send(LauncherSignal::Success(result));
                return;
            }
            Err(err) => {
                let rearm = retries.consume_failure();
                if !rearm {
                    state.stop();
                }
                let _ = signals.send(LauncherSignal::Error {
                    error: err.to_string(),
                    retries,
                    terminal: !rearm,
                });
                if !rearm {
                    return;
                }
            }
        }

        if !state.pause(options.interval).await {
            return;
        }
    }
}
