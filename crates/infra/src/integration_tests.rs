//! Integration tests for the full queue pipeline.
//!
//! Tests: hurl → Rock → Launcher → CommandExecutor → RockStore + notifications
//!
//! Verifies:
//! - Retry budgets produce the right number of notifications
//! - Cancellation silences a rock
//! - Recovery reactivates only pending rocks, after one interval
//! - Re-entrant hurls are rejected until the rock settles

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{Value as JsonValue, json};

    use blackrock_core::{AggregateRoot, ExpectedVersion, RetryBudget, RockAction, RockId, RockRecord, RockStatus};
    use blackrock_events::{EventBus, EventEnvelope, InMemoryEventBus, KillTheRock, RockOutcome, RockProcessed, Subscription};

    use crate::blackrock::{Blackrock, Hurl};
    use crate::command::{CommandError, CommandExecutor, CommandRegistry};
    use crate::config::BlackrockConfig;
    use crate::rock_store::{InMemoryRockStore, RockFilter, RockStore, RockStoreError, StoredRock};

    const INTERVAL: Duration = Duration::from_secs(30);

    type Notifications = InMemoryEventBus<EventEnvelope<JsonValue>>;

    /// Fails the first `failures` calls, then returns the args it was given.
    #[derive(Debug)]
    struct Countdown {
        failures: usize,
        calls: AtomicUsize,
    }

    impl Countdown {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CommandExecutor for Countdown {
        async fn execute(&self, action: &str, args: Option<JsonValue>) -> Result<JsonValue, CommandError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(CommandError::Failed {
                    action: action.to_string(),
                    source: anyhow::anyhow!("attempt {n} failed"),
                });
            }
            Ok(args.unwrap_or(JsonValue::Null))
        }
    }

    struct Setup {
        queue: Blackrock<Notifications>,
        store: Arc<InMemoryRockStore>,
        events: Subscription<EventEnvelope<JsonValue>>,
    }

    fn setup(executor: Arc<dyn CommandExecutor>, store: Arc<InMemoryRockStore>) -> Setup {
        let notifications = Arc::new(Notifications::new());
        // Subscribe before anything is published.
        let events = notifications.subscribe();
        let config = BlackrockConfig::default()
            .with_poll_interval(INTERVAL)
            .with_persist_retry_delay(Duration::from_millis(10));
        let queue = Blackrock::new(store.clone(), executor, notifications, config);
        Setup { queue, store, events }
    }

    fn decode(envelope: &EventEnvelope<JsonValue>) -> RockProcessed {
        serde_json::from_value(envelope.payload().clone()).unwrap()
    }

    fn drain(events: &mut Subscription<EventEnvelope<JsonValue>>) -> Vec<RockProcessed> {
        let mut out = Vec::new();
        while let Ok(envelope) = events.try_recv() {
            out.push(decode(&envelope));
        }
        out
    }

    async fn latest(store: &InMemoryRockStore, base: &str) -> RockRecord {
        store
            .load_latest(&RockId::from_base(base))
            .await
            .unwrap()
            .unwrap()
            .into_record()
    }

    #[tokio::test(start_paused = true)]
    async fn three_retries_yield_exactly_three_errors() {
        let exec = Countdown::new(usize::MAX);
        let mut s = setup(exec.clone(), Arc::new(InMemoryRockStore::new()));
        s.queue.init().await.unwrap();

        let hurl = s
            .queue
            .hurl("order-1", "billing", "invoice.send", Some(json!({"n": 1})), Some(3))
            .await
            .unwrap();
        assert_eq!(hurl, Hurl::Launched);

        tokio::time::sleep(INTERVAL * 10).await;

        let events = drain(&mut s.events);
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| !e.is_success() && e.base_id == "order-1"));
        assert_eq!(exec.calls(), 3);

        let record = latest(&s.store, "order-1").await;
        assert_eq!(record.retries(), RetryBudget::Remaining(0));
        assert!(!record.processed());
    }

    #[tokio::test(start_paused = true)]
    async fn unlimited_retries_end_in_one_success() {
        let exec = Countdown::new(5);
        let mut s = setup(exec.clone(), Arc::new(InMemoryRockStore::new()));
        s.queue.init().await.unwrap();

        s.queue
            .hurl("order-2", "billing", "invoice.send", Some(json!({"n": 2})), None)
            .await
            .unwrap();

        tokio::time::sleep(INTERVAL * 10).await;

        let events = drain(&mut s.events);
        assert_eq!(events.len(), 6);
        assert!(events[..5].iter().all(|e| !e.is_success()));
        assert_eq!(events[5].outcome, RockOutcome::Result(json!({"n": 2})));

        assert!(latest(&s.store, "order-2").await.processed());
        assert_eq!(exec.calls(), 6);
        // The settled rock retired itself.
        assert!(s.queue.active_rocks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn notification_type_follows_event_scope() {
        let exec = Countdown::new(0);
        let mut s = setup(exec, Arc::new(InMemoryRockStore::new()));
        s.queue.init().await.unwrap();

        s.queue
            .hurl("order-3", "shipping", "label.print", None, None)
            .await
            .unwrap();

        let envelope = s.events.recv().await.unwrap();
        assert_eq!(envelope.event_type(), "shipping-rock-processed");
        assert_eq!(envelope.payload(), &json!({"baseId": "order-3", "result": null}));
    }

    #[tokio::test(start_paused = true)]
    async fn break_mid_wait_stops_everything() {
        let exec = Countdown::new(usize::MAX);
        let mut s = setup(exec.clone(), Arc::new(InMemoryRockStore::new()));
        s.queue.init().await.unwrap();

        s.queue
            .hurl("order-4", "billing", "invoice.send", None, None)
            .await
            .unwrap();
        s.events.recv().await.unwrap();

        s.queue.break_rock("order-4").await.unwrap();
        tokio::time::sleep(INTERVAL * 5).await;

        assert!(drain(&mut s.events).is_empty());
        assert_eq!(exec.calls(), 1);
        assert_eq!(latest(&s.store, "order-4").await.status(), RockStatus::Trashed);
        assert!(s.queue.active_rocks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_reactivates_only_pending_rocks_after_one_interval() {
        let store = Arc::new(InMemoryRockStore::new());

        let mut pending = RockRecord::new(RockId::from_base("pending"));
        pending
            .upsert("billing", RockAction::new("invoice.send"), RetryBudget::Remaining(2))
            .unwrap();
        store.append(&pending, ExpectedVersion::Exact(0)).await.unwrap();

        let mut finished = RockRecord::new(RockId::from_base("finished"));
        finished
            .upsert("billing", RockAction::new("invoice.send"), RetryBudget::Unlimited)
            .unwrap();
        finished.done();
        store.append(&finished, ExpectedVersion::Exact(0)).await.unwrap();

        let exec = Countdown::new(0);
        let mut s = setup(exec.clone(), store);
        assert_eq!(s.queue.init().await.unwrap(), 1);
        assert_eq!(s.queue.active_rocks(), vec![RockId::from_base("pending")]);

        tokio::time::sleep(INTERVAL - Duration::from_millis(1)).await;
        assert_eq!(exec.calls(), 0);

        let envelope = s.events.recv().await.unwrap();
        assert_eq!(decode(&envelope).base_id, "pending");
        assert_eq!(exec.calls(), 1);

        tokio::time::sleep(INTERVAL * 3).await;
        assert!(drain(&mut s.events).is_empty());
        assert!(latest(&s.store, "pending").await.processed());
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_can_be_disabled_and_init_runs_once() {
        let store = Arc::new(InMemoryRockStore::new());
        let mut record = RockRecord::new(RockId::from_base("pending"));
        record
            .upsert("billing", RockAction::new("invoice.send"), RetryBudget::Unlimited)
            .unwrap();
        store.append(&record, ExpectedVersion::Any).await.unwrap();

        let notifications = Arc::new(Notifications::new());
        let queue = Blackrock::new(
            store.clone(),
            Countdown::new(0),
            notifications,
            BlackrockConfig::default().with_auto_recover(false),
        );
        assert_eq!(queue.init().await.unwrap(), 0);
        assert_eq!(queue.init().await.unwrap(), 0);
        assert!(queue.active_rocks().is_empty());

        // Explicit sweep still works.
        assert_eq!(queue.recover().await.unwrap(), 1);
        queue.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn second_hurl_is_busy_until_the_first_settles() {
        let exec = Countdown::new(1);
        let mut s = setup(exec.clone(), Arc::new(InMemoryRockStore::new()));
        s.queue.init().await.unwrap();

        let args = Some(json!({"n": 7}));
        let first = s.queue.hurl("order-5", "billing", "invoice.send", args.clone(), None).await.unwrap();
        let second = s.queue.hurl("order-5", "billing", "invoice.send", args.clone(), None).await.unwrap();
        assert_eq!(first, Hurl::Launched);
        assert_eq!(second, Hurl::Busy);

        // One failure, then success on the retry.
        tokio::time::sleep(INTERVAL * 2).await;
        let events = drain(&mut s.events);
        assert_eq!(events.len(), 2);
        assert!(events[1].is_success());
        assert_eq!(exec.calls(), 2);

        let third = s.queue.hurl("order-5", "billing", "invoice.send", args, None).await.unwrap();
        assert_eq!(third, Hurl::Launched);
        assert!(!latest(&s.store, "order-5").await.processed());

        tokio::time::sleep(INTERVAL).await;
        let events = drain(&mut s.events);
        assert_eq!(events.len(), 1);
        assert!(events[0].is_success());
        assert!(latest(&s.store, "order-5").await.processed());
    }

    #[tokio::test(start_paused = true)]
    async fn trashed_rock_is_resurrected_by_hurl() {
        let exec = Countdown::new(0);
        let mut s = setup(exec.clone(), Arc::new(InMemoryRockStore::new()));
        s.queue.init().await.unwrap();

        s.queue.break_rock("order-6").await.unwrap();
        let trashed = latest(&s.store, "order-6").await;
        assert!(trashed.is_trashed());

        let hurl = s
            .queue
            .hurl("order-6", "billing", "invoice.send", None, Some(1))
            .await
            .unwrap();
        assert_eq!(hurl, Hurl::Launched);

        let envelope = s.events.recv().await.unwrap();
        assert!(decode(&envelope).is_success());

        let record = latest(&s.store, "order-6").await;
        assert_eq!(record.status(), RockStatus::Published);
        assert!(record.processed());
    }

    #[tokio::test(start_paused = true)]
    async fn forced_kill_disposes_a_processing_rock() {
        let exec = Countdown::new(usize::MAX);
        let mut s = setup(exec.clone(), Arc::new(InMemoryRockStore::new()));
        s.queue.init().await.unwrap();

        s.queue
            .hurl("order-7", "billing", "invoice.send", None, None)
            .await
            .unwrap();
        s.events.recv().await.unwrap();

        s.queue
            .kill_signal()
            .publish(KillTheRock::force(RockId::from_base("order-7")))
            .unwrap();
        tokio::time::sleep(INTERVAL * 3).await;

        assert_eq!(exec.calls(), 1);
        assert!(drain(&mut s.events).is_empty());
        assert!(s.queue.active_rocks().is_empty());

        // Disposal does not touch the record, so the next boot picks it up.
        let record = latest(&s.store, "order-7").await;
        assert!(record.is_recoverable());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_resumes_where_the_last_process_stopped() {
        let store = Arc::new(InMemoryRockStore::new());

        {
            let exec = Countdown::new(usize::MAX);
            let mut s = setup(exec, store.clone());
            s.queue.init().await.unwrap();
            s.queue
                .hurl("order-8", "billing", "invoice.send", None, Some(5))
                .await
                .unwrap();
            s.events.recv().await.unwrap();
            s.queue.shutdown().await;
        }

        let record = latest(&store, "order-8").await;
        assert_eq!(record.retries(), RetryBudget::Remaining(4));
        assert!(record.version() >= 2);

        let exec = Countdown::new(0);
        let mut s = setup(exec.clone(), store);
        assert_eq!(s.queue.init().await.unwrap(), 1);

        let envelope = s.events.recv().await.unwrap();
        assert!(decode(&envelope).is_success());
        assert_eq!(exec.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn registry_routes_actions_and_missing_handlers_count_as_failures() {
        let registry = CommandRegistry::new()
            .with_handler("mail.*", |args| async move { Ok(json!({"sent": args})) });
        let mut s = setup(Arc::new(registry), Arc::new(InMemoryRockStore::new()));
        s.queue.init().await.unwrap();

        s.queue
            .hurl("m1", "mail", "mail.welcome", Some(json!("bob")), None)
            .await
            .unwrap();
        let ok = decode(&s.events.recv().await.unwrap());
        assert_eq!(ok.outcome, RockOutcome::Result(json!({"sent": "bob"})));

        s.queue
            .hurl("s1", "sms", "sms.send", None, Some(1))
            .await
            .unwrap();
        let failed = decode(&s.events.recv().await.unwrap());
        assert_eq!(
            failed.outcome,
            RockOutcome::Error("no handler registered for action 'sms.send'".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn actor_snapshot_tracks_the_record() {
        let exec = Countdown::new(usize::MAX);
        let mut s = setup(exec, Arc::new(InMemoryRockStore::new()));
        s.queue.init().await.unwrap();

        s.queue
            .hurl("order-9", "billing", "invoice.send", None, Some(4))
            .await
            .unwrap();
        s.events.recv().await.unwrap();

        let rock = s.queue.rock("order-9").unwrap();
        assert!(rock.is_processing().await);
        let snapshot = rock.snapshot().await.unwrap();
        assert_eq!(snapshot.retries(), RetryBudget::Remaining(3));
        assert_eq!(snapshot, latest(&s.store, "order-9").await);

        s.queue.shutdown().await;
        assert!(rock.is_retired());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_queue_stops_every_launcher() {
        let exec = Countdown::new(usize::MAX);
        let Setup { queue, mut events, .. } = setup(exec.clone(), Arc::new(InMemoryRockStore::new()));
        queue.init().await.unwrap();

        queue
            .hurl("order-10", "billing", "invoice.send", None, None)
            .await
            .unwrap();
        events.recv().await.unwrap();
        assert_eq!(exec.calls(), 1);

        drop(queue);
        tokio::time::sleep(INTERVAL * 10).await;

        assert_eq!(exec.calls(), 1);
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retry_budget_is_stored_but_never_run() {
        let exec = Countdown::new(0);
        let mut s = setup(exec.clone(), Arc::new(InMemoryRockStore::new()));
        s.queue.init().await.unwrap();

        let hurl = s
            .queue
            .hurl("order-11", "billing", "invoice.send", None, Some(0))
            .await
            .unwrap();
        assert_eq!(hurl, Hurl::Exhausted);

        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(exec.calls(), 0);
        assert!(drain(&mut s.events).is_empty());

        let record = latest(&s.store, "order-11").await;
        assert_eq!(record.retries(), RetryBudget::Remaining(0));
        assert!(!record.processed());
        assert!(s.store.pending_ids().await.unwrap().is_empty());
    }

    /// Rejects the first `failures` appends that mark a rock processed.
    struct FailingCompletions {
        inner: InMemoryRockStore,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl RockStore for FailingCompletions {
        async fn append(
            &self,
            record: &RockRecord,
            expected_version: ExpectedVersion,
        ) -> Result<StoredRock, RockStoreError> {
            if record.processed()
                && self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(RockStoreError::Storage("disk full".to_string()));
            }
            self.inner.append(record, expected_version).await
        }

        async fn load_latest(&self, id: &RockId) -> Result<Option<StoredRock>, RockStoreError> {
            self.inner.load_latest(id).await
        }

        async fn load_history(&self, id: &RockId) -> Result<Vec<StoredRock>, RockStoreError> {
            self.inner.load_history(id).await
        }

        async fn query(&self, filter: &RockFilter) -> Result<Vec<StoredRock>, RockStoreError> {
            self.inner.query(filter).await
        }
    }

    /// Hurl one always-succeeding rock against a store that rejects
    /// `failures` completion writes; returns (action calls, notifications,
    /// processed flag as stored).
    async fn complete_with_failing_writes(failures: usize) -> (usize, Vec<RockProcessed>, bool) {
        let exec = Countdown::new(0);
        let store = Arc::new(FailingCompletions {
            inner: InMemoryRockStore::new(),
            failures: AtomicUsize::new(failures),
        });
        let notifications = Arc::new(Notifications::new());
        let mut events = notifications.subscribe();
        let config = BlackrockConfig::default()
            .with_poll_interval(INTERVAL)
            .with_persist_attempts(3)
            .with_persist_retry_delay(Duration::from_millis(10));
        let queue = Blackrock::new(store.clone(), exec.clone(), notifications, config);
        queue.init().await.unwrap();

        queue
            .hurl("order-12", "billing", "invoice.send", Some(json!("paid")), None)
            .await
            .unwrap();
        let mut notifications = vec![decode(&events.recv().await.unwrap())];
        tokio::time::sleep(INTERVAL * 5).await;
        notifications.extend(drain(&mut events));

        let processed = store
            .load_latest(&RockId::from_base("order-12"))
            .await
            .unwrap()
            .unwrap()
            .record
            .processed();
        (exec.calls(), notifications, processed)
    }

    #[tokio::test(start_paused = true)]
    async fn completion_write_is_retried_without_rerunning_the_action() {
        let (calls, notifications, processed) = complete_with_failing_writes(2).await;
        assert_eq!(calls, 1);
        assert_eq!(notifications.len(), 1);
        assert!(notifications[0].is_success());
        assert!(processed);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_is_still_announced_when_every_write_fails() {
        let (calls, notifications, processed) = complete_with_failing_writes(10).await;
        assert_eq!(calls, 1);
        assert_eq!(notifications.len(), 1);
        assert!(notifications[0].is_success());
        assert!(!processed);
    }

    #[tokio::test]
    async fn empty_base_id_is_rejected() {
        let s = setup(Countdown::new(0), Arc::new(InMemoryRockStore::new()));
        assert!(s.queue.hurl("", "s", "a", None, None).await.is_err());
        assert!(s.queue.break_rock("").await.is_err());
    }
}
