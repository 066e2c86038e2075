//! Evaluation core: the per-cycle alarm state machine
//!
//! One `run_cycle` pass reads every alarm definition, looks up the latest
//! sample for its metric, and drives the OK / ALARMED / SUPPRESSED state
//! machine. Transitions into and out of ALARMED hand an event to the
//! dispatcher; state is persisted per transition so restarts do not
//! re-notify an alarm already in breach within its cooldown.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::contacter::Dispatcher;
use crate::model::{
    AlarmDefinition, AlarmEvent, AlarmId, AlarmState, AlarmStatus, ConditionSample, EventKind,
};
use crate::state::{StateError, StateStore};
use crate::store::{AlarmRegistry, ConditionStore, StoreError};

/// What happened during one evaluation cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub evaluated: usize,
    pub transitions: usize,
    pub notified: usize,
    pub data_gaps: usize,
    /// Alarms skipped because an evaluation was already in flight
    pub skipped: usize,
    pub delivery_failures: usize,
    /// Transitions whose state write failed after all retries
    pub unpersisted: usize,
}

pub struct AlarmChecker {
    registry: Arc<dyn AlarmRegistry>,
    conditions: Arc<dyn ConditionStore>,
    dispatcher: Arc<dyn Dispatcher>,
    state_store: StateStore,
    states: Mutex<HashMap<AlarmId, AlarmState>>,
    /// Per-alarm guard: at most one in-flight evaluation per alarm id
    in_flight: DashMap<AlarmId, ()>,
}

impl AlarmChecker {
    /// Build the checker, loading persisted state so restarts pick up
    /// where the previous process left off
    pub fn new(
        registry: Arc<dyn AlarmRegistry>,
        conditions: Arc<dyn ConditionStore>,
        dispatcher: Arc<dyn Dispatcher>,
        state_store: StateStore,
    ) -> Result<Self, StateError> {
        let states = state_store.load_all()?;
        if !states.is_empty() {
            tracing::info!(alarms = states.len(), "loaded persisted alarm state");
        }
        Ok(Self {
            registry,
            conditions,
            dispatcher,
            state_store,
            states: Mutex::new(states),
            in_flight: DashMap::new(),
        })
    }

    /// Current state of one alarm (OK with no history if never seen)
    pub fn state_of(&self, id: &str) -> AlarmState {
        self.states.lock().get(id).cloned().unwrap_or_default()
    }

    /// Run one evaluation pass over all alarm definitions.
    ///
    /// A registry or condition store failure aborts this cycle only; the
    /// caller retries on the next tick.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleSummary, StoreError> {
        let definitions = self.registry.load_definitions()?;
        let mut summary = CycleSummary::default();

        for def in &definitions {
            summary.evaluated += 1;
            self.evaluate_alarm(def, now, &mut summary).await?;
        }

        tracing::info!(
            evaluated = summary.evaluated,
            transitions = summary.transitions,
            notified = summary.notified,
            data_gaps = summary.data_gaps,
            skipped = summary.skipped,
            delivery_failures = summary.delivery_failures,
            "evaluation cycle complete"
        );

        Ok(summary)
    }

    async fn evaluate_alarm(
        &self,
        def: &AlarmDefinition,
        now: DateTime<Utc>,
        summary: &mut CycleSummary,
    ) -> Result<(), StoreError> {
        if self.in_flight.insert(def.id.clone(), ()).is_some() {
            tracing::warn!(alarm = %def.id, "evaluation already in flight, skipping");
            summary.skipped += 1;
            return Ok(());
        }
        let result = self.evaluate_guarded(def, now, summary).await;
        self.in_flight.remove(&def.id);
        result
    }

    async fn evaluate_guarded(
        &self,
        def: &AlarmDefinition,
        now: DateTime<Utc>,
        summary: &mut CycleSummary,
    ) -> Result<(), StoreError> {
        let mut current = self.state_of(&def.id);

        // Disabled definitions are suppressed; no notification on entry
        // or exit.
        if !def.enabled {
            if current.status != AlarmStatus::Suppressed {
                tracing::info!(alarm = %def.id, "alarm disabled, suppressing");
                summary.transitions += 1;
                self.commit(
                    def,
                    AlarmState {
                        status: AlarmStatus::Suppressed,
                        last_transition_at: Some(now),
                        last_notified_at: current.last_notified_at,
                        clear_streak: 0,
                    },
                    summary,
                )
                .await;
            }
            return Ok(());
        }

        // A re-enabled alarm leaves SUPPRESSED into OK silently; a breach
        // that predates the suppression must re-qualify from OK.
        if current.status == AlarmStatus::Suppressed {
            tracing::info!(alarm = %def.id, "alarm re-enabled");
            summary.transitions += 1;
            current = AlarmState {
                status: AlarmStatus::Ok,
                last_transition_at: Some(now),
                last_notified_at: current.last_notified_at,
                clear_streak: 0,
            };
            self.commit(def, current.clone(), summary).await;
        }

        let sample = match self.conditions.latest(&def.metric_key)? {
            Some(sample) => sample,
            None => {
                // Cannot evaluate; never treated as breach or clear
                tracing::warn!(
                    alarm = %def.id,
                    metric = %def.metric_key,
                    "no condition sample, state unchanged (data gap)"
                );
                summary.data_gaps += 1;
                return Ok(());
            }
        };

        let breaching = def.comparator.holds(sample.value, def.threshold);

        match (current.status, breaching) {
            (AlarmStatus::Ok, true) => {
                tracing::warn!(
                    alarm = %def.id,
                    metric = %def.metric_key,
                    value = sample.value,
                    threshold = def.threshold,
                    "alarm started"
                );
                summary.transitions += 1;
                self.commit(
                    def,
                    AlarmState {
                        status: AlarmStatus::Alarmed,
                        last_transition_at: Some(now),
                        last_notified_at: Some(now),
                        clear_streak: 0,
                    },
                    summary,
                )
                .await;
                self.notify(def, &sample, EventKind::Breach, now, summary).await;
            }
            (AlarmStatus::Ok, false) => {}
            (AlarmStatus::Alarmed, true) => {
                if cooldown_elapsed(&current, def, now) {
                    tracing::warn!(alarm = %def.id, "alarm still active, cooldown elapsed");
                    self.commit(
                        def,
                        AlarmState {
                            status: AlarmStatus::Alarmed,
                            last_transition_at: current.last_transition_at,
                            last_notified_at: Some(now),
                            clear_streak: 0,
                        },
                        summary,
                    )
                    .await;
                    self.notify(def, &sample, EventKind::Repeat, now, summary).await;
                } else if current.clear_streak != 0 {
                    // Breach resumed before the debounce was satisfied
                    self.commit(
                        def,
                        AlarmState {
                            clear_streak: 0,
                            ..current
                        },
                        summary,
                    )
                    .await;
                }
            }
            (AlarmStatus::Alarmed, false) => {
                let streak = current.clear_streak + 1;
                if streak >= def.debounce_cycles {
                    tracing::info!(
                        alarm = %def.id,
                        clear_cycles = streak,
                        "alarm resolved"
                    );
                    summary.transitions += 1;
                    self.commit(
                        def,
                        AlarmState {
                            status: AlarmStatus::Ok,
                            last_transition_at: Some(now),
                            last_notified_at: current.last_notified_at,
                            clear_streak: 0,
                        },
                        summary,
                    )
                    .await;
                    self.notify(def, &sample, EventKind::Resolved, now, summary)
                        .await;
                } else {
                    tracing::debug!(
                        alarm = %def.id,
                        clear_cycles = streak,
                        needed = def.debounce_cycles,
                        "clear reading, debounce not yet satisfied"
                    );
                    self.commit(
                        def,
                        AlarmState {
                            clear_streak: streak,
                            ..current
                        },
                        summary,
                    )
                    .await;
                }
            }
            (AlarmStatus::Suppressed, _) => {}
        }

        Ok(())
    }

    /// Update the in-memory table, then persist with bounded retry. A
    /// persistence failure is logged and counted but never blocks the
    /// notification; the next cycle may re-notify while the store stays
    /// broken.
    async fn commit(&self, def: &AlarmDefinition, next: AlarmState, summary: &mut CycleSummary) {
        let snapshot = {
            let mut states = self.states.lock();
            states.insert(def.id.clone(), next);
            states.clone()
        };

        if let Err(e) = self.state_store.persist_with_retry(&snapshot).await {
            tracing::error!(
                alarm = %def.id,
                error = %e,
                "state transition not persisted; a restart may re-notify"
            );
            summary.unpersisted += 1;
        }
    }

    async fn notify(
        &self,
        def: &AlarmDefinition,
        sample: &ConditionSample,
        kind: EventKind,
        now: DateTime<Utc>,
        summary: &mut CycleSummary,
    ) {
        if def.recipients.is_empty() {
            tracing::warn!(alarm = %def.id, "no recipients configured, alarm only logged");
            return;
        }

        let event = AlarmEvent::new(kind, def, sample, now);
        let result = self.dispatcher.dispatch(&event, &def.recipients).await;
        summary.notified += 1;
        summary.delivery_failures += result.failed();

        tracing::info!(
            alarm = %def.id,
            kind = ?kind,
            delivered = result.delivered(),
            failed = result.failed(),
            skipped = result.skipped(),
            "dispatch complete"
        );
    }
}

fn cooldown_elapsed(state: &AlarmState, def: &AlarmDefinition, now: DateTime<Utc>) -> bool {
    match state.last_notified_at {
        Some(last) => {
            now.signed_duration_since(last) >= chrono::Duration::seconds(def.cooldown_secs as i64)
        }
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    use super::*;
    use crate::channel::ChannelKind;
    use crate::model::{Comparator, DispatchOutcome, DispatchResult, Recipient};
    use crate::store::testing::{MemoryConditions, MemoryRegistry};

    /// Dispatcher that records events and reports every recipient delivered
    #[derive(Default)]
    struct RecordingDispatcher {
        events: Mutex<Vec<AlarmEvent>>,
    }

    impl RecordingDispatcher {
        fn kinds(&self) -> Vec<EventKind> {
            self.events.lock().iter().map(|e| e.kind).collect()
        }
    }

    #[async_trait::async_trait]
    impl Dispatcher for RecordingDispatcher {
        async fn dispatch(&self, event: &AlarmEvent, recipients: &[Recipient]) -> DispatchResult {
            self.events.lock().push(event.clone());
            let mut result = DispatchResult::default();
            for recipient in recipients {
                result.outcomes.insert(
                    recipient.id.clone(),
                    DispatchOutcome::Delivered {
                        channel: ChannelKind::Fcm,
                    },
                );
            }
            result
        }
    }

    struct Fixture {
        registry: Arc<MemoryRegistry>,
        conditions: Arc<MemoryConditions>,
        dispatcher: Arc<RecordingDispatcher>,
        checker: AlarmChecker,
        _dir: tempfile::TempDir,
    }

    fn fixture_with(def: AlarmDefinition) -> Fixture {
        let dir = tempfile::TempDir::new().unwrap();
        let registry = Arc::new(MemoryRegistry::new());
        registry.put(def);
        let conditions = Arc::new(MemoryConditions::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let checker = AlarmChecker::new(
            Arc::clone(&registry) as Arc<dyn AlarmRegistry>,
            Arc::clone(&conditions) as Arc<dyn ConditionStore>,
            Arc::clone(&dispatcher) as Arc<dyn Dispatcher>,
            StateStore::new(dir.path().join("state.json")),
        )
        .unwrap();

        Fixture {
            registry,
            conditions,
            dispatcher,
            checker,
            _dir: dir,
        }
    }

    fn humidity_alarm() -> AlarmDefinition {
        AlarmDefinition::new("a1", "Humidity high", "room1.humidity", Comparator::Gt, 90.0)
            .with_cooldown_secs(60)
            .with_recipient(
                Recipient::new("curator")
                    .with_channel(ChannelKind::Fcm)
                    .with_fcm_token("token"),
            )
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_breach_notifies_exactly_once_within_cooldown() {
        let fx = fixture_with(humidity_alarm());

        // Sample sequence [85, 95, 96] at 20s spacing, cooldown 60s.
        fx.conditions.set("room1.humidity", 85.0, t0());
        let summary = fx.checker.run_cycle(t0()).await.unwrap();
        assert_eq!(summary.transitions, 0);
        assert_eq!(fx.checker.state_of("a1").status, AlarmStatus::Ok);

        fx.conditions.set("room1.humidity", 95.0, t0() + ChronoDuration::seconds(20));
        let summary = fx
            .checker
            .run_cycle(t0() + ChronoDuration::seconds(20))
            .await
            .unwrap();
        assert_eq!(summary.transitions, 1);
        assert_eq!(summary.notified, 1);
        assert_eq!(fx.checker.state_of("a1").status, AlarmStatus::Alarmed);

        fx.conditions.set("room1.humidity", 96.0, t0() + ChronoDuration::seconds(40));
        let summary = fx
            .checker
            .run_cycle(t0() + ChronoDuration::seconds(40))
            .await
            .unwrap();
        assert_eq!(summary.notified, 0, "no renotify before cooldown elapses");

        assert_eq!(fx.dispatcher.kinds(), vec![EventKind::Breach]);
    }

    #[tokio::test]
    async fn test_replay_with_unchanged_data_is_idempotent() {
        let fx = fixture_with(humidity_alarm());
        fx.conditions.set("room1.humidity", 95.0, t0());

        fx.checker.run_cycle(t0()).await.unwrap();
        fx.checker.run_cycle(t0()).await.unwrap();
        fx.checker.run_cycle(t0()).await.unwrap();

        assert_eq!(fx.dispatcher.kinds(), vec![EventKind::Breach]);
    }

    #[tokio::test]
    async fn test_repeat_notification_after_cooldown() {
        let fx = fixture_with(humidity_alarm());
        fx.conditions.set("room1.humidity", 95.0, t0());

        fx.checker.run_cycle(t0()).await.unwrap();
        fx.checker
            .run_cycle(t0() + ChronoDuration::seconds(70))
            .await
            .unwrap();

        assert_eq!(fx.dispatcher.kinds(), vec![EventKind::Breach, EventKind::Repeat]);
    }

    #[tokio::test]
    async fn test_resolution_with_default_debounce() {
        let fx = fixture_with(humidity_alarm());
        fx.conditions.set("room1.humidity", 95.0, t0());
        fx.checker.run_cycle(t0()).await.unwrap();

        fx.conditions.set("room1.humidity", 50.0, t0() + ChronoDuration::seconds(20));
        fx.checker
            .run_cycle(t0() + ChronoDuration::seconds(20))
            .await
            .unwrap();

        assert_eq!(fx.checker.state_of("a1").status, AlarmStatus::Ok);
        assert_eq!(fx.dispatcher.kinds(), vec![EventKind::Breach, EventKind::Resolved]);
    }

    #[tokio::test]
    async fn test_debounce_of_two_needs_two_clear_readings() {
        let fx = fixture_with(humidity_alarm().with_debounce_cycles(2));
        fx.conditions.set("room1.humidity", 95.0, t0());
        fx.checker.run_cycle(t0()).await.unwrap();

        // One clear reading is not enough.
        fx.conditions.set("room1.humidity", 50.0, t0() + ChronoDuration::seconds(20));
        fx.checker
            .run_cycle(t0() + ChronoDuration::seconds(20))
            .await
            .unwrap();
        assert_eq!(fx.checker.state_of("a1").status, AlarmStatus::Alarmed);
        assert_eq!(fx.checker.state_of("a1").clear_streak, 1);

        // Second consecutive clear reading resolves.
        fx.checker
            .run_cycle(t0() + ChronoDuration::seconds(40))
            .await
            .unwrap();
        assert_eq!(fx.checker.state_of("a1").status, AlarmStatus::Ok);
        assert_eq!(fx.dispatcher.kinds(), vec![EventKind::Breach, EventKind::Resolved]);
    }

    #[tokio::test]
    async fn test_breach_resuming_resets_debounce_streak() {
        let fx = fixture_with(humidity_alarm().with_debounce_cycles(2));
        fx.conditions.set("room1.humidity", 95.0, t0());
        fx.checker.run_cycle(t0()).await.unwrap();

        fx.conditions.set("room1.humidity", 50.0, t0() + ChronoDuration::seconds(20));
        fx.checker
            .run_cycle(t0() + ChronoDuration::seconds(20))
            .await
            .unwrap();
        assert_eq!(fx.checker.state_of("a1").clear_streak, 1);

        // Breach resumes: streak goes back to zero, still alarmed.
        fx.conditions.set("room1.humidity", 95.0, t0() + ChronoDuration::seconds(40));
        fx.checker
            .run_cycle(t0() + ChronoDuration::seconds(40))
            .await
            .unwrap();
        assert_eq!(fx.checker.state_of("a1").status, AlarmStatus::Alarmed);
        assert_eq!(fx.checker.state_of("a1").clear_streak, 0);
    }

    #[tokio::test]
    async fn test_missing_sample_is_a_data_gap() {
        let fx = fixture_with(humidity_alarm());

        let summary = fx.checker.run_cycle(t0()).await.unwrap();
        assert_eq!(summary.data_gaps, 1);
        assert_eq!(summary.transitions, 0);
        assert_eq!(fx.checker.state_of("a1").status, AlarmStatus::Ok);
        assert!(fx.dispatcher.kinds().is_empty());

        // Same while alarmed: a vanished metric never clears the alarm.
        fx.conditions.set("room1.humidity", 95.0, t0());
        fx.checker.run_cycle(t0()).await.unwrap();
        fx.conditions.clear("room1.humidity");
        let summary = fx
            .checker
            .run_cycle(t0() + ChronoDuration::seconds(20))
            .await
            .unwrap();
        assert_eq!(summary.data_gaps, 1);
        assert_eq!(fx.checker.state_of("a1").status, AlarmStatus::Alarmed);
    }

    #[tokio::test]
    async fn test_store_failure_aborts_cycle_without_transition() {
        let fx = fixture_with(humidity_alarm());
        fx.conditions.set_failing(true);

        assert!(fx.checker.run_cycle(t0()).await.is_err());
        assert_eq!(fx.checker.state_of("a1").status, AlarmStatus::Ok);
        assert!(fx.dispatcher.kinds().is_empty());

        // Next tick recovers.
        fx.conditions.set_failing(false);
        fx.conditions.set("room1.humidity", 95.0, t0());
        fx.checker.run_cycle(t0()).await.unwrap();
        assert_eq!(fx.checker.state_of("a1").status, AlarmStatus::Alarmed);
    }

    #[tokio::test]
    async fn test_disabled_alarm_suppresses_silently() {
        let fx = fixture_with(humidity_alarm());
        fx.conditions.set("room1.humidity", 95.0, t0());
        fx.checker.run_cycle(t0()).await.unwrap();
        assert_eq!(fx.dispatcher.kinds(), vec![EventKind::Breach]);

        // Disable: transition to SUPPRESSED, no notification.
        fx.registry.put(humidity_alarm().with_enabled(false));
        fx.checker
            .run_cycle(t0() + ChronoDuration::seconds(20))
            .await
            .unwrap();
        assert_eq!(fx.checker.state_of("a1").status, AlarmStatus::Suppressed);
        assert_eq!(fx.dispatcher.kinds(), vec![EventKind::Breach]);

        // Re-enable while still breaching: back through OK, then a fresh
        // breach episode on the same cycle's evaluation.
        fx.registry.put(humidity_alarm());
        fx.checker
            .run_cycle(t0() + ChronoDuration::seconds(40))
            .await
            .unwrap();
        assert_eq!(fx.checker.state_of("a1").status, AlarmStatus::Alarmed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unpersisted_transition_still_notifies() {
        let dir = tempfile::TempDir::new().unwrap();
        // State path under a plain file: every persist attempt fails.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();

        let registry = Arc::new(MemoryRegistry::new());
        registry.put(humidity_alarm());
        let conditions = Arc::new(MemoryConditions::new());
        conditions.set("room1.humidity", 95.0, t0());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let checker = AlarmChecker::new(
            Arc::clone(&registry) as Arc<dyn AlarmRegistry>,
            Arc::clone(&conditions) as Arc<dyn ConditionStore>,
            Arc::clone(&dispatcher) as Arc<dyn Dispatcher>,
            StateStore::new(blocker.join("state.json")),
        )
        .unwrap();

        let summary = checker.run_cycle(t0()).await.unwrap();
        assert_eq!(summary.unpersisted, 1);
        // Operator awareness wins over exact-once bookkeeping.
        assert_eq!(dispatcher.kinds(), vec![EventKind::Breach]);
        assert_eq!(checker.state_of("a1").status, AlarmStatus::Alarmed);
    }

    #[tokio::test]
    async fn test_restart_does_not_renotify_within_cooldown() {
        let dir = tempfile::TempDir::new().unwrap();
        let state_path = dir.path().join("state.json");

        let registry = Arc::new(MemoryRegistry::new());
        registry.put(humidity_alarm());
        let conditions = Arc::new(MemoryConditions::new());
        conditions.set("room1.humidity", 95.0, t0());

        let first_dispatcher = Arc::new(RecordingDispatcher::default());
        let checker = AlarmChecker::new(
            Arc::clone(&registry) as Arc<dyn AlarmRegistry>,
            Arc::clone(&conditions) as Arc<dyn ConditionStore>,
            Arc::clone(&first_dispatcher) as Arc<dyn Dispatcher>,
            StateStore::new(&state_path),
        )
        .unwrap();
        checker.run_cycle(t0()).await.unwrap();
        assert_eq!(first_dispatcher.kinds(), vec![EventKind::Breach]);
        drop(checker);

        // "Restart": a fresh checker over the same state file.
        let second_dispatcher = Arc::new(RecordingDispatcher::default());
        let checker = AlarmChecker::new(
            Arc::clone(&registry) as Arc<dyn AlarmRegistry>,
            Arc::clone(&conditions) as Arc<dyn ConditionStore>,
            Arc::clone(&second_dispatcher) as Arc<dyn Dispatcher>,
            StateStore::new(&state_path),
        )
        .unwrap();
        checker
            .run_cycle(t0() + ChronoDuration::seconds(20))
            .await
            .unwrap();

        assert!(second_dispatcher.kinds().is_empty());
        assert_eq!(checker.state_of("a1").status, AlarmStatus::Alarmed);
    }

    /// Dispatcher that parks until released, so a cycle can be held
    /// in flight from the test body
    struct StallDispatcher {
        entered: tokio::sync::mpsc::UnboundedSender<()>,
        gate: Arc<tokio::sync::Notify>,
    }

    #[async_trait::async_trait]
    impl Dispatcher for StallDispatcher {
        async fn dispatch(&self, _event: &AlarmEvent, recipients: &[Recipient]) -> DispatchResult {
            let _ = self.entered.send(());
            self.gate.notified().await;
            let mut result = DispatchResult::default();
            for recipient in recipients {
                result.outcomes.insert(
                    recipient.id.clone(),
                    DispatchOutcome::Delivered {
                        channel: ChannelKind::Fcm,
                    },
                );
            }
            result
        }
    }

    #[tokio::test]
    async fn test_concurrent_evaluation_of_same_alarm_is_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let (entered_tx, mut entered_rx) = tokio::sync::mpsc::unbounded_channel();
        let gate = Arc::new(tokio::sync::Notify::new());

        let registry = Arc::new(MemoryRegistry::new());
        registry.put(humidity_alarm());
        let conditions = Arc::new(MemoryConditions::new());
        conditions.set("room1.humidity", 95.0, t0());

        let checker = Arc::new(
            AlarmChecker::new(
                Arc::clone(&registry) as Arc<dyn AlarmRegistry>,
                Arc::clone(&conditions) as Arc<dyn ConditionStore>,
                Arc::new(StallDispatcher {
                    entered: entered_tx,
                    gate: Arc::clone(&gate),
                }) as Arc<dyn Dispatcher>,
                StateStore::new(dir.path().join("state.json")),
            )
            .unwrap(),
        );

        // First cycle blocks inside dispatch, holding the alarm in flight.
        let first = {
            let checker = Arc::clone(&checker);
            tokio::spawn(async move { checker.run_cycle(t0()).await })
        };
        entered_rx.recv().await.unwrap();

        // Second cycle must skip the alarm, not evaluate it in parallel.
        let second = checker.run_cycle(t0()).await.unwrap();
        assert_eq!(second.skipped, 1);
        assert_eq!(second.notified, 0);

        gate.notify_one();
        let first = first.await.unwrap().unwrap();
        assert_eq!(first.notified, 1);
    }
}
