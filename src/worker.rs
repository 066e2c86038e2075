//! Fixed-interval scheduler driving the checker
//!
//! One background task owns the timer. Missed ticks are skipped so cycles
//! never run concurrently; a cycle stuck past the hard ceiling is abandoned
//! and logged. No failure here is fatal to the process.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::checker::AlarmChecker;

pub struct CheckerWorker {
    checker: Arc<AlarmChecker>,
    interval: Duration,
    cycle_ceiling: Duration,
    shutdown_grace: Duration,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CheckerWorker {
    pub fn new(
        checker: Arc<AlarmChecker>,
        interval: Duration,
        cycle_ceiling: Duration,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            checker,
            interval,
            cycle_ceiling,
            shutdown_grace,
            shutdown_tx: None,
            handle: None,
        }
    }

    /// Start the background evaluation loop
    pub fn start(&mut self) {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let checker = Arc::clone(&self.checker);
        let tick_interval = self.interval;
        let ceiling = self.cycle_ceiling;

        self.handle = Some(tokio::spawn(async move {
            tracing::info!(interval = ?tick_interval, "alarm checker started");

            let mut ticker = interval(tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let started = Instant::now();
                        match tokio::time::timeout(ceiling, checker.run_cycle(Utc::now())).await {
                            Ok(Ok(_summary)) => {
                                if started.elapsed() > tick_interval {
                                    tracing::warn!(
                                        elapsed = ?started.elapsed(),
                                        "cycle overran the tick interval, next tick skipped"
                                    );
                                }
                            }
                            Ok(Err(e)) => {
                                tracing::warn!(error = %e, "cycle aborted, will retry on next tick");
                            }
                            Err(_) => {
                                tracing::error!(
                                    ceiling = ?ceiling,
                                    "cycle exceeded hard ceiling, abandoned"
                                );
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("alarm checker shutting down");
                        break;
                    }
                }
            }
        }));
    }

    /// Signal shutdown and wait for an in-flight cycle, bounded by the
    /// grace period
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(mut handle) = self.handle.take() {
            if tokio::time::timeout(self.shutdown_grace, &mut handle)
                .await
                .is_err()
            {
                tracing::warn!(
                    grace = ?self.shutdown_grace,
                    "in-flight cycle did not finish within grace period, aborting"
                );
                handle.abort();
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}
