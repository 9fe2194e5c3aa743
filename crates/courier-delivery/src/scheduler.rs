//! Periodic dispatch scheduler.
//!
//! Each run owns a cancellation token and one background loop. The loop
//! makes an immediate pass, then one pass per tick: claim a batch, dispatch
//! every message in claim order, repeat. Cancellation is observed only
//! between passes, so a claimed batch always finishes.
//!
//! ```text
//!            start()                 stop()
//! Stopped ───────────▶ Running(run) ───────▶ Stopped
//!                          │                    │
//!                          └── loop task ───────┴──▶ retired (awaited by shutdown)
//! ```

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use courier_core::time::{Clock, RealClock};
use serde::Serialize;
use tokio::{
    runtime::Handle,
    sync::RwLock,
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{DispatchError, Result},
    sender::Dispatcher,
    storage::MessageStore,
};

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum messages claimed per pass.
    pub batch_size: usize,
    /// Time between passes.
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: crate::DEFAULT_BATCH_SIZE,
            tick_interval: Duration::from_secs(crate::DEFAULT_TICK_INTERVAL_SECONDS),
        }
    }
}

/// Counters accumulated across all runs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    /// Runs started since creation.
    pub runs_started: u64,
    /// Passes completed, including empty ones.
    pub passes: u64,
    /// Messages claimed.
    pub messages_claimed: u64,
    /// Messages the provider accepted and the store recorded.
    pub messages_sent: u64,
    /// Failed provider attempts that were recorded.
    pub delivery_failures: u64,
    /// Claims that failed because the store was unavailable.
    pub claim_failures: u64,
    /// Dispatches where provider and store disagree.
    pub reconciliation_errors: u64,
    /// When the most recent pass finished.
    pub last_pass_at: Option<DateTime<Utc>>,
}

/// Outcome counts for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    /// Messages claimed by the pass.
    pub claimed: usize,
    /// Messages sent and recorded.
    pub sent: usize,
    /// Messages whose provider attempt failed.
    pub failed: usize,
    /// Messages left needing attention after a store failure.
    pub unreconciled: usize,
}

struct ActiveRun {
    run_id: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

enum RunState {
    Stopped,
    Running(ActiveRun),
}

struct Worker {
    store: Arc<dyn MessageStore>,
    dispatcher: Arc<Dispatcher>,
    config: SchedulerConfig,
    stats: RwLock<SchedulerStats>,
    clock: Arc<dyn Clock>,
}

/// Start/stop controller for the dispatch loop.
///
/// At most one loop is current at a time. A stopped loop may still be
/// finishing its last pass; the store's claim keeps it from overlapping with
/// a newer run.
pub struct Scheduler {
    worker: Arc<Worker>,
    state: Mutex<RunState>,
    retired: Mutex<Vec<JoinHandle<()>>>,
    next_run_id: AtomicU64,
}

impl Scheduler {
    /// Creates a stopped scheduler.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Configuration` for a zero batch size or tick
    /// interval.
    pub fn new(
        store: Arc<dyn MessageStore>,
        dispatcher: Arc<Dispatcher>,
        config: SchedulerConfig,
    ) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(DispatchError::configuration("batch size must be greater than 0"));
        }
        if config.tick_interval.is_zero() {
            return Err(DispatchError::configuration("tick interval must be greater than 0"));
        }

        let worker = Worker {
            store,
            dispatcher,
            config,
            stats: RwLock::new(SchedulerStats::default()),
            clock: Arc::new(RealClock::new()),
        };

        Ok(Self {
            worker: Arc::new(worker),
            state: Mutex::new(RunState::Stopped),
            retired: Mutex::new(Vec::new()),
            next_run_id: AtomicU64::new(0),
        })
    }

    /// Starts a new run.
    ///
    /// Must be called from within a tokio runtime. The first pass begins
    /// immediately on the spawned loop.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::AlreadyRunning` if a run is active, or
    /// `DispatchError::Configuration` outside a runtime.
    pub fn start(&self) -> Result<()> {
        let runtime = Handle::try_current().map_err(|e| {
            DispatchError::configuration(format!("scheduler requires a tokio runtime: {e}"))
        })?;

        let mut state = self.lock_state();
        if let RunState::Running(run) = &*state {
            debug!(run_id = run.run_id, "start requested while running");
            return Err(DispatchError::AlreadyRunning);
        }

        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();
        let handle = runtime.spawn(run_loop(self.worker.clone(), run_id, token.clone()));
        *state = RunState::Running(ActiveRun { run_id, token, handle });
        drop(state);

        info!(
            run_id,
            batch_size = self.worker.config.batch_size,
            tick_interval_ms = self.worker.config.tick_interval.as_millis(),
            "scheduler started"
        );
        Ok(())
    }

    /// Stops the current run without waiting for its in-flight pass.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::NotRunning` if no run is active.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.lock_state();
        let RunState::Running(run) = std::mem::replace(&mut *state, RunState::Stopped) else {
            debug!("stop requested while stopped");
            return Err(DispatchError::NotRunning);
        };

        run.token.cancel();
        let mut retired = self.lock_retired();
        retired.retain(|handle| !handle.is_finished());
        retired.push(run.handle);
        drop(retired);
        drop(state);

        info!(run_id = run.run_id, "scheduler stopped");
        Ok(())
    }

    /// Returns whether a run is active.
    pub fn is_running(&self) -> bool {
        matches!(*self.lock_state(), RunState::Running(_))
    }

    /// Returns the id of the active run, if any.
    pub fn current_run_id(&self) -> Option<u64> {
        match &*self.lock_state() {
            RunState::Running(run) => Some(run.run_id),
            RunState::Stopped => None,
        }
    }

    /// Returns a snapshot of the accumulated counters.
    pub async fn stats(&self) -> SchedulerStats {
        self.worker.stats.read().await.clone()
    }

    /// Runs one pass on the calling task.
    ///
    /// Independent of the run state; the claim keeps it from overlapping
    /// with a concurrent loop.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::StoreUnavailable` if the claim fails.
    pub async fn process_once(&self) -> Result<PassSummary> {
        self.worker.run_pass(0).await
    }

    /// Stops the active run, if any, and waits for every stopped loop to
    /// finish its last pass.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::ShutdownTimeout` if loops are still running
    /// after `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        match self.stop() {
            Ok(()) | Err(DispatchError::NotRunning) => {},
            Err(e) => return Err(e),
        }

        let handles = std::mem::take(&mut *self.lock_retired());
        info!(
            loops = handles.len(),
            timeout_ms = timeout.as_millis(),
            "waiting for scheduler loops to finish"
        );

        let drain = async {
            for handle in handles {
                if let Err(join_error) = handle.await {
                    error!(error = %join_error, "scheduler loop panicked");
                }
            }
        };

        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(timeout_ms = timeout.as_millis(), "scheduler shutdown timed out");
            return Err(DispatchError::ShutdownTimeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            });
        }

        info!("scheduler shutdown completed");
        Ok(())
    }

    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_retired(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.retired.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let RunState::Running(run) = &*self.lock_state() {
            run.token.cancel();
        }
    }
}

async fn run_loop(worker: Arc<Worker>, run_id: u64, token: CancellationToken) {
    worker.stats.write().await.runs_started += 1;

    let mut ticker = tokio::time::interval(worker.config.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(run_id, "scheduler loop started");

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = worker.run_pass(run_id).await {
                    error!(run_id, error = %e, "batch claim failed, retrying next tick");
                }
            }
        }
    }

    debug!(run_id, "scheduler loop exited");
}

impl Worker {
    async fn run_pass(&self, run_id: u64) -> Result<PassSummary> {
        let batch = match self.store.claim_next_batch(self.config.batch_size).await {
            Ok(batch) => batch,
            Err(e) => {
                self.stats.write().await.claim_failures += 1;
                return Err(e.into());
            },
        };

        let mut summary = PassSummary { claimed: batch.len(), ..PassSummary::default() };

        if !batch.is_empty() {
            debug!(run_id, batch_size = batch.len(), "processing batch");

            for message in &batch {
                match self.dispatcher.send(message).await {
                    Ok(_) => summary.sent += 1,
                    Err(e) if e.is_delivery_failure() => summary.failed += 1,
                    Err(_) => summary.unreconciled += 1,
                }
            }
        }

        self.record(summary).await;
        Ok(summary)
    }

    async fn record(&self, summary: PassSummary) {
        let mut stats = self.stats.write().await;
        stats.passes += 1;
        stats.messages_claimed += summary.claimed as u64;
        stats.messages_sent += summary.sent as u64;
        stats.delivery_failures += summary.failed as u64;
        stats.reconciliation_errors += summary.unreconciled as u64;
        stats.last_pass_at = Some(self.clock.now_utc());
    }
}

#[cfg(test)]
mod tests {
    use std::{future::Future, pin::Pin};

    use chrono::Utc;
    use courier_core::Message;

    use super::*;
    use crate::{
        client::DeliveryProvider,
        sender::DispatcherConfig,
        storage::mock::MockMessageStore,
    };

    struct AcceptAll;

    impl DeliveryProvider for AcceptAll {
        fn send<'a>(
            &'a self,
            message: &'a Message,
        ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
            Box::pin(async move { Ok(format!("prov-{}", message.id)) })
        }
    }

    fn scheduler(store: Arc<MockMessageStore>, tick: Duration) -> Scheduler {
        let dispatcher =
            Dispatcher::new(store.clone(), Arc::new(AcceptAll), DispatcherConfig::default());
        Scheduler::new(
            store,
            Arc::new(dispatcher),
            SchedulerConfig { batch_size: 2, tick_interval: tick },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let scheduler = scheduler(Arc::new(MockMessageStore::new()), Duration::from_secs(60));

        scheduler.start().unwrap();
        let run_id = scheduler.current_run_id();

        assert!(matches!(scheduler.start(), Err(DispatchError::AlreadyRunning)));
        assert!(scheduler.is_running());
        assert_eq!(scheduler.current_run_id(), run_id);

        scheduler.shutdown(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn stop_while_stopped_is_rejected() {
        let scheduler = scheduler(Arc::new(MockMessageStore::new()), Duration::from_secs(60));

        assert!(matches!(scheduler.stop(), Err(DispatchError::NotRunning)));
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.current_run_id(), None);
    }

    #[tokio::test]
    async fn restart_gets_fresh_run_id() {
        let scheduler = scheduler(Arc::new(MockMessageStore::new()), Duration::from_secs(60));

        scheduler.start().unwrap();
        let first = scheduler.current_run_id().unwrap();
        scheduler.stop().unwrap();
        scheduler.start().unwrap();
        let second = scheduler.current_run_id().unwrap();

        assert_ne!(first, second);
        scheduler.shutdown(Duration::from_secs(5)).await.unwrap();
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn first_pass_runs_immediately() {
        let store = Arc::new(MockMessageStore::new());
        store.add_message(Message::queued("+15550001111", "hi", Utc::now())).await;
        let scheduler = scheduler(store.clone(), Duration::from_secs(3_600));

        scheduler.start().unwrap();
        for _ in 0..100 {
            if store.count_with_status(courier_core::MessageStatus::Sent).await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        scheduler.shutdown(Duration::from_secs(5)).await.unwrap();

        assert_eq!(store.count_with_status(courier_core::MessageStatus::Sent).await, 1);
        let stats = scheduler.stats().await;
        assert_eq!(stats.runs_started, 1);
        assert_eq!(stats.messages_sent, 1);
    }

    #[tokio::test]
    async fn claim_failure_is_reported_by_process_once() {
        let store = Arc::new(MockMessageStore::new());
        store.inject_claim_error("connection refused").await;
        let scheduler = scheduler(store, Duration::from_secs(60));

        let result = scheduler.process_once().await;
        assert!(matches!(result, Err(DispatchError::StoreUnavailable { .. })));
        assert_eq!(scheduler.stats().await.claim_failures, 1);
    }

    #[tokio::test]
    async fn empty_pass_is_not_an_error() {
        let scheduler = scheduler(Arc::new(MockMessageStore::new()), Duration::from_secs(60));

        let summary = scheduler.process_once().await.unwrap();
        assert_eq!(summary, PassSummary::default());
        assert_eq!(scheduler.stats().await.passes, 1);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let store = Arc::new(MockMessageStore::new());
        let dispatcher =
            Dispatcher::new(store.clone(), Arc::new(AcceptAll), DispatcherConfig::default());
        let result = Scheduler::new(
            store,
            Arc::new(dispatcher),
            SchedulerConfig { batch_size: 0, tick_interval: Duration::from_secs(1) },
        );
        assert!(matches!(result, Err(DispatchError::Configuration { .. })));
    }

    #[test]
    fn start_outside_runtime_is_rejected() {
        let scheduler = scheduler(Arc::new(MockMessageStore::new()), Duration::from_secs(60));
        assert!(matches!(scheduler.start(), Err(DispatchError::Configuration { .. })));
        assert!(!scheduler.is_running());
    }
}
