//! The periodic loop driving synchronization and command dispatch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::collection::DataCollection;
use crate::commands::Dispatcher;
use crate::common::threads::{StopSignal, sleep_unless_stopped, spawn_guarded};
use crate::sync::{ExchangeOutcome, SyncExchange};

/// Time between two scheduler ticks.
pub const TICK_INTERVAL: Duration = Duration::from_millis(200);

/// What one tick did, mostly for logging and tests.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub exchange_launched: bool,
    pub dispatched: Option<u64>,
    pub workers_started: Vec<String>,
}

/// Runtime communication controls, shared with the local command handler.
pub struct CommSettings {
    enabled: AtomicBool,
    interval: Mutex<Duration>,
    sync_now: AtomicBool,
}

impl CommSettings {
    /// Starts disabled.
    pub fn new(interval: Duration) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            interval: Mutex::new(interval),
            sync_now: AtomicBool::new(false),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        log::info!("Communication {}", if enabled { "started" } else { "stopped" });
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_interval(&self, interval: Duration) {
        log::info!("Communication interval set to {:?}", interval);
        *self.interval.lock().unwrap_or_else(|e| e.into_inner()) = interval;
    }

    pub fn interval(&self) -> Duration {
        *self.interval.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next tick start an exchange regardless of the interval.
    pub fn sync_now(&self) {
        self.sync_now.store(true, Ordering::Release);
    }

    fn take_sync_now(&self) -> bool {
        self.sync_now.swap(false, Ordering::AcqRel)
    }
}

pub struct Scheduler {
    settings: Arc<CommSettings>,
    last_sync: Mutex<Instant>,
    exchange: Arc<SyncExchange>,
    dispatcher: Arc<Dispatcher>,
    collection: Arc<DataCollection>,
}

impl Scheduler {
    pub fn new(
        settings: Arc<CommSettings>,
        exchange: Arc<SyncExchange>,
        dispatcher: Arc<Dispatcher>,
        collection: Arc<DataCollection>,
        now: Instant,
    ) -> Self {
        Self {
            settings,
            last_sync: Mutex::new(now),
            exchange,
            dispatcher,
            collection,
        }
    }

    pub fn settings(&self) -> &Arc<CommSettings> {
        &self.settings
    }

    fn sync_due(&self, now: Instant) -> bool {
        if !self.settings.is_enabled() {
            return false;
        }
        let forced = self.settings.take_sync_now();
        let mut last_sync = self.last_sync.lock().unwrap_or_else(|e| e.into_inner());
        if !forced && now.saturating_duration_since(*last_sync) <= self.settings.interval() {
            return false;
        }
        *last_sync = now;
        true
    }

    fn launch_exchange(&self) -> bool {
        if self.exchange.is_in_flight() {
            log::debug!("Exchange still in flight, not launching another");
            return false;
        }
        let exchange = self.exchange.clone();
        match spawn_guarded("sync-exchange", move || {
            match exchange.run() {
                ExchangeOutcome::Committed { commands } => log::debug!("Exchange committed, {} new commands", commands),
                ExchangeOutcome::CommittedWithoutCommands(e) => log::debug!("Exchange committed without commands: {}", e),
                ExchangeOutcome::Failed(e) => log::debug!("Exchange failed: {}", e),
                ExchangeOutcome::Busy => log::debug!("Exchange skipped"),
            }
        }) {
            Ok(_) => true,
            Err(e) => {
                log::error!("Failed to spawn exchange thread: {}", e);
                false
            }
        }
    }

    /// One scheduler step.
    pub fn tick(&self, now: Instant) -> TickReport {
        let mut report = TickReport::default();

        if self.sync_due(now) {
            report.exchange_launched = self.launch_exchange();
        }

        if self.dispatcher.has_queued() {
            report.dispatched = self.dispatcher.dispatch_next(now);
        }

        self.dispatcher.sweep(now);

        report.workers_started = self.collection.relaunch_due(now);
        report
    }

    /// Tick every [`TICK_INTERVAL`] until `stop` fires.
    pub fn run(&self, stop: &StopSignal) {
        log::info!("Scheduler running");
        loop {
            let report = self.tick(Instant::now());
            if report.exchange_launched {
                log::debug!("Exchange launched");
            }
            if let Some(id) = report.dispatched {
                log::debug!("Dispatched command {}", id);
            }
            if !report.workers_started.is_empty() {
                log::debug!("Workers started: {}", report.workers_started.join(", "));
            }
            if sleep_unless_stopped(stop, TICK_INTERVAL) {
                break;
            }
        }
        self.collection.stop_all();
        log::info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{CommandState, DirectCommand, StatusReporter};
    use crate::sync::{ConsoleLog, DatapointStore};
    use crate::telemetry::TelemetryCache;
    use crate::testing::{FakeBackend, RecordingExecutor};
    use serde_json::json;
    use std::thread;

    struct Harness {
        scheduler: Scheduler,
        backend: Arc<FakeBackend>,
        dispatcher: Arc<Dispatcher>,
        executor: Arc<RecordingExecutor>,
        exchange: Arc<SyncExchange>,
    }

    fn harness(start: Instant) -> Harness {
        let telemetry = Arc::new(TelemetryCache::new());
        let backend = Arc::new(FakeBackend::new());
        let executor = Arc::new(RecordingExecutor::new());
        let datapoints = Arc::new(DatapointStore::new());
        let dispatcher = Arc::new(Dispatcher::new(executor.clone(), StatusReporter::new()));
        let exchange = Arc::new(SyncExchange::new(
            telemetry.clone(),
            backend.clone(),
            Arc::new(ConsoleLog::new()),
            datapoints.clone(),
            dispatcher.clone(),
        ));
        let collection = Arc::new(DataCollection::new(&[], telemetry, datapoints, start));
        Harness {
            scheduler: Scheduler::new(Arc::new(CommSettings::new(Duration::from_secs(10))), exchange.clone(), dispatcher.clone(), collection, start),
            backend,
            dispatcher,
            executor,
            exchange,
        }
    }

    fn wait_for_heartbeats(backend: &FakeBackend, count: usize) {
        for _ in 0..100 {
            if backend.heartbeats().len() >= count {
                return;
            }
            thread::sleep(Duration::from_millis(20));
        }
    }

    fn wait_idle(exchange: &SyncExchange) {
        for _ in 0..100 {
            if !exchange.is_in_flight() {
                return;
            }
            thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn test_disabled_scheduler_never_syncs() {
        let start = Instant::now();
        let h = harness(start);
        let report = h.scheduler.tick(start + Duration::from_secs(60));
        assert!(!report.exchange_launched);
    }

    #[test]
    fn test_sync_respects_interval() {
        let start = Instant::now();
        let h = harness(start);
        h.scheduler.settings().set_enabled(true);

        assert!(!h.scheduler.tick(start + Duration::from_secs(5)).exchange_launched);
        assert!(h.scheduler.tick(start + Duration::from_secs(11)).exchange_launched);
        wait_for_heartbeats(&h.backend, 1);
        wait_idle(&h.exchange);
        assert!(!h.scheduler.tick(start + Duration::from_secs(15)).exchange_launched);
        assert!(h.scheduler.tick(start + Duration::from_secs(22)).exchange_launched);
        wait_for_heartbeats(&h.backend, 2);
        assert_eq!(h.backend.heartbeats().len(), 2);
    }

    #[test]
    fn test_sync_now_forces_next_tick() {
        let start = Instant::now();
        let h = harness(start);
        h.scheduler.settings().set_enabled(true);
        h.scheduler.settings().sync_now();
        assert!(h.scheduler.tick(start + Duration::from_secs(1)).exchange_launched);
        wait_for_heartbeats(&h.backend, 1);
    }

    #[test]
    fn test_in_flight_exchange_is_not_doubled() {
        let start = Instant::now();
        let h = harness(start);
        h.backend.delay_posts(Duration::from_millis(500));
        h.scheduler.settings().set_enabled(true);
        h.scheduler.settings().set_interval(Duration::from_millis(10));

        assert!(h.scheduler.tick(start + Duration::from_secs(1)).exchange_launched);
        for _ in 0..100 {
            if h.exchange.is_in_flight() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!h.scheduler.tick(start + Duration::from_secs(2)).exchange_launched);
        wait_idle(&h.exchange);
        assert_eq!(h.backend.heartbeats().len(), 1);
    }

    #[test]
    fn test_one_command_per_tick_then_expiry() {
        let start = Instant::now();
        let h = harness(start);
        let commands: Vec<DirectCommand> = serde_json::from_value(json!([
            {"id": 1, "status": 0, "args": [], "mav_cmd_def": {"args_fixed": ["mode", "GUIDED"], "track_console": true,
                "console_text_success": ["Mode GUIDED"], "timeout": 2}},
            {"id": 2, "status": 0, "args": [], "mav_cmd_def": {"args_fixed": ["mode", "AUTO"]}}
        ]))
        .unwrap();
        h.dispatcher.ingest(&commands);

        assert_eq!(h.scheduler.tick(start).dispatched, Some(1));
        assert_eq!(h.executor.commands(), vec!["mode GUIDED"]);
        assert_eq!(h.scheduler.tick(start + Duration::from_millis(200)).dispatched, Some(2));
        assert_eq!(h.scheduler.tick(start + Duration::from_millis(400)).dispatched, None);

        h.scheduler.tick(start + Duration::from_secs(3));
        assert_eq!(h.dispatcher.state(1), Some(CommandState::Expired));
        assert_eq!(h.dispatcher.state(2), Some(CommandState::AckedSuccess));
    }

    #[test]
    fn test_run_returns_on_stop() {
        let start = Instant::now();
        let h = harness(start);
        let stop = StopSignal::new();
        stop.signal(());
        h.scheduler.run(&stop);
    }
}
