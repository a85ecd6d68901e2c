//! The agent: every component wired together behind the two signal entry
//! points the host delivers into (`console_write` and `command_ack`).

pub mod local;

use std::sync::{Arc, OnceLock, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::backend::Backend;
use crate::collection::DataCollection;
use crate::commands::{Ack, CommandExecutor, Dispatcher, StatusReporter};
use crate::common::threads::{StopSignal, sleep_unless_stopped, spawn_guarded};
use crate::config::AgentConfig;
use crate::scheduler::{CommSettings, Scheduler};
use crate::sync::{ConsoleLog, DatapointStore, SyncExchange};
use crate::telemetry::TelemetryCache;

use local::LocalCommands;

/// Where console lines enter the agent.
///
/// Lines are matched against armed console triggers before they are stored.
pub struct ConsoleSink {
    log: Arc<ConsoleLog>,
    dispatcher: OnceLock<Weak<Dispatcher>>,
}

impl ConsoleSink {
    fn new(log: Arc<ConsoleLog>) -> Self {
        Self {
            log,
            dispatcher: OnceLock::new(),
        }
    }

    fn attach(&self, dispatcher: &Arc<Dispatcher>) {
        let _ = self.dispatcher.set(Arc::downgrade(dispatcher));
    }

    pub fn write(&self, text: &str, fg: &str, bg: &str) {
        if let Some(dispatcher) = self.dispatcher.get().and_then(Weak::upgrade) {
            dispatcher.on_console_line(text, Instant::now());
        }
        self.log.append(text, fg, bg);
    }

    pub fn log(&self) -> &Arc<ConsoleLog> {
        &self.log
    }
}

pub struct Agent {
    config: AgentConfig,
    telemetry: Arc<TelemetryCache>,
    console: Arc<ConsoleSink>,
    dispatcher: Arc<Dispatcher>,
    reporter: StatusReporter,
    backend: Arc<dyn Backend>,
    scheduler: Scheduler,
}

impl Agent {
    /// Build the agent. `host` receives every command not addressed to the agent.
    pub fn new(config: AgentConfig, backend: Arc<dyn Backend>, host: Arc<dyn CommandExecutor>) -> Self {
        let now = Instant::now();
        let telemetry = Arc::new(TelemetryCache::new());
        let console = Arc::new(ConsoleSink::new(Arc::new(ConsoleLog::new())));
        let datapoints = Arc::new(DatapointStore::new());
        let settings = Arc::new(CommSettings::new(config.comm_interval()));
        let reporter = StatusReporter::new();

        let executor = Arc::new(LocalCommands::new(
            host,
            backend.clone(),
            settings.clone(),
            console.clone(),
            config.mission_file.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(executor, reporter.clone()));
        console.attach(&dispatcher);

        let exchange = Arc::new(SyncExchange::new(
            telemetry.clone(),
            backend.clone(),
            console.log().clone(),
            datapoints.clone(),
            dispatcher.clone(),
        ));
        let collection = Arc::new(DataCollection::new(
            &config.data_collection,
            telemetry.clone(),
            datapoints.clone(),
            now,
        ));
        let scheduler = Scheduler::new(settings, exchange, dispatcher.clone(), collection, now);

        Self {
            config,
            telemetry,
            console,
            dispatcher,
            reporter,
            backend,
            scheduler,
        }
    }

    pub fn telemetry(&self) -> &Arc<TelemetryCache> {
        &self.telemetry
    }

    pub fn settings(&self) -> &Arc<CommSettings> {
        self.scheduler.settings()
    }

    /// A console line was written on the vehicle.
    pub fn console_write(&self, text: &str, fg: &str, bg: &str) {
        self.console.write(text, fg, bg);
    }

    /// A command acknowledgment arrived in telemetry.
    pub fn command_ack(&self, message_type: &str, command_name: &str, result: &str) {
        let ack = Ack {
            message_type: message_type.to_string(),
            command_name: command_name.to_string(),
            result: result.to_string(),
        };
        self.dispatcher.on_ack(&ack, Instant::now());
    }

    /// Start the background threads: status reporter and delayed auto-start.
    pub fn start(&self, stop: Arc<StopSignal>) -> std::io::Result<Vec<JoinHandle<()>>> {
        let mut handles = vec![self.reporter.spawn(self.backend.clone(), stop.clone())?];

        if self.config.auto_comm_start {
            let settings = self.settings().clone();
            let pause = Duration::from_secs(self.config.comm_pause_sec);
            log::info!("Communication starts in {:?}", pause);
            handles.push(spawn_guarded("comm-autostart", move || {
                if !sleep_unless_stopped(&stop, pause) {
                    settings.set_enabled(true);
                    settings.sync_now();
                }
            })?);
        }
        Ok(handles)
    }

    /// Run the scheduler on the calling thread until `stop` fires.
    pub fn run(&self, stop: &StopSignal) {
        self.scheduler.run(stop);
    }

    #[cfg(test)]
    fn tick(&self, now: Instant) -> crate::scheduler::TickReport {
        self.scheduler.tick(now)
    }
}
