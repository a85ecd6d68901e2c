//! One heartbeat round trip with the backend.
//!
//! The exchange builds its payload from the current telemetry snapshot and the
//! pending console lines and datapoints, posts it, and only after the backend
//! confirms it commits what was sent. A failed round trip commits nothing, so
//! the next exchange recomputes the same deltas and retries.

use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::console_log::{ConsoleLog, LogLine};
use super::datapoints::DatapointStore;
use super::differ::SentState;
use crate::backend::payload::timestamp;
use crate::backend::{Backend, Heartbeat, HeartbeatReply, SyncError};
use crate::commands::Dispatcher;
use crate::telemetry::TelemetrySource;

/// What a call to [`SyncExchange::run`] did.
#[derive(Debug)]
pub enum ExchangeOutcome {
    /// Heartbeat accepted; `commands` new commands were queued.
    Committed { commands: usize },
    /// Heartbeat accepted but the response could not be decoded.
    CommittedWithoutCommands(SyncError),
    /// Nothing was committed.
    Failed(SyncError),
    /// Another exchange was still in flight.
    Busy,
}

/// Clears the in-flight flag however the exchange ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncExchange {
    telemetry: Arc<dyn TelemetrySource>,
    backend: Arc<dyn Backend>,
    console: Arc<ConsoleLog>,
    datapoints: Arc<DatapointStore>,
    dispatcher: Arc<Dispatcher>,
    params_sent: SentState,
    telemetry_sent: SentState,
    in_flight: AtomicBool,
}

impl SyncExchange {
    pub fn new(
        telemetry: Arc<dyn TelemetrySource>,
        backend: Arc<dyn Backend>,
        console: Arc<ConsoleLog>,
        datapoints: Arc<DatapointStore>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            telemetry,
            backend,
            console,
            datapoints,
            dispatcher,
            params_sent: SentState::new(),
            telemetry_sent: SentState::new(),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Build the heartbeat and the console lines it carries.
    fn build(&self) -> (Heartbeat, Vec<LogLine>) {
        let snapshot = self.telemetry.snapshot();
        let vitals = snapshot.vitals();
        let console = self.console.pending();

        let heartbeat = Heartbeat {
            time_vehicle: timestamp(Utc::now()),
            armed: vitals.armed,
            position: vitals.position.map(|p| p.wkt()),
            heading: vitals.heading,
            speed: vitals.speed_kmh,
            packets: 0,
            fix_type: vitals.fix_type,
            sats_visible: vitals.sats_visible,
            system_status: vitals.system_status,
            custom_mode: vitals.custom_mode,
            console_texts: console.texts,
            parameters: self.params_sent.diff(snapshot.params()),
            mpstats: self.telemetry_sent.diff(&snapshot.fields()),
            datapoints: self.datapoints.snapshot(),
        };
        (heartbeat, console.lines)
    }

    /// Perform one exchange unless another one is still running.
    pub fn run(&self) -> ExchangeOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!("Previous exchange still in flight, skipping");
            return ExchangeOutcome::Busy;
        }
        let _guard = InFlight(&self.in_flight);

        let (heartbeat, console_lines) = self.build();
        log::debug!(
            "Heartbeat: {} console lines, {} parameters, {} telemetry fields, {} datapoints",
            heartbeat.console_texts.len(),
            heartbeat.parameters.len(),
            heartbeat.mpstats.len(),
            heartbeat.datapoints.len()
        );

        let body = match self.backend.post_heartbeat(&heartbeat) {
            Ok(body) => body,
            Err(e) => {
                log::warn!("Heartbeat failed, will retry next cycle: {}", e);
                return ExchangeOutcome::Failed(e);
            }
        };

        self.console.commit(&console_lines);
        self.params_sent.commit(&heartbeat.parameters);
        self.telemetry_sent.commit(&heartbeat.mpstats);
        self.datapoints.remove_sent(&heartbeat.datapoints);

        match serde_json::from_str::<HeartbeatReply>(&body) {
            Ok(reply) => {
                let commands = self.dispatcher.ingest(&reply.direct_commands);
                if commands > 0 {
                    log::info!("Heartbeat response queued {} new commands", commands);
                }
                ExchangeOutcome::Committed { commands }
            }
            Err(e) => {
                log::warn!("Heartbeat accepted but response unreadable: {}", e);
                ExchangeOutcome::CommittedWithoutCommands(SyncError::Parse(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::StatusReporter;
    use crate::telemetry::{Position, TelemetryCache};
    use crate::testing::{FakeBackend, RecordingExecutor};
    use serde_json::json;
    use std::thread;
    use std::time::Duration;

    struct Harness {
        telemetry: Arc<TelemetryCache>,
        backend: Arc<FakeBackend>,
        console: Arc<ConsoleLog>,
        datapoints: Arc<DatapointStore>,
        dispatcher: Arc<Dispatcher>,
        exchange: Arc<SyncExchange>,
    }

    fn harness() -> Harness {
        let telemetry = Arc::new(TelemetryCache::new());
        let backend = Arc::new(FakeBackend::new());
        let console = Arc::new(ConsoleLog::new());
        let datapoints = Arc::new(DatapointStore::new());
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(RecordingExecutor::new()), StatusReporter::new()));
        let exchange = Arc::new(SyncExchange::new(
            telemetry.clone(),
            backend.clone(),
            console.clone(),
            datapoints.clone(),
            dispatcher.clone(),
        ));
        Harness {
            telemetry,
            backend,
            console,
            datapoints,
            dispatcher,
            exchange,
        }
    }

    const HERE: Position = Position { lon: 151.2, lat: -33.8 };

    #[test]
    fn test_datapoints_removed_on_success() {
        let h = harness();
        h.datapoints.push(1, HERE, json!({"value": 0.5}));
        h.datapoints.push(1, HERE, json!({"value": 0.7}));

        assert!(matches!(h.exchange.run(), ExchangeOutcome::Committed { commands: 0 }));
        assert_eq!(h.backend.heartbeats()[0]["datapoints"].as_array().unwrap().len(), 2);
        assert!(h.datapoints.is_empty());
    }

    #[test]
    fn test_server_error_commits_nothing() {
        let h = harness();
        h.datapoints.push(1, HERE, json!({"value": 0.5}));
        h.datapoints.push(1, HERE, json!({"value": 0.7}));
        h.console.append("Mode HOLD", "black", "white");
        h.telemetry.set_param("THR_MIN", json!(100));
        h.backend.respond_with_status(500);

        assert!(matches!(h.exchange.run(), ExchangeOutcome::Failed(SyncError::Status { code: 500, .. })));
        assert_eq!(h.datapoints.len(), 2);
        assert_eq!(h.console.pending().lines.len(), 1);

        h.backend.respond_with(r#"{"direct_commands": []}"#);
        h.exchange.run();
        let retried = &h.backend.heartbeats()[1];
        assert_eq!(retried["datapoints"].as_array().unwrap().len(), 2);
        assert_eq!(retried["console_texts"][0]["text"], json!("Mode HOLD"));
        assert_eq!(retried["parameters"], json!([{"name": "THR_MIN", "value": 100}]));
    }

    #[test]
    fn test_parameter_change_is_sent_once() {
        let h = harness();
        h.telemetry.set_param("THR_MIN", json!(100));
        h.exchange.run();
        h.telemetry.set_param("THR_MIN", json!(120));
        h.exchange.run();
        h.exchange.run();

        let beats = h.backend.heartbeats();
        assert_eq!(beats[0]["parameters"], json!([{"name": "THR_MIN", "value": 100}]));
        assert_eq!(beats[1]["parameters"], json!([{"name": "THR_MIN", "value": 120}]));
        assert_eq!(beats[2]["parameters"], json!([]));
    }

    #[test]
    fn test_telemetry_fields_use_dotted_names() {
        let h = harness();
        h.telemetry
            .observe_message("VFR_HUD", serde_json::from_value(json!({"heading": 90})).unwrap());
        h.exchange.run();
        h.exchange.run();
        let beats = h.backend.heartbeats();
        assert_eq!(beats[0]["mpstats"], json!([{"name": "VFR_HUD.heading", "value": 90}]));
        assert_eq!(beats[0]["heading"], json!(90.0));
        assert_eq!(beats[1]["mpstats"], json!([]));
    }

    #[test]
    fn test_unknown_telemetry_is_null() {
        let h = harness();
        h.exchange.run();
        let beat = &h.backend.heartbeats()[0];
        assert!(beat["position"].is_null());
        assert!(beat["armed"].is_null());
        assert!(beat["speed"].is_null());
        assert!(beat["time_vehicle"].is_string());
    }

    #[test]
    fn test_response_commands_are_ingested() {
        let h = harness();
        h.backend.respond_with(
            r#"{"direct_commands": [{"id": 1, "status": 0, "args": [],
                "mav_cmd_def": {"args_fixed": ["arm", "throttle"], "track_console": true,
                                "console_text_success": ["ARMED"], "timeout": 5}}]}"#,
        );
        assert!(matches!(h.exchange.run(), ExchangeOutcome::Committed { commands: 1 }));
        assert!(matches!(h.exchange.run(), ExchangeOutcome::Committed { commands: 0 }));
        assert!(h.dispatcher.has_queued());
    }

    #[test]
    fn test_unreadable_response_still_commits() {
        let h = harness();
        h.datapoints.push(1, HERE, json!({"value": 0.5}));
        h.backend.respond_with("<html>oops</html>");
        assert!(matches!(h.exchange.run(), ExchangeOutcome::CommittedWithoutCommands(_)));
        assert!(h.datapoints.is_empty());
        assert!(!h.dispatcher.has_queued());
    }

    #[test]
    fn test_datapoint_added_in_flight_survives() {
        let h = harness();
        h.datapoints.push(1, HERE, json!({"value": 1}));
        h.backend.delay_posts(Duration::from_millis(200));

        let exchange = h.exchange.clone();
        let worker = thread::spawn(move || exchange.run());
        thread::sleep(Duration::from_millis(50));
        h.datapoints.push(1, HERE, json!({"value": 2}));
        worker.join().unwrap();

        let rest = h.datapoints.snapshot();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].payload, json!({"value": 2}));
    }

    #[test]
    fn test_concurrent_exchange_is_rejected() {
        let h = harness();
        h.backend.delay_posts(Duration::from_millis(200));

        let exchange = h.exchange.clone();
        let worker = thread::spawn(move || exchange.run());
        thread::sleep(Duration::from_millis(50));
        assert!(h.exchange.is_in_flight());
        assert!(matches!(h.exchange.run(), ExchangeOutcome::Busy));
        assert!(matches!(worker.join().unwrap(), ExchangeOutcome::Committed { .. }));
        assert!(!h.exchange.is_in_flight());
        assert_eq!(h.backend.heartbeats().len(), 1);
    }
}
