//! Data-collection profiles and their ingestion workers.
//!
//! Each enabled profile runs one worker thread that reads its sensor, tags the
//! reading with the vehicle position and queues it as a datapoint. Workers stop
//! cooperatively through a [`StopSignal`] and give up after
//! [`MAX_CONSECUTIVE_FAILURES`] failed reads in a row; the scheduler relaunches
//! them once [`RELAUNCH_INTERVAL`] has passed since the previous attempt.

pub mod geo;
pub mod nmea;
pub mod random;

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::common::threads::{StopSignal, sleep_unless_stopped, spawn_guarded};
use crate::config::{ProfileConfig, ProfileKind};
use crate::sync::DatapointStore;
use crate::telemetry::{TelemetrySnapshot, TelemetrySource};

use geo::GeoFilter;
use nmea::NmeaSensor;
use random::RandomSensor;

/// Failed reads in a row after which a worker exits.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 10;

/// Minimum time between two launch attempts of the same profile.
pub const RELAUNCH_INTERVAL: Duration = Duration::from_secs(3);

/// A source of readings driven by a collection worker.
pub trait Sensor: Send {
    /// Take one reading. `Ok(None)` means nothing usable this round.
    fn read(&mut self, telemetry: &TelemetrySnapshot) -> anyhow::Result<Option<Value>>;

    /// Pause between two reads.
    fn pause(&self) -> Duration;
}

fn open_sensor(profile: &ProfileConfig) -> anyhow::Result<Box<dyn Sensor>> {
    match profile.kind {
        ProfileKind::Random => Ok(Box::new(RandomSensor::new())),
        ProfileKind::Nmea => Ok(Box::new(NmeaSensor::open(profile)?)),
    }
}

/// Everything a worker needs besides its sensor.
struct WorkerContext {
    profile_name: String,
    dataset_id: u64,
    filter: GeoFilter,
    telemetry: Arc<dyn TelemetrySource>,
    datapoints: Arc<DatapointStore>,
}

impl WorkerContext {
    /// Queue a reading if the vehicle has a fix and moved far enough.
    fn record(&mut self, telemetry: &TelemetrySnapshot, reading: Value) -> bool {
        let Some(gps) = telemetry.gps().filter(|g| g.has_fix()) else {
            return false;
        };
        if !self.filter.accept(gps.position) {
            return false;
        }
        self.datapoints.push(self.dataset_id, gps.position, reading);
        true
    }
}

/// Read until stopped or until too many reads failed in a row.
fn run_worker(mut sensor: Box<dyn Sensor>, mut ctx: WorkerContext, stop: &StopSignal) {
    let mut failures = 0;
    loop {
        if stop.signaled() {
            log::info!("Stopping {}", ctx.profile_name);
            break;
        }

        let telemetry = ctx.telemetry.snapshot();
        match sensor.read(&telemetry) {
            Ok(Some(reading)) => {
                failures = 0;
                if ctx.record(&telemetry, reading) {
                    log::debug!("{}: datapoint queued", ctx.profile_name);
                }
            }
            Ok(None) => failures = 0,
            Err(e) => {
                failures += 1;
                log::warn!("{}: read failed ({} in a row): {:#}", ctx.profile_name, failures, e);
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    log::warn!("{}: {} errors in a row, giving up until relaunch", ctx.profile_name, failures);
                    break;
                }
            }
        }

        if sleep_unless_stopped(stop, sensor.pause()) {
            log::info!("Stopping {}", ctx.profile_name);
            break;
        }
    }
}

struct Profile {
    config: ProfileConfig,
    running: Arc<AtomicBool>,
    last_try: Mutex<Instant>,
    stop: Mutex<Arc<StopSignal>>,
}

/// Supervises the configured data-collection profiles.
pub struct DataCollection {
    profiles: Vec<Profile>,
    telemetry: Arc<dyn TelemetrySource>,
    datapoints: Arc<DatapointStore>,
}

impl DataCollection {
    /// Set up profiles; none is launched before `RELAUNCH_INTERVAL` has passed.
    pub fn new(
        configs: &[ProfileConfig],
        telemetry: Arc<dyn TelemetrySource>,
        datapoints: Arc<DatapointStore>,
        now: Instant,
    ) -> Self {
        let profiles = configs
            .iter()
            .map(|config| Profile {
                config: config.clone(),
                running: Arc::new(AtomicBool::new(false)),
                last_try: Mutex::new(now),
                stop: Mutex::new(Arc::new(StopSignal::new())),
            })
            .collect();
        Self {
            profiles,
            telemetry,
            datapoints,
        }
    }

    /// Launch every enabled, idle profile whose last attempt is old enough.
    ///
    /// Returns the names of the profiles started.
    pub fn relaunch_due(&self, now: Instant) -> Vec<String> {
        let mut started = Vec::new();
        for profile in &self.profiles {
            if !profile.config.on || profile.running.load(Ordering::Acquire) {
                continue;
            }
            {
                let mut last_try = profile.last_try.lock().unwrap_or_else(|e| e.into_inner());
                if now.saturating_duration_since(*last_try) <= RELAUNCH_INTERVAL {
                    continue;
                }
                *last_try = now;
            }
            if self.launch(profile) {
                started.push(profile.config.profile_name.clone());
            }
        }
        started
    }

    fn launch(&self, profile: &Profile) -> bool {
        let name = profile.config.profile_name.clone();
        log::info!("Starting {}", name);

        let stop = Arc::new(StopSignal::new());
        *profile.stop.lock().unwrap_or_else(|e| e.into_inner()) = stop.clone();
        profile.running.store(true, Ordering::Release);

        let config = profile.config.clone();
        let running = profile.running.clone();
        let ctx = WorkerContext {
            profile_name: name.clone(),
            dataset_id: config.dataset_id,
            filter: GeoFilter::new(config.min_log_distance_m),
            telemetry: self.telemetry.clone(),
            datapoints: self.datapoints.clone(),
        };

        let spawned = spawn_guarded(&format!("collect-{}", name), move || {
            // Cleared on every exit path, panics included.
            struct Running(Arc<AtomicBool>);
            impl Drop for Running {
                fn drop(&mut self) {
                    self.0.store(false, Ordering::Release);
                }
            }
            let _running = Running(running);

            match open_sensor(&config) {
                Ok(sensor) => run_worker(sensor, ctx, &stop),
                Err(e) => log::warn!("{}: failed to open sensor: {:#}", config.profile_name, e),
            }
        });

        match spawned {
            Ok(_) => true,
            Err(e) => {
                log::error!("Failed to spawn worker for {}: {}", name, e);
                profile.running.store(false, Ordering::Release);
                false
            }
        }
    }

    #[cfg(test)]
    fn is_running(&self, profile_name: &str) -> bool {
        self.profiles
            .iter()
            .any(|p| p.config.profile_name == profile_name && p.running.load(Ordering::Acquire))
    }

    /// Ask every worker to stop after its current read.
    pub fn stop_all(&self) {
        for profile in &self.profiles {
            profile.stop.lock().unwrap_or_else(|e| e.into_inner()).signal(());
        }
    }
}
