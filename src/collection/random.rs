//! Synthetic sensor producing uniform random values.
//!
//! Used on the bench to exercise the whole datapoint pipeline without real
//! hardware attached.

use serde_json::{Value, json};
use std::time::Duration;

use super::Sensor;
use crate::telemetry::TelemetrySnapshot;

const READ_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Default)]
pub struct RandomSensor;

impl RandomSensor {
    pub fn new() -> Self {
        Self
    }
}

impl Sensor for RandomSensor {
    fn read(&mut self, telemetry: &TelemetrySnapshot) -> anyhow::Result<Option<Value>> {
        let Some(gps) = telemetry.gps() else {
            return Ok(None);
        };
        let value: f64 = rand::random();
        Ok(Some(json!({
            "value": value,
            "lat": gps.position.lat,
            "lon": gps.position.lon,
        })))
    }

    fn pause(&self) -> Duration {
        READ_INTERVAL
    }
}
