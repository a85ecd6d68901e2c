//! Telemetry snapshots handed to the sync engine.
//!
//! The host autopilot keeps a live, constantly mutating view of the vehicle.
//! The engine never reads that view directly: it asks a [`TelemetrySource`] for
//! an immutable [`TelemetrySnapshot`] and works on the copy, so differencing
//! never races with concurrent field updates.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Dotted `<message-kind>.<field-name>` key to scalar value.
pub type FieldSnapshot = BTreeMap<String, Value>;

/// Bit of `HEARTBEAT.base_mode` set while the vehicle is armed.
const MODE_FLAG_SAFETY_ARMED: i64 = 128;

/// Latitude/longitude are transmitted as degrees * 1e7.
const DEGREES_E7: f64 = 1.0e7;

/// A point on the WGS84 ellipsoid in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub lon: f64,
    pub lat: f64,
}

impl Position {
    /// Well-known-text form expected by the backend.
    pub fn wkt(&self) -> String {
        format!("POINT({} {})", self.lon, self.lat)
    }
}

/// GPS state derived from `GPS_RAW_INT`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsFix {
    pub position: Position,
    pub fix_type: i64,
    pub sats_visible: i64,
}

impl GpsFix {
    /// 2D fix or better.
    pub fn has_fix(&self) -> bool {
        self.fix_type > 1
    }
}

/// The handful of headline values every heartbeat carries.
///
/// Every field is optional: a missing or malformed telemetry field is reported
/// as unknown and the heartbeat still goes out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vitals {
    pub armed: Option<bool>,
    pub position: Option<Position>,
    pub heading: Option<f64>,
    pub speed_kmh: Option<f64>,
    pub fix_type: Option<i64>,
    pub sats_visible: Option<i64>,
    pub system_status: Option<Value>,
    pub custom_mode: Option<Value>,
}

/// Immutable copy of the vehicle's telemetry messages and parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetrySnapshot {
    messages: BTreeMap<String, BTreeMap<String, Value>>,
    params: FieldSnapshot,
}

impl TelemetrySnapshot {
    /// All message fields flattened into dotted keys.
    pub fn fields(&self) -> FieldSnapshot {
        let mut out = FieldSnapshot::new();
        for (kind, fields) in &self.messages {
            for (name, value) in fields {
                out.insert(format!("{}.{}", kind, name), value.clone());
            }
        }
        out
    }

    pub fn params(&self) -> &FieldSnapshot {
        &self.params
    }

    pub fn field(&self, kind: &str, name: &str) -> Option<&Value> {
        self.messages.get(kind).and_then(|fields| fields.get(name))
    }

    fn number(&self, kind: &str, name: &str) -> Option<f64> {
        self.field(kind, name).and_then(value_as_f64)
    }

    fn integer(&self, kind: &str, name: &str) -> Option<i64> {
        self.number(kind, name).map(|v| v as i64)
    }

    /// Current GPS fix, if `GPS_RAW_INT` has been seen with usable fields.
    pub fn gps(&self) -> Option<GpsFix> {
        let lat = self.integer("GPS_RAW_INT", "lat")? as f64 / DEGREES_E7;
        let lon = self.integer("GPS_RAW_INT", "lon")? as f64 / DEGREES_E7;
        let fix_type = self.integer("GPS_RAW_INT", "fix_type")?;
        let sats_visible = self.integer("GPS_RAW_INT", "satellites_visible")?;
        Some(GpsFix {
            position: Position { lon, lat },
            fix_type,
            sats_visible,
        })
    }

    pub fn vitals(&self) -> Vitals {
        let gps = self.gps();
        Vitals {
            armed: self
                .integer("HEARTBEAT", "base_mode")
                .map(|mode| mode & MODE_FLAG_SAFETY_ARMED != 0),
            position: gps.map(|g| g.position),
            heading: self.number("VFR_HUD", "heading"),
            speed_kmh: self.number("VFR_HUD", "groundspeed").map(|ms| ms * 3.6),
            fix_type: gps.map(|g| g.fix_type),
            sats_visible: gps.map(|g| g.sats_visible),
            system_status: self.field("HEARTBEAT", "system_status").cloned(),
            custom_mode: self.field("HEARTBEAT", "custom_mode").cloned(),
        }
    }
}

/// Numbers sometimes arrive stringified from the host.
fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Anything able to hand out telemetry snapshots.
pub trait TelemetrySource: Send + Sync {
    fn snapshot(&self) -> TelemetrySnapshot;
}

/// In-memory telemetry view fed by the bridge.
#[derive(Default)]
pub struct TelemetryCache {
    inner: Mutex<TelemetrySnapshot>,
}

impl TelemetryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every field of one message kind with a fresh observation.
    pub fn observe_message(&self, kind: &str, fields: BTreeMap<String, Value>) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.messages.insert(kind.to_string(), fields);
    }

    pub fn set_param(&self, name: &str, value: Value) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.params.insert(name.to_string(), value);
    }
}

impl TelemetrySource for TelemetryCache {
    fn snapshot(&self) -> TelemetrySnapshot {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
