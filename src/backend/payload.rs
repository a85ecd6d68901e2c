//! JSON bodies exchanged with the backend.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::commands::{DirectCommand, ReportedStatus};
use crate::sync::console_log::ConsoleText;
use crate::sync::datapoints::Datapoint;
use crate::sync::differ::FieldDelta;

/// Body of `POST /vehicles/{id}/heartbeats/`.
#[derive(Debug, Clone, Serialize)]
pub struct Heartbeat {
    pub time_vehicle: String,
    pub armed: Option<bool>,
    pub position: Option<String>,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub packets: u32,
    pub fix_type: Option<i64>,
    pub sats_visible: Option<i64>,
    pub system_status: Option<Value>,
    pub custom_mode: Option<Value>,
    pub console_texts: Vec<ConsoleText>,
    pub parameters: Vec<FieldDelta>,
    pub mpstats: Vec<FieldDelta>,
    pub datapoints: Vec<Datapoint>,
}

/// Body returned by the heartbeat endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatReply {
    pub direct_commands: Vec<DirectCommand>,
}

/// Body of `PATCH /vehicles/{id}/mavproxy_commands/{command}/`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mav_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_vehicle_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_vehicle_finish: Option<String>,
}

impl StatusUpdate {
    /// Status change stamped with the vehicle time where the backend expects one.
    pub fn status(status: ReportedStatus, now: DateTime<Utc>) -> Self {
        let stamp = Some(timestamp(now));
        let mut update = Self {
            status: Some(status.code()),
            ..Self::default()
        };
        match status {
            ReportedStatus::Received => update.time_vehicle_start = stamp,
            ReportedStatus::Success | ReportedStatus::Fail | ReportedStatus::Timeout => update.time_vehicle_finish = stamp,
            ReportedStatus::Queued => {}
        }
        update
    }

    /// Raw acknowledgment result from the autopilot.
    pub fn with_mav_status(mut self, result: &str) -> Self {
        self.mav_status = Some(result.to_string());
        self
    }

    pub fn mav_status(result: &str) -> Self {
        Self::default().with_mav_status(result)
    }
}

pub fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Micros, true)
}
