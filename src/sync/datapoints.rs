//! Pending geotagged datapoints.
//!
//! Collection workers push readings at any time, including while an exchange
//! is in flight. The exchange takes a [`DatapointStore::snapshot`] when it
//! builds its payload and, on success, removes exactly those entries. Anything
//! pushed in between stays queued for the next heartbeat.

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::sync::Mutex;

use crate::telemetry::Position;

/// A geotagged sensor reading.
#[derive(Debug, Clone, PartialEq)]
pub struct Datapoint {
    /// Assigned by the store; identifies the entry for removal.
    seq: u64,
    pub dataset_id: u64,
    pub position: Position,
    pub payload: Value,
}

impl Serialize for Datapoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Datapoint", 3)?;
        state.serialize_field("dataset", &self.dataset_id)?;
        state.serialize_field("position", &self.position.wkt())?;
        state.serialize_field("data", &self.payload)?;
        state.end()
    }
}

#[derive(Default)]
struct Pending {
    next_seq: u64,
    points: Vec<Datapoint>,
}

#[derive(Default)]
pub struct DatapointStore {
    inner: Mutex<Pending>,
}

impl DatapointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, dataset_id: u64, position: Position, payload: Value) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let seq = guard.next_seq;
        guard.next_seq += 1;
        guard.points.push(Datapoint {
            seq,
            dataset_id,
            position,
            payload,
        });
    }

    /// Copy of everything currently pending.
    pub fn snapshot(&self) -> Vec<Datapoint> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).points.clone()
    }

    /// Drop the datapoints of a confirmed snapshot, keeping later arrivals.
    pub fn remove_sent(&self, sent: &[Datapoint]) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.points.retain(|p| !sent.iter().any(|s| s.seq == p.seq));
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).points.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
