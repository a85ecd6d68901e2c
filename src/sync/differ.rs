//! Differential field synchronization.
//!
//! Only fields whose value changed since the last *successful* exchange are
//! transmitted. [`diff`] is pure; [`SentState::commit`] is called by the
//! exchange once the backend confirmed the heartbeat.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::telemetry::FieldSnapshot;

/// One changed field, in the wire shape the backend expects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDelta {
    pub name: String,
    pub value: Value,
}

/// Fields of `current` whose value differs from `sent`, in key order.
///
/// A key absent from `sent` always counts as changed.
pub fn diff(current: &FieldSnapshot, sent: &HashMap<String, Value>) -> Vec<FieldDelta> {
    current
        .iter()
        .filter(|(name, value)| sent.get(*name) != Some(*value))
        .map(|(name, value)| FieldDelta {
            name: name.clone(),
            value: value.clone(),
        })
        .collect()
}

/// Last value of each field known to have reached the backend.
#[derive(Default)]
pub struct SentState {
    values: Mutex<HashMap<String, Value>>,
}

impl SentState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delta between `current` and what was last committed.
    pub fn diff(&self, current: &FieldSnapshot) -> Vec<FieldDelta> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        diff(current, &values)
    }

    /// Record deltas as transmitted. Only call after a confirmed exchange.
    pub fn commit(&self, deltas: &[FieldDelta]) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        for delta in deltas {
            values.insert(delta.name.clone(), delta.value.clone());
        }
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.values.lock().unwrap().get(name).cloned()
    }
}
