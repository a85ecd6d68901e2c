//! State synchronization with the backend.
//!
//! - `differ`: last-sent field values and delta computation
//! - `console_log`: console lines and their forwarding state
//! - `datapoints`: geotagged readings awaiting transmission
//! - `exchange`: the heartbeat round trip tying them together

pub mod console_log;
pub mod datapoints;
pub mod differ;
pub mod exchange;

pub use console_log::ConsoleLog;
pub use datapoints::DatapointStore;
pub use exchange::{ExchangeOutcome, SyncExchange};
