//! JSON-lines link with the host autopilot process.
//!
//! The host writes one event per line on our stdin:
//!
//! ```text
//! {"type":"message","kind":"GPS_RAW_INT","fields":{"lat":-338688000,"lon":1512093000,"fix_type":3}}
//! {"type":"param","name":"WPNAV_SPEED","value":500}
//! {"type":"console","text":"AP: ARMED","fg":"black","bg":"white"}
//! {"type":"ack","kind":"COMMAND_ACK","command":"MAV_CMD_DO_SET_SERVO","result":"MAV_RESULT_ACCEPTED"}
//! ```
//!
//! and reads the commands to execute from our stdout, one per line. Logging
//! goes to stderr so the command stream stays clean.

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::agent::Agent;
use crate::commands::CommandExecutor;
use crate::commands::types::render_arg;
use crate::common::threads::{StopSignal, spawn_guarded};

fn default_fg() -> String {
    "black".to_string()
}

fn default_bg() -> String {
    "white".to_string()
}

/// One event from the host.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// A telemetry message; replaces every field of its kind.
    Message { kind: String, fields: BTreeMap<String, Value> },
    /// A vehicle parameter value.
    Param { name: String, value: Value },
    /// A console line.
    Console {
        text: String,
        #[serde(default = "default_fg")]
        fg: String,
        #[serde(default = "default_bg")]
        bg: String,
    },
    /// A command acknowledgment seen in telemetry.
    Ack { kind: String, command: String, result: Value },
}

impl BridgeEvent {
    pub fn apply(self, agent: &Agent) {
        match self {
            BridgeEvent::Message { kind, fields } => agent.telemetry().observe_message(&kind, fields),
            BridgeEvent::Param { name, value } => agent.telemetry().set_param(&name, value),
            BridgeEvent::Console { text, fg, bg } => agent.console_write(&text, &fg, &bg),
            BridgeEvent::Ack { kind, command, result } => agent.command_ack(&kind, &command, &render_arg(&result)),
        }
    }
}

/// Apply every event read from `reader` until end of input.
///
/// Malformed lines are logged and skipped. Returns the number of events applied.
pub fn pump<R: BufRead>(reader: R, agent: &Agent) -> std::io::Result<usize> {
    let mut applied = 0;
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<BridgeEvent>(line) {
            Ok(event) => {
                event.apply(agent);
                applied += 1;
            }
            Err(e) => log::warn!("Ignoring malformed bridge line: {} ({})", line, e),
        }
    }
    Ok(applied)
}

/// Read host events from stdin on a dedicated thread.
///
/// The host closing our stdin means it is gone, so `stop` is raised.
pub fn spawn_stdin_reader(agent: Arc<Agent>, stop: Arc<StopSignal>) -> std::io::Result<JoinHandle<()>> {
    spawn_guarded("bridge-reader", move || {
        let stdin = std::io::stdin();
        match pump(stdin.lock(), &agent) {
            Ok(count) => log::info!("Host closed the bridge after {} events", count),
            Err(e) => log::error!("Bridge read failed: {}", e),
        }
        stop.signal(());
    })
}

/// Hands commands to the host by writing them to stdout.
pub struct StdoutExecutor;

impl CommandExecutor for StdoutExecutor {
    fn execute(&self, command: &str) -> anyhow::Result<()> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", command).context("Failed to write command to host")?;
        out.flush().context("Failed to flush command to host")?;
        Ok(())
    }
}
