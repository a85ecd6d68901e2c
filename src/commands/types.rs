//! Command type definitions.
//!
//! The backend sends loosely typed command records ([`DirectCommand`]). They are
//! validated once, at ingestion, into a [`CommandDefinition`] whose [`Tracking`]
//! variant says how completion is detected.

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Longest timeout a command may ask for.
pub const MAX_COMMAND_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Status codes understood by the backend's command endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportedStatus {
    Queued,
    Received,
    Success,
    Fail,
    Timeout,
}

impl ReportedStatus {
    pub fn code(self) -> u8 {
        match self {
            ReportedStatus::Queued => 0,
            ReportedStatus::Received => 1,
            ReportedStatus::Success => 2,
            ReportedStatus::Fail => 3,
            ReportedStatus::Timeout => 4,
        }
    }
}

/// Lifecycle of a command on the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Queued,
    Dispatched,
    AckedSuccess,
    AckedFail,
    Expired,
}

impl CommandState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CommandState::AckedSuccess | CommandState::AckedFail | CommandState::Expired)
    }
}

/// Command definition as sent by the backend.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MavCmdDef {
    pub args_fixed: Vec<Value>,
    pub track_console: bool,
    pub console_text_success: Vec<String>,
    pub console_text_fail: Vec<String>,
    pub track_mav_msg: bool,
    pub mav_type: Option<String>,
    pub mav_cmd_name: Option<String>,
    /// Seconds.
    pub timeout: f64,
}

/// A command record from the heartbeat response.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectCommand {
    pub id: u64,
    #[serde(default)]
    pub status: u8,
    #[serde(default)]
    pub args: Vec<Value>,
    pub mav_cmd_def: MavCmdDef,
}

/// Console lines signalling the outcome of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleExpectation {
    pub success: Vec<String>,
    pub fail: Vec<String>,
}

/// Telemetry acknowledgment expected for a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckExpectation {
    pub message_type: String,
    pub command_name: String,
}

/// How the completion of a command is detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tracking {
    Untracked,
    Console(ConsoleExpectation),
    Telemetry(AckExpectation),
    Both(ConsoleExpectation, AckExpectation),
}

impl Tracking {
    pub fn console(&self) -> Option<&ConsoleExpectation> {
        match self {
            Tracking::Console(c) | Tracking::Both(c, _) => Some(c),
            _ => None,
        }
    }

    pub fn telemetry(&self) -> Option<&AckExpectation> {
        match self {
            Tracking::Telemetry(t) | Tracking::Both(_, t) => Some(t),
            _ => None,
        }
    }
}

/// Validated command definition.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandDefinition {
    pub args_fixed: Vec<String>,
    pub timeout: Duration,
    pub tracking: Tracking,
}

impl TryFrom<&MavCmdDef> for CommandDefinition {
    type Error = String;

    fn try_from(def: &MavCmdDef) -> Result<Self, Self::Error> {
        let timeout = Duration::try_from_secs_f64(def.timeout)
            .ok()
            .filter(|t| *t <= MAX_COMMAND_TIMEOUT)
            .ok_or_else(|| format!("invalid timeout {}", def.timeout))?;

        let console = if def.track_console {
            if def.console_text_success.is_empty() && def.console_text_fail.is_empty() {
                return Err("console tracking requested without any console text".to_string());
            }
            Some(ConsoleExpectation {
                success: def.console_text_success.clone(),
                fail: def.console_text_fail.clone(),
            })
        } else {
            None
        };

        let telemetry = if def.track_mav_msg {
            match (&def.mav_type, &def.mav_cmd_name) {
                (Some(message_type), Some(command_name)) => Some(AckExpectation {
                    message_type: message_type.clone(),
                    command_name: command_name.clone(),
                }),
                _ => return Err("telemetry tracking requested without mav_type and mav_cmd_name".to_string()),
            }
        } else {
            None
        };

        let tracking = match (console, telemetry) {
            (None, None) => Tracking::Untracked,
            (Some(c), None) => Tracking::Console(c),
            (None, Some(t)) => Tracking::Telemetry(t),
            (Some(c), Some(t)) => Tracking::Both(c, t),
        };

        Ok(Self {
            args_fixed: def.args_fixed.iter().map(render_arg).collect(),
            timeout,
            tracking,
        })
    }
}

/// Arguments are strings or numbers; strings go out unquoted.
pub fn render_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Whether an acknowledgment result code means the autopilot accepted the command.
pub fn is_accepted_result(result: &str) -> bool {
    matches!(result, "MAV_RESULT_ACCEPTED" | "ACCEPTED" | "0")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn def(value: Value) -> MavCmdDef {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_console_tracked_definition() {
        let parsed = CommandDefinition::try_from(&def(json!({
            "args_fixed": ["arm", "throttle"],
            "track_console": true,
            "console_text_success": ["ARMED"],
            "console_text_fail": ["Arming denied"],
            "timeout": 5
        })))
        .unwrap();
        assert_eq!(parsed.args_fixed, vec!["arm", "throttle"]);
        assert_eq!(parsed.timeout, Duration::from_secs(5));
        assert_eq!(
            parsed.tracking,
            Tracking::Console(ConsoleExpectation {
                success: vec!["ARMED".into()],
                fail: vec!["Arming denied".into()]
            })
        );
        assert!(parsed.tracking.telemetry().is_none());
    }

    #[test]
    fn test_both_tracking() {
        let parsed = CommandDefinition::try_from(&def(json!({
            "args_fixed": ["mode", "guided"],
            "track_console": true,
            "console_text_success": ["GUIDED"],
            "track_mav_msg": true,
            "mav_type": "COMMAND_ACK",
            "mav_cmd_name": "MAV_CMD_DO_SET_MODE",
            "timeout": 2.5
        })))
        .unwrap();
        assert!(matches!(parsed.tracking, Tracking::Both(_, _)));
        assert_eq!(parsed.tracking.telemetry().unwrap().command_name, "MAV_CMD_DO_SET_MODE");
        assert_eq!(parsed.timeout, Duration::from_millis(2500));
    }

    #[test]
    fn test_untracked_definition() {
        let parsed = CommandDefinition::try_from(&def(json!({"args_fixed": ["wp", "list"], "timeout": 1}))).unwrap();
        assert_eq!(parsed.tracking, Tracking::Untracked);
    }

    #[test]
    fn test_invalid_definitions_are_rejected() {
        assert!(CommandDefinition::try_from(&def(json!({"track_console": true, "timeout": 5}))).is_err());
        assert!(CommandDefinition::try_from(&def(json!({"track_mav_msg": true, "mav_type": "COMMAND_ACK"}))).is_err());
        assert!(CommandDefinition::try_from(&def(json!({"timeout": -1}))).is_err());
    }

    #[test]
    fn test_out_of_range_timeouts_are_rejected() {
        assert!(CommandDefinition::try_from(&def(json!({"timeout": 1e19}))).is_err());
        assert!(CommandDefinition::try_from(&def(json!({"timeout": 1e20}))).is_err());
        assert!(CommandDefinition::try_from(&def(json!({"timeout": 86_401}))).is_err());
        let longest = CommandDefinition::try_from(&def(json!({"timeout": 86_400}))).unwrap();
        assert_eq!(longest.timeout, MAX_COMMAND_TIMEOUT);
    }

    #[test]
    fn test_render_arg() {
        assert_eq!(render_arg(&json!("guided")), "guided");
        assert_eq!(render_arg(&json!(3)), "3");
        assert_eq!(render_arg(&json!(1.5)), "1.5");
    }

    #[test]
    fn test_direct_command_from_response() {
        let command: DirectCommand = serde_json::from_value(json!({
            "id": 12,
            "status": 0,
            "args": [1],
            "mav_cmd_def": {"args_fixed": ["arm"], "args": [{"name": "force"}], "timeout": 3}
        }))
        .unwrap();
        assert_eq!(command.id, 12);
        assert_eq!(command.args, vec![json!(1)]);
        assert_eq!(command.mav_cmd_def.timeout, 3.0);
    }
}
