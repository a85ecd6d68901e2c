//! Deadline-bound expectations tied to dispatched commands.
//!
//! After a command is handed to the executor the dispatcher arms one trigger
//! per signal that would reveal its outcome. Two registries exist: one matched
//! against console text, one against telemetry acknowledgments. Each trigger
//! leaves its registry exactly once, either matched by [`AlertRegistry::check`]
//! or expired by [`AlertRegistry::sweep`].
//!
//! Registries only report what happened as [`Resolution`]s. Applying them to the
//! command book and talking to the backend is the caller's job, done after the
//! registry lock has been released.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::types::ReportedStatus;

/// Outcome of a trigger leaving a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A console line matched; carries the status the trigger reports.
    Console { command_id: u64, outcome: ReportedStatus },
    /// A telemetry acknowledgment matched; carries its raw result code.
    Ack { command_id: u64, result: String },
    /// The deadline passed without a match.
    Expired { command_id: u64 },
}

impl Resolution {
    pub fn command_id(&self) -> u64 {
        match self {
            Resolution::Console { command_id, .. } | Resolution::Ack { command_id, .. } | Resolution::Expired { command_id } => {
                *command_id
            }
        }
    }
}

/// Decides whether an incoming signal satisfies a trigger.
pub trait Matcher {
    type Signal: ?Sized;

    fn matches(&self, signal: &Self::Signal) -> bool;

    fn resolve(&self, command_id: u64, signal: &Self::Signal) -> Resolution;
}

/// Matches when the expected text appears anywhere in a console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleMatcher {
    pub text: String,
    pub outcome: ReportedStatus,
}

impl Matcher for ConsoleMatcher {
    type Signal = str;

    fn matches(&self, line: &str) -> bool {
        line.contains(self.text.as_str())
    }

    fn resolve(&self, command_id: u64, _line: &str) -> Resolution {
        Resolution::Console {
            command_id,
            outcome: self.outcome,
        }
    }
}

/// A command acknowledgment observed in telemetry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub message_type: String,
    pub command_name: String,
    pub result: String,
}

/// Matches acknowledgments of one message type for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckMatcher {
    pub message_type: String,
    pub command_name: String,
}

impl Matcher for AckMatcher {
    type Signal = Ack;

    fn matches(&self, ack: &Ack) -> bool {
        self.message_type == ack.message_type && self.command_name == ack.command_name
    }

    fn resolve(&self, command_id: u64, ack: &Ack) -> Resolution {
        Resolution::Ack {
            command_id,
            result: ack.result.clone(),
        }
    }
}

#[derive(Debug)]
struct AlertTrigger<M> {
    command_id: u64,
    matcher: M,
    deadline: Instant,
}

/// Armed triggers in registration order.
pub struct AlertRegistry<M> {
    active: Mutex<Vec<AlertTrigger<M>>>,
}

pub type ConsoleAlerts = AlertRegistry<ConsoleMatcher>;
pub type AckAlerts = AlertRegistry<AckMatcher>;

impl<M> Default for AlertRegistry<M> {
    fn default() -> Self {
        Self { active: Mutex::new(Vec::new()) }
    }
}

impl<M: Matcher> AlertRegistry<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a trigger expiring `timeout` after `now`.
    ///
    /// A deadline past what `Instant` can represent expires on the next sweep.
    pub fn add_at(&self, command_id: u64, matcher: M, timeout: Duration, now: Instant) {
        let deadline = now.checked_add(timeout).unwrap_or_else(|| {
            log::warn!("Timeout {:?} of command {} is out of range", timeout, command_id);
            now
        });
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.push(AlertTrigger {
            command_id,
            matcher,
            deadline,
        });
    }

    /// Resolve every armed trigger matching `signal`.
    ///
    /// Several outstanding commands may wait for the same text, so all matches
    /// resolve, not just the first. Triggers already past their deadline are
    /// left for [`sweep`](Self::sweep).
    pub fn check(&self, signal: &M::Signal, now: Instant) -> Vec<Resolution> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        let mut resolved = Vec::new();
        active.retain(|trigger| {
            if trigger.deadline > now && trigger.matcher.matches(signal) {
                resolved.push(trigger.matcher.resolve(trigger.command_id, signal));
                false
            } else {
                true
            }
        });
        resolved
    }

    /// Expire every trigger whose deadline is at or before `now`.
    pub fn sweep(&self, now: Instant) -> Vec<Resolution> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        let mut expired = Vec::new();
        active.retain(|trigger| {
            if trigger.deadline <= now {
                expired.push(Resolution::Expired {
                    command_id: trigger.command_id,
                });
                false
            } else {
                true
            }
        });
        expired
    }

    /// Drop the remaining triggers of a command that already has an outcome.
    pub fn discard(&self, command_id: u64) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.retain(|trigger| trigger.command_id != command_id);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn console(text: &str, outcome: ReportedStatus) -> ConsoleMatcher {
        ConsoleMatcher {
            text: text.to_string(),
            outcome,
        }
    }

    fn ack(name: &str, result: &str) -> Ack {
        Ack {
            message_type: "COMMAND_ACK".into(),
            command_name: name.into(),
            result: result.into(),
        }
    }

    #[test]
    fn test_console_substring_match() {
        let alerts = ConsoleAlerts::new();
        let now = Instant::now();
        alerts.add_at(1, console("ARMED", ReportedStatus::Success), Duration::from_secs(5), now);

        assert!(alerts.check("Mode changed", now).is_empty());
        let resolved = alerts.check("AP: ARMED", now);
        assert_eq!(
            resolved,
            vec![Resolution::Console {
                command_id: 1,
                outcome: ReportedStatus::Success
            }]
        );
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_one_signal_resolves_every_match() {
        let alerts = ConsoleAlerts::new();
        let now = Instant::now();
        alerts.add_at(1, console("Throttle armed", ReportedStatus::Success), Duration::from_secs(5), now);
        alerts.add_at(2, console("Throttle", ReportedStatus::Fail), Duration::from_secs(5), now);
        alerts.add_at(3, console("Disarmed", ReportedStatus::Success), Duration::from_secs(5), now);

        let resolved = alerts.check("Throttle armed", now);
        let ids: Vec<u64> = resolved.iter().map(Resolution::command_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(alerts.len(), 1);
    }

    #[test]
    fn test_sweep_expires_once() {
        let alerts = ConsoleAlerts::new();
        let start = Instant::now();
        alerts.add_at(7, console("ARMED", ReportedStatus::Success), Duration::from_secs(5), start);

        assert!(alerts.sweep(start + Duration::from_secs(4)).is_empty());
        assert_eq!(alerts.sweep(start + Duration::from_secs(5)), vec![Resolution::Expired { command_id: 7 }]);
        assert!(alerts.sweep(start + Duration::from_secs(6)).is_empty());
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_overdue_trigger_is_not_matched() {
        let alerts = ConsoleAlerts::new();
        let start = Instant::now();
        alerts.add_at(7, console("ARMED", ReportedStatus::Success), Duration::from_secs(5), start);

        let late = start + Duration::from_secs(6);
        assert!(alerts.check("ARMED", late).is_empty());
        assert_eq!(alerts.sweep(late), vec![Resolution::Expired { command_id: 7 }]);
    }

    #[test]
    fn test_matched_trigger_never_expires() {
        let alerts = ConsoleAlerts::new();
        let start = Instant::now();
        alerts.add_at(7, console("ARMED", ReportedStatus::Success), Duration::from_secs(5), start);
        assert_eq!(alerts.check("ARMED", start).len(), 1);
        assert!(alerts.sweep(start + Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn test_ack_matches_type_and_name() {
        let alerts = AckAlerts::new();
        let now = Instant::now();
        alerts.add_at(
            4,
            AckMatcher {
                message_type: "COMMAND_ACK".into(),
                command_name: "MAV_CMD_COMPONENT_ARM_DISARM".into(),
            },
            Duration::from_secs(3),
            now,
        );

        assert!(alerts.check(&ack("MAV_CMD_DO_SET_MODE", "MAV_RESULT_ACCEPTED"), now).is_empty());
        assert_eq!(
            alerts.check(&ack("MAV_CMD_COMPONENT_ARM_DISARM", "MAV_RESULT_DENIED"), now),
            vec![Resolution::Ack {
                command_id: 4,
                result: "MAV_RESULT_DENIED".into()
            }]
        );
    }

    #[test]
    fn test_discard_removes_siblings() {
        let alerts = ConsoleAlerts::new();
        let now = Instant::now();
        alerts.add_at(1, console("ARMED", ReportedStatus::Success), Duration::from_secs(5), now);
        alerts.add_at(1, console("denied", ReportedStatus::Fail), Duration::from_secs(5), now);
        alerts.add_at(2, console("denied", ReportedStatus::Fail), Duration::from_secs(5), now);

        alerts.discard(1);
        assert_eq!(alerts.check("Arming denied", now), vec![Resolution::Console { command_id: 2, outcome: ReportedStatus::Fail }]);
    }

    #[test]
    fn test_unrepresentable_deadline_expires_on_next_sweep() {
        let alerts = ConsoleAlerts::new();
        let now = Instant::now();
        alerts.add_at(5, console("ARMED", ReportedStatus::Success), Duration::MAX, now);
        assert_eq!(alerts.sweep(now), vec![Resolution::Expired { command_id: 5 }]);
        assert!(alerts.is_empty());
    }
}
