//! Command book, queue and dispatch.
//!
//! Commands arrive with heartbeat responses, wait in a FIFO queue and are
//! executed one per scheduler tick. Completion is detected by the alert
//! registries; every command reaches exactly one terminal state, and that
//! state is reported to the backend exactly once.

use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::alerts::{Ack, AckAlerts, AckMatcher, ConsoleAlerts, ConsoleMatcher, Resolution};
use super::reporter::StatusReporter;
use super::types::{CommandDefinition, CommandState, DirectCommand, ReportedStatus, is_accepted_result, render_arg};
use crate::backend::StatusUpdate;

/// Sink for rendered text commands.
pub trait CommandExecutor: Send + Sync {
    fn execute(&self, command: &str) -> anyhow::Result<()>;
}

#[derive(Debug)]
struct PendingCommand {
    definition: CommandDefinition,
    args: Vec<String>,
    state: CommandState,
}

impl PendingCommand {
    /// Fixed arguments then supplied arguments, space separated.
    fn render(&self) -> String {
        self.definition
            .args_fixed
            .iter()
            .chain(self.args.iter())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Default)]
struct Book {
    commands: HashMap<u64, PendingCommand>,
    /// Ids rejected at ingestion; remembered so resends are ignored.
    rejected: Vec<u64>,
    queue: VecDeque<u64>,
}

impl Book {
    fn knows(&self, id: u64) -> bool {
        self.commands.contains_key(&id) || self.rejected.contains(&id)
    }
}

pub struct Dispatcher {
    book: Mutex<Book>,
    console_alerts: ConsoleAlerts,
    ack_alerts: AckAlerts,
    executor: Arc<dyn CommandExecutor>,
    reporter: StatusReporter,
}

impl Dispatcher {
    pub fn new(executor: Arc<dyn CommandExecutor>, reporter: StatusReporter) -> Self {
        Self {
            book: Mutex::new(Book::default()),
            console_alerts: ConsoleAlerts::new(),
            ack_alerts: AckAlerts::new(),
            executor,
            reporter,
        }
    }

    fn book(&self) -> std::sync::MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record and queue new commands from a heartbeat response.
    ///
    /// Commands already known, and commands the backend no longer lists as
    /// waiting, are ignored, so the same list can be ingested any number of
    /// times. Returns the number of commands queued.
    pub fn ingest(&self, commands: &[DirectCommand]) -> usize {
        let mut queued = 0;
        for command in commands {
            if command.status != ReportedStatus::Queued.code() {
                continue;
            }

            let definition = {
                let mut book = self.book();
                if book.knows(command.id) {
                    continue;
                }
                match CommandDefinition::try_from(&command.mav_cmd_def) {
                    Ok(definition) => {
                        book.commands.insert(
                            command.id,
                            PendingCommand {
                                definition,
                                args: command.args.iter().map(render_arg).collect(),
                                state: CommandState::Queued,
                            },
                        );
                        book.queue.push_back(command.id);
                        Ok(())
                    }
                    Err(reason) => {
                        book.rejected.push(command.id);
                        Err(reason)
                    }
                }
            };

            match definition {
                Ok(()) => {
                    queued += 1;
                    self.reporter
                        .report(command.id, StatusUpdate::status(ReportedStatus::Received, Utc::now()));
                }
                Err(reason) => {
                    log::warn!("Rejecting command {}: {}", command.id, reason);
                    self.reporter
                        .report(command.id, StatusUpdate::status(ReportedStatus::Fail, Utc::now()));
                }
            }
        }
        queued
    }

    pub fn has_queued(&self) -> bool {
        !self.book().queue.is_empty()
    }

    /// Execute the oldest queued command and arm its completion triggers.
    ///
    /// Returns the id of the dispatched command.
    pub fn dispatch_next(&self, now: Instant) -> Option<u64> {
        let (id, line, definition) = {
            let mut book = self.book();
            let id = book.queue.pop_front()?;
            let command = book.commands.get_mut(&id)?;
            command.state = CommandState::Dispatched;
            (id, command.render(), command.definition.clone())
        };

        // Arm before executing so a fast reply cannot slip past.
        if let Some(console) = definition.tracking.console() {
            for text in &console.success {
                let matcher = ConsoleMatcher {
                    text: text.clone(),
                    outcome: ReportedStatus::Success,
                };
                self.console_alerts.add_at(id, matcher, definition.timeout, now);
            }
            for text in &console.fail {
                let matcher = ConsoleMatcher {
                    text: text.clone(),
                    outcome: ReportedStatus::Fail,
                };
                self.console_alerts.add_at(id, matcher, definition.timeout, now);
            }
        }
        if let Some(ack) = definition.tracking.telemetry() {
            let matcher = AckMatcher {
                message_type: ack.message_type.clone(),
                command_name: ack.command_name.clone(),
            };
            self.ack_alerts.add_at(id, matcher, definition.timeout, now);
        }

        log::info!("Executing command {}: {}", id, line);
        match self.executor.execute(&line) {
            Err(e) => {
                log::warn!("Command {} failed to execute: {:#}", id, e);
                self.finish(id, CommandState::AckedFail, StatusUpdate::status(ReportedStatus::Fail, Utc::now()));
            }
            Ok(()) if definition.tracking.console().is_none() && definition.tracking.telemetry().is_none() => {
                self.finish(id, CommandState::AckedSuccess, StatusUpdate::status(ReportedStatus::Success, Utc::now()));
            }
            Ok(()) => {}
        }
        Some(id)
    }

    /// A console line was written on the vehicle.
    pub fn on_console_line(&self, line: &str, now: Instant) {
        for resolution in self.console_alerts.check(line, now) {
            self.resolve(resolution);
        }
    }

    /// A command acknowledgment arrived in telemetry.
    pub fn on_ack(&self, ack: &Ack, now: Instant) {
        for resolution in self.ack_alerts.check(ack, now) {
            self.resolve(resolution);
        }
    }

    /// Expire overdue triggers in both registries.
    pub fn sweep(&self, now: Instant) {
        let mut expired = self.console_alerts.sweep(now);
        expired.extend(self.ack_alerts.sweep(now));
        for resolution in expired {
            self.resolve(resolution);
        }
    }

    /// Apply a trigger resolution to the command it belongs to.
    pub fn resolve(&self, resolution: Resolution) {
        log::debug!("Command {} resolved: {:?}", resolution.command_id(), resolution);
        match resolution {
            Resolution::Console { command_id, outcome } => {
                let state = if outcome == ReportedStatus::Success {
                    CommandState::AckedSuccess
                } else {
                    CommandState::AckedFail
                };
                self.finish(command_id, state, StatusUpdate::status(outcome, Utc::now()));
            }
            Resolution::Ack { command_id, result } => {
                let console_tracked = {
                    let book = self.book();
                    match book.commands.get(&command_id) {
                        Some(command) if !command.state.is_terminal() => command.definition.tracking.console().is_some(),
                        _ => return,
                    }
                };
                if console_tracked {
                    // The console text decides the outcome; pass the ack result along.
                    self.reporter.report(command_id, StatusUpdate::mav_status(&result));
                } else if is_accepted_result(&result) {
                    let update = StatusUpdate::status(ReportedStatus::Success, Utc::now()).with_mav_status(&result);
                    self.finish(command_id, CommandState::AckedSuccess, update);
                } else {
                    let update = StatusUpdate::status(ReportedStatus::Fail, Utc::now()).with_mav_status(&result);
                    self.finish(command_id, CommandState::AckedFail, update);
                }
            }
            Resolution::Expired { command_id } => {
                log::info!("Command {} timed out", command_id);
                self.finish(command_id, CommandState::Expired, StatusUpdate::status(ReportedStatus::Timeout, Utc::now()));
            }
        }
    }

    /// Move a command to a terminal state, once.
    fn finish(&self, id: u64, state: CommandState, update: StatusUpdate) -> bool {
        {
            let mut book = self.book();
            match book.commands.get_mut(&id) {
                Some(command) if !command.state.is_terminal() => command.state = state,
                _ => return false,
            }
        }
        self.console_alerts.discard(id);
        self.ack_alerts.discard(id);
        self.reporter.report(id, update);
        true
    }

    #[cfg(test)]
    pub fn state(&self, id: u64) -> Option<CommandState> {
        self.book().commands.get(&id).map(|c| c.state)
    }

    /// Number of armed triggers across both registries.
    #[cfg(test)]
    pub fn armed_triggers(&self) -> usize {
        self.console_alerts.len() + self.ack_alerts.len()
    }
}
