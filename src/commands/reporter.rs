//! Ordered delivery of command status reports.
//!
//! Status changes are produced on whichever thread observed them (exchange,
//! scheduler sweep, console or telemetry delivery). They are queued here and
//! PATCHed to the backend by a single reporter thread, in production order, so
//! no producer ever waits on the network. Updates that do not fit the channel
//! wait in an overflow queue; none is ever dropped.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::backend::{Backend, StatusUpdate};
use crate::common::threads::{StopSignal, sleep_unless_stopped, spawn_guarded};

const REPORT_QUEUE_SIZE: usize = 256;
type Report = (u64, StatusUpdate);
type ReportQueue = Channel<CriticalSectionRawMutex, Report, REPORT_QUEUE_SIZE>;

/// Poll interval of the reporter thread.
const REPORT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct StatusReporter {
    queue: Arc<ReportQueue>,
    /// Reports produced while the channel was full, newer than anything in it.
    overflow: Arc<Mutex<VecDeque<Report>>>,
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self {
            queue: Arc::new(ReportQueue::new()),
            overflow: Arc::new(Mutex::new(VecDeque::new())),
        }
    }
}

impl StatusReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a status update for `command_id`.
    pub fn report(&self, command_id: u64, update: StatusUpdate) {
        log::info!("Command {} status: {:?}", command_id, update);
        let mut overflow = self.overflow.lock().unwrap_or_else(|e| e.into_inner());
        // Once anything overflowed, later reports queue behind it to keep order.
        if !overflow.is_empty() {
            overflow.push_back((command_id, update));
            return;
        }
        if let Err(TrySendError::Full(report)) = self.queue.try_send((command_id, update)) {
            log::debug!("Status report channel full, holding update for command {}", command_id);
            overflow.push_back(report);
        }
    }

    fn next_report(&self) -> Option<Report> {
        if let Ok(report) = self.queue.try_receive() {
            return Some(report);
        }
        self.overflow.lock().unwrap_or_else(|e| e.into_inner()).pop_front()
    }

    /// Deliver everything queued so far. Returns the number of updates taken.
    pub fn drain(&self, backend: &dyn Backend) -> usize {
        let mut delivered = 0;
        while let Some((command_id, update)) = self.next_report() {
            delivered += 1;
            if let Err(e) = backend.update_command(command_id, &update) {
                log::warn!("Failed to report status of command {}: {}", command_id, e);
            }
        }
        delivered
    }

    /// Run the delivery loop on its own thread until `stop` fires.
    pub fn spawn(&self, backend: Arc<dyn Backend>, stop: Arc<StopSignal>) -> std::io::Result<JoinHandle<()>> {
        let reporter = self.clone();
        spawn_guarded("status-reporter", move || {
            loop {
                reporter.drain(backend.as_ref());
                if sleep_unless_stopped(&stop, REPORT_POLL_INTERVAL) {
                    reporter.drain(backend.as_ref());
                    break;
                }
            }
            log::debug!("Status reporter stopped");
        })
    }
}
