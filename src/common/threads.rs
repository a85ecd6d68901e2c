//! Worker thread plumbing shared by the scheduler, the exchange and the
//! collection workers.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Cooperative stop request for a long-running worker.
pub type StopSignal = Signal<CriticalSectionRawMutex, ()>;

/// Spawn a named thread whose body cannot take the process down.
///
/// A panic inside `body` is caught and logged; the thread then simply ends.
pub fn spawn_guarded<F>(name: &str, body: F) -> std::io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let label = name.to_string();
    thread::Builder::new().name(label.clone()).spawn(move || {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(body)) {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::error!("Thread {} failed: {}", label, reason);
        }
    })
}

/// Sleep for `duration` in short slices, waking early when `stop` fires.
///
/// Returns `true` if the stop signal was observed.
pub fn sleep_unless_stopped(stop: &StopSignal, duration: Duration) -> bool {
    const SLICE: Duration = Duration::from_millis(50);
    let deadline = Instant::now() + duration;
    loop {
        if stop.signaled() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep(SLICE.min(deadline - now));
    }
}
