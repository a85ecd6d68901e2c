//! Backend-issued commands: validation, dispatch and completion tracking.

pub mod alerts;
pub mod dispatcher;
pub mod reporter;
pub mod types;

pub use alerts::{Ack, Resolution};
pub use dispatcher::{CommandExecutor, Dispatcher};
pub use reporter::StatusReporter;
pub use types::{CommandState, DirectCommand, ReportedStatus};
