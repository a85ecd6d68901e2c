//! Remote backend interface.
//!
//! The engine only talks to the backend through the [`Backend`] trait so the
//! sync and command logic can be exercised without a network. The production
//! implementation is the blocking HTTP [`BackendClient`].

pub mod client;
pub mod payload;

pub use client::BackendClient;
pub use payload::{Heartbeat, HeartbeatReply, StatusUpdate};

/// Error type for backend round trips.
#[derive(Debug)]
pub enum SyncError {
    /// The request never produced a response.
    Network(String),
    /// The backend answered with an unexpected HTTP status.
    Status { code: u16, body: String },
    /// The response body could not be decoded.
    Parse(String),
    /// Local I/O around a backend call failed.
    Io(String),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Network(msg) => write!(f, "Network error: {}", msg),
            SyncError::Status { code, body } => write!(f, "Bad response from server ({}): {}", code, body),
            SyncError::Parse(msg) => write!(f, "Failed to parse response: {}", msg),
            SyncError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for SyncError {}

/// Operations the agent needs from the remote backend.
pub trait Backend: Send + Sync {
    /// Send one heartbeat. Returns the raw response body on HTTP 200/201.
    fn post_heartbeat(&self, heartbeat: &Heartbeat) -> Result<String, SyncError>;

    /// Report the status of a backend-issued command.
    fn update_command(&self, command_id: u64, update: &StatusUpdate) -> Result<(), SyncError>;

    /// Fetch the text file of a mission.
    fn download_mission(&self, job: &str, mission: &str) -> Result<Vec<u8>, SyncError>;
}
