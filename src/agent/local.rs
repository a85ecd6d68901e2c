//! Commands addressed to the agent itself.
//!
//! ```text
//! agent comm_start
//! agent comm_stop
//! agent set_comm_interval <seconds>
//! agent dl_mission <job> <mission>
//! ```
//!
//! Anything else is forwarded to the host executor unchanged.

use anyhow::{Context, anyhow, bail};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::ConsoleSink;
use crate::backend::{Backend, SyncError};
use crate::commands::CommandExecutor;
use crate::common::threads::spawn_guarded;
use crate::scheduler::CommSettings;

const COMMAND_PREFIX: &str = "agent";

pub struct LocalCommands {
    host: Arc<dyn CommandExecutor>,
    backend: Arc<dyn Backend>,
    settings: Arc<CommSettings>,
    console: Arc<ConsoleSink>,
    mission_file: PathBuf,
}

impl LocalCommands {
    pub fn new(
        host: Arc<dyn CommandExecutor>,
        backend: Arc<dyn Backend>,
        settings: Arc<CommSettings>,
        console: Arc<ConsoleSink>,
        mission_file: PathBuf,
    ) -> Self {
        Self {
            host,
            backend,
            settings,
            console,
            mission_file,
        }
    }

    fn start_mission_download(&self, job: &str, mission: &str) -> anyhow::Result<()> {
        let backend = self.backend.clone();
        let console = self.console.clone();
        let path = self.mission_file.clone();
        let (job, mission) = (job.to_string(), mission.to_string());
        // Off the scheduler thread; completion is announced on the console.
        spawn_guarded("mission-download", move || {
            download_mission(backend.as_ref(), &console, &path, &job, &mission);
        })
        .context("Failed to start mission download")?;
        Ok(())
    }
}

/// Fetch a mission text file and write it to `path`.
///
/// The result is written to the console, where a command waiting for it can
/// pick it up.
pub fn download_mission(backend: &dyn Backend, console: &ConsoleSink, path: &Path, job: &str, mission: &str) {
    let line = match backend.download_mission(job, mission) {
        Ok(body) => match std::fs::write(path, body) {
            Ok(()) => {
                log::info!("Mission {}/{} written to {}", job, mission, path.display());
                "Mission download successful".to_string()
            }
            Err(e) => {
                log::warn!("Failed to write mission file {}: {}", path.display(), e);
                format!("Mission download fail. {}", SyncError::Io(e.to_string()))
            }
        },
        Err(SyncError::Status { code, .. }) => format!("Mission download fail. Server status: {}", code),
        Err(e) => format!("Mission download fail. {}", e),
    };
    console.write(&line, "black", "white");
}

impl CommandExecutor for LocalCommands {
    fn execute(&self, command: &str) -> anyhow::Result<()> {
        let mut words = command.split_whitespace();
        if words.next() != Some(COMMAND_PREFIX) {
            return self.host.execute(command);
        }

        match words.next() {
            Some("comm_start") => {
                self.settings.set_enabled(true);
                self.settings.sync_now();
            }
            Some("comm_stop") => self.settings.set_enabled(false),
            Some("set_comm_interval") => {
                let raw = words.next().ok_or_else(|| anyhow!("set_comm_interval needs a value"))?;
                let seconds: u64 = raw.parse().with_context(|| format!("bad interval: {:?}", raw))?;
                if seconds == 0 {
                    bail!("interval must be greater than zero");
                }
                self.settings.set_interval(Duration::from_secs(seconds));
            }
            Some("dl_mission") => {
                let (Some(job), Some(mission)) = (words.next(), words.next()) else {
                    bail!("usage: agent dl_mission <job> <mission>");
                };
                self.start_mission_download(job, mission)?;
            }
            other => bail!("unknown agent command: {:?}", other.unwrap_or_default()),
        }
        Ok(())
    }
}
