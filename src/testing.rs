//! Test doubles for the agent's external collaborators.

use serde_json::Value;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::backend::{Backend, Heartbeat, StatusUpdate, SyncError};
use crate::commands::CommandExecutor;

/// Backend recording every call and answering with canned responses.
pub struct FakeBackend {
    heartbeats: Mutex<Vec<Value>>,
    reply: Mutex<Result<String, u16>>,
    post_delay: Mutex<Duration>,
    updates: Mutex<Vec<(u64, StatusUpdate)>>,
    fail_updates: AtomicBool,
    mission: Mutex<Result<Vec<u8>, u16>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            heartbeats: Mutex::new(Vec::new()),
            reply: Mutex::new(Ok(r#"{"direct_commands": []}"#.to_string())),
            post_delay: Mutex::new(Duration::ZERO),
            updates: Mutex::new(Vec::new()),
            fail_updates: AtomicBool::new(false),
            mission: Mutex::new(Err(404)),
        }
    }

    pub fn respond_with(&self, body: &str) {
        *self.reply.lock().unwrap() = Ok(body.to_string());
    }

    pub fn respond_with_status(&self, code: u16) {
        *self.reply.lock().unwrap() = Err(code);
    }

    pub fn delay_posts(&self, delay: Duration) {
        *self.post_delay.lock().unwrap() = delay;
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn serve_mission(&self, body: Result<&[u8], u16>) {
        *self.mission.lock().unwrap() = body.map(|b| b.to_vec());
    }

    /// Every heartbeat body posted so far, as JSON.
    pub fn heartbeats(&self) -> Vec<Value> {
        self.heartbeats.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<(u64, StatusUpdate)> {
        self.updates.lock().unwrap().clone()
    }

    /// Status codes reported for one command, in order.
    pub fn statuses_for(&self, command_id: u64) -> Vec<u8> {
        self.updates()
            .into_iter()
            .filter(|(id, _)| *id == command_id)
            .filter_map(|(_, u)| u.status)
            .collect()
    }
}

impl Backend for FakeBackend {
    fn post_heartbeat(&self, heartbeat: &Heartbeat) -> Result<String, SyncError> {
        let delay = *self.post_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.heartbeats.lock().unwrap().push(serde_json::to_value(heartbeat).unwrap());
        match self.reply.lock().unwrap().clone() {
            Ok(body) => Ok(body),
            Err(code) => Err(SyncError::Status {
                code,
                body: String::new(),
            }),
        }
    }

    fn update_command(&self, command_id: u64, update: &StatusUpdate) -> Result<(), SyncError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(SyncError::Network("connection refused".into()));
        }
        self.updates.lock().unwrap().push((command_id, update.clone()));
        Ok(())
    }

    fn download_mission(&self, _job: &str, _mission: &str) -> Result<Vec<u8>, SyncError> {
        self.mission.lock().unwrap().clone().map_err(|code| SyncError::Status {
            code,
            body: String::new(),
        })
    }
}

/// Executor recording the command lines it receives.
pub struct RecordingExecutor {
    commands: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl CommandExecutor for RecordingExecutor {
    fn execute(&self, command: &str) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("executor unavailable");
        }
        self.commands.lock().unwrap().push(command.to_string());
        Ok(())
    }
}
