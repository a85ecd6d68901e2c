//! HTTP client for the vehicle backend.

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use std::time::Duration;

use super::{Backend, Heartbeat, StatusUpdate, SyncError};
use crate::config::ApiConfig;

/// Blocking client authenticating with HTTP basic auth.
pub struct BackendClient {
    client: Client,
    api: ApiConfig,
}

impl BackendClient {
    /// Create a new BackendClient with the given credentials.
    pub fn new(api: ApiConfig) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SyncError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, api })
    }

    fn vehicle_url(&self, path: &str) -> String {
        format!("{}/vehicles/{}/{}", self.api.api_url.trim_end_matches('/'), self.api.vehicle_id, path)
    }

    fn status_error(response: Response) -> SyncError {
        let code = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        if code == 401 {
            log::warn!("Authentication failed. Check username and password in config");
        }
        SyncError::Status { code, body }
    }
}

impl Backend for BackendClient {
    fn post_heartbeat(&self, heartbeat: &Heartbeat) -> Result<String, SyncError> {
        let url = self.vehicle_url("heartbeats/");
        log::debug!("Posting heartbeat to {}", url);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.api.username, Some(&self.api.password))
            .json(heartbeat)
            .send()
            .map_err(|e| SyncError::Network(e.to_string()))?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => response.text().map_err(|e| SyncError::Network(e.to_string())),
            _ => Err(Self::status_error(response)),
        }
    }

    fn update_command(&self, command_id: u64, update: &StatusUpdate) -> Result<(), SyncError> {
        let url = self.vehicle_url(&format!("mavproxy_commands/{}/", command_id));
        log::debug!("Updating command {}: {:?}", command_id, update);

        let response = self
            .client
            .patch(&url)
            .basic_auth(&self.api.username, Some(&self.api.password))
            .json(update)
            .send()
            .map_err(|e| SyncError::Network(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::status_error(response))
        }
    }

    fn download_mission(&self, job: &str, mission: &str) -> Result<Vec<u8>, SyncError> {
        let url = format!(
            "{}/jobs/{}/missions/{}/text_file/",
            self.api.api_url.trim_end_matches('/'),
            job,
            mission
        );
        log::info!("Downloading mission from {}", url);

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.api.username, Some(&self.api.password))
            .send()
            .map_err(|e| SyncError::Network(e.to_string()))?;

        if response.status() == StatusCode::OK {
            let bytes = response.bytes().map_err(|e| SyncError::Network(e.to_string()))?;
            Ok(bytes.to_vec())
        } else {
            Err(Self::status_error(response))
        }
    }
}
