//! Agent configuration loaded from a TOML file.

use anyhow::{Context, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "rover-sync.toml";

/// Minimum spacing between kept datapoints when a profile does not set one.
const DEFAULT_MIN_LOG_DISTANCE_M: f64 = 7.0;

/// Credentials and address of the vehicle backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ApiConfig {
    /// Base URL of the API (without trailing resource paths)
    pub api_url: String,
    pub username: String,
    pub password: String,
    /// Backend id of this vehicle
    pub vehicle_id: u64,
}

/// Which ingestion worker a data-collection profile runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    /// Synthetic readings, useful for bench testing the pipeline.
    Random,
    /// Electromagnetic survey sensor speaking NMEA-style sentences.
    Nmea,
}

/// One data-collection profile.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProfileConfig {
    pub profile_name: String,
    pub kind: ProfileKind,
    #[serde(default)]
    pub on: bool,
    pub dataset_id: u64,
    #[serde(default = "default_min_log_distance")]
    pub min_log_distance_m: f64,
    /// Serial device the NMEA worker reads from.
    pub device: Option<PathBuf>,
    #[serde(default = "default_baud")]
    pub baud: u32,
    /// Sensor model; `1s` completes a round on one array line plus `$PDLMA`.
    pub model: Option<String>,
    /// Directory receiving a local JSON-lines copy of every reading.
    pub datastore_dir: Option<PathBuf>,
}

fn default_min_log_distance() -> f64 {
    DEFAULT_MIN_LOG_DISTANCE_M
}

fn default_baud() -> u32 {
    9600
}

fn default_comm_interval() -> u64 {
    10
}

fn default_mission_file() -> PathBuf {
    PathBuf::from("mission.txt")
}

/// Complete agent configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AgentConfig {
    #[serde(flatten)]
    pub api: ApiConfig,
    #[serde(default = "default_comm_interval")]
    pub comm_interval_sec: u64,
    /// Start syncing on launch without waiting for a `comm_start` command.
    #[serde(default)]
    pub auto_comm_start: bool,
    /// Delay before the automatic start.
    #[serde(default)]
    pub comm_pause_sec: u64,
    /// Where downloaded missions are written.
    #[serde(default = "default_mission_file")]
    pub mission_file: PathBuf,
    #[serde(default)]
    pub data_collection: Vec<ProfileConfig>,
}

impl AgentConfig {
    /// Load configuration from a TOML file.
    pub fn load(config_path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file: {}", config_path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.api.api_url.trim().is_empty() {
            bail!("api-url is empty");
        }
        if self.comm_interval_sec == 0 {
            bail!("comm-interval-sec must be greater than zero");
        }
        for profile in &self.data_collection {
            if profile.kind == ProfileKind::Nmea && profile.device.is_none() {
                bail!("profile '{}' needs a device", profile.profile_name);
            }
        }
        Ok(())
    }

    pub fn comm_interval(&self) -> Duration {
        Duration::from_secs(self.comm_interval_sec)
    }
}
