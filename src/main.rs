use anyhow::Context;
use env_logger::Builder;
use log::{LevelFilter, info};
use std::path::PathBuf;
use std::sync::Arc;

use crate::agent::Agent;
use crate::backend::BackendClient;
use crate::bridge::StdoutExecutor;
use crate::common::threads::StopSignal;
use crate::config::{AgentConfig, DEFAULT_CONFIG_PATH};

mod agent;
mod backend;
mod bridge;
mod collection;
mod commands;
mod common;
mod config;
mod scheduler;
mod sync;
mod telemetry;

#[cfg(test)]
mod testing;

fn main() -> anyhow::Result<()> {
    // Logging setup; stderr only, stdout carries the command stream
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("rover_sync"), LevelFilter::Debug)
        .parse_default_env()
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = AgentConfig::load(&config_path)?;
    info!(
        "Starting up: vehicle {} at {}, {} data-collection profiles",
        config.api.vehicle_id,
        config.api.api_url,
        config.data_collection.len()
    );

    let backend = Arc::new(BackendClient::new(config.api.clone()).context("Failed to create backend client")?);
    let agent = Arc::new(Agent::new(config, backend, Arc::new(StdoutExecutor)));
    let stop = Arc::new(StopSignal::new());

    let mut workers = agent.start(stop.clone()).context("Failed to start background workers")?;
    workers.push(bridge::spawn_stdin_reader(agent.clone(), stop.clone()).context("Failed to start bridge reader")?);

    agent.run(&stop);

    for worker in workers {
        let _ = worker.join();
    }
    info!("Shut down");
    Ok(())
}
