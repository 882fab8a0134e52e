//! Edge device agent daemon
//!
//! Runs on the device, reconciles operator configuration against the local
//! container runtime and reports heartbeats upstream. This binary wires
//! logging, bootstrap configuration and the health/metrics API; the runtime
//! wrapper and upstream transport are provided by the deployment.

use agent_lib::{health::subsystems, AgentMetrics, HealthRegistry};
use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs with env-filter, default info
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!(version = AGENT_VERSION, "Starting edge-agent");

    let config = config::AgentConfig::load()?;
    info!(
        device_id = %config.device_id,
        data_dir = %config.data_dir,
        bus_type = ?config.bus_type,
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(subsystems::RECONCILER).await;
    health_registry.register(subsystems::HEARTBEAT).await;
    health_registry.register(subsystems::METRICS_REGISTRY).await;
    health_registry.register(subsystems::UNIT_MANAGER).await;

    // register the process-wide metrics before the first scrape
    let _metrics = AgentMetrics::new();

    let app_state = Arc::new(api::AppState::new(health_registry.clone()));

    health_registry.mark_startup_complete().await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    api_handle.abort();

    Ok(())
}
