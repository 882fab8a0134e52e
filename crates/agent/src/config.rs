//! Daemon bootstrap configuration

use agent_lib::service::BusType;
use anyhow::Result;
use serde::Deserialize;

/// Agent configuration, loaded from the environment
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Identifier assigned to this device at registration
    #[serde(default = "default_device_id")]
    pub device_id: String,

    /// Root of the agent's on-disk state (workloads, volumes, services.json)
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Systemd bus the unit manager talks to
    #[serde(default = "default_bus_type")]
    pub bus_type: BusType,
}

fn default_device_id() -> String {
    std::env::var("DEVICE_ID").unwrap_or_else(|_| "unknown".to_string())
}

fn default_data_dir() -> String {
    "/var/lib/edge-agent".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_bus_type() -> BusType {
    BusType::User
}

impl AgentConfig {
    /// Load configuration from `EDGE_AGENT_*` environment variables
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("EDGE_AGENT"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_else(|_| AgentConfig {
            device_id: default_device_id(),
            data_dir: default_data_dir(),
            api_port: default_api_port(),
            bus_type: default_bus_type(),
        }))
    }
}
