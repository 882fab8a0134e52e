//! Host service units
//!
//! Workload pods are kept alive across reboots by systemd units generated on
//! the device. This module installs and drives those units and persists the
//! set of known units to `services.json` so it survives agent restarts.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

pub const SERVICE_SUFFIX: &str = ".service";
pub const TIMER_SUFFIX: &str = ".timer";

const SERVICES_FILE_NAME: &str = "services.json";

/// Runtime-dir override consulted for user-bus systemd access
const RUNTIME_DIR_ENV: &str = "FLOTTA_XDG_RUNTIME_DIR";

/// `<name>.service`
pub fn unit_name(service_name: &str) -> String {
    format!("{service_name}{SERVICE_SUFFIX}")
}

/// `<name>.timer`
pub fn timer_name(service_name: &str) -> String {
    format!("{service_name}{TIMER_SUFFIX}")
}

/// Directory unit files are written to: `$HOME/.config/systemd/user/`
pub fn default_units_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_default();
    Path::new(&home).join(".config/systemd/user/")
}

/// Which systemd instance a unit belongs to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusType {
    #[default]
    User,
    System,
}

/// A `systemctl` invocation that completed with a failure status
#[derive(Debug, Error)]
#[error("systemctl {verb} for unit '{unit}' failed: {detail}")]
pub struct SystemctlError {
    pub verb: String,
    pub unit: String,
    pub detail: String,
}

/// One manageable host service
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    /// Write the unit files and reload the daemon
    async fn add(&self) -> Result<()>;

    /// Delete the unit files and reload the daemon
    async fn remove(&self) -> Result<()>;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    async fn enable(&self) -> Result<()>;

    async fn disable(&self) -> Result<()>;
}

/// Systemd-backed service: a named set of unit files on one bus
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Systemd {
    pub name: String,
    pub units: Vec<String>,
    #[serde(rename = "busType", default)]
    pub bus: BusType,
    #[serde(skip)]
    units_content: HashMap<String, String>,
}

impl Systemd {
    pub fn new(name: impl Into<String>, units_content: HashMap<String, String>, bus: BusType) -> Self {
        let units = units_content.keys().cloned().collect();
        Self {
            name: name.into(),
            units,
            bus,
            units_content,
        }
    }

    async fn systemctl(&self, verb: &str, args: &[&str]) -> Result<()> {
        let mut command = Command::new("systemctl");
        if self.bus == BusType::User {
            command.arg("--user");
            if let Ok(runtime_dir) = std::env::var(RUNTIME_DIR_ENV) {
                command.env("XDG_RUNTIME_DIR", &runtime_dir);
                command.env(
                    "DBUS_SESSION_BUS_ADDRESS",
                    format!("unix:path={runtime_dir}/systemd/private"),
                );
            }
        }
        command.arg(verb).args(args);

        let output = command
            .output()
            .await
            .with_context(|| format!("cannot execute systemctl {verb}"))?;
        if !output.status.success() {
            return Err(SystemctlError {
                verb: verb.to_string(),
                unit: unit_name(&self.name),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        self.systemctl("daemon-reload", &[]).await
    }
}

#[async_trait]
impl Service for Systemd {
    fn name(&self) -> &str {
        &self.name
    }

    async fn add(&self) -> Result<()> {
        if self.units_content.is_empty() {
            info!(service = %self.name, "Adding service with no units available");
        }
        for (unit, content) in &self.units_content {
            let target = default_units_path().join(unit_name(unit));
            tokio::fs::write(&target, content)
                .await
                .with_context(|| format!("cannot write unit file {}", target.display()))?;
            tokio::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o644))
                .await
                .with_context(|| {
                    format!("cannot set permissions on unit file {}", target.display())
                })?;
            info!(unit = %unit, target = %target.display(), "Writing systemd unit file");
        }
        self.reload().await
    }

    async fn remove(&self) -> Result<()> {
        for unit in &self.units {
            let target = default_units_path().join(unit_name(unit));
            tokio::fs::remove_file(&target)
                .await
                .with_context(|| format!("cannot remove unit file {}", target.display()))?;
        }
        self.reload().await
    }

    async fn start(&self) -> Result<()> {
        debug!(service = %self.name, "Starting systemd service");
        self.systemctl("start", &[&unit_name(&self.name)]).await
    }

    async fn stop(&self) -> Result<()> {
        debug!(service = %self.name, "Stopping systemd service");
        self.systemctl("stop", &[&unit_name(&self.name)]).await
    }

    async fn enable(&self) -> Result<()> {
        debug!(service = %self.name, "Enabling systemd service");
        self.systemctl("enable", &[&unit_name(&self.name)]).await
    }

    async fn disable(&self) -> Result<()> {
        debug!(service = %self.name, "Disabling systemd service");
        self.systemctl("disable", &[&unit_name(&self.name)]).await
    }
}

/// Keeps the set of known services, mirrored to `services.json`
pub struct SystemdManager {
    services_file: PathBuf,
    services: RwLock<HashMap<String, Systemd>>,
}

impl SystemdManager {
    /// Load any previously persisted service set from `config_dir`
    pub fn new(config_dir: &Path) -> Result<Self> {
        let services_file = config_dir.join(SERVICES_FILE_NAME);
        let services = match std::fs::read(&services_file) {
            Ok(contents) => serde_json::from_slice(&contents)
                .with_context(|| format!("cannot unmarshal {}", services_file.display()))?,
            Err(_) => HashMap::new(),
        };
        Ok(Self {
            services_file,
            services: RwLock::new(services),
        })
    }

    pub fn add(&self, service: Systemd) -> Result<()> {
        let mut services = self.services.write().unwrap();
        services.insert(service.name.clone(), service);
        self.persist(&services)
    }

    pub fn get(&self, name: &str) -> Option<Systemd> {
        self.services.read().unwrap().get(name).cloned()
    }

    pub fn remove(&self, service: &Systemd) -> Result<()> {
        let mut services = self.services.write().unwrap();
        services.remove(&service.name);
        self.persist(&services)
    }

    /// Delete the persisted set; part of device deregistration
    pub fn remove_services_file(&self) -> Result<()> {
        info!(file = %self.services_file.display(), "Deleting services file");
        match std::fs::remove_file(&self.services_file) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| {
                format!("failed to delete {}", self.services_file.display())
            }),
        }
    }

    fn persist(&self, services: &HashMap<String, Systemd>) -> Result<()> {
        let contents = serde_json::to_vec(services)?;
        std::fs::write(&self.services_file, contents)?;
        std::fs::set_permissions(&self.services_file, std::fs::Permissions::from_mode(0o640))?;
        Ok(())
    }
}
