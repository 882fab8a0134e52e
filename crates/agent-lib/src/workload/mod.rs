//! Workload reconciliation
//!
//! Drives the host toward the operator's desired workload set: manifests and
//! authfiles on disk, pods running through the runtime wrapper, secrets in
//! sync, stale workloads garbage collected. All mutating entry points share
//! one management lock; failures are collected per workload instead of
//! aborting the pass.

pub mod mounts;
pub mod pod;
pub mod runtime;


use crate::errors::CompositeError;
use crate::models::{
    DeviceConfiguration, DeviceConfigurationMessage, EventInfo, EventType, Secret, WorkloadInfo,
    Workload,
};
use crate::observability::AgentMetrics;
use anyhow::{bail, Context, Result};
use pod::Pod;
use runtime::{LogSink, LogStreamHandle, RuntimeWrapper, WorkloadObserver};
use std::collections::HashSet;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace};

/// Manifest file inside each workload directory
pub const WORKLOAD_FILE_NAME: &str = "workload.yaml";
/// Authfile inside each workload directory, present only with credentials
pub const AUTH_FILE_NAME: &str = "auth.json";

/// State behind the management lock
#[derive(Default)]
struct ManagerState {
    deregistered: bool,
    events: Vec<EventInfo>,
}

/// Reconciles desired workload configuration against the live runtime state
pub struct WorkloadManager {
    workloads_dir: PathBuf,
    volumes_dir: PathBuf,
    runtime: Arc<dyn RuntimeWrapper>,
    device_id: String,
    metrics: AgentMetrics,
    state: Mutex<ManagerState>,
}

impl WorkloadManager {
    /// Create the manager, materialize its data directories and initialize
    /// the runtime wrapper.
    pub async fn new(
        data_dir: &Path,
        runtime: Arc<dyn RuntimeWrapper>,
        device_id: impl Into<String>,
    ) -> Result<Self> {
        let workloads_dir = data_dir.join("workloads");
        ensure_dir(&workloads_dir, 0o777)
            .await
            .context("cannot create workloads directory")?;
        let volumes_dir = data_dir.join("volumes");
        ensure_dir(&volumes_dir, 0o777)
            .await
            .context("cannot create volumes directory")?;

        runtime.init().await?;

        Ok(Self {
            workloads_dir,
            volumes_dir,
            runtime,
            device_id: device_id.into(),
            metrics: AgentMetrics::new(),
            state: Mutex::new(ManagerState::default()),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Host directory exported into the workload's containers at `/export`
    pub fn exported_host_path(&self, workload_name: &str) -> PathBuf {
        self.volumes_dir.join(workload_name)
    }

    /// Atomically copy and clear the queued events
    pub async fn pop_events(&self) -> Vec<EventInfo> {
        let mut state = self.state.lock().await;
        self.metrics.set_events_queued(0);
        std::mem::take(&mut state.events)
    }

    /// Live workloads as reported by the runtime
    pub async fn list(&self) -> Result<Vec<WorkloadInfo>> {
        self.runtime.list().await
    }

    pub fn register_observer(&self, observer: Arc<dyn WorkloadObserver>) {
        self.runtime.register_observer(observer);
    }

    pub fn listen_service_events(&self) {
        self.runtime.listen_service_events();
    }

    /// Stream container logs into `sink`; the handle cancels the stream
    pub async fn logs(&self, pod_id: &str, sink: LogSink) -> Result<LogStreamHandle> {
        self.runtime.logs(pod_id, sink).await
    }

    pub async fn init(&self, configuration: &DeviceConfigurationMessage) -> Result<(), CompositeError> {
        self.update(configuration).await
    }

    /// Drive live state toward `configuration`. Idempotent; collects every
    /// per-workload failure into the returned composite instead of aborting.
    pub async fn update(
        &self,
        configuration: &DeviceConfigurationMessage,
    ) -> Result<(), CompositeError> {
        let mut state = self.state.lock().await;
        if state.deregistered {
            info!(device_id = %self.device_id, "Deregistration finished, ignoring configuration update");
            return Ok(());
        }

        let timer = self.metrics.reconcile_timer();
        let mut errors = CompositeError::new();

        self.update_secrets(&configuration.secrets, &mut errors).await;

        let mut desired: HashSet<&str> = HashSet::with_capacity(configuration.workloads.len());
        for workload in &configuration.workloads {
            trace!(workload = %workload.name, device_id = %self.device_id, "Deploying workload");
            desired.insert(workload.name.as_str());
            if let Err(err) = self
                .apply_workload(workload, &configuration.configuration, &mut state.events)
                .await
            {
                errors.push(err);
            }
        }
        self.metrics.set_workloads_desired(desired.len() as i64);
        self.metrics.set_events_queued(state.events.len() as i64);

        match self.runtime.list().await {
            Ok(deployed) => {
                for stale in deployed
                    .iter()
                    .filter(|info| !desired.contains(info.name.as_str()))
                {
                    info!(workload = %stale.name, device_id = %self.device_id, "Removing stale workload");
                    if let Err(err) = remove_dir(&self.workload_dir_path(&stale.name)).await {
                        errors.push(
                            anyhow::Error::new(err)
                                .context("cannot remove existing workload directory"),
                        );
                    }
                    if let Err(err) = self.runtime.remove(&stale.name).await {
                        errors.push(err.context(format!(
                            "cannot remove stale workload '{}'",
                            stale.name
                        )));
                    }
                }
            }
            Err(err) => {
                error!(error = %err, device_id = %self.device_id, "Cannot get deployed workloads");
                errors.push(err.context("cannot get deployed workloads"));
            }
        }

        timer.observe_duration();
        errors.into_result()
    }

    /// Stop every live workload without removing it. The known set stays
    /// intact, so the next `update` runs them again.
    pub async fn stop_all(&self) -> Result<(), CompositeError> {
        let _state = self.state.lock().await;
        info!(device_id = %self.device_id, "Stopping all workloads");

        let workloads = self
            .runtime
            .list()
            .await
            .map_err(CompositeError::from)?;
        let mut errors = CompositeError::new();
        for workload in workloads {
            info!(workload = %workload.name, device_id = %self.device_id, "Stopping workload");
            if let Err(err) = self.runtime.stop(&workload.name).await {
                error!(workload = %workload.name, error = %err, "Error stopping workload");
                errors.push(err.context(format!("cannot stop workload '{}'", workload.name)));
            }
        }
        errors.into_result()
    }

    /// Remove every live workload and all on-disk state, then become a sink:
    /// later `update` calls succeed without effect.
    pub async fn deregister(&self) -> Result<(), CompositeError> {
        let mut state = self.state.lock().await;
        let mut errors = CompositeError::new();

        info!(device_id = %self.device_id, "Removing all workloads");
        match self.runtime.list().await {
            Ok(workloads) => {
                for workload in workloads {
                    info!(workload = %workload.name, device_id = %self.device_id, "Removing workload");
                    if let Err(err) = self.runtime.remove(&workload.name).await {
                        error!(workload = %workload.name, error = %err, "Error removing workload");
                        errors.push(
                            err.context(format!("failed to remove workload '{}'", workload.name)),
                        );
                    }
                }
            }
            Err(err) => errors.push(err.context("failed to list workloads for removal")),
        }

        info!(device_id = %self.device_id, "Deleting manifests directory");
        if let Err(err) = remove_dir(&self.workloads_dir).await {
            errors.push(anyhow::Error::new(err).context("failed to delete manifests directory"));
        }

        info!(device_id = %self.device_id, "Deleting nftable");
        if let Err(err) = self.runtime.remove_table().await {
            errors.push(err.context("failed to delete table"));
        }

        info!(device_id = %self.device_id, "Deleting volumes directory");
        if let Err(err) = remove_dir(&self.volumes_dir).await {
            errors.push(anyhow::Error::new(err).context("failed to delete volumes directory"));
        }

        state.deregistered = true;
        errors.into_result()
    }

    /// Reconcile the runtime's secret set against the desired one. Errors
    /// are collected; one failed secret does not skip the rest.
    async fn update_secrets(&self, secrets: &[Secret], errors: &mut CompositeError) {
        let mut live = match self.runtime.list_secrets().await {
            Ok(live) => live,
            Err(err) => {
                errors.push(err.context("cannot list secrets"));
                return;
            }
        };

        for secret in secrets {
            let result = if live.remove(&secret.name) {
                self.runtime.update_secret(&secret.name, &secret.data).await
            } else {
                self.runtime.create_secret(&secret.name, &secret.data).await
            };
            if let Err(err) = result {
                errors.push(err.context(format!("cannot reconcile secret '{}'", secret.name)));
            }
        }

        for stale in live {
            if let Err(err) = self.runtime.remove_secret(&stale).await {
                errors.push(err.context(format!("cannot remove secret '{stale}'")));
            }
        }
    }

    async fn apply_workload(
        &self,
        workload: &Workload,
        device_configuration: &DeviceConfiguration,
        events: &mut Vec<EventInfo>,
    ) -> Result<()> {
        let workload_dir = self.workload_dir_path(&workload.name);
        let manifest_path = workload_dir.join(WORKLOAD_FILE_NAME);
        let auth_path = workload_dir.join(AUTH_FILE_NAME);
        let auth_blob = workload
            .image_registries
            .as_ref()
            .map(|registries| registries.auth_file.as_str())
            .unwrap_or_default();
        let labeled_auth_path = if auth_blob.is_empty() {
            String::new()
        } else {
            auth_path.to_string_lossy().into_owned()
        };

        let pod = Pod::from_workload(
            workload,
            &self.volumes_dir,
            &self.device_id,
            &labeled_auth_path,
        )?;

        if mounts::pod_should_wait_for_mount(&pod, device_configuration) {
            bail!(
                "workload '{}' needs to mount blockdevice but it is not there yet",
                workload.name
            );
        }

        ensure_dir(&workload_dir, 0o755).await.with_context(|| {
            format!(
                "cannot create workload directory for workload '{}'",
                workload.name
            )
        })?;

        let manifest = pod.manifest_bytes(&workload.configmaps)?;

        if !pod_configuration_modified(&manifest_path, &manifest, &auth_path, auth_blob).await {
            trace!(
                workload = %workload.name,
                manifest = %manifest_path.display(),
                "Pod definition unchanged"
            );
            return Ok(());
        }

        store_file(&manifest_path, &manifest)
            .await
            .with_context(|| format!("cannot store manifest for workload '{}'", workload.name))?;

        let authfile_path = self
            .manage_auth_file(&auth_path, auth_blob)
            .await
            .with_context(|| {
                format!(
                    "cannot store auth configuration for workload '{}'",
                    workload.name
                )
            })?;

        // Remove first so a changed pod re-runs from a clean slate
        self.runtime
            .remove(&workload.name)
            .await
            .with_context(|| format!("error removing workload '{}'", workload.name))?;

        if let Err(err) = self
            .runtime
            .run(
                &pod,
                &manifest_path,
                &authfile_path,
                workload.annotations.as_ref(),
            )
            .await
        {
            error!(workload = %workload.name, error = %err, device_id = %self.device_id, "Cannot run workload");
            events.push(EventInfo {
                message: err.to_string(),
                reason: EventInfo::REASON_FAILED.to_string(),
                event_type: EventType::Warn,
            });
            return Err(err.context(format!("cannot run workload '{}'", workload.name)));
        }

        Ok(())
    }

    /// Bring the authfile to its desired state: absent blob deletes the
    /// file, anything else is written. Returns the path handed to the
    /// runtime, empty when no authfile exists.
    async fn manage_auth_file(&self, auth_path: &Path, auth_blob: &str) -> Result<String> {
        if auth_blob.is_empty() {
            delete_file(auth_path)
                .await
                .with_context(|| format!("cannot remove auth file {}", auth_path.display()))?;
            return Ok(String::new());
        }
        store_file(auth_path, auth_blob.as_bytes())
            .await
            .with_context(|| format!("cannot store auth file {}", auth_path.display()))?;
        Ok(auth_path.to_string_lossy().into_owned())
    }

    fn workload_dir_path(&self, workload_name: &str) -> PathBuf {
        self.workloads_dir.join(sanitize_name(workload_name))
    }
}

/// Workload names may carry spaces; directories must not
fn sanitize_name(workload_name: &str) -> String {
    workload_name.replace(' ', "-")
}

/// The workload is unchanged when both the manifest and the authfile match
/// what is on disk (authfile absent counts as matching an empty blob).
async fn pod_configuration_modified(
    manifest_path: &Path,
    manifest: &[u8],
    auth_path: &Path,
    auth_blob: &str,
) -> bool {
    match tokio::fs::read(manifest_path).await {
        Ok(existing) if existing == manifest => {}
        _ => return true,
    }
    match tokio::fs::read(auth_path).await {
        Ok(existing) => existing != auth_blob.as_bytes(),
        Err(_) => !auth_blob.is_empty(),
    }
}

async fn ensure_dir(path: &Path, mode: u32) -> std::io::Result<()> {
    if tokio::fs::metadata(path).await.is_ok() {
        return Ok(());
    }
    tokio::fs::create_dir_all(path).await?;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

/// Write `content` with owner-only permissions
async fn store_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .await?;
    file.write_all(content).await?;
    file.flush().await
}

async fn delete_file(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

async fn remove_dir(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "Directory removal failed");
            Err(err)
        }
    }
}
