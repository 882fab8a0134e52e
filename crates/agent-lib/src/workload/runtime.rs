//! Container runtime contract
//!
//! The agent never talks to podman directly; everything goes through this
//! trait so the reconciler can be driven against a mock in tests and against
//! the real wrapper in deployments.

use crate::models::WorkloadInfo;
use crate::workload::pod::Pod;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A running pod as reported by the runtime
#[derive(Debug, Clone, Default)]
pub struct PodReport {
    pub id: String,
    pub name: String,
    pub containers: Vec<ContainerReport>,
}

/// One container of a running pod with its runtime-assigned address
#[derive(Debug, Clone, Default)]
pub struct ContainerReport {
    pub name: String,
    pub ip_address: String,
}

/// Lifecycle callbacks fired by the runtime into registered subscribers.
///
/// Observers never call back into the runtime synchronously.
pub trait WorkloadObserver: Send + Sync {
    fn workload_started(&self, workload_name: &str, reports: &[PodReport]);
    fn workload_removed(&self, workload_name: &str);
}

/// Byte sink receiving streamed container log chunks
pub type LogSink = mpsc::Sender<Vec<u8>>;

/// Cancellation handle for an in-flight log stream
#[derive(Debug)]
pub struct LogStreamHandle {
    task: JoinHandle<()>,
}

impl LogStreamHandle {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    /// Terminate the streaming reader
    pub fn cancel(&self) {
        self.task.abort();
    }
}

/// Operations the container runtime wrapper must provide
#[async_trait]
pub trait RuntimeWrapper: Send + Sync {
    async fn init(&self) -> Result<()>;

    /// Live workloads known to the runtime
    async fn list(&self) -> Result<Vec<WorkloadInfo>>;

    /// Run the pod described by the manifest at `manifest_path`.
    /// `authfile_path` is empty when the workload carries no credentials.
    async fn run(
        &self,
        pod: &Pod,
        manifest_path: &Path,
        authfile_path: &str,
        annotations: Option<&HashMap<String, String>>,
    ) -> Result<()>;

    async fn remove(&self, workload_name: &str) -> Result<()>;

    async fn stop(&self, workload_name: &str) -> Result<()>;

    /// Stream container logs into `sink` until cancelled
    async fn logs(&self, pod_id: &str, sink: LogSink) -> Result<LogStreamHandle>;

    fn register_observer(&self, observer: Arc<dyn WorkloadObserver>);

    /// Start forwarding unit-manager events into lifecycle callbacks
    fn listen_service_events(&self);

    /// Drop the host nftable state owned by the runtime
    async fn remove_table(&self) -> Result<()>;

    async fn list_secrets(&self) -> Result<HashSet<String>>;

    async fn create_secret(&self, name: &str, data: &str) -> Result<()>;

    async fn update_secret(&self, name: &str, data: &str) -> Result<()>;

    async fn remove_secret(&self, name: &str) -> Result<()>;
}
