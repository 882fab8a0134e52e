//! Scrape target registry
//!
//! Keeps one scrape target per workload: the URL set derived from runtime
//! container addresses, the scrape interval, and the workload's sample
//! filter. Targets come and go with workload lifecycle callbacks.

mod filter;

pub use filter::{PermissiveFilter, RestrictiveFilter, Sample, SampleFilter};

use crate::models::{DeviceConfigurationMessage, Workload, WorkloadMetricsConfiguration};
use crate::observability::AgentMetrics;
use crate::workload::runtime::{PodReport, WorkloadObserver};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info};

/// Scrape interval applied when the configuration leaves it unset or <= 0
pub const DEFAULT_INTERVAL_SECONDS: i64 = 60;

/// One periodic HTTP collection endpoint set, keyed by workload name
#[derive(Clone)]
pub struct ScrapeTarget {
    pub urls: Vec<String>,
    pub interval: Duration,
    pub filter: Arc<dyn SampleFilter>,
}

/// Registry of scrape targets consumed by the scraping engine
#[derive(Default)]
pub struct TargetRegistry {
    targets: RwLock<HashMap<String, ScrapeTarget>>,
    metrics: AgentMetrics,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a target for `workload_name`, replacing any prior one
    pub fn add_target(
        &self,
        workload_name: &str,
        urls: Vec<String>,
        interval: Duration,
        filter: Arc<dyn SampleFilter>,
    ) {
        info!(
            workload = %workload_name,
            interval_secs = interval.as_secs(),
            urls = urls.len(),
            "Adding scrape target"
        );
        let mut targets = self.targets.write().unwrap();
        targets.insert(
            workload_name.to_string(),
            ScrapeTarget {
                urls,
                interval,
                filter,
            },
        );
        self.metrics.set_scrape_targets(targets.len() as i64);
    }

    pub fn delete_target(&self, workload_name: &str) {
        let mut targets = self.targets.write().unwrap();
        if targets.remove(workload_name).is_some() {
            info!(workload = %workload_name, "Deleted scrape target");
        }
        self.metrics.set_scrape_targets(targets.len() as i64);
    }

    pub fn get(&self, workload_name: &str) -> Option<ScrapeTarget> {
        self.targets.read().unwrap().get(workload_name).cloned()
    }

    pub fn len(&self) -> usize {
        self.targets.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.read().unwrap().is_empty()
    }
}

/// Bridges workload lifecycle to the target registry.
///
/// Holds the metrics section of the last configuration per workload; when
/// the runtime reports a workload started, the URLs are derived from the
/// containers' addresses and a target is installed.
pub struct WorkloadMetrics {
    registry: Arc<TargetRegistry>,
    workload_config: RwLock<HashMap<String, Workload>>,
}

impl WorkloadMetrics {
    pub fn new(registry: Arc<TargetRegistry>) -> Self {
        Self {
            registry,
            workload_config: RwLock::new(HashMap::new()),
        }
    }

    pub fn init(&self, configuration: &DeviceConfigurationMessage) {
        self.update(configuration)
    }

    /// Remember which workloads declare metrics blocks
    pub fn update(&self, configuration: &DeviceConfigurationMessage) {
        let config: HashMap<String, Workload> = configuration
            .workloads
            .iter()
            .map(|workload| (workload.name.clone(), workload.clone()))
            .collect();
        *self.workload_config.write().unwrap() = config;
    }

    fn workload(&self, workload_name: &str) -> Option<Workload> {
        self.workload_config
            .read()
            .unwrap()
            .get(workload_name)
            .cloned()
    }
}

impl WorkloadObserver for WorkloadMetrics {
    fn workload_started(&self, workload_name: &str, reports: &[PodReport]) {
        let Some(config) = self.workload(workload_name) else {
            debug!(workload = %workload_name, "Workload started but it is not part of the configuration");
            return;
        };
        let Some(metrics) = config.metrics.as_ref() else {
            return;
        };

        let urls: Vec<String> = reports
            .iter()
            .flat_map(|report| scrape_urls(report, metrics))
            .collect();

        let interval = if metrics.interval > 0 {
            metrics.interval
        } else {
            DEFAULT_INTERVAL_SECONDS
        };

        let filter: Arc<dyn SampleFilter> = match &metrics.allow_list {
            Some(allow_list) => Arc::new(RestrictiveFilter::new(allow_list.rules.clone())),
            None => Arc::new(PermissiveFilter),
        };

        self.registry.add_target(
            workload_name,
            urls,
            Duration::from_secs(interval as u64),
            filter,
        );
    }

    fn workload_removed(&self, workload_name: &str) {
        info!(workload = %workload_name, "Removing metrics target for workload");
        self.registry.delete_target(workload_name);
    }
}

fn scrape_urls(report: &PodReport, metrics: &WorkloadMetricsConfiguration) -> Vec<String> {
    let mut urls = Vec::new();
    for container in &report.containers {
        let (port, path) = match metrics.containers.get(&container.name) {
            Some(custom) => {
                if custom.disabled {
                    continue;
                }
                (custom.port, custom.path.as_str())
            }
            None => (metrics.port, metrics.path.as_str()),
        };
        urls.push(format!(
            "http://{}:{}{}",
            container.ip_address,
            port,
            path_or_default(path)
        ));
    }
    urls
}

fn path_or_default(path: &str) -> &str {
    if path.is_empty() {
        "/"
    } else {
        path
    }
}
