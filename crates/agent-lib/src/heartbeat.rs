//! Periodic heartbeat reporting
//!
//! On every tick the engine composes a snapshot (status, live workloads,
//! drained events, hardware per policy) and ships it through the transport.
//! Transport failures are logged and tolerated; the ticker keeps firing.
//! The period is live-reconfigurable: a changed `period_seconds` replaces
//! the underlying ticker, last writer wins.

use crate::configuration::{ConfigurationManager, DEFAULT_PERIOD_SECONDS};
use crate::hardware::{mutable_delta, HardwareProbe};
use crate::models::{
    DeviceConfigurationMessage, HardwareInfo, HardwareProfileScope, Heartbeat as HeartbeatMessage,
};
use crate::observability::AgentMetrics;
use crate::workload::WorkloadManager;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, trace, warn};

/// Transport response; an empty payload suggests the host is unreachable
#[derive(Debug, Clone, Default)]
pub struct DispatchResponse {
    pub payload: Vec<u8>,
}

/// Upstream transport shipping heartbeat payloads to the operator
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send(&self, content: Vec<u8>) -> Result<DispatchResponse>;
}

/// Composes heartbeat snapshots from the other subsystems
pub struct HeartbeatData {
    configuration: Arc<ConfigurationManager>,
    workloads: Arc<WorkloadManager>,
    hardware: Arc<dyn HardwareProbe>,
    previous_mutable: tokio::sync::Mutex<Option<HardwareInfo>>,
}

impl HeartbeatData {
    pub fn new(
        configuration: Arc<ConfigurationManager>,
        workloads: Arc<WorkloadManager>,
        hardware: Arc<dyn HardwareProbe>,
    ) -> Self {
        Self {
            configuration,
            workloads,
            hardware,
            previous_mutable: tokio::sync::Mutex::new(None),
        }
    }

    /// Build the next heartbeat. Never fails: a workload listing error
    /// yields an empty list, a probe error drops the hardware section.
    pub async fn retrieve_info(&self) -> HeartbeatMessage {
        let workloads = match self.workloads.list().await {
            Ok(workloads) => workloads,
            Err(err) => {
                error!(error = %err, "Cannot retrieve workload list for heartbeat");
                Vec::new()
            }
        };
        let events = self.workloads.pop_events().await;

        HeartbeatMessage {
            status: HeartbeatMessage::STATUS_UP.to_string(),
            workloads,
            events,
            hardware: self.hardware_info().await,
        }
    }

    async fn hardware_info(&self) -> Option<HardwareInfo> {
        let profile = self.configuration.hardware_profile();
        if !profile.include {
            return None;
        }

        match profile.scope {
            HardwareProfileScope::Full => match self.hardware.hardware_information().await {
                Ok(info) => Some(info),
                Err(err) => {
                    warn!(error = %err, "Cannot read hardware information");
                    None
                }
            },
            HardwareProfileScope::Delta => {
                let current = match self.hardware.mutable_hardware_information().await {
                    Ok(current) => current,
                    Err(err) => {
                        warn!(error = %err, "Cannot read mutable hardware information");
                        return None;
                    }
                };
                let mut previous = self.previous_mutable.lock().await;
                let info = match previous.as_ref() {
                    // first snapshot after start is always full
                    None => match self.hardware.hardware_information().await {
                        Ok(full) => Some(full),
                        Err(err) => {
                            warn!(error = %err, "Cannot read hardware information");
                            None
                        }
                    },
                    Some(previous) => Some(mutable_delta(previous, &current)),
                };
                *previous = Some(current);
                info
            }
        }
    }
}

enum TickerState {
    Idle,
    Running {
        period: Duration,
        handle: JoinHandle<()>,
    },
    Stopped,
}

/// Periodic heartbeat engine
pub struct Heartbeat {
    dispatcher: Arc<dyn Dispatcher>,
    data: Arc<HeartbeatData>,
    configuration: Arc<ConfigurationManager>,
    ticker: RwLock<TickerState>,
}

impl Heartbeat {
    pub fn new(
        dispatcher: Arc<dyn Dispatcher>,
        configuration: Arc<ConfigurationManager>,
        data: Arc<HeartbeatData>,
    ) -> Self {
        Self {
            dispatcher,
            data,
            configuration,
            ticker: RwLock::new(TickerState::Idle),
        }
    }

    /// Install the ticker at the currently configured period. A second call
    /// while running is a no-op.
    pub fn start(&self) {
        let mut state = self.ticker.write().unwrap();
        if let TickerState::Idle = *state {
            let period =
                Duration::from_secs(self.configuration.heartbeat_configuration().period_seconds);
            info!(period_secs = period.as_secs(), "Starting heartbeat ticker");
            *state = TickerState::Running {
                period,
                handle: self.spawn_ticker(period),
            };
        }
    }

    pub fn has_started(&self) -> bool {
        matches!(*self.ticker.read().unwrap(), TickerState::Running { .. })
    }

    /// Apply a new configuration. A changed period replaces the ticker (the
    /// replaced one never fires again); an equal period leaves it alone.
    /// Starts the ticker when none is running yet.
    pub fn update(&self, configuration: &DeviceConfigurationMessage) -> Result<()> {
        let new_period = Duration::from_secs(period_seconds(configuration));
        let mut state = self.ticker.write().unwrap();
        match std::mem::replace(&mut *state, TickerState::Stopped) {
            TickerState::Stopped => {}
            TickerState::Idle => {
                info!(period_secs = new_period.as_secs(), "Starting heartbeat ticker");
                *state = TickerState::Running {
                    period: new_period,
                    handle: self.spawn_ticker(new_period),
                };
            }
            TickerState::Running { period, handle } => {
                if period != new_period {
                    info!(
                        "Heartbeat configuration update: periodSeconds changed from {} to {}",
                        period.as_secs(),
                        new_period.as_secs()
                    );
                    handle.abort();
                    *state = TickerState::Running {
                        period: new_period,
                        handle: self.spawn_ticker(new_period),
                    };
                } else {
                    *state = TickerState::Running { period, handle };
                }
            }
        }
        Ok(())
    }

    /// Stop the ticker for good; no further ticks fire
    pub fn deregister(&self) -> Result<()> {
        let mut state = self.ticker.write().unwrap();
        if let TickerState::Running { handle, .. } = &*state {
            handle.abort();
        }
        *state = TickerState::Stopped;
        Ok(())
    }

    fn spawn_ticker(&self, period: Duration) -> JoinHandle<()> {
        let data = self.data.clone();
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            let metrics = AgentMetrics::new();
            loop {
                ticker.tick().await;
                send_heartbeat(&data, &dispatcher, &metrics).await;
            }
        })
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        if let Ok(state) = self.ticker.read() {
            if let TickerState::Running { handle, .. } = &*state {
                handle.abort();
            }
        }
    }
}

fn period_seconds(configuration: &DeviceConfigurationMessage) -> u64 {
    match &configuration.configuration.heartbeat {
        Some(heartbeat) if heartbeat.period_seconds > 0 => heartbeat.period_seconds,
        _ => DEFAULT_PERIOD_SECONDS,
    }
}

async fn send_heartbeat(
    data: &HeartbeatData,
    dispatcher: &Arc<dyn Dispatcher>,
    metrics: &AgentMetrics,
) {
    let heartbeat = data.retrieve_info().await;
    let content = match serde_json::to_vec(&heartbeat) {
        Ok(content) => content,
        Err(err) => {
            error!(error = %err, "Cannot marshal heartbeat");
            return;
        }
    };

    match dispatcher.send(content).await {
        Ok(response) => {
            metrics.inc_heartbeats_sent();
            if response.payload.is_empty() {
                trace!("empty response received, host may not be reachable");
            }
        }
        Err(err) => {
            metrics.inc_heartbeat_errors();
            error!(error = %err, "Cannot send heartbeat");
        }
    }
}
