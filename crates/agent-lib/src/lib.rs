//! Core library for the edge device agent
//!
//! This crate provides the device-side machinery driven by operator
//! configuration messages:
//! - Workload reconciliation against the container runtime
//! - Periodic heartbeats with hardware delta encoding
//! - Scrape target registry for workload metrics
//! - Host service unit management
//! - Health checks and observability

pub mod configuration;
pub mod errors;
pub mod hardware;
pub mod health;
pub mod heartbeat;
pub mod metrics;
pub mod models;
pub mod observability;
pub mod service;
pub mod workload;

pub use configuration::ConfigurationManager;
pub use errors::CompositeError;
pub use health::{HealthRegistry, SubsystemHealth, SubsystemStatus};
pub use heartbeat::{Dispatcher, Heartbeat, HeartbeatData};
pub use metrics::{TargetRegistry, WorkloadMetrics};
pub use observability::AgentMetrics;
pub use workload::WorkloadManager;
