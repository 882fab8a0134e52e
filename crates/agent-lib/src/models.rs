//! Wire models exchanged with the operator
//!
//! Field names follow the operator API (snake_case JSON). The pod manifest
//! itself lives in [`crate::workload::pod`] and uses Kubernetes casing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Full configuration message pushed by the operator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfigurationMessage {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub configuration: DeviceConfiguration,
    #[serde(default)]
    pub workloads: Vec<Workload>,
    #[serde(default)]
    pub secrets: Vec<Secret>,
}

/// Device-level configuration (heartbeat cadence, host mounts)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<HeartbeatConfiguration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<Mount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfiguration {
    pub period_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_profile: Option<HardwareProfileConfiguration>,
}

/// Controls what hardware information heartbeats carry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HardwareProfileConfiguration {
    #[serde(default)]
    pub include: bool,
    #[serde(default)]
    pub scope: HardwareProfileScope,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareProfileScope {
    Full,
    #[default]
    Delta,
}

/// A block device the host is expected to mount before dependent pods run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mount {
    pub device: String,
    pub directory: String,
}

/// Operator-visible unit of work: one pod plus its delivery metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workload {
    pub name: String,
    /// Serialized pod spec body (YAML)
    pub specification: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_registries: Option<ImageRegistries>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configmaps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<WorkloadMetricsConfiguration>,
    /// Opaque data-configuration block, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Image registry credentials delivered alongside a workload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageRegistries {
    /// Opaque authfile blob; empty means no credentials
    #[serde(default)]
    pub auth_file: String,
}

/// Per-workload metrics scraping configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkloadMetricsConfiguration {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub port: u16,
    /// Seconds between scrapes; unset or <= 0 falls back to the default
    #[serde(default)]
    pub interval: i64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub containers: HashMap<String, ContainerMetricsConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_list: Option<MetricsAllowList>,
}

/// Per-container override of the workload metrics configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerMetricsConfiguration {
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub path: String,
}

/// Allow-list restricting which samples a scrape forwards
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsAllowList {
    #[serde(default)]
    pub rules: Vec<AllowRule>,
}

/// One allow-list entry: sample name plus optional label equality predicates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AllowRule {
    pub name: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

/// A secret the runtime should hold for workloads
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Secret {
    pub name: String,
    #[serde(default)]
    pub data: String,
}

/// Severity of an event surfaced through the heartbeat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    #[default]
    Info,
    Warn,
}

/// Short structured record explaining a local failure to the operator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventInfo {
    pub message: String,
    pub reason: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
}

impl EventInfo {
    /// Reason tag attached to workload run failures
    pub const REASON_FAILED: &'static str = "Failed";
}

/// Live workload record as reported by the container runtime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadInfo {
    pub id: String,
    pub name: String,
    pub status: String,
}

/// Snapshot shipped upstream on every heartbeat tick
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Heartbeat {
    pub status: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workloads: Vec<WorkloadInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EventInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware: Option<HardwareInfo>,
}

impl Heartbeat {
    /// Status reported while the agent is able to compose heartbeats
    pub const STATUS_UP: &'static str = "up";
}

/// Hardware snapshot: immutable part (cpu, vendor) plus mutable part
/// (hostname, interfaces)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HardwareInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interfaces: Option<Vec<Interface>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<Cpu>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_vendor: Option<SystemVendor>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cpu {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub architecture: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemVendor {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub manufacturer: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub product_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub serial_number: String,
}

/// One network interface with its address lists
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ipv4_addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ipv6_addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mac_address: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_message_roundtrip() {
        let json = r#"{
            "device_id": "device-id-123",
            "version": "7",
            "configuration": {
                "heartbeat": {
                    "period_seconds": 30,
                    "hardware_profile": {"include": true, "scope": "delta"}
                },
                "mounts": [{"device": "/dev/loop0", "directory": "/mnt/data"}]
            },
            "workloads": [{
                "name": "nginx",
                "specification": "containers:\n  - name: nginx\n    image: nginx:latest",
                "metrics": {"path": "/metrics", "port": 9100, "interval": 15}
            }],
            "secrets": [{"name": "pull-secret", "data": "c2VjcmV0"}]
        }"#;

        let msg: DeviceConfigurationMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.device_id, "device-id-123");
        let hb = msg.configuration.heartbeat.as_ref().unwrap();
        assert_eq!(hb.period_seconds, 30);
        assert_eq!(
            hb.hardware_profile.as_ref().unwrap().scope,
            HardwareProfileScope::Delta
        );
        assert_eq!(msg.workloads.len(), 1);
        assert_eq!(msg.workloads[0].metrics.as_ref().unwrap().port, 9100);
        assert_eq!(msg.secrets[0].name, "pull-secret");

        let back = serde_json::to_string(&msg).unwrap();
        let again: DeviceConfigurationMessage = serde_json::from_str(&back).unwrap();
        assert_eq!(again.workloads[0].name, "nginx");
    }

    #[test]
    fn test_heartbeat_omits_empty_sections() {
        let hb = Heartbeat {
            status: Heartbeat::STATUS_UP.to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&hb).unwrap();
        assert_eq!(json, serde_json::json!({"status": "up"}));
    }

    #[test]
    fn test_event_type_serializes_lowercase() {
        let event = EventInfo {
            message: "boom".to_string(),
            reason: EventInfo::REASON_FAILED.to_string(),
            event_type: EventType::Warn,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "warn");
        assert_eq!(json["reason"], "Failed");
    }
}
