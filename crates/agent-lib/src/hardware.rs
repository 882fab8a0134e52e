//! Host hardware snapshots and delta encoding
//!
//! CPU and system vendor never change while the agent runs; hostname and
//! interfaces do. The heartbeat only re-sends the mutable part when it
//! actually changed, computed here by [`mutable_delta`].

use crate::models::{Cpu, HardwareInfo, Interface, SystemVendor};
use anyhow::Result;
use async_trait::async_trait;
use std::net::IpAddr;
use sysinfo::{Networks, System};

/// Source of hardware snapshots; mocked in tests
#[async_trait]
pub trait HardwareProbe: Send + Sync {
    /// Full snapshot: immutable and mutable fields
    async fn hardware_information(&self) -> Result<HardwareInfo>;

    /// Mutable subset only: hostname and interfaces
    async fn mutable_hardware_information(&self) -> Result<HardwareInfo>;
}

/// Keep only the mutable fields whose value differs from the previous
/// snapshot. Fields are independent: an unchanged hostname is emitted empty
/// even when interfaces changed, and vice versa. Immutable fields are never
/// part of a delta.
pub fn mutable_delta(previous: &HardwareInfo, current: &HardwareInfo) -> HardwareInfo {
    let mut delta = HardwareInfo::default();
    if current.hostname != previous.hostname {
        delta.hostname = current.hostname.clone();
    }
    if current.interfaces != previous.interfaces {
        delta.interfaces = current.interfaces.clone();
    }
    delta
}

/// Probe backed by `sysinfo` plus the DMI sysfs entries
#[derive(Debug, Default)]
pub struct SystemProbe;

impl SystemProbe {
    pub fn new() -> Self {
        Self
    }

    fn interfaces() -> Vec<Interface> {
        let networks = Networks::new_with_refreshed_list();
        let mut interfaces: Vec<Interface> = networks
            .iter()
            .map(|(name, data)| {
                let mut ipv4_addresses = Vec::new();
                let mut ipv6_addresses = Vec::new();
                for network in data.ip_networks() {
                    match network.addr {
                        IpAddr::V4(addr) => ipv4_addresses.push(addr.to_string()),
                        IpAddr::V6(addr) => ipv6_addresses.push(addr.to_string()),
                    }
                }
                Interface {
                    name: name.clone(),
                    ipv4_addresses,
                    ipv6_addresses,
                    mac_address: data.mac_address().to_string(),
                }
            })
            .collect();
        // Stable order so snapshot equality is meaningful
        interfaces.sort_by(|a, b| a.name.cmp(&b.name));
        interfaces
    }

    fn dmi_entry(name: &str) -> String {
        std::fs::read_to_string(format!("/sys/class/dmi/id/{name}"))
            .map(|value| value.trim().to_string())
            .unwrap_or_default()
    }

    fn cpu() -> Cpu {
        let mut system = System::new();
        system.refresh_cpu_all();
        let model_name = system
            .cpus()
            .first()
            .map(|cpu| cpu.brand().to_string())
            .unwrap_or_default();
        Cpu {
            architecture: std::env::consts::ARCH.to_string(),
            model_name,
            flags: Vec::new(),
        }
    }
}

#[async_trait]
impl HardwareProbe for SystemProbe {
    async fn hardware_information(&self) -> Result<HardwareInfo> {
        let mut info = self.mutable_hardware_information().await?;
        info.cpu = Some(Self::cpu());
        info.system_vendor = Some(SystemVendor {
            manufacturer: Self::dmi_entry("sys_vendor"),
            product_name: Self::dmi_entry("product_name"),
            serial_number: Self::dmi_entry("product_serial"),
        });
        Ok(info)
    }

    async fn mutable_hardware_information(&self) -> Result<HardwareInfo> {
        Ok(HardwareInfo {
            hostname: System::host_name().unwrap_or_default(),
            interfaces: Some(Self::interfaces()),
            cpu: None,
            system_vendor: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(hostname: &str, ipv4: &[&str], ipv6: &[&str]) -> HardwareInfo {
        HardwareInfo {
            hostname: hostname.to_string(),
            interfaces: Some(vec![Interface {
                ipv4_addresses: ipv4.iter().map(|s| s.to_string()).collect(),
                ipv6_addresses: ipv6.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }

    #[test]
    fn test_delta_of_equal_snapshots_is_empty() {
        let previous = snapshot("localhost", &["127.0.0.1", "0.0.0.0"], &[]);
        let current = previous.clone();
        let delta = mutable_delta(&previous, &current);
        assert!(delta.hostname.is_empty());
        assert!(delta.interfaces.is_none());
        assert!(delta.cpu.is_none());
        assert!(delta.system_vendor.is_none());
    }

    #[test]
    fn test_delta_hostname_change_only() {
        let previous = snapshot("localhost", &["127.0.0.1"], &[]);
        let current = snapshot("localhost-new", &["127.0.0.1"], &[]);
        let delta = mutable_delta(&previous, &current);
        assert_eq!(delta.hostname, "localhost-new");
        assert!(delta.interfaces.is_none());
    }

    #[test]
    fn test_delta_interface_change_only() {
        let previous = snapshot("localhost", &["127.0.0.1"], &[]);
        let current = snapshot("localhost", &["127.0.0.1"], &["fe80::1"]);
        let delta = mutable_delta(&previous, &current);
        assert!(delta.hostname.is_empty());
        assert_eq!(delta.interfaces, current.interfaces);
    }

    #[test]
    fn test_delta_both_fields_change() {
        let previous = snapshot("localhost", &["127.0.0.1"], &[]);
        let current = snapshot("localhost-final", &["127.0.0.1", "10.0.0.1"], &["fe80::1"]);
        let delta = mutable_delta(&previous, &current);
        assert_eq!(delta.hostname, "localhost-final");
        assert_eq!(delta.interfaces, current.interfaces);
    }
}
