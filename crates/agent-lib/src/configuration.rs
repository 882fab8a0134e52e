//! In-memory device configuration shared across subsystems
//!
//! The manager holds the operator's latest configuration message and hands
//! out defaulted views of the heartbeat section. It is the only place the
//! rest of the agent reads configuration from.

use crate::models::{
    DeviceConfiguration, DeviceConfigurationMessage, HardwareProfileConfiguration,
    HeartbeatConfiguration,
};
use std::sync::RwLock;

/// Heartbeat period applied until the operator says otherwise
pub const DEFAULT_PERIOD_SECONDS: u64 = 60;

/// Thread-safe holder of the current device configuration
#[derive(Debug, Default)]
pub struct ConfigurationManager {
    current: RwLock<DeviceConfigurationMessage>,
}

impl ConfigurationManager {
    pub fn new(initial: DeviceConfigurationMessage) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    /// Replace the stored configuration with a newer message
    pub fn update(&self, configuration: DeviceConfigurationMessage) {
        *self.current.write().unwrap() = configuration;
    }

    pub fn device_id(&self) -> String {
        self.current.read().unwrap().device_id.clone()
    }

    pub fn device_configuration(&self) -> DeviceConfiguration {
        self.current.read().unwrap().configuration.clone()
    }

    /// Heartbeat section with defaults applied for absent fields
    pub fn heartbeat_configuration(&self) -> HeartbeatConfiguration {
        let current = self.current.read().unwrap();
        match &current.configuration.heartbeat {
            Some(heartbeat) => {
                let mut heartbeat = heartbeat.clone();
                if heartbeat.period_seconds == 0 {
                    heartbeat.period_seconds = DEFAULT_PERIOD_SECONDS;
                }
                heartbeat
            }
            None => HeartbeatConfiguration {
                period_seconds: DEFAULT_PERIOD_SECONDS,
                hardware_profile: None,
            },
        }
    }

    /// Hardware profile section; excluded from heartbeats when absent
    pub fn hardware_profile(&self) -> HardwareProfileConfiguration {
        self.heartbeat_configuration()
            .hardware_profile
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HardwareProfileScope;

    #[test]
    fn test_defaults_when_heartbeat_absent() {
        let manager = ConfigurationManager::default();
        let heartbeat = manager.heartbeat_configuration();
        assert_eq!(heartbeat.period_seconds, DEFAULT_PERIOD_SECONDS);
        assert!(!manager.hardware_profile().include);
    }

    #[test]
    fn test_update_replaces_configuration() {
        let manager = ConfigurationManager::default();
        let mut message = DeviceConfigurationMessage {
            device_id: "device-id-123".to_string(),
            ..Default::default()
        };
        message.configuration.heartbeat = Some(HeartbeatConfiguration {
            period_seconds: 5,
            hardware_profile: Some(HardwareProfileConfiguration {
                include: true,
                scope: HardwareProfileScope::Full,
            }),
        });

        manager.update(message);
        assert_eq!(manager.device_id(), "device-id-123");
        assert_eq!(manager.heartbeat_configuration().period_seconds, 5);
        assert_eq!(manager.hardware_profile().scope, HardwareProfileScope::Full);
    }

    #[test]
    fn test_zero_period_falls_back_to_default() {
        let manager = ConfigurationManager::default();
        let mut message = DeviceConfigurationMessage::default();
        message.configuration.heartbeat = Some(HeartbeatConfiguration {
            period_seconds: 0,
            hardware_profile: None,
        });
        manager.update(message);
        assert_eq!(
            manager.heartbeat_configuration().period_seconds,
            DEFAULT_PERIOD_SECONDS
        );
    }
}
