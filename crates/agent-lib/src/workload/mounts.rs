//! Blockdevice mount gating
//!
//! A pod that declares a BlockDevice host-path volume under one of the
//! configured mount directories must not start before the host actually
//! mounted that path. Char devices are used unmounted and never gate.

use crate::models::DeviceConfiguration;
use crate::workload::pod::{Pod, HOST_PATH_BLOCK_DEVICE};
use std::collections::HashSet;
use std::path::Path;

/// True when `pod` needs a configured blockdevice path that is not mounted
pub fn pod_should_wait_for_mount(pod: &Pod, configuration: &DeviceConfiguration) -> bool {
    if configuration.mounts.is_empty() || pod.spec.volumes.is_empty() {
        return false;
    }

    let gated_paths: HashSet<&str> = configuration
        .mounts
        .iter()
        .map(|mount| mount.directory.as_str())
        .collect();

    pod.spec.volumes.iter().any(|volume| {
        let Some(host_path) = volume.host_path.as_ref() else {
            return false;
        };
        let Some(volume_type) = host_path.volume_type.as_deref() else {
            return false;
        };
        volume_type == HOST_PATH_BLOCK_DEVICE
            && gated_paths.contains(host_path.path.as_str())
            && !is_path_mounted(Path::new(&host_path.path))
    })
}

/// Check `/proc/mounts` for a mount point at `path`
pub fn is_path_mounted(path: &Path) -> bool {
    let Ok(mounts) = std::fs::read_to_string("/proc/mounts") else {
        return false;
    };
    let wanted = path.to_string_lossy();
    mounts
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|mount_point| mount_point == wanted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Mount, Workload};
    use std::path::PathBuf;

    const BLOCK_DEVICE_SPEC: &str = r#"
containers:
  - name: alpine
    image: quay.io/libpod/alpine:latest
volumes:
  - name: storage
    hostPath:
      path: /invalidTest
      type: BlockDevice
"#;

    const CHAR_DEVICE_SPEC: &str = r#"
containers:
  - name: alpine
    image: quay.io/libpod/alpine:latest
volumes:
  - name: storage
    hostPath:
      path: /invalidTest
      type: CharDevice
"#;

    fn pod_from(spec: &str) -> Pod {
        let workload = Workload {
            name: "test".to_string(),
            specification: spec.to_string(),
            ..Default::default()
        };
        Pod::from_workload(&workload, &PathBuf::from("/data/volumes"), "dev", "").unwrap()
    }

    fn configuration_with_mount(directory: &str) -> DeviceConfiguration {
        DeviceConfiguration {
            mounts: vec![Mount {
                device: "/tmp/loop".to_string(),
                directory: directory.to_string(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_unmounted_block_device_gates() {
        let pod = pod_from(BLOCK_DEVICE_SPEC);
        assert!(pod_should_wait_for_mount(
            &pod,
            &configuration_with_mount("/invalidTest")
        ));
    }

    #[test]
    fn test_char_device_never_gates() {
        let pod = pod_from(CHAR_DEVICE_SPEC);
        assert!(!pod_should_wait_for_mount(
            &pod,
            &configuration_with_mount("/invalidTest")
        ));
    }

    #[test]
    fn test_no_configured_mounts_never_gates() {
        let pod = pod_from(BLOCK_DEVICE_SPEC);
        assert!(!pod_should_wait_for_mount(
            &pod,
            &DeviceConfiguration::default()
        ));
    }

    #[test]
    fn test_non_matching_directory_does_not_gate() {
        let pod = pod_from(BLOCK_DEVICE_SPEC);
        assert!(!pod_should_wait_for_mount(
            &pod,
            &configuration_with_mount("/somewhere/else")
        ));
    }

    #[test]
    fn test_mounted_path_does_not_gate() {
        // the root filesystem is always present in /proc/mounts
        assert!(is_path_mounted(Path::new("/")));
        let pod = pod_from(&BLOCK_DEVICE_SPEC.replace("/invalidTest", "/"));
        assert!(!pod_should_wait_for_mount(&pod, &configuration_with_mount("/")));
    }
}
