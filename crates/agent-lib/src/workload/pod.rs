//! Pod manifest model and workload conversion
//!
//! The operator ships each workload's pod spec as opaque YAML. The agent
//! parses it just far enough to inject its own pieces (export volume,
//! `DEVICE_ID` env, autoupdate labels); everything it does not understand is
//! kept in flattened maps and re-serialized untouched.

use crate::models::Workload;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Host path volume type requiring the device to be mounted first
pub const HOST_PATH_BLOCK_DEVICE: &str = "BlockDevice";

/// Mount point every container gets for its export volume
pub const EXPORT_MOUNT_PATH: &str = "/export";

const AUTOUPDATE_LABEL_PREFIX: &str = "io.containers.autoupdate";
const AUTHFILE_LABEL: &str = "io.containers.autoupdate.authfile";
const SYSTEMD_UNIT_LABEL: &str = "PODMAN_SYSTEMD_UNIT";

/// Pod manifest in Kubernetes shape
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    pub kind: String,
    pub metadata: Metadata,
    pub spec: PodSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(
        default,
        rename = "volumeMounts",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub name: String,
    #[serde(rename = "mountPath")]
    pub mount_path: String,
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(
        default,
        rename = "hostPath",
        skip_serializing_if = "Option::is_none"
    )]
    pub host_path: Option<HostPathVolumeSource>,
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostPathVolumeSource {
    pub path: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,
}

/// Name of the export volume injected into every pod
pub fn export_volume_name(workload_name: &str) -> String {
    format!("export-{workload_name}")
}

fn export_volume(volumes_dir: &Path, workload_name: &str) -> Volume {
    Volume {
        name: export_volume_name(workload_name),
        host_path: Some(HostPathVolumeSource {
            path: volumes_dir
                .join(workload_name)
                .to_string_lossy()
                .into_owned(),
            volume_type: Some("DirectoryOrCreate".to_string()),
        }),
        other: BTreeMap::new(),
    }
}

impl Pod {
    /// Build the pod the runtime will actually run for `workload`.
    ///
    /// `authfile_path` is where the authfile will land on disk, or empty
    /// when the workload carries no credentials.
    pub fn from_workload(
        workload: &Workload,
        volumes_dir: &Path,
        device_id: &str,
        authfile_path: &str,
    ) -> Result<Pod> {
        let spec: PodSpec = serde_yaml::from_str(&workload.specification)
            .with_context(|| format!("cannot parse pod spec of workload '{}'", workload.name))?;

        let mut pod = Pod {
            kind: "Pod".to_string(),
            metadata: Metadata {
                name: workload.name.clone(),
                labels: workload
                    .labels
                    .iter()
                    .flatten()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                annotations: workload
                    .annotations
                    .iter()
                    .flatten()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            },
            spec,
        };

        let export = export_volume(volumes_dir, &workload.name);
        for container in &mut pod.spec.containers {
            container.volume_mounts.insert(
                0,
                VolumeMount {
                    name: export.name.clone(),
                    mount_path: EXPORT_MOUNT_PATH.to_string(),
                    other: BTreeMap::new(),
                },
            );
            container.env.push(EnvVar {
                name: "DEVICE_ID".to_string(),
                value: device_id.to_string(),
                other: BTreeMap::new(),
            });
        }
        pod.spec.volumes.push(export);

        if !authfile_path.is_empty() {
            pod.metadata
                .labels
                .insert(AUTHFILE_LABEL.to_string(), authfile_path.to_string());
        }
        // Pods started via play-kube have no CreateCommand, so the unit
        // label auto-update relies on must be set here.
        let autoupdate = pod
            .metadata
            .labels
            .keys()
            .any(|key| key.contains(AUTOUPDATE_LABEL_PREFIX));
        if autoupdate {
            pod.metadata.labels.insert(
                SYSTEMD_UNIT_LABEL.to_string(),
                crate::service::unit_name(&workload.name),
            );
        }

        Ok(pod)
    }

    /// Serialize the pod and append configmap documents, `---` separated
    pub fn manifest_bytes(&self, configmaps: &[String]) -> Result<Vec<u8>> {
        let mut manifest = serde_yaml::to_string(self).context("cannot serialize pod manifest")?;
        for configmap in configmaps {
            if !manifest.ends_with('\n') {
                manifest.push('\n');
            }
            manifest.push_str("---\n");
            manifest.push_str(configmap);
        }
        Ok(manifest.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    const POD_SPEC: &str = "containers:\n  - name: alpine\n    image: quay.io/libpod/alpine:latest";

    fn workload(name: &str) -> Workload {
        Workload {
            name: name.to_string(),
            specification: POD_SPEC.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_from_workload_injects_export_volume_and_device_id() {
        let pod = Pod::from_workload(
            &workload("test"),
            &PathBuf::from("/data/volumes"),
            "device-id-123",
            "",
        )
        .unwrap();

        assert_eq!(pod.kind, "Pod");
        assert_eq!(pod.metadata.name, "test");
        assert_eq!(pod.spec.volumes.len(), 1);
        let volume = &pod.spec.volumes[0];
        assert_eq!(volume.name, "export-test");
        assert_eq!(
            volume.host_path.as_ref().unwrap().path,
            "/data/volumes/test"
        );

        let container = &pod.spec.containers[0];
        assert_eq!(container.volume_mounts[0].name, "export-test");
        assert_eq!(container.volume_mounts[0].mount_path, "/export");
        assert_eq!(container.env.last().unwrap().name, "DEVICE_ID");
        assert_eq!(container.env.last().unwrap().value, "device-id-123");
        // image must survive the round trip untouched
        assert_eq!(
            container.other.get("image").unwrap().as_str().unwrap(),
            "quay.io/libpod/alpine:latest"
        );
    }

    #[test]
    fn test_authfile_label_only_for_non_empty_authfile() {
        let without = Pod::from_workload(
            &workload("test"),
            &PathBuf::from("/data/volumes"),
            "dev",
            "",
        )
        .unwrap();
        assert!(!without.metadata.labels.contains_key(AUTHFILE_LABEL));
        assert!(!without.metadata.labels.contains_key(SYSTEMD_UNIT_LABEL));

        let with = Pod::from_workload(
            &workload("test"),
            &PathBuf::from("/data/volumes"),
            "dev",
            "/data/workloads/test/auth.json",
        )
        .unwrap();
        assert_eq!(
            with.metadata.labels.get(AUTHFILE_LABEL).unwrap(),
            "/data/workloads/test/auth.json"
        );
        assert_eq!(
            with.metadata.labels.get(SYSTEMD_UNIT_LABEL).unwrap(),
            "test.service"
        );
    }

    #[test]
    fn test_autoupdate_label_triggers_systemd_unit_label() {
        let mut spec = workload("test");
        let mut labels = HashMap::new();
        labels.insert(
            "io.containers.autoupdate".to_string(),
            "registry".to_string(),
        );
        spec.labels = Some(labels);

        let pod =
            Pod::from_workload(&spec, &PathBuf::from("/data/volumes"), "dev", "").unwrap();
        assert_eq!(
            pod.metadata.labels.get(SYSTEMD_UNIT_LABEL).unwrap(),
            "test.service"
        );
    }

    #[test]
    fn test_labels_and_annotations_copied() {
        let mut spec = workload("test");
        spec.labels = Some(HashMap::from([("labelKey".to_string(), "labelValue".to_string())]));
        spec.annotations = Some(HashMap::from([(
            "annotationKey".to_string(),
            "annotationValue".to_string(),
        )]));

        let pod =
            Pod::from_workload(&spec, &PathBuf::from("/data/volumes"), "dev", "").unwrap();
        assert_eq!(pod.metadata.labels.get("labelKey").unwrap(), "labelValue");
        assert_eq!(
            pod.metadata.annotations.get("annotationKey").unwrap(),
            "annotationValue"
        );
    }

    #[test]
    fn test_invalid_spec_is_rejected() {
        let mut spec = workload("test");
        spec.specification = "containers: {not: [valid".to_string();
        let err = Pod::from_workload(&spec, &PathBuf::from("/v"), "dev", "").unwrap_err();
        assert!(err.to_string().contains("cannot parse pod spec"));
    }

    #[test]
    fn test_manifest_appends_configmaps_with_separator() {
        let pod = Pod::from_workload(
            &workload("test"),
            &PathBuf::from("/data/volumes"),
            "dev",
            "",
        )
        .unwrap();
        let cm = "kind: ConfigMap\nmetadata:\n  name: mycm\ndata:\n  key1: data\n".to_string();
        let manifest = String::from_utf8(pod.manifest_bytes(&[cm.clone()]).unwrap()).unwrap();

        assert!(manifest.contains("---\n"));
        assert!(manifest.contains(&cm));
        // pod document must round-trip from the combined manifest
        let first_doc = manifest.split("---\n").next().unwrap();
        let parsed: Pod = serde_yaml::from_str(first_doc).unwrap();
        assert_eq!(parsed.metadata.name, "test");
    }

    #[test]
    fn test_manifest_without_configmaps_is_single_document() {
        let pod = Pod::from_workload(
            &workload("test"),
            &PathBuf::from("/data/volumes"),
            "dev",
            "",
        )
        .unwrap();
        let manifest = String::from_utf8(pod.manifest_bytes(&[]).unwrap()).unwrap();
        assert!(!manifest.contains("---"));
        let parsed: Pod = serde_yaml::from_str(&manifest).unwrap();
        assert_eq!(parsed, pod);
    }
}
