//! CDI spec files.
//!
//! Two kinds of spec are written to the CDI root: one `common` spec carrying
//! node-wide environment, and one spec per prepared claim carrying the union
//! of its devices' container edits. Containers reference both through the
//! qualified names returned by [`CdiWriter::claim_device_ids`].

use std::fs;
use std::path::{Path, PathBuf};

use npudra_core::ContainerEdits;
use npudra_state::PreparedDevice;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DriverError, DriverResult};

pub const CDI_VERSION: &str = "0.3.0";
pub const CDI_CLASS: &str = "npu";
pub const CDI_COMMON_DEVICE: &str = "common";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdiSpec {
    pub cdi_version: String,
    pub kind: String,
    pub devices: Vec<CdiDevice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdiDevice {
    pub name: String,
    pub container_edits: ContainerEdits,
}

/// Writes and removes the CDI specs of this driver.
pub trait CdiWriter: Send + Sync {
    fn create_common_spec(&self) -> DriverResult<()>;

    fn create_claim_spec(&self, claim_uid: &str, devices: &[PreparedDevice]) -> DriverResult<()>;

    /// Remove a claim's spec. A missing spec is not an error.
    fn delete_claim_spec(&self, claim_uid: &str) -> DriverResult<()>;

    /// Qualified CDI device names a container of the claim must reference.
    fn claim_device_ids(&self, claim_uid: &str) -> Vec<String>;
}

/// File-backed CDI writer.
pub struct CdiHandler {
    root: PathBuf,
    vendor: String,
    driver_name: String,
    node_name: String,
}

impl CdiHandler {
    pub fn new(root: impl Into<PathBuf>, driver_name: &str, node_name: &str) -> DriverResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| DriverError::Upstream(format!("unable to create CDI root {}: {e}", root.display())))?;
        Ok(Self {
            root,
            vendor: format!("k8s.{driver_name}"),
            driver_name: driver_name.to_string(),
            node_name: node_name.to_string(),
        })
    }

    fn kind(&self) -> String {
        format!("{}/{CDI_CLASS}", self.vendor)
    }

    fn qualified_name(&self, device: &str) -> String {
        format!("{}={device}", self.kind())
    }

    /// Path of the spec file holding device `name`.
    pub fn spec_path(&self, name: &str) -> PathBuf {
        self.root
            .join(format!("{}-{CDI_CLASS}_{name}.json", self.vendor))
    }

    /// Read back a spec written by this handler.
    pub fn read_spec(&self, name: &str) -> DriverResult<CdiSpec> {
        let path = self.spec_path(name);
        let bytes = fs::read(&path)
            .map_err(|e| DriverError::Upstream(format!("reading CDI spec {}: {e}", path.display())))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn write_spec(&self, name: &str, edits: ContainerEdits) -> DriverResult<()> {
        let spec = CdiSpec {
            cdi_version: CDI_VERSION.to_string(),
            kind: self.kind(),
            devices: vec![CdiDevice {
                name: name.to_string(),
                container_edits: edits,
            }],
        };
        let path = self.spec_path(name);
        write_atomic(&path, &serde_json::to_vec_pretty(&spec)?)
            .map_err(|e| DriverError::Upstream(format!("writing CDI spec {}: {e}", path.display())))?;
        debug!(path = %path.display(), "CDI spec written");
        Ok(())
    }
}

/// Write through a temporary file in the same directory, then rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

impl CdiWriter for CdiHandler {
    fn create_common_spec(&self) -> DriverResult<()> {
        let edits = ContainerEdits::with_env(vec![
            format!("KUBERNETES_NODE_NAME={}", self.node_name),
            format!("DRA_RESOURCE_DRIVER_NAME={}", self.driver_name),
        ]);
        self.write_spec(CDI_COMMON_DEVICE, edits)
    }

    fn create_claim_spec(&self, claim_uid: &str, devices: &[PreparedDevice]) -> DriverResult<()> {
        let mut merged = ContainerEdits::default();
        for device in devices {
            merged.append(&device.container_edits);
        }
        self.write_spec(claim_uid, merged)
    }

    fn delete_claim_spec(&self, claim_uid: &str) -> DriverResult<()> {
        let path = self.spec_path(claim_uid);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "CDI spec removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DriverError::Upstream(format!(
                "removing CDI spec {}: {e}",
                path.display()
            ))),
        }
    }

    fn claim_device_ids(&self, claim_uid: &str) -> Vec<String> {
        vec![
            self.qualified_name(CDI_COMMON_DEVICE),
            self.qualified_name(claim_uid),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use npudra_state::Device;

    fn handler(dir: &Path) -> CdiHandler {
        CdiHandler::new(dir, "npu.example.com", "node-a").unwrap()
    }

    fn prepared(name: &str, env: &str) -> PreparedDevice {
        PreparedDevice {
            device: Device {
                request_names: vec!["npu".to_string()],
                pool_name: "node-a".to_string(),
                device_name: name.to_string(),
                cdi_device_ids: Vec::new(),
            },
            container_edits: ContainerEdits::with_env(vec![env.to_string()]),
        }
    }

    #[test]
    fn common_spec_carries_node_env() {
        let dir = tempfile::tempdir().unwrap();
        let cdi = handler(dir.path());
        cdi.create_common_spec().unwrap();

        assert!(dir.path().join("k8s.npu.example.com-npu_common.json").exists());
        let spec = cdi.read_spec(CDI_COMMON_DEVICE).unwrap();
        assert_eq!(spec.kind, "k8s.npu.example.com/npu");
        assert_eq!(
            spec.devices[0].container_edits.env,
            vec![
                "KUBERNETES_NODE_NAME=node-a",
                "DRA_RESOURCE_DRIVER_NAME=npu.example.com"
            ]
        );
    }

    #[test]
    fn claim_spec_merges_devices() {
        let dir = tempfile::tempdir().unwrap();
        let cdi = handler(dir.path());
        cdi.create_claim_spec(
            "uid-1",
            &[
                prepared("npu-0-0", "ASCEND_VISIBLE_DEVICES=0"),
                prepared("npu-1-0", "ASCEND_VISIBLE_DEVICES=1"),
            ],
        )
        .unwrap();

        let spec = cdi.read_spec("uid-1").unwrap();
        assert_eq!(spec.devices.len(), 1);
        assert_eq!(spec.devices[0].name, "uid-1");
        assert_eq!(
            spec.devices[0].container_edits.env,
            vec!["ASCEND_VISIBLE_DEVICES=0", "ASCEND_VISIBLE_DEVICES=1"]
        );
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cdi = handler(dir.path());
        cdi.create_claim_spec("uid-1", &[]).unwrap();
        cdi.delete_claim_spec("uid-1").unwrap();
        assert!(!cdi.spec_path("uid-1").exists());
        cdi.delete_claim_spec("uid-1").unwrap();
    }

    #[test]
    fn qualified_names() {
        let dir = tempfile::tempdir().unwrap();
        let cdi = handler(dir.path());
        assert_eq!(
            cdi.claim_device_ids("uid-7"),
            vec![
                "k8s.npu.example.com/npu=common",
                "k8s.npu.example.com/npu=uid-7"
            ]
        );
    }
}
