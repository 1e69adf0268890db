//! Checkpoint domain types.

use std::collections::BTreeMap;

use npudra_core::ContainerEdits;
use serde::{Deserialize, Serialize};

/// Unique identifier of a resource claim.
pub type ClaimUid = String;

/// Name of the single checkpoint this driver keeps.
pub const CHECKPOINT_NAME: &str = "checkpoint.json";

pub const CHECKPOINT_VERSION: &str = "v1";

/// The device handed back to the kubelet for one allocation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub request_names: Vec<String>,
    pub pool_name: String,
    pub device_name: String,
    /// Fully qualified CDI device names granting access.
    #[serde(rename = "cdiDeviceIDs")]
    pub cdi_device_ids: Vec<String>,
}

/// A device prepared for a claim, with the edits applied to its containers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedDevice {
    #[serde(flatten)]
    pub device: Device,
    #[serde(default)]
    pub container_edits: ContainerEdits,
}

/// All devices prepared for a single claim, in claim result order.
pub type PreparedClaim = Vec<PreparedDevice>;

/// Durable record of every prepared claim on this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: String,
    #[serde(default)]
    pub claims: BTreeMap<ClaimUid, PreparedClaim>,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self {
            version: CHECKPOINT_VERSION.to_string(),
            claims: BTreeMap::new(),
        }
    }
}

impl Checkpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, claim_uid: &str) -> Option<&PreparedClaim> {
        self.claims.get(claim_uid)
    }
}

impl PreparedDevice {
    pub fn device_name(&self) -> &str {
        &self.device.device_name
    }
}

/// Collect the kubelet-facing devices of a prepared claim.
pub fn claim_devices(claim: &PreparedClaim) -> Vec<Device> {
    claim.iter().map(|pd| pd.device.clone()).collect()
}
