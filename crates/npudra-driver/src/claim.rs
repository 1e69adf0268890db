//! Resource claims as handed to the node agent by the kubelet.
//!
//! Only the fields the agent reads are modeled. Field names follow the
//! orchestrator's camelCase wire form.

use serde::{Deserialize, Serialize};

/// Configuration attached through the device class.
pub const SOURCE_FROM_CLASS: &str = "FromClass";
/// Configuration attached directly in the claim.
pub const SOURCE_FROM_CLAIM: &str = "FromClaim";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceClaim {
    pub uid: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: ClaimStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation: Option<AllocationResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationResult {
    #[serde(default)]
    pub devices: DeviceAllocation,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAllocation {
    #[serde(default)]
    pub results: Vec<DeviceRequestAllocationResult>,
    #[serde(default)]
    pub config: Vec<DeviceAllocationConfiguration>,
}

/// One device the scheduler assigned to one request of the claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRequestAllocationResult {
    pub request: String,
    pub driver: String,
    pub pool: String,
    pub device: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAllocationConfiguration {
    /// `FromClass` or `FromClaim`.
    pub source: String,
    /// Requests this configuration applies to; empty means all of them.
    #[serde(default)]
    pub requests: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opaque: Option<OpaqueDeviceConfiguration>,
}

/// Driver-specific parameters, decoded only by the named driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpaqueDeviceConfiguration {
    pub driver: String,
    pub parameters: serde_json::Value,
}

impl ResourceClaim {
    pub fn allocation(&self) -> Option<&DeviceAllocation> {
        self.status.allocation.as_ref().map(|a| &a.devices)
    }
}
