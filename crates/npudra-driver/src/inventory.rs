//! The node's advertised device inventory.

use std::collections::{BTreeMap, BTreeSet};

use npudra_core::device::{TYPE_NPU, TYPE_VNPU};
use npudra_partition::{AdvertisedSlice, InventoryDelta, SliceKind};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Typed device attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Int(i64),
    String(String),
}

/// A schedulable device and the attributes selectors match against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatableDevice {
    pub name: String,
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl AllocatableDevice {
    /// Build the advertised form of a slice on `node_name`.
    pub fn from_slice(node_name: &str, slice: &AdvertisedSlice) -> Self {
        let device_type = match slice.kind {
            SliceKind::WholeCard => TYPE_NPU,
            SliceKind::Partition => TYPE_VNPU,
        };
        let mut attributes = BTreeMap::new();
        attributes.insert(
            "index".to_string(),
            AttributeValue::Int(i64::from(slice.logical_index)),
        );
        attributes.insert(
            "uuid".to_string(),
            AttributeValue::String(format!("{node_name}-{}", slice.logical_index)),
        );
        attributes.insert("model".to_string(), AttributeValue::String(slice.model.clone()));
        attributes.insert("type".to_string(), AttributeValue::String(device_type.to_string()));
        attributes.insert(
            "aicore".to_string(),
            AttributeValue::Int(i64::from(slice.capacity.ai_core)),
        );
        attributes.insert(
            "memory".to_string(),
            AttributeValue::Int(i64::from(slice.capacity.memory_gb)),
        );
        Self {
            name: slice.slice_id.clone(),
            attributes,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }
}

/// Device id → advertised device.
#[derive(Debug, Clone, Default)]
pub struct DeviceInventory {
    node_name: String,
    devices: BTreeMap<String, AllocatableDevice>,
}

impl DeviceInventory {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            devices: BTreeMap::new(),
        }
    }

    /// Add a device. An existing entry of the same name is kept.
    pub fn insert(&mut self, device: AllocatableDevice) -> bool {
        if self.devices.contains_key(&device.name) {
            return false;
        }
        self.devices.insert(device.name.clone(), device);
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.devices.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&AllocatableDevice> {
        self.devices.get(name)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// All devices, ordered by name.
    pub fn devices(&self) -> Vec<AllocatableDevice> {
        self.devices.values().cloned().collect()
    }

    /// Apply a partition-layout change.
    pub fn apply(&mut self, delta: &InventoryDelta) {
        for id in &delta.retired {
            if self.devices.remove(id).is_some() {
                info!(device = %id, "device retired from inventory");
            }
        }
        for slice in &delta.advertised {
            let device = AllocatableDevice::from_slice(&self.node_name, slice);
            if self.insert(device) {
                info!(device = %slice.slice_id, model = %slice.model, "device added to inventory");
            }
        }
    }

    /// Drop entries not backed by a known slice; returns the dropped names.
    pub fn reconcile(&mut self, known: &BTreeSet<String>) -> Vec<String> {
        let stale: Vec<String> = self
            .devices
            .keys()
            .filter(|name| !known.contains(*name))
            .cloned()
            .collect();
        for name in &stale {
            self.devices.remove(name);
        }
        stale
    }
}
