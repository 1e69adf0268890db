//! Physical NPU discovery.
//!
//! The hardware inventory provider is a trait so the vendor management
//! library can be swapped for the statically configured
//! [`StaticInventory`].

use npudra_core::config::DeviceConfig;
use npudra_core::device::whole_card_id;
use npudra_partition::{AdvertisedSlice, Capacity, SliceEngine, SliceKind};
use thiserror::Error;
use tracing::{info, warn};

use crate::error::DriverResult;
use crate::inventory::{AllocatableDevice, DeviceInventory};

/// AI core count assumed when the card cannot report one.
pub const DEFAULT_AI_CORE: u32 = 1;
/// Memory (GB) assumed when the card cannot report it.
pub const DEFAULT_MEMORY_GB: u32 = 32;

/// A physical NPU as listed by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpuInfo {
    pub logical_index: u32,
    pub model: String,
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query not supported by this device")]
    Unsupported,
    #[error("query failed: {0}")]
    Query(String),
}

/// Hardware inventory provider.
pub trait NpuInventory: Send + Sync {
    fn list_devices(&self) -> DriverResult<Vec<NpuInfo>>;

    fn query_core_count(&self, logical_index: u32) -> Result<u32, QueryError>;

    /// Card memory in GB.
    fn query_memory_size(&self, logical_index: u32) -> Result<u32, QueryError>;
}

/// Devices declared in the agent's configuration file.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    devices: Vec<DeviceConfig>,
}

impl StaticInventory {
    pub fn new(devices: Vec<DeviceConfig>) -> Self {
        Self { devices }
    }

    fn find(&self, logical_index: u32) -> Result<&DeviceConfig, QueryError> {
        self.devices
            .iter()
            .find(|d| d.logical_index == logical_index)
            .ok_or_else(|| QueryError::Query(format!("no device with logical index {logical_index}")))
    }
}

impl NpuInventory for StaticInventory {
    fn list_devices(&self) -> DriverResult<Vec<NpuInfo>> {
        Ok(self
            .devices
            .iter()
            .map(|d| NpuInfo {
                logical_index: d.logical_index,
                model: d.model.clone(),
            })
            .collect())
    }

    fn query_core_count(&self, logical_index: u32) -> Result<u32, QueryError> {
        self.find(logical_index)?.ai_core.ok_or(QueryError::Unsupported)
    }

    fn query_memory_size(&self, logical_index: u32) -> Result<u32, QueryError> {
        self.find(logical_index)?.memory_gb.ok_or(QueryError::Unsupported)
    }
}

fn resolve_query(result: Result<u32, QueryError>, default: u32, what: &str, logical_index: u32) -> u32 {
    match result {
        Ok(value) => value,
        Err(QueryError::Unsupported) => default,
        Err(e) => {
            warn!(logical_index, error = %e, "failed to fetch {what}");
            0
        }
    }
}

/// Register every physical NPU with the engine and build the initial
/// inventory of whole cards.
pub fn enumerate(
    provider: &dyn NpuInventory,
    engine: &SliceEngine,
    node_name: &str,
) -> DriverResult<DeviceInventory> {
    let mut inventory = DeviceInventory::new(node_name);
    for npu in provider.list_devices()? {
        let device_id = whole_card_id(npu.logical_index);
        let capacity = Capacity {
            ai_core: resolve_query(
                provider.query_core_count(npu.logical_index),
                DEFAULT_AI_CORE,
                "AI core count",
                npu.logical_index,
            ),
            memory_gb: resolve_query(
                provider.query_memory_size(npu.logical_index),
                DEFAULT_MEMORY_GB,
                "memory size",
                npu.logical_index,
            ),
        };
        engine.init_device(&device_id, npu.logical_index, &npu.model, capacity);

        let whole = AdvertisedSlice {
            slice_id: device_id.clone(),
            logical_index: npu.logical_index,
            model: npu.model.clone(),
            kind: SliceKind::WholeCard,
            capacity,
        };
        inventory.insert(AllocatableDevice::from_slice(node_name, &whole));
        info!(device = %device_id, model = %npu.model, ai_core = capacity.ai_core, memory_gb = capacity.memory_gb, "discovered NPU");
    }
    Ok(inventory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::AttributeValue;
    use npudra_core::TemplateCatalog;
    use npudra_core::config::TemplateEligibility;

    struct FlakyInventory;

    impl NpuInventory for FlakyInventory {
        fn list_devices(&self) -> DriverResult<Vec<NpuInfo>> {
            Ok(vec![NpuInfo {
                logical_index: 0,
                model: "Ascend310P".to_string(),
            }])
        }

        fn query_core_count(&self, _: u32) -> Result<u32, QueryError> {
            Err(QueryError::Query("dcmi timeout".to_string()))
        }

        fn query_memory_size(&self, _: u32) -> Result<u32, QueryError> {
            Ok(24)
        }
    }

    fn engine() -> SliceEngine {
        SliceEngine::new(TemplateCatalog::default_catalog(), TemplateEligibility::default())
    }

    #[test]
    fn static_inventory_reports_unset_as_unsupported() {
        let inventory = StaticInventory::new(vec![DeviceConfig {
            logical_index: 1,
            model: "Ascend910B".to_string(),
            ai_core: Some(24),
            memory_gb: None,
        }]);
        assert_eq!(inventory.query_core_count(1).unwrap(), 24);
        assert!(matches!(inventory.query_memory_size(1), Err(QueryError::Unsupported)));
        assert!(matches!(inventory.query_core_count(7), Err(QueryError::Query(_))));
    }

    #[test]
    fn enumerate_registers_whole_cards_with_defaults() {
        let provider = StaticInventory::new(vec![
            DeviceConfig {
                logical_index: 0,
                model: "Ascend910B".to_string(),
                ai_core: Some(24),
                memory_gb: Some(64),
            },
            DeviceConfig {
                logical_index: 1,
                model: "Ascend910B".to_string(),
                ai_core: None,
                memory_gb: None,
            },
        ]);
        let engine = engine();
        let inventory = enumerate(&provider, &engine, "node-a").unwrap();

        assert_eq!(inventory.len(), 2);
        assert_eq!(engine.devices().len(), 2);
        let first = inventory.get("npu-0-0").unwrap();
        assert_eq!(first.attribute("aicore"), Some(&AttributeValue::Int(24)));
        assert_eq!(first.attribute("memory"), Some(&AttributeValue::Int(64)));
        let second = inventory.get("npu-1-0").unwrap();
        assert_eq!(second.attribute("aicore"), Some(&AttributeValue::Int(1)));
        assert_eq!(second.attribute("memory"), Some(&AttributeValue::Int(32)));
        assert_eq!(
            second.attribute("type"),
            Some(&AttributeValue::String("NPU".to_string()))
        );
    }

    #[test]
    fn query_failure_advertises_zero() {
        let engine = engine();
        let inventory = enumerate(&FlakyInventory, &engine, "node-a").unwrap();
        let device = inventory.get("npu-0-0").unwrap();
        assert_eq!(device.attribute("aicore"), Some(&AttributeValue::Int(0)));
        assert_eq!(device.attribute("memory"), Some(&AttributeValue::Int(24)));
        assert_eq!(engine.device("npu-0-0").unwrap().capacity.ai_core, 0);
    }
}
