//! Slice allocation engine.
//!
//! The engine owns the partition state of every physical NPU on the node.
//! All mutations run under one engine-wide lock. Instead of calling back into
//! the device inventory while that lock is held, allocate and release return
//! an [`InventoryDelta`] that the caller applies under its own lock.

use std::collections::{BTreeMap, BTreeSet};

use npudra_core::config::TemplateEligibility;
use npudra_core::{Template, TemplateCatalog};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PartitionError, PartitionResult};
use crate::policy::{best_fit, eligible_templates};
use crate::slice::{Capacity, PhysicalNpu, Slice, SliceKind};

/// A slice that should appear in the node's advertised device inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisedSlice {
    pub slice_id: String,
    pub logical_index: u32,
    pub model: String,
    pub kind: SliceKind,
    /// Largest shape the slice can still be carved into.
    pub capacity: Capacity,
}

impl AdvertisedSlice {
    fn of(npu: &PhysicalNpu, slice: &Slice) -> Self {
        Self {
            slice_id: slice.id.clone(),
            logical_index: npu.logical_index,
            model: npu.model.clone(),
            kind: slice.kind,
            capacity: npu.max_supported(),
        }
    }
}

/// Inventory changes caused by one engine mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventoryDelta {
    /// New slices to advertise.
    pub advertised: Vec<AdvertisedSlice>,
    /// Slice ids that no longer exist on their card.
    pub retired: Vec<String>,
}

impl InventoryDelta {
    pub fn is_empty(&self) -> bool {
        self.advertised.is_empty() && self.retired.is_empty()
    }
}

/// Result of a successful allocation.
#[derive(Debug, Clone)]
pub struct Allocation {
    pub slice: Slice,
    /// Template the slice was carved with; `None` for a whole card.
    pub template: Option<Template>,
    pub delta: InventoryDelta,
}

struct EngineInner {
    devices: BTreeMap<String, PhysicalNpu>,
    catalog: TemplateCatalog,
    eligibility: TemplateEligibility,
}

impl EngineInner {
    /// Resolve a device by whole-card id or by one of its available slices.
    fn locate_mut(&mut self, id: &str) -> Option<&mut PhysicalNpu> {
        if self.devices.contains_key(id) {
            return self.devices.get_mut(id);
        }
        self.devices
            .values_mut()
            .find(|npu| npu.find_available(id).is_some())
    }
}

/// Thread-safe partition engine for all NPUs on the node.
pub struct SliceEngine {
    inner: Mutex<EngineInner>,
}

impl SliceEngine {
    pub fn new(catalog: TemplateCatalog, eligibility: TemplateEligibility) -> Self {
        Self {
            inner: Mutex::new(EngineInner {
                devices: BTreeMap::new(),
                catalog,
                eligibility,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineInner> {
        self.inner.lock()
    }

    /// Register a physical NPU as one free whole-card slice.
    ///
    /// Returns false if the device was already registered.
    pub fn init_device(
        &self,
        device_id: &str,
        logical_index: u32,
        model: &str,
        capacity: Capacity,
    ) -> bool {
        let mut inner = self.lock();
        if inner.devices.contains_key(device_id) {
            debug!(%device_id, "physical NPU already registered");
            return false;
        }
        let npu = PhysicalNpu::new(
            device_id,
            logical_index,
            model,
            capacity,
            inner.catalog.clone(),
        );
        inner.devices.insert(device_id.to_string(), npu);
        info!(%device_id, logical_index, %model, "physical NPU registered");
        true
    }

    /// Allocate a slice of `device_id` with at least the requested resources.
    ///
    /// A request for zero cores and zero memory takes the whole card.
    pub fn allocate(
        &self,
        device_id: &str,
        ai_core: u32,
        memory_gb: u32,
    ) -> PartitionResult<Allocation> {
        let mut inner = self.lock();
        debug!(%device_id, ai_core, memory_gb, "allocating slice");

        let catalog = inner.catalog.clone();
        let eligibility = inner.eligibility.clone();
        let npu = inner
            .locate_mut(device_id)
            .ok_or_else(|| PartitionError::NotFound(format!("physical NPU {device_id}")))?;

        if ai_core == 0 && memory_gb == 0 {
            let whole = npu.device_id.clone();
            let pos = npu
                .find_available(&whole)
                .ok_or(PartitionError::AlreadyAllocated(whole))?;
            let mut slice = npu.available.remove(pos);
            slice.allocated = true;
            npu.allocated.push(slice.clone());
            if eligibility == TemplateEligibility::Capacity {
                npu.supported_templates = eligible_templates(&eligibility, &catalog, npu);
            }
            info!(slice = %slice.id, "whole card allocated");
            return Ok(Allocation {
                slice,
                template: None,
                delta: InventoryDelta::default(),
            });
        }

        let template = best_fit(&npu.supported_templates, ai_core, memory_gb)
            .cloned()
            .ok_or(PartitionError::ResourceExhausted { ai_core, memory_gb })?;
        let pos = npu
            .find_available(device_id)
            .ok_or_else(|| PartitionError::SliceUnavailable(device_id.to_string()))?;

        let mut slice = npu.available.remove(pos);
        slice.template_name = template.name.clone();
        slice.allocated = true;
        npu.allocated.push(slice.clone());

        let remainder = npu.synthesize_remainder();
        npu.available.push(remainder.clone());
        if eligibility == TemplateEligibility::Capacity {
            npu.supported_templates = eligible_templates(&eligibility, &catalog, npu);
        }

        info!(
            slice = %slice.id,
            template = %template.name,
            ai_core = template.ai_core,
            memory_gb = template.memory_gb,
            remainder = %remainder.id,
            "partition allocated"
        );

        let delta = InventoryDelta {
            advertised: vec![AdvertisedSlice::of(npu, &remainder)],
            retired: Vec::new(),
        };
        Ok(Allocation {
            slice,
            template: Some(template),
            delta,
        })
    }

    /// Release an allocated slice and coalesce the card's free capacity.
    pub fn release(&self, slice_id: &str) -> PartitionResult<InventoryDelta> {
        let mut inner = self.lock();
        let catalog = inner.catalog.clone();
        let eligibility = inner.eligibility.clone();

        let (npu, pos) = inner
            .devices
            .values_mut()
            .find_map(|npu| {
                let pos = npu.find_allocated(slice_id)?;
                Some((npu, pos))
            })
            .ok_or_else(|| PartitionError::NotFound(format!("slice {slice_id}")))?;

        let before: BTreeSet<String> = npu
            .slice_ids()
            .map(str::to_string)
            .collect();

        let mut released = npu.allocated.remove(pos);
        released.allocated = false;

        let remainder = if released.kind == SliceKind::WholeCard || npu.allocated.is_empty() {
            if !npu.allocated.is_empty() {
                warn!(
                    device = %npu.device_id,
                    dropped = npu.allocated.len(),
                    "whole-card slice released while partitions remain allocated"
                );
            }
            npu.reset();
            info!(slice = %slice_id, device = %npu.device_id, "card restored to whole-card state");
            None
        } else {
            let remainder = npu.synthesize_remainder();
            npu.available = vec![remainder.clone()];
            info!(slice = %slice_id, remainder = %remainder.id, "partition released");
            Some(remainder)
        };

        npu.supported_templates = eligible_templates(&eligibility, &catalog, npu);

        let after: BTreeSet<&str> = npu.slice_ids().collect();
        let mut delta = InventoryDelta {
            advertised: Vec::new(),
            retired: before
                .into_iter()
                .filter(|id| !after.contains(id.as_str()))
                .collect(),
        };
        if let Some(remainder) = remainder {
            delta.advertised.push(AdvertisedSlice::of(npu, &remainder));
        }
        Ok(delta)
    }

    /// Template of an allocated slice; empty for an unpartitioned card.
    pub fn template_of(&self, slice_id: &str) -> PartitionResult<String> {
        let inner = self.lock();
        inner
            .devices
            .values()
            .flat_map(|npu| npu.allocated.iter())
            .find(|s| s.id == slice_id)
            .map(|s| s.template_name.clone())
            .ok_or_else(|| PartitionError::NotFound(format!("slice {slice_id}")))
    }

    /// Every slice id in any pool of any device.
    pub fn known_slice_ids(&self) -> BTreeSet<String> {
        let inner = self.lock();
        inner
            .devices
            .values()
            .flat_map(|npu| npu.slice_ids())
            .map(str::to_string)
            .collect()
    }

    /// Snapshot of one device.
    pub fn device(&self, device_id: &str) -> Option<PhysicalNpu> {
        self.lock().devices.get(device_id).cloned()
    }

    /// Snapshot of all devices, ordered by id.
    pub fn devices(&self) -> Vec<PhysicalNpu> {
        self.lock().devices.values().cloned().collect()
    }

    pub fn catalog(&self) -> TemplateCatalog {
        self.lock().catalog.clone()
    }
}
