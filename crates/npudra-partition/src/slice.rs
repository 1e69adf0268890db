//! Slice bookkeeping for a single physical NPU.

use npudra_core::TemplateCatalog;
use npudra_core::device::slice_id;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SliceKind {
    WholeCard,
    Partition,
}

/// A unit of allocatable capacity: the whole card or a carved partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slice {
    pub id: String,
    /// Template the slice was carved with; empty while unpartitioned.
    pub template_name: String,
    pub allocated: bool,
    pub kind: SliceKind,
}

impl Slice {
    fn free(id: String, kind: SliceKind) -> Self {
        Self {
            id,
            template_name: String::new(),
            allocated: false,
            kind,
        }
    }
}

/// Compute and memory capacity of a card.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    pub ai_core: u32,
    pub memory_gb: u32,
}

/// Partition state of one physical NPU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalNpu {
    /// Whole-card identifier, also the id of the whole-card slice.
    pub device_id: String,
    pub logical_index: u32,
    pub model: String,
    pub capacity: Capacity,
    pub available: Vec<Slice>,
    pub allocated: Vec<Slice>,
    pub supported_templates: TemplateCatalog,
    pub next_slice_index: u32,
}

impl PhysicalNpu {
    pub fn new(
        device_id: impl Into<String>,
        logical_index: u32,
        model: impl Into<String>,
        capacity: Capacity,
        templates: TemplateCatalog,
    ) -> Self {
        let mut npu = Self {
            device_id: device_id.into(),
            logical_index,
            model: model.into(),
            capacity,
            available: Vec::new(),
            allocated: Vec::new(),
            supported_templates: templates,
            next_slice_index: 1,
        };
        npu.reset();
        npu
    }

    /// Back to a single free whole-card slice with the counter restarted.
    pub fn reset(&mut self) {
        self.allocated.clear();
        self.available.clear();
        self.next_slice_index = 1;
        self.available
            .push(Slice::free(self.device_id.clone(), SliceKind::WholeCard));
    }

    /// Synthesize the slice representing the card's remaining capacity.
    pub fn synthesize_remainder(&mut self) -> Slice {
        let id = slice_id(self.logical_index, self.next_slice_index);
        self.next_slice_index += 1;
        Slice::free(id, SliceKind::Partition)
    }

    pub fn is_whole(&self) -> bool {
        self.allocated.is_empty()
    }

    /// Position of a free slice in the available pool.
    pub fn find_available(&self, slice_id: &str) -> Option<usize> {
        self.available
            .iter()
            .position(|s| s.id == slice_id && !s.allocated)
    }

    pub fn find_allocated(&self, slice_id: &str) -> Option<usize> {
        self.allocated.iter().position(|s| s.id == slice_id)
    }

    /// Every slice id currently known on this card.
    pub fn slice_ids(&self) -> impl Iterator<Item = &str> {
        self.available
            .iter()
            .chain(self.allocated.iter())
            .map(|s| s.id.as_str())
    }

    /// Largest (AI core, memory) any supported template offers.
    pub fn max_supported(&self) -> Capacity {
        self.supported_templates
            .iter()
            .fold(Capacity::default(), |acc, t| Capacity {
                ai_core: acc.ai_core.max(t.ai_core),
                memory_gb: acc.memory_gb.max(t.memory_gb),
            })
    }

    /// Capacity not yet claimed by allocated partitions.
    ///
    /// Slices without a template (whole card allocated as-is) consume the
    /// entire card.
    pub fn remaining_capacity(&self, catalog: &TemplateCatalog) -> Capacity {
        let mut remaining = self.capacity;
        for slice in &self.allocated {
            match catalog.get(&slice.template_name) {
                Some(t) => {
                    remaining.ai_core = remaining.ai_core.saturating_sub(t.ai_core);
                    remaining.memory_gb = remaining.memory_gb.saturating_sub(t.memory_gb);
                }
                None => return Capacity::default(),
            }
        }
        remaining
    }
}
