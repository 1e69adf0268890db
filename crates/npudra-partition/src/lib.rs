//! npudra slice allocation engine — best-fit partitioning of physical NPUs.
//!
//! Each physical NPU starts as one whole-card slice. Partition requests carve
//! the addressed slice with the best-fitting template and synthesize a
//! remainder slice for what is left; releases coalesce the remainder back and
//! restore the whole card once nothing is allocated.
//!
//! # Components
//!
//! - **`slice`** — slice and physical device bookkeeping types
//! - **`policy`** — best-fit template selection and template eligibility
//! - **`engine`** — the locked allocate/release engine and inventory deltas

pub mod engine;
pub mod error;
pub mod policy;
pub mod slice;

pub use engine::{AdvertisedSlice, Allocation, InventoryDelta, SliceEngine};
pub use error::{PartitionError, PartitionResult};
pub use policy::{best_fit, eligible_templates};
pub use slice::{Capacity, PhysicalNpu, Slice, SliceKind};
