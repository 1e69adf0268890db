//! npudra-driver — node-side claim preparation for NPUs.
//!
//! - **`discovery`** — enumerates physical NPUs and builds the initial inventory
//! - **`inventory`** — the advertised, schedulable device map
//! - **`opaque`** — configuration precedence resolution for a claim
//! - **`cdi`** — CDI spec files granting containers access to devices
//! - **`device_class`** — predefined device classes and their publication
//! - **`state`** — the checkpoint-backed prepare/unprepare state machine
//! - **`driver`** — batch prepare/unprepare surface used by the daemon

pub mod cdi;
pub mod claim;
pub mod device_class;
pub mod discovery;
pub mod driver;
pub mod error;
pub mod inventory;
pub mod opaque;
pub mod state;

pub use cdi::{CdiHandler, CdiWriter};
pub use claim::ResourceClaim;
pub use device_class::{DeviceClassApi, InMemoryDeviceClassApi, ManifestDirApi};
pub use discovery::{NpuInventory, StaticInventory};
pub use driver::Driver;
pub use error::{DriverError, DriverResult};
pub use inventory::{AllocatableDevice, DeviceInventory};
pub use state::DeviceState;
