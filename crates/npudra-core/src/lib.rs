//! npudra-core — shared types for the NPU dynamic resource allocation agent.
//!
//! - **`template`** — partition template catalog and its text-table loader
//! - **`api`** — the opaque `NpuConfig` carried in claims and device classes
//! - **`edits`** — CDI container edits granted to a prepared device
//! - **`device`** — driver naming constants and slice identifier helpers
//! - **`config`** — the agent's TOML configuration file

pub mod api;
pub mod config;
pub mod device;
pub mod edits;
pub mod error;
pub mod template;

pub use api::{NpuConfig, Sharing, SharingStrategy, TimeSliceInterval, VnpuSpec};
pub use config::DriverConfig;
pub use edits::ContainerEdits;
pub use error::{CoreError, CoreResult};
pub use template::{Template, TemplateCatalog};
