//! npudra.toml configuration parser.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::device::DRIVER_NAME;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default = "default_driver_name")]
    pub driver_name: String,
    /// Node this agent runs on. Usually supplied through `NODE_NAME`.
    #[serde(default)]
    pub node_name: String,
    /// Plugin data directory; holds the checkpoint database.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Directory CDI spec files are written to.
    #[serde(default = "default_cdi_root")]
    pub cdi_root: PathBuf,
    /// Vendor template table. Unreadable means built-in defaults.
    #[serde(default = "default_template_file")]
    pub template_file: PathBuf,
    /// Where device-class manifests are published. Unset disables publication.
    #[serde(default)]
    pub device_class_dir: Option<PathBuf>,
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
    #[serde(default)]
    pub partitioning: PartitioningConfig,
    #[serde(default)]
    pub claims: ClaimsConfig,
    /// Physical devices on this node.
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartitioningConfig {
    #[serde(default)]
    pub eligibility: TemplateEligibility,
}

/// Which templates a partially carved card keeps offering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum TemplateEligibility {
    /// Once anything is allocated, only templates whose name starts with `prefix`.
    Prefix {
        #[serde(default = "default_eligibility_prefix")]
        prefix: String,
    },
    /// Every template, always.
    All,
    /// Templates that still fit in the card's unallocated capacity.
    Capacity,
}

impl Default for TemplateEligibility {
    fn default() -> Self {
        TemplateEligibility::Prefix {
            prefix: default_eligibility_prefix(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaimsConfig {
    #[serde(default)]
    pub config_sources: ConfigSourceMode,
    #[serde(default)]
    pub persistence: PersistenceMode,
}

/// Which claim configuration sources feed the precedence list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigSourceMode {
    /// Device-class configs only; claim configs are classified then dropped.
    #[default]
    ClassOnly,
    /// Device-class configs followed by claim configs (claim wins).
    ClassAndClaim,
}

/// What happens to carved slices when a prepare fails after allocating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PersistenceMode {
    /// Slices stay allocated; the partition is orphaned.
    #[default]
    Legacy,
    /// Slices allocated by the failed prepare are released again.
    Compensating,
}

/// A physical NPU as declared in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub logical_index: u32,
    pub model: String,
    /// AI core count; unset reports the query as unsupported.
    #[serde(default)]
    pub ai_core: Option<u32>,
    /// Memory in GB; unset reports the query as unsupported.
    #[serde(default)]
    pub memory_gb: Option<u32>,
}

fn default_driver_name() -> String {
    DRIVER_NAME.to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(format!("/var/lib/kubelet/plugins/{DRIVER_NAME}"))
}

fn default_cdi_root() -> PathBuf {
    PathBuf::from("/var/run/cdi")
}

fn default_template_file() -> PathBuf {
    PathBuf::from("/etc/npu/template-info.txt")
}

fn default_reconcile_interval() -> u64 {
    30
}

fn default_eligibility_prefix() -> String {
    "vir01".to_string()
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            driver_name: default_driver_name(),
            node_name: String::new(),
            data_dir: default_data_dir(),
            cdi_root: default_cdi_root(),
            template_file: default_template_file(),
            device_class_dir: None,
            reconcile_interval_secs: default_reconcile_interval(),
            partitioning: PartitioningConfig::default(),
            claims: ClaimsConfig::default(),
            devices: Vec::new(),
        }
    }
}

impl DriverConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DriverConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let config: DriverConfig = toml::from_str("node_name = \"node-a\"").unwrap();
        assert_eq!(config.node_name, "node-a");
        assert_eq!(config.driver_name, DRIVER_NAME);
        assert_eq!(config.reconcile_interval_secs, 30);
        assert_eq!(config.claims.config_sources, ConfigSourceMode::ClassOnly);
        assert_eq!(config.claims.persistence, PersistenceMode::Legacy);
        assert_eq!(
            config.partitioning.eligibility,
            TemplateEligibility::Prefix {
                prefix: "vir01".to_string()
            }
        );
        assert!(config.devices.is_empty());
    }

    #[test]
    fn test_parse_full() {
        let toml_str = r#"
node_name = "node-a"
cdi_root = "/tmp/cdi"
device_class_dir = "/tmp/classes"

[partitioning.eligibility]
policy = "capacity"

[claims]
config_sources = "class-and-claim"
persistence = "compensating"

[[devices]]
logical_index = 0
model = "Ascend910B"
ai_core = 24
memory_gb = 64

[[devices]]
logical_index = 1
model = "Ascend910B"
"#;
        let config: DriverConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.cdi_root, PathBuf::from("/tmp/cdi"));
        assert_eq!(config.partitioning.eligibility, TemplateEligibility::Capacity);
        assert_eq!(config.claims.config_sources, ConfigSourceMode::ClassAndClaim);
        assert_eq!(config.claims.persistence, PersistenceMode::Compensating);
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[0].ai_core, Some(24));
        assert_eq!(config.devices[1].memory_gb, None);
    }

    #[test]
    fn test_default_renders() {
        let toml_str = DriverConfig::default().to_toml_string().unwrap();
        assert!(toml_str.contains("driver_name"));
    }
}
