//! Opaque device configuration understood by this driver.
//!
//! Claims and device classes carry driver-specific parameters as raw JSON.
//! This module decodes them into [`NpuConfig`], fills in implied defaults
//! ([`NpuConfig::normalize`]) and checks their integrity
//! ([`NpuConfig::validate`]).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

pub const API_VERSION: &str = "npu.resource.example.com/v1alpha1";
pub const NPU_CONFIG_KIND: &str = "NpuConfig";

/// Per-request NPU configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NpuConfig {
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sharing: Option<Sharing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnpu_spec: Option<VnpuSpec>,
}

/// Names the partition template a request should be carved with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VnpuSpec {
    #[serde(default)]
    pub template_name: String,
}

/// How a device is shared between the containers of a claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sharing {
    pub strategy: SharingStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_slicing_config: Option<TimeSlicingConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_partitioning_config: Option<SpacePartitioningConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SharingStrategy {
    TimeSlicing,
    SpacePartitioning,
}

impl fmt::Display for SharingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SharingStrategy::TimeSlicing => f.write_str("TimeSlicing"),
            SharingStrategy::SpacePartitioning => f.write_str("SpacePartitioning"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSlicingConfig {
    pub interval: TimeSliceInterval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeSliceInterval {
    Default,
    Short,
    Medium,
    Long,
}

impl fmt::Display for TimeSliceInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeSliceInterval::Default => "Default",
            TimeSliceInterval::Short => "Short",
            TimeSliceInterval::Medium => "Medium",
            TimeSliceInterval::Long => "Long",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpacePartitioningConfig {
    pub partition_count: i32,
}

/// Just enough of the payload to route it to the right type.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypeMeta {
    #[serde(default)]
    api_version: String,
    #[serde(default)]
    kind: String,
}

impl NpuConfig {
    /// The lowest-precedence configuration applied when a claim names none.
    pub fn default_config() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: NPU_CONFIG_KIND.to_string(),
            sharing: Some(Sharing {
                strategy: SharingStrategy::TimeSlicing,
                time_slicing_config: Some(TimeSlicingConfig {
                    interval: TimeSliceInterval::Default,
                }),
                space_partitioning_config: None,
            }),
            vnpu_spec: None,
        }
    }

    /// A configuration that only selects a partition template.
    pub fn with_template(template_name: impl Into<String>) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: NPU_CONFIG_KIND.to_string(),
            sharing: None,
            vnpu_spec: Some(VnpuSpec {
                template_name: template_name.into(),
            }),
        }
    }

    /// Decode raw opaque parameters, rejecting unknown types.
    pub fn decode(raw: &serde_json::Value) -> CoreResult<Self> {
        let meta = TypeMeta::deserialize(raw)?;
        if meta.api_version != API_VERSION || meta.kind != NPU_CONFIG_KIND {
            return Err(CoreError::UnknownConfigKind {
                api_version: meta.api_version,
                kind: meta.kind,
            });
        }
        Ok(Self::deserialize(raw)?)
    }

    /// The template this configuration asks for, if any.
    pub fn template_name(&self) -> Option<&str> {
        self.vnpu_spec
            .as_ref()
            .map(|spec| spec.template_name.as_str())
            .filter(|name| !name.is_empty())
    }

    /// Fill in implied defaults.
    pub fn normalize(&mut self) -> CoreResult<()> {
        let sharing = self.sharing.get_or_insert(Sharing {
            strategy: SharingStrategy::TimeSlicing,
            time_slicing_config: None,
            space_partitioning_config: None,
        });
        match sharing.strategy {
            SharingStrategy::TimeSlicing if sharing.time_slicing_config.is_none() => {
                sharing.time_slicing_config = Some(TimeSlicingConfig {
                    interval: TimeSliceInterval::Default,
                });
            }
            SharingStrategy::SpacePartitioning if sharing.space_partitioning_config.is_none() => {
                sharing.space_partitioning_config =
                    Some(SpacePartitioningConfig { partition_count: 1 });
            }
            _ => {}
        }
        Ok(())
    }

    /// Check the configuration for consistency.
    pub fn validate(&self) -> CoreResult<()> {
        let sharing = self
            .sharing
            .as_ref()
            .ok_or_else(|| CoreError::InvalidConfig("no sharing strategy set".to_string()))?;
        match sharing.strategy {
            SharingStrategy::TimeSlicing => {
                if sharing.space_partitioning_config.is_some() {
                    return Err(CoreError::InvalidConfig(
                        "spacePartitioningConfig set with TimeSlicing strategy".to_string(),
                    ));
                }
            }
            SharingStrategy::SpacePartitioning => {
                if sharing.time_slicing_config.is_some() {
                    return Err(CoreError::InvalidConfig(
                        "timeSlicingConfig set with SpacePartitioning strategy".to_string(),
                    ));
                }
                if let Some(sp) = &sharing.space_partitioning_config {
                    if sp.partition_count < 0 {
                        return Err(CoreError::InvalidConfig(format!(
                            "invalid partition count: {}",
                            sp.partition_count
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Serialize back to the opaque wire form.
    pub fn to_raw(&self) -> serde_json::Value {
        // Plain data structs with string keys always serialize.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_template_config() {
        let raw = json!({
            "apiVersion": API_VERSION,
            "kind": "NpuConfig",
            "vnpuSpec": { "templateName": "vir02" }
        });
        let config = NpuConfig::decode(&raw).unwrap();
        assert_eq!(config.template_name(), Some("vir02"));
        assert!(config.sharing.is_none());
    }

    #[test]
    fn decode_rejects_unknown_kind() {
        let raw = json!({ "apiVersion": API_VERSION, "kind": "GpuConfig" });
        let err = NpuConfig::decode(&raw).unwrap_err();
        assert!(matches!(err, CoreError::UnknownConfigKind { .. }));
    }

    #[test]
    fn decode_rejects_unknown_strategy() {
        let raw = json!({
            "apiVersion": API_VERSION,
            "kind": "NpuConfig",
            "sharing": { "strategy": "Exclusive" }
        });
        assert!(matches!(NpuConfig::decode(&raw), Err(CoreError::Decode(_))));
    }

    #[test]
    fn empty_template_name_is_none() {
        let config = NpuConfig::with_template("");
        assert_eq!(config.template_name(), None);
    }

    #[test]
    fn normalize_fills_time_slicing_default() {
        let mut config = NpuConfig::with_template("vir01");
        config.normalize().unwrap();
        let sharing = config.sharing.as_ref().unwrap();
        assert_eq!(sharing.strategy, SharingStrategy::TimeSlicing);
        assert_eq!(
            sharing.time_slicing_config.as_ref().unwrap().interval,
            TimeSliceInterval::Default
        );
        config.validate().unwrap();
    }

    #[test]
    fn normalize_fills_partition_count() {
        let raw = json!({
            "apiVersion": API_VERSION,
            "kind": "NpuConfig",
            "sharing": { "strategy": "SpacePartitioning" }
        });
        let mut config = NpuConfig::decode(&raw).unwrap();
        config.normalize().unwrap();
        let sp = config
            .sharing
            .as_ref()
            .and_then(|s| s.space_partitioning_config.as_ref())
            .unwrap();
        assert_eq!(sp.partition_count, 1);
    }

    #[test]
    fn validate_rejects_negative_partition_count() {
        let raw = json!({
            "apiVersion": API_VERSION,
            "kind": "NpuConfig",
            "sharing": {
                "strategy": "SpacePartitioning",
                "spacePartitioningConfig": { "partitionCount": -2 }
            }
        });
        let config = NpuConfig::decode(&raw).unwrap();
        assert!(matches!(config.validate(), Err(CoreError::InvalidConfig(_))));
    }

    #[test]
    fn validate_rejects_mismatched_strategy_config() {
        let raw = json!({
            "apiVersion": API_VERSION,
            "kind": "NpuConfig",
            "sharing": {
                "strategy": "TimeSlicing",
                "timeSlicingConfig": { "interval": "Short" },
                "spacePartitioningConfig": { "partitionCount": 2 }
            }
        });
        let config = NpuConfig::decode(&raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_requires_sharing() {
        let config = NpuConfig::with_template("vir01");
        assert!(config.validate().is_err());
    }

    #[test]
    fn raw_form_decodes_back() {
        let config = NpuConfig::default_config();
        assert_eq!(NpuConfig::decode(&config.to_raw()).unwrap(), config);
    }
}
