//! Configuration precedence for a claim.
//!
//! The resolved list is ordered lowest to highest precedence. Position 0 is
//! always the driver's default configuration, which applies to every request.

use npudra_core::config::ConfigSourceMode;
use npudra_core::{NpuConfig, Template, TemplateCatalog};
use tracing::debug;

use crate::claim::{DeviceAllocationConfiguration, SOURCE_FROM_CLAIM, SOURCE_FROM_CLASS};
use crate::error::{DriverError, DriverResult};

/// A decoded configuration and the requests it applies to.
#[derive(Debug, Clone, PartialEq)]
pub struct OpaqueConfig {
    /// Position in the precedence list; stable grouping key.
    pub key: usize,
    pub requests: Vec<String>,
    pub config: NpuConfig,
}

impl OpaqueConfig {
    /// Whether this configuration covers `request`.
    pub fn applies_to(&self, request: &str) -> bool {
        self.requests.is_empty() || self.requests.iter().any(|r| r == request)
    }
}

/// Resolve the ordered configuration list for a claim.
pub fn resolve_configs(
    driver_name: &str,
    mode: ConfigSourceMode,
    possible: &[DeviceAllocationConfiguration],
) -> DriverResult<Vec<OpaqueConfig>> {
    let mut class_configs = Vec::new();
    let mut claim_configs = Vec::new();
    for config in possible {
        match config.source.as_str() {
            SOURCE_FROM_CLASS => class_configs.push(config),
            SOURCE_FROM_CLAIM => claim_configs.push(config),
            other => {
                return Err(DriverError::InvalidConfig(format!(
                    "invalid config source: {other}"
                )));
            }
        }
    }

    let mut candidates = class_configs;
    match mode {
        ConfigSourceMode::ClassOnly => {
            if !claim_configs.is_empty() {
                debug!(dropped = claim_configs.len(), "claim-scoped configs ignored");
            }
        }
        ConfigSourceMode::ClassAndClaim => candidates.extend(claim_configs),
    }

    let mut resolved = vec![OpaqueConfig {
        key: 0,
        requests: Vec::new(),
        config: NpuConfig::default_config(),
    }];
    for config in candidates {
        let opaque = config.opaque.as_ref().ok_or_else(|| {
            DriverError::InvalidConfig("only opaque parameters are supported".to_string())
        })?;
        if opaque.driver != driver_name {
            continue;
        }
        let decoded = NpuConfig::decode(&opaque.parameters)
            .map_err(|e| DriverError::InvalidConfig(format!("error decoding config parameters: {e}")))?;
        resolved.push(OpaqueConfig {
            key: resolved.len(),
            requests: config.requests.clone(),
            config: decoded,
        });
    }
    Ok(resolved)
}

/// The highest-precedence configuration covering `request`.
pub fn applicable_config<'a>(configs: &'a [OpaqueConfig], request: &str) -> Option<&'a OpaqueConfig> {
    configs.iter().rev().find(|c| c.applies_to(request))
}

/// The template requested for `request`.
///
/// Configurations are searched from highest to lowest precedence, and only
/// those covering `request` (naming it, or naming no request at all) are
/// considered. The first one whose template is in the catalog wins. A
/// configuration aimed at another request never picks this request's
/// template, even when it comes earlier in the list.
pub fn requested_template<'a>(
    configs: &[OpaqueConfig],
    request: &str,
    catalog: &'a TemplateCatalog,
) -> Option<&'a Template> {
    configs
        .iter()
        .rev()
        .filter(|c| c.applies_to(request))
        .filter_map(|c| c.config.template_name())
        .find_map(|name| catalog.get(name))
}
