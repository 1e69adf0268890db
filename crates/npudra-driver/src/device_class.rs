//! Predefined device classes.
//!
//! For every NPU model on the node the agent publishes a full-card class,
//! and for every distinct template shape a memory-threshold and an
//! AI-core-threshold class. Each class carries an opaque `NpuConfig` naming
//! the template its devices should be carved with.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;

use npudra_core::{NpuConfig, Template};
use npudra_partition::PhysicalNpu;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cdi::write_atomic;
use crate::claim::OpaqueDeviceConfiguration;
use crate::error::{DriverError, DriverResult};

pub const DEVICE_CLASS_API_VERSION: &str = "resource.k8s.io/v1beta1";
pub const DEVICE_CLASS_KIND: &str = "DeviceClass";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceClass {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: DeviceClassSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceClassSpec {
    pub selectors: Vec<DeviceSelector>,
    pub config: Vec<DeviceClassConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSelector {
    pub cel: CelDeviceSelector,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CelDeviceSelector {
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceClassConfiguration {
    pub opaque: OpaqueDeviceConfiguration,
}

impl DeviceClass {
    fn new(driver_name: &str, name: String, expression: String, template_name: &str) -> Self {
        Self {
            api_version: DEVICE_CLASS_API_VERSION.to_string(),
            kind: DEVICE_CLASS_KIND.to_string(),
            metadata: ObjectMeta {
                name,
                resource_version: String::new(),
            },
            spec: DeviceClassSpec {
                selectors: vec![DeviceSelector {
                    cel: CelDeviceSelector { expression },
                }],
                config: vec![DeviceClassConfiguration {
                    opaque: OpaqueDeviceConfiguration {
                        driver: driver_name.to_string(),
                        parameters: NpuConfig::with_template(template_name).to_raw(),
                    },
                }],
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

/// Orchestrator API for device classes.
pub trait DeviceClassApi: Send + Sync {
    fn get(&self, name: &str) -> DriverResult<Option<DeviceClass>>;
    fn create(&self, class: &DeviceClass) -> DriverResult<()>;
    fn update(&self, class: &DeviceClass) -> DriverResult<()>;
}

// ── Class derivation ───────────────────────────────────────────

/// Lowercase model name with spaces and slashes replaced by dashes.
pub fn safe_model_name(model: &str) -> String {
    model.replace([' ', '/'], "-").to_lowercase()
}

pub fn full_card_class(driver_name: &str, model: &str) -> DeviceClass {
    let name = format!("npu-{}.example.com", safe_model_name(model));
    let expression = format!(
        r#"device.attributes["{driver_name}"].model == "{model}" && device.attributes["{driver_name}"].type == "NPU""#
    );
    DeviceClass::new(driver_name, name, expression, "")
}

pub fn memory_class(driver_name: &str, model: &str, template: &Template) -> DeviceClass {
    let name = format!(
        "npu-{}-mem{}.example.com",
        safe_model_name(model),
        template.memory_gb
    );
    let expression = format!(
        r#"device.attributes["{driver_name}"].memory >= {} && device.attributes["{driver_name}"].model == "{model}""#,
        template.memory_gb
    );
    DeviceClass::new(driver_name, name, expression, &template.name)
}

pub fn aicore_class(driver_name: &str, model: &str, template: &Template) -> DeviceClass {
    let name = format!(
        "npu-{}-aicore{}.example.com",
        safe_model_name(model),
        template.ai_core
    );
    let expression = format!(
        r#"device.attributes["{driver_name}"].aicore >= {} && device.attributes["{driver_name}"].model == "{model}""#,
        template.ai_core
    );
    DeviceClass::new(driver_name, name, expression, &template.name)
}

/// Every predefined class for the given devices.
///
/// Templates are deduplicated by shape; the first template seen for a shape
/// names the classes built from it.
pub fn predefined_classes(driver_name: &str, devices: &[PhysicalNpu]) -> Vec<DeviceClass> {
    let mut models = BTreeSet::new();
    let mut shapes: BTreeMap<(u32, u32), &Template> = BTreeMap::new();
    for npu in devices {
        let model = if npu.model.is_empty() {
            "unknown"
        } else {
            npu.model.as_str()
        };
        models.insert(model);
        for template in npu.supported_templates.iter() {
            shapes
                .entry((template.ai_core, template.memory_gb))
                .or_insert(template);
        }
    }

    let mut classes: Vec<DeviceClass> = models
        .iter()
        .map(|model| full_card_class(driver_name, model))
        .collect();
    for template in shapes.values() {
        for model in &models {
            classes.push(memory_class(driver_name, model, template));
            classes.push(aicore_class(driver_name, model, template));
        }
    }
    classes
}

// ── Upsert ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Unchanged,
    Updated,
}

/// Create `want` if absent; update it only if its spec differs.
pub fn upsert(api: &dyn DeviceClassApi, want: &DeviceClass) -> DriverResult<UpsertOutcome> {
    let Some(got) = api.get(want.name())? else {
        api.create(want)?;
        info!(class = %want.name(), "device class created");
        return Ok(UpsertOutcome::Created);
    };

    if serde_json::to_string(&got.spec)? == serde_json::to_string(&want.spec)? {
        return Ok(UpsertOutcome::Unchanged);
    }
    let mut update = want.clone();
    update.metadata.resource_version = got.metadata.resource_version;
    api.update(&update)?;
    info!(class = %want.name(), "device class updated");
    Ok(UpsertOutcome::Updated)
}

/// Upsert every class; individual failures are logged and skipped.
///
/// Returns the number of classes that failed.
pub fn publish(api: &dyn DeviceClassApi, classes: &[DeviceClass]) -> usize {
    info!(count = classes.len(), "publishing predefined device classes");
    let mut failed = 0;
    for class in classes {
        if let Err(e) = upsert(api, class) {
            warn!(class = %class.name(), error = %e, "failed to create/update device class");
            failed += 1;
        }
    }
    info!(failed, "predefined device class publication completed");
    failed
}

// ── Implementations ────────────────────────────────────────────

/// Device classes kept in memory; records every write.
#[derive(Default)]
pub struct InMemoryDeviceClassApi {
    classes: Mutex<BTreeMap<String, DeviceClass>>,
    writes: Mutex<Vec<String>>,
}

impl InMemoryDeviceClassApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes performed so far, as `create:<name>` / `update:<name>`.
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().clone()
    }

    pub fn classes(&self) -> Vec<DeviceClass> {
        self.classes
            .lock()
            .values()
            .cloned()
            .collect()
    }

    fn store(&self, op: &str, class: &DeviceClass) {
        self.classes
            .lock()
            .insert(class.name().to_string(), class.clone());
        self.writes
            .lock()
            .push(format!("{op}:{}", class.name()));
    }
}

impl DeviceClassApi for InMemoryDeviceClassApi {
    fn get(&self, name: &str) -> DriverResult<Option<DeviceClass>> {
        Ok(self
            .classes
            .lock()
            .get(name)
            .cloned())
    }

    fn create(&self, class: &DeviceClass) -> DriverResult<()> {
        if self.get(class.name())?.is_some() {
            return Err(DriverError::Upstream(format!(
                "device class {} already exists",
                class.name()
            )));
        }
        self.store("create", class);
        Ok(())
    }

    fn update(&self, class: &DeviceClass) -> DriverResult<()> {
        if self.get(class.name())?.is_none() {
            return Err(DriverError::NotFound(format!("device class {}", class.name())));
        }
        self.store("update", class);
        Ok(())
    }
}

/// Device classes as JSON manifests in a directory, one file per class.
pub struct ManifestDirApi {
    dir: PathBuf,
}

impl ManifestDirApi {
    pub fn new(dir: impl Into<PathBuf>) -> DriverResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    fn write(&self, class: &DeviceClass) -> DriverResult<()> {
        write_atomic(&self.path(class.name()), &serde_json::to_vec_pretty(class)?)?;
        Ok(())
    }
}

impl DeviceClassApi for ManifestDirApi {
    fn get(&self, name: &str) -> DriverResult<Option<DeviceClass>> {
        match fs::read(self.path(name)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn create(&self, class: &DeviceClass) -> DriverResult<()> {
        self.write(class)
    }

    fn update(&self, class: &DeviceClass) -> DriverResult<()> {
        self.write(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use npudra_core::TemplateCatalog;
    use npudra_partition::Capacity;

    const DRIVER: &str = "npu.example.com";

    fn npu(idx: u32, model: &str) -> PhysicalNpu {
        PhysicalNpu::new(
            format!("npu-{idx}-0"),
            idx,
            model,
            Capacity::default(),
            TemplateCatalog::default_catalog(),
        )
    }

    #[test]
    fn safe_model_names() {
        assert_eq!(safe_model_name("Ascend 910B/Pro"), "ascend-910b-pro");
    }

    #[test]
    fn class_shapes() {
        let full = full_card_class(DRIVER, "Ascend910B");
        assert_eq!(full.name(), "npu-ascend910b.example.com");
        assert_eq!(
            full.spec.selectors[0].cel.expression,
            r#"device.attributes["npu.example.com"].model == "Ascend910B" && device.attributes["npu.example.com"].type == "NPU""#
        );

        let template = Template::new("vir02", 8, 12);
        let mem = memory_class(DRIVER, "Ascend910B", &template);
        assert_eq!(mem.name(), "npu-ascend910b-mem12.example.com");
        assert!(mem.spec.selectors[0].cel.expression.contains(".memory >= 12"));
        let params = &mem.spec.config[0].opaque.parameters;
        assert_eq!(
            NpuConfig::decode(params).unwrap().template_name(),
            Some("vir02")
        );

        let core = aicore_class(DRIVER, "Ascend910B", &template);
        assert_eq!(core.name(), "npu-ascend910b-aicore8.example.com");
    }

    #[test]
    fn predefined_classes_dedupe_models_and_shapes() {
        let devices = vec![npu(0, "Ascend910B"), npu(1, "Ascend910B")];
        let classes = predefined_classes(DRIVER, &devices);
        // One full-card class, two per template shape.
        assert_eq!(classes.len(), 1 + 3 * 2);

        let devices = vec![npu(0, "Ascend910B"), npu(1, "")];
        let classes = predefined_classes(DRIVER, &devices);
        assert_eq!(classes.len(), 2 + 3 * 2 * 2);
        assert!(classes.iter().any(|c| c.name() == "npu-unknown.example.com"));
    }

    #[test]
    fn upsert_create_noop_update() {
        let api = InMemoryDeviceClassApi::new();
        let class = full_card_class(DRIVER, "Ascend910B");

        assert_eq!(upsert(&api, &class).unwrap(), UpsertOutcome::Created);
        assert_eq!(upsert(&api, &class).unwrap(), UpsertOutcome::Unchanged);

        let mut changed = class.clone();
        changed.spec.selectors[0].cel.expression = "true".to_string();
        assert_eq!(upsert(&api, &changed).unwrap(), UpsertOutcome::Updated);

        assert_eq!(
            api.writes(),
            vec![
                "create:npu-ascend910b.example.com",
                "update:npu-ascend910b.example.com"
            ]
        );
    }

    #[test]
    fn manifest_dir_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let api = ManifestDirApi::new(dir.path()).unwrap();
        let classes = predefined_classes(DRIVER, &[npu(0, "Ascend910B")]);

        assert_eq!(publish(&api, &classes), 0);
        let stored = api.get("npu-ascend910b-mem8.example.com").unwrap().unwrap();
        assert_eq!(stored.kind, DEVICE_CLASS_KIND);
        assert!(api.get("npu-missing.example.com").unwrap().is_none());
        assert_eq!(upsert(&api, &classes[0]).unwrap(), UpsertOutcome::Unchanged);
    }

    #[test]
    fn manifest_dir_writes_leave_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let api = ManifestDirApi::new(dir.path()).unwrap();
        let classes = predefined_classes(DRIVER, &[npu(0, "Ascend910B")]);
        assert_eq!(publish(&api, &classes), 0);

        let mut changed = classes[0].clone();
        changed.spec.selectors[0].cel.expression = "true".to_string();
        assert_eq!(upsert(&api, &changed).unwrap(), UpsertOutcome::Updated);
        assert_eq!(
            api.get(changed.name()).unwrap().unwrap().spec,
            changed.spec
        );

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), classes.len());
        assert!(names.iter().all(|n| n.ends_with(".json")));
    }
}
