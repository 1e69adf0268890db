//! DeviceState — the checkpoint-backed claim preparation state machine.
//!
//! Every mutating operation reads the checkpoint first and writes it whole
//! afterwards, so a prepare retried after a crash returns the devices that
//! were committed the first time instead of carving new slices.
//!
//! Lock order: the state lock is taken before any engine call, and the
//! engine's own lock is never held across a return into this module.

use std::collections::BTreeMap;
use std::sync::Arc;

use npudra_core::config::{ConfigSourceMode, PersistenceMode};
use npudra_core::device::{env_suffix, is_slice_id, parse_slice_id};
use npudra_core::{ContainerEdits, DriverConfig, NpuConfig, SharingStrategy};
use npudra_partition::SliceEngine;
use npudra_state::{
    CHECKPOINT_NAME, Checkpoint, CheckpointStore, ClaimUid, Device, PreparedClaim, PreparedDevice,
};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::cdi::CdiWriter;
use crate::claim::{DeviceRequestAllocationResult, ResourceClaim};
use crate::error::{DriverError, DriverResult};
use crate::inventory::{AllocatableDevice, DeviceInventory};
use crate::opaque::{applicable_config, requested_template, resolve_configs};

struct StateInner {
    inventory: DeviceInventory,
}

/// A result resolved to the device it will be granted as.
struct Resolved<'a> {
    position: usize,
    result: &'a DeviceRequestAllocationResult,
    device_id: String,
}

pub struct DeviceState {
    inner: Mutex<StateInner>,
    engine: Arc<SliceEngine>,
    cdi: Arc<dyn CdiWriter>,
    store: Arc<dyn CheckpointStore>,
    driver_name: String,
    config_sources: ConfigSourceMode,
    persistence: PersistenceMode,
    first_start: bool,
}

impl DeviceState {
    /// Bootstrap: write the common CDI spec and make sure a checkpoint exists.
    pub fn new(
        config: &DriverConfig,
        engine: Arc<SliceEngine>,
        inventory: DeviceInventory,
        cdi: Arc<dyn CdiWriter>,
        store: Arc<dyn CheckpointStore>,
    ) -> DriverResult<Self> {
        cdi.create_common_spec()?;

        let first_start = !store
            .list_names()?
            .iter()
            .any(|name| name == CHECKPOINT_NAME);
        if first_start {
            store.create(CHECKPOINT_NAME, &Checkpoint::new())?;
            info!("empty checkpoint created");
        }

        info!(
            devices = inventory.len(),
            first_start,
            config_sources = ?config.claims.config_sources,
            persistence = ?config.claims.persistence,
            "device state initialized"
        );
        Ok(Self {
            inner: Mutex::new(StateInner { inventory }),
            engine,
            cdi,
            store,
            driver_name: config.driver_name.clone(),
            config_sources: config.claims.config_sources,
            persistence: config.claims.persistence,
            first_start,
        })
    }

    fn lock(&self) -> MutexGuard<'_, StateInner> {
        self.inner.lock()
    }

    /// Whether no checkpoint existed when this state was created.
    pub fn is_first_start(&self) -> bool {
        self.first_start
    }

    pub fn engine(&self) -> &Arc<SliceEngine> {
        &self.engine
    }

    // ── Prepare ────────────────────────────────────────────────

    /// Prepare the devices of an allocated claim.
    pub fn prepare(&self, claim: &ResourceClaim) -> DriverResult<PreparedClaim> {
        let mut inner = self.lock();
        let mut checkpoint = self.store.get(CHECKPOINT_NAME)?;
        if let Some(prepared) = checkpoint.get(&claim.uid) {
            debug!(claim_uid = %claim.uid, "claim already prepared");
            return Ok(prepared.clone());
        }

        let mut carved = Vec::new();
        match self.try_prepare(&mut inner, claim, &mut checkpoint, &mut carved) {
            Ok(prepared) => {
                info!(claim_uid = %claim.uid, devices = prepared.len(), "claim prepared");
                Ok(prepared)
            }
            Err(e) => {
                match self.persistence {
                    PersistenceMode::Compensating => self.roll_back(&mut inner, &claim.uid, &carved),
                    PersistenceMode::Legacy if !carved.is_empty() => {
                        warn!(claim_uid = %claim.uid, slices = ?carved, "prepare failed; allocated slices left in place");
                    }
                    PersistenceMode::Legacy => {}
                }
                Err(e)
            }
        }
    }

    fn try_prepare(
        &self,
        inner: &mut StateInner,
        claim: &ResourceClaim,
        checkpoint: &mut Checkpoint,
        carved: &mut Vec<String>,
    ) -> DriverResult<PreparedClaim> {
        let prepared = self.prepare_devices(inner, claim, carved)?;
        self.cdi.create_claim_spec(&claim.uid, &prepared)?;
        checkpoint.claims.insert(claim.uid.clone(), prepared.clone());
        self.store.create(CHECKPOINT_NAME, checkpoint)?;
        Ok(prepared)
    }

    fn prepare_devices(
        &self,
        inner: &mut StateInner,
        claim: &ResourceClaim,
        carved: &mut Vec<String>,
    ) -> DriverResult<PreparedClaim> {
        let allocation = claim
            .allocation()
            .ok_or_else(|| DriverError::ClaimNotAllocated(claim.uid.clone()))?;
        let configs = resolve_configs(&self.driver_name, self.config_sources, &allocation.config)?;
        let catalog = self.engine.catalog();

        let mut resolved = Vec::new();
        for (position, result) in allocation.results.iter().enumerate() {
            if result.driver != self.driver_name {
                continue;
            }
            let (ai_core, memory_gb) = requested_template(&configs, &result.request, &catalog)
                .map(|t| (t.ai_core, t.memory_gb))
                .unwrap_or((0, 0));

            let device_id = match self.engine.allocate(&result.device, ai_core, memory_gb) {
                Ok(slice) => {
                    inner.inventory.apply(&slice.delta);
                    carved.push(slice.slice.id.clone());
                    slice.slice.id
                }
                Err(e) => {
                    warn!(
                        claim_uid = %claim.uid,
                        device = %result.device,
                        ai_core,
                        memory_gb,
                        error = %e,
                        "slice allocation failed; granting device as assigned"
                    );
                    result.device.clone()
                }
            };
            if !inner.inventory.contains(&device_id) {
                return Err(DriverError::NotAllocatable(device_id));
            }
            resolved.push(Resolved {
                position,
                result,
                device_id,
            });
        }

        let mut groups: BTreeMap<usize, Vec<Resolved<'_>>> = BTreeMap::new();
        for device in resolved {
            let config = applicable_config(&configs, &device.result.request).ok_or_else(|| {
                DriverError::InvalidConfig(format!(
                    "no config applies to request {}",
                    device.result.request
                ))
            })?;
            groups.entry(config.key).or_default().push(device);
        }

        let cdi_device_ids = self.cdi.claim_device_ids(&claim.uid);
        let mut ordered = BTreeMap::new();
        for (key, devices) in groups {
            let mut config = configs[key].config.clone();
            config.normalize()?;
            config.validate()?;
            for device in devices {
                let prepared = PreparedDevice {
                    device: Device {
                        request_names: vec![device.result.request.clone()],
                        pool_name: device.result.pool.clone(),
                        device_name: device.device_id.clone(),
                        cdi_device_ids: cdi_device_ids.clone(),
                    },
                    container_edits: self.container_edits(&device.device_id, &config),
                };
                ordered.insert(device.position, prepared);
            }
        }
        Ok(ordered.into_values().collect())
    }

    /// Environment granting a container access to `device_id`.
    fn container_edits(&self, device_id: &str, config: &NpuConfig) -> ContainerEdits {
        let suffix = env_suffix(device_id);
        let visible = parse_slice_id(device_id)
            .map(|(index, _)| index.to_string())
            .unwrap_or_else(|| suffix.to_string());
        let mut env = vec![format!("ASCEND_VISIBLE_DEVICES={visible}")];

        if is_slice_id(device_id) {
            if let Ok(template) = self.engine.template_of(device_id) {
                if !template.is_empty() {
                    env.push(format!("ASCEND_VNPU_SPECS={template}"));
                }
            }
        }

        if let Some(sharing) = &config.sharing {
            env.push(format!(
                "NPU_DEVICE_{suffix}_SHARING_STRATEGY={}",
                sharing.strategy
            ));
            match sharing.strategy {
                SharingStrategy::TimeSlicing => {
                    if let Some(ts) = &sharing.time_slicing_config {
                        env.push(format!(
                            "NPU_DEVICE_{suffix}_TIMESLICE_INTERVAL={}",
                            ts.interval
                        ));
                    }
                }
                SharingStrategy::SpacePartitioning => {
                    if let Some(sp) = &sharing.space_partitioning_config {
                        env.push(format!(
                            "NPU_DEVICE_{suffix}_PARTITION_COUNT={}",
                            sp.partition_count
                        ));
                    }
                }
            }
        }
        ContainerEdits::with_env(env)
    }

    fn roll_back(&self, inner: &mut StateInner, claim_uid: &str, carved: &[String]) {
        for slice_id in carved.iter().rev() {
            match self.engine.release(slice_id) {
                Ok(delta) => inner.inventory.apply(&delta),
                Err(e) => warn!(%claim_uid, slice = %slice_id, error = %e, "rollback release failed"),
            }
        }
        if let Err(e) = self.cdi.delete_claim_spec(claim_uid) {
            warn!(%claim_uid, error = %e, "rollback CDI spec removal failed");
        }
        info!(%claim_uid, released = carved.len(), "failed prepare rolled back");
    }

    // ── Unprepare ──────────────────────────────────────────────

    /// Release a claim's devices. Unknown claims succeed untouched.
    pub fn unprepare(&self, claim_uid: &str) -> DriverResult<()> {
        let mut inner = self.lock();
        let mut checkpoint = self.store.get(CHECKPOINT_NAME)?;
        let Some(prepared) = checkpoint.claims.remove(claim_uid) else {
            debug!(%claim_uid, "claim not prepared; nothing to release");
            return Ok(());
        };

        for device in prepared.iter().rev() {
            match self.engine.release(device.device_name()) {
                Ok(delta) => inner.inventory.apply(&delta),
                Err(e) => warn!(
                    %claim_uid,
                    device = %device.device_name(),
                    error = %e,
                    "failed to release slice"
                ),
            }
        }

        self.store.create(CHECKPOINT_NAME, &checkpoint)?;
        self.cdi.delete_claim_spec(claim_uid)?;
        info!(%claim_uid, devices = prepared.len(), "claim unprepared");
        Ok(())
    }

    // ── Inventory ──────────────────────────────────────────────

    /// Drop inventory entries no engine slice backs; returns their names.
    pub fn reconcile(&self) -> Vec<String> {
        let mut inner = self.lock();
        let known = self.engine.known_slice_ids();
        let removed = inner.inventory.reconcile(&known);
        if !removed.is_empty() {
            info!(removed = ?removed, "stale devices removed from inventory");
        }
        removed
    }

    pub fn allocatable_devices(&self) -> Vec<AllocatableDevice> {
        self.lock().inventory.devices()
    }

    /// Prepared claims as recorded in the checkpoint.
    pub fn prepared_claims(&self) -> DriverResult<BTreeMap<ClaimUid, PreparedClaim>> {
        let _inner = self.lock();
        Ok(self.store.get(CHECKPOINT_NAME)?.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdi::CdiHandler;
    use crate::claim::{
        AllocationResult, ClaimStatus, DeviceAllocation, DeviceAllocationConfiguration,
        OpaqueDeviceConfiguration, SOURCE_FROM_CLASS,
    };
    use crate::discovery::{StaticInventory, enumerate};
    use npudra_core::TemplateCatalog;
    use npudra_core::config::DeviceConfig;
    use npudra_state::StateStore;
    use serde_json::json;

    const DRIVER: &str = "npu.example.com";

    struct Fixture {
        _dir: tempfile::TempDir,
        state: DeviceState,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = DriverConfig {
            node_name: "node-a".to_string(),
            ..DriverConfig::default()
        };
        let engine = Arc::new(SliceEngine::new(
            TemplateCatalog::default_catalog(),
            config.partitioning.eligibility.clone(),
        ));
        let provider = StaticInventory::new(
            (0..2)
                .map(|idx| DeviceConfig {
                    logical_index: idx,
                    model: "Ascend910B".to_string(),
                    ai_core: Some(24),
                    memory_gb: Some(64),
                })
                .collect(),
        );
        let inventory = enumerate(&provider, &engine, "node-a").unwrap();
        let cdi = Arc::new(CdiHandler::new(dir.path(), DRIVER, "node-a").unwrap());
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let state = DeviceState::new(&config, engine, inventory, cdi, store).unwrap();
        Fixture { _dir: dir, state }
    }

    fn claim(uid: &str, device: &str, parameters: Option<serde_json::Value>) -> ResourceClaim {
        let config = parameters
            .map(|parameters| DeviceAllocationConfiguration {
                source: SOURCE_FROM_CLASS.to_string(),
                requests: Vec::new(),
                opaque: Some(OpaqueDeviceConfiguration {
                    driver: DRIVER.to_string(),
                    parameters,
                }),
            })
            .into_iter()
            .collect();
        ResourceClaim {
            uid: uid.to_string(),
            namespace: "default".to_string(),
            name: uid.to_string(),
            status: ClaimStatus {
                allocation: Some(AllocationResult {
                    devices: DeviceAllocation {
                        results: vec![DeviceRequestAllocationResult {
                            request: "npu".to_string(),
                            driver: DRIVER.to_string(),
                            pool: "node-a".to_string(),
                            device: device.to_string(),
                        }],
                        config,
                    },
                }),
            },
        }
    }

    #[test]
    fn first_start_creates_checkpoint() {
        let fx = fixture();
        assert!(fx.state.is_first_start());
        assert!(fx.state.prepared_claims().unwrap().is_empty());
    }

    #[test]
    fn full_card_env() {
        let fx = fixture();
        let prepared = fx.state.prepare(&claim("c-1", "npu-1-0", None)).unwrap();
        assert_eq!(prepared.len(), 1);
        assert_eq!(
            prepared[0].container_edits.env,
            vec![
                "ASCEND_VISIBLE_DEVICES=1",
                "NPU_DEVICE_1-0_SHARING_STRATEGY=TimeSlicing",
                "NPU_DEVICE_1-0_TIMESLICE_INTERVAL=Default",
            ]
        );
        assert_eq!(
            prepared[0].device.cdi_device_ids,
            vec![
                "k8s.npu.example.com/npu=common",
                "k8s.npu.example.com/npu=c-1"
            ]
        );
    }

    #[test]
    fn partition_env_names_template() {
        let fx = fixture();
        let params = NpuConfig::with_template("vir02").to_raw();
        let prepared = fx.state.prepare(&claim("c-1", "npu-0-0", Some(params))).unwrap();
        let env = &prepared[0].container_edits.env;
        assert!(env.contains(&"ASCEND_VNPU_SPECS=vir02".to_string()));
        assert!(env.contains(&"NPU_DEVICE_0-0_SHARING_STRATEGY=TimeSlicing".to_string()));
        assert!(
            fx.state
                .allocatable_devices()
                .iter()
                .any(|d| d.name == "npu-0-1")
        );
    }

    #[test]
    fn space_partitioning_env() {
        let fx = fixture();
        let params = json!({
            "apiVersion": npudra_core::api::API_VERSION,
            "kind": "NpuConfig",
            "sharing": {
                "strategy": "SpacePartitioning",
                "spacePartitioningConfig": { "partitionCount": 3 }
            }
        });
        let prepared = fx.state.prepare(&claim("c-1", "npu-0-0", Some(params))).unwrap();
        assert!(
            prepared[0]
                .container_edits
                .env
                .contains(&"NPU_DEVICE_0-0_PARTITION_COUNT=3".to_string())
        );
    }

    #[test]
    fn invalid_config_is_rejected() {
        let fx = fixture();
        let params = json!({
            "apiVersion": npudra_core::api::API_VERSION,
            "kind": "NpuConfig",
            "sharing": {
                "strategy": "SpacePartitioning",
                "spacePartitioningConfig": { "partitionCount": -1 }
            }
        });
        let err = fx.state.prepare(&claim("c-1", "npu-0-0", Some(params))).unwrap_err();
        assert!(matches!(err, DriverError::InvalidConfig(_)));
        assert!(fx.state.prepared_claims().unwrap().is_empty());
    }

    #[test]
    fn unallocated_claim_is_rejected() {
        let fx = fixture();
        let mut c = claim("c-1", "npu-0-0", None);
        c.status.allocation = None;
        assert!(matches!(
            fx.state.prepare(&c),
            Err(DriverError::ClaimNotAllocated(_))
        ));
    }

    #[test]
    fn unknown_device_is_not_allocatable() {
        let fx = fixture();
        let err = fx.state.prepare(&claim("c-1", "npu-7-0", None)).unwrap_err();
        assert!(matches!(err, DriverError::NotAllocatable(_)));
    }

    #[test]
    fn other_driver_results_are_skipped() {
        let fx = fixture();
        let mut c = claim("c-1", "gpu-0", None);
        if let Some(allocation) = c.status.allocation.as_mut() {
            allocation.devices.results[0].driver = "gpu.example.com".to_string();
        }
        assert!(fx.state.prepare(&c).unwrap().is_empty());
    }

    #[test]
    fn reconcile_after_reset_is_clean() {
        let fx = fixture();
        let params = NpuConfig::with_template("vir01").to_raw();
        fx.state.prepare(&claim("c-1", "npu-0-0", Some(params))).unwrap();
        fx.state.unprepare("c-1").unwrap();
        assert!(fx.state.reconcile().is_empty());
        let names: Vec<String> = fx
            .state
            .allocatable_devices()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["npu-0-0", "npu-1-0"]);
    }
}
