//! Agent assembly from a loaded configuration.

use std::sync::Arc;

use npudra_core::{DriverConfig, TemplateCatalog};
use npudra_driver::device_class::{predefined_classes, publish};
use npudra_driver::discovery::enumerate;
use npudra_driver::{
    CdiHandler, DeviceClassApi, DeviceState, Driver, ManifestDirApi, StaticInventory,
};
use npudra_partition::SliceEngine;
use npudra_state::StateStore;
use tracing::{error, info};

/// File name of the checkpoint database inside the data directory.
pub const CHECKPOINT_DB: &str = "checkpoint.redb";

/// A fully assembled node agent.
pub struct Agent {
    pub driver: Driver,
    pub device_classes: Option<Arc<dyn DeviceClassApi>>,
    pub driver_name: String,
}

impl Agent {
    pub fn state(&self) -> &Arc<DeviceState> {
        self.driver.state()
    }

    /// Derive and upsert the predefined device classes, if publication is enabled.
    ///
    /// Returns the number of classes that failed to publish.
    pub fn publish_device_classes(&self) -> usize {
        let Some(api) = &self.device_classes else {
            info!("device class publication disabled");
            return 0;
        };
        let classes = predefined_classes(&self.driver_name, &self.state().engine().devices());
        publish(api.as_ref(), &classes)
    }
}

/// Load the template catalog; a malformed table leaves only full-card allocation.
fn load_catalog(config: &DriverConfig) -> TemplateCatalog {
    match TemplateCatalog::load(&config.template_file) {
        Ok(catalog) => {
            info!(templates = catalog.len(), "template catalog loaded");
            catalog
        }
        Err(e) => {
            error!(
                path = %config.template_file.display(),
                error = %e,
                "failed to load template catalog; only full-card allocation is supported"
            );
            TemplateCatalog::new()
        }
    }
}

/// Build every subsystem of the agent.
pub fn build(config: &DriverConfig) -> anyhow::Result<Agent> {
    if config.node_name.is_empty() {
        anyhow::bail!("node name is not set");
    }

    let engine = Arc::new(SliceEngine::new(
        load_catalog(config),
        config.partitioning.eligibility.clone(),
    ));

    let provider = StaticInventory::new(config.devices.clone());
    let inventory = enumerate(&provider, &engine, &config.node_name)?;
    info!(devices = inventory.len(), "device discovery completed");

    std::fs::create_dir_all(&config.data_dir)?;
    let db_path = config.data_dir.join(CHECKPOINT_DB);
    let store = Arc::new(StateStore::open(&db_path)?);
    info!(path = ?db_path, "checkpoint store opened");

    let cdi = Arc::new(CdiHandler::new(
        &config.cdi_root,
        &config.driver_name,
        &config.node_name,
    )?);

    let state = Arc::new(DeviceState::new(config, engine, inventory, cdi, store)?);

    let device_classes = match &config.device_class_dir {
        Some(dir) => Some(Arc::new(ManifestDirApi::new(dir)?) as Arc<dyn DeviceClassApi>),
        None => None,
    };

    Ok(Agent {
        driver: Driver::new(state),
        device_classes,
        driver_name: config.driver_name.clone(),
    })
}
