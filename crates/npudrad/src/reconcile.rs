//! Periodic inventory reconciliation.

use std::sync::Arc;
use std::time::Duration;

use npudra_driver::DeviceState;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Reconcile the inventory every `interval` until shutdown.
pub async fn run(state: Arc<DeviceState>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    info!(interval_secs = interval.as_secs(), "inventory reconciler started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let state = state.clone();
                match tokio::task::spawn_blocking(move || state.reconcile()).await {
                    Ok(removed) => debug!(removed = removed.len(), "inventory reconciled"),
                    Err(e) => warn!(error = %e, "inventory reconciliation task failed"),
                }
            }
            _ = shutdown.changed() => {
                info!("inventory reconciler shutting down");
                break;
            }
        }
    }
}
