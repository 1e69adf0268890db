//! Batch claim protocol surface.
//!
//! The kubelet hands over claims in batches and expects one result per claim;
//! a failure preparing one claim never fails the others.

use std::collections::BTreeMap;
use std::sync::Arc;

use npudra_state::{Device, claim_devices};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::claim::ResourceClaim;
use crate::state::DeviceState;

/// Per-claim result of a batch prepare.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareResult {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<Device>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-claim result of a batch unprepare.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnprepareResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct Driver {
    state: Arc<DeviceState>,
}

impl Driver {
    pub fn new(state: Arc<DeviceState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<DeviceState> {
        &self.state
    }

    pub fn prepare_resource_claims(
        &self,
        claims: &[ResourceClaim],
    ) -> BTreeMap<String, PrepareResult> {
        info!(count = claims.len(), "prepare resource claims");
        claims
            .iter()
            .map(|claim| {
                let result = match self.state.prepare(claim) {
                    Ok(prepared) => PrepareResult {
                        devices: claim_devices(&prepared),
                        error: None,
                    },
                    Err(e) => {
                        error!(claim_uid = %claim.uid, error = %e, "prepare failed");
                        PrepareResult {
                            devices: Vec::new(),
                            error: Some(format!("error preparing devices for claim {}: {e}", claim.uid)),
                        }
                    }
                };
                (claim.uid.clone(), result)
            })
            .collect()
    }

    pub fn unprepare_resource_claims(&self, claim_uids: &[String]) -> BTreeMap<String, UnprepareResult> {
        info!(count = claim_uids.len(), "unprepare resource claims");
        claim_uids
            .iter()
            .map(|uid| {
                let error = self.state.unprepare(uid).err().map(|e| {
                    error!(claim_uid = %uid, error = %e, "unprepare failed");
                    format!("error unpreparing devices for claim {uid}: {e}")
                });
                (uid.clone(), UnprepareResult { error })
            })
            .collect()
    }
}
