//! REST API handlers.
//!
//! The claim state machine is synchronous; every handler runs it on the
//! blocking pool and wraps the outcome in an [`ApiResponse`].

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use npudra_driver::ResourceClaim;
use serde::{Deserialize, Serialize};
use tracing::error;

use super::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// Run `f` on the blocking pool and render its result.
async fn blocking<T, F>(f: F) -> axum::response::Response
where
    T: Serialize + Send + 'static,
    F: FnOnce() -> Result<T, String> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(data)) => ApiResponse::ok(data).into_response(),
        Ok(Err(e)) => error_response(&e, StatusCode::INTERNAL_SERVER_ERROR).into_response(),
        Err(e) => {
            error!(error = %e, "api task failed");
            error_response("internal task failure", StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareRequest {
    pub claims: Vec<ResourceClaim>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnprepareRequest {
    pub claim_uids: Vec<String>,
}

// ── Claims ─────────────────────────────────────────────────────

/// POST /api/v1/claims/prepare
pub async fn prepare_claims(
    State(state): State<ApiState>,
    Json(req): Json<PrepareRequest>,
) -> impl IntoResponse {
    let driver = state.driver.clone();
    blocking(move || Ok(driver.prepare_resource_claims(&req.claims))).await
}

/// POST /api/v1/claims/unprepare
pub async fn unprepare_claims(
    State(state): State<ApiState>,
    Json(req): Json<UnprepareRequest>,
) -> impl IntoResponse {
    let driver = state.driver.clone();
    blocking(move || Ok(driver.unprepare_resource_claims(&req.claim_uids))).await
}

/// GET /api/v1/claims
pub async fn list_claims(State(state): State<ApiState>) -> impl IntoResponse {
    let driver = state.driver.clone();
    blocking(move || driver.state().prepared_claims().map_err(|e| e.to_string())).await
}

// ── Devices ────────────────────────────────────────────────────

/// GET /api/v1/devices
pub async fn list_devices(State(state): State<ApiState>) -> impl IntoResponse {
    let driver = state.driver.clone();
    blocking(move || Ok::<_, String>(driver.state().allocatable_devices())).await
}
