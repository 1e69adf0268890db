//! HTTP surface of the node agent.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/claims/prepare` | Prepare a batch of claims |
//! | POST | `/api/v1/claims/unprepare` | Unprepare a batch of claims |
//! | GET | `/api/v1/claims` | Prepared claims from the checkpoint |
//! | GET | `/api/v1/devices` | Advertised device inventory |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use npudra_driver::Driver;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub driver: Driver,
}

/// Build the agent's API router.
pub fn build_router(driver: Driver) -> Router {
    let api_state = ApiState { driver };

    let api_routes = Router::new()
        .route("/claims", get(handlers::list_claims))
        .route("/claims/prepare", post(handlers::prepare_claims))
        .route("/claims/unprepare", post(handlers::unprepare_claims))
        .route("/devices", get(handlers::list_devices))
        .with_state(api_state);

    Router::new().nest("/api/v1", api_routes)
}
