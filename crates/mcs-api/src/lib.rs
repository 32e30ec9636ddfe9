//! mcs-api: REST API for the multi-cloud scheduler.
//!
//! Provides axum route handlers for submitting application groups, editing
//! the inter-cloud RTT matrix, reading run records and triggering cleanup.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/doNewAppGroup` | Schedule and deploy a group of applications |
//! | GET | `/api/v1/netstate` | List RTT rows |
//! | PUT | `/api/v1/netstate/{cloud}` | Replace the RTT row of a cloud |
//! | GET | `/api/v1/runs` | List scheduling runs, newest first |
//! | GET | `/api/v1/runs/{id}` | Get one run |
//! | POST | `/api/v1/gc` | Sweep idle auto-scheduled VMs now |
//! | GET | `/healthz` | Liveness |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use mcs_scheduler::Scheduler;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub scheduler: Arc<Scheduler>,
}

/// Build the complete API router.
pub fn build_router(scheduler: Arc<Scheduler>) -> Router {
    let api_state = ApiState { scheduler };

    let api_routes = Router::new()
        .route("/netstate", get(handlers::list_net_states))
        .route("/netstate/{cloud}", put(handlers::put_net_state))
        .route("/runs", get(handlers::list_runs))
        .route("/runs/{id}", get(handlers::get_run))
        .route("/gc", post(handlers::trigger_gc))
        .with_state(api_state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/doNewAppGroup", post(handlers::do_new_app_group).with_state(api_state))
        .route("/healthz", get(handlers::healthz))
}
