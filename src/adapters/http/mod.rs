//! HTTP adapters - REST API implementations.

pub mod billing;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

pub use billing::{billing_router, BillingAppState};

/// Full application router: billing under `/api` plus a liveness probe.
pub fn app_router(state: BillingAppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api", billing_router())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
