//! Liveness endpoint for the meteoflow ingestion service.
//!
//! Supervisors poll `/health` to check the process is up and serving; it
//! says nothing about whether the last poll cycle succeeded (see `/poll`).
//! Follows the routes gateway layout: this file exports a subrouter, `mod.rs`
//! merges it.

use axum::{routing::get, Json, Router};
use serde::Serialize;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Handle `GET /health`.
///
/// Returns a static JSON object. Does not touch the database, the broker
/// or either upstream source.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Create a subrouter containing the `/health` route.
///
/// Generic over the state type so it merges with the gateway router
/// whatever state that carries.
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/health", get(health))
}
