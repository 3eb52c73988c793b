//! Manual poll trigger.
//!
//! `POST /poll` runs one cycle right away, alongside whatever the scheduler
//! is doing, and returns the cycle report. The engine's per-stream locks keep
//! the two from reconciling the same stream at once.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use chrono::Utc;
use tracing::info;

use crate::{PollCycle, Trigger};

// ---

pub fn router() -> Router<Arc<PollCycle>> {
    // ---
    Router::new().route("/poll", post(handler))
}

/// 200 with the report when the cycle was clean, 207 when it partially failed.
async fn handler(State(cycle): State<Arc<PollCycle>>) -> impl IntoResponse {
    // ---
    info!("POST /poll - Starting manual cycle");

    let report = cycle.run(Trigger::Manual, Utc::now()).await;

    let status = if report.is_clean() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    (status, Json(report))
}
