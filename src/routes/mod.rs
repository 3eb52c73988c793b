use std::sync::Arc;

use axum::Router;

use crate::PollCycle;

mod health;
mod poll;

// ---

pub fn router(cycle: Arc<PollCycle>) -> Router {
    // ---
    Router::new()
        .merge(poll::router())
        .merge(health::router())
        .with_state(cycle)
}
