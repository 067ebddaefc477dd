mod get_run;
mod submit;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/runs", post(submit::submit_run))
        .route("/v1/runs/{run_id}", get(get_run::get_run))
}
