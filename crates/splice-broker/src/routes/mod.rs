//! HTTP routing for the broker.
//!
//! All protocol endpoints are JSON over POST and always answer 200 with a
//! `Response` body; failures are reported through its `ErrorCode`.

mod health;
mod request;
mod result;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/request", post(request::attended))
        .route("/request-unattended", post(request::unattended))
        .route("/result", post(result::result))
        .route("/result-unattended", post(result::result))
        .route("/healthz", get(health::healthz))
        .with_state(state)
}

pub(crate) use request::verify_fingerprint;
