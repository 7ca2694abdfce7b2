use axum::extract::State;
use axum::Json;

use crate::state::AppState;

/// `GET /healthz` — store and queue connectivity.
pub async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    let store_ok = state.store.ping().await.is_ok();
    let queue_ok = state.queue.ping().await.is_ok();
    let status = if store_ok && queue_ok { "ok" } else { "degraded" };
    Json(serde_json::json!({
        "status": status,
        "store": store_ok,
        "queue": queue_ok,
    }))
}
