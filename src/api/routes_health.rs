use axum::extract::State;
use serde_json::json;
use std::sync::Arc;

use super::response::{ok, ApiResult};
use super::AppState;

/// Liveness: the process is up and the store is loaded.
pub(super) async fn handler_api_health(State(state): State<Arc<AppState>>) -> ApiResult {
    ok(json!({
        "status": "ok",
        "machines": state.engine.list_machines().await.len(),
        "now": state.engine.now_ms(),
    }))
}
