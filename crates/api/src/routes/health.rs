use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    comfyui_status: &'static str,
    comfyui_url: String,
}

/// Always 200 while the gateway is up; ComfyUI reachability is reported,
/// not enforced.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let comfyui_status = if state.watcher.is_reachable().await {
        "connected"
    } else {
        "disconnected"
    };

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        comfyui_status,
        comfyui_url: state.watcher.config().api_url.clone(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
